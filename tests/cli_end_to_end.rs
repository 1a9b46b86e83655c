use std::io::Write;

use assert_cmd::Command;
use httpmock::MockServer;
use predicates::str::contains;
use tempfile::NamedTempFile;

const RULES: &str = r#"
[rules]
rules = [
  "/content/mysite/triggeredcontent/*=/content/mysite/flushedcontent/somepage",
  "/content/mysite/*/news/*=/content/mysite/$1/news&/content/mysite/$1",
]

[repository.service_users]
"dispatcher-flush" = "flush-service"
"#;

fn toml_file(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("tmp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

fn events_file(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("tmp file");
    for line in lines {
        writeln!(file, "{line}").expect("write event");
    }
    file
}

fn flushd() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("flushd"));
    cmd.env_remove("FLUSHD_CONFIG_FILE").env("RUST_LOG", "warn");
    cmd
}

#[test]
fn rules_lists_rules_with_their_filters() {
    let config = toml_file(RULES);

    flushd()
        .arg("--config-file")
        .arg(config.path())
        .arg("rules")
        .assert()
        .success()
        .stdout(contains(
            "/content/mysite/*/news/* => /content/mysite/$1/news & /content/mysite/$1",
        ))
        .stdout(contains("filter: (paths=/content/mysite/triggeredcontent/*)"));
}

#[test]
fn resolve_prints_expanded_targets() {
    let config = toml_file(RULES);

    flushd()
        .arg("--config-file")
        .arg(config.path())
        .arg("resolve")
        .arg("/content/mysite/en/news/launch")
        .assert()
        .success()
        .stdout(contains(
            "/content/mysite/*/news/* => /content/mysite/en/news & /content/mysite/en",
        ));
}

#[test]
fn dry_run_replay_reports_summary() {
    let config = toml_file(RULES);
    let events = events_file(&[
        r#"{"path":"/content/mysite/triggeredcontent/foo","type":"ACTIVATE"}"#,
        r#"{"path":"/content/elsewhere","type":"ACTIVATE"}"#,
        "garbage",
    ]);

    let assert = flushd()
        .arg("--config-file")
        .arg(config.path())
        .arg("replay")
        .arg("--dry-run")
        .arg("--events")
        .arg(events.path())
        .assert()
        .success();

    let output = String::from_utf8_lossy(&assert.get_output().stdout);
    assert!(output.contains("\"published\": 2"), "stdout: {output}");
    assert!(output.contains("\"skipped\": 1"), "stdout: {output}");
    assert!(output.contains("\"deliveries\": 1"), "stdout: {output}");
}

#[test]
fn replay_flushes_through_dispatcher_agent() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("POST")
            .path("/dispatcher/invalidate.cache")
            .header("CQ-Action", "Delete")
            .header("CQ-Path", "/content/mysite/flushedcontent/somepage");
        then.status(200);
    });

    let config = toml_file(&format!(
        "{RULES}\n[[dispatcher.agents]]\nname = \"publish\"\nurl = \"{}\"\n",
        server.base_url()
    ));

    flushd()
        .arg("--config-file")
        .arg(config.path())
        .arg("replay")
        .write_stdin(r#"{"path":"/content/mysite/triggeredcontent/foo","type":"DELETE"}"#)
        .assert()
        .success()
        .stdout(contains("\"published\": 1"));

    mock.assert();
}

#[test]
fn invalid_action_type_fails_fast() {
    let config = toml_file("[rules]\naction_type = \"replicate\"\n");

    flushd()
        .arg("--config-file")
        .arg(config.path())
        .arg("rules")
        .assert()
        .failure()
        .stderr(contains("rules.action_type"));
}

#[test]
fn malformed_rule_fails_activation() {
    let config = toml_file("[rules]\nrules = [\"/content/*=&\"]\n");

    flushd()
        .arg("--config-file")
        .arg(config.path())
        .arg("rules")
        .assert()
        .failure()
        .stderr(contains("failed to activate flush rules"));
}
