//! Runtime wiring of the flush listeners.

use std::io::BufRead;
use std::sync::Arc;

use crate::config::Settings;
use crate::flush::{
    DispatcherFlusher, FlushConfig, FlushRule, FlushRuleRegistrar, ListenerRegistration,
    LocalEventBus, Resolution, ServiceUserSessions,
};
use crate::infra::http_flusher::{DryRunFlusher, HttpDispatcherFlusher};

use super::error::AppError;
use super::replay::{ReplaySummary, replay_events};

/// Flush listeners registered on an in-process event bus.
pub struct FlushService {
    bus: Arc<LocalEventBus>,
    registrar: FlushRuleRegistrar<LocalEventBus, ServiceUserSessions>,
    config: FlushConfig,
}

impl FlushService {
    pub fn new(settings: &Settings, flusher: Arc<dyn DispatcherFlusher>) -> Self {
        let bus = Arc::new(LocalEventBus::new());
        let sessions = Arc::new(ServiceUserSessions::new(
            settings.repository.service_users.clone(),
        ));
        let registrar = FlushRuleRegistrar::new(Arc::clone(&bus), sessions, flusher);

        Self {
            bus,
            registrar,
            config: FlushConfig::from(settings),
        }
    }

    /// Build the service with the HTTP transport, or the logging one when
    /// `dry_run` is set.
    pub fn from_settings(settings: &Settings, dry_run: bool) -> Result<Self, AppError> {
        let flusher: Arc<dyn DispatcherFlusher> = if dry_run {
            Arc::new(DryRunFlusher)
        } else {
            Arc::new(HttpDispatcherFlusher::new(&settings.dispatcher)?)
        };
        Ok(Self::new(settings, flusher))
    }

    pub fn activate(&mut self) -> Result<usize, AppError> {
        Ok(self.registrar.activate(&self.config)?)
    }

    pub fn bus(&self) -> &LocalEventBus {
        &self.bus
    }

    /// Active rules paired with the listener registered for each.
    pub fn rules(&self) -> Vec<(&FlushRule, &ListenerRegistration)> {
        self.registrar
            .rule_table()
            .map(|table| table.iter().zip(self.registrar.registrations()).collect())
            .unwrap_or_default()
    }

    pub fn resolve(&self, path: &str) -> Vec<Resolution> {
        self.registrar.resolve(path)
    }

    pub fn replay<R: BufRead>(&self, reader: R) -> Result<ReplaySummary, AppError> {
        replay_events(&self.bus, reader)
    }

    /// Release every listener. Returns the number of handles processed.
    pub fn shutdown(mut self) -> usize {
        self.registrar.deactivate()
    }
}
