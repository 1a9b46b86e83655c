//! Poison-tolerant access to the bus and pattern cache locks.
//!
//! A poisoned lock is logged on each access and its last state is reused.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

pub(crate) trait RecoverPoisoned<T> {
    fn read_or_recover(&self, site: &'static str, op: &'static str) -> RwLockReadGuard<'_, T>;

    fn write_or_recover(&self, site: &'static str, op: &'static str) -> RwLockWriteGuard<'_, T>;
}

impl<T> RecoverPoisoned<T> for RwLock<T> {
    fn read_or_recover(&self, site: &'static str, op: &'static str) -> RwLockReadGuard<'_, T> {
        self.read()
            .unwrap_or_else(|poisoned| recovered(poisoned, site, op, "read"))
    }

    fn write_or_recover(&self, site: &'static str, op: &'static str) -> RwLockWriteGuard<'_, T> {
        self.write()
            .unwrap_or_else(|poisoned| recovered(poisoned, site, op, "write"))
    }
}

fn recovered<G>(
    poisoned: PoisonError<G>,
    site: &'static str,
    op: &'static str,
    access: &'static str,
) -> G {
    warn!(
        site,
        op,
        access,
        "Lock poisoned by a panicking listener; reusing its last state"
    );
    poisoned.into_inner()
}
