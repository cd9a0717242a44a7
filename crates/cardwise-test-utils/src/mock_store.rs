// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory ledger store with failure injection.
//!
//! `MockLedgerStore` implements `LedgerStore` over a `HashMap` and counts
//! every save attempt, so tests can assert on write-behind behaviour and
//! make the store fail a chosen number of times.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use cardwise_core::{
    AdapterType, CardwiseError, HealthStatus, LedgerStore, PluginAdapter, UserEconomy, UserId,
};

/// A mock ledger store for testing.
pub struct MockLedgerStore {
    records: Mutex<HashMap<UserId, UserEconomy>>,
    save_attempts: AtomicUsize,
    saves: AtomicUsize,
    failing_saves: AtomicUsize,
    fail_loads: AtomicBool,
}

impl MockLedgerStore {
    /// Create an empty store that never fails.
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            save_attempts: AtomicUsize::new(0),
            saves: AtomicUsize::new(0),
            failing_saves: AtomicUsize::new(0),
            fail_loads: AtomicBool::new(false),
        }
    }

    /// Seed a stored record, as if saved by an earlier process.
    pub async fn insert(&self, economy: UserEconomy) {
        self.records
            .lock()
            .await
            .insert(economy.user_id.clone(), economy);
    }

    /// The stored record for a user.
    pub async fn stored(&self, user_id: &UserId) -> Option<UserEconomy> {
        self.records.lock().await.get(user_id).cloned()
    }

    /// Make the next `n` saves fail.
    pub fn fail_next_saves(&self, n: usize) {
        self.failing_saves.store(n, Ordering::SeqCst);
    }

    /// Make every load fail (or succeed again).
    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Number of save calls, including failed ones.
    pub fn save_attempts(&self) -> usize {
        self.save_attempts.load(Ordering::SeqCst)
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl Default for MockLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

fn unavailable(what: &str) -> CardwiseError {
    CardwiseError::PersistenceUnavailable {
        source: format!("mock store {what} failure").into(),
    }
}

#[async_trait]
impl PluginAdapter for MockLedgerStore {
    fn name(&self) -> &str {
        "mock-store"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, CardwiseError> {
        if self.failing_saves.load(Ordering::SeqCst) > 0 {
            return Ok(HealthStatus::Degraded("saves failing".to_string()));
        }
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl LedgerStore for MockLedgerStore {
    async fn load(&self, user_id: &UserId) -> Result<Option<UserEconomy>, CardwiseError> {
        if self.fail_loads.load(Ordering::SeqCst) {
            debug!(user_id = %user_id, "mock store failing load");
            return Err(unavailable("load"));
        }
        Ok(self.records.lock().await.get(user_id).cloned())
    }

    async fn save(&self, economy: &UserEconomy) -> Result<(), CardwiseError> {
        self.save_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            debug!(user_id = %economy.user_id, "mock store failing save");
            return Err(unavailable("save"));
        }
        self.records
            .lock()
            .await
            .insert(economy.user_id.clone(), economy.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
