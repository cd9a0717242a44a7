// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end economy tests.
//!
//! `TestHarness` assembles an `EconomyService` over a manual clock, the
//! in-memory mock store and, optionally, a mock remote sync. Retry backoff
//! is shortened to milliseconds so persistence failures resolve quickly.

use std::sync::Arc;
use std::time::Duration;

use cardwise_core::{CardwiseError, UserEconomy, UserId};
use cardwise_economy::{EconomyService, ManualClock, RetryPolicy, TierCatalog};
use chrono::{DateTime, TimeZone, Utc};

use crate::mock_store::MockLedgerStore;
use crate::mock_sync::MockRemoteSync;

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    catalog: TierCatalog,
    start: DateTime<Utc>,
    with_sync: bool,
    idempotency_window: usize,
    max_attempts: u32,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            catalog: TierCatalog::default(),
            start: Utc
                .with_ymd_and_hms(2026, 1, 15, 10, 0, 0)
                .single()
                .unwrap_or_else(Utc::now),
            with_sync: false,
            idempotency_window: 128,
            max_attempts: 3,
        }
    }

    /// Use a custom tier catalog.
    pub fn with_catalog(mut self, catalog: TierCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Start the manual clock at `start`.
    pub fn starting_at(mut self, start: DateTime<Utc>) -> Self {
        self.start = start;
        self
    }

    /// Attach a mock remote sync collaborator.
    pub fn with_sync(mut self) -> Self {
        self.with_sync = true;
        self
    }

    pub fn with_idempotency_window(mut self, keys: usize) -> Self {
        self.idempotency_window = keys;
        self
    }

    /// Save attempts per snapshot before the persister gives up.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Build the harness. Must be called inside a tokio runtime.
    pub fn build(self) -> TestHarness {
        let clock = Arc::new(ManualClock::new(self.start));
        let store = Arc::new(MockLedgerStore::new());
        let sync = self.with_sync.then(|| Arc::new(MockRemoteSync::new()));

        let mut builder = EconomyService::builder(self.catalog)
            .clock(clock.clone())
            .store(store.clone())
            .idempotency_window(self.idempotency_window)
            .retry_policy(RetryPolicy {
                initial: Duration::from_millis(1),
                max: Duration::from_millis(5),
                max_attempts: self.max_attempts,
            });
        if let Some(sync) = &sync {
            builder = builder.sync(sync.clone());
        }

        TestHarness {
            service: Arc::new(builder.build()),
            clock,
            store,
            sync,
        }
    }
}

/// A complete economy with mock collaborators and a controllable clock.
pub struct TestHarness {
    /// The service under test.
    pub service: Arc<EconomyService>,
    /// Clock driving period rollover and staleness.
    pub clock: Arc<ManualClock>,
    /// In-memory store receiving write-behind saves.
    pub store: Arc<MockLedgerStore>,
    /// Remote sync, when built `with_sync()`.
    pub sync: Option<Arc<MockRemoteSync>>,
}

impl TestHarness {
    /// Create a new builder for configuring the test harness.
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Open a user on the default tier.
    pub async fn open(&self, user: &str) -> Result<UserEconomy, CardwiseError> {
        self.service.open_user(UserId::from(user), None).await
    }

    /// Open a user on a named tier.
    pub async fn open_on(&self, user: &str, tier: &str) -> Result<UserEconomy, CardwiseError> {
        self.service
            .open_user(UserId::from(user), Some(tier.into()))
            .await
    }

    /// Wait until the store has seen at least `count` successful saves.
    ///
    /// Returns `false` if that does not happen within `timeout`.
    pub async fn wait_for_saves(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.store.save_count() < count {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        true
    }
}
