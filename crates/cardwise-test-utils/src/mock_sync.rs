// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock remote source of truth.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use cardwise_core::{
    AdapterType, CardwiseError, HealthStatus, PluginAdapter, RemoteSync, UserEconomy, UserId,
};

/// A mock remote sync collaborator.
///
/// Serves records set with `set_remote()` from `fetch()` and captures every
/// pushed record for assertions.
pub struct MockRemoteSync {
    remote: Mutex<HashMap<UserId, UserEconomy>>,
    pushed: Mutex<Vec<UserEconomy>>,
    fail_fetch: AtomicBool,
    fail_push: AtomicBool,
}

impl MockRemoteSync {
    pub fn new() -> Self {
        Self {
            remote: Mutex::new(HashMap::new()),
            pushed: Mutex::new(Vec::new()),
            fail_fetch: AtomicBool::new(false),
            fail_push: AtomicBool::new(false),
        }
    }

    /// Set the record the remote will return for its user.
    pub async fn set_remote(&self, economy: UserEconomy) {
        self.remote
            .lock()
            .await
            .insert(economy.user_id.clone(), economy);
    }

    /// All records pushed so far, oldest first.
    pub async fn pushed(&self) -> Vec<UserEconomy> {
        self.pushed.lock().await.clone()
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn fail_push(&self, fail: bool) {
        self.fail_push.store(fail, Ordering::SeqCst);
    }
}

impl Default for MockRemoteSync {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginAdapter for MockRemoteSync {
    fn name(&self) -> &str {
        "mock-sync"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::RemoteSync
    }

    async fn health_check(&self) -> Result<HealthStatus, CardwiseError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl RemoteSync for MockRemoteSync {
    async fn fetch(&self, user_id: &UserId) -> Result<Option<UserEconomy>, CardwiseError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            debug!(user_id = %user_id, "mock remote failing fetch");
            return Err(CardwiseError::Sync {
                message: "mock remote unreachable".to_string(),
            });
        }
        Ok(self.remote.lock().await.get(user_id).cloned())
    }

    async fn push(&self, economy: &UserEconomy) -> Result<(), CardwiseError> {
        if self.fail_push.load(Ordering::SeqCst) {
            debug!(user_id = %economy.user_id, "mock remote failing push");
            return Err(CardwiseError::Sync {
                message: "mock remote rejected push".to_string(),
            });
        }
        self.pushed.lock().await.push(economy.clone());
        Ok(())
    }
}
