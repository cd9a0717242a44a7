// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Write-behind persistence.
//!
//! Committed snapshots are handed to a background task over an unbounded
//! channel so enforcement never waits on disk or network. The task keeps at
//! most one pending snapshot per user (the newest version wins), saves it
//! through the [`LedgerStore`] with exponential backoff, and after a
//! successful save pushes it to the [`RemoteSync`] collaborator if one is
//! configured. Failures are logged and broadcast; they never roll back the
//! in-memory ledger.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cardwise_config::model::PersistenceConfig;
use cardwise_core::{LedgerStore, RemoteSync, UserId};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::events::LedgerEvent;
use crate::ledger::LedgerSnapshot;

/// Backoff settings for failed saves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// Attempts per snapshot before it is parked until the next write.
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &PersistenceConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.retry_initial_ms),
            max: Duration::from_millis(config.retry_max_ms),
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Delay before attempt `attempt + 1`, given `attempt` failures so far.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial.saturating_mul(factor).min(self.max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PersistenceConfig::default())
    }
}

struct Pending {
    snapshot: Arc<LedgerSnapshot>,
    attempts: u32,
    due: Instant,
}

/// Handle to the background persistence task.
pub(crate) struct Persister {
    tx: mpsc::UnboundedSender<Arc<LedgerSnapshot>>,
    handle: JoinHandle<()>,
}

impl Persister {
    /// Spawn the task on the current tokio runtime.
    pub(crate) fn spawn(
        store: Option<Arc<dyn LedgerStore>>,
        sync: Option<Arc<dyn RemoteSync>>,
        policy: RetryPolicy,
        events: broadcast::Sender<LedgerEvent>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            store,
            sync,
            policy,
            events,
            pending: HashMap::new(),
            saved: HashMap::new(),
        };
        let handle = tokio::spawn(worker.run(rx));
        Self { tx, handle }
    }

    /// Queue a snapshot for saving. Never blocks.
    pub(crate) fn enqueue(&self, snapshot: Arc<LedgerSnapshot>) {
        if self.tx.send(snapshot).is_err() {
            warn!("persistence task is gone; snapshot kept in memory only");
        }
    }

    /// Close the queue and wait for pending writes to be attempted.
    pub(crate) async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.handle.await {
            error!(error = %e, "persistence task panicked");
        }
    }
}

struct Worker {
    store: Option<Arc<dyn LedgerStore>>,
    sync: Option<Arc<dyn RemoteSync>>,
    policy: RetryPolicy,
    events: broadcast::Sender<LedgerEvent>,
    pending: HashMap<UserId, Pending>,
    /// Highest version saved per user, to skip late duplicates.
    saved: HashMap<UserId, u64>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Arc<LedgerSnapshot>>) {
        loop {
            if self.pending.is_empty() {
                match rx.recv().await {
                    Some(snapshot) => self.accept(snapshot),
                    None => break,
                }
            }
            while let Ok(snapshot) = rx.try_recv() {
                self.accept(snapshot);
            }

            self.flush_due(Instant::now()).await;

            let Some(next_due) = self.pending.values().map(|p| p.due).min() else {
                continue;
            };
            tokio::select! {
                received = rx.recv() => match received {
                    Some(snapshot) => self.accept(snapshot),
                    None => {
                        self.final_flush().await;
                        break;
                    }
                },
                _ = tokio::time::sleep_until(next_due) => {}
            }
        }
        debug!("persistence task stopped");
    }

    fn accept(&mut self, snapshot: Arc<LedgerSnapshot>) {
        let user_id = snapshot.economy.user_id.clone();
        if self
            .saved
            .get(&user_id)
            .is_some_and(|&saved| saved >= snapshot.version)
        {
            return;
        }
        if let Some(existing) = self.pending.get(&user_id) {
            if existing.snapshot.version >= snapshot.version {
                return;
            }
        }
        // A newer write unparks the user and restarts the backoff.
        self.pending.insert(
            user_id,
            Pending {
                snapshot,
                attempts: 0,
                due: Instant::now(),
            },
        );
    }

    async fn flush_due(&mut self, now: Instant) {
        let due: Vec<UserId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.due <= now)
            .map(|(user_id, _)| user_id.clone())
            .collect();
        for user_id in due {
            self.attempt(&user_id).await;
        }
    }

    /// Once the queue is closed, give every pending snapshot one more try
    /// rather than waiting out its backoff.
    async fn final_flush(&mut self) {
        let users: Vec<UserId> = self.pending.keys().cloned().collect();
        for user_id in users {
            self.attempt(&user_id).await;
        }
        for (user_id, pending) in self.pending.drain() {
            error!(
                user_id = %user_id,
                version = pending.snapshot.version,
                "unsaved ledger snapshot dropped at shutdown"
            );
        }
    }

    async fn attempt(&mut self, user_id: &UserId) {
        let Some(snapshot) = self.pending.get(user_id).map(|p| p.snapshot.clone()) else {
            return;
        };

        let saved = match self.store.clone() {
            Some(store) => store.save(&snapshot.economy).await,
            None => Ok(()),
        };
        if let Err(e) = saved {
            self.record_failure(user_id, e.to_string());
            return;
        }

        self.pending.remove(user_id);
        self.saved.insert(user_id.clone(), snapshot.version);
        debug!(user_id = %user_id, version = snapshot.version, "ledger snapshot saved");

        if let Some(sync) = &self.sync {
            if let Err(e) = sync.push(&snapshot.economy).await {
                warn!(user_id = %user_id, error = %e, "remote sync push failed");
                let _ = self.events.send(LedgerEvent::SyncFailed {
                    user_id: user_id.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    fn record_failure(&mut self, user_id: &UserId, message: String) {
        let Some(pending) = self.pending.get_mut(user_id) else {
            return;
        };
        pending.attempts += 1;
        let attempts = pending.attempts;

        let _ = self.events.send(LedgerEvent::PersistenceFailed {
            user_id: user_id.clone(),
            message: message.clone(),
        });

        if attempts >= self.policy.max_attempts {
            warn!(
                user_id = %user_id,
                attempts,
                error = %message,
                "giving up on ledger snapshot until the next write"
            );
            self.pending.remove(user_id);
            return;
        }

        let delay = self.policy.delay_after(attempts);
        warn!(
            user_id = %user_id,
            attempts,
            retry_in_ms = delay.as_millis() as u64,
            error = %message,
            "ledger save failed, retrying"
        );
        pending.due = Instant::now() + delay;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_max() {
        let policy = RetryPolicy {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(500),
            max_attempts: 8,
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(4), Duration::from_millis(500));
        assert_eq!(policy.delay_after(40), Duration::from_millis(500));
    }

    #[test]
    fn policy_reads_config() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.initial, Duration::from_millis(200));
        assert_eq!(policy.max, Duration::from_secs(30));
        assert_eq!(policy.max_attempts, 8);
    }
}
