// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The application-facing economy service.
//!
//! `EconomyService` owns one [`QuotaLedger`] per opened user, the current
//! [`TierCatalog`], and the collaborators (clock, store, remote sync). Every
//! query and decision first runs the period-reset check. Exhaustion never
//! surfaces as an `Err`: confirmations return a [`CommitOutcome`] carrying
//! the same kind of verdict the evaluate calls produce.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use cardwise_config::model::CardwiseConfig;
use cardwise_core::{
    CardwiseError, IdempotencyKey, LedgerStore, RemoteSync, Tier, TierId, UserEconomy, UserId,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::catalog::TierCatalog;
use crate::clock::{Clock, SystemClock};
use crate::engine::{
    CostPolicy, EXPORT_LIMIT_REACHED, EnforcementEngine, EnforcementResult, FlatCostPolicy,
    INSUFFICIENT_CREDITS,
};
use crate::events::{DEFAULT_EVENT_CAPACITY, LedgerEvent};
use crate::ledger::QuotaLedger;
use crate::persister::{Persister, RetryPolicy};
use crate::reconcile::{merge_recovered, reconcile_records};
use crate::request::{Action, ActionKind, ExportRequest, GenerationRequest};
use crate::reset::{PeriodReset, PeriodResetScheduler};
use crate::transaction::{CommitReceipt, ConsumptionTransaction};

/// Which balance ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialKind {
    InsufficientBalance,
    QuotaExhausted,
}

/// Result of a confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The ledger was charged, or the key had already been charged.
    Committed(CommitReceipt),
    /// Nothing was charged.
    Denied {
        kind: DenialKind,
        verdict: EnforcementResult,
    },
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }

    pub fn receipt(&self) -> Option<&CommitReceipt> {
        match self {
            Self::Committed(receipt) => Some(receipt),
            Self::Denied { .. } => None,
        }
    }
}

/// Builder for [`EconomyService`].
pub struct EconomyServiceBuilder {
    catalog: TierCatalog,
    clock: Arc<dyn Clock>,
    cost_policy: Arc<dyn CostPolicy>,
    store: Option<Arc<dyn LedgerStore>>,
    sync: Option<Arc<dyn RemoteSync>>,
    idempotency_window: usize,
    stale_after: Duration,
    retry: RetryPolicy,
    event_capacity: usize,
}

impl EconomyServiceBuilder {
    fn new(catalog: TierCatalog) -> Self {
        Self {
            catalog,
            clock: Arc::new(SystemClock),
            cost_policy: Arc::new(FlatCostPolicy::default()),
            store: None,
            sync: None,
            idempotency_window: 128,
            stale_after: Duration::from_secs(86_400),
            retry: RetryPolicy::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn cost_policy(mut self, policy: Arc<dyn CostPolicy>) -> Self {
        self.cost_policy = policy;
        self
    }

    /// Persist ledgers through `store`. Requires `build` to run inside a
    /// tokio runtime.
    pub fn store(mut self, store: Arc<dyn LedgerStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Reconcile with and push to a remote source of truth. Requires `build`
    /// to run inside a tokio runtime.
    pub fn sync(mut self, sync: Arc<dyn RemoteSync>) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn idempotency_window(mut self, keys: usize) -> Self {
        self.idempotency_window = keys;
        self
    }

    pub fn stale_after(mut self, after: Duration) -> Self {
        self.stale_after = after;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Assemble the service, spawning the write-behind task when a store or
    /// remote sync is configured.
    pub fn build(self) -> EconomyService {
        let (events, _) = broadcast::channel(self.event_capacity);
        let persister = if self.store.is_some() || self.sync.is_some() {
            Some(Persister::spawn(
                self.store.clone(),
                self.sync.clone(),
                self.retry,
                events.clone(),
            ))
        } else {
            None
        };

        EconomyService {
            catalog: ArcSwap::from_pointee(self.catalog),
            engine: EnforcementEngine::new(self.cost_policy),
            clock: self.clock,
            store: self.store,
            sync: self.sync,
            ledgers: DashMap::new(),
            unloaded: DashMap::new(),
            events,
            persister: Mutex::new(persister),
            idempotency_window: self.idempotency_window,
            stale_after: self.stale_after,
        }
    }
}

/// Per-process economy facade. Cheap to share behind an `Arc`.
pub struct EconomyService {
    catalog: ArcSwap<TierCatalog>,
    engine: EnforcementEngine,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn LedgerStore>>,
    sync: Option<Arc<dyn RemoteSync>>,
    ledgers: DashMap<UserId, Arc<QuotaLedger>>,
    /// Users opened while the store could not be read. Their ledgers are
    /// kept out of the store until a load succeeds; the flag records whether
    /// the in-memory tier came from identity rather than the default.
    unloaded: DashMap<UserId, bool>,
    events: broadcast::Sender<LedgerEvent>,
    persister: Mutex<Option<Persister>>,
    idempotency_window: usize,
    stale_after: Duration,
}

impl EconomyService {
    pub fn builder(catalog: TierCatalog) -> EconomyServiceBuilder {
        EconomyServiceBuilder::new(catalog)
    }

    /// A builder preloaded with the catalog, flat costs, idempotency window,
    /// staleness threshold and retry policy from `config`.
    pub fn from_config(config: &CardwiseConfig) -> Result<EconomyServiceBuilder, CardwiseError> {
        let catalog = TierCatalog::from_config(&config.economy)?;
        Ok(Self::builder(catalog)
            .cost_policy(Arc::new(FlatCostPolicy::from_config(&config.cost)))
            .idempotency_window(config.economy.idempotency_window)
            .stale_after(Duration::from_secs(config.economy.stale_after_secs))
            .retry_policy(RetryPolicy::from_config(&config.persistence)))
    }

    /// Load (or create) a user's ledger and keep it resident.
    ///
    /// `tier` is the tier identity reports for the user; when it differs
    /// from the stored one it is applied as a tier change.
    ///
    /// A store failure degrades to a fresh in-memory record marked as never
    /// synced. That record is not saved until the stored one can be read
    /// and merged with it; opening the user again retries the load.
    pub async fn open_user(
        &self,
        user_id: UserId,
        tier: Option<TierId>,
    ) -> Result<UserEconomy, CardwiseError> {
        if self.ledgers.contains_key(&user_id) {
            if self.unloaded.contains_key(&user_id) {
                self.recover_user(&user_id).await?;
            }
            if let Some(tier) = tier {
                self.change_tier(&user_id, &tier)?;
            }
            return self.snapshot(&user_id);
        }

        let catalog = self.catalog.load_full();
        if let Some(tier) = &tier {
            catalog.lookup(tier).inspect_err(|e| log_hard_error(&user_id, e))?;
        }
        let now = self.clock.now();

        let (economy, created, unloaded) = match self.load(&user_id).await {
            Ok(Some(stored)) => (stored, false, false),
            Ok(None) => {
                let tier_id = tier.clone().unwrap_or_else(|| catalog.default_tier().id.clone());
                (UserEconomy::new(user_id.clone(), tier_id, now), true, false)
            }
            Err(e @ CardwiseError::CorruptLedger(_)) => {
                log_hard_error(&user_id, &e);
                return Err(e);
            }
            Err(e) => {
                let e = CardwiseError::PersistenceUnavailable { source: Box::new(e) };
                warn!(user_id = %user_id, error = %e, "continuing with an in-memory ledger");
                let tier_id = tier.clone().unwrap_or_else(|| catalog.default_tier().id.clone());
                let mut fresh = UserEconomy::new(user_id.clone(), tier_id, now);
                fresh.last_synced_at = DateTime::<Utc>::UNIX_EPOCH;
                (fresh, false, true)
            }
        };

        let ledger = match self.ledgers.entry(user_id.clone()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                if unloaded {
                    self.unloaded.insert(user_id.clone(), tier.is_some());
                }
                let ledger = Arc::new(QuotaLedger::new(economy, self.idempotency_window));
                entry.insert(ledger.clone());
                ledger
            }
        };

        if created {
            info!(user_id = %user_id, tier_id = %ledger.snapshot().tier_id, "created user ledger");
            self.persist(&ledger);
        }
        if let Some(tier) = tier {
            self.change_tier(&user_id, &tier)?;
        }
        self.snapshot(&user_id)
    }

    async fn load(&self, user_id: &UserId) -> Result<Option<UserEconomy>, CardwiseError> {
        let stored = match &self.store {
            Some(store) => store.load(user_id).await?,
            None => return Ok(None),
        };
        match stored {
            Some(stored) if &stored.user_id != user_id => Err(CardwiseError::CorruptLedger(format!(
                "record for `{user_id}` is keyed as `{}`",
                stored.user_id
            ))),
            stored => Ok(stored),
        }
    }

    /// Retry the store load for a user opened while the store was
    /// unreadable, and fold the in-memory usage into the stored record.
    ///
    /// Returns `true` once the ledger is backed by the store again (always
    /// the case for users that loaded normally) and `false` if the store is
    /// still unreadable. Saves resume only after a successful merge.
    pub async fn recover_user(&self, user_id: &UserId) -> Result<bool, CardwiseError> {
        if !self.unloaded.contains_key(user_id) {
            return Ok(true);
        }
        let ledger = self.ledger(user_id)?;

        let stored = match self.load(user_id).await {
            Ok(stored) => stored,
            Err(e @ CardwiseError::CorruptLedger(_)) => {
                log_hard_error(user_id, &e);
                return Err(e);
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "store still unreadable, holding writes");
                return Ok(false);
            }
        };

        let catalog = self.catalog.load_full();
        let resets = {
            let mut guard = ledger.lock()?;
            // A concurrent recovery may have finished while we were loading.
            let Some((_, tier_from_identity)) = self.unloaded.remove(user_id) else {
                return Ok(true);
            };
            match stored {
                Some(stored) => {
                    let in_memory = guard.economy().clone();
                    guard.overwrite(stored);
                    let now = self.clock.now();
                    let resets = match PeriodResetScheduler::apply_locked(&mut guard, &catalog, now) {
                        Ok(resets) => resets,
                        Err(e) => {
                            guard.overwrite(in_memory);
                            self.unloaded.insert(user_id.clone(), tier_from_identity);
                            log_hard_error(user_id, &e);
                            return Err(e);
                        }
                    };
                    let tier_id = if tier_from_identity {
                        in_memory.tier_id.clone()
                    } else {
                        guard.economy().tier_id.clone()
                    };
                    let tier = match catalog.lookup(&tier_id) {
                        Ok(tier) => tier,
                        Err(e) => {
                            guard.overwrite(in_memory);
                            self.unloaded.insert(user_id.clone(), tier_from_identity);
                            log_hard_error(user_id, &e);
                            return Err(e);
                        }
                    };
                    let merged = merge_recovered(guard.economy(), &in_memory, tier_id, tier);
                    guard.overwrite(merged);
                    resets
                }
                None => Vec::new(),
            }
        };

        info!(user_id = %user_id, "store readable again, merged in-memory usage");
        self.announce_resets(resets);
        self.persist(&ledger);
        Ok(true)
    }

    fn ledger(&self, user_id: &UserId) -> Result<Arc<QuotaLedger>, CardwiseError> {
        self.ledgers
            .get(user_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CardwiseError::UnknownUser {
                user_id: user_id.0.clone(),
            })
    }

    /// Whether `user_id` has been opened in this process.
    pub fn is_open(&self, user_id: &UserId) -> bool {
        self.ledgers.contains_key(user_id)
    }

    /// Run the period-reset check and announce anything it did.
    fn roll_over(&self, ledger: &QuotaLedger, catalog: &TierCatalog) -> Result<(), CardwiseError> {
        let resets = PeriodResetScheduler::apply(ledger, catalog, self.clock.now())
            .inspect_err(|e| log_hard_error(ledger.user_id(), e))?;
        if !resets.is_empty() {
            self.announce_resets(resets);
            self.persist(ledger);
        }
        Ok(())
    }

    fn announce_resets(&self, resets: Vec<PeriodReset>) {
        for reset in resets {
            self.emit(LedgerEvent::PeriodReset {
                user_id: reset.user_id,
                period_start: reset.period_start,
                rollover_credits: reset.rollover_credits,
            });
        }
    }

    fn emit(&self, event: LedgerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn persist(&self, ledger: &QuotaLedger) {
        if self.unloaded.contains_key(ledger.user_id()) {
            debug!(user_id = %ledger.user_id(), "stored record not loaded yet, save deferred");
            return;
        }
        let persister = self.persister.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(persister) = persister.as_ref() {
            persister.enqueue(ledger.versioned_snapshot());
        }
    }

    /// The user's current record, after any due period reset.
    pub fn snapshot(&self, user_id: &UserId) -> Result<UserEconomy, CardwiseError> {
        let ledger = self.ledger(user_id)?;
        self.roll_over(&ledger, &self.catalog.load())?;
        Ok(ledger.snapshot())
    }

    /// The snapshot together with the tier it is judged under.
    fn view(&self, user_id: &UserId) -> Result<(UserEconomy, Tier, bool), CardwiseError> {
        let catalog = self.catalog.load_full();
        let ledger = self.ledger(user_id)?;
        self.roll_over(&ledger, &catalog)?;
        let economy = ledger.snapshot();
        let tier = catalog
            .lookup(&economy.tier_id)
            .inspect_err(|e| log_hard_error(user_id, e))?
            .clone();
        let upgrade_available = !catalog.is_top_tier(&tier.id);
        Ok((economy, tier, upgrade_available))
    }

    pub fn current_tier(&self, user_id: &UserId) -> Result<Tier, CardwiseError> {
        self.view(user_id).map(|(_, tier, _)| tier)
    }

    pub fn credits_remaining(&self, user_id: &UserId) -> Result<u32, CardwiseError> {
        let (economy, tier, _) = self.view(user_id)?;
        Ok(economy.credits_remaining(&tier))
    }

    pub fn exports_remaining(&self, user_id: &UserId) -> Result<u32, CardwiseError> {
        let (economy, tier, _) = self.view(user_id)?;
        Ok(economy.exports_remaining(&tier))
    }

    /// Always true on unmetered tiers.
    pub fn has_credits(&self, user_id: &UserId) -> Result<bool, CardwiseError> {
        let (economy, tier, _) = self.view(user_id)?;
        Ok(!tier.metered || economy.credits_remaining(&tier) > 0)
    }

    /// Estimate a generation without charging anything.
    pub fn can_generate_content(
        &self,
        user_id: &UserId,
        request: &GenerationRequest,
    ) -> Result<EnforcementResult, CardwiseError> {
        let (economy, tier, upgrade) = self.view(user_id)?;
        let verdict = self
            .engine
            .evaluate_generation(&economy, &tier, request, upgrade);
        debug!(
            user_id = %user_id,
            tier_id = %tier.id,
            cost = verdict.cost,
            can_proceed = verdict.can_proceed,
            "evaluated generation"
        );
        Ok(verdict)
    }

    /// Charge a generation. Safe to retry with the same key.
    pub fn confirm_generation(
        &self,
        user_id: &UserId,
        request: &GenerationRequest,
        key: &IdempotencyKey,
    ) -> Result<CommitOutcome, CardwiseError> {
        self.confirm(user_id, &Action::Generation(request.clone()), key)
    }

    /// Estimate an export without charging anything.
    pub fn can_export_content(
        &self,
        user_id: &UserId,
        request: &ExportRequest,
    ) -> Result<EnforcementResult, CardwiseError> {
        let (economy, tier, upgrade) = self.view(user_id)?;
        let verdict = self
            .engine
            .evaluate_export(&economy, &tier, request, upgrade);
        debug!(
            user_id = %user_id,
            tier_id = %tier.id,
            set_id = %request.set_id,
            kind = %request.kind,
            can_proceed = verdict.can_proceed,
            "evaluated export"
        );
        Ok(verdict)
    }

    /// Charge an export. Safe to retry with the same key.
    pub fn confirm_export(
        &self,
        user_id: &UserId,
        request: &ExportRequest,
        key: &IdempotencyKey,
    ) -> Result<CommitOutcome, CardwiseError> {
        self.confirm(user_id, &Action::Export(request.clone()), key)
    }

    fn confirm(
        &self,
        user_id: &UserId,
        action: &Action,
        key: &IdempotencyKey,
    ) -> Result<CommitOutcome, CardwiseError> {
        let catalog = self.catalog.load_full();
        let ledger = self.ledger(user_id)?;
        self.roll_over(&ledger, &catalog)?;

        let mut expected = Some(ledger.version());
        loop {
            let tx = ConsumptionTransaction::new(&catalog, &self.engine, self.clock.now());
            match tx.commit(&ledger, action, key, expected) {
                Ok(committed) => {
                    let had_resets = !committed.resets.is_empty();
                    self.announce_resets(committed.resets);
                    let receipt = committed.receipt;
                    if committed.replayed {
                        if had_resets {
                            self.persist(&ledger);
                        }
                    } else {
                        info!(
                            user_id = %user_id,
                            kind = %receipt.kind,
                            cost = receipt.cost,
                            key = %key,
                            credits_remaining = receipt.credits_remaining,
                            exports_remaining = receipt.exports_remaining,
                            "committed consumption"
                        );
                        self.emit(LedgerEvent::Committed {
                            receipt: receipt.clone(),
                        });
                        self.persist(&ledger);
                    }
                    return Ok(CommitOutcome::Committed(receipt));
                }
                Err(CardwiseError::StaleSnapshot { expected: seen, actual }) if expected.is_some() => {
                    warn!(
                        user_id = %user_id,
                        key = %key,
                        expected = seen,
                        actual,
                        "ledger moved during confirmation, re-checking"
                    );
                    expected = None;
                }
                Err(e) if e.is_exhaustion() => {
                    let upgrade = !catalog.is_top_tier(&ledger.snapshot().tier_id);
                    let cost = self.engine.cost(action);
                    let (kind, reason) = match action.kind() {
                        ActionKind::Generation => (DenialKind::InsufficientBalance, INSUFFICIENT_CREDITS),
                        ActionKind::Export => (DenialKind::QuotaExhausted, EXPORT_LIMIT_REACHED),
                    };
                    debug!(user_id = %user_id, key = %key, error = %e, "confirmation denied");
                    return Ok(CommitOutcome::Denied {
                        kind,
                        verdict: EnforcementResult::deny(cost, reason, upgrade),
                    });
                }
                Err(e) => {
                    log_hard_error(user_id, &e);
                    return Err(e);
                }
            }
        }
    }

    /// Apply a tier change pushed by identity. Usage counters are kept; the
    /// remaining balances are judged under the new tier from now on.
    pub fn change_tier(&self, user_id: &UserId, tier_id: &TierId) -> Result<UserEconomy, CardwiseError> {
        let catalog = self.catalog.load_full();
        let tier = catalog
            .lookup(tier_id)
            .inspect_err(|e| log_hard_error(user_id, e))?;
        let ledger = self.ledger(user_id)?;
        // Close any finished period under the old tier's rollover policy.
        self.roll_over(&ledger, &catalog)?;

        let from = {
            let mut guard = ledger.lock()?;
            let from = guard.economy().tier_id.clone();
            if from == tier.id {
                return Ok(guard.economy().clone());
            }
            guard.set_tier(tier);
            if let Some(mut from_identity) = self.unloaded.get_mut(user_id) {
                *from_identity = true;
            }
            from
        };

        info!(user_id = %user_id, from = %from, to = %tier.id, "tier changed");
        self.emit(LedgerEvent::TierChanged {
            user_id: user_id.clone(),
            from,
            to: tier.id.clone(),
        });
        self.persist(&ledger);
        Ok(ledger.snapshot())
    }

    /// Merge a server-authoritative record, keeping the more conservative
    /// balance on each dimension.
    pub fn reconcile(&self, user_id: &UserId, remote: &UserEconomy) -> Result<UserEconomy, CardwiseError> {
        if &remote.user_id != user_id {
            return Err(CardwiseError::Sync {
                message: format!(
                    "remote record for `{}` offered to `{user_id}`",
                    remote.user_id
                ),
            });
        }

        let catalog = self.catalog.load_full();
        let ledger = self.ledger(user_id)?;
        self.roll_over(&ledger, &catalog)?;
        let now = self.clock.now();

        let resets = {
            let mut guard = ledger.lock()?;
            let tier = catalog
                .lookup(&guard.economy().tier_id)
                .inspect_err(|e| log_hard_error(user_id, e))?;
            let merged = reconcile_records(guard.economy(), remote, tier, now);
            guard.overwrite(merged);
            PeriodResetScheduler::apply_locked(&mut guard, &catalog, now)?
        };

        info!(user_id = %user_id, "reconciled with remote record");
        self.emit(LedgerEvent::Reconciled {
            user_id: user_id.clone(),
        });
        self.announce_resets(resets);
        self.persist(&ledger);
        Ok(ledger.snapshot())
    }

    /// Pull the remote record for `user_id` and reconcile with it.
    ///
    /// Without a remote sync collaborator this is a no-op returning the
    /// local record. When the remote has no record yet the local one is
    /// marked synced and pushed on the next save.
    pub async fn sync_user(&self, user_id: &UserId) -> Result<UserEconomy, CardwiseError> {
        self.recover_user(user_id).await?;
        let Some(sync) = &self.sync else {
            debug!(user_id = %user_id, "no remote sync configured");
            return self.snapshot(user_id);
        };
        let local = self.snapshot(user_id)?;

        let remote = match sync.fetch(user_id).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "remote sync fetch failed");
                self.emit(LedgerEvent::SyncFailed {
                    user_id: user_id.clone(),
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        self.reconcile(user_id, &remote.unwrap_or(local))
    }

    /// Whether the user's last reconciliation is older than the staleness
    /// threshold.
    pub fn needs_sync(&self, user_id: &UserId) -> Result<bool, CardwiseError> {
        let economy = self.ledger(user_id)?.snapshot();
        let elapsed = self.clock.now().signed_duration_since(economy.last_synced_at);
        Ok(elapsed.to_std().is_ok_and(|elapsed| elapsed >= self.stale_after))
    }

    /// Swap in a new tier catalog. Decisions already in flight finish
    /// against the catalog they started with.
    pub fn replace_catalog(&self, catalog: TierCatalog) {
        for entry in self.ledgers.iter() {
            let tier_id = entry.value().snapshot().tier_id;
            if catalog.lookup(&tier_id).is_err() {
                warn!(user_id = %entry.key(), tier_id = %tier_id, "user's tier is missing from the new catalog");
            }
        }
        info!(tiers = catalog.tiers().len(), "tier catalog replaced");
        self.catalog.store(Arc::new(catalog));
    }

    /// The catalog currently in force.
    pub fn catalog(&self) -> Arc<TierCatalog> {
        self.catalog.load_full()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    /// Stop the write-behind task after giving pending saves a final try.
    ///
    /// Users whose stored record was never loaded get one more load attempt
    /// first; if the store is still unreadable their in-memory usage is
    /// dropped rather than written over the stored record.
    pub async fn shutdown(&self) {
        let unloaded: Vec<UserId> = self.unloaded.iter().map(|e| e.key().clone()).collect();
        for user_id in unloaded {
            match self.recover_user(&user_id).await {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    warn!(user_id = %user_id, "in-memory usage not persisted, stored record was never loaded");
                }
            }
        }

        let persister = self
            .persister
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(persister) = persister {
            persister.shutdown().await;
            info!("economy service shut down");
        }
    }
}

impl std::fmt::Debug for EconomyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EconomyService")
            .field("users", &self.ledgers.len())
            .field("has_store", &self.store.is_some())
            .field("has_sync", &self.sync.is_some())
            .finish_non_exhaustive()
    }
}

fn log_hard_error(user_id: &UserId, e: &CardwiseError) {
    if matches!(
        e,
        CardwiseError::UnknownTier { .. } | CardwiseError::CorruptLedger(_)
    ) {
        error!(user_id = %user_id, error = %e, "economy configuration or data defect");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 3, 9, 0, 0).unwrap()
    }

    fn service(clock: Arc<ManualClock>) -> EconomyService {
        EconomyService::builder(TierCatalog::default())
            .clock(clock)
            .build()
    }

    #[tokio::test]
    async fn open_user_creates_default_tier_record() {
        let svc = service(Arc::new(ManualClock::new(start())));
        let economy = svc.open_user("u1".into(), None).await.unwrap();
        assert_eq!(economy.tier_id, TierId::from("free"));
        assert_eq!(economy.period_start, start());
        assert_eq!(svc.credits_remaining(&"u1".into()).unwrap(), 5);
        assert_eq!(svc.exports_remaining(&"u1".into()).unwrap(), 5);
    }

    #[tokio::test]
    async fn open_user_rejects_unknown_tier() {
        let svc = service(Arc::new(ManualClock::new(start())));
        let err = svc
            .open_user("u1".into(), Some("platinum".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, CardwiseError::UnknownTier { .. }));
        assert!(!svc.is_open(&"u1".into()));
    }

    #[test]
    fn unopened_user_is_unknown() {
        let svc = service(Arc::new(ManualClock::new(start())));
        let err = svc.credits_remaining(&"ghost".into()).unwrap_err();
        assert!(matches!(err, CardwiseError::UnknownUser { user_id } if user_id == "ghost"));
    }

    #[tokio::test]
    async fn confirm_then_deny_generation() {
        let svc = service(Arc::new(ManualClock::new(start())));
        let user: UserId = "u1".into();
        svc.open_user(user.clone(), None).await.unwrap();

        for i in 0..5 {
            let outcome = svc
                .confirm_generation(&user, &GenerationRequest::default(), &format!("g{i}").as_str().into())
                .unwrap();
            assert!(outcome.is_committed());
        }
        let outcome = svc
            .confirm_generation(&user, &GenerationRequest::default(), &"g5".into())
            .unwrap();
        match outcome {
            CommitOutcome::Denied { kind, verdict } => {
                assert_eq!(kind, DenialKind::InsufficientBalance);
                assert_eq!(verdict.block_reason.as_deref(), Some(INSUFFICIENT_CREDITS));
                assert!(verdict.suggest_upgrade);
            }
            other => panic!("expected denial, got {other:?}"),
        }
        assert!(!svc.has_credits(&user).unwrap());
    }

    #[tokio::test]
    async fn tier_change_keeps_usage() {
        let svc = service(Arc::new(ManualClock::new(start())));
        let user: UserId = "u1".into();
        svc.open_user(user.clone(), None).await.unwrap();
        svc.confirm_generation(&user, &GenerationRequest::default(), &"g1".into())
            .unwrap();

        let economy = svc.change_tier(&user, &"pro".into()).unwrap();
        assert_eq!(economy.credits_used_this_month, 1);
        assert_eq!(svc.credits_remaining(&user).unwrap(), 99);
        assert_eq!(svc.current_tier(&user).unwrap().id, TierId::from("pro"));
    }

    #[tokio::test]
    async fn needs_sync_after_threshold() {
        let clock = Arc::new(ManualClock::new(start()));
        let svc = EconomyService::builder(TierCatalog::default())
            .clock(clock.clone())
            .stale_after(Duration::from_secs(3600))
            .build();
        let user: UserId = "u1".into();
        svc.open_user(user.clone(), None).await.unwrap();

        assert!(!svc.needs_sync(&user).unwrap());
        clock.advance(chrono::Duration::hours(2));
        assert!(svc.needs_sync(&user).unwrap());

        svc.sync_user(&user).await.unwrap();
        // No remote configured: nothing to reconcile with, still stale.
        assert!(svc.needs_sync(&user).unwrap());
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn commits_and_tier_changes_are_logged() {
        let svc = service(Arc::new(ManualClock::new(start())));
        let user: UserId = "u1".into();
        svc.open_user(user.clone(), None).await.unwrap();
        svc.confirm_generation(&user, &GenerationRequest::default(), &"g1".into())
            .unwrap();
        svc.change_tier(&user, &"pro".into()).unwrap();

        assert!(logs_contain("committed consumption"));
        assert!(logs_contain("tier changed"));
    }

    #[test]
    fn from_config_applies_costs_and_tiers() {
        let mut config = CardwiseConfig::default();
        config.cost.generation_credits = 2;
        let svc = EconomyService::from_config(&config).unwrap().build();
        assert_eq!(svc.catalog().tiers().len(), 3);
        assert_eq!(
            svc.engine
                .cost(&Action::Generation(GenerationRequest::default())),
            2
        );
    }

    #[tokio::test]
    async fn replaced_catalog_applies_to_later_decisions() {
        let svc = service(Arc::new(ManualClock::new(start())));
        let user: UserId = "u1".into();
        svc.open_user(user.clone(), None).await.unwrap();
        svc.confirm_generation(&user, &GenerationRequest::default(), &"g1".into())
            .unwrap();

        let free = Tier {
            id: "free".into(),
            display_name: "Free".into(),
            monthly_generation_quota: 10,
            monthly_export_quota: 2,
            rollover_cap_fraction: 0.0,
            metered: true,
        };
        svc.replace_catalog(TierCatalog::new(vec![free], "free".into()).unwrap());

        assert_eq!(svc.credits_remaining(&user).unwrap(), 9);
        assert_eq!(svc.exports_remaining(&user).unwrap(), 2);
        assert!(svc.catalog().is_top_tier(&"free".into()));
        let verdict = svc
            .can_export_content(
                &user,
                &ExportRequest {
                    set_id: "s".into(),
                    kind: Default::default(),
                    include_branding: false,
                },
            )
            .unwrap();
        assert!(verdict.can_proceed);
    }

    #[tokio::test]
    async fn reconcile_with_a_later_anchor_in_the_same_month_adds_nothing() {
        let march_10 = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap();
        let svc = service(Arc::new(ManualClock::new(march_10)));
        let user: UserId = "u1".into();
        svc.open_user(user.clone(), None).await.unwrap();
        for i in 0..5 {
            svc.confirm_generation(&user, &GenerationRequest::default(), &format!("g{i}").as_str().into())
                .unwrap();
        }
        assert_eq!(svc.credits_remaining(&user).unwrap(), 0);

        let march_12 = Utc.with_ymd_and_hms(2026, 3, 12, 9, 0, 0).unwrap();
        let mut remote = UserEconomy::new(user.clone(), "free".into(), march_12);
        remote.rollover_credits = 1000;
        let merged = svc.reconcile(&user, &remote).unwrap();

        assert_eq!(merged.period_start, march_10);
        assert_eq!(svc.credits_remaining(&user).unwrap(), 0);
        assert!(!svc.has_credits(&user).unwrap());
    }
}
