// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Token economy and quota enforcement for Cardwise.
//!
//! This crate provides:
//! - **Tier catalog**: immutable subscription tiers and their quota policy
//! - **Quota ledger**: per-user accounting with a single critical section and lock-free snapshots
//! - **Enforcement engine**: pure allow/deny decisions with a replaceable cost policy
//! - **Consumption transaction**: atomic, idempotent check-then-deduct
//! - **Period reset**: calendar-month rollover with capped carry-over credits
//! - **Economy service**: the application facade, write-behind persistence, remote reconciliation, and change events

pub mod catalog;
pub mod clock;
pub mod engine;
pub mod events;
mod idempotency;
pub mod ledger;
pub mod persister;
pub mod reconcile;
pub mod request;
pub mod reset;
pub mod service;
pub mod transaction;

pub use catalog::TierCatalog;
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{CostPolicy, EnforcementEngine, EnforcementResult, FlatCostPolicy};
pub use events::LedgerEvent;
pub use ledger::{LedgerSnapshot, QuotaLedger};
pub use persister::RetryPolicy;
pub use reconcile::{merge_recovered, reconcile_records};
pub use request::{Action, ActionKind, ExportKind, ExportRequest, GenerationRequest};
pub use reset::{PeriodReset, PeriodResetScheduler};
pub use service::{CommitOutcome, DenialKind, EconomyService, EconomyServiceBuilder};
pub use transaction::{CommitReceipt, Committed, ConsumptionTransaction};
