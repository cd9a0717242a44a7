// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stateless enforcement decisions.
//!
//! The engine turns a ledger snapshot, a tier, and a request into an
//! [`EnforcementResult`]. It never mutates anything, so callers can show a
//! cost estimate and then decide whether to confirm.

use std::sync::Arc;

use cardwise_config::model::CostConfig;
use cardwise_core::{Tier, UserEconomy};
use serde::{Deserialize, Serialize};

use crate::request::{Action, ExportRequest, GenerationRequest};

/// Reason shown when a generation is refused.
pub const INSUFFICIENT_CREDITS: &str = "Insufficient credits";

/// Reason shown when an export is refused.
pub const EXPORT_LIMIT_REACHED: &str = "Monthly export limit reached";

/// The verdict returned before an action is allowed to proceed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcementResult {
    pub can_proceed: bool,
    /// Credits or export units the action consumes.
    pub cost: u32,
    /// Human-readable reason when `can_proceed` is false.
    pub block_reason: Option<String>,
    pub suggest_upgrade: bool,
}

impl EnforcementResult {
    pub fn allow(cost: u32) -> Self {
        Self {
            can_proceed: true,
            cost,
            block_reason: None,
            suggest_upgrade: false,
        }
    }

    pub fn deny(cost: u32, reason: &str, suggest_upgrade: bool) -> Self {
        Self {
            can_proceed: false,
            cost,
            block_reason: Some(reason.to_string()),
            suggest_upgrade,
        }
    }
}

/// Prices actions. Swappable so volume-based pricing can replace the flat
/// policy without changing the evaluate/commit contract.
pub trait CostPolicy: Send + Sync {
    /// Credits charged for a generation on a metered tier.
    fn generation_cost(&self, request: &GenerationRequest) -> u32;

    /// Export units charged for an export.
    fn export_cost(&self, request: &ExportRequest) -> u32;
}

/// Charges the same amount for every action regardless of volume or kind.
///
/// Export quota counts export events, so a `Both` export still costs one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatCostPolicy {
    pub generation_credits: u32,
    pub export_units: u32,
}

impl FlatCostPolicy {
    pub fn from_config(config: &CostConfig) -> Self {
        Self {
            generation_credits: config.generation_credits,
            export_units: config.export_units,
        }
    }
}

impl Default for FlatCostPolicy {
    fn default() -> Self {
        Self {
            generation_credits: 1,
            export_units: 1,
        }
    }
}

impl CostPolicy for FlatCostPolicy {
    fn generation_cost(&self, _request: &GenerationRequest) -> u32 {
        self.generation_credits
    }

    fn export_cost(&self, _request: &ExportRequest) -> u32 {
        self.export_units
    }
}

/// Pure decision logic over ledger snapshots.
#[derive(Clone)]
pub struct EnforcementEngine {
    cost_policy: Arc<dyn CostPolicy>,
}

impl EnforcementEngine {
    pub fn new(cost_policy: Arc<dyn CostPolicy>) -> Self {
        Self { cost_policy }
    }

    /// Decide whether a generation may proceed.
    ///
    /// Unmetered tiers always proceed at zero cost regardless of stored usage.
    /// `upgrade_available` is false when the user is already on the top tier.
    pub fn evaluate_generation(
        &self,
        snapshot: &UserEconomy,
        tier: &Tier,
        request: &GenerationRequest,
        upgrade_available: bool,
    ) -> EnforcementResult {
        if !tier.metered {
            return EnforcementResult::allow(0);
        }

        let cost = self.cost_policy.generation_cost(request);
        if snapshot.credits_remaining(tier) >= cost {
            EnforcementResult::allow(cost)
        } else {
            EnforcementResult::deny(cost, INSUFFICIENT_CREDITS, upgrade_available)
        }
    }

    /// Decide whether an export may proceed. Cost does not depend on the
    /// export kind.
    pub fn evaluate_export(
        &self,
        snapshot: &UserEconomy,
        tier: &Tier,
        request: &ExportRequest,
        upgrade_available: bool,
    ) -> EnforcementResult {
        let cost = self.cost_policy.export_cost(request);
        let remaining = snapshot.exports_remaining(tier);
        if remaining > 0 && remaining >= cost {
            EnforcementResult::allow(cost)
        } else {
            EnforcementResult::deny(cost, EXPORT_LIMIT_REACHED, upgrade_available)
        }
    }

    /// The policy price of `action`, ignoring tier metering.
    pub fn cost(&self, action: &Action) -> u32 {
        match action {
            Action::Generation(request) => self.cost_policy.generation_cost(request),
            Action::Export(request) => self.cost_policy.export_cost(request),
        }
    }

    /// Dispatch on the action kind.
    pub fn evaluate(
        &self,
        action: &Action,
        snapshot: &UserEconomy,
        tier: &Tier,
        upgrade_available: bool,
    ) -> EnforcementResult {
        match action {
            Action::Generation(request) => {
                self.evaluate_generation(snapshot, tier, request, upgrade_available)
            }
            Action::Export(request) => {
                self.evaluate_export(snapshot, tier, request, upgrade_available)
            }
        }
    }
}

impl Default for EnforcementEngine {
    fn default() -> Self {
        Self::new(Arc::new(FlatCostPolicy::default()))
    }
}

impl std::fmt::Debug for EnforcementEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnforcementEngine").finish_non_exhaustive()
    }
}
