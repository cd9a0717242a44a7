// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared by the economy engine and its collaborators.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Unique identifier for an account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

/// Identifier of a subscription tier in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TierId(pub String);

/// Caller-supplied token that makes a confirmation safe to retry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for TierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for TierId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for IdempotencyKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A subscription plan and its quota policy. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    pub id: TierId,
    pub display_name: String,
    /// Credits granted per monthly period.
    pub monthly_generation_quota: u32,
    /// Export events allowed per monthly period.
    pub monthly_export_quota: u32,
    /// Share of the monthly quota that may carry into the next period (0.0..=1.0).
    pub rollover_cap_fraction: f64,
    /// `false` for tiers with unlimited generation.
    pub metered: bool,
}

impl Tier {
    /// Maximum rollover credits: `floor(quota * fraction)`.
    pub fn rollover_cap(&self) -> u32 {
        let fraction = self.rollover_cap_fraction.clamp(0.0, 1.0);
        // Nudge past representation error so 100 * 0.29 floors to 29.
        let cap = (f64::from(self.monthly_generation_quota) * fraction + 1e-9).floor();
        (cap as u32).min(self.monthly_generation_quota)
    }
}

/// The per-user accounting record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEconomy {
    pub user_id: UserId,
    pub tier_id: TierId,
    /// Start of the current monthly cycle.
    pub period_start: DateTime<Utc>,
    pub credits_used_this_month: u32,
    /// Credits carried over from the previous period.
    pub rollover_credits: u32,
    pub exports_used_this_month: u32,
    /// Last reconciliation with the remote source of truth.
    pub last_synced_at: DateTime<Utc>,
}

impl UserEconomy {
    /// A first-login record: the period starts now, nothing used, nothing carried.
    pub fn new(user_id: UserId, tier_id: TierId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            tier_id,
            period_start: now,
            credits_used_this_month: 0,
            rollover_credits: 0,
            exports_used_this_month: 0,
            last_synced_at: now,
        }
    }

    /// Credits available this period: quota plus rollover.
    pub fn credit_capacity(&self, tier: &Tier) -> u32 {
        tier.monthly_generation_quota
            .saturating_add(self.rollover_credits)
    }

    /// `max(0, quota + rollover - used)`.
    pub fn credits_remaining(&self, tier: &Tier) -> u32 {
        self.credit_capacity(tier)
            .saturating_sub(self.credits_used_this_month)
    }

    /// `max(0, export quota - used)`.
    pub fn exports_remaining(&self, tier: &Tier) -> u32 {
        tier.monthly_export_quota
            .saturating_sub(self.exports_used_this_month)
    }
}

/// Health status reported by collaborator health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Collaborator is fully operational.
    Healthy,
    /// Collaborator is operational but experiencing issues.
    Degraded(String),
    /// Collaborator is not operational.
    Unhealthy(String),
}

/// Identifies the kind of collaborator behind an adapter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Storage,
    RemoteSync,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(quota: u32, exports: u32, fraction: f64) -> Tier {
        Tier {
            id: TierId::from("free"),
            display_name: "Free".into(),
            monthly_generation_quota: quota,
            monthly_export_quota: exports,
            rollover_cap_fraction: fraction,
            metered: true,
        }
    }

    #[test]
    fn rollover_cap_floors_fraction_of_quota() {
        assert_eq!(tier(5, 5, 0.4).rollover_cap(), 2);
        assert_eq!(tier(5, 5, 0.5).rollover_cap(), 2);
        assert_eq!(tier(100, 5, 0.29).rollover_cap(), 29);
        assert_eq!(tier(5, 5, 0.0).rollover_cap(), 0);
        assert_eq!(tier(5, 5, 1.0).rollover_cap(), 5);
    }

    #[test]
    fn fresh_record_has_full_balance() {
        let now = Utc::now();
        let econ = UserEconomy::new("u1".into(), "free".into(), now);
        let t = tier(5, 5, 0.4);
        assert_eq!(econ.credits_remaining(&t), 5);
        assert_eq!(econ.exports_remaining(&t), 5);
        assert_eq!(econ.period_start, now);
    }

    #[test]
    fn remaining_saturates_at_zero() {
        let mut econ = UserEconomy::new("u1".into(), "free".into(), Utc::now());
        econ.credits_used_this_month = 9;
        econ.exports_used_this_month = 7;
        let t = tier(5, 5, 0.4);
        assert_eq!(econ.credits_remaining(&t), 0);
        assert_eq!(econ.exports_remaining(&t), 0);
    }

    #[test]
    fn rollover_adds_to_capacity() {
        let mut econ = UserEconomy::new("u1".into(), "free".into(), Utc::now());
        econ.rollover_credits = 2;
        econ.credits_used_this_month = 6;
        assert_eq!(econ.credits_remaining(&tier(5, 5, 0.4)), 1);
    }

    #[test]
    fn user_economy_serde_round_trip() {
        let econ = UserEconomy::new("u1".into(), "pro".into(), Utc::now());
        let json = serde_json::to_string(&econ).expect("should serialize");
        let parsed: UserEconomy = serde_json::from_str(&json).expect("should deserialize");
        assert_eq!(econ, parsed);
    }
}
