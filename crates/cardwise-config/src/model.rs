// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Cardwise token economy.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level Cardwise configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CardwiseConfig {
    /// Process-level settings.
    #[serde(default)]
    pub app: AppConfig,

    /// Tier table and per-user economy settings.
    #[serde(default)]
    pub economy: EconomyConfig,

    /// Flat cost policy settings.
    #[serde(default)]
    pub cost: CostConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Write-behind persistence retry settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Process-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Economy configuration: the tier catalog and ledger bookkeeping knobs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EconomyConfig {
    /// Tier assigned to users whose identity does not name one.
    #[serde(default = "default_tier")]
    pub default_tier: String,

    /// Number of recent idempotency keys remembered per user.
    #[serde(default = "default_idempotency_window")]
    pub idempotency_window: usize,

    /// Seconds after the last remote reconciliation before a ledger counts as stale.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Tier table in rank order; the last entry is the top tier.
    #[serde(default = "default_tiers")]
    pub tiers: Vec<TierConfig>,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            default_tier: default_tier(),
            idempotency_window: default_idempotency_window(),
            stale_after_secs: default_stale_after_secs(),
            tiers: default_tiers(),
        }
    }
}

fn default_tier() -> String {
    "free".to_string()
}

fn default_idempotency_window() -> usize {
    128
}

fn default_stale_after_secs() -> u64 {
    86_400
}

fn default_tiers() -> Vec<TierConfig> {
    vec![
        TierConfig {
            id: "free".to_string(),
            display_name: "Free".to_string(),
            monthly_generation_quota: 5,
            monthly_export_quota: 5,
            rollover_cap_fraction: 0.4,
            metered: true,
        },
        TierConfig {
            id: "pro".to_string(),
            display_name: "Pro".to_string(),
            monthly_generation_quota: 100,
            monthly_export_quota: 50,
            rollover_cap_fraction: 0.5,
            metered: true,
        },
        TierConfig {
            id: "unlimited".to_string(),
            display_name: "Unlimited".to_string(),
            monthly_generation_quota: 1000,
            monthly_export_quota: 500,
            rollover_cap_fraction: 0.0,
            metered: false,
        },
    ]
}

/// One `[[economy.tiers]]` row.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TierConfig {
    /// Stable tier identifier referenced by user records.
    pub id: String,

    /// Name shown to users.
    pub display_name: String,

    /// Credits granted per monthly period.
    pub monthly_generation_quota: u32,

    /// Export events allowed per monthly period.
    pub monthly_export_quota: u32,

    /// Share of the monthly quota that may roll over (0.0 to 1.0).
    #[serde(default)]
    pub rollover_cap_fraction: f64,

    /// `false` for tiers with unlimited generation.
    #[serde(default = "default_metered")]
    pub metered: bool,
}

fn default_metered() -> bool {
    true
}

/// Flat cost policy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CostConfig {
    /// Credits charged per generation, regardless of volume.
    #[serde(default = "default_generation_credits")]
    pub generation_credits: u32,

    /// Export units charged per export, regardless of kind.
    #[serde(default = "default_export_units")]
    pub export_units: u32,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            generation_credits: default_generation_credits(),
            export_units: default_export_units(),
        }
    }
}

fn default_generation_credits() -> u32 {
    1
}

fn default_export_units() -> u32 {
    1
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("cardwise").join("cardwise.db"))
        .and_then(|p| p.to_str().map(String::from))
        .unwrap_or_else(|| "cardwise.db".to_string())
}

fn default_wal_mode() -> bool {
    true
}

/// Write-behind persistence retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PersistenceConfig {
    /// First retry delay after a failed save, in milliseconds.
    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,

    /// Upper bound for the doubling retry delay, in milliseconds.
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,

    /// Save attempts per snapshot before it is parked until the next write.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            retry_initial_ms: default_retry_initial_ms(),
            retry_max_ms: default_retry_max_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_retry_initial_ms() -> u64 {
    200
}

fn default_retry_max_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    8
}
