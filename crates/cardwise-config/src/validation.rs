// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that serde cannot express: a well-formed
//! tier table, a registered default tier, and sane retry bounds.

use std::collections::HashSet;

use crate::diagnostic::ConfigError;
use crate::model::CardwiseConfig;

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &CardwiseConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut push = |message: String| errors.push(ConfigError::Validation { message });

    let economy = &config.economy;
    if economy.tiers.is_empty() {
        push("economy.tiers must define at least one tier".to_string());
    }

    let mut seen = HashSet::new();
    for (i, tier) in economy.tiers.iter().enumerate() {
        if tier.id.trim().is_empty() {
            push(format!("economy.tiers[{i}].id must not be empty"));
        } else if !seen.insert(tier.id.as_str()) {
            push(format!("duplicate tier id `{}` in [[economy.tiers]]", tier.id));
        }
        if !(0.0..=1.0).contains(&tier.rollover_cap_fraction) {
            push(format!(
                "economy.tiers[{i}].rollover_cap_fraction must be between 0.0 and 1.0, got {}",
                tier.rollover_cap_fraction
            ));
        }
    }

    if !economy.tiers.is_empty() && !seen.contains(economy.default_tier.as_str()) {
        push(format!(
            "economy.default_tier `{}` is not defined in [[economy.tiers]]",
            economy.default_tier
        ));
    }

    if economy.idempotency_window == 0 {
        push("economy.idempotency_window must be at least 1".to_string());
    }

    if config.cost.generation_credits == 0 {
        push("cost.generation_credits must be at least 1".to_string());
    }
    if config.cost.export_units == 0 {
        push("cost.export_units must be at least 1".to_string());
    }

    if config.storage.database_path.trim().is_empty() {
        push("storage.database_path must not be empty".to_string());
    }

    let persistence = &config.persistence;
    if persistence.retry_initial_ms > persistence.retry_max_ms {
        push(format!(
            "persistence.retry_initial_ms ({}) must not exceed persistence.retry_max_ms ({})",
            persistence.retry_initial_ms, persistence.retry_max_ms
        ));
    }
    if persistence.max_attempts == 0 {
        push("persistence.max_attempts must be at least 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
