// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Immutable tier catalog.
//!
//! Tiers are registered once, in rank order, and looked up by id. The catalog
//! is never mutated after construction; hot reload swaps in a whole new one.

use std::collections::HashMap;

use cardwise_config::model::EconomyConfig;
use cardwise_core::{CardwiseError, Tier, TierId};

/// Lookup table of subscription tiers and their quota policy.
#[derive(Debug, Clone)]
pub struct TierCatalog {
    /// Tiers in rank order; the last entry is the top tier.
    tiers: Vec<Tier>,
    index: HashMap<TierId, usize>,
    default_tier: TierId,
}

impl TierCatalog {
    /// Build a catalog from tiers in rank order.
    ///
    /// Rejects an empty table, duplicate ids, and a default tier that is not
    /// registered.
    pub fn new(tiers: Vec<Tier>, default_tier: TierId) -> Result<Self, CardwiseError> {
        if tiers.is_empty() {
            return Err(CardwiseError::Config(
                "tier catalog must contain at least one tier".to_string(),
            ));
        }

        let mut index = HashMap::with_capacity(tiers.len());
        for (i, tier) in tiers.iter().enumerate() {
            if index.insert(tier.id.clone(), i).is_some() {
                return Err(CardwiseError::Config(format!(
                    "duplicate tier id `{}`",
                    tier.id
                )));
            }
        }

        if !index.contains_key(&default_tier) {
            return Err(CardwiseError::Config(format!(
                "default tier `{default_tier}` is not registered"
            )));
        }

        Ok(Self {
            tiers,
            index,
            default_tier,
        })
    }

    /// Build the catalog from the `[economy]` config section.
    pub fn from_config(config: &EconomyConfig) -> Result<Self, CardwiseError> {
        let tiers = config
            .tiers
            .iter()
            .map(|t| Tier {
                id: TierId(t.id.clone()),
                display_name: t.display_name.clone(),
                monthly_generation_quota: t.monthly_generation_quota,
                monthly_export_quota: t.monthly_export_quota,
                rollover_cap_fraction: t.rollover_cap_fraction,
                metered: t.metered,
            })
            .collect();
        Self::new(tiers, TierId(config.default_tier.clone()))
    }

    /// Look up a tier by id.
    pub fn lookup(&self, tier_id: &TierId) -> Result<&Tier, CardwiseError> {
        self.index
            .get(tier_id)
            .map(|&i| &self.tiers[i])
            .ok_or_else(|| CardwiseError::UnknownTier {
                tier_id: tier_id.0.clone(),
            })
    }

    /// The tier assigned when identity does not name one.
    pub fn default_tier(&self) -> &Tier {
        // Presence checked in `new`.
        &self.tiers[self.index[&self.default_tier]]
    }

    /// Whether no higher-ranked tier exists to upgrade to.
    pub fn is_top_tier(&self, tier_id: &TierId) -> bool {
        self.index.get(tier_id) == Some(&(self.tiers.len() - 1))
    }

    /// All tiers in rank order.
    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }
}

impl Default for TierCatalog {
    fn default() -> Self {
        Self::from_config(&EconomyConfig::default())
            .unwrap_or_else(|_| unreachable!("built-in tier table is valid"))
    }
}
