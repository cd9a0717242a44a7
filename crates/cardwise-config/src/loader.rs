// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./cardwise.toml` > `~/.config/cardwise/cardwise.toml` >
//! `/etc/cardwise/cardwise.toml` with environment variable overrides via `CARDWISE_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::CardwiseConfig;

/// System-wide config location.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/cardwise/cardwise.toml";

/// Config file name looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "cardwise.toml";

/// Per-user config location under the XDG config dir.
pub fn user_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("cardwise").join(LOCAL_CONFIG_FILE))
        .unwrap_or_default()
}

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/cardwise/cardwise.toml` (system-wide)
/// 3. `~/.config/cardwise/cardwise.toml` (user XDG config)
/// 4. `./cardwise.toml` (local directory)
/// 5. `CARDWISE_*` environment variables
pub fn load_config() -> Result<CardwiseConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
///
/// Used for testing and explicit configuration.
pub fn load_config_from_str(toml_content: &str) -> Result<CardwiseConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(CardwiseConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<CardwiseConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(CardwiseConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used for hierarchy loading (exposed for diagnostic use).
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(CardwiseConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_PATH))
        .merge(Toml::file(user_config_path()))
        .merge(Toml::file(LOCAL_CONFIG_FILE))
        .merge(env_provider())
}

/// Create the environment variable provider with explicit section mapping.
///
/// Uses `Env::map()` rather than `Env::split("_")` because key names contain
/// underscores: `CARDWISE_ECONOMY_DEFAULT_TIER` must map to
/// `economy.default_tier`, not `economy.default.tier`. The tier table is an
/// array and is not addressable from the environment.
pub fn env_provider() -> Env {
    Env::prefixed("CARDWISE_").map(|key| map_env_key(key.as_str()).into())
}

/// Map a lowercased, prefix-stripped env var name onto a dotted config path.
pub fn map_env_key(key: &str) -> String {
    const SECTIONS: &[&str] = &["app", "economy", "cost", "storage", "persistence"];
    for section in SECTIONS {
        if let Some(rest) = key.strip_prefix(section).and_then(|r| r.strip_prefix('_')) {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}
