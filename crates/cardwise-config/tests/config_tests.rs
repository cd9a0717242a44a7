// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the Cardwise configuration system.

use cardwise_config::diagnostic::ConfigError;
use cardwise_config::model::CardwiseConfig;
use cardwise_config::{load_and_validate_path, load_and_validate_str, load_config_from_str};

/// Valid TOML with all known sections deserializes successfully.
#[test]
fn valid_toml_deserializes_into_cardwise_config() {
    let toml = r#"
[app]
log_level = "debug"

[economy]
default_tier = "basic"
idempotency_window = 16
stale_after_secs = 3600

[[economy.tiers]]
id = "basic"
display_name = "Basic"
monthly_generation_quota = 10
monthly_export_quota = 3
rollover_cap_fraction = 0.25

[[economy.tiers]]
id = "campus"
display_name = "Campus"
monthly_generation_quota = 0
monthly_export_quota = 200
metered = false

[cost]
generation_credits = 2
export_units = 1

[storage]
database_path = "/tmp/cardwise-test.db"
wal_mode = false

[persistence]
retry_initial_ms = 50
retry_max_ms = 1000
max_attempts = 3
"#;

    let config = load_and_validate_str(toml).expect("valid TOML should load");
    assert_eq!(config.app.log_level, "debug");
    assert_eq!(config.economy.default_tier, "basic");
    assert_eq!(config.economy.idempotency_window, 16);
    assert_eq!(config.economy.stale_after_secs, 3600);
    assert_eq!(config.economy.tiers.len(), 2);
    assert_eq!(config.economy.tiers[0].monthly_generation_quota, 10);
    assert!(config.economy.tiers[0].metered, "metered defaults to true");
    assert!(!config.economy.tiers[1].metered);
    assert_eq!(config.economy.tiers[1].rollover_cap_fraction, 0.0);
    assert_eq!(config.cost.generation_credits, 2);
    assert_eq!(config.storage.database_path, "/tmp/cardwise-test.db");
    assert!(!config.storage.wal_mode);
    assert_eq!(config.persistence.max_attempts, 3);
}

/// Missing optional sections use defaults without error.
#[test]
fn missing_optional_sections_use_defaults() {
    let config = load_config_from_str("").expect("empty TOML should use defaults");

    assert_eq!(config.app.log_level, "info");
    assert_eq!(config.economy.default_tier, "free");
    assert_eq!(config.economy.idempotency_window, 128);
    let ids: Vec<&str> = config.economy.tiers.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["free", "pro", "unlimited"]);
    let free = &config.economy.tiers[0];
    assert_eq!(free.monthly_generation_quota, 5);
    assert_eq!(free.monthly_export_quota, 5);
    assert!((free.rollover_cap_fraction - 0.4).abs() < f64::EPSILON);
    assert!(!config.economy.tiers[2].metered);
    assert_eq!(config.cost.generation_credits, 1);
    assert_eq!(config.cost.export_units, 1);
    assert!(config.storage.database_path.ends_with("cardwise.db"));
    assert!(config.storage.wal_mode);
    assert_eq!(config.persistence.retry_initial_ms, 200);
}

/// Unknown field in a tier row produces an unknown-key diagnostic with a suggestion.
#[test]
fn unknown_tier_field_suggests_correction() {
    let toml = r#"
[[economy.tiers]]
id = "free"
display_name = "Free"
monthly_generation_quota = 5
montly_export_quota = 5
"#;

    let errors = load_and_validate_str(toml).expect_err("should reject unknown field");
    let unknown = errors
        .iter()
        .find_map(|e| match e {
            ConfigError::UnknownKey {
                key, suggestion, ..
            } => Some((key.clone(), suggestion.clone())),
            _ => None,
        })
        .expect("expected an UnknownKey diagnostic");
    assert_eq!(unknown.0, "montly_export_quota");
    assert_eq!(unknown.1.as_deref(), Some("monthly_export_quota"));
}

/// A tier row without a quota is rejected rather than silently zeroed.
#[test]
fn tier_without_quota_is_rejected() {
    let toml = r#"
[[economy.tiers]]
id = "free"
display_name = "Free"
monthly_export_quota = 5
"#;

    let errors = load_and_validate_str(toml).expect_err("quota is required");
    assert!(errors.iter().any(|e| matches!(
        e,
        ConfigError::MissingKey { key } if key.contains("monthly_generation_quota")
    )));
}

/// Replacing the tier table without the default tier fails validation.
#[test]
fn replaced_tier_table_must_contain_default_tier() {
    let toml = r#"
[[economy.tiers]]
id = "basic"
display_name = "Basic"
monthly_generation_quota = 10
monthly_export_quota = 3
"#;

    let errors = load_and_validate_str(toml).expect_err("free is no longer registered");
    assert!(errors.iter().any(|e| matches!(
        e,
        ConfigError::Validation { message } if message.contains("default_tier `free`")
    )));
}

/// Wrong value types are reported with the offending key path.
#[test]
fn invalid_type_reports_key() {
    let toml = r#"
[cost]
generation_credits = "one"
"#;

    let errors = load_and_validate_str(toml).expect_err("string is not a u32");
    assert!(errors.iter().any(|e| matches!(
        e,
        ConfigError::InvalidType { key, .. } if key == "cost.generation_credits"
    )));
}

/// An explicit config path is loaded and validated.
#[test]
#[serial_test::serial]
fn explicit_path_is_loaded() {
    let dir = std::env::temp_dir().join(format!("cardwise-config-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("cardwise.toml");
    std::fs::write(&path, "[economy]\nidempotency_window = 4\n").unwrap();

    let config = load_and_validate_path(&path).expect("file should load");
    assert_eq!(config.economy.idempotency_window, 4);

    std::fs::remove_dir_all(&dir).ok();
}

/// CARDWISE_ECONOMY_DEFAULT_TIER maps to economy.default_tier, not economy.default.tier.
#[test]
#[serial_test::serial]
fn env_var_overrides_nested_key_with_underscores() {
    use cardwise_config::loader::env_provider;
    use figment::{providers::Serialized, Figment};

    figment::Jail::expect_with(|jail| {
        jail.set_env("CARDWISE_ECONOMY_DEFAULT_TIER", "pro");
        jail.set_env("CARDWISE_STORAGE_DATABASE_PATH", "/tmp/env.db");

        let config: CardwiseConfig = Figment::new()
            .merge(Serialized::defaults(CardwiseConfig::default()))
            .merge(env_provider())
            .extract()?;

        assert_eq!(config.economy.default_tier, "pro");
        assert_eq!(config.storage.database_path, "/tmp/env.db");
        Ok(())
    });
}

/// The compiled defaults, written out as TOML, form a valid config file.
#[test]
#[serial_test::serial]
fn serialized_defaults_reload_as_valid_config() {
    let rendered = toml::to_string(&CardwiseConfig::default()).expect("defaults serialize");
    assert!(rendered.contains("[[economy.tiers]]"));

    let reloaded = load_and_validate_str(&rendered).expect("rendered defaults should validate");
    assert_eq!(reloaded.economy.tiers.len(), 3);
    assert_eq!(reloaded.economy.default_tier, "free");
    assert_eq!(reloaded.persistence.max_attempts, 8);
}
