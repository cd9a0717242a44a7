// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cardwise - token economy and quota enforcement for study-material generation.
//!
//! This is the binary entry point: it loads configuration, opens the SQLite
//! ledger store, and runs one subcommand against the economy service.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::warn;

use cardwise_config::model::CardwiseConfig;
use cardwise_core::{CardwiseError, IdempotencyKey, TierId, UserId};
use cardwise_economy::{EconomyService, ExportKind, ExportRequest, GenerationRequest, TierCatalog};
use cardwise_storage::SqliteLedgerStore;

/// Cardwise - token economy and quota enforcement.
#[derive(Parser, Debug)]
#[command(name = "cardwise", version, about, long_about = None)]
struct Cli {
    /// Configuration file to load instead of the XDG search path.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// List the configured subscription tiers.
    Tiers,
    /// Show a user's balances, opening the ledger if needed.
    Status {
        #[arg(long)]
        user: String,
        /// Tier reported by identity; applied if it differs from the stored one.
        #[arg(long)]
        tier: Option<String>,
    },
    /// Evaluate, or with --confirm charge, a generation.
    Generate {
        #[arg(long)]
        user: String,
        /// Source material length in characters.
        #[arg(long, default_value_t = 0)]
        chars: usize,
        #[arg(long, default_value_t = 0)]
        flashcards: u32,
        #[arg(long, default_value_t = 0)]
        quiz: u32,
        /// Idempotency key; charges the ledger when present.
        #[arg(long, value_name = "KEY")]
        confirm: Option<String>,
    },
    /// Evaluate, or with --confirm charge, an export.
    Export {
        #[arg(long)]
        user: String,
        /// Study set being exported.
        #[arg(long)]
        set: String,
        #[arg(long, value_enum, default_value_t = ExportKindArg::Both)]
        kind: ExportKindArg,
        #[arg(long)]
        branding: bool,
        /// Idempotency key; charges the ledger when present.
        #[arg(long, value_name = "KEY")]
        confirm: Option<String>,
    },
    /// Move a user to another tier.
    SetTier {
        #[arg(long)]
        user: String,
        #[arg(long)]
        tier: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ExportKindArg {
    Flashcards,
    Quiz,
    Both,
}

impl From<ExportKindArg> for ExportKind {
    fn from(arg: ExportKindArg) -> Self {
        match arg {
            ExportKindArg::Flashcards => ExportKind::FlashcardsOnly,
            ExportKindArg::Quiz => ExportKind::QuizOnly,
            ExportKindArg::Both => ExportKind::Both,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => cardwise_config::load_and_validate_path(path),
        None => cardwise_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            cardwise_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    init_tracing(&config.app.log_level);

    match run(cli, &config).await {
        Ok(output) => println!("{}", output.trim_end()),
        Err(e) => {
            eprintln!("cardwise: {e}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli, config: &CardwiseConfig) -> Result<String, CardwiseError> {
    if let Commands::Tiers = cli.command {
        let catalog = TierCatalog::from_config(&config.economy)?;
        return commands::tiers(&catalog, cli.json);
    }

    let store = Arc::new(SqliteLedgerStore::open(&config.storage).await?);
    let service = EconomyService::from_config(config)?
        .store(store.clone())
        .build();

    let result = dispatch(&service, cli.command, cli.json).await;

    // Drain write-behind saves before the process exits.
    service.shutdown().await;
    if let Err(e) = store.close().await {
        warn!(error = %e, "WAL checkpoint failed on exit");
    }
    result
}

async fn dispatch(
    service: &EconomyService,
    command: Commands,
    json: bool,
) -> Result<String, CardwiseError> {
    match command {
        Commands::Tiers => commands::tiers(&service.catalog(), json),
        Commands::Status { user, tier } => {
            commands::status(service, UserId(user), tier.map(TierId), json).await
        }
        Commands::Generate {
            user,
            chars,
            flashcards,
            quiz,
            confirm,
        } => {
            let request = GenerationRequest {
                source_content_length: chars,
                flashcard_count: flashcards,
                quiz_count: quiz,
            };
            commands::generate(service, UserId(user), request, confirm.map(IdempotencyKey), json)
                .await
        }
        Commands::Export {
            user,
            set,
            kind,
            branding,
            confirm,
        } => {
            let request = ExportRequest {
                set_id: set,
                kind: kind.into(),
                include_branding: branding,
            };
            commands::export(service, UserId(user), request, confirm.map(IdempotencyKey), json)
                .await
        }
        Commands::SetTier { user, tier } => {
            commands::set_tier(service, UserId(user), TierId(tier), json).await
        }
    }
}

/// Initializes the tracing subscriber with the given log level.
///
/// Logs go to stderr so command output on stdout stays parseable.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("cardwise={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        // Only jemalloc supports advancing the stats epoch.
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn default_config_is_valid() {
        let config = cardwise_config::load_and_validate_str("").expect("defaults should validate");
        assert_eq!(config.app.log_level, "info");
    }

    #[test]
    fn export_kind_maps_to_request_kind() {
        let cli = Cli::try_parse_from([
            "cardwise", "export", "--user", "alice", "--set", "s1", "--kind", "quiz",
        ])
        .unwrap();
        match cli.command {
            Commands::Export { kind, branding, .. } => {
                assert_eq!(ExportKind::from(kind), ExportKind::QuizOnly);
                assert!(!branding);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from(["cardwise", "tiers", "--json", "--config", "/tmp/c.toml"])
            .unwrap();
        assert!(cli.json);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
    }

    #[test]
    fn generate_requires_user() {
        assert!(Cli::try_parse_from(["cardwise", "generate"]).is_err());
    }

    #[tokio::test]
    async fn run_persists_to_configured_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("cli.db");
        let toml = format!("[storage]\ndatabase_path = {:?}\n", db.to_str().unwrap());
        let config = cardwise_config::load_and_validate_str(&toml).unwrap();

        let cli = Cli::try_parse_from([
            "cardwise", "generate", "--user", "alice", "--confirm", "k1",
        ])
        .unwrap();
        let out = run(cli, &config).await.unwrap();
        assert!(out.starts_with("committed"), "{out}");

        let cli = Cli::try_parse_from(["cardwise", "status", "--user", "alice"]).unwrap();
        let out = run(cli, &config).await.unwrap();
        assert!(out.contains("credits:  4 remaining (1 used, 0 rolled over)"), "{out}");
    }
}
