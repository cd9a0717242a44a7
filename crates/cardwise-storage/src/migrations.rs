// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedded schema migrations.

use cardwise_core::CardwiseError;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Apply all pending migrations to `conn`.
pub fn run_migrations(conn: &mut rusqlite::Connection) -> Result<(), CardwiseError> {
    let report = embedded::migrations::runner()
        .run(conn)
        .map_err(|e| CardwiseError::Storage {
            source: Box::new(e),
        })?;
    for migration in report.applied_migrations() {
        tracing::debug!(
            version = migration.version(),
            name = migration.name(),
            "applied migration"
        );
    }
    Ok(())
}
