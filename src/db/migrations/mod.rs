use anyhow::Result;
use log::info;
use sqlx::{Executor, PgPool};

use crate::error::Error;

/// Migrations embedded at compile time and applied in order. Statements are
/// idempotent so re-running on startup is safe.
const MIGRATIONS: &[(&str, &str)] = &[(
    "001_create_accidents",
    include_str!("sql/001_create_accidents.sql"),
)];

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    for (name, sql) in MIGRATIONS {
        pool.execute(*sql)
            .await
            .map_err(|e| Error::Database(format!("Migration {} failed: {}", name, e)))?;
        info!("Applied migration: {}", name);
    }

    Ok(())
}
