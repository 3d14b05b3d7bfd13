//! rcm-db
//!
//! Connection setup, embedded migrations, and the low-level query
//! layer the rest of the pipeline is built on. Every write here that
//! can be retried by an upstream caller is written as an idempotent
//! upsert, never a plain insert.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub mod claim;
pub mod error;
pub mod refdata;
pub mod remittance;
pub mod run;
pub mod verify;

pub use claim::*;
pub use error::*;
pub use refdata::*;
pub use remittance::*;
pub use run::*;
pub use verify::*;

pub const ENV_DB_URL: &str = "RCM_DATABASE_URL";

/// Connect to Postgres using the URL supplied by the caller (normally
/// read from [`IngestConfig::database_url`] by `rcm-daemon`).
pub async fn connect(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

/// Connect using `RCM_DATABASE_URL`, for CLI/test entry points that
/// don't go through the layered config loader.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

/// Test helper: connect + ensure migrations are applied.
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Run embedded SQLx migrations. Safe to call on every daemon startup.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_claim_table: bool,
}

pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as(
        r#"
        select exists (
            select 1 from information_schema.tables
            where table_schema = 'public' and table_name = 'claim'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_claim_table: exists,
    })
}

/// Detect a Postgres unique constraint violation by name.
pub fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505") && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}

/// Detect a Postgres foreign key violation, used to no-op FK-dependent
/// writes against a run that has already been cleaned up.
pub fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23503"))
}
