//! rcm-audit
//!
//! DB-backed audit and error sinks (§3, §4.7). Where the original
//! append-only JSONL audit log chained events with a running SHA-256
//! hash, this pipeline's audit trail is a set of relational rows
//! (`ingestion_run`, `ingestion_file_audit`, `ingestion_error`) that
//! other tooling can query directly — the integrity guarantee moves
//! from a hash chain to the database's own durability and the
//! append-only discipline enforced here (no update/delete helpers are
//! exposed for error rows).

use anyhow::Result;
use rcm_schemas::{FileAuditStatus, Problem, RootType};
use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AuditSink {
    pool: PgPool,
}

impl AuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn start_run(&self, run_id: Uuid, config_hash: &str) -> Result<()> {
        info!(%run_id, config_hash, "ingestion run started");
        rcm_db::start_run(&self.pool, run_id, config_hash).await
    }

    pub async fn finish_run(&self, run_id: Uuid, files_claimed: i32, files_ok: i32, files_failed: i32) -> Result<()> {
        info!(%run_id, files_claimed, files_ok, files_failed, "ingestion run finished");
        rcm_db::finish_run(&self.pool, run_id, files_claimed, files_ok, files_failed).await
    }

    /// Returns `None` when the file audit row could not be created
    /// (the ingestion run wasn't yet visible) — a recoverable no-op,
    /// not a failure of the file itself (§4.7).
    pub async fn begin_file(&self, run_id: Uuid, ingestion_file_id: i64, root_type: Option<RootType>) -> Result<Option<i64>> {
        rcm_db::begin_file_audit(&self.pool, run_id, ingestion_file_id, root_type).await
    }

    pub async fn finish_file(
        &self,
        audit_id: Option<i64>,
        status: FileAuditStatus,
        claims_seen: i32,
        claims_persisted: i32,
    ) -> Result<()> {
        match status {
            FileAuditStatus::Fail => warn!(?audit_id, claims_seen, claims_persisted, "file audit finished: FAIL"),
            FileAuditStatus::Already => info!(?audit_id, "file audit finished: ALREADY"),
            FileAuditStatus::Ok => info!(?audit_id, claims_seen, claims_persisted, "file audit finished: OK"),
        }
        rcm_db::finish_file_audit(&self.pool, audit_id, status, claims_seen, claims_persisted).await
    }

    pub async fn mark_acknowledged(&self, audit_id: Option<i64>) -> Result<()> {
        rcm_db::mark_file_acknowledged(&self.pool, audit_id).await
    }
}

#[derive(Debug, Clone)]
pub struct ErrorSink {
    pool: PgPool,
}

impl ErrorSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record one problem in its own implicit transaction so a single
    /// failed error-write can never roll back the claim or file
    /// transaction that raised it (§4.7).
    pub async fn record(&self, run_id: Option<Uuid>, ingestion_file_id: Option<i64>, problem: &Problem) {
        error!(code = %problem.code, object_key = %problem.object_key, message = %problem.message, "problem recorded");
        if let Err(e) = rcm_db::record_problem(&self.pool, run_id, ingestion_file_id, problem).await {
            // Recording the problem itself failed; log it so it isn't silently lost.
            error!(error = %e, "failed to persist problem row");
        }
    }

    pub async fn record_file_error(&self, run_id: Uuid, file_id: &str, code: &str, message: impl Into<String>) {
        let problem = Problem::file(rcm_schemas::Stage::Persistence, file_id, code, message);
        self.record(Some(run_id), None, &problem).await;
    }

    pub async fn record_claim_error(
        &self,
        run_id: Uuid,
        ingestion_file_id: i64,
        claim_id: &str,
        code: &str,
        message: impl Into<String>,
    ) {
        let problem = Problem::claim(rcm_schemas::Stage::Persistence, claim_id, code, message);
        self.record(Some(run_id), Some(ingestion_file_id), &problem).await;
    }
}
