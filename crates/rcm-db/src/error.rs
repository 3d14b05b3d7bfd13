use crate::is_foreign_key_violation;
use crate::run::run_exists_with_retry;
use anyhow::{Context, Result};
use rcm_schemas::{FileAuditStatus, Problem, RootType, Severity, Stage};
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

/// Begin an [`ingestion_file_audit`] row for one (run, file) pair.
/// Returns the audit row id, used to finalize it once the file is
/// fully processed (or failed), or `None` if the run row still isn't
/// visible after a bounded retry — a recoverable no-op rather than a
/// fatal error (§4.7). `root_type` is `None` when the file failed to
/// sniff a recognizable root at all.
pub async fn begin_file_audit(
    pool: &PgPool,
    run_id: Uuid,
    ingestion_file_id: i64,
    root_type: Option<RootType>,
) -> Result<Option<i64>> {
    if !run_exists_with_retry(pool, run_id).await? {
        warn!(%run_id, ingestion_file_id, "ingestion_run row not visible, skipping file audit as a no-op");
        return Ok(None);
    }

    let result: std::result::Result<(i64,), sqlx::Error> = sqlx::query_as(
        r#"
        insert into ingestion_file_audit (run_id, ingestion_file_id, root_type, status)
        values ($1, $2, $3, $4)
        returning id
        "#,
    )
    .bind(run_id)
    .bind(ingestion_file_id)
    .bind(root_type.map(|r| r.as_code()))
    .bind(FileAuditStatus::Ok.as_code())
    .fetch_one(pool)
    .await;

    match result {
        Ok((id,)) => Ok(Some(id)),
        Err(e) if is_foreign_key_violation(&e) => {
            warn!(%run_id, ingestion_file_id, "file audit insert hit a foreign-key violation, treating as a no-op");
            Ok(None)
        }
        Err(e) => Err(e).context("begin_file_audit failed"),
    }
}

/// No-ops when `audit_id` is `None` (the row was never created because
/// `begin_file_audit` fell back to a no-op).
pub async fn finish_file_audit(
    pool: &PgPool,
    audit_id: Option<i64>,
    status: FileAuditStatus,
    claims_seen: i32,
    claims_persisted: i32,
) -> Result<()> {
    let Some(audit_id) = audit_id else { return Ok(()) };

    sqlx::query(
        r#"
        update ingestion_file_audit
           set status = $2,
               claims_seen = $3,
               claims_persisted = $4,
               finished_at_utc = now()
         where id = $1
        "#,
    )
    .bind(audit_id)
    .bind(status.as_code())
    .bind(claims_seen)
    .bind(claims_persisted)
    .execute(pool)
    .await
    .context("finish_file_audit failed")?;
    Ok(())
}

pub async fn mark_file_acknowledged(pool: &PgPool, audit_id: Option<i64>) -> Result<()> {
    let Some(audit_id) = audit_id else { return Ok(()) };

    sqlx::query("update ingestion_file_audit set acknowledged = true where id = $1")
        .bind(audit_id)
        .execute(pool)
        .await
        .context("mark_file_acknowledged failed")?;
    Ok(())
}

fn severity_code(s: Severity) -> i16 {
    match s {
        Severity::Info => 0,
        Severity::Warning => 1,
        Severity::Error => 2,
    }
}

fn stage_name(s: Stage) -> &'static str {
    match s {
        Stage::Structural => "structural",
        Stage::Header => "header",
        Stage::Record => "record",
        Stage::Reference => "reference",
        Stage::Persistence => "persistence",
        Stage::Verification => "verification",
        Stage::Acknowledgment => "acknowledgment",
    }
}

/// Record one [`Problem`] against a run/file. Each call runs in its own
/// implicit transaction so a failure recording one problem can never
/// roll back another.
pub async fn record_problem(
    pool: &PgPool,
    run_id: Option<Uuid>,
    ingestion_file_id: Option<i64>,
    problem: &Problem,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into ingestion_error
            (run_id, ingestion_file_id, severity, stage, object_type, object_key, code, message, line_no, column_no)
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(run_id)
    .bind(ingestion_file_id)
    .bind(severity_code(problem.severity))
    .bind(stage_name(problem.stage))
    .bind(&problem.object_type)
    .bind(&problem.object_key)
    .bind(&problem.code)
    .bind(&problem.message)
    .bind(problem.line.map(|v| v as i64))
    .bind(problem.column.map(|v| v as i64))
    .execute(pool)
    .await
    .context("record_problem failed")?;
    Ok(())
}
