use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct VerificationRuleRow {
    pub id: i64,
    pub name: String,
    pub sql_predicate: String,
    pub max_allowed_violations: i64,
}

/// Load every enabled rule. Rules live in the database rather than
/// code so operators can tune thresholds without a redeploy.
pub async fn load_enabled_rules(pool: &PgPool) -> Result<Vec<VerificationRuleRow>> {
    let rows: Vec<(i64, String, String, i64)> = sqlx::query_as(
        r#"
        select id, name, sql_predicate, max_allowed_violations
          from verification_rule
         where enabled = true
         order by id
        "#,
    )
    .fetch_all(pool)
    .await
    .context("load_enabled_rules failed")?;

    Ok(rows
        .into_iter()
        .map(|(id, name, sql_predicate, max_allowed_violations)| VerificationRuleRow {
            id,
            name,
            sql_predicate,
            max_allowed_violations,
        })
        .collect())
}

pub async fn start_verification_run(pool: &PgPool, run_id: Uuid, ingestion_file_id: Option<i64>) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        "insert into verification_run (run_id, ingestion_file_id) values ($1, $2) returning id",
    )
    .bind(run_id)
    .bind(ingestion_file_id)
    .fetch_one(pool)
    .await
    .context("start_verification_run failed")?;
    Ok(id)
}

pub async fn finish_verification_run(pool: &PgPool, verification_run_id: i64, passed: bool) -> Result<()> {
    sqlx::query("update verification_run set finished_at_utc = now(), passed = $2 where id = $1")
        .bind(verification_run_id)
        .bind(passed)
        .execute(pool)
        .await
        .context("finish_verification_run failed")?;
    Ok(())
}

pub async fn record_rule_result(
    pool: &PgPool,
    verification_run_id: i64,
    verification_rule_id: i64,
    violation_count: i64,
    passed: bool,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into verification_result
            (verification_run_id, verification_rule_id, violation_count, passed)
        values ($1, $2, $3, $4)
        "#,
    )
    .bind(verification_run_id)
    .bind(verification_rule_id)
    .bind(violation_count)
    .bind(passed)
    .execute(pool)
    .await
    .context("record_rule_result failed")?;
    Ok(())
}

/// Run one rule's predicate, scoped to a single file, as
/// `select count(*) from (<predicate>) t` and compare against its
/// allowance. The predicate is operator-authored SQL from
/// `verification_rule`, never end-user input; it is expected to
/// reference `$1` as the `ingestion_file_id` bind parameter (§4.5).
pub async fn run_rule_predicate(pool: &PgPool, rule: &VerificationRuleRow, ingestion_file_id: i64) -> Result<i64> {
    let sql = format!("select count(*)::bigint from ({}) as t", rule.sql_predicate);
    let (count,): (i64,) = sqlx::query_as(&sql)
        .bind(ingestion_file_id)
        .fetch_one(pool)
        .await
        .with_context(|| format!("run_rule_predicate failed for rule {}", rule.name))?;
    Ok(count)
}
