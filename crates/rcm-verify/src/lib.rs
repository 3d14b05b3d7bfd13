//! rcm-verify
//!
//! Runs every enabled [`VerificationRule`] against one file's persisted
//! rows after the Persistence Engine has finished with it (§4.5). Each
//! rule is a named predicate expressed at the storage layer; the file
//! is verified iff every rule's violation count is within its allowance:
//! a pure decision plus a report, run against the database rather than
//! two in-memory snapshots.

use anyhow::{Context, Result};
use rcm_db::verify::{
    finish_verification_run, load_enabled_rules, record_rule_result, run_rule_predicate, start_verification_run,
    VerificationRuleRow,
};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RuleOutcome {
    pub rule_name: String,
    pub violation_count: i64,
    pub max_allowed_violations: i64,
    pub passed: bool,
}

#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub verification_run_id: i64,
    pub rules: Vec<RuleOutcome>,
}

impl VerificationReport {
    /// Verified iff every rule yielded ok=true (§4.5).
    pub fn is_verified(&self) -> bool {
        self.rules.iter().all(|r| r.passed)
    }
}

#[derive(Debug, Clone)]
pub struct Verifier {
    pool: PgPool,
}

impl Verifier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn verify_file(&self, run_id: Uuid, ingestion_file_id: i64) -> Result<VerificationReport> {
        let rules = load_enabled_rules(&self.pool).await?;
        let verification_run_id = start_verification_run(&self.pool, run_id, Some(ingestion_file_id)).await?;

        let mut outcomes = Vec::with_capacity(rules.len());
        for rule in &rules {
            let outcome = self.run_one_rule(verification_run_id, ingestion_file_id, rule).await?;
            outcomes.push(outcome);
        }

        let report = VerificationReport { verification_run_id, rules: outcomes };
        finish_verification_run(&self.pool, verification_run_id, report.is_verified()).await?;

        if report.is_verified() {
            info!(ingestion_file_id, verification_run_id, "file verified");
        } else {
            warn!(ingestion_file_id, verification_run_id, "file failed verification");
        }

        Ok(report)
    }

    async fn run_one_rule(
        &self,
        verification_run_id: i64,
        ingestion_file_id: i64,
        rule: &VerificationRuleRow,
    ) -> Result<RuleOutcome> {
        let violation_count = run_rule_predicate(&self.pool, rule, ingestion_file_id)
            .await
            .with_context(|| format!("verification rule '{}' failed to execute", rule.name))?;
        let passed = violation_count <= rule.max_allowed_violations;

        record_rule_result(&self.pool, verification_run_id, rule.id, violation_count, passed).await?;

        Ok(RuleOutcome {
            rule_name: rule.name.clone(),
            violation_count,
            max_allowed_violations: rule.max_allowed_violations,
            passed,
        })
    }
}
