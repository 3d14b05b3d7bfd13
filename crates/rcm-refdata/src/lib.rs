//! rcm-refdata
//!
//! First-sight reference resolution for payers, providers, facilities,
//! clinicians, and the three code tables. Every `resolve_*` call is
//! idempotent under concurrent first-sight inserts: two workers
//! racing to resolve the same unseen code both succeed and agree on
//! the same id (§2).

use anyhow::Result;
use rcm_db::refdata::RefKind;
use sqlx::PgPool;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ReferenceResolver {
    pool: PgPool,
}

impl ReferenceResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolves standalone, against its own connection acquired from the
    /// pool, never the caller's claim transaction. This matches §4.6:
    /// first-sight inserts happen "inside an independent transaction"
    /// so a rollback of the enclosing claim never undoes a reference
    /// registration two workers may already be relying on.
    ///
    /// `ingestion_file_id`/`claim_business_id` identify the file and claim
    /// whose parse triggered this resolution; every call writes an audit
    /// row recording the attempt, whether or not it was the caller that
    /// won the first-sight insert (§4.6).
    async fn resolve(
        &self,
        kind: RefKind,
        business_code: &str,
        ingestion_file_id: i64,
        claim_business_id: &str,
    ) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        let (id, created) =
            rcm_db::refdata::resolve_ref(&mut conn, kind, business_code, ingestion_file_id, claim_business_id)
                .await?;
        if created {
            debug!(kind = ?kind, business_code, id, "auto-registered reference code");
        }
        Ok(id)
    }

    pub async fn resolve_payer(&self, ingestion_file_id: i64, claim_business_id: &str, code: &str) -> Result<i64> {
        self.resolve(RefKind::Payer, code, ingestion_file_id, claim_business_id).await
    }

    pub async fn resolve_provider(&self, ingestion_file_id: i64, claim_business_id: &str, code: &str) -> Result<i64> {
        self.resolve(RefKind::Provider, code, ingestion_file_id, claim_business_id).await
    }

    pub async fn resolve_facility(&self, ingestion_file_id: i64, claim_business_id: &str, code: &str) -> Result<i64> {
        self.resolve(RefKind::Facility, code, ingestion_file_id, claim_business_id).await
    }

    pub async fn resolve_clinician(&self, ingestion_file_id: i64, claim_business_id: &str, code: &str) -> Result<i64> {
        self.resolve(RefKind::Clinician, code, ingestion_file_id, claim_business_id).await
    }

    pub async fn resolve_activity_code(
        &self,
        ingestion_file_id: i64,
        claim_business_id: &str,
        code: &str,
    ) -> Result<i64> {
        self.resolve(RefKind::ActivityCode, code, ingestion_file_id, claim_business_id).await
    }

    pub async fn resolve_diagnosis_code(
        &self,
        ingestion_file_id: i64,
        claim_business_id: &str,
        code: &str,
    ) -> Result<i64> {
        self.resolve(RefKind::DiagnosisCode, code, ingestion_file_id, claim_business_id).await
    }

    pub async fn resolve_denial_code(
        &self,
        ingestion_file_id: i64,
        claim_business_id: &str,
        code: &str,
    ) -> Result<i64> {
        self.resolve(RefKind::DenialCode, code, ingestion_file_id, claim_business_id).await
    }
}
