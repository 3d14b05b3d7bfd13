use anyhow::{Context, Result};

/// Every `ref_*` table shares the same (business_code, descriptor,
/// source) shape, so resolution is one generic routine parameterized
/// by table name. Table names here are compile-time constants chosen
/// by callers in this crate, never user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Payer,
    Provider,
    Facility,
    Clinician,
    ActivityCode,
    DiagnosisCode,
    DenialCode,
}

impl RefKind {
    fn table(self) -> &'static str {
        match self {
            RefKind::Payer => "ref_payer",
            RefKind::Provider => "ref_provider",
            RefKind::Facility => "ref_facility",
            RefKind::Clinician => "ref_clinician",
            RefKind::ActivityCode => "ref_activity_code",
            RefKind::DiagnosisCode => "ref_diagnosis_code",
            RefKind::DenialCode => "ref_denial_code",
        }
    }

    /// The `domain` column of `ingestion_ref_audit` (§2).
    fn domain(self) -> &'static str {
        match self {
            RefKind::Payer => "payer",
            RefKind::Provider => "provider",
            RefKind::Facility => "facility",
            RefKind::Clinician => "clinician",
            RefKind::ActivityCode => "activity_code",
            RefKind::DiagnosisCode => "diagnosis_code",
            RefKind::DenialCode => "denial_code",
        }
    }
}

/// Resolve `business_code` to its surrogate id, auto-inserting a
/// `source='SYSTEM'` row on first sight (§2). Returns `(id, newly_created)`.
/// Takes a concrete connection since it may issue a follow-up select
/// on the same connection when it loses the first-sight race.
///
/// Every call writes an `ingestion_ref_audit` row naming the file and
/// claim that triggered the resolution attempt, whether or not this
/// particular call won the first-sight insert (§4.6, §8).
pub async fn resolve_ref(
    conn: &mut sqlx::PgConnection,
    kind: RefKind,
    business_code: &str,
    ingestion_file_id: i64,
    claim_business_id: &str,
) -> Result<(i64, bool)> {
    let table = kind.table();

    let insert_sql = format!(
        "insert into {table} (business_code, source) values ($1, 'SYSTEM') \
         on conflict (business_code) do nothing returning id"
    );
    let inserted: Option<(i64,)> = sqlx::query_as(&insert_sql)
        .bind(business_code)
        .fetch_optional(&mut *conn)
        .await
        .with_context(|| format!("resolve_ref insert into {table} failed"))?;

    let (id, created) = if let Some((id,)) = inserted {
        (id, true)
    } else {
        let select_sql = format!("select id from {table} where business_code = $1");
        let (id,): (i64,) = sqlx::query_as(&select_sql)
            .bind(business_code)
            .fetch_one(&mut *conn)
            .await
            .with_context(|| format!("resolve_ref select from {table} failed"))?;
        (id, false)
    };

    sqlx::query(
        r#"
        insert into ingestion_ref_audit (ingestion_file_id, claim_business_id, domain, business_code)
        values ($1, $2, $3, $4)
        "#,
    )
    .bind(ingestion_file_id)
    .bind(claim_business_id)
    .bind(kind.domain())
    .bind(business_code)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("resolve_ref audit insert for {table} failed"))?;

    Ok((id, created))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_match_migration() {
        assert_eq!(RefKind::Payer.table(), "ref_payer");
        assert_eq!(RefKind::DenialCode.table(), "ref_denial_code");
    }
}
