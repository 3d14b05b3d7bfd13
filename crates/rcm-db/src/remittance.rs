use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

/// Upsert keyed by (IngestionFile, Claim) — the remittance file stands
/// in for the spec's RemittanceId (§4.4 remittance path step 3).
pub async fn upsert_remittance_claim(
    executor: impl sqlx::PgExecutor<'_>,
    claim_id: i64,
    ingestion_file_id: i64,
    id_payer: Option<&str>,
    denial_ref_id: Option<i64>,
    payment_reference: Option<&str>,
    settlement_at_utc: Option<DateTime<Utc>>,
    comment: Option<&str>,
) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        insert into remittance_claim
            (claim_id, ingestion_file_id, id_payer, denial_ref_id,
             payment_reference, settlement_at_utc, comment)
        values ($1, $2, $3, $4, $5, $6, $7)
        on conflict (ingestion_file_id, claim_id) do update
           set id_payer = excluded.id_payer,
               denial_ref_id = excluded.denial_ref_id,
               payment_reference = excluded.payment_reference,
               settlement_at_utc = excluded.settlement_at_utc,
               comment = excluded.comment
        returning id
        "#,
    )
    .bind(claim_id)
    .bind(ingestion_file_id)
    .bind(id_payer)
    .bind(denial_ref_id)
    .bind(payment_reference)
    .bind(settlement_at_utc)
    .bind(comment)
    .fetch_one(executor)
    .await
    .context("upsert_remittance_claim failed")?;
    Ok(id)
}

pub struct NewRemittanceActivity<'a> {
    pub remittance_claim_id: i64,
    pub business_activity_id: &'a str,
    pub start_at_utc: Option<DateTime<Utc>>,
    pub activity_type: Option<&'a str>,
    pub ref_activity_code_id: Option<i64>,
    pub quantity_cents: Option<i64>,
    pub net_cents: Option<i64>,
    pub list_price_cents: Option<i64>,
    pub gross_cents: Option<i64>,
    pub patient_share_cents: Option<i64>,
    pub payment_amount_cents: i64,
    pub denial_ref_id: Option<i64>,
}

pub async fn upsert_remittance_activity(executor: impl sqlx::PgExecutor<'_>, a: &NewRemittanceActivity<'_>) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        insert into remittance_activity
            (remittance_claim_id, business_activity_id, start_at_utc, activity_type,
             ref_activity_code_id, quantity_cents, net_cents, list_price_cents,
             gross_cents, patient_share_cents, payment_amount_cents, denial_ref_id)
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        on conflict (remittance_claim_id, business_activity_id) do update
           set payment_amount_cents = excluded.payment_amount_cents,
               denial_ref_id = excluded.denial_ref_id
        returning id
        "#,
    )
    .bind(a.remittance_claim_id)
    .bind(a.business_activity_id)
    .bind(a.start_at_utc)
    .bind(a.activity_type)
    .bind(a.ref_activity_code_id)
    .bind(a.quantity_cents)
    .bind(a.net_cents)
    .bind(a.list_price_cents)
    .bind(a.gross_cents)
    .bind(a.patient_share_cents)
    .bind(a.payment_amount_cents)
    .bind(a.denial_ref_id)
    .fetch_one(executor)
    .await
    .context("upsert_remittance_activity failed")?;
    Ok(id)
}

/// Net requested on the submission side for this claim (§4.4 step 7:
/// `netRequested = Σ submission.activity.net`).
pub async fn net_requested_for_claim(executor: impl sqlx::PgExecutor<'_>, claim_id: i64) -> Result<i64> {
    let (net,): (Option<i64>,) = sqlx::query_as("select sum(net_cents) from activity where claim_id = $1")
        .bind(claim_id)
        .fetch_one(executor)
        .await
        .context("net_requested_for_claim failed")?;
    Ok(net.unwrap_or(0))
}

/// Paid total and the `allDenied` predicate for one remittance claim
/// (§4.4 step 7): `allDenied` holds iff at least one activity is
/// present and every one of them carries a denial code with zero
/// payment.
pub async fn remittance_claim_totals(executor: impl sqlx::PgExecutor<'_>, remittance_claim_id: i64) -> Result<(i64, bool)> {
    let (paid, total, denied_zero): (Option<i64>, i64, i64) = sqlx::query_as(
        r#"
        select coalesce(sum(payment_amount_cents), 0),
               count(*),
               count(*) filter (where denial_ref_id is not null and payment_amount_cents = 0)
          from remittance_activity
         where remittance_claim_id = $1
        "#,
    )
    .bind(remittance_claim_id)
    .fetch_one(executor)
    .await
    .context("remittance_claim_totals failed")?;

    let all_denied = total > 0 && denied_zero == total;
    Ok((paid.unwrap_or(0), all_denied))
}
