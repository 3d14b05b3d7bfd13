use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rcm_schemas::ClaimStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Resolve (or create) the business claim key. Unique on
/// `business_claim_id` alone (§3 Invariant 1, §6) — payer/provider are
/// attributes of the `Claim` row, not part of its identity.
/// Takes a concrete connection (rather than a generic executor) because
/// it issues two sequential statements against the same connection —
/// the insert-or-ignore, then the select if it lost the race.
pub async fn resolve_claim_key(conn: &mut sqlx::PgConnection, business_claim_id: &str) -> Result<i64> {
    let inserted: Option<(i64,)> = sqlx::query_as(
        r#"
        insert into claim_key (business_claim_id)
        values ($1)
        on conflict (business_claim_id) do nothing
        returning id
        "#,
    )
    .bind(business_claim_id)
    .fetch_optional(&mut *conn)
    .await
    .context("resolve_claim_key insert failed")?;

    if let Some((id,)) = inserted {
        return Ok(id);
    }

    let (id,): (i64,) = sqlx::query_as("select id from claim_key where business_claim_id = $1")
        .bind(business_claim_id)
        .fetch_one(&mut *conn)
        .await
        .context("resolve_claim_key select failed")?;

    Ok(id)
}

/// Select-only lookup, used by the duplicate-submission guard (§4.4 step
/// 2) and remittance matching before any write is attempted: a claim key
/// that doesn't exist yet can never be a duplicate or a known claim.
pub async fn find_claim_key(executor: impl sqlx::PgExecutor<'_>, business_claim_id: &str) -> Result<Option<i64>> {
    let row: Option<(i64,)> = sqlx::query_as("select id from claim_key where business_claim_id = $1")
        .bind(business_claim_id)
        .fetch_optional(executor)
        .await
        .context("find_claim_key failed")?;
    Ok(row.map(|r| r.0))
}

pub async fn find_claim_by_key(executor: impl sqlx::PgExecutor<'_>, claim_key_id: i64) -> Result<Option<i64>> {
    let row: Option<(i64,)> = sqlx::query_as("select id from claim where claim_key_id = $1")
        .bind(claim_key_id)
        .fetch_optional(executor)
        .await
        .context("find_claim_by_key failed")?;
    Ok(row.map(|r| r.0))
}

/// File-level idempotence shortcut (§4.2 step 6): a file whose
/// IngestionFile row already has at least one ClaimEvent against it has
/// already been persisted once, so the Pipeline Stage Controller skips
/// straight to verification/archival instead of reprocessing.
pub async fn file_has_claim_events(executor: impl sqlx::PgExecutor<'_>, ingestion_file_id: i64) -> Result<bool> {
    let (exists,): (bool,) =
        sqlx::query_as("select exists(select 1 from claim_event where ingestion_file_id = $1)")
            .bind(ingestion_file_id)
            .fetch_one(executor)
            .await
            .context("file_has_claim_events failed")?;
    Ok(exists)
}

pub async fn claim_event_exists(executor: impl sqlx::PgExecutor<'_>, claim_id: i64, event_type: rcm_schemas::EventType) -> Result<bool> {
    let (exists,): (bool,) = sqlx::query_as("select exists(select 1 from claim_event where claim_id = $1 and event_type = $2)")
        .bind(claim_id)
        .bind(event_type.as_code())
        .fetch_one(executor)
        .await
        .context("claim_event_exists failed")?;
    Ok(exists)
}

pub struct NewClaim<'a> {
    pub claim_key_id: i64,
    pub ingestion_file_id: i64,
    pub payer_ref_id: i64,
    pub provider_ref_id: i64,
    pub member_id: Option<&'a str>,
    pub emirates_id_number: Option<&'a str>,
    pub gross_cents: Option<i64>,
    pub patient_share_cents: Option<i64>,
    pub net_cents: Option<i64>,
    pub comments: Option<&'a str>,
    pub contract_package_name: Option<&'a str>,
    pub status: ClaimStatus,
}

#[derive(Debug, Clone)]
pub struct ClaimRow {
    pub id: i64,
    pub claim_key_id: i64,
    pub gross_cents: Option<i64>,
    pub patient_share_cents: Option<i64>,
    pub net_cents: Option<i64>,
    pub paid_cents: i64,
    pub status: i16,
    pub submission_count: i32,
}

/// Upsert a claim on `claim_key_id`. On conflict, bumps
/// `submission_count` and overwrites the mutable fields — this is the
/// resubmission path. Uses `xmax = 0` to distinguish insert from update
/// without a second round trip.
pub async fn upsert_claim(executor: impl sqlx::PgExecutor<'_>, claim: &NewClaim<'_>) -> Result<(i64, UpsertOutcome)> {
    let row: (i64, bool) = sqlx::query_as(
        r#"
        insert into claim
            (claim_key_id, ingestion_file_id, payer_ref_id, provider_ref_id, member_id,
             emirates_id_number, gross_cents, patient_share_cents, net_cents, comments,
             contract_package_name, status, submission_count, updated_at_utc)
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 1, now())
        on conflict (claim_key_id) do update
           set ingestion_file_id = excluded.ingestion_file_id,
               payer_ref_id = excluded.payer_ref_id,
               provider_ref_id = excluded.provider_ref_id,
               member_id = excluded.member_id,
               emirates_id_number = excluded.emirates_id_number,
               gross_cents = excluded.gross_cents,
               patient_share_cents = excluded.patient_share_cents,
               net_cents = excluded.net_cents,
               comments = excluded.comments,
               contract_package_name = excluded.contract_package_name,
               status = excluded.status,
               submission_count = claim.submission_count + 1,
               updated_at_utc = now()
        returning id, (xmax = 0) as inserted
        "#,
    )
    .bind(claim.claim_key_id)
    .bind(claim.ingestion_file_id)
    .bind(claim.payer_ref_id)
    .bind(claim.provider_ref_id)
    .bind(claim.member_id)
    .bind(claim.emirates_id_number)
    .bind(claim.gross_cents)
    .bind(claim.patient_share_cents)
    .bind(claim.net_cents)
    .bind(claim.comments)
    .bind(claim.contract_package_name)
    .bind(claim.status.as_code())
    .fetch_one(executor)
    .await
    .context("upsert_claim failed")?;

    let outcome = if row.1 {
        UpsertOutcome::Inserted
    } else {
        UpsertOutcome::Updated
    };
    Ok((row.0, outcome))
}

pub async fn fetch_claim(executor: impl sqlx::PgExecutor<'_>, claim_id: i64) -> Result<ClaimRow> {
    let row: (i64, i64, Option<i64>, Option<i64>, Option<i64>, i64, i16, i32) = sqlx::query_as(
        r#"
        select id, claim_key_id, gross_cents, patient_share_cents, net_cents,
               paid_cents, status, submission_count
          from claim
         where id = $1
        "#,
    )
    .bind(claim_id)
    .fetch_one(executor)
    .await
    .context("fetch_claim failed")?;

    Ok(ClaimRow {
        id: row.0,
        claim_key_id: row.1,
        gross_cents: row.2,
        patient_share_cents: row.3,
        net_cents: row.4,
        paid_cents: row.5,
        status: row.6,
        submission_count: row.7,
    })
}

pub async fn set_claim_status(executor: impl sqlx::PgExecutor<'_>, claim_id: i64, status: ClaimStatus, paid_cents: i64) -> Result<()> {
    sqlx::query("update claim set status = $2, paid_cents = $3, updated_at_utc = now() where id = $1")
        .bind(claim_id)
        .bind(status.as_code())
        .bind(paid_cents)
        .execute(executor)
        .await
        .context("set_claim_status failed")?;
    Ok(())
}

pub async fn upsert_encounter(
    executor: impl sqlx::PgExecutor<'_>,
    claim_id: i64,
    facility_ref_id: Option<i64>,
    patient_id: Option<&str>,
    start_at_utc: Option<DateTime<Utc>>,
    end_at_utc: Option<DateTime<Utc>>,
    transfer_source: Option<&str>,
    transfer_destination: Option<&str>,
) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        insert into encounter
            (claim_id, facility_ref_id, patient_id, start_at_utc, end_at_utc,
             transfer_source, transfer_destination)
        values ($1, $2, $3, $4, $5, $6, $7)
        on conflict (claim_id) do update
           set facility_ref_id = excluded.facility_ref_id,
               patient_id = excluded.patient_id,
               start_at_utc = excluded.start_at_utc,
               end_at_utc = excluded.end_at_utc,
               transfer_source = excluded.transfer_source,
               transfer_destination = excluded.transfer_destination
        returning id
        "#,
    )
    .bind(claim_id)
    .bind(facility_ref_id)
    .bind(patient_id)
    .bind(start_at_utc)
    .bind(end_at_utc)
    .bind(transfer_source)
    .bind(transfer_destination)
    .fetch_one(executor)
    .await
    .context("upsert_encounter failed")?;
    Ok(id)
}

pub async fn upsert_diagnosis(
    conn: &mut sqlx::PgConnection,
    claim_id: i64,
    diagnosis_type: &str,
    ref_diagnosis_code_id: i64,
) -> Result<i64> {
    let inserted: Option<(i64,)> = sqlx::query_as(
        r#"
        insert into diagnosis (claim_id, diagnosis_type, ref_diagnosis_code_id)
        values ($1, $2, $3)
        on conflict (claim_id, diagnosis_type, ref_diagnosis_code_id) do nothing
        returning id
        "#,
    )
    .bind(claim_id)
    .bind(diagnosis_type)
    .bind(ref_diagnosis_code_id)
    .fetch_optional(&mut *conn)
    .await
    .context("upsert_diagnosis failed")?;

    if let Some((id,)) = inserted {
        return Ok(id);
    }

    let (id,): (i64,) = sqlx::query_as(
        "select id from diagnosis where claim_id = $1 and diagnosis_type = $2 and ref_diagnosis_code_id = $3",
    )
    .bind(claim_id)
    .bind(diagnosis_type)
    .bind(ref_diagnosis_code_id)
    .fetch_one(&mut *conn)
    .await
    .context("upsert_diagnosis select failed")?;
    Ok(id)
}

pub struct NewActivity<'a> {
    pub claim_id: i64,
    pub business_activity_id: &'a str,
    pub start_at_utc: Option<DateTime<Utc>>,
    pub activity_type: Option<&'a str>,
    pub ref_activity_code_id: Option<i64>,
    pub quantity_cents: Option<i64>,
    pub net_cents: Option<i64>,
    pub clinician_ref_id: Option<i64>,
    pub prior_authorization_id: Option<&'a str>,
}

pub async fn upsert_activity(executor: impl sqlx::PgExecutor<'_>, activity: &NewActivity<'_>) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        insert into activity
            (claim_id, business_activity_id, start_at_utc, activity_type,
             ref_activity_code_id, quantity_cents, net_cents, clinician_ref_id,
             prior_authorization_id)
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        on conflict (claim_id, business_activity_id) do update
           set start_at_utc = excluded.start_at_utc,
               activity_type = excluded.activity_type,
               ref_activity_code_id = excluded.ref_activity_code_id,
               quantity_cents = excluded.quantity_cents,
               net_cents = excluded.net_cents,
               clinician_ref_id = excluded.clinician_ref_id,
               prior_authorization_id = excluded.prior_authorization_id
        returning id
        "#,
    )
    .bind(activity.claim_id)
    .bind(activity.business_activity_id)
    .bind(activity.start_at_utc)
    .bind(activity.activity_type)
    .bind(activity.ref_activity_code_id)
    .bind(activity.quantity_cents)
    .bind(activity.net_cents)
    .bind(activity.clinician_ref_id)
    .bind(activity.prior_authorization_id)
    .fetch_one(executor)
    .await
    .context("upsert_activity failed")?;
    Ok(id)
}

pub async fn insert_observation(
    executor: impl sqlx::PgExecutor<'_>,
    activity_id: i64,
    observation_type: Option<&str>,
    code: Option<&str>,
    value: Option<&str>,
    value_type: Option<&str>,
) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        insert into observation (activity_id, observation_type, code, value, value_type)
        values ($1, $2, $3, $4, $5)
        returning id
        "#,
    )
    .bind(activity_id)
    .bind(observation_type)
    .bind(code)
    .bind(value)
    .bind(value_type)
    .fetch_one(executor)
    .await
    .context("insert_observation failed")?;
    Ok(id)
}

pub async fn insert_resubmission(
    executor: impl sqlx::PgExecutor<'_>,
    claim_id: i64,
    resubmission_type: &str,
    comment: Option<&str>,
) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        insert into claim_resubmission (claim_id, resubmission_type, comment)
        values ($1, $2, $3)
        returning id
        "#,
    )
    .bind(claim_id)
    .bind(resubmission_type)
    .bind(comment)
    .fetch_one(executor)
    .await
    .context("insert_resubmission failed")?;
    Ok(id)
}

/// Upsert keyed by (claim_event, file_name) — the type-1 event id stands
/// in for the spec's (ClaimKey, ClaimEventId) pair since the event
/// already pins the claim (§4.4 step 10).
pub async fn upsert_attachment(
    executor: impl sqlx::PgExecutor<'_>,
    claim_id: i64,
    claim_event_id: i64,
    resubmission_id: Option<i64>,
    file_name: &str,
    size_bytes: i64,
    sha256_hex: &str,
    bytes: &[u8],
) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        insert into claim_attachment
            (claim_id, claim_event_id, resubmission_id, file_name, size_bytes, sha256_hex, bytes)
        values ($1, $2, $3, $4, $5, $6, $7)
        on conflict (claim_event_id, file_name) do update
           set resubmission_id = excluded.resubmission_id,
               size_bytes = excluded.size_bytes,
               sha256_hex = excluded.sha256_hex,
               bytes = excluded.bytes
        returning id
        "#,
    )
    .bind(claim_id)
    .bind(claim_event_id)
    .bind(resubmission_id)
    .bind(file_name)
    .bind(size_bytes)
    .bind(sha256_hex)
    .bind(bytes)
    .fetch_one(executor)
    .await
    .context("upsert_attachment failed")?;
    Ok(id)
}

/// Idempotent on (claim, event_type, event_time) — a retried submission
/// for the same header transaction date returns the original event's
/// id rather than creating a duplicate (§4.4 step 6).
pub async fn upsert_claim_event(
    conn: &mut sqlx::PgConnection,
    claim_id: i64,
    ingestion_file_id: i64,
    event_type: rcm_schemas::EventType,
    event_time: DateTime<Utc>,
) -> Result<i64> {
    let inserted: Option<(i64,)> = sqlx::query_as(
        r#"
        insert into claim_event (claim_id, ingestion_file_id, event_type, occurred_at_utc)
        values ($1, $2, $3, $4)
        on conflict (claim_id, event_type, occurred_at_utc) do nothing
        returning id
        "#,
    )
    .bind(claim_id)
    .bind(ingestion_file_id)
    .bind(event_type.as_code())
    .bind(event_time)
    .fetch_optional(&mut *conn)
    .await
    .context("upsert_claim_event insert failed")?;

    if let Some((id,)) = inserted {
        return Ok(id);
    }

    let (id,): (i64,) = sqlx::query_as(
        "select id from claim_event where claim_id = $1 and event_type = $2 and occurred_at_utc = $3",
    )
    .bind(claim_id)
    .bind(event_type.as_code())
    .bind(event_time)
    .fetch_one(&mut *conn)
    .await
    .context("upsert_claim_event select failed")?;
    Ok(id)
}

pub async fn link_event_activity(executor: impl sqlx::PgExecutor<'_>, claim_event_id: i64, activity_id: i64) -> Result<()> {
    sqlx::query("insert into claim_event_activity (claim_event_id, activity_id) values ($1, $2)")
        .bind(claim_event_id)
        .bind(activity_id)
        .execute(executor)
        .await
        .context("link_event_activity failed")?;
    Ok(())
}

pub async fn link_event_observation(executor: impl sqlx::PgExecutor<'_>, claim_event_id: i64, observation_id: i64) -> Result<()> {
    sqlx::query("insert into event_observation (claim_event_id, observation_id) values ($1, $2)")
        .bind(claim_event_id)
        .bind(observation_id)
        .execute(executor)
        .await
        .context("link_event_observation failed")?;
    Ok(())
}

pub async fn insert_status_timeline(
    executor: impl sqlx::PgExecutor<'_>,
    claim_id: i64,
    status: ClaimStatus,
    reason: Option<&str>,
) -> Result<()> {
    sqlx::query("insert into claim_status_timeline (claim_id, status, reason) values ($1, $2, $3)")
        .bind(claim_id)
        .bind(status.as_code())
        .bind(reason)
        .execute(executor)
        .await
        .context("insert_status_timeline failed")?;
    Ok(())
}

/// Pure status arithmetic (§4.4 step 7): PAID requires exact equality
/// between what was paid and what was requested, not merely "enough".
/// Every other combination — including overpayment, which the spec
/// does not special-case — falls through to the conservative
/// PARTIALLY_PAID default rather than being inferred as PAID.
pub fn compute_claim_status(net_requested_cents: i64, paid_amount_cents: i64, all_denied: bool) -> ClaimStatus {
    if paid_amount_cents == net_requested_cents && net_requested_cents >= 0 {
        ClaimStatus::Paid
    } else if paid_amount_cents > 0 && paid_amount_cents < net_requested_cents {
        ClaimStatus::PartiallyPaid
    } else if paid_amount_cents == 0 && all_denied {
        ClaimStatus::Rejected
    } else {
        ClaimStatus::PartiallyPaid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_payment_is_paid() {
        assert_eq!(compute_claim_status(10_000, 10_000, false), ClaimStatus::Paid);
    }

    #[test]
    fn zero_net_zero_paid_is_paid() {
        assert_eq!(compute_claim_status(0, 0, false), ClaimStatus::Paid);
    }

    #[test]
    fn overpayment_falls_back_to_partially_paid() {
        assert_eq!(compute_claim_status(10_000, 10_500, false), ClaimStatus::PartiallyPaid);
    }

    #[test]
    fn partial_payment_without_denial_is_partially_paid() {
        assert_eq!(compute_claim_status(10_000, 1, false), ClaimStatus::PartiallyPaid);
    }

    #[test]
    fn zero_payment_with_all_denied_is_rejected() {
        assert_eq!(compute_claim_status(10_000, 0, true), ClaimStatus::Rejected);
    }

    #[test]
    fn zero_payment_not_all_denied_is_partially_paid_conservative() {
        assert_eq!(compute_claim_status(10_000, 0, false), ClaimStatus::PartiallyPaid);
    }
}
