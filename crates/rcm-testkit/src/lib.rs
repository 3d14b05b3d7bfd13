//! rcm-testkit
//!
//! DB-backed test fixtures: a migrated-pool-or-skip helper (connect,
//! migrate, and skip with a message rather than fail when no test
//! database is configured) plus small XML builders for the
//! submission/remittance shapes `rcm-parser` understands, so scenario
//! tests don't hand-roll XML string literals inline.

use sqlx::PgPool;

/// Connects and migrates against `RCM_DATABASE_URL`, or returns `None`
/// with a `SKIP:` message when the variable isn't set. Scenario tests
/// call this first and return early on `None` rather than failing in
/// environments with no test database wired up.
pub async fn migrated_pool_or_skip() -> Option<PgPool> {
    let url = match std::env::var(rcm_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: {} not set", rcm_db::ENV_DB_URL);
            return None;
        }
    };
    let pool = rcm_db::connect(&url).await.expect("connect to test database");
    rcm_db::migrate(&pool).await.expect("migrate test database");
    Some(pool)
}

/// Minimal single-claim, single-activity submission (§8 scenario 1).
/// `resubmission` appends a `<Resubmission>` block when set, the sole
/// disambiguator the duplicate-submission rule keys off (§9).
pub fn submission_xml(
    claim_id: &str,
    payer_id: &str,
    provider_id: &str,
    activity_id: &str,
    net: &str,
    resubmission: Option<(&str, &str)>,
) -> String {
    let resub = match resubmission {
        Some((rtype, comment)) => format!("<Resubmission><Type>{rtype}</Type><Comment>{comment}</Comment></Resubmission>"),
        None => String::new(),
    };
    format!(
        r#"
        <Claim.Submission>
            <Header>
                <SenderID>{payer_id}</SenderID>
                <ReceiverID>{provider_id}</ReceiverID>
                <TransactionDate>05/03/2026 10:00</TransactionDate>
                <RecordCount>1</RecordCount>
            </Header>
            <Claim>
                <ID>{claim_id}</ID>
                <PayerID>{payer_id}</PayerID>
                <ProviderID>{provider_id}</ProviderID>
                <EmiratesIDNumber>784-0000-0000000-0</EmiratesIDNumber>
                <Gross>{net}</Gross>
                <PatientShare>0.00</PatientShare>
                <Net>{net}</Net>
                {resub}
                <Activity>
                    <ID>{activity_id}</ID>
                    <Net>{net}</Net>
                </Activity>
            </Claim>
        </Claim.Submission>
        "#
    )
}

/// Single-claim, single-activity remittance (§8 scenarios 4-6).
/// `denial_code` is set on the activity, the level `remittance_claim_totals`
/// reads to decide `all_denied` (§4.4).
pub fn remittance_xml(
    claim_id: &str,
    payer_id: &str,
    provider_id: &str,
    activity_id: &str,
    net: &str,
    payment_amount: &str,
    denial_code: Option<&str>,
) -> String {
    let denial = match denial_code {
        Some(code) => format!("<DenialCode>{code}</DenialCode>"),
        None => String::new(),
    };
    format!(
        r#"
        <Remittance.Advice>
            <Header>
                <SenderID>{payer_id}</SenderID>
                <ReceiverID>{provider_id}</ReceiverID>
                <TransactionDate>06/03/2026 10:00</TransactionDate>
                <RecordCount>1</RecordCount>
            </Header>
            <Claim>
                <ID>{claim_id}</ID>
                <IDPayer>{payer_id}</IDPayer>
                <ProviderID>{provider_id}</ProviderID>
                <PaymentReference>REF-{claim_id}</PaymentReference>
                <Activity>
                    <ID>{activity_id}</ID>
                    <Net>{net}</Net>
                    <PaymentAmount>{payment_amount}</PaymentAmount>
                    {denial}
                </Activity>
            </Claim>
        </Remittance.Advice>
        "#
    )
}
