//! Boundary behaviors called out in §8: the attachment size cap, the
//! `recordCount = 0` header rejection, and the zero-payment/no-denial
//! conservative default.

use rcm_audit::ErrorSink;
use rcm_config::IngestConfig;
use rcm_parser::parse_document;
use rcm_persistence::PersistenceEngine;
use rcm_pipeline::PipelineStage;
use rcm_schemas::ParsedGraph;
use rcm_source::{FetchedDocument, NoopAcker};
use rcm_testkit::{migrated_pool_or_skip, remittance_xml, submission_xml};
use std::sync::Arc;
use uuid::Uuid;

fn claim_with_attachment(resub_comment_bytes: &str) -> String {
    format!(
        r#"
        <Claim.Submission>
            <Header>
                <SenderID>PAYER-B1</SenderID>
                <ReceiverID>PROV-B1</ReceiverID>
                <TransactionDate>05/03/2026 10:00</TransactionDate>
                <RecordCount>1</RecordCount>
            </Header>
            <Claim>
                <ID>CB1</ID>
                <PayerID>PAYER-B1</PayerID>
                <ProviderID>PROV-B1</ProviderID>
                <EmiratesIDNumber>784-0000-0000000-0</EmiratesIDNumber>
                <Net>100.00</Net>
                <Resubmission>
                    <Type>correction</Type>
                    <Attachment>{resub_comment_bytes}</Attachment>
                </Resubmission>
                <Activity>
                    <ID>AB1</ID>
                    <Net>100.00</Net>
                </Activity>
            </Claim>
        </Claim.Submission>
        "#
    )
}

fn claim_with_primary_attachment(claim_comment_bytes: &str) -> String {
    format!(
        r#"
        <Claim.Submission>
            <Header>
                <SenderID>PAYER-B4</SenderID>
                <ReceiverID>PROV-B4</ReceiverID>
                <TransactionDate>05/03/2026 10:00</TransactionDate>
                <RecordCount>1</RecordCount>
            </Header>
            <Claim>
                <ID>CB4</ID>
                <PayerID>PAYER-B4</PayerID>
                <ProviderID>PROV-B4</ProviderID>
                <Net>100.00</Net>
                <Attachment>{claim_comment_bytes}</Attachment>
                <Activity>
                    <ID>AB4</ID>
                    <Net>100.00</Net>
                </Activity>
            </Claim>
        </Claim.Submission>
        "#
    )
}

#[test]
fn attachment_at_exact_cap_succeeds_one_byte_over_fails() {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;

    let max_bytes = 8usize;
    let at_cap = BASE64.encode([0u8; 8]);
    let over_cap = BASE64.encode([0u8; 9]);

    let xml_ok = claim_with_attachment(&at_cap);
    let outcome_ok = parse_document(xml_ok.as_bytes(), "F-ok", max_bytes).unwrap();
    let ParsedGraph::Submission(s) = &outcome_ok.graph else { panic!("expected submission") };
    assert_eq!(s.claims[0].attachments.len(), 1);
    assert!(outcome_ok.problems.iter().all(|p| p.code != "ATTACHMENT_TOO_LARGE"));

    let xml_over = claim_with_attachment(&over_cap);
    let outcome_over = parse_document(xml_over.as_bytes(), "F-over", max_bytes).unwrap();
    let ParsedGraph::Submission(s2) = &outcome_over.graph else { panic!("expected submission") };
    assert!(s2.claims[0].attachments.is_empty());
    assert!(outcome_over.problems.iter().any(|p| p.code == "ATTACHMENT_TOO_LARGE"));
}

#[test]
fn primary_claim_attachment_is_parsed_and_bad_base64_is_fatal() {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;

    let ok_xml = claim_with_primary_attachment(&BASE64.encode(b"scan.pdf"));
    let ok_outcome = parse_document(ok_xml.as_bytes(), "F-primary-ok", 1024).unwrap();
    let ParsedGraph::Submission(s) = &ok_outcome.graph else { panic!("expected submission") };
    assert_eq!(s.claims[0].attachments.len(), 1);
    assert!(ok_outcome.problems.is_empty());

    let bad_xml = claim_with_primary_attachment("not-valid-base64!!!");
    let bad_outcome = parse_document(bad_xml.as_bytes(), "F-primary-bad", 1024).unwrap();
    let ParsedGraph::Submission(s2) = &bad_outcome.graph else { panic!("expected submission") };
    assert!(s2.claims[0].attachments.is_empty());
    let problem = bad_outcome.problems.iter().find(|p| p.code == "ATTACHMENT_BAD_BASE64").unwrap();
    assert_eq!(problem.severity, rcm_schemas::Severity::Error, "bad base64 on the primary attachment is fatal");
}

#[test]
fn resubmission_attachment_bad_base64_is_a_warning_not_fatal() {
    let xml = claim_with_attachment("not-valid-base64!!!");
    let outcome = parse_document(xml.as_bytes(), "F-resub-bad", 1024).unwrap();
    let ParsedGraph::Submission(s) = &outcome.graph else { panic!("expected submission") };
    assert!(s.claims[0].attachments.is_empty());
    let problem = outcome.problems.iter().find(|p| p.code == "ATTACHMENT_BAD_BASE64").unwrap();
    assert_eq!(problem.severity, rcm_schemas::Severity::Warning, "bad base64 on a resubmission attachment is lenient");
}

#[tokio::test]
async fn record_count_zero_with_empty_claim_list_is_rejected_as_header_error() -> anyhow::Result<()> {
    let Some(pool) = migrated_pool_or_skip().await else { return Ok(()) };

    let xml = r#"
        <Claim.Submission>
            <Header>
                <SenderID>PAYER-B2</SenderID>
                <ReceiverID>PROV-B2</ReceiverID>
                <TransactionDate>05/03/2026 10:00</TransactionDate>
                <RecordCount>0</RecordCount>
            </Header>
        </Claim.Submission>
    "#;

    let mut config = IngestConfig::default();
    config.database_url = "unused-direct-pool".to_string();
    let stage = PipelineStage::new(pool.clone(), config, Arc::new(NoopAcker));

    let run_id = Uuid::new_v4();
    rcm_db::start_run(&pool, run_id, "CFG1").await?;
    let doc = FetchedDocument {
        file_id: "boundary-recordcount-zero.xml".to_string(),
        display_name: "boundary-recordcount-zero.xml".to_string(),
        source_path: None,
        bytes: xml.as_bytes().to_vec(),
        origin: "test".to_string(),
    };

    let outcome = stage.process_document(run_id, &doc).await?;
    assert_eq!(outcome.status, rcm_schemas::FileAuditStatus::Fail);
    assert_eq!(outcome.claims_persisted, 0);
    Ok(())
}

#[tokio::test]
async fn zero_payment_without_denial_is_partially_paid_not_rejected() -> anyhow::Result<()> {
    let Some(pool) = migrated_pool_or_skip().await else { return Ok(()) };
    let run_id = Uuid::new_v4();
    rcm_db::start_run(&pool, run_id, "CFG1").await?;
    let error_sink = ErrorSink::new(pool.clone());
    let persistence = PersistenceEngine::new(pool.clone());

    let sub_xml = submission_xml("CB3", "PAYER-B3", "PROV-B3", "AB3", "100.00", None);
    let (ingestion_file_id, _) =
        rcm_db::register_file(&pool, "boundary-sub.xml", "boundary-sub.xml", "deadbeef", sub_xml.as_bytes()).await?;
    let sub_outcome = parse_document(sub_xml.as_bytes(), "boundary-sub.xml", 1024).unwrap();
    let ParsedGraph::Submission(sub) = sub_outcome.graph else { panic!() };
    persistence.persist_submission(run_id, ingestion_file_id, &error_sink, &sub).await?;

    // Zero payment, no denial code at all: not all-denied, so the
    // conservative default applies (§8, §9) rather than REJECTED.
    let rem_xml = remittance_xml("CB3", "PAYER-B3", "PROV-B3", "AB3", "100.00", "0.00", None);
    let (rem_file_id, _) =
        rcm_db::register_file(&pool, "boundary-rem.xml", "boundary-rem.xml", "beefdead", rem_xml.as_bytes()).await?;
    let rem_outcome = parse_document(rem_xml.as_bytes(), "boundary-rem.xml", 1024).unwrap();
    let ParsedGraph::Remittance(rem) = rem_outcome.graph else { panic!() };
    persistence.persist_remittance(run_id, rem_file_id, &error_sink, &rem).await?;

    let claim_key_id = rcm_db::claim::find_claim_key(&pool, "CB3").await?.unwrap();
    let claim_id = rcm_db::claim::find_claim_by_key(&pool, claim_key_id).await?.unwrap();
    let row = rcm_db::claim::fetch_claim(&pool, claim_id).await?;
    assert_eq!(row.status, rcm_schemas::ClaimStatus::PartiallyPaid.as_code());
    Ok(())
}
