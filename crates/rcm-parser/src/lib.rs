//! rcm-parser
//!
//! Streaming two-root XML parser for claim submissions and remittance
//! advices (§4). `quick-xml` gives us a non-validating, non-DTD-expanding
//! reader; [`xml_tree`] turns its event stream into a small generic tree,
//! and this module walks that tree into the [`rcm_schemas`] DTO graph.
//!
//! Parsing is two-tier: a document-level structural failure (unparsable
//! XML, unknown root, missing header) is fatal and aborts the whole
//! file. A per-record failure (a malformed claim, a bad amount) is
//! collected as a [`Problem`] and that one record is skipped — the rest
//! of the file still gets ingested (§4.3 occurrence-based tolerance).

mod timestamp;
mod xml_tree;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rcm_schemas::{
    ActivityDto, AttachmentDto, ClaimDto, DiagnosisDto, EncounterDto, Header, Money, ObservationDto,
    ParseOutcome, ParsedGraph, Problem, RemittanceActivityDto, RemittanceClaimDto, RemittanceDto,
    ResubmissionDto, RootType, Severity, Stage, SubmissionDto,
};
use sha2::{Digest, Sha256};
use timestamp::parse_timestamp;
pub use xml_tree::{parse_xml_tree, XmlNode, XmlTreeError};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    Xml(#[from] XmlTreeError),
    #[error("unrecognized root element {0:?}")]
    UnknownRoot(String),
}

/// Parse one file's bytes into a [`ParseOutcome`]. `max_attachment_bytes`
/// bounds attachment size: an oversized attachment is a fatal problem
/// for that claim, an empty one is a warning (§4.3).
pub fn parse_document(bytes: &[u8], file_id: &str, max_attachment_bytes: usize) -> Result<ParseOutcome, ParseError> {
    let tree = parse_xml_tree(bytes)?;
    let root_type = RootType::sniff(&tree.name).ok_or_else(|| ParseError::UnknownRoot(tree.name.clone()))?;

    let mut problems = Vec::new();
    let header = parse_header(&tree);

    let graph = match root_type {
        RootType::Submission => {
            let claims = tree
                .children_named("Claim")
                .filter_map(|c| parse_claim(c, file_id, max_attachment_bytes, &mut problems))
                .collect();
            ParsedGraph::Submission(SubmissionDto { header, claims })
        }
        RootType::Remittance => {
            let claims = tree
                .children_named("Claim")
                .filter_map(|c| parse_remittance_claim(c, file_id, &mut problems))
                .collect();
            ParsedGraph::Remittance(RemittanceDto { header, claims })
        }
    };

    let attachments = match &graph {
        ParsedGraph::Submission(s) => s.claims.iter().flat_map(|c| c.attachments.clone()).collect(),
        ParsedGraph::Remittance(_) => Vec::new(),
    };

    Ok(ParseOutcome {
        root_type,
        graph,
        problems,
        attachments,
    })
}

fn parse_header(tree: &XmlNode) -> Header {
    let Some(h) = tree.child("Header") else {
        return Header::default();
    };
    Header {
        sender_id: h.text_of("SenderID").map(str::to_string),
        receiver_id: h.text_of("ReceiverID").map(str::to_string),
        transaction_date: h.text_of("TransactionDate").and_then(parse_timestamp),
        record_count: h.text_of("RecordCount").and_then(|s| s.parse().ok()),
        disposition_flag: h.text_of("DispositionFlag").map(str::to_string),
    }
}

fn parse_money(node: &XmlNode, field: &str, claim_id: &str, problems: &mut Vec<Problem>) -> Option<Money> {
    let raw = node.text_of(field)?;
    match Money::parse(raw) {
        Ok(m) => Some(m),
        Err(e) => {
            problems.push(
                Problem::claim(Stage::Record, claim_id, "BAD_AMOUNT", format!("{field}: {e}"))
                    .with_severity(Severity::Warning),
            );
            None
        }
    }
}

fn parse_claim(
    node: &XmlNode,
    file_id: &str,
    max_attachment_bytes: usize,
    problems: &mut Vec<Problem>,
) -> Option<ClaimDto> {
    let id = match node.text_of("ID") {
        Some(id) => id.to_string(),
        None => {
            problems.push(Problem::file(Stage::Record, file_id, "CLAIM_MISSING_ID", "claim has no ID element"));
            return None;
        }
    };

    let gross = parse_money(node, "Gross", &id, problems);
    let patient_share = parse_money(node, "PatientShare", &id, problems);
    let net = parse_money(node, "Net", &id, problems);

    let encounter = node.child("Encounter").map(|e| EncounterDto {
        facility_id: e.text_of("FacilityID").map(str::to_string),
        patient_id: e.text_of("PatientID").map(str::to_string),
        start: e.text_of("Start").and_then(parse_timestamp),
        end: e.text_of("End").and_then(parse_timestamp),
        transfer_source: e.text_of("TransferSource").map(str::to_string),
        transfer_destination: e.text_of("TransferDestination").map(str::to_string),
    });

    let diagnoses = node
        .children_named("Diagnosis")
        .filter_map(|d| {
            let dtype = d.text_of("Type")?.to_string();
            let code = d.text_of("Code")?.to_string();
            Some(DiagnosisDto { dtype, code })
        })
        .collect();

    let activities = node
        .children_named("Activity")
        .filter_map(|a| parse_activity(a, &id, problems))
        .collect();

    let mut attachments = Vec::new();

    // Primary submission-path attachment, directly under Claim: oversize is
    // fatal, empty is a warning, bad base64 is fatal (§4.3).
    if let Some(att_node) = node.child("Attachment") {
        if let Some(att) = parse_attachment(att_node.text.trim(), &id, max_attachment_bytes, problems, true) {
            attachments.push(att);
        }
    }

    let resubmission = node.child("Resubmission").map(|r| {
        // Resubmission attachments are lenient: bad base64 is a warning,
        // never fatal (§4.3).
        if let Some(att_node) = r.child("Attachment") {
            if let Some(att) = parse_attachment(att_node.text.trim(), &id, max_attachment_bytes, problems, false) {
                attachments.push(att);
            }
        }
        ResubmissionDto {
            rtype: r.text_of("Type").unwrap_or_default().to_string(),
            comment: r.text_of("Comment").map(str::to_string),
            attachment: None,
        }
    });

    Some(ClaimDto {
        id,
        payer_id: node.text_of("PayerID").map(str::to_string),
        provider_id: node.text_of("ProviderID").map(str::to_string),
        emirates_id_number: node.text_of("EmiratesIDNumber").map(str::to_string),
        member_id: node.text_of("MemberID").map(str::to_string),
        gross,
        patient_share,
        net,
        comments: node.text_of("Comments").map(str::to_string),
        contract_package_name: node.text_of("ContractPackageName").map(str::to_string),
        encounter,
        diagnoses,
        activities,
        resubmission,
        attachments,
    })
}

/// Decodes one attachment's base64 text. `strict` governs only the severity
/// of a base64 decode failure: fatal for the primary Claim-level attachment,
/// a warning for the lenient Resubmission/Observation paths (§4.3). Size and
/// emptiness rules are the same either way.
fn parse_attachment(
    base64_text: &str,
    claim_id: &str,
    max_attachment_bytes: usize,
    problems: &mut Vec<Problem>,
    strict: bool,
) -> Option<AttachmentDto> {
    if base64_text.is_empty() {
        problems.push(
            Problem::claim(Stage::Record, claim_id, "ATTACHMENT_EMPTY", "attachment element present but empty")
                .with_severity(Severity::Warning),
        );
        return None;
    }

    let bytes = match BASE64.decode(base64_text) {
        Ok(b) => b,
        Err(e) => {
            let problem = Problem::claim(Stage::Record, claim_id, "ATTACHMENT_BAD_BASE64", e.to_string());
            problems.push(if strict { problem } else { problem.with_severity(Severity::Warning) });
            return None;
        }
    };

    if bytes.len() > max_attachment_bytes {
        problems.push(Problem::claim(
            Stage::Record,
            claim_id,
            "ATTACHMENT_TOO_LARGE",
            format!("{} bytes exceeds limit {}", bytes.len(), max_attachment_bytes),
        ));
        return None;
    }

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256_hex = hex::encode(hasher.finalize());

    Some(AttachmentDto {
        file_name: format!("{claim_id}.attachment"),
        size_bytes: bytes.len(),
        bytes,
        sha256_hex,
    })
}

fn parse_activity(node: &XmlNode, claim_id: &str, problems: &mut Vec<Problem>) -> Option<ActivityDto> {
    let id = node.text_of("ID")?.to_string();
    let observations = node
        .children_named("Observation")
        .map(|o| ObservationDto {
            otype: o.text_of("Type").map(str::to_string),
            code: o.text_of("Code").map(str::to_string),
            value: o.text_of("Value").map(str::to_string),
            value_type: o.text_of("ValueType").map(str::to_string),
        })
        .collect();

    Some(ActivityDto {
        id,
        start: node.text_of("Start").and_then(parse_timestamp),
        atype: node.text_of("Type").map(str::to_string),
        code: node.text_of("Code").map(str::to_string),
        quantity: parse_money(node, "Quantity", claim_id, problems),
        net: parse_money(node, "Net", claim_id, problems),
        clinician: node.text_of("Clinician").map(str::to_string),
        prior_authorization_id: node.text_of("PriorAuthorizationID").map(str::to_string),
        observations,
    })
}

fn parse_remittance_claim(node: &XmlNode, file_id: &str, problems: &mut Vec<Problem>) -> Option<RemittanceClaimDto> {
    let id = match node.text_of("ID") {
        Some(id) => id.to_string(),
        None => {
            problems.push(Problem::file(Stage::Record, file_id, "CLAIM_MISSING_ID", "remittance claim has no ID"));
            return None;
        }
    };

    let activities = node
        .children_named("Activity")
        .filter_map(|a| parse_remittance_activity(a, &id, problems))
        .collect();

    Some(RemittanceClaimDto {
        id: id.clone(),
        id_payer: node.text_of("IDPayer").map(str::to_string),
        provider_id: node.text_of("ProviderID").map(str::to_string),
        denial_code: node.text_of("DenialCode").map(str::to_string),
        payment_reference: node.text_of("PaymentReference").map(str::to_string),
        date_settlement: node.text_of("DateSettlement").and_then(parse_timestamp),
        facility_id: node.text_of("FacilityID").map(str::to_string),
        comment: node.text_of("Comment").map(str::to_string),
        activities,
    })
}

fn parse_remittance_activity(
    node: &XmlNode,
    claim_id: &str,
    problems: &mut Vec<Problem>,
) -> Option<RemittanceActivityDto> {
    let id = node.text_of("ID")?.to_string();
    Some(RemittanceActivityDto {
        id,
        start: node.text_of("Start").and_then(parse_timestamp),
        atype: node.text_of("Type").map(str::to_string),
        code: node.text_of("Code").map(str::to_string),
        quantity: parse_money(node, "Quantity", claim_id, problems),
        net: parse_money(node, "Net", claim_id, problems),
        list_price: parse_money(node, "ListPrice", claim_id, problems),
        gross: parse_money(node, "Gross", claim_id, problems),
        patient_share: parse_money(node, "PatientShare", claim_id, problems),
        payment_amount: parse_money(node, "PaymentAmount", claim_id, problems),
        denial_code: node.text_of("DenialCode").map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUBMISSION: &str = r#"
        <Claim.Submission>
            <Header>
                <SenderID>PAYER1</SenderID>
                <ReceiverID>PROV1</ReceiverID>
                <TransactionDate>05/03/2026 10:00</TransactionDate>
                <RecordCount>1</RecordCount>
            </Header>
            <Claim>
                <ID>CLM-1</ID>
                <PayerID>PAYER1</PayerID>
                <ProviderID>PROV1</ProviderID>
                <Gross>100.00</Gross>
                <PatientShare>10.00</PatientShare>
                <Net>90.00</Net>
                <Activity>
                    <ID>ACT-1</ID>
                    <Net>90.00</Net>
                </Activity>
            </Claim>
        </Claim.Submission>
    "#;

    #[test]
    fn parses_minimal_submission() {
        let outcome = parse_document(SUBMISSION.as_bytes(), "F1", 1024).unwrap();
        assert_eq!(outcome.root_type, RootType::Submission);
        let ParsedGraph::Submission(s) = &outcome.graph else {
            panic!("expected submission graph");
        };
        assert_eq!(s.header.record_count, Some(1));
        assert_eq!(s.claims.len(), 1);
        assert_eq!(s.claims[0].net.unwrap().cents(), 9000);
        assert!(outcome.problems.is_empty());
    }

    #[test]
    fn claim_without_id_is_skipped_not_fatal() {
        let xml = r#"
            <Claim.Submission>
                <Header><RecordCount>1</RecordCount></Header>
                <Claim><Gross>10.00</Gross></Claim>
            </Claim.Submission>
        "#;
        let outcome = parse_document(xml.as_bytes(), "F2", 1024).unwrap();
        let ParsedGraph::Submission(s) = &outcome.graph else {
            panic!("expected submission graph");
        };
        assert!(s.claims.is_empty());
        assert_eq!(outcome.problems.len(), 1);
        assert_eq!(outcome.problems[0].code, "CLAIM_MISSING_ID");
    }

    #[test]
    fn unknown_root_is_rejected() {
        let err = parse_document(b"<Something/>", "F3", 1024).unwrap_err();
        assert!(matches!(err, ParseError::UnknownRoot(_)));
    }

    #[test]
    fn remittance_root_sniffed() {
        let xml = r#"
            <Remittance.Advice>
                <Header><RecordCount>1</RecordCount></Header>
                <Claim>
                    <ID>CLM-1</ID>
                    <IDPayer>PAYER1</IDPayer>
                    <Activity><ID>ACT-1</ID><PaymentAmount>50.00</PaymentAmount></Activity>
                </Claim>
            </Remittance.Advice>
        "#;
        let outcome = parse_document(xml.as_bytes(), "F4", 1024).unwrap();
        assert_eq!(outcome.root_type, RootType::Remittance);
    }
}
