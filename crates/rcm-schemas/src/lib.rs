//! rcm-schemas
//!
//! Shared DTOs and wire/domain types for the claims ingestion pipeline:
//! the submission/remittance parse graph, status/event codes, and the
//! structured problem type threaded from the parser through to the error
//! sink. No I/O lives here — every other crate depends on this one.

mod money;

pub use money::Money;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Root element kind, sniffed from the first start tag (§4.2 step 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootType {
    Submission,
    Remittance,
}

impl RootType {
    pub fn as_code(self) -> i16 {
        match self {
            RootType::Submission => 1,
            RootType::Remittance => 2,
        }
    }

    pub fn local_name(self) -> &'static str {
        match self {
            RootType::Submission => "Claim.Submission",
            RootType::Remittance => "Remittance.Advice",
        }
    }

    pub fn sniff(local_name: &str) -> Option<Self> {
        match local_name {
            "Claim.Submission" => Some(RootType::Submission),
            "Remittance.Advice" => Some(RootType::Remittance),
            _ => None,
        }
    }
}

/// `ClaimEvent.type` (§3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Submitted = 1,
    Resubmitted = 2,
    Remittance = 3,
}

impl EventType {
    pub fn as_code(self) -> i16 {
        self as i16
    }
}

/// `ClaimStatusTimeline.status` (§3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimStatus {
    Submitted = 1,
    Resubmitted = 2,
    Paid = 3,
    PartiallyPaid = 4,
    Rejected = 5,
}

impl ClaimStatus {
    pub fn as_code(self) -> i16 {
        self as i16
    }
}

/// `IngestionFileAudit.status` (§3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileAuditStatus {
    Already = 0,
    Ok = 1,
    Fail = 2,
}

impl FileAuditStatus {
    pub fn as_code(self) -> i16 {
        self as i16
    }
}

/// Severity of a structured parse/validation/persistence problem (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Which pipeline stage raised a [`Problem`] (§4.3, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Structural,
    Header,
    Record,
    Reference,
    Persistence,
    Verification,
    Acknowledgment,
}

/// A structured problem surfaced by any stage, ultimately routed to the
/// error sink (§4.3 output contract, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub severity: Severity,
    pub stage: Stage,
    pub object_type: String,
    /// `FILE:<id>` for file-scoped problems, business claim id for claim-scoped ones.
    pub object_key: String,
    pub code: String,
    pub message: String,
    pub line: Option<u64>,
    pub column: Option<u64>,
}

impl Problem {
    pub fn file(stage: Stage, file_id: &str, code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            stage,
            object_type: "IngestionFile".to_string(),
            object_key: format!("FILE:{file_id}"),
            code: code.to_string(),
            message: message.into(),
            line: None,
            column: None,
        }
    }

    pub fn claim(stage: Stage, claim_id: &str, code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            stage,
            object_type: "Claim".to_string(),
            object_key: claim_id.to_string(),
            code: code.to_string(),
            message: message.into(),
            line: None,
            column: None,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn at(mut self, line: u64, column: u64) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }
}

// ---------------------------------------------------------------------------
// Header (shared by both roots)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Header {
    pub sender_id: Option<String>,
    pub receiver_id: Option<String>,
    pub transaction_date: Option<DateTime<Utc>>,
    pub record_count: Option<i64>,
    pub disposition_flag: Option<String>,
}

// ---------------------------------------------------------------------------
// Submission graph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionDto {
    pub header: Header,
    pub claims: Vec<ClaimDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimDto {
    pub id: String,
    pub payer_id: Option<String>,
    pub provider_id: Option<String>,
    pub emirates_id_number: Option<String>,
    pub member_id: Option<String>,
    pub gross: Option<Money>,
    pub patient_share: Option<Money>,
    pub net: Option<Money>,
    pub comments: Option<String>,
    pub contract_package_name: Option<String>,
    pub encounter: Option<EncounterDto>,
    pub diagnoses: Vec<DiagnosisDto>,
    pub activities: Vec<ActivityDto>,
    pub resubmission: Option<ResubmissionDto>,
    pub attachments: Vec<AttachmentDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncounterDto {
    pub facility_id: Option<String>,
    pub patient_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub transfer_source: Option<String>,
    pub transfer_destination: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisDto {
    pub dtype: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityDto {
    pub id: String,
    pub start: Option<DateTime<Utc>>,
    pub atype: Option<String>,
    pub code: Option<String>,
    pub quantity: Option<Money>,
    pub net: Option<Money>,
    pub clinician: Option<String>,
    pub prior_authorization_id: Option<String>,
    pub observations: Vec<ObservationDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationDto {
    pub otype: Option<String>,
    pub code: Option<String>,
    pub value: Option<String>,
    pub value_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResubmissionDto {
    pub rtype: String,
    pub comment: Option<String>,
    pub attachment: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentDto {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub sha256_hex: String,
    pub size_bytes: usize,
}

// ---------------------------------------------------------------------------
// Remittance graph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemittanceDto {
    pub header: Header,
    pub claims: Vec<RemittanceClaimDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemittanceClaimDto {
    pub id: String,
    pub id_payer: Option<String>,
    pub provider_id: Option<String>,
    pub denial_code: Option<String>,
    pub payment_reference: Option<String>,
    pub date_settlement: Option<DateTime<Utc>>,
    pub facility_id: Option<String>,
    pub comment: Option<String>,
    pub activities: Vec<RemittanceActivityDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemittanceActivityDto {
    pub id: String,
    pub start: Option<DateTime<Utc>>,
    pub atype: Option<String>,
    pub code: Option<String>,
    pub quantity: Option<Money>,
    pub net: Option<Money>,
    pub list_price: Option<Money>,
    pub gross: Option<Money>,
    pub patient_share: Option<Money>,
    pub payment_amount: Option<Money>,
    pub denial_code: Option<String>,
}

// ---------------------------------------------------------------------------
// Parse outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ParsedGraph {
    Submission(SubmissionDto),
    Remittance(RemittanceDto),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseOutcome {
    pub root_type: RootType,
    pub graph: ParsedGraph,
    pub problems: Vec<Problem>,
    pub attachments: Vec<AttachmentDto>,
}

impl ParseOutcome {
    pub fn has_fatal_errors(&self) -> bool {
        self.problems
            .iter()
            .any(|p| matches!(p.severity, Severity::Error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_type_sniff() {
        assert_eq!(
            RootType::sniff("Claim.Submission"),
            Some(RootType::Submission)
        );
        assert_eq!(
            RootType::sniff("Remittance.Advice"),
            Some(RootType::Remittance)
        );
        assert_eq!(RootType::sniff("Something.Else"), None);
    }

    #[test]
    fn codes_match_spec() {
        assert_eq!(EventType::Submitted.as_code(), 1);
        assert_eq!(EventType::Resubmitted.as_code(), 2);
        assert_eq!(EventType::Remittance.as_code(), 3);
        assert_eq!(ClaimStatus::Paid.as_code(), 3);
        assert_eq!(ClaimStatus::PartiallyPaid.as_code(), 4);
        assert_eq!(ClaimStatus::Rejected.as_code(), 5);
        assert_eq!(FileAuditStatus::Already.as_code(), 0);
        assert_eq!(FileAuditStatus::Ok.as_code(), 1);
        assert_eq!(FileAuditStatus::Fail.as_code(), 2);
    }
}
