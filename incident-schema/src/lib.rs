use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

mod submission;

pub use submission::{
    parse_incident_json, prepare_report, report_from_message, validate_report, ValidationError,
};

/// Reporter-facing incident submission. The description may be extended once
/// with evidence insights before the workflow starts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentReport {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub reported_by: Option<String>,
    /// Initial severity impression from the reporter.
    #[serde(default)]
    pub severity_hint: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub time_of_incident: Option<String>,
    #[serde(default)]
    pub individuals_involved: Vec<String>,
    /// References to evidence (stored URLs once evidence has been ingested).
    #[serde(default)]
    pub attachments: Vec<String>,
}

impl IncidentReport {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            reported_by: None,
            severity_hint: None,
            location: None,
            time_of_incident: None,
            individuals_involved: Vec::new(),
            attachments: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub filename: String,
    pub url: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub analysis: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct IntakeSummary {
    pub narrative: String,
    pub key_findings: Vec<String>,
    pub injuries_or_illnesses: Vec<String>,
    pub severity: Severity,
    #[serde(default = "Utc::now")]
    #[schemars(skip)]
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TriageAssessment {
    pub risk_level: Severity,
    pub priority_actions: Vec<String>,
    pub escalation_required: bool,
    pub escalation_channels: Vec<String>,
    pub monitoring_plan: String,
    pub rationale: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RootCauseAnalysis {
    pub primary_causes: Vec<String>,
    pub contributing_factors: Vec<String>,
    pub uncertainty_gaps: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PolicyReference {
    pub title: String,
    pub excerpt: String,
    pub source: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CorrectiveActionPlan {
    pub actions: Vec<String>,
    pub responsible_parties: Vec<String>,
    pub due_dates: Vec<String>,
    #[serde(default)]
    pub policy_references: Vec<PolicyReference>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TicketPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl std::fmt::Display for TicketPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TicketPriority::Low => "low",
            TicketPriority::Medium => "medium",
            TicketPriority::High => "high",
            TicketPriority::Urgent => "urgent",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TicketRequest {
    pub title: String,
    pub description: String,
    pub priority: TicketPriority,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EmailRequest {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NotificationPlan {
    pub tickets: Vec<TicketRequest>,
    pub emails: Vec<EmailRequest>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Created,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailStatus {
    Sent,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketReceipt {
    pub status: TicketStatus,
    pub request: TicketRequest,
    /// Assigned by the ticketing system; absent when creation failed.
    pub ticket_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailReceipt {
    pub recipient: String,
    pub status: EmailStatus,
    pub request: EmailRequest,
    pub message_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Executed notification plan. Receipt lists mirror the plan one-to-one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationResult {
    pub plan: NotificationPlan,
    pub tickets: Vec<TicketReceipt>,
    pub emails: Vec<EmailReceipt>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Terminal artifact of a workflow run and the sole input to rendering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentWorkflowReport {
    pub incident: IncidentReport,
    pub intake: IntakeSummary,
    pub triage: TriageAssessment,
    pub root_cause: RootCauseAnalysis,
    pub corrective_actions: CorrectiveActionPlan,
    pub notifications: NotificationResult,
    #[serde(default)]
    pub evidence: Vec<EvidenceItem>,
    pub generated_at: DateTime<Utc>,
}
