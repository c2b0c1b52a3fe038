use crate::pipeline::CompletedWorkflow;
use chrono::{DateTime, Utc};
use incident_schema::{EvidenceItem, IncidentWorkflowReport};

/// Builds the terminal report, stamped now.
pub fn assemble(workflow: &CompletedWorkflow, evidence: &[EvidenceItem]) -> IncidentWorkflowReport {
    assemble_at(workflow, evidence, Utc::now())
}

/// Pure merge of a completed run and its evidence.
pub fn assemble_at(
    workflow: &CompletedWorkflow,
    evidence: &[EvidenceItem],
    generated_at: DateTime<Utc>,
) -> IncidentWorkflowReport {
    IncidentWorkflowReport {
        incident: workflow.report.clone(),
        intake: workflow.intake.clone(),
        triage: workflow.triage.clone(),
        root_cause: workflow.root_cause.clone(),
        corrective_actions: workflow.corrective_actions.clone(),
        notifications: workflow.notifications.clone(),
        evidence: evidence.to_vec(),
        generated_at,
    }
}
