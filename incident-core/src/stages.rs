//! Stage contracts: the typed request each stage receives and the opaque
//! async function that turns it into a structured output.

use crate::error::StageError;
use async_trait::async_trait;
use incident_schema::{
    CorrectiveActionPlan, IncidentReport, IntakeSummary, NotificationPlan, RootCauseAnalysis,
    TriageAssessment,
};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;

/// One reasoning step. Implementations may be non-deterministic and may
/// fail; the pipeline treats any error as fatal for the run.
#[async_trait]
pub trait StageFn<Req, Out>: Send + Sync
where
    Req: Send + 'static,
{
    async fn call(&self, request: Req) -> Result<Out, StageError>;
}

/// Adapts an async closure into a `StageFn`.
pub struct FnStage<F>(pub F);

impl<F> FnStage<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<Req, Out, F, Fut> StageFn<Req, Out> for FnStage<F>
where
    Req: Send + 'static,
    Out: Send + 'static,
    F: Fn(Req) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Out, StageError>> + Send,
{
    async fn call(&self, request: Req) -> Result<Out, StageError> {
        (self.0)(request).await
    }
}

/// A request that can be rendered as a model prompt.
pub trait StageRequest: Send + Sync + 'static {
    type Output: DeserializeOwned + JsonSchema + Send + 'static;

    /// Role instructions for the model.
    const PREAMBLE: &'static str;

    fn prompt(&self) -> String;
}

fn join_or(items: &[String], fallback: &str) -> String {
    if items.is_empty() {
        fallback.to_string()
    } else {
        items.join(", ")
    }
}

fn or_default<'a>(value: Option<&'a str>, fallback: &'a str) -> &'a str {
    value.filter(|v| !v.is_empty()).unwrap_or(fallback)
}

#[derive(Clone, Debug)]
pub struct IntakeRequest {
    pub report: IncidentReport,
}

impl StageRequest for IntakeRequest {
    type Output = IntakeSummary;

    const PREAMBLE: &'static str = "You are an incident intake specialist for an Environmental Health & Safety team. \
         Summarize the report clearly, highlight key findings, note any injuries, and assign \
         a severity based on the description.";

    fn prompt(&self) -> String {
        let r = &self.report;
        format!(
            "Process the following incident report and produce an intake summary.\n\n\
             Title: {}\n\
             Reported By: {}\n\
             Location: {}\n\
             Time: {}\n\
             Individuals Involved: {}\n\
             Severity Hint: {}\n\
             Description:\n{}",
            r.title,
            or_default(r.reported_by.as_deref(), "Unknown"),
            or_default(r.location.as_deref(), "Not specified"),
            or_default(r.time_of_incident.as_deref(), "Not specified"),
            join_or(&r.individuals_involved, "Not listed"),
            or_default(r.severity_hint.as_deref(), "None"),
            r.description,
        )
    }
}

#[derive(Clone, Debug)]
pub struct TriageRequest {
    pub report: IncidentReport,
    pub intake: IntakeSummary,
}

impl StageRequest for TriageRequest {
    type Output = TriageAssessment;

    const PREAMBLE: &'static str = "You are an EHS triage officer. Based on the incident summary, \
         determine the risk level, immediate actions, escalation requirements, \
         and monitoring plan. Justify your recommendations.";

    fn prompt(&self) -> String {
        format!(
            "Perform triage on the incident using the following context.\n\n\
             Incident title: {}\n\
             Severity hint: {}\n\
             Intake summary: {}\n\
             Key findings: {}\n\
             Injuries or illnesses: {}",
            self.report.title,
            or_default(self.report.severity_hint.as_deref(), "None"),
            self.intake.narrative,
            self.intake.key_findings.join(", "),
            join_or(&self.intake.injuries_or_illnesses, "None"),
        )
    }
}

#[derive(Clone, Debug)]
pub struct RootCauseRequest {
    pub report: IncidentReport,
    pub intake: IntakeSummary,
    pub triage: TriageAssessment,
}

impl StageRequest for RootCauseRequest {
    type Output = RootCauseAnalysis;

    const PREAMBLE: &'static str = "You are a root cause analyst for EHS incidents. Provide plausible causes \
         and contributing factors. Highlight any gaps requiring further investigation.";

    fn prompt(&self) -> String {
        format!(
            "Analyse root causes using the following inputs.\n\n\
             Description: {}\n\
             Intake summary: {}\n\
             Triage rationale: {}\n\
             Immediate actions: {}",
            self.report.description,
            self.intake.narrative,
            self.triage.rationale,
            self.triage.priority_actions.join(", "),
        )
    }
}

#[derive(Clone, Debug)]
pub struct CorrectiveActionRequest {
    pub report: IncidentReport,
    pub intake: IntakeSummary,
    pub triage: TriageAssessment,
    pub root_cause: RootCauseAnalysis,
    /// Formatted policy lines, or the no-policies placeholder. Never empty.
    pub policy_context: String,
}

impl StageRequest for CorrectiveActionRequest {
    type Output = CorrectiveActionPlan;

    const PREAMBLE: &'static str = "You are responsible for proposing corrective actions after an EHS incident. \
         Outline actionable steps with responsible parties, target due dates, and cite \
         relevant policies or procedures.";

    fn prompt(&self) -> String {
        format!(
            "Develop a corrective action plan.\n\n\
             Incident summary: {}\n\
             Root causes: {}\n\
             Contributing factors: {}\n\
             Triage actions already underway: {}\n\
             Relevant policies:\n{}",
            self.intake.narrative,
            self.root_cause.primary_causes.join(", "),
            join_or(&self.root_cause.contributing_factors, "None"),
            self.triage.priority_actions.join(", "),
            self.policy_context,
        )
    }
}

#[derive(Clone, Debug)]
pub struct NotificationRequest {
    pub report: IncidentReport,
    pub intake: IntakeSummary,
    pub triage: TriageAssessment,
    pub corrective_actions: CorrectiveActionPlan,
}

impl StageRequest for NotificationRequest {
    type Output = NotificationPlan;

    const PREAMBLE: &'static str = "You coordinate incident communications. Decide which tickets to create and \
         who to email, ensuring compliance with escalation protocol and data privacy guidelines.";

    fn prompt(&self) -> String {
        format!(
            "Create a notification plan for the incident.\n\n\
             Incident title: {}\n\
             Location: {}\n\
             Severity: {}\n\
             Triage risk level: {}\n\
             Key actions: {}\n\
             Responsible parties: {}",
            self.report.title,
            or_default(self.report.location.as_deref(), "Not specified"),
            self.intake.severity,
            self.triage.risk_level,
            self.corrective_actions.actions.join(", "),
            self.corrective_actions.responsible_parties.join(", "),
        )
    }
}

/// The five reasoning functions, in pipeline order.
#[derive(Clone)]
pub struct Stages {
    pub intake: Arc<dyn StageFn<IntakeRequest, IntakeSummary>>,
    pub triage: Arc<dyn StageFn<TriageRequest, TriageAssessment>>,
    pub root_cause: Arc<dyn StageFn<RootCauseRequest, RootCauseAnalysis>>,
    pub corrective_action: Arc<dyn StageFn<CorrectiveActionRequest, CorrectiveActionPlan>>,
    pub notification: Arc<dyn StageFn<NotificationRequest, NotificationPlan>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use incident_schema::Severity;

    fn intake() -> IntakeSummary {
        IntakeSummary {
            narrative: "Worker slipped on hydraulic fluid".into(),
            key_findings: vec!["wet floor".into(), "no signage".into()],
            injuries_or_illnesses: vec![],
            severity: Severity::Medium,
            timestamp: Utc::now(),
        }
    }

    fn triage() -> TriageAssessment {
        TriageAssessment {
            risk_level: Severity::High,
            priority_actions: vec!["cordon area".into()],
            escalation_required: true,
            escalation_channels: vec!["ehs-oncall".into()],
            monitoring_plan: "daily checks".into(),
            rationale: "repeat hazard".into(),
        }
    }

    #[test]
    fn intake_prompt_fills_missing_fields() {
        let request = IntakeRequest {
            report: IncidentReport::new("Slip on wet floor", "Employee slipped near loading dock"),
        };
        let prompt = request.prompt();
        assert!(prompt.contains("Title: Slip on wet floor"));
        assert!(prompt.contains("Reported By: Unknown"));
        assert!(prompt.contains("Individuals Involved: Not listed"));
        assert!(prompt.ends_with("Description:\nEmployee slipped near loading dock"));
    }

    #[test]
    fn triage_prompt_reports_no_injuries() {
        let request = TriageRequest {
            report: IncidentReport::new("Slip", "desc"),
            intake: intake(),
        };
        let prompt = request.prompt();
        assert!(prompt.contains("Key findings: wet floor, no signage"));
        assert!(prompt.contains("Injuries or illnesses: None"));
    }

    #[test]
    fn corrective_prompt_embeds_policy_context() {
        let request = CorrectiveActionRequest {
            report: IncidentReport::new("Slip", "desc"),
            intake: intake(),
            triage: triage(),
            root_cause: RootCauseAnalysis {
                primary_causes: vec!["leaking hose".into()],
                contributing_factors: vec![],
                uncertainty_gaps: vec![],
            },
            policy_context: "PPE: wear boots".into(),
        };
        let prompt = request.prompt();
        assert!(prompt.contains("Contributing factors: None"));
        assert!(prompt.ends_with("Relevant policies:\nPPE: wear boots"));
    }

    #[test]
    fn notification_prompt_uses_wire_severity() {
        let request = NotificationRequest {
            report: IncidentReport::new("Slip", "desc"),
            intake: intake(),
            triage: triage(),
            corrective_actions: CorrectiveActionPlan {
                actions: vec!["replace hose".into()],
                responsible_parties: vec!["maintenance".into()],
                due_dates: vec!["2026-11-01".into()],
                policy_references: vec![],
            },
        };
        let prompt = request.prompt();
        assert!(prompt.contains("Severity: medium"));
        assert!(prompt.contains("Triage risk level: high"));
    }

    #[tokio::test]
    async fn closure_stage_forwards_result() {
        let stage = FnStage::new(|request: IntakeRequest| async move {
            if request.report.title.is_empty() {
                Err(StageError::Execution("no title".into()))
            } else {
                Ok(request.report.title.len())
            }
        });
        let ok: usize = stage
            .call(IntakeRequest {
                report: IncidentReport::new("abc", "d"),
            })
            .await
            .expect("stage");
        assert_eq!(ok, 3);

        let err = stage
            .call(IntakeRequest {
                report: IncidentReport::new("", "d"),
            })
            .await;
        assert!(matches!(err, Err(StageError::Execution(_))));
    }
}
