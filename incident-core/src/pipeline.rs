//! The five-stage incident pipeline.
//!
//! A run walks a fixed sequence of `WorkflowStage`s. Each step builds its
//! request from the accumulated `WorkflowState`, awaits the stage function and
//! stores the output. The first failure aborts the run and the partial state
//! is dropped; callers only ever see a `CompletedWorkflow` or an error.

use crate::config::DEFAULT_POLICY_TOP_K;
use crate::error::{StageError, WorkflowError};
use crate::event_log::{Event, EventLog, EventType};
use crate::notifications::NotificationExecutor;
use crate::policies::{format_policy_context, PolicyIndex};
use crate::stages::{
    CorrectiveActionRequest, IntakeRequest, NotificationRequest, RootCauseRequest, Stages,
    TriageRequest,
};
use incident_schema::{
    CorrectiveActionPlan, IncidentReport, IntakeSummary, NotificationResult, RootCauseAnalysis,
    TriageAssessment,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    Intake,
    Triage,
    RootCause,
    CorrectiveAction,
    NotificationPlanning,
    Done,
}

impl WorkflowStage {
    pub const FIRST: WorkflowStage = WorkflowStage::Intake;

    pub fn next(self) -> Self {
        match self {
            Self::Intake => Self::Triage,
            Self::Triage => Self::RootCause,
            Self::RootCause => Self::CorrectiveAction,
            Self::CorrectiveAction => Self::NotificationPlanning,
            Self::NotificationPlanning | Self::Done => Self::Done,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Triage => "triage",
            Self::RootCause => "root_cause",
            Self::CorrectiveAction => "corrective_action",
            Self::NotificationPlanning => "notification_planning",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accumulated run state. A stage's slot is filled only after every earlier
/// slot has been filled.
#[derive(Clone, Debug)]
pub struct WorkflowState {
    pub report: IncidentReport,
    pub intake: Option<IntakeSummary>,
    pub triage: Option<TriageAssessment>,
    pub root_cause: Option<RootCauseAnalysis>,
    pub corrective_actions: Option<CorrectiveActionPlan>,
    pub notifications: Option<NotificationResult>,
}

impl WorkflowState {
    pub fn new(report: IncidentReport) -> Self {
        Self {
            report,
            intake: None,
            triage: None,
            root_cause: None,
            corrective_actions: None,
            notifications: None,
        }
    }

    /// Number of leading stages with output.
    pub fn completed_stages(&self) -> usize {
        [
            self.intake.is_some(),
            self.triage.is_some(),
            self.root_cause.is_some(),
            self.corrective_actions.is_some(),
            self.notifications.is_some(),
        ]
        .iter()
        .take_while(|done| **done)
        .count()
    }

    fn into_completed(self) -> Result<CompletedWorkflow, WorkflowError> {
        let missing = WorkflowError::MissingStageOutput;
        Ok(CompletedWorkflow {
            intake: self.intake.ok_or(missing(WorkflowStage::Intake))?,
            triage: self.triage.ok_or(missing(WorkflowStage::Triage))?,
            root_cause: self.root_cause.ok_or(missing(WorkflowStage::RootCause))?,
            corrective_actions: self
                .corrective_actions
                .ok_or(missing(WorkflowStage::CorrectiveAction))?,
            notifications: self
                .notifications
                .ok_or(missing(WorkflowStage::NotificationPlanning))?,
            report: self.report,
        })
    }
}

/// Every stage output of a successful run.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletedWorkflow {
    pub report: IncidentReport,
    pub intake: IntakeSummary,
    pub triage: TriageAssessment,
    pub root_cause: RootCauseAnalysis,
    pub corrective_actions: CorrectiveActionPlan,
    pub notifications: NotificationResult,
}

#[derive(Clone)]
pub struct WorkflowPipeline {
    stages: Stages,
    policies: Arc<dyn PolicyIndex>,
    notifier: NotificationExecutor,
    policy_top_k: usize,
    journal: Option<EventLog>,
}

impl WorkflowPipeline {
    pub fn new(
        stages: Stages,
        policies: Arc<dyn PolicyIndex>,
        notifier: NotificationExecutor,
    ) -> Self {
        Self {
            stages,
            policies,
            notifier,
            policy_top_k: DEFAULT_POLICY_TOP_K,
            journal: None,
        }
    }

    pub fn with_policy_top_k(mut self, k: usize) -> Self {
        self.policy_top_k = k;
        self
    }

    pub fn with_journal(mut self, journal: EventLog) -> Self {
        self.journal = Some(journal);
        self
    }

    pub async fn run(
        &self,
        incident_id: &str,
        report: IncidentReport,
    ) -> Result<CompletedWorkflow, WorkflowError> {
        let mut state = WorkflowState::new(report);
        let mut stage = WorkflowStage::FIRST;

        while stage != WorkflowStage::Done {
            tracing::debug!(incident_id, %stage, "running stage");
            match self.step(stage, &mut state).await {
                Ok(()) => {
                    tracing::info!(incident_id, %stage, "stage completed");
                    let event = Event::new(
                        incident_id,
                        EventType::StageCompleted,
                        format!("{stage} completed"),
                    )
                    .with_details(serde_json::json!({ "stage": stage }));
                    self.record(event).await;
                }
                Err(err) => {
                    tracing::error!(incident_id, %stage, %err, "stage failed");
                    self.record(
                        Event::new(incident_id, EventType::StageFailed, format!("{stage} failed"))
                            .with_details(serde_json::json!({
                                "stage": stage,
                                "error": err.to_string(),
                            })),
                    ).await;
                    return Err(err);
                }
            }
            stage = stage.next();
        }

        state.into_completed()
    }

    async fn step(&self, stage: WorkflowStage, state: &mut WorkflowState) -> Result<(), WorkflowError> {
        let failed = |source: StageError| WorkflowError::Stage { stage, source };
        let missing = || WorkflowError::MissingStageOutput(stage);

        match stage {
            WorkflowStage::Intake => {
                let request = IntakeRequest {
                    report: state.report.clone(),
                };
                state.intake = Some(self.stages.intake.call(request).await.map_err(failed)?);
            }
            WorkflowStage::Triage => {
                let request = TriageRequest {
                    report: state.report.clone(),
                    intake: state.intake.clone().ok_or_else(missing)?,
                };
                state.triage = Some(self.stages.triage.call(request).await.map_err(failed)?);
            }
            WorkflowStage::RootCause => {
                let request = RootCauseRequest {
                    report: state.report.clone(),
                    intake: state.intake.clone().ok_or_else(missing)?,
                    triage: state.triage.clone().ok_or_else(missing)?,
                };
                state.root_cause = Some(self.stages.root_cause.call(request).await.map_err(failed)?);
            }
            WorkflowStage::CorrectiveAction => {
                let intake = state.intake.clone().ok_or_else(missing)?;
                let triage = state.triage.clone().ok_or_else(missing)?;
                let root_cause = state.root_cause.clone().ok_or_else(missing)?;

                let query = format!(
                    "{}\n{}\n{}",
                    state.report.description,
                    intake.narrative,
                    root_cause.primary_causes.join(",")
                );
                let matches = self.policies.query(&query, self.policy_top_k).await?;
                tracing::debug!(matches = matches.len(), "policy lookup finished");

                let request = CorrectiveActionRequest {
                    report: state.report.clone(),
                    intake,
                    triage,
                    root_cause,
                    policy_context: format_policy_context(&matches),
                };
                let mut plan = self
                    .stages
                    .corrective_action
                    .call(request)
                    .await
                    .map_err(failed)?;
                if plan.policy_references.is_empty() {
                    plan.policy_references = matches.iter().map(|m| m.to_reference()).collect();
                }
                state.corrective_actions = Some(plan);
            }
            WorkflowStage::NotificationPlanning => {
                let request = NotificationRequest {
                    report: state.report.clone(),
                    intake: state.intake.clone().ok_or_else(missing)?,
                    triage: state.triage.clone().ok_or_else(missing)?,
                    corrective_actions: state.corrective_actions.clone().ok_or_else(missing)?,
                };
                let plan = self.stages.notification.call(request).await.map_err(failed)?;
                state.notifications = Some(self.notifier.execute(plan).await);
            }
            WorkflowStage::Done => {}
        }
        Ok(())
    }

    async fn record(&self, event: Event) {
        if let Some(journal) = &self.journal {
            journal.record(event).await;
        }
    }
}
