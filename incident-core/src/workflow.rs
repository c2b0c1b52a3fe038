//! End-to-end submission: evidence ingestion, analysis fan-out, the stage
//! pipeline and report assembly.

use crate::analyzer::{analyse_all, apply_analyses, merge_evidence_insights, EvidenceAnalyzer};
use crate::assembler::assemble;
use crate::error::WorkflowError;
use crate::event_log::{Event, EventLog, EventType};
use crate::evidence::{EvidenceStore, EvidenceUpload};
use crate::pipeline::WorkflowPipeline;
use incident_schema::{validate_report, EvidenceItem, IncidentReport, IncidentWorkflowReport};
use std::sync::Arc;
use std::time::Duration;

pub struct IncidentWorkflow {
    evidence: EvidenceStore,
    analyzer: Arc<dyn EvidenceAnalyzer>,
    pipeline: WorkflowPipeline,
    journal: Option<EventLog>,
    analysis_timeout: Option<Duration>,
}

impl IncidentWorkflow {
    pub fn new(
        evidence: EvidenceStore,
        analyzer: Arc<dyn EvidenceAnalyzer>,
        pipeline: WorkflowPipeline,
    ) -> Self {
        Self {
            evidence,
            analyzer,
            pipeline,
            journal: None,
            analysis_timeout: None,
        }
    }

    /// Journals run milestones and every stage transition.
    pub fn with_journal(mut self, journal: EventLog) -> Self {
        self.pipeline = self.pipeline.with_journal(journal.clone());
        self.journal = Some(journal);
        self
    }

    pub fn with_analysis_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.analysis_timeout = timeout;
        self
    }

    pub fn evidence_store(&self) -> &EvidenceStore {
        &self.evidence
    }

    pub fn journal(&self) -> Option<&EventLog> {
        self.journal.as_ref()
    }

    pub async fn submit(
        &self,
        report: IncidentReport,
        uploads: Vec<EvidenceUpload>,
    ) -> Result<IncidentWorkflowReport, WorkflowError> {
        let incident_id = uuid::Uuid::new_v4().simple().to_string();
        self.submit_with_id(&incident_id, report, uploads).await
    }

    pub async fn submit_with_id(
        &self,
        incident_id: &str,
        mut report: IncidentReport,
        uploads: Vec<EvidenceUpload>,
    ) -> Result<IncidentWorkflowReport, WorkflowError> {
        validate_report(&report)?;
        tracing::info!(incident_id, title = %report.title, "starting incident workflow");
        self.record(
            Event::new(incident_id, EventType::WorkflowStarted, "workflow started")
                .with_details(serde_json::json!({ "title": report.title })),
        ).await;

        let result = async {
            let evidence = self.ingest(incident_id, uploads).await?;
            merge_evidence_insights(&mut report, &evidence);

            let completed = self.pipeline.run(incident_id, report).await?;
            self.record(
                Event::new(
                    incident_id,
                    EventType::NotificationDispatched,
                    completed.notifications.notes.clone().unwrap_or_default(),
                )
                .with_details(serde_json::json!({
                    "tickets": completed.notifications.tickets.len(),
                    "emails": completed.notifications.emails.len(),
                })),
            ).await;
            Ok::<_, WorkflowError>(assemble(&completed, &evidence))
        }
        .await;

        match &result {
            Ok(report) => {
                tracing::info!(incident_id, risk = %report.triage.risk_level, "completed incident workflow");
                self.record(
                    Event::new(incident_id, EventType::WorkflowCompleted, "workflow completed")
                        .with_details(serde_json::json!({ "risk_level": report.triage.risk_level })),
                ).await;
            }
            Err(err) => {
                tracing::error!(incident_id, %err, "incident workflow failed");
                self.record(
                    Event::new(incident_id, EventType::WorkflowFailed, "workflow failed")
                        .with_details(serde_json::json!({ "error": err.to_string() })),
                ).await;
            }
        }
        result
    }

    /// Stores uploads and fills in each item's analysis.
    async fn ingest(
        &self,
        incident_id: &str,
        uploads: Vec<EvidenceUpload>,
    ) -> Result<Vec<EvidenceItem>, WorkflowError> {
        if uploads.is_empty() {
            return Ok(Vec::new());
        }

        let stored = self.evidence.save(incident_id, uploads).await?;
        self.record(
            Event::new(
                incident_id,
                EventType::EvidenceStored,
                format!("{} evidence file(s) stored", stored.len()),
            )
            .with_details(serde_json::json!({
                "files": stored.iter().map(|s| s.item.filename.as_str()).collect::<Vec<_>>(),
            })),
        ).await;

        let incident_dir = self.evidence.root().join(incident_id);
        let paths = stored.iter().map(|s| incident_dir.join(&s.key)).collect();
        let outcomes = analyse_all(Arc::clone(&self.analyzer), paths, self.analysis_timeout).await;

        let mut items: Vec<EvidenceItem> = stored.into_iter().map(|s| s.item).collect();
        apply_analyses(&mut items, outcomes);
        self.record(Event::new(
            incident_id,
            EventType::EvidenceAnalysed,
            format!("{} evidence file(s) analysed", items.len()),
        )).await;
        Ok(items)
    }

    async fn record(&self, event: Event) {
        if let Some(journal) = &self.journal {
            journal.record(event).await;
        }
    }
}
