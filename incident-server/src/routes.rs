use crate::render::{sanitize, ReportRenderer};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use incident_core::event_log::Event;
use incident_core::evidence::EvidenceUpload;
use incident_core::IncidentWorkflow;
use incident_schema::prepare_report;
use std::sync::Arc;

const FILENAME_TITLE_CHARS: usize = 20;

#[derive(Clone)]
pub struct AppState {
    pub workflow: Arc<IncidentWorkflow>,
    pub renderer: Arc<dyn ReportRenderer>,
    pub environment: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(&'static str),
    #[error("Incident workflow failed.")]
    WorkflowFailed,
    #[error("internal error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::WorkflowFailed | ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "detail": self.to_string() }))).into_response()
    }
}

/// Raw multipart fields of one submission.
#[derive(Debug, Default)]
pub struct Submission {
    pub incident: Option<String>,
    pub message: Option<String>,
    pub evidence: Vec<EvidenceUpload>,
}

pub fn router(state: AppState, max_request_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/incident-workflow", post(incident_workflow))
        .route("/evidence/:incident_id/:file", get(get_evidence))
        .route("/incidents/:incident_id/timeline", get(timeline))
        .layer(DefaultBodyLimit::max(max_request_bytes))
        .with_state(state)
}

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "environment": state.environment,
    }))
}

async fn incident_workflow(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let submission = read_submission(multipart).await?;
    handle_submission(&state, submission).await
}

async fn read_submission(mut multipart: Multipart) -> Result<Submission, ApiError> {
    let bad = |e: axum::extract::multipart::MultipartError| {
        ApiError::BadRequest(format!("invalid multipart body: {e}"))
    };

    let mut submission = Submission::default();
    while let Some(field) = multipart.next_field().await.map_err(bad)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "incident" => submission.incident = Some(field.text().await.map_err(bad)?),
            "message" => submission.message = Some(field.text().await.map_err(bad)?),
            "evidence" => {
                let filename = field.file_name().map(str::to_string);
                let data = field.bytes().await.map_err(bad)?;
                if filename.is_none() && data.is_empty() {
                    continue;
                }
                submission.evidence.push(EvidenceUpload {
                    filename,
                    data: data.to_vec(),
                });
            }
            other => tracing::debug!(field = other, "ignoring unknown multipart field"),
        }
    }
    Ok(submission)
}

pub async fn handle_submission(
    state: &AppState,
    submission: Submission,
) -> Result<Response, ApiError> {
    let report = prepare_report(
        submission.incident.as_deref(),
        submission.message.as_deref(),
        !submission.evidence.is_empty(),
    )
    .map_err(|err| {
        tracing::warn!(%err, "rejected incident submission");
        ApiError::BadRequest(err.to_string())
    })?;

    let result = state
        .workflow
        .submit(report, submission.evidence)
        .await
        .map_err(|err| {
            if err.is_client_error() {
                ApiError::BadRequest(err.to_string())
            } else {
                tracing::error!(%err, "incident workflow execution failed");
                ApiError::WorkflowFailed
            }
        })?;

    let body = state.renderer.render(&result);
    let extension = state.renderer.file_extension();
    let disposition = header_value(
        &format!(
            "attachment; filename=\"{}\"",
            attachment_name(&result.incident.title, extension)
        ),
        || HeaderValue::from_str(&format!("attachment; filename=\"incident.{extension}\""))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );
    let headers = [
        (
            header::CONTENT_TYPE,
            HeaderValue::from_static(state.renderer.content_type()),
        ),
        (header::CONTENT_DISPOSITION, disposition),
        (
            HeaderName::from_static("x-triage-risk"),
            HeaderValue::from_static(result.triage.risk_level.as_str()),
        ),
        (
            HeaderName::from_static("x-incident-title"),
            header_value(&single_line(&result.incident.title), || {
                HeaderValue::from_static("incident")
            }),
        ),
    ];
    Ok((headers, body).into_response())
}

/// `incident_<first 20 chars of the title>.<ext>` with spaces as underscores.
pub fn attachment_name(title: &str, extension: &str) -> String {
    let stem: String = single_line(title)
        .chars()
        .take(FILENAME_TITLE_CHARS)
        .map(|ch| if ch == ' ' || ch == '"' { '_' } else { ch })
        .collect();
    format!("incident_{stem}.{extension}")
}

/// Sanitised text with line breaks and tabs folded to spaces.
fn single_line(value: &str) -> String {
    sanitize(value)
        .chars()
        .map(|ch| if ch.is_ascii_control() { ' ' } else { ch })
        .collect::<String>()
        .trim()
        .to_string()
}

fn header_value(value: &str, fallback: impl FnOnce() -> HeaderValue) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| fallback())
}

pub async fn get_evidence(
    State(state): State<AppState>,
    Path((incident_id, file)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let path = state
        .workflow
        .evidence_store()
        .locate(&incident_id, &file)
        .await
        .map_err(|_| ApiError::NotFound("Evidence not found"))?;
    let bytes = tokio::fs::read(&path).await.map_err(|err| {
        tracing::warn!(%incident_id, %file, %err, "failed to read evidence");
        ApiError::NotFound("Evidence not found")
    })?;

    let content_type = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("txt") => "text/plain",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

pub async fn timeline(
    State(state): State<AppState>,
    Path(incident_id): Path<String>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let journal = state
        .workflow
        .journal()
        .cloned()
        .ok_or(ApiError::NotFound("Journal disabled"))?;

    let events = tokio::task::spawn_blocking(move || journal.events_for_incident(&incident_id))
        .await
        .map_err(|err| {
            tracing::error!(%err, "timeline task failed");
            ApiError::Internal
        })?
        .map_err(|err| {
            tracing::error!(%err, "failed to read journal");
            ApiError::Internal
        })?;

    if events.is_empty() {
        return Err(ApiError::NotFound("Incident not found"));
    }
    Ok(Json(events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::TextRenderer;
    use async_trait::async_trait;
    use axum::body::to_bytes;
    use chrono::Utc;
    use incident_core::analyzer::EvidenceAnalyzer;
    use incident_core::error::StageError;
    use incident_core::event_log::EventLog;
    use incident_core::evidence::EvidenceStore;
    use incident_core::notifications::NotificationExecutor;
    use incident_core::pipeline::WorkflowPipeline;
    use incident_core::policies::PolicyStore;
    use incident_core::stages::{
        CorrectiveActionRequest, FnStage, IntakeRequest, NotificationRequest, RootCauseRequest,
        Stages, TriageRequest,
    };
    use incident_schema::{
        CorrectiveActionPlan, IntakeSummary, NotificationPlan, RootCauseAnalysis, Severity,
        TriageAssessment,
    };

    struct SizeAnalyzer;

    #[async_trait]
    impl EvidenceAnalyzer for SizeAnalyzer {
        async fn analyse(&self, path: &std::path::Path) -> String {
            let len = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
            format!("{len} bytes reviewed")
        }
    }

    fn stages(fail_triage: bool) -> Stages {
        Stages {
            intake: Arc::new(FnStage::new(|req: IntakeRequest| async move {
                Ok::<_, StageError>(IntakeSummary {
                    narrative: req.report.description,
                    key_findings: vec![],
                    injuries_or_illnesses: vec![],
                    severity: Severity::Low,
                    timestamp: Utc::now(),
                })
            })),
            triage: Arc::new(FnStage::new(move |_req: TriageRequest| async move {
                if fail_triage {
                    return Err(StageError::Execution("model timeout".into()));
                }
                Ok(TriageAssessment {
                    risk_level: Severity::Critical,
                    priority_actions: vec![],
                    escalation_required: false,
                    escalation_channels: vec![],
                    monitoring_plan: String::new(),
                    rationale: String::new(),
                })
            })),
            root_cause: Arc::new(FnStage::new(|_req: RootCauseRequest| async {
                Ok::<_, StageError>(RootCauseAnalysis {
                    primary_causes: vec![],
                    contributing_factors: vec![],
                    uncertainty_gaps: vec![],
                })
            })),
            corrective_action: Arc::new(FnStage::new(|_req: CorrectiveActionRequest| async {
                Ok::<_, StageError>(CorrectiveActionPlan {
                    actions: vec![],
                    responsible_parties: vec![],
                    due_dates: vec![],
                    policy_references: vec![],
                })
            })),
            notification: Arc::new(FnStage::new(|_req: NotificationRequest| async {
                Ok::<_, StageError>(NotificationPlan::default())
            })),
        }
    }

    async fn rejection(state: &AppState, submission: Submission) -> ApiError {
        match handle_submission(state, submission).await {
            Ok(_) => panic!("submission should have been rejected"),
            Err(err) => err,
        }
    }

    fn app_state(dir: &tempfile::TempDir, fail_triage: bool) -> AppState {
        let policies = PolicyStore::open(dir.path().join("policies.db")).expect("policies");
        let evidence = EvidenceStore::open(dir.path().join("evidence"), 1024).expect("evidence");
        let journal = EventLog::open(dir.path().join("incidents.db")).expect("journal");
        let pipeline = WorkflowPipeline::new(
            stages(fail_triage),
            Arc::new(policies),
            NotificationExecutor::stub(),
        );
        let workflow = IncidentWorkflow::new(evidence, Arc::new(SizeAnalyzer), pipeline)
            .with_journal(journal);
        AppState {
            workflow: Arc::new(workflow),
            renderer: Arc::new(TextRenderer),
            environment: "dev".into(),
        }
    }

    #[tokio::test]
    async fn health_reports_environment() {
        let dir = tempfile::tempdir().expect("tempdir");
        let Json(body) = health(State(app_state(&dir, false))).await;
        assert_eq!(body, serde_json::json!({"status": "ok", "environment": "dev"}));
    }

    #[tokio::test]
    async fn empty_submission_is_bad_request() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = rejection(&app_state(&dir, false), Submission::default()).await;
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_payload_is_bad_request() {
        let dir = tempfile::tempdir().expect("tempdir");
        let submission = Submission {
            incident: Some("{\"title\": 5}".into()),
            ..Submission::default()
        };
        let err = rejection(&app_state(&dir, false), submission).await;
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn message_submission_returns_rendered_attachment() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = app_state(&dir, false);
        let submission = Submission {
            incident: None,
            message: Some("Slip on wet floor near dock\nEmployee slipped".into()),
            evidence: vec![EvidenceUpload::new("dock.png", vec![9u8; 300])],
        };

        let Ok(response) = handle_submission(&state, submission).await else {
            panic!("submission should succeed");
        };
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers.get("x-triage-risk").and_then(|v| v.to_str().ok()), Some("critical"));
        assert_eq!(
            headers.get("x-incident-title").and_then(|v| v.to_str().ok()),
            Some("Slip on wet floor near dock")
        );
        assert_eq!(
            headers
                .get(header::CONTENT_DISPOSITION)
                .and_then(|v| v.to_str().ok()),
            Some("attachment; filename=\"incident_Slip_on_wet_floor_ne.txt\"")
        );

        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let text = String::from_utf8(body.to_vec()).expect("utf8");
        assert!(text.contains("Incident Title: Slip on wet floor near dock"));
        assert!(text.contains("Evidence Insights:"));
        assert!(text.contains("300 bytes reviewed"));
    }

    #[tokio::test]
    async fn stage_failure_is_a_generic_server_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let submission = Submission {
            message: Some("Chemical spill".into()),
            ..Submission::default()
        };
        let err = rejection(&app_state(&dir, true), submission).await;
        assert!(matches!(err, ApiError::WorkflowFailed));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let json: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(json["detail"], "Incident workflow failed.");
    }

    #[tokio::test]
    async fn evidence_outside_root_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("secret.txt"), b"x").expect("write");
        let state = app_state(&dir, false);

        let result = get_evidence(
            State(state),
            Path(("inc".to_string(), "../../secret.txt".to_string())),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn timeline_lists_journal_events() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = app_state(&dir, false);
        let journal = state.workflow.journal().cloned().expect("journal");
        journal.record(incident_core::Event::new(
            "inc-t",
            incident_core::EventType::WorkflowStarted,
            "workflow started",
        ))
        .await;

        let Json(events) = timeline(State(state.clone()), Path("inc-t".to_string()))
            .await
            .expect("timeline");
        assert_eq!(events.len(), 1);

        let missing = timeline(State(state), Path("inc-none".to_string())).await;
        assert!(matches!(missing, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn multiline_title_yields_valid_headers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let submission = Submission {
            incident: Some(
                r#"{"title": "Spill\r\nbay 4", "description": "Solvent on the floor"}"#.into(),
            ),
            ..Submission::default()
        };
        let Ok(response) = handle_submission(&app_state(&dir, false), submission).await else {
            panic!("submission should succeed");
        };

        let headers = response.headers();
        assert_eq!(
            headers
                .get(header::CONTENT_DISPOSITION)
                .and_then(|v| v.to_str().ok()),
            Some("attachment; filename=\"incident_Spill__bay_4.txt\"")
        );
        assert_eq!(
            headers.get("x-incident-title").and_then(|v| v.to_str().ok()),
            Some("Spill  bay 4")
        );
    }

    #[test]
    fn attachment_name_truncates_title() {
        assert_eq!(
            attachment_name("Forklift \"near\" miss at bay 7", "txt"),
            "incident_Forklift__near__miss.txt"
        );
    }
}
