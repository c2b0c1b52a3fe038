use incident_core::{
    EventLog, EvidenceStore, IncidentWorkflow, NotificationExecutor, PolicyStore, RigVisionModel,
    Stages, VisionEvidenceAnalyzer, WorkflowConfig, WorkflowPipeline,
};
use incident_server::render::TextRenderer;
use incident_server::routes::{router, AppState};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = WorkflowConfig::from_env();

    let level = config.log_level.to_lowercase();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("incident_server={level},incident_core={level}").into()
            }),
        )
        .init();

    let policies = PolicyStore::open(&config.policies.db_path)?;
    let seeded = policies.ensure_seed_documents(Some(config.policies.seed_dir.as_path()))?;
    tracing::info!(seeded, total = policies.count()?, "policy index ready");

    let evidence = EvidenceStore::open(&config.evidence.root, config.evidence.max_bytes)?;
    let journal = EventLog::open(&config.journal_path)?;

    if !config.llm.api_key_present() {
        tracing::warn!(
            env = %config.llm.api_key_env,
            "model API key is not set; workflow submissions will fail"
        );
    }
    let stages = Stages::llm(&config.llm)?;
    let vision = RigVisionModel::new(config.llm.clone())?;
    let analyzer = VisionEvidenceAnalyzer::new(Arc::new(vision));

    let pipeline = WorkflowPipeline::new(stages, Arc::new(policies), NotificationExecutor::stub())
        .with_policy_top_k(config.policies.top_k);
    let workflow = IncidentWorkflow::new(evidence, Arc::new(analyzer), pipeline)
        .with_journal(journal)
        .with_analysis_timeout(config.evidence.analysis_timeout());

    let state = AppState {
        workflow: Arc::new(workflow),
        renderer: Arc::new(TextRenderer),
        environment: config.environment.clone(),
    };
    let app = router(state, config.server.max_request_bytes);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, environment = %config.environment, "incident-server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
