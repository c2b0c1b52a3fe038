pub mod analyzer;
pub mod assembler;
pub mod config;
pub mod error;
pub mod event_log;
pub mod evidence;
pub mod llm;
pub mod notifications;
pub mod pipeline;
pub mod policies;
pub mod stages;
pub mod workflow;

pub use analyzer::{EvidenceAnalyzer, VisionEvidenceAnalyzer, VisionModel};
pub use assembler::{assemble, assemble_at};
pub use config::WorkflowConfig;
pub use error::{StageError, WorkflowError};
pub use event_log::{Event, EventLog, EventType};
pub use evidence::{EvidenceStore, EvidenceUpload};
pub use llm::{LlmConfig, RigVisionModel};
pub use notifications::{NotificationExecutor, NotificationSink, StubNotificationSink};
pub use pipeline::{CompletedWorkflow, WorkflowPipeline, WorkflowStage};
pub use policies::{PolicyIndex, PolicyMatch, PolicyStore};
pub use stages::{FnStage, StageFn, Stages};
pub use workflow::IncidentWorkflow;
