//! Process-wide configuration, loaded once at startup and passed by reference.

use crate::evidence::DEFAULT_MAX_EVIDENCE_BYTES;
use crate::llm::LlmConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_POLICY_TOP_K: usize = 4;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvidenceConfig {
    pub root: PathBuf,
    pub max_bytes: u64,
    pub analysis_timeout_secs: Option<u64>,
}

impl EvidenceConfig {
    pub fn analysis_timeout(&self) -> Option<Duration> {
        self.analysis_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./storage/evidence"),
            max_bytes: DEFAULT_MAX_EVIDENCE_BYTES,
            analysis_timeout_secs: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub db_path: PathBuf,
    pub seed_dir: PathBuf,
    pub top_k: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./storage/policies.db"),
            seed_dir: PathBuf::from("./storage/policies"),
            top_k: DEFAULT_POLICY_TOP_K,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_request_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            max_request_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub environment: String,
    pub log_level: String,
    pub llm: LlmConfig,
    pub evidence: EvidenceConfig,
    pub policies: PolicyConfig,
    pub journal_path: PathBuf,
    pub server: ServerConfig,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            environment: "dev".into(),
            log_level: "info".into(),
            llm: LlmConfig::default(),
            evidence: EvidenceConfig::default(),
            policies: PolicyConfig::default(),
            journal_path: PathBuf::from("./storage/incidents.db"),
            server: ServerConfig::default(),
        }
    }
}

impl WorkflowConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; unset or unparseable values keep
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse = |key: &str| lookup(key).map(|v| v.trim().to_string());

        let llm = LlmConfig {
            provider: parse("LLM_PROVIDER").unwrap_or(defaults.llm.provider),
            model: parse("LLM_MODEL").unwrap_or(defaults.llm.model),
            api_key_env: parse("LLM_API_KEY_ENV").unwrap_or(defaults.llm.api_key_env),
            temperature: parse("LLM_TEMPERATURE")
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(defaults.llm.temperature),
            vision_max_tokens: defaults.llm.vision_max_tokens,
        };

        let evidence = EvidenceConfig {
            root: parse("EVIDENCE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.evidence.root),
            max_bytes: parse("EVIDENCE_MAX_BYTES")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.evidence.max_bytes),
            analysis_timeout_secs: parse("EVIDENCE_ANALYSIS_TIMEOUT_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .or(defaults.evidence.analysis_timeout_secs),
        };

        let policies = PolicyConfig {
            db_path: parse("POLICY_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.policies.db_path),
            seed_dir: parse("POLICY_SEED_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.policies.seed_dir),
            top_k: parse("POLICY_TOP_K")
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|k| *k > 0)
                .unwrap_or(defaults.policies.top_k),
        };

        let server = ServerConfig {
            host: parse("API_HOST").unwrap_or(defaults.server.host),
            port: parse("API_PORT")
                .and_then(|v| v.parse::<u16>().ok())
                .unwrap_or(defaults.server.port),
            max_request_bytes: parse("MAX_REQUEST_BYTES")
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(defaults.server.max_request_bytes),
        };

        Self {
            environment: parse("APP_ENV")
                .filter(|v| matches!(v.as_str(), "dev" | "staging" | "prod"))
                .unwrap_or(defaults.environment),
            log_level: parse("LOG_LEVEL")
                .map(|v| v.to_lowercase())
                .unwrap_or(defaults.log_level),
            llm,
            evidence,
            policies,
            journal_path: parse("JOURNAL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.journal_path),
            server,
        }
    }
}
