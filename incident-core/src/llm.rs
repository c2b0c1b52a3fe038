use crate::analyzer::{EncodedImage, VisionModel};
use crate::error::StageError;
use crate::stages::{StageFn, StageRequest, Stages};
use async_trait::async_trait;
use rig::client::completion::CompletionClient;
use rig::completion::message::{ImageDetail, ImageMediaType, Message, UserContent};
use rig::completion::Prompt;
use rig::providers::openai;
use rig::OneOrMany;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;

const VISION_PREAMBLE: &str = "You are an Environmental Health & Safety investigator. \
     Identify visible objects, PPE usage, hazards, and likely contributions to the reported incident.";
const VISION_PROMPT: &str = "Analyse this evidence image. List key objects, potential safety risks, \
     and any mitigating or aggravating factors.";

fn default_vision_max_tokens() -> u64 {
    300
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
    pub temperature: f64,
    #[serde(default = "default_vision_max_tokens")]
    pub vision_max_tokens: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            temperature: 0.2,
            vision_max_tokens: default_vision_max_tokens(),
        }
    }
}

impl LlmConfig {
    pub fn api_key_present(&self) -> bool {
        std::env::var(&self.api_key_env).is_ok_and(|v| !v.trim().is_empty())
    }
}

/// A stage backed by a single structured completion call.
pub struct LlmStage<R> {
    config: LlmConfig,
    _request: PhantomData<fn(R)>,
}

impl<R: StageRequest> LlmStage<R> {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            _request: PhantomData,
        }
    }
}

#[async_trait]
impl<R: StageRequest> StageFn<R, R::Output> for LlmStage<R> {
    async fn call(&self, request: R) -> Result<R::Output, StageError> {
        let prompt = structured_prompt::<R::Output>(&request.prompt())?;
        let raw = run_prompt(&self.config, R::PREAMBLE, &prompt).await?;
        parse_structured(&raw)
    }
}

impl Stages {
    /// Wires every stage to the configured model.
    pub fn llm(config: &LlmConfig) -> Result<Self, StageError> {
        ensure_provider(config)?;
        Ok(Self {
            intake: Arc::new(LlmStage::new(config.clone())),
            triage: Arc::new(LlmStage::new(config.clone())),
            root_cause: Arc::new(LlmStage::new(config.clone())),
            corrective_action: Arc::new(LlmStage::new(config.clone())),
            notification: Arc::new(LlmStage::new(config.clone())),
        })
    }
}

pub struct RigVisionModel {
    config: LlmConfig,
}

impl RigVisionModel {
    pub fn new(config: LlmConfig) -> Result<Self, StageError> {
        ensure_provider(&config)?;
        Ok(Self { config })
    }
}

#[async_trait]
impl VisionModel for RigVisionModel {
    async fn describe_image(&self, image: &EncodedImage) -> Result<String, StageError> {
        let media_type = match image.media_type {
            "image/png" => ImageMediaType::PNG,
            "image/jpeg" => ImageMediaType::JPEG,
            "image/gif" => ImageMediaType::GIF,
            "image/webp" => ImageMediaType::WEBP,
            other => {
                return Err(StageError::Config(format!(
                    "unsupported image media type '{other}'"
                )))
            }
        };

        let content = OneOrMany::many(vec![
            UserContent::text(VISION_PROMPT),
            UserContent::image_base64(
                image.base64.clone(),
                Some(media_type),
                Some(ImageDetail::Auto),
            ),
        ])
        .map_err(|e| StageError::Execution(format!("empty vision message: {e}")))?;

        let client = build_client(&self.config)?;
        let agent = client
            .agent(&self.config.model)
            .preamble(VISION_PREAMBLE)
            .temperature(self.config.temperature)
            .max_tokens(self.config.vision_max_tokens)
            .build();

        agent
            .prompt(Message::User { content })
            .await
            .map_err(|e| StageError::Execution(format!("vision prompt failed: {e}")))
    }
}

fn ensure_provider(config: &LlmConfig) -> Result<(), StageError> {
    if config.provider.to_lowercase() != "openai" {
        return Err(StageError::Config(format!(
            "unsupported llm provider '{}'",
            config.provider
        )));
    }
    Ok(())
}

fn build_client(config: &LlmConfig) -> Result<openai::Client, StageError> {
    ensure_provider(config)?;
    let api_key = std::env::var(&config.api_key_env)
        .map_err(|_| StageError::Config(format!("missing env var {}", config.api_key_env)))?;
    openai::Client::new(&api_key)
        .map_err(|e| StageError::Config(format!("openai client error: {e}")))
}

async fn run_prompt(config: &LlmConfig, preamble: &str, prompt: &str) -> Result<String, StageError> {
    let client = build_client(config)?;
    let agent = client
        .agent(&config.model)
        .preamble(preamble)
        .temperature(config.temperature)
        .build();

    agent
        .prompt(prompt)
        .await
        .map_err(|e| StageError::Execution(format!("llm prompt failed: {e}")))
}

fn structured_prompt<T: schemars::JsonSchema>(body: &str) -> Result<String, StageError> {
    let schema = serde_json::to_string(&schemars::schema_for!(T))
        .map_err(|e| StageError::Config(format!("schema encoding failed: {e}")))?;
    Ok(format!("Return JSON only.\nSchema: {schema}\n\n{body}"))
}

fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, StageError> {
    serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| StageError::InvalidOutput(format!("invalid stage json: {e}")))
}

/// Models sometimes wrap JSON in a Markdown fence despite instructions.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    match rest.split_once('\n') {
        Some((tag, body)) if !tag.trim_start().starts_with(|c: char| c == '{' || c == '[') => body.trim(),
        _ => rest.trim(),
    }
}
