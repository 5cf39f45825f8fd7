use std::fmt;

use async_trait::async_trait;
use genchat_contracts::{AppSettings, JobStatus, MessagePart, RawParts};
use serde_json::Value;

mod credentials;
mod history;
mod jobs;
mod orchestrator;
mod recovery;
mod settings;
mod video_options;

pub use credentials::{
    CredentialDefaults, Credentials, DEFAULT_IMAGE_BASE_URL, effective_config, resolve_credentials,
};
pub use history::{
    CONTINUATION_PROMPT, DEFAULT_HISTORY_ROUNDS, HistoryPart, HistoryTurn, HistoryWindow,
    MODEL_TURN_PLACEHOLDER, TurnBody, find_recent_image, strip_data_url_prefix,
};
pub use jobs::{
    DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL, JobLifecycle, JobOutcome, JobPoller,
    PENDING_STATES, PollPolicy, is_pending_status,
};
pub use orchestrator::{Orchestrator, OrchestratorOptions, PendingGeneration, ProviderClients};
pub use recovery::{DEFAULT_RECOVERY_MARKER, RECOVERY_NOTE, RetryOnMarker};
pub use settings::{FileSettingsStore, MemorySettingsStore, SettingsStore, parse_client_settings};
pub use video_options::{
    DEFAULT_SORA_MODEL, DEFAULT_VEO_MODEL, SORA_DURATIONS, VEO_DURATIONS, VEO_MODELS,
    VEO_REFERENCE_DURATIONS, allowed_durations, clamp_duration, default_video_model,
    resolve_video_model,
};

const BODY_EXCERPT_LIMIT: usize = 1024;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("transport error{}: {detail}", status_suffix(.status))]
    Transport { status: Option<u16>, detail: String },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("settings error: {0}")]
    Settings(String),
}

impl CoreError {
    /// Transport failure carrying an HTTP status and an excerpt of the body.
    pub fn http_status(status: u16, context: &str, body: &str) -> Self {
        Self::Transport {
            status: Some(status),
            detail: format!("{context}: {}", excerpt(body, BODY_EXCERPT_LIMIT)),
        }
    }

    pub fn network(context: &str, err: impl fmt::Display) -> Self {
        Self::Transport { status: None, detail: format!("{context}: {err}") }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|status| format!(" (status {status})")).unwrap_or_default()
}

fn excerpt(body: &str, limit: usize) -> &str {
    let body = body.trim();
    if body.len() <= limit {
        return body;
    }
    let mut end = limit;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

pub struct ImageGenerateRequest<'a> {
    pub credentials: &'a Credentials,
    pub contents: &'a [HistoryTurn],
    pub settings: &'a AppSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageGeneration {
    pub parts: Vec<MessagePart>,
    pub raw_parts: RawParts,
    pub image_count: usize,
    pub usage: Option<Value>,
}

pub struct VideoGenerateRequest<'a> {
    pub credentials: &'a Credentials,
    pub parts: &'a [MessagePart],
    pub settings: &'a AppSettings,
}

pub struct RemixJobRequest<'a> {
    pub credentials: &'a Credentials,
    pub job_id: &'a str,
    pub prompt: &'a str,
}

#[async_trait]
pub trait ImageClient: Send + Sync {
    async fn generate(
        &self,
        request: ImageGenerateRequest<'_>,
    ) -> Result<ImageGeneration, CoreError>;
}

#[async_trait]
pub trait VideoJobClient: Send + Sync {
    /// Returns the id of the created job.
    async fn create_job(&self, request: VideoGenerateRequest<'_>) -> Result<String, CoreError>;

    async fn create_remix(&self, request: RemixJobRequest<'_>) -> Result<String, CoreError>;

    async fn job_status(
        &self,
        credentials: &Credentials,
        job_id: &str,
    ) -> Result<JobStatus, CoreError>;
}

#[async_trait]
pub trait VideoStreamClient: Send + Sync {
    async fn generate(
        &self,
        request: VideoGenerateRequest<'_>,
    ) -> Result<Vec<MessagePart>, CoreError>;
}
