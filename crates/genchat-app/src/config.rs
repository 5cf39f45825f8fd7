use std::{env, path::PathBuf, time::Duration};

use genchat_clients::{DEFAULT_HIRES_IMAGE_MODEL, DEFAULT_IMAGE_MODEL, ImageModels};
use genchat_core::{
    CredentialDefaults, DEFAULT_HISTORY_ROUNDS, DEFAULT_IMAGE_BASE_URL, DEFAULT_POLL_ATTEMPTS,
    DEFAULT_RECOVERY_MARKER, OrchestratorOptions, PollPolicy, RetryOnMarker,
};
use genchat_observability::parse_truthy;

pub const DEFAULT_SETTINGS_PATH: &str = "./genchat-settings.json";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub provider_timeout_seconds: u64,
    /// `None` keeps client settings in memory only.
    pub settings_path: Option<PathBuf>,
    pub history_rounds: usize,
    pub poll_interval: Duration,
    pub poll_max_attempts: u32,
    pub recovery_marker: String,
    pub image_base_url: String,
    pub image_api_key: String,
    pub image_model: String,
    pub image_model_hires: String,
    pub mock_providers: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid GC_PORT value: {0}")]
    InvalidPort(String),
    #[error("invalid GC_PROVIDER_TIMEOUT value: {0}")]
    InvalidProviderTimeout(String),
    #[error("invalid GC_HISTORY_ROUNDS value: {0}")]
    InvalidHistoryRounds(String),
    #[error("invalid GC_POLL_INTERVAL_MS value: {0}")]
    InvalidPollInterval(String),
    #[error("invalid GC_POLL_MAX_ATTEMPTS value: {0}")]
    InvalidPollMaxAttempts(String),
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let host = var("GC_HOST", "127.0.0.1");

        let port_raw = var("GC_PORT", "3000");
        let port = port_raw
            .trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort(port_raw.clone()))?;

        let timeout_raw = var("GC_PROVIDER_TIMEOUT", "600");
        let provider_timeout_seconds = timeout_raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidProviderTimeout(timeout_raw.clone()))?;

        let settings_path = lookup("GC_SETTINGS_PATH")
            .map_or_else(|| Some(DEFAULT_SETTINGS_PATH.to_string()), |raw| non_empty(Some(raw)))
            .map(PathBuf::from);

        let rounds_raw = var("GC_HISTORY_ROUNDS", DEFAULT_HISTORY_ROUNDS.to_string().as_str());
        let history_rounds = parse_positive_usize(&rounds_raw)
            .ok_or_else(|| ConfigError::InvalidHistoryRounds(rounds_raw.clone()))?;

        let interval_raw = var("GC_POLL_INTERVAL_MS", "5000");
        let poll_interval = interval_raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::InvalidPollInterval(interval_raw.clone()))?;

        let attempts_raw = var("GC_POLL_MAX_ATTEMPTS", DEFAULT_POLL_ATTEMPTS.to_string().as_str());
        let poll_max_attempts = parse_positive_usize(&attempts_raw)
            .and_then(|value| u32::try_from(value).ok())
            .ok_or_else(|| ConfigError::InvalidPollMaxAttempts(attempts_raw.clone()))?;

        let mock_providers = lookup("GC_MOCK_PROVIDERS").is_some_and(|value| parse_truthy(&value));

        Ok(Self {
            host,
            port,
            provider_timeout_seconds,
            settings_path,
            history_rounds,
            poll_interval,
            poll_max_attempts,
            recovery_marker: var("GC_RECOVERY_MARKER", DEFAULT_RECOVERY_MARKER),
            image_base_url: non_empty(lookup("GEMINI_BASE_URL"))
                .unwrap_or_else(|| DEFAULT_IMAGE_BASE_URL.to_string()),
            image_api_key: non_empty(lookup("GEMINI_API_KEY")).unwrap_or_default(),
            image_model: non_empty(lookup("GC_IMAGE_MODEL"))
                .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
            image_model_hires: non_empty(lookup("GC_IMAGE_MODEL_HIRES"))
                .unwrap_or_else(|| DEFAULT_HIRES_IMAGE_MODEL.to_string()),
            mock_providers,
        })
    }

    pub fn for_tests() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            provider_timeout_seconds: 600,
            settings_path: None,
            history_rounds: DEFAULT_HISTORY_ROUNDS,
            poll_interval: Duration::ZERO,
            poll_max_attempts: 3,
            recovery_marker: DEFAULT_RECOVERY_MARKER.to_string(),
            image_base_url: DEFAULT_IMAGE_BASE_URL.to_string(),
            image_api_key: "test-key".to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            image_model_hires: DEFAULT_HIRES_IMAGE_MODEL.to_string(),
            mock_providers: true,
        }
    }

    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            history_rounds: self.history_rounds,
            poll: PollPolicy { interval: self.poll_interval, max_attempts: self.poll_max_attempts },
            recovery: RetryOnMarker::new(self.recovery_marker.as_str()),
            credential_defaults: CredentialDefaults {
                image_base_url: self.image_base_url.clone(),
                image_api_key: self.image_api_key.clone(),
            },
        }
    }

    pub fn image_models(&self) -> ImageModels {
        ImageModels {
            standard: self.image_model.clone(),
            high_resolution: self.image_model_hires.clone(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_positive_usize(value: &str) -> Option<usize> {
    let parsed = value.trim().parse::<usize>().ok()?;
    if parsed == 0 { None } else { Some(parsed) }
}
