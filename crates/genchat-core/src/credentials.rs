use std::fmt;

use genchat_contracts::{ClientSettings, ProviderConfig, ProviderId};

use crate::CoreError;

pub const DEFAULT_IMAGE_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Built-in fallbacks. Only the image provider has any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialDefaults {
    pub image_base_url: String,
    pub image_api_key: String,
}

impl Default for CredentialDefaults {
    fn default() -> Self {
        Self { image_base_url: DEFAULT_IMAGE_BASE_URL.to_string(), image_api_key: String::new() }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub base_url: String,
    pub api_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("base_url", &self.base_url)
            .field("api_key", &if self.api_key.is_empty() { "<empty>" } else { "<redacted>" })
            .finish()
    }
}

/// Provider-specific value, then shared value, then built-in default, per field.
pub fn resolve_credentials(
    settings: &ClientSettings,
    provider: ProviderId,
    defaults: &CredentialDefaults,
) -> Result<Credentials, CoreError> {
    let effective = effective_config(settings, provider);

    if provider.is_video() {
        if effective.base_url.is_empty() || effective.api_key.is_empty() {
            return Err(CoreError::Configuration(format!(
                "set a Base URL and API token for the {provider} video provider in settings"
            )));
        }
        return Ok(Credentials { base_url: effective.base_url, api_key: effective.api_key });
    }

    let base_url = non_empty(&effective.base_url)
        .or_else(|| non_empty(&defaults.image_base_url))
        .map(trim_base_url)
        .unwrap_or_default();
    let api_key = non_empty(&effective.api_key)
        .or_else(|| non_empty(&defaults.image_api_key))
        .map(str::to_string)
        .unwrap_or_default();
    if api_key.is_empty() {
        return Err(CoreError::Configuration(format!(
            "image generation is not configured: set an API key for {provider} in settings"
        )));
    }

    Ok(Credentials { base_url, api_key })
}

/// Provider slot with shared fallback applied, without built-in defaults.
pub fn effective_config(settings: &ClientSettings, provider: ProviderId) -> ProviderConfig {
    let local = settings.providers.get(provider);
    let shared = &settings.shared;
    ProviderConfig {
        base_url: non_empty(&local.base_url)
            .or_else(|| non_empty(&shared.base_url))
            .map(trim_base_url)
            .unwrap_or_default(),
        api_key: non_empty(&local.api_key)
            .or_else(|| non_empty(&shared.api_key))
            .map(str::to_string)
            .unwrap_or_default(),
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}

fn trim_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
