use std::time::{Duration, Instant};

use genchat_contracts::ProviderId;
use genchat_core::CoreError;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{Map, Value};
use tracing::{info, warn};

pub mod clients;

pub use clients::{
    ChatVideoClient, DEFAULT_HIRES_IMAGE_MODEL, DEFAULT_IMAGE_MODEL, GeminiImageClient,
    ImageModels, MockImageClient, MockVideoJobClient, MockVideoStreamClient, SseAccumulator,
    VideoJobsClient, build_image_payload, build_stream_payload, build_video_parts,
    decode_reference_image, job_status_from_payload, normalize_image_base_url,
    parse_image_response, parts_from_stream_text,
};

pub fn build_http_client(timeout_seconds: u64) -> Option<Client> {
    Client::builder().timeout(Duration::from_secs(timeout_seconds)).build().ok()
}

/// Shared transport plumbing: one reqwest client, uniform logging and
/// status-to-error mapping for every provider.
#[derive(Clone)]
pub struct HttpRuntime {
    provider: ProviderId,
    http_client: Option<Client>,
}

impl HttpRuntime {
    pub fn new(provider: ProviderId, http_client: Option<Client>) -> Self {
        Self { provider, http_client }
    }

    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    pub(crate) fn client(&self) -> Result<&Client, CoreError> {
        self.http_client
            .as_ref()
            .ok_or_else(|| CoreError::Configuration("provider http client init failed".to_string()))
    }

    /// Sends `request`; any non-2xx status becomes a transport error with a body excerpt.
    pub(crate) async fn send(
        &self,
        context: &'static str,
        request: RequestBuilder,
    ) -> Result<Response, CoreError> {
        let started = Instant::now();
        info!(event = "provider.request.sent", provider = %self.provider, operation = context);
        let response = request.send().await.map_err(|err| {
            warn!(
                event = "provider.request.failed",
                provider = %self.provider,
                operation = context,
                error = %err
            );
            CoreError::network(context, err)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                event = "provider.response.error_status",
                provider = %self.provider,
                operation = context,
                status = status.as_u16(),
                elapsed_ms = started.elapsed().as_millis() as u64
            );
            return Err(CoreError::http_status(status.as_u16(), context, &body));
        }

        info!(
            event = "provider.response.received",
            provider = %self.provider,
            operation = context,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64
        );
        Ok(response)
    }

    pub(crate) async fn send_json(
        &self,
        context: &'static str,
        request: RequestBuilder,
    ) -> Result<Value, CoreError> {
        let response = self.send(context, request).await?;
        response
            .json::<Value>()
            .await
            .map_err(|err| CoreError::Protocol(format!("{context}: invalid JSON response: {err}")))
    }

    /// Like [`Self::send_json`], but an unparseable 2xx body reads as `{}`.
    pub(crate) async fn send_json_lenient(
        &self,
        context: &'static str,
        request: RequestBuilder,
    ) -> Result<Value, CoreError> {
        let response = self.send(context, request).await?;
        match response.json::<Value>().await {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(
                    event = "provider.response.unparsed",
                    provider = %self.provider,
                    operation = context,
                    error = %err
                );
                Ok(Value::Object(Map::new()))
            }
        }
    }
}

/// First non-empty string among `keys` on `value`.
pub(crate) fn find_string<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| value.get(*key).and_then(Value::as_str))
        .find(|text| !text.is_empty())
}
