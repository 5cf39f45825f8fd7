use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use genchat_contracts::{
    AppSettings, DEFAULT_IMAGE_MIME, JobStatus, MessagePart, ProviderId,
};
use genchat_core::{
    CoreError, Credentials, RemixJobRequest, VideoGenerateRequest, VideoJobClient, clamp_duration,
    is_pending_status, resolve_video_model,
};
use reqwest::{
    Client, Url,
    multipart::{Form, Part},
};
use serde_json::{Value, json};
use tracing::debug;

use crate::{HttpRuntime, find_string};

const FAILED_STATES: &[&str] = &["failed", "error", "cancelled"];
const VIDEO_URL_KEYS: &[&str] = &["video_url", "url", "output_url", "result_url"];
const NESTED_URL_KEYS: &[&str] = &["video_url", "url"];
const VIDEO_BASE64_KEYS: &[&str] = &["video_base64", "base64", "content"];

/// Job-style video provider: multipart create, status polling and remix.
pub struct VideoJobsClient {
    runtime: HttpRuntime,
}

impl VideoJobsClient {
    pub fn new(provider: ProviderId, http_client: Option<Client>) -> Self {
        Self { runtime: HttpRuntime::new(provider, http_client) }
    }

    fn videos_url(&self, credentials: &Credentials, segments: &[&str]) -> Result<Url, CoreError> {
        let base = credentials.base_url.trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}/v1/videos"))
            .map_err(|err| CoreError::Configuration(format!("invalid video base URL: {err}")))?;
        url.path_segments_mut()
            .map_err(|_| {
                CoreError::Configuration("video base URL cannot carry a path".to_string())
            })?
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl VideoJobClient for VideoJobsClient {
    async fn create_job(&self, request: VideoGenerateRequest<'_>) -> Result<String, CoreError> {
        let fields = JobFields::build(self.runtime.provider(), request.parts, request.settings)?;
        debug!(
            event = "video.job.fields",
            provider = %self.runtime.provider(),
            model = %fields.model,
            seconds = fields.seconds,
            size = %fields.size,
            references = fields.references.len()
        );
        let url = self.videos_url(request.credentials, &[])?;
        let http = self
            .runtime
            .client()?
            .post(url)
            .bearer_auth(&request.credentials.api_key)
            .multipart(fields.into_form()?);
        let body = self.runtime.send_json_lenient("video job creation failed", http).await?;
        job_id_from_payload(&body, "video job")
    }

    async fn create_remix(&self, request: RemixJobRequest<'_>) -> Result<String, CoreError> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(CoreError::Validation("remix prompt must not be empty".to_string()));
        }
        let url = self.videos_url(request.credentials, &[request.job_id, "remix"])?;
        let http = self
            .runtime
            .client()?
            .post(url)
            .bearer_auth(&request.credentials.api_key)
            .json(&json!({ "prompt": prompt }));
        let body = self.runtime.send_json_lenient("remix job creation failed", http).await?;
        job_id_from_payload(&body, "remix job")
    }

    async fn job_status(
        &self,
        credentials: &Credentials,
        job_id: &str,
    ) -> Result<JobStatus, CoreError> {
        let url = self.videos_url(credentials, &[job_id])?;
        let http = self.runtime.client()?.get(url).bearer_auth(&credentials.api_key);
        let body = self.runtime.send_json_lenient("video job status request failed", http).await?;
        Ok(job_status_from_payload(job_id, body))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ReferenceImage {
    file_name: String,
    mime_type: String,
    bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct JobFields {
    model: String,
    prompt: String,
    seconds: u32,
    size: String,
    ratio: String,
    references: Vec<ReferenceImage>,
}

impl JobFields {
    fn build(
        provider: ProviderId,
        parts: &[MessagePart],
        settings: &AppSettings,
    ) -> Result<Self, CoreError> {
        let model = resolve_video_model(provider, &settings.video_model).ok_or_else(|| {
            CoreError::Configuration(format!("{provider} does not support video generation"))
        })?;
        let prompt = parts
            .iter()
            .find_map(MessagePart::as_text)
            .map(str::trim)
            .unwrap_or_default()
            .to_string();

        let references = parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Image { content, mime_type } => Some((content, mime_type)),
                _ => None,
            })
            .enumerate()
            .map(|(index, (content, mime_type))| {
                let (bytes, mime_type) = decode_reference_image(content, mime_type)?;
                Ok(ReferenceImage { file_name: format!("reference{index}"), mime_type, bytes })
            })
            .collect::<Result<Vec<_>, CoreError>>()?;

        let seconds = clamp_duration(
            provider,
            settings.video_duration_seconds,
            &model,
            !references.is_empty(),
        )
        .unwrap_or(settings.video_duration_seconds);

        Ok(Self {
            model,
            prompt,
            seconds,
            size: settings.effective_video_size().as_str().to_string(),
            ratio: settings.video_aspect_ratio.as_str().to_string(),
            references,
        })
    }

    fn into_form(self) -> Result<Form, CoreError> {
        let mut form = Form::new()
            .text("model", self.model)
            .text("prompt", self.prompt)
            .text("seconds", self.seconds.to_string())
            .text("size", self.size)
            .text("ratio", self.ratio);
        for reference in self.references {
            let part = Part::bytes(reference.bytes)
                .file_name(reference.file_name)
                .mime_str(&reference.mime_type)
                .map_err(|err| {
                    CoreError::Validation(format!(
                        "invalid reference image type {}: {err}",
                        reference.mime_type
                    ))
                })?;
            form = form.part("input_reference", part);
        }
        Ok(form)
    }
}

/// Decodes a data URL or raw base64 image into bytes and its mime type.
pub fn decode_reference_image(
    content: &str,
    mime_type: &str,
) -> Result<(Vec<u8>, String), CoreError> {
    let (mime_type, data) = match content.split_once("base64,") {
        Some((meta, data)) => {
            let mime = meta
                .trim()
                .strip_prefix("data:")
                .and_then(|meta| meta.strip_suffix(';'))
                .filter(|mime| !mime.is_empty())
                .unwrap_or("application/octet-stream");
            (mime, data)
        }
        None => {
            let mime = if mime_type.trim().is_empty() { DEFAULT_IMAGE_MIME } else { mime_type };
            (mime, content)
        }
    };
    let bytes = BASE64.decode(data.trim()).map_err(|err| {
        CoreError::Validation(format!("reference image is not valid base64: {err}"))
    })?;
    Ok((bytes, mime_type.to_string()))
}

fn job_id_from_payload(body: &Value, what: &str) -> Result<String, CoreError> {
    match body.get("id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => Err(CoreError::Protocol(format!("{what} was created but no id was returned"))),
    }
}

fn status_text(payload: &Value) -> String {
    match payload.get("status") {
        Some(Value::String(status)) => status.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Classifies a status payload; terminal payloads get normalized parts.
pub fn job_status_from_payload(job_id: &str, payload: Value) -> JobStatus {
    let status = status_text(&payload);
    let done = !is_pending_status(&status);
    JobStatus {
        job_id: job_id.to_string(),
        done,
        status: (!status.is_empty()).then_some(status),
        progress: payload.get("progress").and_then(Value::as_f64),
        parts: done.then(|| build_video_parts(&payload)),
        raw: payload,
    }
}

pub fn build_video_parts(payload: &Value) -> Vec<MessagePart> {
    let status = status_text(payload).trim().to_ascii_lowercase();
    if FAILED_STATES.contains(&status.as_str()) {
        return vec![MessagePart::text(format!(
            "Video generation failed: {}",
            failure_detail(payload, &status)
        ))];
    }
    if let Some(url) = extract_video_url(payload) {
        return vec![MessagePart::video_url(url)];
    }
    if let Some(data) = extract_video_base64(payload) {
        return vec![MessagePart::video_base64(data)];
    }
    let pretty = serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string());
    vec![MessagePart::text(format!(
        "The job finished but no displayable video was found:\n```json\n{pretty}\n```"
    ))]
}

fn failure_detail(payload: &Value, status: &str) -> String {
    match payload.get("error") {
        Some(Value::String(error)) if !error.is_empty() => error.clone(),
        Some(Value::Object(error)) => {
            let message = error.get("message").and_then(Value::as_str).filter(|m| !m.is_empty());
            let code = error.get("code").filter(|code| !code.is_null()).map(|code| match code {
                Value::String(code) => code.clone(),
                other => other.to_string(),
            });
            match (message, code) {
                (Some(message), Some(code)) => format!("{message} (code: {code})"),
                (Some(message), None) => message.to_string(),
                (None, Some(code)) => format!("{status} (code: {code})"),
                (None, None) => Value::Object(error.clone()).to_string(),
            }
        }
        _ => find_string(payload, &["message"]).unwrap_or(status).to_string(),
    }
}

fn extract_video_url(payload: &Value) -> Option<&str> {
    if let Some(url) = find_string(payload, VIDEO_URL_KEYS) {
        return Some(url);
    }
    for key in ["video", "output"] {
        if let Some(url) = payload.get(key).and_then(Value::as_str).filter(|url| !url.is_empty()) {
            return Some(url);
        }
    }

    let containers = ["videos", "outputs", "results"]
        .iter()
        .find_map(|key| payload.get(*key).filter(|value| !value.is_null()));
    if let Some(items) = containers.and_then(Value::as_array) {
        for item in items {
            if let Some(url) = item.as_str().filter(|url| !url.is_empty()) {
                return Some(url);
            }
            if let Some(url) = find_string(item, NESTED_URL_KEYS) {
                return Some(url);
            }
        }
    }

    payload
        .get("output")
        .filter(|output| output.is_object())
        .and_then(|output| find_string(output, NESTED_URL_KEYS))
}

fn extract_video_base64(payload: &Value) -> Option<&str> {
    find_string(payload, VIDEO_BASE64_KEYS).or_else(|| {
        payload
            .get("video")
            .filter(|video| video.is_object())
            .and_then(|video| find_string(video, VIDEO_BASE64_KEYS))
    })
}

#[cfg(test)]
mod tests {
    use genchat_contracts::{VideoAspectRatio, VideoSource};

    use super::*;

    #[test]
    fn every_pending_status_keeps_polling() {
        for status in genchat_core::PENDING_STATES {
            let job =
                job_status_from_payload("j", json!({ "status": status.to_ascii_uppercase() }));
            assert!(!job.done, "{status}");
            assert!(job.parts.is_none());
        }
        for status in ["completed", "succeeded", "whatever"] {
            assert!(job_status_from_payload("j", json!({ "status": status })).done);
        }
        assert!(job_status_from_payload("j", json!({})).done);
    }

    #[test]
    fn failure_combines_message_and_code() {
        let job = job_status_from_payload(
            "j",
            json!({
                "status": "failed",
                "error": {"message": "quota exceeded", "code": "RESOURCE_EXHAUSTED"}
            }),
        );
        let parts = job.parts.expect("terminal status has parts");
        assert_eq!(parts.len(), 1);
        let text = parts[0].as_text().expect("failure is text");
        assert!(text.contains("quota exceeded"));
        assert!(text.contains("RESOURCE_EXHAUSTED"));
    }

    #[test]
    fn failure_without_error_uses_message_then_status() {
        let parts = build_video_parts(&json!({"status": "Cancelled", "message": "user abort"}));
        assert_eq!(parts, vec![MessagePart::text("Video generation failed: user abort")]);
        let parts = build_video_parts(&json!({"status": "error"}));
        assert_eq!(parts, vec![MessagePart::text("Video generation failed: error")]);
    }

    #[test]
    fn video_url_search_follows_field_priority() {
        let cases = [
            (
                json!({"status": "completed", "url": "https://a", "video_url": "https://b"}),
                "https://b",
            ),
            (json!({"status": "completed", "result_url": "https://r"}), "https://r"),
            (json!({"video": "https://v"}), "https://v"),
            (json!({"output": "https://o"}), "https://o"),
            (json!({"videos": ["", {"url": "https://arr"}]}), "https://arr"),
            (json!({"results": [{"video_url": "https://res"}]}), "https://res"),
            (json!({"output": {"url": "https://nested"}}), "https://nested"),
        ];
        for (payload, expected) in cases {
            assert_eq!(
                build_video_parts(&payload),
                vec![MessagePart::video_url(expected)],
                "{payload}"
            );
        }
    }

    #[test]
    fn base64_is_used_when_no_url_exists() {
        let parts = build_video_parts(&json!({"status": "completed", "video": {"base64": "AAAA"}}));
        assert_eq!(parts, vec![MessagePart::video_base64("AAAA")]);
        assert!(matches!(
            &parts[0],
            MessagePart::Video { source: VideoSource::Base64, .. }
        ));
    }

    #[test]
    fn unrecognized_payload_degrades_to_diagnostic_text() {
        let parts = build_video_parts(&json!({"status": "completed", "artifact": {"id": 7}}));
        let text = parts[0].as_text().expect("diagnostic text");
        assert!(text.contains("```json"));
        assert!(text.contains("\"artifact\""));
    }

    #[test]
    fn progress_is_surfaced() {
        let job = job_status_from_payload("j", json!({"status": "running", "progress": 42}));
        assert_eq!(job.progress, Some(42.0));
        assert_eq!(job.status.as_deref(), Some("running"));
    }

    #[test]
    fn reference_images_decode_from_data_url_or_raw_base64() {
        let (bytes, mime) =
            decode_reference_image("data:image/jpeg;base64,aGVsbG8=", "image/png").expect("decode");
        assert_eq!(bytes, b"hello");
        assert_eq!(mime, "image/jpeg");

        let (bytes, mime) = decode_reference_image("aGVsbG8=", "").expect("decode");
        assert_eq!(bytes, b"hello");
        assert_eq!(mime, DEFAULT_IMAGE_MIME);

        assert!(matches!(
            decode_reference_image("not base64!", "image/png"),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn job_fields_clamp_duration_and_derive_size() {
        let settings = AppSettings {
            provider: ProviderId::Sora,
            video_duration_seconds: 8,
            video_size: None,
            video_aspect_ratio: VideoAspectRatio::Portrait,
            video_model: "veo_3_1".to_string(),
            ..AppSettings::default()
        };
        let parts = [
            MessagePart::image("aGVsbG8=", "image/png"),
            MessagePart::text("  a quiet harbour  "),
        ];
        let fields = JobFields::build(ProviderId::Sora, &parts, &settings).expect("fields");
        assert_eq!(fields.model, "sora-2");
        assert_eq!(fields.prompt, "a quiet harbour");
        assert_eq!(fields.seconds, 10);
        assert_eq!(fields.size, "720x1280");
        assert_eq!(fields.ratio, "9:16");
        assert_eq!(fields.references.len(), 1);
        assert_eq!(fields.references[0].file_name, "reference0");
        assert!(fields.into_form().is_ok());
    }

    #[test]
    fn job_id_is_required() {
        assert_eq!(
            job_id_from_payload(&json!({"id": "sora-2:task_1"}), "video job").ok().as_deref(),
            Some("sora-2:task_1")
        );
        assert!(matches!(
            job_id_from_payload(&json!({"status": "queued"}), "video job"),
            Err(CoreError::Protocol(_))
        ));
    }

    #[test]
    fn job_urls_escape_the_id_segment() {
        let client = VideoJobsClient::new(ProviderId::Sora, None);
        let credentials = Credentials {
            base_url: "https://video.example/".to_string(),
            api_key: "k".to_string(),
        };
        let url = client.videos_url(&credentials, &["a/b", "remix"]).expect("url");
        assert_eq!(url.as_str(), "https://video.example/v1/videos/a%2Fb/remix");
    }
}
