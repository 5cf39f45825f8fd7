use async_trait::async_trait;
use genchat_contracts::{AppSettings, DEFAULT_IMAGE_MIME, ImageSize, MessagePart, RawParts, Role};
use genchat_core::{
    CoreError, HistoryPart, HistoryTurn, ImageClient, ImageGenerateRequest, ImageGeneration,
    TurnBody,
};
use reqwest::Client;
use serde_json::{Value, json};

use crate::HttpRuntime;

pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_HIRES_IMAGE_MODEL: &str = "gemini-3-pro-image-preview";
const NOTHING_GENERATED: &str = "(nothing displayable was generated)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageModels {
    pub standard: String,
    pub high_resolution: String,
}

impl Default for ImageModels {
    fn default() -> Self {
        Self {
            standard: DEFAULT_IMAGE_MODEL.to_string(),
            high_resolution: DEFAULT_HIRES_IMAGE_MODEL.to_string(),
        }
    }
}

impl ImageModels {
    pub fn for_size(&self, size: ImageSize) -> &str {
        if size.is_high_resolution() { &self.high_resolution } else { &self.standard }
    }
}

pub struct GeminiImageClient {
    runtime: HttpRuntime,
    models: ImageModels,
}

impl GeminiImageClient {
    pub fn new(http_client: Option<Client>, models: ImageModels) -> Self {
        Self {
            runtime: HttpRuntime::new(genchat_contracts::ProviderId::NanoBananaPro, http_client),
            models,
        }
    }
}

#[async_trait]
impl ImageClient for GeminiImageClient {
    async fn generate(
        &self,
        request: ImageGenerateRequest<'_>,
    ) -> Result<ImageGeneration, CoreError> {
        let base_url = normalize_image_base_url(&request.credentials.base_url);
        if base_url.is_empty() {
            return Err(CoreError::Configuration("image base URL is not configured".to_string()));
        }
        let model = self.models.for_size(request.settings.resolution);
        let url = format!("{base_url}/models/{model}:generateContent");
        let payload = build_image_payload(request.contents, request.settings);

        let http = self
            .runtime
            .client()?
            .post(url)
            .header("x-goog-api-key", request.credentials.api_key.as_str())
            .json(&payload);
        let body = self.runtime.send_json("image generation failed", http).await?;
        parse_image_response(&body)
    }
}

/// Appends `/v1beta` unless the URL already names an API version segment.
pub fn normalize_image_base_url(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }
    let versioned =
        trimmed.split('/').skip(3).any(|segment| segment == "v1beta" || segment == "v1");
    if versioned { trimmed.to_string() } else { format!("{trimmed}/v1beta") }
}

pub fn build_image_payload(contents: &[HistoryTurn], settings: &AppSettings) -> Value {
    let contents = contents
        .iter()
        .map(|turn| {
            let parts = match &turn.body {
                TurnBody::Raw(raw) => Value::Array(raw.as_slice().to_vec()),
                TurnBody::Parts(parts) => Value::Array(parts.iter().map(history_part).collect()),
            };
            json!({ "role": role_name(turn.role), "parts": parts })
        })
        .collect::<Vec<_>>();

    json!({
        "contents": contents,
        "generationConfig": {
            "responseModalities": ["image"],
            "imageConfig": {
                "aspectRatio": settings.aspect_ratio.as_str(),
                "imageSize": settings.resolution.as_str(),
            },
        },
    })
}

fn history_part(part: &HistoryPart) -> Value {
    match part {
        HistoryPart::Text(text) => json!({ "text": text }),
        HistoryPart::InlineData { mime_type, data } => {
            json!({ "inlineData": { "mimeType": mime_type, "data": data } })
        }
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Model => "model",
    }
}

/// Normalizes a generateContent response. Thought parts are dropped from the
/// visible parts but kept in `raw_parts`.
pub fn parse_image_response(body: &Value) -> Result<ImageGeneration, CoreError> {
    let candidate = body
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .ok_or_else(|| {
            let feedback = body
                .get("promptFeedback")
                .map(|feedback| format!(" (prompt feedback: {feedback})"))
                .unwrap_or_default();
            CoreError::Protocol(format!("image response has no candidates{feedback}"))
        })?;
    let raw = candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut parts = Vec::new();
    let mut image_count = 0;
    for part in &raw {
        if part.get("thought").is_some() {
            continue;
        }
        let inline = part.get("inlineData").or_else(|| part.get("inline_data"));
        if let Some(inline) = inline {
            let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .filter(|mime| !mime.is_empty())
                .unwrap_or(DEFAULT_IMAGE_MIME);
            parts.push(MessagePart::image(data, mime_type));
            image_count += 1;
        } else if let Some(text) = part.get("text").and_then(Value::as_str)
            && !text.is_empty()
        {
            parts.push(MessagePart::text(text));
        }
    }
    if parts.is_empty() {
        parts.push(MessagePart::text(NOTHING_GENERATED));
    }

    Ok(ImageGeneration {
        parts,
        raw_parts: RawParts(raw),
        image_count,
        usage: body.get("usageMetadata").cloned(),
    })
}

#[cfg(test)]
mod tests {
    use genchat_contracts::AspectRatio;
    use genchat_core::HistoryWindow;

    use super::*;

    #[test]
    fn base_url_gets_api_version_when_missing() {
        assert_eq!(
            normalize_image_base_url("https://proxy.example/"),
            "https://proxy.example/v1beta"
        );
        assert_eq!(
            normalize_image_base_url("https://generativelanguage.googleapis.com/v1beta"),
            "https://generativelanguage.googleapis.com/v1beta"
        );
        assert_eq!(
            normalize_image_base_url("https://proxy.example/v1/"),
            "https://proxy.example/v1"
        );
        assert_eq!(
            normalize_image_base_url("https://proxy.example/v1x"),
            "https://proxy.example/v1x/v1beta"
        );
        assert_eq!(normalize_image_base_url("  "), "");
    }

    #[test]
    fn resolution_tier_selects_model() {
        let models = ImageModels::default();
        assert_eq!(models.for_size(ImageSize::OneK), DEFAULT_IMAGE_MODEL);
        assert_eq!(models.for_size(ImageSize::TwoK), DEFAULT_HIRES_IMAGE_MODEL);
        assert_eq!(models.for_size(ImageSize::FourK), DEFAULT_HIRES_IMAGE_MODEL);
    }

    #[test]
    fn payload_replays_raw_parts_and_carries_generation_config() {
        let raw = json!({"text": "ok", "thoughtSignature": "opaque"});
        let past = vec![
            genchat_contracts::Message::user(vec![MessagePart::text("cat")]),
            genchat_contracts::Message::model(vec![MessagePart::text("ok")])
                .with_raw_parts(RawParts(vec![raw.clone()])),
        ];
        let contents = HistoryWindow::default()
            .build(&past, &[MessagePart::image("data:image/png;base64,AAAA", "image/png")]);
        let settings = AppSettings {
            aspect_ratio: AspectRatio::Square,
            resolution: ImageSize::FourK,
            ..AppSettings::default()
        };

        let payload = build_image_payload(&contents, &settings);
        assert_eq!(payload["contents"][0], json!({"role": "user", "parts": [{"text": "cat"}]}));
        assert_eq!(payload["contents"][1], json!({"role": "model", "parts": [raw]}));
        assert_eq!(
            payload["contents"][2]["parts"][0],
            json!({"inlineData": {"mimeType": "image/png", "data": "AAAA"}})
        );
        assert_eq!(
            payload["generationConfig"],
            json!({
                "responseModalities": ["image"],
                "imageConfig": {"aspectRatio": "1:1", "imageSize": "4K"}
            })
        );
    }

    #[test]
    fn thought_parts_are_dropped_and_images_counted() {
        let body = json!({
            "candidates": [{"content": {"parts": [
                {"thought": true, "text": "planning"},
                {"inlineData": {"mimeType": "image/png", "data": "AAAA"}},
                {
                    "inlineData": {"mimeType": "image/jpeg", "data": "BBBB"},
                    "thoughtSignature": "sig"
                }
            ]}}],
            "usageMetadata": {"promptTokenCount": 5}
        });
        let generation = parse_image_response(&body).expect("response must parse");
        assert_eq!(generation.image_count, 2);
        assert_eq!(
            generation.parts,
            vec![MessagePart::image("AAAA", "image/png"), MessagePart::image("BBBB", "image/jpeg")]
        );
        assert_eq!(generation.raw_parts.as_slice().len(), 3);
        assert_eq!(generation.usage, Some(json!({"promptTokenCount": 5})));
    }

    #[test]
    fn empty_candidate_yields_placeholder() {
        let body = json!({"candidates": [{"finishReason": "SAFETY"}]});
        let generation = parse_image_response(&body).expect("response must parse");
        assert_eq!(generation.parts, vec![MessagePart::text(NOTHING_GENERATED)]);
        assert_eq!(generation.image_count, 0);
        assert!(generation.usage.is_none());
    }

    #[test]
    fn missing_candidates_is_a_protocol_error() {
        let err = parse_image_response(&json!({"promptFeedback": {"blockReason": "OTHER"}}))
            .expect_err("must fail");
        assert!(matches!(err, CoreError::Protocol(ref message) if message.contains("blockReason")));
    }
}
