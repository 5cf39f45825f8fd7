use async_trait::async_trait;
use genchat_contracts::{JobStatus, MessagePart, ProviderId};
use genchat_core::{
    CoreError, Credentials, HistoryPart, ImageClient, ImageGenerateRequest, ImageGeneration,
    RemixJobRequest, TurnBody, VideoGenerateRequest, VideoJobClient, VideoStreamClient,
};
use serde_json::json;
use uuid::Uuid;

use crate::clients::{
    image::parse_image_response,
    jobs::job_status_from_payload,
    stream::{SseAccumulator, parts_from_stream_text},
};

/// 1x1 transparent PNG.
const MOCK_PNG: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

/// Offline image backend: answers every prompt with a fixed image and an echo.
pub struct MockImageClient;

#[async_trait]
impl ImageClient for MockImageClient {
    async fn generate(
        &self,
        request: ImageGenerateRequest<'_>,
    ) -> Result<ImageGeneration, CoreError> {
        let prompt = request
            .contents
            .last()
            .map(|turn| match &turn.body {
                TurnBody::Parts(parts) => parts
                    .iter()
                    .filter_map(|part| match part {
                        HistoryPart::Text(text) => Some(text.as_str()),
                        HistoryPart::InlineData { .. } => None,
                    })
                    .collect::<Vec<_>>()
                    .join(" "),
                TurnBody::Raw(_) => String::new(),
            })
            .unwrap_or_default();
        let words = prompt.split_whitespace().count();

        let body = json!({
            "candidates": [{"content": {"role": "model", "parts": [
                {"inlineData": {"mimeType": "image/png", "data": MOCK_PNG}},
                {"text": format!("[mock {}] {prompt}", request.settings.resolution.as_str())},
            ]}}],
            "usageMetadata": {"promptTokenCount": words, "candidatesTokenCount": 1},
        });
        parse_image_response(&body)
    }
}

/// Offline job backend: every job completes on its first poll.
pub struct MockVideoJobClient {
    provider: ProviderId,
}

impl MockVideoJobClient {
    pub fn new(provider: ProviderId) -> Self {
        Self { provider }
    }

    fn next_job_id(&self) -> String {
        format!("sora-2:mock_{}", Uuid::new_v4().simple())
    }
}

#[async_trait]
impl VideoJobClient for MockVideoJobClient {
    async fn create_job(&self, request: VideoGenerateRequest<'_>) -> Result<String, CoreError> {
        let has_prompt = request
            .parts
            .iter()
            .any(|part| part.as_text().is_some_and(|text| !text.trim().is_empty()));
        if !has_prompt && !request.parts.iter().any(MessagePart::is_image) {
            return Err(CoreError::Validation(format!("{} needs a prompt", self.provider)));
        }
        Ok(self.next_job_id())
    }

    async fn create_remix(&self, _request: RemixJobRequest<'_>) -> Result<String, CoreError> {
        Ok(self.next_job_id())
    }

    async fn job_status(
        &self,
        _credentials: &Credentials,
        job_id: &str,
    ) -> Result<JobStatus, CoreError> {
        let payload = json!({
            "id": job_id,
            "status": "completed",
            "progress": 100,
            "video_url": format!("https://mock.invalid/{}.mp4", job_id.replace(':', "_")),
        });
        Ok(job_status_from_payload(job_id, payload))
    }
}

/// Offline streaming backend replaying a canned event stream.
pub struct MockVideoStreamClient;

#[async_trait]
impl VideoStreamClient for MockVideoStreamClient {
    async fn generate(
        &self,
        request: VideoGenerateRequest<'_>,
    ) -> Result<Vec<MessagePart>, CoreError> {
        let prompt = request.parts.iter().find_map(MessagePart::as_text).unwrap_or_default();
        let lead = format!("Rendered \"{}\": ", prompt.trim());
        let frames = [
            json!({"choices": [{"delta": {"content": lead}}]}),
            json!({"choices": [{"delta": {"content": "[video](https://mock.invalid/stream.mp4)"}}]}),
        ];
        let mut accumulator = SseAccumulator::default();
        for frame in frames {
            accumulator.push(format!("data: {frame}\n\n").as_bytes());
        }
        accumulator.push(b"data: [DONE]\n");
        Ok(parts_from_stream_text(accumulator.text()))
    }
}
