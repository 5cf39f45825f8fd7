use std::sync::LazyLock;

use async_trait::async_trait;
use futures::StreamExt;
use genchat_contracts::{AppSettings, DEFAULT_IMAGE_MIME, MessagePart, ProviderId};
use genchat_core::{
    CoreError, VideoGenerateRequest, VideoStreamClient, clamp_duration, resolve_video_model,
};
use regex::Regex;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::HttpRuntime;

const DONE_MARKER: &str = "[DONE]";
const NOTHING_PARSED: &str = "(nothing could be parsed from the stream)";
/// Longest `data:` line kept in memory before it is dropped as a bad frame.
const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;
/// Sentence punctuation that ends prose, not URLs.
const URL_TRAILING_PUNCTUATION: &[char] =
    &['.', ',', ';', ':', '!', '?', '。', '，', '！', '？'];

static MARKDOWN_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!?\[[^\]]*\]\((https?://[^\s)]+)\)").expect("markdown link pattern is valid")
});
static BARE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s)\]>"'`]+"#).expect("url pattern is valid")
});
static SPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]{2,}").expect("space run pattern is valid"));

/// Chat-completions style video provider answered over server-sent events.
pub struct ChatVideoClient {
    runtime: HttpRuntime,
}

impl ChatVideoClient {
    pub fn new(provider: ProviderId, http_client: Option<Client>) -> Self {
        Self { runtime: HttpRuntime::new(provider, http_client) }
    }
}

#[async_trait]
impl VideoStreamClient for ChatVideoClient {
    async fn generate(
        &self,
        request: VideoGenerateRequest<'_>,
    ) -> Result<Vec<MessagePart>, CoreError> {
        let provider = self.runtime.provider();
        let model = resolve_video_model(provider, &request.settings.video_model).ok_or_else(|| {
            CoreError::Configuration(format!("{provider} does not support video generation"))
        })?;
        let payload = build_stream_payload(provider, &model, request.parts, request.settings);
        let url = format!(
            "{}/v1/chat/completions",
            request.credentials.base_url.trim_end_matches('/')
        );

        let http = self
            .runtime
            .client()?
            .post(url)
            .bearer_auth(&request.credentials.api_key)
            .header("Accept", "text/event-stream")
            .json(&payload);
        let response = self.runtime.send("video stream request failed", http).await?;

        let mut accumulator = SseAccumulator::default();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| CoreError::network("video stream read failed", err))?;
            if accumulator.push(&chunk) {
                break;
            }
        }
        accumulator.finish();
        if accumulator.skipped() > 0 {
            warn!(
                event = "provider.stream.skipped_frames",
                provider = %provider,
                skipped = accumulator.skipped()
            );
        }
        debug!(
            event = "provider.stream.completed",
            provider = %provider,
            chars = accumulator.text().len()
        );

        Ok(parts_from_stream_text(accumulator.text()))
    }
}

/// One user message whose content interleaves text and inline data-URL images.
pub fn build_stream_payload(
    provider: ProviderId,
    model: &str,
    parts: &[MessagePart],
    settings: &AppSettings,
) -> Value {
    let content = parts
        .iter()
        .filter_map(|part| match part {
            MessagePart::Text { content } => Some(json!({ "type": "text", "text": content })),
            MessagePart::Image { content, mime_type } => {
                let url = data_url(content, mime_type);
                Some(json!({ "type": "image_url", "image_url": { "url": url } }))
            }
            MessagePart::Video { .. } => None,
        })
        .collect::<Vec<_>>();
    let has_reference = parts.iter().any(MessagePart::is_image);
    let seconds = clamp_duration(provider, settings.video_duration_seconds, model, has_reference)
        .unwrap_or(settings.video_duration_seconds);

    json!({
        "model": model,
        "stream": true,
        "seconds": seconds,
        "size": settings.effective_video_size().as_str(),
        "messages": [{ "role": "user", "content": content }],
    })
}

fn data_url(content: &str, mime_type: &str) -> String {
    if content.starts_with("data:") {
        return content.to_string();
    }
    let mime_type = if mime_type.trim().is_empty() { DEFAULT_IMAGE_MIME } else { mime_type };
    format!("data:{mime_type};base64,{content}")
}

/// Incremental `data:` line reader for chat-completion event streams.
#[derive(Debug)]
pub struct SseAccumulator {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already searched for a newline.
    scanned: usize,
    max_line_bytes: usize,
    /// Set while skipping the rest of an oversized line.
    discarding: bool,
    text: String,
    finished: bool,
    skipped: usize,
}

impl Default for SseAccumulator {
    fn default() -> Self {
        Self::with_line_limit(MAX_LINE_BYTES)
    }
}

impl SseAccumulator {
    pub fn with_line_limit(max_line_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_line_bytes,
            discarding: false,
            text: String::new(),
            finished: false,
            skipped: 0,
        }
    }

    /// Feeds raw bytes. Returns `true` once the terminator has been read.
    pub fn push(&mut self, chunk: &[u8]) -> bool {
        if self.finished {
            return true;
        }
        self.buffer.extend_from_slice(chunk);
        loop {
            let Some(offset) = self.buffer[self.scanned..].iter().position(|byte| *byte == b'\n')
            else {
                self.scanned = self.buffer.len();
                break;
            };
            let line = self.buffer.drain(..=self.scanned + offset).collect::<Vec<u8>>();
            self.scanned = 0;
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            self.consume_line(&String::from_utf8_lossy(&line));
            if self.finished {
                self.buffer.clear();
                return true;
            }
        }
        if self.buffer.len() > self.max_line_bytes {
            if !self.discarding {
                self.skipped += 1;
            }
            self.discarding = true;
            self.buffer.clear();
            self.scanned = 0;
        }
        false
    }

    /// Interprets a trailing line left without a newline.
    pub fn finish(&mut self) {
        if self.finished || self.discarding || self.buffer.is_empty() {
            return;
        }
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        self.consume_line(&String::from_utf8_lossy(&rest));
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn consume_line(&mut self, line: &str) {
        let Some(data) = line.trim().strip_prefix("data:") else {
            return;
        };
        let data = data.trim();
        if data == DONE_MARKER {
            self.finished = true;
            return;
        }
        match serde_json::from_str::<Value>(data) {
            Ok(frame) => {
                if let Some(content) =
                    frame.pointer("/choices/0/delta/content").and_then(Value::as_str)
                {
                    self.text.push_str(content);
                }
            }
            Err(_) => self.skipped += 1,
        }
    }
}

/// Splits accumulated text into a video part (first URL) and the remaining text.
///
/// Sentence punctuation directly after a URL is not part of it and is
/// dropped together with the URL.
pub fn parts_from_stream_text(text: &str) -> Vec<MessagePart> {
    let found = MARKDOWN_LINK
        .captures(text)
        .and_then(|captures| Some((captures.get(0)?.range(), captures.get(1)?.as_str())))
        .or_else(|| BARE_URL.find(text).map(|url| (url.range(), url.as_str())));

    let Some((whole, url)) = found else {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return vec![MessagePart::text(NOTHING_PARSED)];
        }
        return vec![MessagePart::text(trimmed)];
    };

    let mut parts =
        vec![MessagePart::video_url(url.trim_end_matches(URL_TRAILING_PUNCTUATION))];
    let after = text[whole.end..].trim_start_matches(URL_TRAILING_PUNCTUATION);
    let remaining = format!("{} {after}", &text[..whole.start]);
    let remaining = SPACE_RUN.replace_all(&remaining, " ");
    let remaining = remaining.trim();
    if !remaining.is_empty() {
        parts.push(MessagePart::text(remaining));
    }
    parts
}
