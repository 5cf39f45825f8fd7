use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

pub const DEFAULT_IMAGE_MIME: &str = "image/png";
pub const DEFAULT_VIDEO_MIME: &str = "video/mp4";
pub const CLIENT_SETTINGS_VERSION: u32 = 1;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    NanoBananaPro,
    Veo,
    Sora,
}

/// Wire protocol family a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderProtocol {
    /// Single JSON request, single JSON response.
    ImageSync,
    /// Multipart job creation followed by status polling.
    VideoJob,
    /// Chat completion answered as a server-sent event stream.
    VideoStream,
}

impl ProviderId {
    pub const ALL: [ProviderId; 3] = [ProviderId::NanoBananaPro, ProviderId::Veo, ProviderId::Sora];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NanoBananaPro => "nano_banana_pro",
            Self::Veo => "veo",
            Self::Sora => "sora",
        }
    }

    pub fn protocol(&self) -> ProviderProtocol {
        match self {
            Self::NanoBananaPro => ProviderProtocol::ImageSync,
            Self::Sora => ProviderProtocol::VideoJob,
            Self::Veo => ProviderProtocol::VideoStream,
        }
    }

    pub fn is_video(&self) -> bool {
        !matches!(self, Self::NanoBananaPro)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum VideoSource {
    Base64,
    Url,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        content: String,
    },
    Image {
        content: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Video {
        content: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
        source: VideoSource,
    },
}

impl MessagePart {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text { content: content.into() }
    }

    pub fn image(content: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self::Image { content: content.into(), mime_type: mime_type.into() }
    }

    pub fn video_url(url: impl Into<String>) -> Self {
        Self::Video {
            content: url.into(),
            mime_type: DEFAULT_VIDEO_MIME.to_string(),
            source: VideoSource::Url,
        }
    }

    pub fn video_base64(data: impl Into<String>) -> Self {
        Self::Video {
            content: data.into(),
            mime_type: DEFAULT_VIDEO_MIME.to_string(),
            source: VideoSource::Base64,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { content } => Some(content.as_str()),
            _ => None,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image { .. })
    }
}

/// Provider-native response parts kept only to be replayed verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(transparent)]
pub struct RawParts(pub Vec<Value>);

impl RawParts {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_parts: Option<RawParts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub timestamp: i64,
}

impl Message {
    pub fn new(role: Role, parts: Vec<MessagePart>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            parts,
            raw_parts: None,
            job_id: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn user(parts: Vec<MessagePart>) -> Self {
        Self::new(Role::User, parts)
    }

    pub fn model(parts: Vec<MessagePart>) -> Self {
        Self::new(Role::Model, parts)
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_raw_parts(mut self, raw_parts: RawParts) -> Self {
        self.raw_parts = Some(raw_parts);
        self
    }
}

/// One credential slot. An empty string means "not set".
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(default)]
pub struct ProviderConfigs {
    pub nano_banana_pro: ProviderConfig,
    pub veo: ProviderConfig,
    pub sora: ProviderConfig,
}

impl ProviderConfigs {
    pub fn get(&self, provider: ProviderId) -> &ProviderConfig {
        match provider {
            ProviderId::NanoBananaPro => &self.nano_banana_pro,
            ProviderId::Veo => &self.veo,
            ProviderId::Sora => &self.sora,
        }
    }

    pub fn get_mut(&mut self, provider: ProviderId) -> &mut ProviderConfig {
        match provider {
            ProviderId::NanoBananaPro => &mut self.nano_banana_pro,
            ProviderId::Veo => &mut self.veo,
            ProviderId::Sora => &mut self.sora,
        }
    }
}

/// Persisted credential blob. Missing keys default structurally on load.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(default)]
pub struct ClientSettings {
    pub version: u32,
    pub shared: ProviderConfig,
    pub providers: ProviderConfigs,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            version: CLIENT_SETTINGS_VERSION,
            shared: ProviderConfig::default(),
            providers: ProviderConfigs::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "3:4")]
    Portrait3x4,
    #[serde(rename = "4:3")]
    Landscape4x3,
    #[serde(rename = "9:16")]
    Portrait9x16,
    #[serde(rename = "16:9")]
    Landscape16x9,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Portrait3x4 => "3:4",
            Self::Landscape4x3 => "4:3",
            Self::Portrait9x16 => "9:16",
            Self::Landscape16x9 => "16:9",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
pub enum ImageSize {
    #[serde(rename = "1K")]
    OneK,
    #[serde(rename = "2K")]
    TwoK,
    #[serde(rename = "4K")]
    FourK,
}

impl ImageSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneK => "1K",
            Self::TwoK => "2K",
            Self::FourK => "4K",
        }
    }

    pub fn is_high_resolution(&self) -> bool {
        !matches!(self, Self::OneK)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
pub enum VideoAspectRatio {
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "16:9")]
    Landscape,
}

impl VideoAspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Portrait => "9:16",
            Self::Landscape => "16:9",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
pub enum VideoSize {
    #[serde(rename = "720x1280")]
    Portrait720,
    #[serde(rename = "1280x720")]
    Landscape720,
}

impl VideoSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Portrait720 => "720x1280",
            Self::Landscape720 => "1280x720",
        }
    }

    pub fn for_aspect_ratio(ratio: VideoAspectRatio) -> Self {
        match ratio {
            VideoAspectRatio::Portrait => Self::Portrait720,
            VideoAspectRatio::Landscape => Self::Landscape720,
        }
    }
}

/// Session-only generation parameters. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub provider: ProviderId,
    pub aspect_ratio: AspectRatio,
    pub resolution: ImageSize,
    pub video_aspect_ratio: VideoAspectRatio,
    pub video_duration_seconds: u32,
    #[serde(default)]
    pub video_size: Option<VideoSize>,
    pub video_model: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            provider: ProviderId::NanoBananaPro,
            aspect_ratio: AspectRatio::Landscape16x9,
            resolution: ImageSize::OneK,
            video_aspect_ratio: VideoAspectRatio::Landscape,
            video_duration_seconds: 10,
            video_size: Some(VideoSize::Landscape720),
            video_model: "veo_3_1".to_string(),
        }
    }
}

impl AppSettings {
    pub fn effective_video_size(&self) -> VideoSize {
        self.video_size.unwrap_or_else(|| VideoSize::for_aspect_ratio(self.video_aspect_ratio))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UploadSlot {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadImage {
    /// Data URL or raw base64.
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
pub struct UploadSlots {
    pub primary: Option<UploadImage>,
    pub secondary: Option<UploadImage>,
}

impl UploadSlots {
    pub fn has_any(&self) -> bool {
        self.primary.is_some() || self.secondary.is_some()
    }

    pub fn set(&mut self, slot: UploadSlot, image: Option<UploadImage>) {
        match slot {
            UploadSlot::Primary => self.primary = image,
            UploadSlot::Secondary => self.secondary = image,
        }
    }

    /// Staged images in send order: primary first.
    pub fn images(&self) -> impl Iterator<Item = &UploadImage> {
        self.primary.iter().chain(self.secondary.iter())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    pub prompt_tokens: u64,
    pub candidates_tokens: u64,
}

impl UsageTotals {
    /// Adds `promptTokenCount` / `candidatesTokenCount` from an opaque usage blob.
    pub fn absorb(&mut self, usage: &Value) {
        let count = |key: &str| usage.get(key).and_then(Value::as_u64).unwrap_or(0);
        self.prompt_tokens = self.prompt_tokens.saturating_add(count("promptTokenCount"));
        self.candidates_tokens =
            self.candidates_tokens.saturating_add(count("candidatesTokenCount"));
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_id: String,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<MessagePart>>,
    #[serde(default)]
    pub raw: Value,
}
