pub(crate) mod image;
pub(crate) mod jobs;
pub(crate) mod mock;
pub(crate) mod stream;

pub use image::{
    DEFAULT_HIRES_IMAGE_MODEL, DEFAULT_IMAGE_MODEL, GeminiImageClient, ImageModels,
    build_image_payload, normalize_image_base_url, parse_image_response,
};
pub use jobs::{VideoJobsClient, build_video_parts, decode_reference_image, job_status_from_payload};
pub use mock::{MockImageClient, MockVideoJobClient, MockVideoStreamClient};
pub use stream::{ChatVideoClient, SseAccumulator, build_stream_payload, parts_from_stream_text};
