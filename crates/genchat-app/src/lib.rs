use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use genchat_clients::{
    ChatVideoClient, GeminiImageClient, MockImageClient, MockVideoJobClient,
    MockVideoStreamClient, VideoJobsClient, build_http_client,
};
use genchat_contracts::{
    AppSettings, ClientSettings, JobStatus, Message, ProviderId, UploadImage, UploadSlot,
    UploadSlots, UsageTotals,
};
use genchat_core::{
    CoreError, FileSettingsStore, MemorySettingsStore, Orchestrator, PendingGeneration,
    ProviderClients, SettingsStore,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

pub mod config;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
struct HealthResponse {
    status: String,
    image: bool,
    video: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
struct AcceptedResponse {
    accepted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
struct SendRequest {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
struct RemixRequest {
    prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
struct SelectProviderRequest {
    provider: ProviderId,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
struct DurationsResponse {
    provider: ProviderId,
    /// `null` when the provider has no duration setting.
    durations: Option<Vec<u32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
struct ConversationResponse {
    provider: ProviderId,
    loading: bool,
    messages: Vec<Message>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        get_health,
        get_client_settings,
        put_client_settings,
        delete_client_settings,
        get_app_settings,
        put_app_settings,
        put_provider,
        get_durations,
        put_upload,
        delete_uploads,
        get_conversation,
        delete_conversation,
        post_send,
        get_job_status,
        post_resume_job,
        post_remix_job,
        get_usage
    ),
    components(
        schemas(
            HealthResponse,
            ErrorResponse,
            AcceptedResponse,
            SendRequest,
            RemixRequest,
            SelectProviderRequest,
            DurationsResponse,
            ConversationResponse,
            ClientSettings,
            AppSettings,
            UploadImage,
            UploadSlots,
            UsageTotals,
            JobStatus,
            Message
        )
    ),
    tags(
        (name = "genchat-app", description = "generative chat orchestration API")
    )
)]
struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn from_config(config: &config::AppConfig) -> Self {
        let clients = if config.mock_providers {
            info!(event = "app.providers.mock");
            ProviderClients {
                image: Arc::new(MockImageClient),
                jobs: Arc::new(MockVideoJobClient::new(ProviderId::Sora)),
                stream: Arc::new(MockVideoStreamClient),
            }
        } else {
            let http_client = build_http_client(config.provider_timeout_seconds);
            ProviderClients {
                image: Arc::new(GeminiImageClient::new(http_client.clone(), config.image_models())),
                jobs: Arc::new(VideoJobsClient::new(ProviderId::Sora, http_client.clone())),
                stream: Arc::new(ChatVideoClient::new(ProviderId::Veo, http_client)),
            }
        };

        let store: Arc<dyn SettingsStore> = match &config.settings_path {
            Some(path) => Arc::new(FileSettingsStore::new(path.clone())),
            None => Arc::new(MemorySettingsStore::default()),
        };

        let orchestrator = Orchestrator::new(clients, store, config.orchestrator_options());
        Self { orchestrator: Arc::new(orchestrator) }
    }

    /// Runs an accepted generation on its own task so the request returns immediately.
    fn spawn(&self, pending: PendingGeneration) {
        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move { orchestrator.run(pending).await });
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route(
            "/api/v1/settings/client",
            get(get_client_settings).put(put_client_settings).delete(delete_client_settings),
        )
        .route("/api/v1/settings/app", get(get_app_settings).put(put_app_settings))
        .route("/api/v1/settings/app/provider", put(put_provider))
        .route("/api/v1/settings/app/durations", get(get_durations))
        .route("/api/v1/uploads", delete(delete_uploads))
        .route("/api/v1/uploads/{slot}", put(put_upload))
        .route("/api/v1/conversations/send", post(post_send))
        .route(
            "/api/v1/conversations/{provider}",
            get(get_conversation).delete(delete_conversation),
        )
        .route("/api/v1/jobs/{provider}/{job_id}", get(get_job_status))
        .route("/api/v1/jobs/{provider}/{job_id}/resume", post(post_resume_job))
        .route("/api/v1/jobs/{provider}/{job_id}/remix", post(post_remix_job))
        .route("/api/v1/usage", get(get_usage))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service health and provider readiness", body = HealthResponse)
    ),
    tag = "genchat-app"
)]
async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let orchestrator = &state.orchestrator;
    let video = ProviderId::ALL
        .into_iter()
        .filter(ProviderId::is_video)
        .any(|provider| orchestrator.is_ready(provider));
    Json(HealthResponse {
        status: "healthy".to_string(),
        image: orchestrator.is_ready(ProviderId::NanoBananaPro),
        video,
    })
}

#[utoipa::path(
    get,
    path = "/api/v1/settings/client",
    responses((status = 200, description = "Stored credentials", body = ClientSettings)),
    tag = "genchat-app"
)]
async fn get_client_settings(State(state): State<AppState>) -> Json<ClientSettings> {
    Json(state.orchestrator.client_settings().as_ref().clone())
}

#[utoipa::path(
    put,
    path = "/api/v1/settings/client",
    request_body = ClientSettings,
    responses(
        (status = 200, description = "Credentials replaced and persisted", body = ClientSettings),
        (status = 400, description = "Settings could not be saved", body = ErrorResponse)
    ),
    tag = "genchat-app"
)]
#[instrument(skip(state, settings))]
async fn put_client_settings(
    State(state): State<AppState>,
    Json(settings): Json<ClientSettings>,
) -> Response {
    match state.orchestrator.update_client_settings(settings) {
        Ok(()) => Json(state.orchestrator.client_settings().as_ref().clone()).into_response(),
        Err(err) => error_response(err),
    }
}

#[utoipa::path(
    delete,
    path = "/api/v1/settings/client",
    responses(
        (status = 200, description = "Credentials reset to defaults", body = ClientSettings),
        (status = 400, description = "Settings could not be saved", body = ErrorResponse)
    ),
    tag = "genchat-app"
)]
#[instrument(skip(state))]
async fn delete_client_settings(State(state): State<AppState>) -> Response {
    match state.orchestrator.reset_client_settings() {
        Ok(()) => Json(state.orchestrator.client_settings().as_ref().clone()).into_response(),
        Err(err) => error_response(err),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/settings/app",
    responses((status = 200, description = "Generation settings", body = AppSettings)),
    tag = "genchat-app"
)]
async fn get_app_settings(State(state): State<AppState>) -> Json<AppSettings> {
    Json(state.orchestrator.app_settings())
}

#[utoipa::path(
    put,
    path = "/api/v1/settings/app",
    request_body = AppSettings,
    responses((status = 200, description = "Generation settings replaced", body = AppSettings)),
    tag = "genchat-app"
)]
#[instrument(skip(state, settings), fields(provider = %settings.provider))]
async fn put_app_settings(
    State(state): State<AppState>,
    Json(settings): Json<AppSettings>,
) -> Json<AppSettings> {
    state.orchestrator.update_app_settings(settings);
    Json(state.orchestrator.app_settings())
}

#[utoipa::path(
    put,
    path = "/api/v1/settings/app/provider",
    request_body = SelectProviderRequest,
    responses(
        (status = 200, description = "Settings after the provider switch", body = AppSettings)
    ),
    tag = "genchat-app"
)]
#[instrument(skip(state, request), fields(provider = %request.provider))]
async fn put_provider(
    State(state): State<AppState>,
    Json(request): Json<SelectProviderRequest>,
) -> Json<AppSettings> {
    Json(state.orchestrator.select_provider(request.provider))
}

#[utoipa::path(
    get,
    path = "/api/v1/settings/app/durations",
    responses(
        (
            status = 200,
            description = "Legal video durations for the current selection",
            body = DurationsResponse
        )
    ),
    tag = "genchat-app"
)]
async fn get_durations(State(state): State<AppState>) -> Json<DurationsResponse> {
    Json(DurationsResponse {
        provider: state.orchestrator.app_settings().provider,
        durations: state.orchestrator.duration_options(),
    })
}

#[utoipa::path(
    put,
    path = "/api/v1/uploads/{slot}",
    params(("slot" = UploadSlot, Path, description = "`primary` or `secondary`")),
    request_body = UploadImage,
    responses((status = 200, description = "Staged uploads", body = UploadSlots)),
    tag = "genchat-app"
)]
#[instrument(skip(state, image))]
async fn put_upload(
    State(state): State<AppState>,
    Path(slot): Path<UploadSlot>,
    Json(image): Json<UploadImage>,
) -> Json<UploadSlots> {
    state.orchestrator.stage_upload(slot, Some(image));
    Json(state.orchestrator.uploads())
}

#[utoipa::path(
    delete,
    path = "/api/v1/uploads",
    responses((status = 204, description = "Staged uploads cleared")),
    tag = "genchat-app"
)]
async fn delete_uploads(State(state): State<AppState>) -> StatusCode {
    state.orchestrator.clear_uploads();
    StatusCode::NO_CONTENT
}

#[utoipa::path(
    get,
    path = "/api/v1/conversations/{provider}",
    params(("provider" = ProviderId, Path, description = "Provider whose conversation to read")),
    responses((status = 200, description = "Conversation snapshot", body = ConversationResponse)),
    tag = "genchat-app"
)]
async fn get_conversation(
    State(state): State<AppState>,
    Path(provider): Path<ProviderId>,
) -> Json<ConversationResponse> {
    Json(ConversationResponse {
        provider,
        loading: state.orchestrator.is_loading(provider),
        messages: state.orchestrator.messages(provider).to_vec(),
    })
}

#[utoipa::path(
    delete,
    path = "/api/v1/conversations/{provider}",
    params(("provider" = ProviderId, Path, description = "Provider whose conversation to clear")),
    responses((status = 204, description = "Conversation cleared")),
    tag = "genchat-app"
)]
#[instrument(skip(state))]
async fn delete_conversation(
    State(state): State<AppState>,
    Path(provider): Path<ProviderId>,
) -> StatusCode {
    state.orchestrator.clear_conversation(provider);
    StatusCode::NO_CONTENT
}

#[utoipa::path(
    post,
    path = "/api/v1/conversations/send",
    request_body = SendRequest,
    responses(
        (
            status = 202,
            description = "Turn accepted; generation runs in the background",
            body = AcceptedResponse
        ),
        (status = 200, description = "Nothing to send or provider busy", body = AcceptedResponse)
    ),
    tag = "genchat-app"
)]
#[instrument(skip(state, request))]
async fn post_send(State(state): State<AppState>, Json(request): Json<SendRequest>) -> Response {
    accepted(&state, state.orchestrator.begin_turn(&request.text))
}

#[utoipa::path(
    get,
    path = "/api/v1/jobs/{provider}/{job_id}",
    params(
        ("provider" = ProviderId, Path, description = "Job-style provider"),
        ("job_id" = String, Path, description = "Provider job id")
    ),
    responses(
        (status = 200, description = "Single status poll", body = JobStatus),
        (status = 400, description = "Validation or configuration error", body = ErrorResponse),
        (status = 502, description = "Provider failure", body = ErrorResponse)
    ),
    tag = "genchat-app"
)]
#[instrument(skip(state))]
async fn get_job_status(
    State(state): State<AppState>,
    Path((provider, job_id)): Path<(ProviderId, String)>,
) -> Response {
    match state.orchestrator.job_status(provider, &job_id).await {
        Ok(status) => Json(status).into_response(),
        Err(err) => error_response(err),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/jobs/{provider}/{job_id}/resume",
    params(
        ("provider" = ProviderId, Path, description = "Job-style provider"),
        ("job_id" = String, Path, description = "Job to keep polling")
    ),
    responses(
        (status = 202, description = "Polling resumed in the background", body = AcceptedResponse),
        (status = 400, description = "Validation error", body = ErrorResponse)
    ),
    tag = "genchat-app"
)]
#[instrument(skip(state))]
async fn post_resume_job(
    State(state): State<AppState>,
    Path((provider, job_id)): Path<(ProviderId, String)>,
) -> Response {
    match state.orchestrator.begin_resume(provider, &job_id) {
        Ok(pending) => accepted(&state, pending),
        Err(err) => error_response(err),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/jobs/{provider}/{job_id}/remix",
    params(
        ("provider" = ProviderId, Path, description = "Must be `sora`"),
        ("job_id" = String, Path, description = "Source job id")
    ),
    request_body = RemixRequest,
    responses(
        (status = 202, description = "Remix accepted", body = AcceptedResponse),
        (status = 400, description = "Validation error", body = ErrorResponse)
    ),
    tag = "genchat-app"
)]
#[instrument(skip(state, request))]
async fn post_remix_job(
    State(state): State<AppState>,
    Path((provider, job_id)): Path<(ProviderId, String)>,
    Json(request): Json<RemixRequest>,
) -> Response {
    if provider != ProviderId::Sora {
        return error_response(CoreError::Validation(format!("{provider} does not support remix")));
    }
    match state.orchestrator.begin_remix(&job_id, &request.prompt) {
        Ok(pending) => accepted(&state, pending),
        Err(err) => error_response(err),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/usage",
    responses((status = 200, description = "Accumulated token usage", body = UsageTotals)),
    tag = "genchat-app"
)]
async fn get_usage(State(state): State<AppState>) -> Json<UsageTotals> {
    Json(state.orchestrator.usage())
}

fn accepted(state: &AppState, pending: Option<PendingGeneration>) -> Response {
    match pending {
        Some(pending) => {
            state.spawn(pending);
            (StatusCode::ACCEPTED, Json(AcceptedResponse { accepted: true })).into_response()
        }
        None => Json(AcceptedResponse { accepted: false }).into_response(),
    }
}

fn error_response(err: CoreError) -> Response {
    let status = match err {
        CoreError::Transport { .. } | CoreError::Protocol(_) => StatusCode::BAD_GATEWAY,
        CoreError::Configuration(_) | CoreError::Validation(_) | CoreError::Settings(_) => {
            StatusCode::BAD_REQUEST
        }
    };
    (status, Json(ErrorResponse { error: err.to_string() })).into_response()
}
