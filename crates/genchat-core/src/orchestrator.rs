use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use async_trait::async_trait;
use genchat_contracts::{
    AppSettings, ClientSettings, DEFAULT_IMAGE_MIME, JobStatus, Message, MessagePart, ProviderId,
    ProviderProtocol, UploadImage, UploadSlot, UploadSlots, UsageTotals,
};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::{
    CoreError, Credentials, ImageClient, ImageGenerateRequest, RemixJobRequest,
    VideoGenerateRequest, VideoJobClient, VideoStreamClient,
    credentials::{CredentialDefaults, effective_config, resolve_credentials},
    history::{DEFAULT_HISTORY_ROUNDS, HistoryWindow, strip_data_url_prefix},
    jobs::{JobLifecycle, JobOutcome, JobPoller, PollPolicy},
    recovery::{RECOVERY_NOTE, RetryOnMarker},
    settings::SettingsStore,
    video_options::{allowed_durations, clamp_duration, default_video_model, resolve_video_model},
};

const ERROR_PREFIX: &str = "**Error:**";
const REMIX_ERROR_PREFIX: &str = "**Remix error:**";
const NO_VIDEO_RETURNED: &str = "(no video returned)";
/// Only jobs created by this model family can be remixed.
const REMIX_JOB_PREFIX: &str = "sora-2:";

pub struct ProviderClients {
    pub image: Arc<dyn ImageClient>,
    pub jobs: Arc<dyn VideoJobClient>,
    pub stream: Arc<dyn VideoStreamClient>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub history_rounds: usize,
    pub poll: PollPolicy,
    pub recovery: RetryOnMarker,
    pub credential_defaults: CredentialDefaults,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            history_rounds: DEFAULT_HISTORY_ROUNDS,
            poll: PollPolicy::default(),
            recovery: RetryOnMarker::default(),
            credential_defaults: CredentialDefaults::default(),
        }
    }
}

#[derive(Default)]
struct SessionState {
    conversations: BTreeMap<ProviderId, Arc<[Message]>>,
    loading: BTreeSet<ProviderId>,
    client_settings: Arc<ClientSettings>,
    app_settings: AppSettings,
    uploads: UploadSlots,
    usage: UsageTotals,
}

impl SessionState {
    fn append(&mut self, provider: ProviderId, message: Message) {
        let mut next =
            self.conversations.get(&provider).map(|messages| messages.to_vec()).unwrap_or_default();
        next.push(message);
        self.conversations.insert(provider, next.into());
    }

    /// Pulls the stored duration back into the legal set for the current
    /// provider, model and staged uploads.
    fn reclamp_duration(&mut self) {
        let settings = &mut self.app_settings;
        if let Some(model) = resolve_video_model(settings.provider, &settings.video_model)
            && let Some(duration) = clamp_duration(
                settings.provider,
                settings.video_duration_seconds,
                &model,
                self.uploads.has_any(),
            )
        {
            settings.video_duration_seconds = duration;
        }
    }
}

fn lock(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds a provider's loading flag; the flag clears when this is dropped.
struct LoadingGuard {
    state: Arc<Mutex<SessionState>>,
    provider: ProviderId,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        lock(&self.state).loading.remove(&self.provider);
    }
}

enum Work {
    Turn {
        user_parts: Vec<MessagePart>,
        history: Arc<[Message]>,
        settings: AppSettings,
        client_settings: Arc<ClientSettings>,
    },
    Remix {
        job_id: String,
        prompt: String,
        client_settings: Arc<ClientSettings>,
    },
    Resume {
        job_id: String,
        client_settings: Arc<ClientSettings>,
    },
}

/// A generation accepted by the orchestrator but not yet executed.
///
/// The user turn is already appended and the provider is marked loading;
/// pass it to [`Orchestrator::run`] (possibly on another task).
pub struct PendingGeneration {
    provider: ProviderId,
    work: Work,
    _guard: LoadingGuard,
}

struct ClientPoller<'a> {
    client: &'a dyn VideoJobClient,
    credentials: &'a Credentials,
}

#[async_trait]
impl JobPoller for ClientPoller<'_> {
    async fn poll(&self, job_id: &str) -> Result<JobStatus, CoreError> {
        self.client.job_status(self.credentials, job_id).await
    }
}

/// Owns per-provider conversations, loading flags, settings and staged
/// uploads, and sequences credential resolution, request dispatch and job
/// following for each turn.
pub struct Orchestrator {
    clients: ProviderClients,
    store: Arc<dyn SettingsStore>,
    options: OrchestratorOptions,
    state: Arc<Mutex<SessionState>>,
}

impl Orchestrator {
    pub fn new(
        clients: ProviderClients,
        store: Arc<dyn SettingsStore>,
        options: OrchestratorOptions,
    ) -> Self {
        let state = SessionState {
            client_settings: Arc::new(store.load()),
            ..SessionState::default()
        };
        Self { clients, store, options, state: Arc::new(Mutex::new(state)) }
    }

    pub fn client_settings(&self) -> Arc<ClientSettings> {
        lock(&self.state).client_settings.clone()
    }

    /// Persists first, then swaps the in-memory value.
    pub fn update_client_settings(&self, settings: ClientSettings) -> Result<(), CoreError> {
        self.store.save(&settings)?;
        lock(&self.state).client_settings = Arc::new(settings);
        info!(event = "settings.client.updated");
        Ok(())
    }

    pub fn reset_client_settings(&self) -> Result<(), CoreError> {
        self.update_client_settings(ClientSettings::default())
    }

    pub fn app_settings(&self) -> AppSettings {
        lock(&self.state).app_settings.clone()
    }

    pub fn update_app_settings(&self, settings: AppSettings) {
        let mut state = lock(&self.state);
        state.app_settings = settings;
        state.reclamp_duration();
    }

    /// Switches provider, keeping the duration only when still legal and
    /// resetting the video model to the new provider's default.
    pub fn select_provider(&self, provider: ProviderId) -> AppSettings {
        let mut state = lock(&self.state);
        state.app_settings.provider = provider;
        if let Some(model) = default_video_model(provider) {
            state.app_settings.video_model = model.to_string();
        }
        state.reclamp_duration();
        state.app_settings.clone()
    }

    /// Legal durations for the current provider, model and staged uploads.
    pub fn duration_options(&self) -> Option<Vec<u32>> {
        let state = lock(&self.state);
        let settings = &state.app_settings;
        let model = resolve_video_model(settings.provider, &settings.video_model)?;
        allowed_durations(settings.provider, &model, state.uploads.has_any()).map(<[u32]>::to_vec)
    }

    /// Staging or removing an image can change the legal durations, so the
    /// stored duration is clamped again.
    pub fn stage_upload(&self, slot: UploadSlot, image: Option<UploadImage>) {
        let mut state = lock(&self.state);
        state.uploads.set(slot, image);
        state.reclamp_duration();
    }

    pub fn clear_uploads(&self) {
        let mut state = lock(&self.state);
        state.uploads = UploadSlots::default();
        state.reclamp_duration();
    }

    pub fn uploads(&self) -> UploadSlots {
        lock(&self.state).uploads.clone()
    }

    pub fn messages(&self, provider: ProviderId) -> Arc<[Message]> {
        lock(&self.state).conversations.get(&provider).cloned().unwrap_or_else(|| Arc::from([]))
    }

    pub fn is_loading(&self, provider: ProviderId) -> bool {
        lock(&self.state).loading.contains(&provider)
    }

    /// Drops the provider's conversation. Usage totals are kept.
    pub fn clear_conversation(&self, provider: ProviderId) {
        lock(&self.state).conversations.remove(&provider);
        info!(event = "conversation.cleared", provider = %provider);
    }

    pub fn usage(&self) -> UsageTotals {
        lock(&self.state).usage
    }

    pub fn is_ready(&self, provider: ProviderId) -> bool {
        let settings = self.client_settings();
        let effective = effective_config(&settings, provider);
        if provider.is_video() {
            !effective.base_url.is_empty()
        } else {
            !effective.api_key.is_empty()
                || !self.options.credential_defaults.image_api_key.trim().is_empty()
        }
    }

    /// Accepts a user turn for the current provider.
    ///
    /// Returns `None` when there is nothing to send or the provider already
    /// has a generation in flight.
    pub fn begin_turn(&self, text: &str) -> Option<PendingGeneration> {
        let mut state = lock(&self.state);
        let provider = state.app_settings.provider;
        if state.loading.contains(&provider) {
            debug!(event = "orchestrator.turn.ignored", provider = %provider, reason = "loading");
            return None;
        }
        if text.trim().is_empty() && !state.uploads.has_any() {
            return None;
        }

        let mut user_parts = state
            .uploads
            .images()
            .map(|image| {
                let mime_type = if image.mime_type.trim().is_empty() {
                    DEFAULT_IMAGE_MIME
                } else {
                    image.mime_type.as_str()
                };
                MessagePart::image(strip_data_url_prefix(&image.data), mime_type)
            })
            .collect::<Vec<_>>();
        if !text.trim().is_empty() {
            user_parts.push(MessagePart::text(text));
        }

        let history = state.conversations.get(&provider).cloned().unwrap_or_else(|| Arc::from([]));
        state.append(provider, Message::user(user_parts.clone()));
        state.loading.insert(provider);

        let work = Work::Turn {
            user_parts,
            history,
            settings: state.app_settings.clone(),
            client_settings: state.client_settings.clone(),
        };
        state.uploads = UploadSlots::default();
        state.reclamp_duration();
        drop(state);
        Some(self.pending(provider, work))
    }

    pub fn begin_remix(
        &self,
        job_id: &str,
        prompt: &str,
    ) -> Result<Option<PendingGeneration>, CoreError> {
        let job_id = job_id.trim();
        if !job_id.starts_with(REMIX_JOB_PREFIX) {
            return Err(CoreError::Validation(format!(
                "remix is only supported for sora-2 jobs \
                 (ids look like {REMIX_JOB_PREFIX}task_...), got `{job_id}`"
            )));
        }
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(CoreError::Validation("remix prompt must not be empty".to_string()));
        }

        let provider = ProviderId::Sora;
        let mut state = lock(&self.state);
        if state.loading.contains(&provider) {
            return Ok(None);
        }
        state.append(
            provider,
            Message::user(vec![MessagePart::text(format!("Remix: {prompt}"))]).with_job_id(job_id),
        );
        state.loading.insert(provider);
        let work = Work::Remix {
            job_id: job_id.to_string(),
            prompt: prompt.to_string(),
            client_settings: state.client_settings.clone(),
        };
        drop(state);
        Ok(Some(self.pending(provider, work)))
    }

    pub fn begin_resume(
        &self,
        provider: ProviderId,
        job_id: &str,
    ) -> Result<Option<PendingGeneration>, CoreError> {
        ensure_job_provider(provider)?;
        let job_id = job_id.trim();
        if job_id.is_empty() {
            return Err(CoreError::Validation("job id must not be empty".to_string()));
        }

        let mut state = lock(&self.state);
        if state.loading.contains(&provider) {
            return Ok(None);
        }
        state.loading.insert(provider);
        let work = Work::Resume {
            job_id: job_id.to_string(),
            client_settings: state.client_settings.clone(),
        };
        drop(state);
        Ok(Some(self.pending(provider, work)))
    }

    fn pending(&self, provider: ProviderId, work: Work) -> PendingGeneration {
        PendingGeneration {
            provider,
            work,
            _guard: LoadingGuard { state: self.state.clone(), provider },
        }
    }

    /// Executes an accepted generation. Every failure ends up as a model
    /// message in the provider's conversation; nothing is returned.
    pub async fn run(&self, pending: PendingGeneration) {
        let provider = pending.provider;
        match &pending.work {
            Work::Turn { user_parts, history, settings, client_settings } => {
                let span = info_span!("orchestrator.turn", provider = %provider);
                self.run_turn(provider, user_parts, history, settings, client_settings)
                    .instrument(span)
                    .await;
            }
            Work::Remix { job_id, prompt, client_settings } => {
                let span = info_span!("orchestrator.remix", provider = %provider, job_id = %job_id);
                let result =
                    self.remix_turn(job_id, prompt, client_settings).instrument(span).await;
                if let Err(err) = result {
                    warn!(event = "orchestrator.remix.failed", job_id = %job_id, error = %err);
                    let text = format!("{REMIX_ERROR_PREFIX} {err}");
                    self.append(
                        provider,
                        Message::model(vec![MessagePart::text(text)]).with_job_id(job_id.as_str()),
                    );
                }
            }
            Work::Resume { job_id, client_settings } => {
                let span =
                    info_span!("orchestrator.resume", provider = %provider, job_id = %job_id);
                let result = async {
                    let credentials = self.resolve(client_settings, provider)?;
                    self.follow_job(provider, &credentials, job_id, "video job").await
                }
                .instrument(span)
                .await;
                if let Err(err) = result {
                    warn!(event = "orchestrator.resume.failed", job_id = %job_id, error = %err);
                    self.append(
                        provider,
                        Message::model(vec![MessagePart::text(format!("{ERROR_PREFIX} {err}"))])
                            .with_job_id(job_id.as_str()),
                    );
                }
            }
        }
    }

    pub async fn send(&self, text: &str) {
        if let Some(pending) = self.begin_turn(text) {
            self.run(pending).await;
        }
    }

    pub async fn remix(&self, job_id: &str, prompt: &str) -> Result<(), CoreError> {
        if let Some(pending) = self.begin_remix(job_id, prompt)? {
            self.run(pending).await;
        }
        Ok(())
    }

    pub async fn resume_job(&self, provider: ProviderId, job_id: &str) -> Result<(), CoreError> {
        if let Some(pending) = self.begin_resume(provider, job_id)? {
            self.run(pending).await;
        }
        Ok(())
    }

    /// One status poll outside any lifecycle.
    pub async fn job_status(
        &self,
        provider: ProviderId,
        job_id: &str,
    ) -> Result<JobStatus, CoreError> {
        ensure_job_provider(provider)?;
        let credentials = self.resolve(&self.client_settings(), provider)?;
        self.clients.jobs.job_status(&credentials, job_id.trim()).await
    }

    async fn run_turn(
        &self,
        provider: ProviderId,
        user_parts: &[MessagePart],
        history: &[Message],
        settings: &AppSettings,
        client_settings: &ClientSettings,
    ) {
        let started = Instant::now();
        info!(
            event = "orchestrator.turn.started",
            provider = %provider,
            history = history.len(),
            parts = user_parts.len()
        );
        let result = match provider.protocol() {
            ProviderProtocol::ImageSync => {
                self.image_turn(provider, user_parts, history, settings, client_settings).await
            }
            ProviderProtocol::VideoJob => {
                self.job_turn(provider, user_parts, settings, client_settings).await
            }
            ProviderProtocol::VideoStream => {
                self.stream_turn(provider, user_parts, settings, client_settings).await
            }
        };
        match result {
            Ok(()) => info!(
                event = "orchestrator.turn.completed",
                provider = %provider,
                elapsed_ms = started.elapsed().as_millis() as u64
            ),
            Err(err) => {
                warn!(event = "orchestrator.turn.failed", provider = %provider, error = %err);
                self.append(
                    provider,
                    Message::model(vec![MessagePart::text(format!("{ERROR_PREFIX} {err}"))]),
                );
            }
        }
    }

    async fn image_turn(
        &self,
        provider: ProviderId,
        user_parts: &[MessagePart],
        history: &[Message],
        settings: &AppSettings,
        client_settings: &ClientSettings,
    ) -> Result<(), CoreError> {
        let credentials = self.resolve(client_settings, provider)?;
        let window = HistoryWindow::new(self.options.history_rounds);
        let contents = window.build(history, user_parts);
        let request =
            ImageGenerateRequest { credentials: &credentials, contents: &contents, settings };

        let (generation, recovered) = match self.clients.image.generate(request).await {
            Ok(generation) => (generation, false),
            Err(err) if self.options.recovery.should_retry(&err, 0) => {
                warn!(event = "orchestrator.recovery.retry", provider = %provider, error = %err);
                let contents = window.build(&[], user_parts);
                let retry = ImageGenerateRequest {
                    credentials: &credentials,
                    contents: &contents,
                    settings,
                };
                match self.clients.image.generate(retry).await {
                    Ok(generation) => (generation, true),
                    Err(retry_err) => {
                        warn!(
                            event = "orchestrator.recovery.failed",
                            provider = %provider,
                            error = %retry_err
                        );
                        return Err(err);
                    }
                }
            }
            Err(err) => return Err(err),
        };

        info!(
            event = "orchestrator.image.generated",
            provider = %provider,
            images = generation.image_count,
            recovered
        );
        let mut parts = generation.parts;
        if recovered {
            parts.push(MessagePart::text(RECOVERY_NOTE));
        }
        let mut message = Message::model(parts);
        if !generation.raw_parts.is_empty() {
            message = message.with_raw_parts(generation.raw_parts);
        }

        let mut state = lock(&self.state);
        if let Some(usage) = &generation.usage {
            state.usage.absorb(usage);
        }
        state.append(provider, message);
        Ok(())
    }

    async fn job_turn(
        &self,
        provider: ProviderId,
        user_parts: &[MessagePart],
        settings: &AppSettings,
        client_settings: &ClientSettings,
    ) -> Result<(), CoreError> {
        let credentials = self.resolve(client_settings, provider)?;
        let request =
            VideoGenerateRequest { credentials: &credentials, parts: user_parts, settings };
        let job_id = self.clients.jobs.create_job(request).await?;
        info!(event = "orchestrator.job.created", provider = %provider, job_id = %job_id);
        self.append(
            provider,
            Message::model(vec![MessagePart::text(format!(
                "Video job `{job_id}` created; generating..."
            ))])
            .with_job_id(job_id.as_str()),
        );
        self.follow_job(provider, &credentials, &job_id, "video job").await
    }

    async fn remix_turn(
        &self,
        source_job_id: &str,
        prompt: &str,
        client_settings: &ClientSettings,
    ) -> Result<(), CoreError> {
        let provider = ProviderId::Sora;
        let credentials = self.resolve(client_settings, provider)?;
        let request = RemixJobRequest { credentials: &credentials, job_id: source_job_id, prompt };
        let job_id = self.clients.jobs.create_remix(request).await?;
        info!(
            event = "orchestrator.remix.created",
            source_job_id = %source_job_id,
            job_id = %job_id
        );
        self.append(
            provider,
            Message::model(vec![MessagePart::text(format!(
                "Remix job `{job_id}` created from `{source_job_id}`; generating..."
            ))])
            .with_job_id(job_id.as_str()),
        );
        self.follow_job(provider, &credentials, &job_id, "remix job").await
    }

    async fn follow_job(
        &self,
        provider: ProviderId,
        credentials: &Credentials,
        job_id: &str,
        label: &str,
    ) -> Result<(), CoreError> {
        let poller = ClientPoller { client: self.clients.jobs.as_ref(), credentials };
        let span = info_span!("job.lifecycle", provider = %provider, job_id = %job_id);
        let outcome =
            JobLifecycle::new(self.options.poll).run(&poller, job_id).instrument(span).await?;
        let parts = match outcome {
            JobOutcome::Done(status) => status
                .parts
                .filter(|parts| !parts.is_empty())
                .unwrap_or_else(|| vec![MessagePart::text(NO_VIDEO_RETURNED)]),
            JobOutcome::TimedOut { job_id, attempts } => {
                info!(
                    event = "orchestrator.job.timeout",
                    provider = %provider,
                    job_id = %job_id,
                    attempts
                );
                vec![MessagePart::text(format!(
                    "The {label} is still generating. Query it later with job id `{job_id}`."
                ))]
            }
        };
        self.append(provider, Message::model(parts).with_job_id(job_id));
        Ok(())
    }

    async fn stream_turn(
        &self,
        provider: ProviderId,
        user_parts: &[MessagePart],
        settings: &AppSettings,
        client_settings: &ClientSettings,
    ) -> Result<(), CoreError> {
        let credentials = self.resolve(client_settings, provider)?;
        let request =
            VideoGenerateRequest { credentials: &credentials, parts: user_parts, settings };
        let parts = self.clients.stream.generate(request).await?;
        self.append(provider, Message::model(parts));
        Ok(())
    }

    fn resolve(
        &self,
        client_settings: &ClientSettings,
        provider: ProviderId,
    ) -> Result<Credentials, CoreError> {
        resolve_credentials(client_settings, provider, &self.options.credential_defaults)
    }

    fn append(&self, provider: ProviderId, message: Message) {
        lock(&self.state).append(provider, message);
    }
}

fn ensure_job_provider(provider: ProviderId) -> Result<(), CoreError> {
    if provider.protocol() == ProviderProtocol::VideoJob {
        Ok(())
    } else {
        Err(CoreError::Validation(format!("{provider} does not run asynchronous jobs")))
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, time::Duration};

    use genchat_contracts::{ProviderConfig, RawParts, Role};
    use serde_json::json;

    use super::*;
    use crate::{ImageGeneration, MemorySettingsStore, is_pending_status};

    #[derive(Default)]
    struct FakeImage {
        script: Mutex<VecDeque<Result<ImageGeneration, CoreError>>>,
        contents_seen: Mutex<Vec<usize>>,
    }

    impl FakeImage {
        fn scripted(script: Vec<Result<ImageGeneration, CoreError>>) -> Self {
            Self { script: Mutex::new(script.into()), ..Self::default() }
        }

        fn contents_seen(&self) -> Vec<usize> {
            self.contents_seen.lock().expect("lock").clone()
        }
    }

    fn generation(marker: &str) -> ImageGeneration {
        ImageGeneration {
            parts: vec![MessagePart::image("aW1n", "image/png")],
            raw_parts: RawParts(vec![
                json!({"inlineData": {"data": "aW1n"}, "thoughtSignature": marker}),
            ]),
            image_count: 1,
            usage: Some(json!({"promptTokenCount": 7, "candidatesTokenCount": 3})),
        }
    }

    fn corrupted() -> CoreError {
        CoreError::http_status(400, "image generation failed", "Corrupted thought_signature")
    }

    #[async_trait]
    impl ImageClient for FakeImage {
        async fn generate(
            &self,
            request: ImageGenerateRequest<'_>,
        ) -> Result<ImageGeneration, CoreError> {
            self.contents_seen.lock().expect("lock").push(request.contents.len());
            self.script.lock().expect("lock").pop_front().unwrap_or_else(|| Ok(generation("sig")))
        }
    }

    #[derive(Default)]
    struct FakeJobs {
        statuses: Mutex<VecDeque<&'static str>>,
        creates: Mutex<u32>,
        polls: Mutex<u32>,
        remixed_from: Mutex<Vec<String>>,
    }

    impl FakeJobs {
        fn with_statuses(statuses: &[&'static str]) -> Self {
            Self { statuses: Mutex::new(statuses.iter().copied().collect()), ..Self::default() }
        }

        fn polls(&self) -> u32 {
            *self.polls.lock().expect("lock")
        }

        fn creates(&self) -> u32 {
            *self.creates.lock().expect("lock")
        }
    }

    #[async_trait]
    impl VideoJobClient for FakeJobs {
        async fn create_job(
            &self,
            _request: VideoGenerateRequest<'_>,
        ) -> Result<String, CoreError> {
            *self.creates.lock().expect("lock") += 1;
            Ok("sora-2:task_1".to_string())
        }

        async fn create_remix(&self, request: RemixJobRequest<'_>) -> Result<String, CoreError> {
            self.remixed_from.lock().expect("lock").push(request.job_id.to_string());
            Ok("sora-2:task_remix".to_string())
        }

        async fn job_status(
            &self,
            _credentials: &Credentials,
            job_id: &str,
        ) -> Result<JobStatus, CoreError> {
            *self.polls.lock().expect("lock") += 1;
            let status = self.statuses.lock().expect("lock").pop_front().unwrap_or("queued");
            let done = !is_pending_status(status);
            Ok(JobStatus {
                job_id: job_id.to_string(),
                done,
                status: Some(status.to_string()),
                progress: None,
                parts: done
                    .then(|| vec![MessagePart::video_url(format!("https://cdn/{job_id}.mp4"))]),
                raw: json!({"status": status}),
            })
        }
    }

    struct FakeStream;

    #[async_trait]
    impl VideoStreamClient for FakeStream {
        async fn generate(
            &self,
            _request: VideoGenerateRequest<'_>,
        ) -> Result<Vec<MessagePart>, CoreError> {
            Ok(vec![MessagePart::video_url("https://cdn/veo.mp4"), MessagePart::text("done")])
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        image: Arc<FakeImage>,
        jobs: Arc<FakeJobs>,
        store: Arc<MemorySettingsStore>,
    }

    fn harness(image: FakeImage, jobs: FakeJobs) -> Harness {
        let image = Arc::new(image);
        let jobs = Arc::new(jobs);
        let store = Arc::new(MemorySettingsStore::default());
        let options = OrchestratorOptions {
            poll: PollPolicy { interval: Duration::ZERO, max_attempts: 3 },
            credential_defaults: CredentialDefaults {
                image_api_key: "builtin".to_string(),
                ..CredentialDefaults::default()
            },
            ..OrchestratorOptions::default()
        };
        let clients = ProviderClients {
            image: image.clone(),
            jobs: jobs.clone(),
            stream: Arc::new(FakeStream),
        };
        let orchestrator = Orchestrator::new(clients, store.clone(), options);
        Harness { orchestrator, image, jobs, store }
    }

    fn with_video_credentials(orchestrator: &Orchestrator) {
        let mut settings = ClientSettings::default();
        settings.shared = ProviderConfig {
            base_url: "https://video.example".to_string(),
            api_key: "vk".to_string(),
        };
        orchestrator.update_client_settings(settings).expect("settings must save");
    }

    fn text_of(message: &Message) -> String {
        message.parts.iter().filter_map(MessagePart::as_text).collect()
    }

    #[tokio::test]
    async fn image_turn_appends_user_then_model_and_tracks_usage() {
        let h = harness(FakeImage::default(), FakeJobs::default());
        h.orchestrator.stage_upload(
            UploadSlot::Secondary,
            Some(UploadImage {
                data: "data:image/jpeg;base64,c2Vj".to_string(),
                mime_type: "image/jpeg".to_string(),
            }),
        );
        h.orchestrator.stage_upload(
            UploadSlot::Primary,
            Some(UploadImage { data: "cHJp".to_string(), mime_type: String::new() }),
        );

        h.orchestrator.send("make it blue").await;

        let messages = h.orchestrator.messages(ProviderId::NanoBananaPro);
        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[0].parts,
            vec![
                MessagePart::image("cHJp", "image/png"),
                MessagePart::image("c2Vj", "image/jpeg"),
                MessagePart::text("make it blue"),
            ]
        );
        assert_eq!(messages[1].role, Role::Model);
        assert!(messages[1].raw_parts.is_some());
        assert!(!h.orchestrator.uploads().has_any());
        assert!(!h.orchestrator.is_loading(ProviderId::NanoBananaPro));
        assert_eq!(h.orchestrator.usage(), UsageTotals { prompt_tokens: 7, candidates_tokens: 3 });
    }

    #[tokio::test]
    async fn blank_send_without_uploads_is_a_no_op() {
        let h = harness(FakeImage::default(), FakeJobs::default());
        h.orchestrator.send("   ").await;
        assert!(h.orchestrator.messages(ProviderId::NanoBananaPro).is_empty());
        assert!(h.image.contents_seen().is_empty());
    }

    #[test]
    fn send_while_loading_is_ignored() {
        let h = harness(FakeImage::default(), FakeJobs::default());
        let first = h.orchestrator.begin_turn("one").expect("first turn accepted");
        assert!(h.orchestrator.is_loading(ProviderId::NanoBananaPro));
        assert!(h.orchestrator.begin_turn("two").is_none());
        drop(first);
        assert!(!h.orchestrator.is_loading(ProviderId::NanoBananaPro));
        assert_eq!(h.orchestrator.messages(ProviderId::NanoBananaPro).len(), 1);
    }

    #[tokio::test]
    async fn corrupted_context_is_retried_once_with_empty_history() {
        let h = harness(
            FakeImage::scripted(vec![Ok(generation("a")), Err(corrupted()), Ok(generation("b"))]),
            FakeJobs::default(),
        );
        h.orchestrator.send("draw a cat").await;
        h.orchestrator.send("bigger").await;

        assert_eq!(h.image.contents_seen(), vec![1, 3, 1]);
        let messages = h.orchestrator.messages(ProviderId::NanoBananaPro);
        let last = messages.last().expect("recovered reply");
        assert_eq!(last.parts.last(), Some(&MessagePart::text(RECOVERY_NOTE)));
    }

    #[tokio::test]
    async fn failed_recovery_reports_the_original_error() {
        let h = harness(
            FakeImage::scripted(vec![
                Err(corrupted()),
                Err(CoreError::http_status(503, "image generation failed", "overloaded")),
            ]),
            FakeJobs::default(),
        );
        h.orchestrator.send("draw").await;

        assert_eq!(h.image.contents_seen().len(), 2);
        let messages = h.orchestrator.messages(ProviderId::NanoBananaPro);
        let reply = text_of(&messages[1]);
        assert!(reply.starts_with(ERROR_PREFIX));
        assert!(reply.contains("thought_signature"), "{reply}");
        assert_eq!(messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn unrelated_errors_are_not_retried() {
        let h = harness(
            FakeImage::scripted(vec![Err(CoreError::Protocol("no candidates".to_string()))]),
            FakeJobs::default(),
        );
        h.orchestrator.send("draw").await;
        assert_eq!(h.image.contents_seen().len(), 1);
        let messages = h.orchestrator.messages(ProviderId::NanoBananaPro);
        assert_eq!(text_of(&messages[1]), "**Error:** protocol error: no candidates");
    }

    #[tokio::test]
    async fn video_turn_without_credentials_fails_before_any_call() {
        let h = harness(FakeImage::default(), FakeJobs::default());
        h.orchestrator.select_provider(ProviderId::Sora);
        h.orchestrator.send("a wave").await;

        assert_eq!(h.jobs.creates(), 0);
        assert_eq!(h.jobs.polls(), 0);
        let messages = h.orchestrator.messages(ProviderId::Sora);
        assert_eq!(messages.len(), 2);
        assert!(text_of(&messages[1]).starts_with("**Error:** configuration error"));
    }

    #[tokio::test]
    async fn job_turn_appends_status_then_result() {
        let h = harness(FakeImage::default(), FakeJobs::with_statuses(&["queued", "completed"]));
        with_video_credentials(&h.orchestrator);
        h.orchestrator.select_provider(ProviderId::Sora);
        h.orchestrator.send("a wave").await;

        let messages = h.orchestrator.messages(ProviderId::Sora);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].job_id.as_deref(), Some("sora-2:task_1"));
        assert!(text_of(&messages[1]).contains("sora-2:task_1"));
        assert_eq!(
            messages[2].parts,
            vec![MessagePart::video_url("https://cdn/sora-2:task_1.mp4")]
        );
        assert_eq!(messages[2].job_id.as_deref(), Some("sora-2:task_1"));
        assert_eq!(h.jobs.creates(), 1);
        assert_eq!(h.jobs.polls(), 2);
    }

    #[tokio::test]
    async fn timed_out_job_can_be_resumed() {
        let h = harness(FakeImage::default(), FakeJobs::default());
        with_video_credentials(&h.orchestrator);
        h.orchestrator.select_provider(ProviderId::Sora);
        h.orchestrator.send("slow").await;

        let messages = h.orchestrator.messages(ProviderId::Sora);
        assert_eq!(messages.len(), 3);
        assert!(text_of(&messages[2]).contains("still generating"));
        assert!(!h.orchestrator.is_loading(ProviderId::Sora));

        h.jobs.statuses.lock().expect("lock").push_back("succeeded");
        h.orchestrator
            .resume_job(ProviderId::Sora, "sora-2:task_1")
            .await
            .expect("resume accepted");
        let messages = h.orchestrator.messages(ProviderId::Sora);
        assert_eq!(messages.len(), 4);
        assert!(matches!(messages[3].parts[0], MessagePart::Video { .. }));
    }

    #[tokio::test]
    async fn resume_and_status_require_a_job_provider() {
        let h = harness(FakeImage::default(), FakeJobs::default());
        let err = h.orchestrator.resume_job(ProviderId::Veo, "x").await.expect_err("veo streams");
        assert!(matches!(err, CoreError::Validation(_)));
        let err = h
            .orchestrator
            .job_status(ProviderId::NanoBananaPro, "x")
            .await
            .expect_err("image has no jobs");
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn stream_turn_appends_normalized_parts() {
        let h = harness(FakeImage::default(), FakeJobs::default());
        with_video_credentials(&h.orchestrator);
        h.orchestrator.select_provider(ProviderId::Veo);
        h.orchestrator.send("sunrise").await;

        let messages = h.orchestrator.messages(ProviderId::Veo);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].parts.len(), 2);
        assert!(h.orchestrator.messages(ProviderId::NanoBananaPro).is_empty());
    }

    #[tokio::test]
    async fn remix_validates_then_follows_new_job() {
        let h = harness(FakeImage::default(), FakeJobs::with_statuses(&["completed"]));
        with_video_credentials(&h.orchestrator);

        let err = h.orchestrator.remix("veo:123", "redo").await.expect_err("wrong family");
        assert!(matches!(err, CoreError::Validation(_)));
        let err = h.orchestrator.remix("sora-2:task_1", "  ").await.expect_err("empty prompt");
        assert!(matches!(err, CoreError::Validation(_)));

        h.orchestrator.remix("sora-2:task_1", "slower").await.expect("remix accepted");
        let messages = h.orchestrator.messages(ProviderId::Sora);
        assert_eq!(text_of(&messages[0]), "Remix: slower");
        assert_eq!(messages[0].job_id.as_deref(), Some("sora-2:task_1"));
        assert!(text_of(&messages[1]).contains("sora-2:task_remix"));
        assert_eq!(messages[2].job_id.as_deref(), Some("sora-2:task_remix"));
        assert_eq!(*h.jobs.remixed_from.lock().expect("lock"), vec!["sora-2:task_1".to_string()]);
    }

    #[test]
    fn select_provider_clamps_duration_and_resets_model() {
        let h = harness(FakeImage::default(), FakeJobs::default());
        let settings = h.orchestrator.select_provider(ProviderId::Sora);
        assert_eq!(settings.video_duration_seconds, 10);
        assert_eq!(settings.video_model, "sora-2");

        let settings = h.orchestrator.select_provider(ProviderId::Veo);
        assert_eq!(settings.video_duration_seconds, 4);
        assert_eq!(settings.video_model, "veo_3_1");
        assert_eq!(h.orchestrator.duration_options(), Some(vec![4, 6, 8]));

        h.orchestrator.stage_upload(
            UploadSlot::Primary,
            Some(UploadImage { data: "aW1n".to_string(), mime_type: "image/png".to_string() }),
        );
        assert_eq!(h.orchestrator.duration_options(), Some(vec![8]));

        h.orchestrator.select_provider(ProviderId::NanoBananaPro);
        assert_eq!(h.orchestrator.duration_options(), None);
    }

    fn png() -> Option<UploadImage> {
        Some(UploadImage { data: "aW1n".to_string(), mime_type: "image/png".to_string() })
    }

    #[test]
    fn staging_an_image_keeps_stored_duration_legal() {
        let h = harness(FakeImage::default(), FakeJobs::default());
        h.orchestrator.select_provider(ProviderId::Veo);
        assert_eq!(h.orchestrator.app_settings().video_duration_seconds, 4);

        h.orchestrator.stage_upload(UploadSlot::Secondary, png());
        assert_eq!(h.orchestrator.duration_options(), Some(vec![8]));
        assert_eq!(h.orchestrator.app_settings().video_duration_seconds, 8);

        h.orchestrator.clear_uploads();
        assert_eq!(h.orchestrator.duration_options(), Some(vec![4, 6, 8]));
        assert_eq!(h.orchestrator.app_settings().video_duration_seconds, 8);
    }

    #[test]
    fn replaced_app_settings_are_clamped_against_staged_uploads() {
        let h = harness(FakeImage::default(), FakeJobs::default());
        h.orchestrator.stage_upload(UploadSlot::Primary, png());
        let settings = AppSettings {
            provider: ProviderId::Veo,
            video_model: "veo_3_1-fast".to_string(),
            video_duration_seconds: 6,
            ..AppSettings::default()
        };
        h.orchestrator.update_app_settings(settings);
        assert_eq!(h.orchestrator.app_settings().video_duration_seconds, 8);

        h.orchestrator.stage_upload(UploadSlot::Primary, None);
        let settings = AppSettings { video_duration_seconds: 7, ..h.orchestrator.app_settings() };
        h.orchestrator.update_app_settings(settings);
        assert_eq!(h.orchestrator.app_settings().video_duration_seconds, 4);
    }

    #[test]
    fn image_provider_duration_is_left_alone() {
        let h = harness(FakeImage::default(), FakeJobs::default());
        h.orchestrator.stage_upload(UploadSlot::Primary, png());
        assert_eq!(h.orchestrator.app_settings().video_duration_seconds, 10);
    }

    #[test]
    fn readiness_follows_effective_settings() {
        let h = harness(FakeImage::default(), FakeJobs::default());
        assert!(h.orchestrator.is_ready(ProviderId::NanoBananaPro));
        assert!(!h.orchestrator.is_ready(ProviderId::Sora));
        with_video_credentials(&h.orchestrator);
        assert!(h.orchestrator.is_ready(ProviderId::Sora));
        assert!(h.orchestrator.is_ready(ProviderId::Veo));
    }

    #[test]
    fn client_settings_are_persisted_and_resettable() {
        let h = harness(FakeImage::default(), FakeJobs::default());
        with_video_credentials(&h.orchestrator);
        assert_eq!(h.store.load().shared.api_key, "vk");

        h.orchestrator.reset_client_settings().expect("reset must save");
        assert_eq!(h.store.load(), ClientSettings::default());
        assert_eq!(*h.orchestrator.client_settings(), ClientSettings::default());
    }

    #[tokio::test]
    async fn clearing_a_conversation_keeps_usage_and_other_providers() {
        let h = harness(FakeImage::default(), FakeJobs::default());
        with_video_credentials(&h.orchestrator);
        h.orchestrator.send("cat").await;
        h.orchestrator.select_provider(ProviderId::Veo);
        h.orchestrator.send("wave").await;

        h.orchestrator.clear_conversation(ProviderId::NanoBananaPro);
        assert!(h.orchestrator.messages(ProviderId::NanoBananaPro).is_empty());
        assert_eq!(h.orchestrator.messages(ProviderId::Veo).len(), 2);
        assert_eq!(h.orchestrator.usage().prompt_tokens, 7);
    }
}
