//! Generation operations
//!
//! Thin orchestration over the failover guard, the session and the poller.
//! Submit, custom submit and concatenate run under the generation threshold,
//! status fetches under the feed threshold. Extend and lyrics run unguarded
//! on whatever session is current.
//!
//! Token housekeeping: every call renews right before it hits the studio. A
//! submission that does not wait for audio renews again afterwards (with the
//! randomized pause) so the next call starts with a fresh token.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use studio_client::{
    GenerateRequest, GenerationJob, LyricsPollConfig, LyricsResult, PollConfig, QuotaSnapshot,
    Session, await_completion, await_lyrics,
};
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::failover::FailoverController;
use crate::quota::OperationClass;

/// Free-text description generation.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateParams {
    pub prompt: String,
    #[serde(default)]
    pub make_instrumental: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub wait_audio: bool,
}

/// Custom generation with caller-written lyrics and style.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomGenerateParams {
    pub prompt: String,
    pub tags: String,
    pub title: String,
    #[serde(default)]
    pub negative_tags: Option<String>,
    #[serde(default)]
    pub make_instrumental: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub wait_audio: bool,
}

/// Continue an existing clip from a timestamp.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtendParams {
    pub audio_id: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub continue_at: Option<f64>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub negative_tags: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub wait_audio: bool,
}

/// Entry point for every studio use case.
pub struct Studio {
    controller: Arc<FailoverController>,
    poll: PollConfig,
    lyrics_poll: LyricsPollConfig,
}

impl Studio {
    pub fn new(
        controller: Arc<FailoverController>,
        poll: PollConfig,
        lyrics_poll: LyricsPollConfig,
    ) -> Self {
        Self {
            controller,
            poll,
            lyrics_poll,
        }
    }

    pub fn controller(&self) -> &Arc<FailoverController> {
        &self.controller
    }

    /// Submit a described generation, guarded by the generation threshold.
    #[instrument(skip_all, fields(wait_audio = params.wait_audio))]
    pub async fn generate(&self, params: GenerateParams) -> Result<Vec<GenerationJob>> {
        let request =
            GenerateRequest::described(&params.prompt, params.make_instrumental, params.model.as_deref());
        let poll = self.poll;
        self.controller
            .guard_class(OperationClass::Generation, move |session| async move {
                submit(&session, &request, params.wait_audio, &poll).await
            })
            .await
    }

    /// Submit a custom generation, guarded by the generation threshold.
    #[instrument(skip_all, fields(wait_audio = params.wait_audio))]
    pub async fn custom_generate(&self, params: CustomGenerateParams) -> Result<Vec<GenerationJob>> {
        let request = GenerateRequest::custom(
            &params.prompt,
            &params.tags,
            &params.title,
            params.negative_tags.as_deref(),
            params.make_instrumental,
            params.model.as_deref(),
        );
        let poll = self.poll;
        self.controller
            .guard_class(OperationClass::Generation, move |session| async move {
                submit(&session, &request, params.wait_audio, &poll).await
            })
            .await
    }

    /// Extend a clip. Runs unguarded on the current session.
    #[instrument(skip_all, fields(audio_id = %params.audio_id))]
    pub async fn extend(&self, params: ExtendParams) -> Result<Vec<GenerationJob>> {
        let request = GenerateRequest::custom(
            &params.prompt,
            &params.tags,
            &params.title,
            params.negative_tags.as_deref(),
            false,
            params.model.as_deref(),
        )
        .extending(&params.audio_id, params.continue_at);

        let session = self.controller.current().await;
        Ok(submit(&session, &request, params.wait_audio, &self.poll).await?)
    }

    /// Stitch an extended clip into the full song, guarded by the generation
    /// threshold.
    #[instrument(skip(self))]
    pub async fn concatenate(&self, clip_id: &str) -> Result<GenerationJob> {
        let clip_id = clip_id.to_string();
        self.controller
            .guard_class(OperationClass::Generation, move |session| async move {
                session.renew(false).await?;
                let job = session.concatenate(&clip_id).await?;
                renew_after(&session).await;
                Ok(job)
            })
            .await
    }

    /// Generate lyrics and wait for them. Unguarded.
    #[instrument(skip_all)]
    pub async fn generate_lyrics(&self, prompt: &str) -> Result<LyricsResult> {
        let session = self.controller.current().await;
        session.renew(false).await?;
        let lyrics_id = session.submit_lyrics(prompt).await?;
        info!(account = %session.account(), lyrics_id = %lyrics_id, "lyrics job submitted");
        Ok(await_lyrics(&session, &lyrics_id, &self.lyrics_poll).await?)
    }

    /// Jobs by id, or a page of the account feed when `ids` is empty. Guarded
    /// by the feed threshold.
    #[instrument(skip(self, ids), fields(ids = ids.len()))]
    pub async fn get(&self, ids: &[String], page: Option<u32>) -> Result<Vec<GenerationJob>> {
        let ids = ids.to_vec();
        self.controller
            .guard_class(OperationClass::Feed, move |session| async move {
                session.renew(false).await?;
                session.fetch_feed(&ids, page).await
            })
            .await
    }

    /// Credits on the current account.
    pub async fn get_limit(&self) -> Result<QuotaSnapshot> {
        let session = self.controller.current().await;
        Ok(session.quota(false).await?)
    }

    /// Raw clip document. Unguarded.
    pub async fn get_clip(&self, clip_id: &str) -> Result<Value> {
        let session = self.controller.current().await;
        session.renew(false).await?;
        Ok(session.fetch_clip(clip_id).await?)
    }
}

/// Renew, submit, then either wait for the batch or renew again.
async fn submit(
    session: &Session,
    request: &GenerateRequest,
    wait_audio: bool,
    poll: &PollConfig,
) -> studio_client::Result<Vec<GenerationJob>> {
    session.renew(false).await?;
    let jobs = session.submit_generation(request).await?;
    info!(
        account = %session.account(),
        jobs = jobs.len(),
        model = %request.mv,
        "generation submitted"
    );

    if wait_audio {
        let ids: Vec<String> = jobs.iter().map(|job| job.id.clone()).collect();
        return await_completion(session, &ids, poll).await;
    }

    renew_after(session).await;
    Ok(jobs)
}

/// The studio already accepted the work; a failed follow-up renewal must not
/// turn that into an error.
async fn renew_after(session: &Session) {
    if let Err(e) = session.renew(true).await {
        warn!(account = %session.account(), error = %e, "post-submit token renewal failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failover::tests::{RecordingStore, controller};
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use studio_client::mock::MockStudio;
    use studio_client::{DEFAULT_MODEL, DelayRange, JobStatus};

    fn fast_poll() -> PollConfig {
        PollConfig {
            window: Duration::from_secs(30),
            initial_delay: DelayRange::fixed(0),
            interval: DelayRange::fixed(0),
        }
    }

    fn fast_lyrics() -> LyricsPollConfig {
        LyricsPollConfig {
            interval: Duration::from_millis(10),
            window: None,
        }
    }

    async fn studio(mock: &MockStudio, store: Arc<RecordingStore>) -> Studio {
        let ctl = controller(mock, store, "cookie-p").await;
        Studio::new(Arc::new(ctl), fast_poll(), fast_lyrics())
    }

    fn described(wait_audio: bool) -> GenerateParams {
        GenerateParams {
            prompt: "lofi beats for debugging".into(),
            make_instrumental: false,
            model: None,
            wait_audio,
        }
    }

    #[tokio::test]
    async fn generate_without_waiting_returns_submitted_jobs() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-p", "sess_p", Some(100));
        let studio = studio(&mock, Arc::new(RecordingStore::with(&[]))).await;

        let jobs = studio.generate(described(false)).await.unwrap();

        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.status == JobStatus::Submitted));
        assert_eq!(jobs[0].model_name.as_deref(), Some(DEFAULT_MODEL));
        assert_eq!(
            jobs[0].gpt_description_prompt.as_deref(),
            Some("lofi beats for debugging")
        );
        assert_eq!(mock.sessions_for("generate").len(), 1);
        assert_eq!(mock.feed_calls(), 0, "must not poll");
    }

    #[tokio::test]
    async fn generate_renews_before_and_after() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-p", "sess_p", Some(100));
        let studio = studio(&mock, Arc::new(RecordingStore::with(&[]))).await;

        let before = mock.renewal_count();
        studio.generate(described(false)).await.unwrap();
        // quota check, pre-submit, post-submit
        assert_eq!(mock.renewal_count(), before + 3);
    }

    #[tokio::test]
    async fn generate_with_wait_polls_until_complete() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-p", "sess_p", Some(100));
        mock.set_feed_script(vec![vec!["queued"], vec!["complete"]]);
        let studio = studio(&mock, Arc::new(RecordingStore::with(&[]))).await;

        let jobs = studio.generate(described(true)).await.unwrap();

        assert!(jobs.iter().all(|j| j.status == JobStatus::Complete));
        assert_eq!(mock.feed_calls(), 2);
    }

    #[tokio::test]
    async fn low_credits_move_generation_to_candidate() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-p", "sess_p", Some(20));
        mock.add_account("cookie-b", "sess_b", Some(300));
        let store = Arc::new(RecordingStore::with(&[("b", "cookie-b")]));
        let studio = studio(&mock, store.clone()).await;

        studio.generate(described(false)).await.unwrap();

        assert_eq!(mock.sessions_for("generate"), vec!["sess_b".to_string()]);
        assert_eq!(store.active_label().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn custom_generate_sends_structured_fields() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-p", "sess_p", Some(100));
        let studio = studio(&mock, Arc::new(RecordingStore::with(&[]))).await;

        let jobs = studio
            .custom_generate(CustomGenerateParams {
                prompt: "[Verse]\nborrowed, never owned".into(),
                tags: "synthwave".into(),
                title: "Lifetimes".into(),
                negative_tags: None,
                make_instrumental: true,
                model: Some("chirp-v4".into()),
                wait_audio: false,
            })
            .await
            .unwrap();

        assert_eq!(jobs[0].title.as_deref(), Some("Lifetimes"));
        let body = mock.last_generate_body().unwrap();
        assert_eq!(body["prompt"], "[Verse]\nborrowed, never owned");
        assert_eq!(body["tags"], "synthwave");
        assert_eq!(body["negative_tags"], "");
        assert_eq!(body["mv"], "chirp-v4");
        assert_eq!(body["make_instrumental"], true);
        assert!(body.get("gpt_description_prompt").is_none());
    }

    #[tokio::test]
    async fn extend_is_unguarded() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-p", "sess_p", Some(0));
        mock.add_account("cookie-b", "sess_b", Some(300));
        let store = Arc::new(RecordingStore::with(&[("b", "cookie-b")]));
        let studio = studio(&mock, store.clone()).await;

        studio
            .extend(ExtendParams {
                audio_id: "clip-9".into(),
                prompt: String::new(),
                continue_at: Some(42.5),
                title: "Part two".into(),
                tags: String::new(),
                negative_tags: None,
                model: None,
                wait_audio: false,
            })
            .await
            .unwrap();

        assert!(mock.sessions_for("billing").is_empty(), "no quota check");
        assert_eq!(mock.sessions_for("generate"), vec!["sess_p".to_string()]);
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
        let body = mock.last_generate_body().unwrap();
        assert_eq!(body["task"], "extend");
        assert_eq!(body["continue_clip_id"], "clip-9");
        assert_eq!(body["continue_at"], 42.5);
    }

    #[tokio::test]
    async fn concatenate_is_guarded() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-p", "sess_p", Some(5));
        mock.add_account("cookie-b", "sess_b", Some(300));
        let store = Arc::new(RecordingStore::with(&[("b", "cookie-b")]));
        let studio = studio(&mock, store).await;

        let job = studio.concatenate("clip-3").await.unwrap();

        assert_eq!(job.id, "concat-clip-3");
        assert_eq!(mock.sessions_for("concat"), vec!["sess_b".to_string()]);
    }

    #[tokio::test]
    async fn lyrics_are_unguarded_and_polled() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-p", "sess_p", Some(0));
        mock.set_lyrics_pending_polls(2);
        let studio = studio(&mock, Arc::new(RecordingStore::with(&[]))).await;

        let lyrics = studio.generate_lyrics("ownership blues").await.unwrap();

        assert!(lyrics.is_complete());
        assert!(lyrics.text.contains("ownership blues"));
        assert!(mock.sessions_for("billing").is_empty());
    }

    #[tokio::test]
    async fn get_uses_the_lighter_threshold() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-p", "sess_p", Some(20));
        mock.add_account("cookie-b", "sess_b", Some(300));
        let store = Arc::new(RecordingStore::with(&[("b", "cookie-b")]));
        let studio = studio(&mock, store.clone()).await;

        let jobs = studio.get(&["x".to_string()], None).await.unwrap();

        assert_eq!(jobs.len(), 1);
        assert_eq!(mock.sessions_for("feed"), vec!["sess_p".to_string()]);
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn get_without_ids_returns_feed_page() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-p", "sess_p", Some(100));
        let studio = studio(&mock, Arc::new(RecordingStore::with(&[]))).await;

        let jobs = studio.get(&[], Some(1)).await.unwrap();
        assert_eq!(jobs.len(), 2);
    }

    #[tokio::test]
    async fn get_limit_reports_current_account() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-p", "sess_p", Some(-3));
        let studio = studio(&mock, Arc::new(RecordingStore::with(&[]))).await;

        let quota = studio.get_limit().await.unwrap();
        assert_eq!(quota.remaining, Some(-3), "reported verbatim, not clamped");
        assert_eq!(quota.monthly_limit, Some(500));
    }

    #[tokio::test]
    async fn failed_pre_submit_renewal_aborts_before_submitting() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-p", "sess_p", Some(100));
        let studio = studio(&mock, Arc::new(RecordingStore::with(&[]))).await;
        let session = studio.controller().current().await;
        mock.fail_renewals("sess_p", true);

        let err = submit(
            &session,
            &GenerateRequest::described("x", false, None),
            false,
            &fast_poll(),
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), "token_renew_error");
        assert!(mock.sessions_for("generate").is_empty());
    }

    #[test]
    fn params_default_optional_fields() {
        let params: GenerateParams = serde_json::from_str(r#"{"prompt":"x"}"#).unwrap();
        assert!(!params.make_instrumental);
        assert!(!params.wait_audio);
        assert!(params.model.is_none());

        let extend: ExtendParams = serde_json::from_str(r#"{"audio_id":"c1"}"#).unwrap();
        assert_eq!(extend.prompt, "");
        assert!(extend.continue_at.is_none());
    }
}
