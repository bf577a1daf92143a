//! Wire types for the studio API and the normalized shapes handed to callers

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_MODEL;

/// Remaining usage allowance, mapped verbatim from the billing endpoint.
///
/// Every field is service-controlled: `remaining` may be negative or missing
/// and is never clamped here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaSnapshot {
    #[serde(rename = "credits_left")]
    pub remaining: Option<i64>,
    #[serde(rename = "period")]
    pub period_label: Option<String>,
    pub monthly_limit: Option<i64>,
    pub monthly_usage: Option<i64>,
}

impl QuotaSnapshot {
    /// Whether at least `threshold` credits remain. Missing counts as no.
    pub fn meets(&self, threshold: i64) -> bool {
        self.remaining.is_some_and(|remaining| remaining >= threshold)
    }
}

/// Billing endpoint response body.
#[derive(Debug, Deserialize)]
pub(crate) struct BillingInfo {
    #[serde(default)]
    pub total_credits_left: Option<i64>,
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub monthly_limit: Option<i64>,
    #[serde(default)]
    pub monthly_usage: Option<i64>,
}

impl From<BillingInfo> for QuotaSnapshot {
    fn from(info: BillingInfo) -> Self {
        Self {
            remaining: info.total_credits_left,
            period_label: info.period,
            monthly_limit: info.monthly_limit,
            monthly_usage: info.monthly_usage,
        }
    }
}

/// Lifecycle status reported for a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Submitted,
    Queued,
    Streaming,
    Complete,
    Error,
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    /// Audio is playable (streaming) or final.
    pub fn is_ready(self) -> bool {
        matches!(self, JobStatus::Streaming | JobStatus::Complete)
    }
}

/// Clip as returned by the generation and feed endpoints.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawClip {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default = "unknown_status")]
    pub status: JobStatus,
    #[serde(default)]
    pub metadata: ClipMetadata,
}

fn unknown_status() -> JobStatus {
    JobStatus::Unknown
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ClipMetadata {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub gpt_description_prompt: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub negative_tags: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Response of the generation submission endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct GenerateResponse {
    #[serde(default)]
    pub clips: Vec<RawClip>,
}

/// Normalized generation job returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationJob {
    pub id: String,
    pub title: Option<String>,
    pub image_url: Option<String>,
    /// Lyric text; the studio stores it as the clip's prompt.
    pub lyric: Option<String>,
    pub audio_url: Option<String>,
    pub video_url: Option<String>,
    pub created_at: Option<String>,
    pub model_name: Option<String>,
    pub status: JobStatus,
    pub gpt_description_prompt: Option<String>,
    pub prompt: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub tags: Option<String>,
    pub negative_tags: Option<String>,
    pub duration: Option<f64>,
    pub error_message: Option<String>,
}

impl From<RawClip> for GenerationJob {
    fn from(clip: RawClip) -> Self {
        let meta = clip.metadata;
        Self {
            id: clip.id,
            title: clip.title,
            image_url: clip.image_url,
            lyric: meta.prompt.clone(),
            audio_url: clip.audio_url,
            video_url: clip.video_url,
            created_at: clip.created_at,
            model_name: clip.model_name,
            status: clip.status,
            gpt_description_prompt: meta.gpt_description_prompt,
            prompt: meta.prompt,
            kind: meta.kind,
            tags: meta.tags,
            negative_tags: meta.negative_tags,
            duration: meta.duration,
            error_message: meta.error_message,
        }
    }
}

/// Body of a generation submission.
///
/// Non-custom mode sends the free-text prompt as `gpt_description_prompt` and
/// leaves `prompt` empty; custom mode sends lyrics in `prompt` alongside
/// tags, title and negative tags.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateRequest {
    pub make_instrumental: bool,
    pub mv: String,
    pub prompt: String,
    pub generation_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpt_description_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_tags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_clip_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_at: Option<f64>,
}

impl GenerateRequest {
    fn base(make_instrumental: bool, model: Option<&str>) -> Self {
        Self {
            make_instrumental,
            mv: model.unwrap_or(DEFAULT_MODEL).to_string(),
            prompt: String::new(),
            generation_type: "TEXT".to_string(),
            gpt_description_prompt: None,
            tags: None,
            title: None,
            negative_tags: None,
            task: None,
            continue_clip_id: None,
            continue_at: None,
        }
    }

    /// Free-text description mode.
    pub fn described(prompt: &str, make_instrumental: bool, model: Option<&str>) -> Self {
        Self {
            gpt_description_prompt: Some(prompt.to_string()),
            ..Self::base(make_instrumental, model)
        }
    }

    /// Custom mode: caller-provided lyrics, style tags and title.
    pub fn custom(
        lyrics: &str,
        tags: &str,
        title: &str,
        negative_tags: Option<&str>,
        make_instrumental: bool,
        model: Option<&str>,
    ) -> Self {
        Self {
            prompt: lyrics.to_string(),
            tags: Some(tags.to_string()),
            title: Some(title.to_string()),
            negative_tags: Some(negative_tags.unwrap_or_default().to_string()),
            ..Self::base(make_instrumental, model)
        }
    }

    /// Turn this request into an extension of `clip_id` from `continue_at` seconds.
    pub fn extending(mut self, clip_id: &str, continue_at: Option<f64>) -> Self {
        self.task = Some("extend".to_string());
        self.continue_clip_id = Some(clip_id.to_string());
        self.continue_at = continue_at;
        self
    }
}

/// Lyrics job as reported by the lyrics endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LyricsResult {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: String,
}

impl LyricsResult {
    pub fn is_complete(&self) -> bool {
        self.status == "complete"
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct LyricsSubmitted {
    pub id: String,
}
