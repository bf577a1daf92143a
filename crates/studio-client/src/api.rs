//! Studio API calls made through an initialized session
//!
//! These are single requests with no token housekeeping of their own; the
//! renew-before / renew-after policy belongs to the generation operations.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{
    GenerateRequest, GenerateResponse, GenerationJob, LyricsResult, LyricsSubmitted, RawClip,
};
use crate::session::Session;

impl Session {
    /// Submit a generation request. Returns the accepted jobs, unpolled.
    pub async fn submit_generation(&self, request: &GenerateRequest) -> Result<Vec<GenerationJob>> {
        let response: GenerateResponse = self
            .post_json("/api/generate/v2/", request, self.config().submit_timeout)
            .await?;
        debug!(
            account = %self.account(),
            jobs = response.clips.len(),
            "generation accepted"
        );
        Ok(response.clips.into_iter().map(GenerationJob::from).collect())
    }

    /// Fetch jobs by id, or one page of the account's feed when `ids` is empty.
    pub async fn fetch_feed(&self, ids: &[String], page: Option<u32>) -> Result<Vec<GenerationJob>> {
        let mut request = self
            .authorized(reqwest::Method::GET, "/api/feed/")
            .await
            .timeout(self.config().feed_timeout);
        if !ids.is_empty() {
            request = request.query(&[("ids", ids.join(","))]);
        }
        if let Some(page) = page {
            request = request.query(&[("page", page.to_string())]);
        }

        let clips: Vec<RawClip> = read_json(request.send().await, "feed").await?;
        Ok(clips.into_iter().map(GenerationJob::from).collect())
    }

    /// Stitch an extended clip and its ancestors into one full song.
    pub async fn concatenate(&self, clip_id: &str) -> Result<GenerationJob> {
        #[derive(Serialize)]
        struct ConcatRequest<'a> {
            clip_id: &'a str,
        }

        let clip: RawClip = self
            .post_json(
                "/api/generate/concat/v2/",
                &ConcatRequest { clip_id },
                self.config().submit_timeout,
            )
            .await?;
        Ok(clip.into())
    }

    /// Start a lyrics job; returns its id.
    pub async fn submit_lyrics(&self, prompt: &str) -> Result<String> {
        #[derive(Serialize)]
        struct LyricsRequest<'a> {
            prompt: &'a str,
        }

        let submitted: LyricsSubmitted = self
            .post_json(
                "/api/generate/lyrics/",
                &LyricsRequest { prompt },
                self.config().submit_timeout,
            )
            .await?;
        Ok(submitted.id)
    }

    /// Current state of a lyrics job.
    pub async fn fetch_lyrics(&self, lyrics_id: &str) -> Result<LyricsResult> {
        check_path_id("lyrics id", lyrics_id)?;
        let request = self
            .authorized(reqwest::Method::GET, &format!("/api/generate/lyrics/{lyrics_id}"))
            .await
            .timeout(self.config().feed_timeout);
        read_json(request.send().await, "lyrics").await
    }

    /// Raw clip document, passed through untouched.
    pub async fn fetch_clip(&self, clip_id: &str) -> Result<Value> {
        check_path_id("clip id", clip_id)?;
        let request = self
            .authorized(reqwest::Method::GET, &format!("/api/clip/{clip_id}"))
            .await
            .timeout(self.config().feed_timeout);
        read_json(request.send().await, "clip").await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B, timeout: std::time::Duration) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: serde::de::DeserializeOwned,
    {
        let request = self
            .authorized(reqwest::Method::POST, path)
            .await
            .timeout(timeout)
            .json(body);
        read_json(request.send().await, path).await
    }
}

/// Ids are spliced into the URL path, so only `[A-Za-z0-9_-]` is accepted.
fn check_path_id(what: &str, id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("{what} {id:?} is not a valid identifier")))
    }
}

/// Map transport failures, non-2xx statuses and undecodable bodies to `Upstream`.
async fn read_json<T: serde::de::DeserializeOwned>(
    sent: std::result::Result<reqwest::Response, reqwest::Error>,
    what: &str,
) -> Result<T> {
    let response = sent.map_err(|e| {
        if e.is_timeout() {
            Error::Upstream(format!("{what} request timed out: {e}"))
        } else {
            Error::Upstream(format!("{what} request failed: {e}"))
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::Upstream(format!("{what} returned {status}: {body}")));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| Error::Upstream(format!("invalid {what} response: {e}")))
}
