//! Studio and identity-provider defaults
//!
//! None of these are secrets. Every URL can be overridden from the gateway
//! config, which is how tests point the client at a mock studio.

/// Package metadata endpoint used to resolve the identity provider's current
/// client-js version. Responds with `{"tags": {"latest": "<version>"}}`.
pub const VERSION_URL: &str = "https://data.jsdelivr.com/v1/package/npm/@clerk/clerk-js";

/// Cookie-authenticated identity provider (sessions and token renewal).
pub const IDENTITY_URL: &str = "https://clerk.suno.com";

/// Studio API base (generation, feed, billing, lyrics).
pub const API_URL: &str = "https://studio-api.prod.suno.com";

/// Model used when a submission does not name one.
pub const DEFAULT_MODEL: &str = "chirp-v3-5";

/// Browser identity presented to the studio. Requests without one are refused.
pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36";

/// Timeout for generation submissions.
pub const SUBMIT_TIMEOUT_SECS: u64 = 10;

/// Timeout for feed fetches while polling.
pub const FEED_TIMEOUT_SECS: u64 = 3;

/// Randomized pause after a blocking token renewal, in seconds.
pub const RENEW_DELAY_SECS: (u64, u64) = (1, 2);

