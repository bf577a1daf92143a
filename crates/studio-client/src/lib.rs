//! Studio session client
//!
//! Keeps an authenticated session against the generative-audio studio, which
//! has no stable public API: a cookie identifies the account to a hosted
//! identity provider, which issues short-lived bearer tokens for the studio
//! API itself.
//!
//! Session flow:
//! 1. `Connector::connect(credential)` resolves the identity client version,
//!    establishes a session id, and issues the first bearer token
//! 2. `Session::renew` replaces the token; long chains of calls renew between
//!    steps
//! 3. `Session::quota` reads remaining credits from the billing endpoint
//! 4. Generation calls submit jobs; `poller::await_completion` polls them
//!    until they settle or the window closes

pub mod api;
pub mod constants;
pub mod delay;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod models;
pub mod poller;
pub mod session;

pub use constants::*;
pub use delay::DelayRange;
pub use error::{Error, Result};
pub use models::{GenerateRequest, GenerationJob, JobStatus, LyricsResult, QuotaSnapshot};
pub use poller::{LyricsPollConfig, PollConfig, await_completion, await_lyrics};
pub use session::{Connector, Endpoints, Session, SessionConfig};
