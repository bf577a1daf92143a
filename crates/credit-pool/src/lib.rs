//! Credit-aware access to the studio
//!
//! Wraps a pool of studio credentials behind one active session and moves to
//! another credential when credits run low. The credential store is the
//! source of truth for candidates and the active pointer; this crate is its
//! only writer.
//!
//! Request lifecycle:
//! 1. `FailoverController::bootstrap` picks the starting credential
//! 2. `Studio` operations run through `FailoverController::guard`, which
//!    checks credits against the operation's threshold
//! 3. Low credits → first candidate with enough credits is promoted and
//!    persisted, then the operation runs on it
//! 4. No candidate qualifies → the operation runs on the current account
//! 5. An optional background task keeps the active token fresh

pub mod error;
pub mod failover;
pub mod keepalive;
pub mod operations;
pub mod quota;

pub use error::{Error, Result};
pub use failover::FailoverController;
pub use keepalive::spawn_keepalive_task;
pub use operations::{CustomGenerateParams, ExtendParams, GenerateParams, Studio};
pub use quota::{FEED_THRESHOLD, GENERATION_THRESHOLD, OperationClass, Thresholds};
