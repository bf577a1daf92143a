//! Common types shared by the studio gateway crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
