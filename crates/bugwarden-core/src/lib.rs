//! # Bugwarden Core
//!
//! Shared vocabulary for every Bugwarden crate: the error type, TOML config,
//! tracker/chat domain types and the collaborator traits that the triage
//! engine is written against.

pub mod cancel;
pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use cancel::{CancelHandle, CancelSignal};
pub use config::BugwardenConfig;
pub use error::{BugwardenError, Result};
pub use traits::{ChatPlatform, Job, Tracker};
