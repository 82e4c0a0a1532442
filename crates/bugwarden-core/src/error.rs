//! Error types for Bugwarden.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BugwardenError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Tracker error: {0}")]
    Tracker(String),

    #[error("Chat error: {0}")]
    Chat(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Cursor store error: {0}")]
    Cursor(String),

    #[error("Schedule error: {0}")]
    Schedule(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Per-item side-effect failures collected over one run.
    #[error(
        "{workflow}: {} of {attempted} side effects failed: {}",
        failures.len(),
        failures.join("; ")
    )]
    SideEffects {
        workflow: String,
        attempted: usize,
        failures: Vec<String>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl BugwardenError {
    pub fn tracker(msg: impl std::fmt::Display) -> Self {
        Self::Tracker(msg.to_string())
    }

    pub fn chat(msg: impl std::fmt::Display) -> Self {
        Self::Chat(msg.to_string())
    }

    /// True for failures that mean the source of truth could not be reached.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, Self::Tracker(_) | Self::Http(_))
    }
}

pub type Result<T> = std::result::Result<T, BugwardenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_effects_message() {
        let err = BugwardenError::SideEffects {
            workflow: "new-bugs".into(),
            attempted: 3,
            failures: vec!["bug 5: timeout".into(), "bug 9: 500".into()],
        };
        assert_eq!(
            err.to_string(),
            "new-bugs: 2 of 3 side effects failed: bug 5: timeout; bug 9: 500"
        );
    }

    #[test]
    fn test_fetch_failure_classification() {
        assert!(BugwardenError::tracker("down").is_fetch_failure());
        assert!(!BugwardenError::chat("down").is_fetch_failure());
    }
}
