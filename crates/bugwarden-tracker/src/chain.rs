//! Composition of tracker decorators.

use std::sync::Arc;

use bugwarden_core::config::BugwardenConfig;
use bugwarden_core::error::Result;
use bugwarden_core::traits::Tracker;
use bugwarden_store::CacheStore;

use crate::bugzilla::BugzillaClient;
use crate::decorators::{CachingTracker, LoggingTracker, StagingTracker};

/// Builds a tracker from a base client plus layers, innermost first.
///
/// ```ignore
/// let tracker = TrackerChain::new(client)
///     .layer(|t| Arc::new(CachingTracker::new(t, cache.clone())))
///     .layer(|t| Arc::new(LoggingTracker::new(t)))
///     .build();
/// ```
pub struct TrackerChain {
    current: Arc<dyn Tracker>,
    base: String,
    depth: usize,
}

impl TrackerChain {
    pub fn new(base: Arc<dyn Tracker>) -> Self {
        Self {
            base: base.name().to_string(),
            current: base,
            depth: 0,
        }
    }

    /// Wrap everything built so far.
    pub fn layer<F>(mut self, wrap: F) -> Self
    where
        F: FnOnce(Arc<dyn Tracker>) -> Arc<dyn Tracker>,
    {
        self.current = wrap(self.current);
        self.depth += 1;
        self
    }

    pub fn build(self) -> Arc<dyn Tracker> {
        tracing::debug!("🔗 Tracker chain: {} layer(s) over '{}'", self.depth, self.base);
        self.current
    }
}

/// Production chain: Bugzilla, optionally behind staging, then cache and
/// logging.
pub fn tracker_from_config(
    config: &BugwardenConfig,
    cache: Arc<CacheStore>,
) -> Result<Arc<dyn Tracker>> {
    let base: Arc<dyn Tracker> = Arc::new(BugzillaClient::new(
        &config.tracker.base_url,
        &config.tracker.api_key,
        config.tracker.request_timeout_secs,
    )?);
    with_layers(base, config, cache)
}

/// Apply the configured layers on top of `base`.
pub fn with_layers(
    base: Arc<dyn Tracker>,
    config: &BugwardenConfig,
    cache: Arc<CacheStore>,
) -> Result<Arc<dyn Tracker>> {
    let mut chain = TrackerChain::new(base);

    if config.staging.enabled {
        let target: Option<Arc<dyn Tracker>> = if config.staging.tracker_base_url.is_empty() {
            tracing::info!("🧪 Staging mode: tracker writes are dropped");
            None
        } else {
            tracing::info!(
                "🧪 Staging mode: tracker writes go to {}",
                config.staging.tracker_base_url
            );
            Some(Arc::new(BugzillaClient::new(
                &config.staging.tracker_base_url,
                &config.staging.tracker_api_key,
                config.tracker.request_timeout_secs,
            )?))
        };
        chain = chain.layer(|t| Arc::new(StagingTracker::new(t, target)));
    }

    Ok(chain
        .layer(|t| Arc::new(CachingTracker::new(t, cache)))
        .layer(|t| Arc::new(LoggingTracker::new(t)))
        .build())
}
