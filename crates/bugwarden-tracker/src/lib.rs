//! # Bugwarden Tracker
//!
//! Access to the issue tracker, as one capability with stackable decorators:
//!
//! ```text
//! LoggingTracker
//!   └── CachingTracker      (comments/history by record revision)
//!         └── StagingTracker (writes go to staging or nowhere)
//!               └── BugzillaClient
//! ```

pub mod bugzilla;
pub mod chain;
pub mod decorators;
pub mod memory;

pub use bugzilla::BugzillaClient;
pub use chain::{TrackerChain, tracker_from_config, with_layers};
pub use decorators::{CachingTracker, LoggingTracker, StagingTracker};
pub use memory::MemoryTracker;
