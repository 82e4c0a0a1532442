//! # Bugwarden Scheduler
//!
//! Fires independent jobs on their own cron schedules.
//!
//! ## Architecture
//! ```text
//! SchedulerEngine (tokio interval)
//!   ├── new-bugs     "*/10 * * * *"        → Job::run
//!   ├── tracking     "0 * * * *"           → Job::run
//!   └── nag-report   "0 9 * * 1-5", "0 15 * * 1-5"
//!
//! Each firing is a detached task. A per-job OverlapPolicy decides what
//! happens when the previous run of the same job is still going.
//! ```

pub mod cron;
pub mod engine;
pub mod tasks;

pub use cron::CronSchedule;
pub use engine::{SchedulerEngine, spawn_scheduler};
pub use tasks::{FireOutcome, ScheduledJob};
