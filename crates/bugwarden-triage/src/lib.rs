//! # Bugwarden Triage
//!
//! The reconciliation engine behind every workflow:
//!
//! ```text
//! Workflow::reconcile
//!   cursor ──► ChangeDetector::query ──► Tracker::search
//!          ──► ChangeDetector::detect ──► EffectChain (per change)
//!          ──► ChangeDetector::settle ──► cursor
//! ```
//!
//! Plus the group resolver, the escalation quota engine, the escalation
//! report job and the claim action handler.

pub mod assemble;
pub mod claim;
pub mod detect;
pub mod driver;
pub mod effects;
pub mod escalation;
pub mod groups;
pub mod quota;

pub use assemble::{TriageContext, build_jobs, build_workflow, find_job};
pub use claim::ClaimHandler;
pub use detect::{Change, ChangeDetector, Detection, detector_from_config};
pub use driver::Workflow;
pub use effects::{EffectChain, SideEffect};
pub use escalation::EscalationJob;
pub use groups::{GroupDefs, expand, resolve};
pub use quota::{QuotaReport, count_open, evaluate, quota};
