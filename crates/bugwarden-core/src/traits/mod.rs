//! Collaborator traits. Every external system and every schedulable unit of
//! work is reached through one of these.

pub mod chat;
pub mod job;
pub mod tracker;

pub use chat::ChatPlatform;
pub use job::Job;
pub use tracker::Tracker;
