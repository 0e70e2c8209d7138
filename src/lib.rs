//! gitpilot - git workflow assistant
//!
//! Monitoring events flow into an [`aggregator::EventAggregator`], which
//! correlates them into milestones and suggestions and, when automation is
//! on, asks a decision provider for one action, gates it, executes it and
//! learns from the feedback.

pub mod aggregator;
pub mod commands;
pub mod config;
pub mod decision;
pub mod error;
pub mod events;
pub mod executor;
pub mod feedback;
pub mod git;
pub mod messages;
pub mod milestones;
pub mod patterns;
pub mod safety;
pub mod subprocess;
pub mod suggestions;
pub mod telemetry;
