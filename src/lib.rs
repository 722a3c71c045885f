//! Index Consolidator
//!
//! Consolidates daily search indices into monthly indices. A dispatcher
//! discovers consolidation-eligible indices, groups them into month buckets,
//! and enqueues one task per bucket; workers turn each task into an ordered
//! action plan and execute it through an external plan runner.

pub mod cluster;
pub mod config;
pub mod discovery;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod models;
pub mod planner;
pub mod queue;
pub mod runner;
pub mod worker;

pub use error::{AppError, Result};
