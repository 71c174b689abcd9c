//! FunnelForge: A Rust CLI application for conversion-funnel analytics
//!
//! This library provides a batch pipeline over CSV event logs: load and
//! clean events, resolve per-user funnel progression, aggregate conversion
//! and drop-off metrics with segment breakdowns, build cohort retention
//! matrices, and render charts and flat-file exports.

pub mod cli;
pub mod cohort;
pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod funnel;
pub mod generate;
pub mod metrics;
pub mod viz;

// Re-export public items for easier access
pub use cli::Args;
pub use cohort::{build_cohorts, CohortPeriod, CohortReport};
pub use config::AnalysisConfig;
pub use data::{load_events, Device, Event, EventTable, Source};
pub use funnel::{resolve_journeys, FunnelDefinition, JourneySet, UserJourney};
pub use metrics::{compare_segments, compute_metrics, MetricsSummary};

/// Common result type used throughout the application
pub type Result<T> = anyhow::Result<T>;
