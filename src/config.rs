//! Analysis configuration passed explicitly into each pipeline stage

use std::path::PathBuf;

use crate::cohort::CohortPeriod;
use crate::funnel::FunnelDefinition;

/// Everything one analysis run needs. Built once from the CLI arguments
/// and handed to each component; there is no ambient global configuration.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub input: String,
    pub funnel: FunnelDefinition,
    pub cohort_period: CohortPeriod,
    /// Number of elapsed periods tracked per cohort (columns 0..=horizon)
    pub cohort_horizon: usize,
    /// Significance threshold for segment comparisons
    pub alpha: f64,
    /// Minimum per-segment sample size below which significance is null
    pub min_sample: u64,
    /// Minimum cohort size below which a cohort is flagged low-confidence
    pub min_cohort_size: u64,
    pub output_dir: PathBuf,
}
