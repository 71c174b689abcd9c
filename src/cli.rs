//! Command-line interface definitions and argument parsing

use std::path::PathBuf;

use clap::Parser;

use crate::cohort::CohortPeriod;
use crate::config::AnalysisConfig;
use crate::funnel::FunnelDefinition;

/// Conversion-funnel analytics CLI over CSV event logs
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the input CSV file (user_id,event,timestamp,source,device)
    #[arg(short, long, default_value = "funnel_events.csv")]
    pub input: String,

    /// Ordered funnel step names as a comma-separated list
    /// Example: --steps "page_view,signup,first_purchase"
    #[arg(
        short,
        long,
        default_value = "page_view,signup,first_purchase,repeat_purchase"
    )]
    pub steps: String,

    /// Cohort period granularity
    #[arg(long, value_enum, default_value = "weekly")]
    pub cohort_period: CohortPeriod,

    /// Number of elapsed periods tracked per cohort
    #[arg(long, default_value = "8")]
    pub cohort_horizon: usize,

    /// Significance threshold for segment comparisons
    #[arg(long, default_value = "0.05")]
    pub alpha: f64,

    /// Minimum segment sample size for significance testing
    #[arg(long, default_value = "30")]
    pub min_sample: u64,

    /// Cohorts smaller than this are flagged low-confidence
    #[arg(long, default_value = "10")]
    pub min_cohort_size: u64,

    /// Directory for charts, data exports, and reports
    #[arg(short, long, default_value = "outputs")]
    pub output_dir: PathBuf,

    /// Generation mode: write a synthetic sample CSV with this many users
    /// to the --input path instead of analyzing
    #[arg(short, long)]
    pub generate: Option<usize>,

    /// Seed for the sample data generator
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Parse the comma-separated step list into a validated funnel
    /// definition
    pub fn parse_funnel(&self) -> crate::Result<FunnelDefinition> {
        let steps: Vec<String> = self
            .steps
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        FunnelDefinition::new(steps)
    }

    /// Build the full analysis configuration from the arguments
    pub fn to_config(&self) -> crate::Result<AnalysisConfig> {
        if !(0.0..1.0).contains(&self.alpha) || self.alpha <= 0.0 {
            anyhow::bail!("alpha must be in (0, 1), got {}", self.alpha);
        }
        Ok(AnalysisConfig {
            input: self.input.clone(),
            funnel: self.parse_funnel()?,
            cohort_period: self.cohort_period,
            cohort_horizon: self.cohort_horizon,
            alpha: self.alpha,
            min_sample: self.min_sample,
            min_cohort_size: self.min_cohort_size,
            output_dir: self.output_dir.clone(),
        })
    }
}
