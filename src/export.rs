//! Flat-file exports and report assembly: CSV tables, a JSON metrics dump,
//! a plain-text summary, and an HTML dashboard page.
//!
//! This stage is pure output. A failed artifact is recorded and skipped;
//! it never invalidates the metrics or aborts the remaining artifacts.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;
use tracing::warn;

use crate::cohort::{CohortMatrix, CohortReport};
use crate::config::AnalysisConfig;
use crate::data::EventTable;
use crate::error::ArtifactFailure;
use crate::funnel::JourneySet;
use crate::metrics::{daily_event_counts, DailyCounts, MetricsSummary, SegmentComparison};
use crate::viz;

/// Stable output substructure under the configured output directory
#[derive(Debug, Clone)]
pub struct OutputLayout {
    pub charts: PathBuf,
    pub data_exports: PathBuf,
    pub reports: PathBuf,
}

impl OutputLayout {
    /// Create `charts/`, `data_exports/`, and `reports/` under the base
    /// directory
    pub fn create(base: &Path) -> crate::Result<Self> {
        let layout = Self {
            charts: base.join("charts"),
            data_exports: base.join("data_exports"),
            reports: base.join("reports"),
        };
        fs::create_dir_all(&layout.charts)?;
        fs::create_dir_all(&layout.data_exports)?;
        fs::create_dir_all(&layout.reports)?;
        Ok(layout)
    }
}

/// Everything the output stage consumes, by reference
pub struct ExportInputs<'a> {
    pub config: &'a AnalysisConfig,
    pub table: &'a EventTable,
    pub journeys: &'a JourneySet,
    pub summary: &'a MetricsSummary,
    pub comparisons: &'a [SegmentComparison],
    pub cohorts: &'a CohortReport,
}

/// Write every artifact, collecting per-artifact failures instead of
/// aborting. Returns the list of artifacts that could not be written.
pub fn export_all(inputs: &ExportInputs<'_>) -> Vec<ArtifactFailure> {
    let mut failures = Vec::new();

    let layout = match OutputLayout::create(&inputs.config.output_dir) {
        Ok(layout) => layout,
        Err(e) => {
            failures.push(ArtifactFailure::new("output directories", e));
            return failures;
        }
    };

    let daily = daily_event_counts(inputs.table, &inputs.config.funnel);

    let run = |artifact: &str, result: crate::Result<()>, failures: &mut Vec<ArtifactFailure>| {
        if let Err(e) = result {
            warn!(artifact, error = %e, "failed to write artifact");
            failures.push(ArtifactFailure::new(artifact, e));
        }
    };

    // charts/
    run(
        "charts/funnel_chart",
        viz::funnel_stage_chart(
            inputs.summary,
            &layout.charts.join("funnel_chart.png"),
            &layout.charts.join("funnel_chart.svg"),
        ),
        &mut failures,
    );
    run(
        "charts/conversion_rates",
        viz::conversion_rate_chart(
            inputs.summary,
            &layout.charts.join("conversion_rates.png"),
            &layout.charts.join("conversion_rates.svg"),
        ),
        &mut failures,
    );
    run(
        "charts/daily_trend",
        viz::daily_trend_chart(
            &daily,
            &layout.charts.join("daily_trend.png"),
            &layout.charts.join("daily_trend.svg"),
        ),
        &mut failures,
    );
    run(
        "charts/retention_heatmap",
        viz::retention_heatmap(
            &inputs.cohorts.activity,
            inputs.cohorts.period.label(),
            &layout.charts.join("retention_heatmap.png"),
            &layout.charts.join("retention_heatmap.svg"),
        ),
        &mut failures,
    );

    // data_exports/
    run(
        "data_exports/funnel_metrics.csv",
        write_funnel_metrics_csv(inputs.summary, &layout.data_exports.join("funnel_metrics.csv")),
        &mut failures,
    );
    run(
        "data_exports/source_performance.csv",
        write_segment_csv(
            &inputs.summary.by_source,
            &layout.data_exports.join("source_performance.csv"),
        ),
        &mut failures,
    );
    run(
        "data_exports/device_performance.csv",
        write_segment_csv(
            &inputs.summary.by_device,
            &layout.data_exports.join("device_performance.csv"),
        ),
        &mut failures,
    );
    run(
        "data_exports/daily_events.csv",
        write_daily_events_csv(&daily, &layout.data_exports.join("daily_events.csv")),
        &mut failures,
    );
    run(
        "data_exports/journey_length_distribution.csv",
        write_journey_lengths_csv(
            inputs.journeys,
            &layout
                .data_exports
                .join("journey_length_distribution.csv"),
        ),
        &mut failures,
    );
    run(
        "data_exports/cohort_retention.csv",
        write_cohort_csv(
            inputs.cohorts,
            &layout.data_exports.join("cohort_retention.csv"),
        ),
        &mut failures,
    );
    run(
        "data_exports/segment_significance.csv",
        write_significance_csv(
            inputs.comparisons,
            &layout.data_exports.join("segment_significance.csv"),
        ),
        &mut failures,
    );
    run(
        "data_exports/metrics.json",
        write_metrics_json(
            inputs.summary,
            inputs.comparisons,
            &layout.data_exports.join("metrics.json"),
        ),
        &mut failures,
    );

    // reports/
    run(
        "reports/analysis_summary.txt",
        write_summary_report(inputs, &layout.reports.join("analysis_summary.txt")),
        &mut failures,
    );
    run(
        "reports/dashboard.html",
        write_dashboard_html(inputs.summary, &layout.reports.join("dashboard.html")),
        &mut failures,
    );

    failures
}

fn fmt_opt(rate: Option<f64>) -> String {
    match rate {
        Some(r) => format!("{:.6}", r),
        None => String::new(),
    }
}

/// One MetricsSummary row per (dimension, segment, step)
pub fn write_funnel_metrics_csv(summary: &MetricsSummary, path: &Path) -> crate::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record([
        "dimension",
        "segment",
        "step",
        "reached",
        "conversion_rate",
        "step_conversion",
        "drop_off",
    ])?;

    let all = std::iter::once(&summary.overall)
        .chain(summary.by_source.iter())
        .chain(summary.by_device.iter())
        .chain(summary.by_day.iter());
    for metrics in all {
        for step in &metrics.steps {
            wtr.write_record([
                metrics.dimension.clone(),
                metrics.segment.clone(),
                step.step.clone(),
                step.reached.to_string(),
                fmt_opt(step.conversion_rate),
                fmt_opt(step.step_conversion),
                step.drop_off.to_string(),
            ])?;
        }
    }
    wtr.flush()?;
    Ok(())
}

fn write_segment_csv(segments: &[crate::metrics::FunnelMetrics], path: &Path) -> crate::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["segment", "entered", "converted", "conversion_rate"])?;
    for metrics in segments {
        let last = metrics.steps.len().saturating_sub(1);
        wtr.write_record([
            metrics.segment.clone(),
            metrics.entered.to_string(),
            metrics.reached(last).to_string(),
            fmt_opt(metrics.overall_conversion()),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_daily_events_csv(daily: &DailyCounts, path: &Path) -> crate::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    let mut header = vec!["date".to_string()];
    header.extend(daily.steps.iter().cloned());
    wtr.write_record(&header)?;

    for (day_idx, date) in daily.dates.iter().enumerate() {
        let mut row = vec![date.to_string()];
        for step_counts in &daily.counts {
            row.push(step_counts[day_idx].to_string());
        }
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Distribution of events-per-user across all users
fn write_journey_lengths_csv(journeys: &JourneySet, path: &Path) -> crate::Result<()> {
    let mut distribution = std::collections::BTreeMap::new();
    for journey in &journeys.journeys {
        *distribution.entry(journey.event_count).or_insert(0u64) += 1;
    }

    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["journey_length", "users"])?;
    for (length, users) in distribution {
        wtr.write_record([&length.to_string(), &users.to_string()])?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_cohort_csv(report: &CohortReport, path: &Path) -> crate::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    let periods = report.activity.periods();
    let mut header = vec![
        "matrix".to_string(),
        "cohort_date".to_string(),
        "cohort_size".to_string(),
        "low_confidence".to_string(),
    ];
    for p in 0..periods {
        header.push(format!("p{}", p));
    }
    wtr.write_record(&header)?;

    let matrices = std::iter::once(&report.activity).chain(report.by_step.iter());
    for matrix in matrices {
        write_matrix_rows(&mut wtr, matrix)?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_matrix_rows<W: std::io::Write>(
    wtr: &mut csv::Writer<W>,
    matrix: &CohortMatrix,
) -> crate::Result<()> {
    for (row, date) in matrix.cohort_dates.iter().enumerate() {
        let mut record = vec![
            matrix.label().to_string(),
            date.to_string(),
            matrix.cohort_sizes[row].to_string(),
            matrix.low_confidence[row].to_string(),
        ];
        for col in 0..matrix.periods() {
            record.push(format!("{:.6}", matrix.retention[[row, col]]));
        }
        wtr.write_record(&record)?;
    }
    Ok(())
}

fn write_significance_csv(comparisons: &[SegmentComparison], path: &Path) -> crate::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record([
        "dimension",
        "segment_a",
        "segment_b",
        "step",
        "samples_a",
        "samples_b",
        "rate_a",
        "rate_b",
        "p_value",
        "significant",
    ])?;
    for cmp in comparisons {
        wtr.write_record([
            cmp.dimension.clone(),
            cmp.segment_a.clone(),
            cmp.segment_b.clone(),
            cmp.step.clone(),
            cmp.samples_a.to_string(),
            cmp.samples_b.to_string(),
            fmt_opt(cmp.rate_a),
            fmt_opt(cmp.rate_b),
            fmt_opt(cmp.p_value),
            cmp.significant.map(|s| s.to_string()).unwrap_or_default(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct JsonDump<'a> {
    summary: &'a MetricsSummary,
    comparisons: &'a [SegmentComparison],
}

fn write_metrics_json(
    summary: &MetricsSummary,
    comparisons: &[SegmentComparison],
    path: &Path,
) -> crate::Result<()> {
    let file = fs::File::create(path)?;
    serde_json::to_writer_pretty(
        file,
        &JsonDump {
            summary,
            comparisons,
        },
    )?;
    Ok(())
}

/// Plain-text summary report
fn write_summary_report(inputs: &ExportInputs<'_>, path: &Path) -> crate::Result<()> {
    let summary = inputs.summary;
    let mut report = Vec::new();

    report.push("=".repeat(60));
    report.push("USER FUNNEL ANALYSIS REPORT".to_string());
    report.push("=".repeat(60));
    report.push(format!(
        "Generated on: {}",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    ));
    report.push(format!("Total events: {}", summary.total_events));
    report.push(format!("Unique users: {}", summary.total_users));
    report.push(format!(
        "Unclassified users: {}",
        summary.unclassified_users
    ));
    report.push(format!("Dropped rows: {}", summary.dropped_rows));
    report.push(String::new());

    report.push("FUNNEL PERFORMANCE:".to_string());
    report.push("-".repeat(30));
    for step in &summary.overall.steps {
        let rate = step
            .conversion_rate
            .map(|r| format!("{:>5.1}%", r * 100.0))
            .unwrap_or_else(|| "  n/a".to_string());
        report.push(format!(
            "{:<20} {:>8} users ({})",
            step.step, step.reached, rate
        ));
    }
    report.push(String::new());

    report.push("TOP PERFORMING SOURCES:".to_string());
    report.push("-".repeat(30));
    let mut sources: Vec<_> = summary
        .by_source
        .iter()
        .filter_map(|m| m.overall_conversion().map(|r| (m.segment.clone(), r)))
        .collect();
    sources.sort_by(|a, b| b.1.total_cmp(&a.1));
    for (segment, rate) in sources.iter().take(3) {
        report.push(format!("{:<15} {:>5.1}% conversion", segment, rate * 100.0));
    }
    report.push(String::new());

    report.push("DEVICE PERFORMANCE:".to_string());
    report.push("-".repeat(30));
    for metrics in &summary.by_device {
        let rate = metrics
            .overall_conversion()
            .map(|r| format!("{:>5.1}%", r * 100.0))
            .unwrap_or_else(|| "  n/a".to_string());
        report.push(format!("{:<15} {} conversion", metrics.segment, rate));
    }
    report.push(String::new());

    report.push("COHORTS:".to_string());
    report.push("-".repeat(30));
    report.push(format!(
        "{} {} cohorts tracked over {} periods",
        inputs.cohorts.activity.cohort_dates.len(),
        inputs.cohorts.period.label(),
        inputs.cohorts.activity.periods(),
    ));
    let low = inputs
        .cohorts
        .activity
        .low_confidence
        .iter()
        .filter(|l| **l)
        .count();
    if low > 0 {
        report.push(format!("{} cohorts flagged low-confidence", low));
    }
    report.push(String::new());

    report.push("KEY INSIGHTS:".to_string());
    report.push("-".repeat(30));
    if let Some((step, loss)) = summary.biggest_drop_off() {
        report.push(format!(
            "- Biggest drop-off at: {} ({:.1}% step-rate loss)",
            step,
            loss * 100.0
        ));
    }
    if let Some(rate) = summary.overall.overall_conversion() {
        report.push(format!("- Overall conversion rate: {:.1}%", rate * 100.0));
    }
    if let Some(last) = summary.overall.steps.last() {
        report.push(format!(
            "- {} users completed the full funnel",
            last.reached
        ));
    }

    fs::write(path, report.join("\n"))?;
    Ok(())
}

/// Static HTML dashboard embedding the SVG charts and the metrics table
fn write_dashboard_html(summary: &MetricsSummary, path: &Path) -> crate::Result<()> {
    let mut rows = String::new();
    for step in &summary.overall.steps {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            step.step,
            step.reached,
            step.conversion_rate
                .map(|r| format!("{:.1}%", r * 100.0))
                .unwrap_or_else(|| "n/a".to_string()),
            step.step_conversion
                .map(|r| format!("{:.1}%", r * 100.0))
                .unwrap_or_else(|| "n/a".to_string()),
        ));
    }

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Funnel Analysis Dashboard</title>
<style>
body {{ font-family: sans-serif; margin: 2em; }}
table {{ border-collapse: collapse; }}
td, th {{ border: 1px solid #ccc; padding: 6px 12px; }}
img {{ max-width: 100%; margin-bottom: 2em; }}
</style>
</head>
<body>
<h1>User Funnel Analysis Dashboard</h1>
<h2>Funnel Overview</h2>
<img src="../charts/funnel_chart.svg" alt="Funnel chart">
<h2>Conversion Rates</h2>
<img src="../charts/conversion_rates.svg" alt="Conversion rates">
<h2>Daily Trend</h2>
<img src="../charts/daily_trend.svg" alt="Daily trend">
<h2>Cohort Retention</h2>
<img src="../charts/retention_heatmap.svg" alt="Retention heatmap">
<h2>Funnel Metrics</h2>
<table>
<tr><th>Step</th><th>Users</th><th>Overall Rate</th><th>Step Rate</th></tr>
{rows}</table>
</body>
</html>
"#
    );

    fs::write(path, html)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohort::{build_cohorts, CohortPeriod};
    use crate::data::{Device, Event, Source};
    use crate::funnel::{resolve_journeys, FunnelDefinition};
    use crate::metrics::{compute_metrics, pairwise_comparisons};
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn build_inputs() -> (EventTable, FunnelDefinition) {
        let mk = |user: &str, name: &str, day: u32, hour: u32, source: Source| Event {
            user_id: user.to_string(),
            event: name.to_string(),
            timestamp: NaiveDate::from_ymd_opt(2024, 1, day)
                .unwrap()
                .and_hms_opt(hour, 0, 0)
                .unwrap(),
            source,
            device: Device::Desktop,
        };
        let mut events = vec![
            mk("u1", "visit", 1, 8, Source::Organic),
            mk("u1", "signup", 1, 9, Source::Organic),
            mk("u2", "visit", 2, 8, Source::Paid),
            mk("u3", "visit", 3, 8, Source::Organic),
        ];
        events.sort_by(|a, b| a.user_id.cmp(&b.user_id).then(a.timestamp.cmp(&b.timestamp)));
        let table = EventTable {
            events,
            dropped_rows: 0,
            deduped_rows: 0,
        };
        let funnel = FunnelDefinition::new(vec!["visit".into(), "signup".into()]).unwrap();
        (table, funnel)
    }

    fn config(output_dir: std::path::PathBuf, funnel: FunnelDefinition) -> AnalysisConfig {
        AnalysisConfig {
            input: "unused.csv".to_string(),
            funnel,
            cohort_period: CohortPeriod::Daily,
            cohort_horizon: 4,
            alpha: 0.05,
            min_sample: 30,
            min_cohort_size: 2,
            output_dir,
        }
    }

    #[test]
    fn test_export_all_writes_expected_layout() {
        let (table, funnel) = build_inputs();
        let journeys = resolve_journeys(&table, &funnel);
        let summary = compute_metrics(&journeys, &funnel, 4, 0, 0);
        let comparisons = pairwise_comparisons(&summary.by_source, funnel.len() - 1, 0.05, 30);
        let cohorts = build_cohorts(&table, &journeys, &funnel, CohortPeriod::Daily, 4, 2);

        let dir = tempdir().unwrap();
        let cfg = config(dir.path().to_path_buf(), funnel);
        let failures = export_all(&ExportInputs {
            config: &cfg,
            table: &table,
            journeys: &journeys,
            summary: &summary,
            comparisons: &comparisons,
            cohorts: &cohorts,
        });

        assert!(failures.is_empty(), "failures: {:?}", failures);
        for artifact in [
            "charts/funnel_chart.png",
            "charts/funnel_chart.svg",
            "charts/retention_heatmap.png",
            "data_exports/funnel_metrics.csv",
            "data_exports/source_performance.csv",
            "data_exports/daily_events.csv",
            "data_exports/journey_length_distribution.csv",
            "data_exports/cohort_retention.csv",
            "data_exports/segment_significance.csv",
            "data_exports/metrics.json",
            "reports/analysis_summary.txt",
            "reports/dashboard.html",
        ] {
            assert!(
                dir.path().join(artifact).exists(),
                "missing artifact {}",
                artifact
            );
        }
    }

    #[test]
    fn test_csv_exports_are_deterministic() {
        let (table, funnel) = build_inputs();
        let journeys = resolve_journeys(&table, &funnel);
        let summary = compute_metrics(&journeys, &funnel, 4, 0, 0);

        let dir = tempdir().unwrap();
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        write_funnel_metrics_csv(&summary, &a).unwrap();
        write_funnel_metrics_csv(&summary, &b).unwrap();

        assert_eq!(fs::read(a).unwrap(), fs::read(b).unwrap());
    }

    #[test]
    fn test_unwritable_artifact_is_reported_not_fatal() {
        let (table, funnel) = build_inputs();
        let journeys = resolve_journeys(&table, &funnel);
        let summary = compute_metrics(&journeys, &funnel, 4, 0, 0);
        let comparisons = pairwise_comparisons(&summary.by_source, funnel.len() - 1, 0.05, 30);
        let cohorts = build_cohorts(&table, &journeys, &funnel, CohortPeriod::Daily, 4, 2);

        // a file where the output directory should be
        let dir = tempdir().unwrap();
        let base = dir.path().join("occupied");
        fs::write(&base, b"not a directory").unwrap();

        let cfg = config(base, funnel);
        let failures = export_all(&ExportInputs {
            config: &cfg,
            table: &table,
            journeys: &journeys,
            summary: &summary,
            comparisons: &comparisons,
            cohorts: &cohorts,
        });
        assert!(!failures.is_empty());
    }
}
