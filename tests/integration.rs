//! Integration tests for FunnelForge

use funnelforge::cohort::{build_cohorts, CohortPeriod};
use funnelforge::export::{export_all, ExportInputs};
use funnelforge::metrics::{compute_metrics, pairwise_comparisons};
use funnelforge::{load_events, resolve_journeys, AnalysisConfig, FunnelDefinition};
use std::io::Write;
use tempfile::{tempdir, NamedTempFile};

/// Create a test CSV with the three-user reference scenario:
/// U1 completes visit,signup,purchase; U2 stops after signup; U3 only
/// visits.
fn create_reference_csv() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "user_id,event,timestamp,source,device").unwrap();

    writeln!(file, "U1,visit,2024-01-01T08:00:00,organic,desktop").unwrap();
    writeln!(file, "U1,signup,2024-01-01T09:00:00,organic,desktop").unwrap();
    writeln!(file, "U1,purchase,2024-01-02T10:00:00,organic,desktop").unwrap();

    writeln!(file, "U2,visit,2024-01-01T10:00:00,paid,mobile").unwrap();
    writeln!(file, "U2,signup,2024-01-01T11:30:00,paid,mobile").unwrap();

    writeln!(file, "U3,visit,2024-01-03T09:00:00,social,tablet").unwrap();

    file
}

fn reference_funnel() -> FunnelDefinition {
    FunnelDefinition::new(vec![
        "visit".to_string(),
        "signup".to_string(),
        "purchase".to_string(),
    ])
    .unwrap()
}

fn config(output_dir: std::path::PathBuf) -> AnalysisConfig {
    AnalysisConfig {
        input: "unused.csv".to_string(),
        funnel: reference_funnel(),
        cohort_period: CohortPeriod::Daily,
        cohort_horizon: 6,
        alpha: 0.05,
        min_sample: 30,
        min_cohort_size: 2,
        output_dir,
    }
}

#[test]
fn test_reference_scenario_end_to_end() {
    let file = create_reference_csv();
    let funnel = reference_funnel();

    let table = load_events(file.path().to_str().unwrap()).unwrap();
    assert_eq!(table.events.len(), 6);
    assert_eq!(table.unique_users(), 3);

    let journeys = resolve_journeys(&table, &funnel);
    let summary = compute_metrics(&journeys, &funnel, 6, 0, 0);

    let reached: Vec<u64> = summary.overall.steps.iter().map(|s| s.reached).collect();
    assert_eq!(reached, vec![3, 2, 1]);

    let rates: Vec<f64> = summary
        .overall
        .steps
        .iter()
        .map(|s| s.conversion_rate.unwrap())
        .collect();
    assert!((rates[0] - 1.0).abs() < 1e-9);
    assert!((rates[1] - 2.0 / 3.0).abs() < 1e-3);
    assert!((rates[2] - 1.0 / 3.0).abs() < 1e-3);

    let drops: Vec<u64> = summary.overall.steps[1..]
        .iter()
        .map(|s| s.drop_off)
        .collect();
    assert_eq!(drops, vec![1, 1]);
}

#[test]
fn test_unparseable_rows_do_not_discard_user() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "user_id,event,timestamp,source,device").unwrap();
    writeln!(file, "U1,visit,2024-01-01T08:00:00,organic,desktop").unwrap();
    writeln!(file, "U1,signup,when-pigs-fly,organic,desktop").unwrap();
    writeln!(file, "U1,purchase,2024-01-01T12:00:00,organic,desktop").unwrap();

    let funnel = reference_funnel();
    let table = load_events(file.path().to_str().unwrap()).unwrap();
    assert_eq!(table.dropped_rows, 1);
    assert_eq!(table.events.len(), 2);

    let journeys = resolve_journeys(&table, &funnel);
    let journey = &journeys.journeys[0];
    // valid rows for the same user still contribute, but the funnel chain
    // breaks without the signup evidence
    assert_eq!(journey.event_count, 2);
    assert_eq!(journey.furthest_step_index, Some(0));
}

#[test]
fn test_partition_consistency_across_dimensions() {
    let file = create_reference_csv();
    let funnel = reference_funnel();
    let table = load_events(file.path().to_str().unwrap()).unwrap();
    let journeys = resolve_journeys(&table, &funnel);
    let summary = compute_metrics(&journeys, &funnel, 6, 0, 0);

    for segments in [&summary.by_source, &summary.by_device, &summary.by_day] {
        for i in 0..funnel.len() {
            let total: u64 = segments.iter().map(|m| m.reached(i)).sum();
            assert_eq!(total, summary.overall.reached(i));
        }
    }
}

#[test]
fn test_small_segments_yield_null_significance() {
    let file = create_reference_csv();
    let funnel = reference_funnel();
    let table = load_events(file.path().to_str().unwrap()).unwrap();
    let journeys = resolve_journeys(&table, &funnel);
    let summary = compute_metrics(&journeys, &funnel, 6, 0, 0);

    let comparisons = pairwise_comparisons(&summary.by_source, funnel.len() - 1, 0.05, 30);
    assert!(!comparisons.is_empty());
    for cmp in &comparisons {
        assert!(cmp.p_value.is_none());
        assert!(cmp.significant.is_none());
    }
}

#[test]
fn test_cohort_matrix_values_bounded() {
    let file = create_reference_csv();
    let funnel = reference_funnel();
    let table = load_events(file.path().to_str().unwrap()).unwrap();
    let journeys = resolve_journeys(&table, &funnel);
    let report = build_cohorts(&table, &journeys, &funnel, CohortPeriod::Daily, 6, 2);

    for matrix in report.by_step.iter().chain(std::iter::once(&report.activity)) {
        for &value in matrix.retention.iter() {
            assert!((0.0..=1.0).contains(&value));
        }
    }
}

#[test]
fn test_pipeline_is_idempotent() {
    let file = create_reference_csv();
    let funnel = reference_funnel();
    let table = load_events(file.path().to_str().unwrap()).unwrap();
    let journeys = resolve_journeys(&table, &funnel);
    let summary = compute_metrics(&journeys, &funnel, 6, 0, 0);
    let comparisons = pairwise_comparisons(&summary.by_source, funnel.len() - 1, 0.05, 30);
    let cohorts = build_cohorts(&table, &journeys, &funnel, CohortPeriod::Daily, 6, 2);

    let dir_a = tempdir().unwrap();
    let dir_b = tempdir().unwrap();
    for dir in [&dir_a, &dir_b] {
        let cfg = config(dir.path().to_path_buf());
        let failures = export_all(&ExportInputs {
            config: &cfg,
            table: &table,
            journeys: &journeys,
            summary: &summary,
            comparisons: &comparisons,
            cohorts: &cohorts,
        });
        assert!(failures.is_empty(), "failures: {:?}", failures);
    }

    for csv_name in [
        "funnel_metrics.csv",
        "source_performance.csv",
        "device_performance.csv",
        "daily_events.csv",
        "journey_length_distribution.csv",
        "cohort_retention.csv",
        "segment_significance.csv",
    ] {
        let a = std::fs::read(dir_a.path().join("data_exports").join(csv_name)).unwrap();
        let b = std::fs::read(dir_b.path().join("data_exports").join(csv_name)).unwrap();
        assert_eq!(a, b, "{} differs between identical runs", csv_name);
    }
}

#[test]
fn test_generated_data_flows_through_pipeline() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("sample.csv");
    let funnel = reference_funnel();

    funnelforge::generate::generate_sample_csv(input.to_str().unwrap(), &funnel, 200, 42).unwrap();

    let table = load_events(input.to_str().unwrap()).unwrap();
    assert_eq!(table.unique_users(), 200);

    let journeys = resolve_journeys(&table, &funnel);
    let summary = compute_metrics(&journeys, &funnel, table.events.len() as u64, 0, 0);

    // every generated user performs the entry step
    assert_eq!(summary.overall.entered, 200);

    // funnel monotonicity
    let mut prev = u64::MAX;
    for step in &summary.overall.steps {
        assert!(step.reached <= prev);
        prev = step.reached;
    }

    // with 200 users per segment split across five sources, some
    // comparisons may clear the minimum sample size; those that do carry
    // a p-value in [0, 1]
    let comparisons = pairwise_comparisons(&summary.by_source, funnel.len() - 1, 0.05, 30);
    for cmp in &comparisons {
        if let Some(p) = cmp.p_value {
            assert!((0.0..=1.0).contains(&p));
        }
    }
}

#[test]
fn test_missing_column_aborts_before_analysis() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "user_id,event,timestamp").unwrap();
    writeln!(file, "U1,visit,2024-01-01T08:00:00").unwrap();

    assert!(load_events(file.path().to_str().unwrap()).is_err());
}
