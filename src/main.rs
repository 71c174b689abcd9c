//! FunnelForge: conversion-funnel analytics CLI over CSV event logs
//!
//! This is the main entrypoint that orchestrates loading, journey
//! resolution, metric aggregation, cohort building, and artifact export.

use anyhow::Result;
use clap::Parser;
use funnelforge::metrics::pairwise_comparisons;
use funnelforge::{
    build_cohorts, compute_metrics, export, generate, load_events, resolve_journeys, viz,
    AnalysisConfig, Args,
};
use std::time::Instant;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "funnelforge=info".into()),
        )
        .init();

    let args = Args::parse();

    if args.verbose {
        println!("FunnelForge - Conversion Funnel Analytics");
        println!("=========================================\n");
    }

    let config = args.to_config()?;

    if let Some(n_users) = args.generate {
        run_generate_mode(&args, &config, n_users)?;
    } else {
        run_full_pipeline(&args, &config)?;
    }

    Ok(())
}

/// Write a synthetic sample CSV instead of analyzing
fn run_generate_mode(args: &Args, config: &AnalysisConfig, n_users: usize) -> Result<()> {
    println!("=== Sample Data Generation ===");
    println!("Users: {}, seed: {}", n_users, args.seed);

    let start_time = Instant::now();
    let rows = generate::generate_sample_csv(&config.input, &config.funnel, n_users, args.seed)?;
    let elapsed = start_time.elapsed();

    println!("\n✓ Wrote {} event rows to {}", rows, config.input);
    println!("  Processing time: {:.2}s", elapsed.as_secs_f64());
    Ok(())
}

/// Run the full analysis pipeline
fn run_full_pipeline(args: &Args, config: &AnalysisConfig) -> Result<()> {
    println!("=== Funnel Analysis Pipeline ===\n");

    let start_time = Instant::now();

    // Step 1: Load and clean the event table
    if args.verbose {
        println!("Step 1: Loading events");
        println!("  Input file: {}", config.input);
    }

    let load_start = Instant::now();
    let table = load_events(&config.input)?;
    let load_time = load_start.elapsed();

    println!(
        "✓ Data loaded: {} events, {} users",
        table.events.len(),
        table.unique_users()
    );
    if table.dropped_rows > 0 {
        println!("  Dropped rows: {}", table.dropped_rows);
    }
    if args.verbose {
        println!("  Deduplicated rows: {}", table.deduped_rows);
        println!("  Loading time: {:.2}s", load_time.as_secs_f64());
    }

    // Step 2: Resolve journeys and aggregate metrics
    if args.verbose {
        println!("\nStep 2: Resolving funnel journeys");
        println!("  Funnel steps: {:?}", config.funnel.steps());
    }

    let metrics_start = Instant::now();
    let journeys = resolve_journeys(&table, &config.funnel);
    let summary = compute_metrics(
        &journeys,
        &config.funnel,
        table.events.len() as u64,
        table.dropped_rows as u64,
        table.deduped_rows as u64,
    );

    let last_step = config.funnel.len() - 1;
    let mut comparisons =
        pairwise_comparisons(&summary.by_source, last_step, config.alpha, config.min_sample);
    comparisons.extend(pairwise_comparisons(
        &summary.by_device,
        last_step,
        config.alpha,
        config.min_sample,
    ));
    let metrics_time = metrics_start.elapsed();

    println!("✓ Metrics computed");
    if args.verbose {
        println!("  Segment comparisons: {}", comparisons.len());
        println!("  Aggregation time: {:.2}s", metrics_time.as_secs_f64());
    }

    // Step 3: Cohort retention
    if args.verbose {
        println!("\nStep 3: Building cohorts");
        println!(
            "  Period: {}, horizon: {}",
            config.cohort_period.label(),
            config.cohort_horizon
        );
    }

    let cohort_start = Instant::now();
    let cohorts = build_cohorts(
        &table,
        &journeys,
        &config.funnel,
        config.cohort_period,
        config.cohort_horizon,
        config.min_cohort_size,
    );
    let cohort_time = cohort_start.elapsed();

    println!("✓ Cohorts built: {}", cohorts.activity.cohort_dates.len());
    if args.verbose {
        println!("  Cohort time: {:.2}s", cohort_time.as_secs_f64());
    }

    viz::print_funnel_statistics(&summary);

    // Step 4: Charts, exports, reports
    if args.verbose {
        println!("\nStep 4: Writing artifacts");
        println!("  Output directory: {}", config.output_dir.display());
    }

    let export_start = Instant::now();
    let failures = export::export_all(&export::ExportInputs {
        config,
        table: &table,
        journeys: &journeys,
        summary: &summary,
        comparisons: &comparisons,
        cohorts: &cohorts,
    });
    let export_time = export_start.elapsed();

    if failures.is_empty() {
        println!("\n✓ All artifacts written to {}", config.output_dir.display());
    } else {
        println!(
            "\n! {} artifact(s) could not be written:",
            failures.len()
        );
        for failure in &failures {
            println!("  - {}: {}", failure.artifact, failure.error);
        }
    }
    if args.verbose {
        println!("  Export time: {:.2}s", export_time.as_secs_f64());
    }

    let total_time = start_time.elapsed();
    println!("\n=== Pipeline Complete ===");
    println!("Total processing time: {:.2}s", total_time.as_secs_f64());
    println!("Charts saved under: {}/charts/", config.output_dir.display());
    println!(
        "Data exports under: {}/data_exports/",
        config.output_dir.display()
    );
    println!("Reports under: {}/reports/", config.output_dir.display());

    Ok(())
}
