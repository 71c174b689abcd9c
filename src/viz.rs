//! Chart rendering with Plotters: funnel stages, conversion rates, daily
//! trends, and cohort retention heatmaps. Every chart is written twice,
//! as a PNG and as an SVG.

use std::path::Path;

use plotters::coord::Shift;
use plotters::prelude::*;

use crate::cohort::CohortMatrix;
use crate::metrics::{DailyCounts, MetricsSummary};

/// Color palette cycled across funnel steps
const STEP_COLORS: [RGBColor; 6] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
];

const FUNNEL_SIZE: (u32, u32) = (900, 600);
const CONVERSION_SIZE: (u32, u32) = (1100, 500);
const TREND_SIZE: (u32, u32) = (1000, 550);
const HEATMAP_SIZE: (u32, u32) = (900, 600);

fn step_color(i: usize) -> &'static RGBColor {
    &STEP_COLORS[i % STEP_COLORS.len()]
}

/// Funnel stage bar chart: users reached per step
pub fn funnel_stage_chart(
    summary: &MetricsSummary,
    png_path: &Path,
    svg_path: &Path,
) -> crate::Result<()> {
    let root = BitMapBackend::new(png_path, FUNNEL_SIZE).into_drawing_area();
    draw_funnel_stages(&root, summary)?;
    let root = SVGBackend::new(svg_path, FUNNEL_SIZE).into_drawing_area();
    draw_funnel_stages(&root, summary)?;
    Ok(())
}

fn draw_funnel_stages<DB>(root: &DrawingArea<DB, Shift>, summary: &MetricsSummary) -> crate::Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: std::error::Error + Send + Sync + 'static,
{
    root.fill(&WHITE)?;

    let steps = &summary.overall.steps;
    let max_reached = steps.iter().map(|s| s.reached).max().unwrap_or(0).max(1) as f64;
    let names: Vec<String> = steps.iter().map(|s| s.step.clone()).collect();

    let mut chart = ChartBuilder::on(root)
        .caption("User Conversion Funnel", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(45)
        .y_label_area_size(60)
        .build_cartesian_2d(-0.5f64..steps.len() as f64 - 0.5, 0f64..max_reached * 1.15)?;

    chart
        .configure_mesh()
        .x_desc("Funnel Step")
        .y_desc("Users Reached")
        .x_labels(steps.len())
        .x_label_formatter(&|x| {
            let i = x.round();
            if i >= 0.0 && (i as usize) < names.len() && (x - i).abs() < 0.25 {
                names[i as usize].clone()
            } else {
                String::new()
            }
        })
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    for (i, step) in steps.iter().enumerate() {
        let x = i as f64;
        chart.draw_series(std::iter::once(Rectangle::new(
            [(x - 0.35, 0.0), (x + 0.35, step.reached as f64)],
            step_color(i).filled(),
        )))?;

        let label = match step.conversion_rate {
            Some(rate) => format!("{} ({:.1}%)", step.reached, rate * 100.0),
            None => format!("{}", step.reached),
        };
        chart.draw_series(std::iter::once(Text::new(
            label,
            (x - 0.3, step.reached as f64 + max_reached * 0.03),
            ("sans-serif", 14),
        )))?;
    }

    root.present()?;
    Ok(())
}

/// Side-by-side bars of overall and step-by-step conversion rates
pub fn conversion_rate_chart(
    summary: &MetricsSummary,
    png_path: &Path,
    svg_path: &Path,
) -> crate::Result<()> {
    let root = BitMapBackend::new(png_path, CONVERSION_SIZE).into_drawing_area();
    draw_conversion_rates(&root, summary)?;
    let root = SVGBackend::new(svg_path, CONVERSION_SIZE).into_drawing_area();
    draw_conversion_rates(&root, summary)?;
    Ok(())
}

fn draw_conversion_rates<DB>(
    root: &DrawingArea<DB, Shift>,
    summary: &MetricsSummary,
) -> crate::Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: std::error::Error + Send + Sync + 'static,
{
    root.fill(&WHITE)?;
    let panels = root.split_evenly((1, 2));

    let steps = &summary.overall.steps;
    let names: Vec<String> = steps.iter().map(|s| s.step.clone()).collect();

    let series: [(&str, Vec<Option<f64>>, RGBColor); 2] = [
        (
            "Overall Conversion Rate",
            steps.iter().map(|s| s.conversion_rate).collect(),
            RGBColor(114, 158, 206),
        ),
        (
            "Step-by-Step Conversion Rate",
            steps.iter().map(|s| s.step_conversion).collect(),
            RGBColor(237, 102, 93),
        ),
    ];

    for (panel, (title, rates, color)) in panels.iter().zip(series.iter()) {
        let mut chart = ChartBuilder::on(panel)
            .caption(*title, ("sans-serif", 22))
            .margin(10)
            .x_label_area_size(45)
            .y_label_area_size(50)
            .build_cartesian_2d(-0.5f64..steps.len() as f64 - 0.5, 0f64..110f64)?;

        chart
            .configure_mesh()
            .y_desc("Conversion Rate (%)")
            .x_labels(steps.len())
            .x_label_formatter(&|x| {
                let i = x.round();
                if i >= 0.0 && (i as usize) < names.len() && (x - i).abs() < 0.25 {
                    names[i as usize].clone()
                } else {
                    String::new()
                }
            })
            .axis_desc_style(("sans-serif", 14))
            .draw()?;

        for (i, rate) in rates.iter().enumerate() {
            let pct = match rate {
                Some(r) => r * 100.0,
                None => continue,
            };
            let x = i as f64;
            chart.draw_series(std::iter::once(Rectangle::new(
                [(x - 0.35, 0.0), (x + 0.35, pct)],
                color.filled(),
            )))?;
            chart.draw_series(std::iter::once(Text::new(
                format!("{:.1}%", pct),
                (x - 0.2, pct + 2.0),
                ("sans-serif", 13),
            )))?;
        }
    }

    root.present()?;
    Ok(())
}

/// Daily event trend: one line per funnel step
pub fn daily_trend_chart(
    daily: &DailyCounts,
    png_path: &Path,
    svg_path: &Path,
) -> crate::Result<()> {
    let root = BitMapBackend::new(png_path, TREND_SIZE).into_drawing_area();
    draw_daily_trend(&root, daily)?;
    let root = SVGBackend::new(svg_path, TREND_SIZE).into_drawing_area();
    draw_daily_trend(&root, daily)?;
    Ok(())
}

fn draw_daily_trend<DB>(root: &DrawingArea<DB, Shift>, daily: &DailyCounts) -> crate::Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: std::error::Error + Send + Sync + 'static,
{
    root.fill(&WHITE)?;

    let n_days = daily.dates.len().max(1);
    let max_count = daily
        .counts
        .iter()
        .flat_map(|row| row.iter())
        .copied()
        .max()
        .unwrap_or(0)
        .max(1) as f64;
    let labels: Vec<String> = daily.dates.iter().map(|d| d.to_string()).collect();

    let mut chart = ChartBuilder::on(root)
        .caption("Daily Funnel Events", ("sans-serif", 28))
        .margin(10)
        .x_label_area_size(55)
        .y_label_area_size(55)
        .build_cartesian_2d(0f64..(n_days - 1).max(1) as f64, 0f64..max_count * 1.1)?;

    chart
        .configure_mesh()
        .x_desc("Date")
        .y_desc("Events")
        .x_labels(n_days.min(10))
        .x_label_formatter(&|x| {
            let i = x.round() as usize;
            labels.get(i).cloned().unwrap_or_default()
        })
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    for (step_idx, step_counts) in daily.counts.iter().enumerate() {
        let color = step_color(step_idx);
        chart
            .draw_series(LineSeries::new(
                step_counts
                    .iter()
                    .enumerate()
                    .map(|(day, &count)| (day as f64, count as f64)),
                color.stroke_width(2),
            ))?
            .label(daily.steps[step_idx].clone())
            .legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 18, y)], color.stroke_width(2))
            });
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.85))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

/// Cohort retention heatmap, white-to-blue by retention fraction
pub fn retention_heatmap(
    matrix: &CohortMatrix,
    period_label: &str,
    png_path: &Path,
    svg_path: &Path,
) -> crate::Result<()> {
    let root = BitMapBackend::new(png_path, HEATMAP_SIZE).into_drawing_area();
    draw_retention_heatmap(&root, matrix, period_label)?;
    let root = SVGBackend::new(svg_path, HEATMAP_SIZE).into_drawing_area();
    draw_retention_heatmap(&root, matrix, period_label)?;
    Ok(())
}

fn draw_retention_heatmap<DB>(
    root: &DrawingArea<DB, Shift>,
    matrix: &CohortMatrix,
    period_label: &str,
) -> crate::Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: std::error::Error + Send + Sync + 'static,
{
    root.fill(&WHITE)?;

    let rows = matrix.cohort_dates.len().max(1);
    let cols = matrix.periods().max(1);
    // low-confidence cohorts are marked with an asterisk
    let row_labels: Vec<String> = matrix
        .cohort_dates
        .iter()
        .zip(matrix.low_confidence.iter())
        .map(|(date, low)| {
            if *low {
                format!("{} *", date)
            } else {
                date.to_string()
            }
        })
        .collect();

    let mut chart = ChartBuilder::on(root)
        .caption(
            format!("Cohort Retention ({})", period_label),
            ("sans-serif", 26),
        )
        .margin(10)
        .x_label_area_size(45)
        .y_label_area_size(95)
        .build_cartesian_2d(0f64..cols as f64, 0f64..rows as f64)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .x_desc("Elapsed Period")
        .y_desc("Cohort")
        .x_labels(cols.min(16))
        .y_labels(rows.min(20))
        .x_label_formatter(&|x| format!("P{}", x.floor() as usize))
        .y_label_formatter(&|y| {
            let i = y.floor() as usize;
            row_labels.get(i).cloned().unwrap_or_default()
        })
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    for (row, _) in matrix.cohort_dates.iter().enumerate() {
        for col in 0..matrix.periods() {
            let value = matrix.retention[[row, col]].clamp(0.0, 1.0);
            let shade = RGBColor(
                (255.0 - value * 180.0) as u8,
                (255.0 - value * 120.0) as u8,
                255,
            );
            chart.draw_series(std::iter::once(Rectangle::new(
                [(col as f64, row as f64), (col as f64 + 1.0, row as f64 + 1.0)],
                shade.filled(),
            )))?;
            chart.draw_series(std::iter::once(Text::new(
                format!("{:.0}%", value * 100.0),
                (col as f64 + 0.3, row as f64 + 0.55),
                ("sans-serif", 12),
            )))?;
        }
    }

    root.present()?;
    Ok(())
}

/// Print funnel statistics to console
pub fn print_funnel_statistics(summary: &MetricsSummary) {
    println!("\n=== Funnel Statistics ===");
    println!("Total events: {}", summary.total_events);
    println!("Unique users: {}", summary.total_users);
    println!("Unclassified users: {}", summary.unclassified_users);
    if summary.dropped_rows > 0 {
        println!("Dropped rows: {}", summary.dropped_rows);
    }

    println!("\n  Step                 |  Reached | Overall % | Step %");
    println!("  ---------------------|----------|-----------|--------");
    for step in &summary.overall.steps {
        println!(
            "  {:<20} | {:>8} | {:>9} | {:>6}",
            step.step,
            step.reached,
            fmt_rate(step.conversion_rate),
            fmt_rate(step.step_conversion),
        );
    }

    if let Some((step, loss)) = summary.biggest_drop_off() {
        println!(
            "\nBiggest drop-off at: {} ({:.1}% step-rate loss)",
            step,
            loss * 100.0
        );
    }
    if let Some(rate) = summary.overall.overall_conversion() {
        println!("Overall conversion rate: {:.1}%", rate * 100.0);
    }
}

fn fmt_rate(rate: Option<f64>) -> String {
    match rate {
        Some(r) => format!("{:.1}%", r * 100.0),
        None => "n/a".to_string(),
    }
}
