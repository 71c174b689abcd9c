//! Conversion metrics: per-step counts, rates, drop-off, segment
//! breakdowns, and two-proportion significance testing

use std::collections::BTreeMap;

use serde::Serialize;

use crate::data::{Device, Source};
use crate::funnel::{FunnelDefinition, JourneySet, UserJourney};

/// Metrics for a single funnel step within one segment
#[derive(Debug, Clone, Serialize)]
pub struct StepMetrics {
    pub step: String,
    /// Journeys whose furthest step index is at least this step
    pub reached: u64,
    /// reached / reached at step 0; None when the entry step is empty
    pub conversion_rate: Option<f64>,
    /// reached / reached at the previous step; None when that is empty
    pub step_conversion: Option<f64>,
    /// Users lost between the previous step and this one (0 at step 0)
    pub drop_off: u64,
}

/// Full funnel metrics for one segment value ("all" for the unsegmented
/// view)
#[derive(Debug, Clone, Serialize)]
pub struct FunnelMetrics {
    pub dimension: String,
    pub segment: String,
    pub steps: Vec<StepMetrics>,
    /// Users entering the funnel in this segment (reached at step 0)
    pub entered: u64,
}

impl FunnelMetrics {
    pub fn reached(&self, step: usize) -> u64 {
        self.steps.get(step).map_or(0, |s| s.reached)
    }

    /// Conversion rate to the final funnel step
    pub fn overall_conversion(&self) -> Option<f64> {
        self.steps.last().and_then(|s| s.conversion_rate)
    }
}

/// Aggregated output of the metrics stage; write-only artifact consumed by
/// the renderers and exporters
#[derive(Debug, Serialize)]
pub struct MetricsSummary {
    pub overall: FunnelMetrics,
    pub by_source: Vec<FunnelMetrics>,
    pub by_device: Vec<FunnelMetrics>,
    pub by_day: Vec<FunnelMetrics>,
    pub total_users: u64,
    pub total_events: u64,
    pub unclassified_users: u64,
    pub dropped_rows: u64,
    pub deduped_rows: u64,
}

impl MetricsSummary {
    /// The step with the largest step-to-step conversion loss, if any
    pub fn biggest_drop_off(&self) -> Option<(&str, f64)> {
        let steps = &self.overall.steps;
        let mut worst: Option<(&str, f64)> = None;
        for pair in steps.windows(2) {
            let (prev, cur) = (&pair[0], &pair[1]);
            if let (Some(a), Some(b)) = (prev.step_conversion, cur.step_conversion) {
                let loss = a - b;
                if worst.map_or(true, |(_, w)| loss > w) {
                    worst = Some((cur.step.as_str(), loss));
                }
            }
        }
        worst
    }
}

/// Compute the full metrics summary: the unsegmented funnel plus one
/// breakdown per segment dimension (source, device, first-seen day).
///
/// A user belongs to the segment of their first event, so each dimension
/// partitions the classified users and per-segment reached counts sum to
/// the unsegmented counts.
pub fn compute_metrics(
    journeys: &JourneySet,
    funnel: &FunnelDefinition,
    total_events: u64,
    dropped_rows: u64,
    deduped_rows: u64,
) -> MetricsSummary {
    let classified: Vec<&UserJourney> = journeys.classified().collect();

    let overall = funnel_metrics("all", "all", classified.iter().copied(), funnel);

    let mut by_source = Vec::new();
    for source in Source::ALL {
        let members: Vec<&UserJourney> = classified
            .iter()
            .copied()
            .filter(|j| j.source == source)
            .collect();
        if !members.is_empty() {
            by_source.push(funnel_metrics(
                "source",
                source.as_str(),
                members.into_iter(),
                funnel,
            ));
        }
    }

    let mut by_device = Vec::new();
    for device in Device::ALL {
        let members: Vec<&UserJourney> = classified
            .iter()
            .copied()
            .filter(|j| j.device == device)
            .collect();
        if !members.is_empty() {
            by_device.push(funnel_metrics(
                "device",
                device.as_str(),
                members.into_iter(),
                funnel,
            ));
        }
    }

    // BTreeMap keyed by ISO date string keeps day segments chronological
    let mut days: BTreeMap<String, Vec<&UserJourney>> = BTreeMap::new();
    for journey in classified.iter().copied() {
        days.entry(journey.first_event_date().to_string())
            .or_default()
            .push(journey);
    }
    let by_day = days
        .into_iter()
        .map(|(day, members)| funnel_metrics("day", &day, members.into_iter(), funnel))
        .collect();

    MetricsSummary {
        overall,
        by_source,
        by_device,
        by_day,
        total_users: journeys.journeys.len() as u64,
        total_events,
        unclassified_users: journeys.unclassified_count() as u64,
        dropped_rows,
        deduped_rows,
    }
}

fn funnel_metrics<'a>(
    dimension: &str,
    segment: &str,
    journeys: impl Iterator<Item = &'a UserJourney>,
    funnel: &FunnelDefinition,
) -> FunnelMetrics {
    let mut reached = vec![0u64; funnel.len()];
    for journey in journeys {
        if let Some(furthest) = journey.furthest_step_index {
            for count in reached.iter_mut().take(furthest + 1) {
                *count += 1;
            }
        }
    }

    let entered = reached[0];
    let mut steps = Vec::with_capacity(funnel.len());
    for (i, step) in funnel.steps().iter().enumerate() {
        let conversion_rate = ratio(reached[i], entered);
        let (step_conversion, drop_off) = if i == 0 {
            (conversion_rate, 0)
        } else {
            (ratio(reached[i], reached[i - 1]), reached[i - 1] - reached[i])
        };
        steps.push(StepMetrics {
            step: step.clone(),
            reached: reached[i],
            conversion_rate,
            step_conversion,
            drop_off,
        });
    }

    FunnelMetrics {
        dimension: dimension.to_string(),
        segment: segment.to_string(),
        steps,
        entered,
    }
}

fn ratio(numerator: u64, denominator: u64) -> Option<f64> {
    if denominator == 0 {
        None
    } else {
        Some(numerator as f64 / denominator as f64)
    }
}

/// Per-day counts of funnel-step events, for trend charts and exports
#[derive(Debug, Serialize)]
pub struct DailyCounts {
    pub dates: Vec<chrono::NaiveDate>,
    pub steps: Vec<String>,
    /// counts[step_index][date_index]
    pub counts: Vec<Vec<u64>>,
}

/// Count occurrences of each funnel step per calendar day
pub fn daily_event_counts(
    table: &crate::data::EventTable,
    funnel: &FunnelDefinition,
) -> DailyCounts {
    let mut days: BTreeMap<chrono::NaiveDate, Vec<u64>> = BTreeMap::new();
    for event in &table.events {
        if let Some(idx) = funnel.index_of(&event.event) {
            days.entry(event.date()).or_insert_with(|| vec![0; funnel.len()])[idx] += 1;
        }
    }

    let dates: Vec<chrono::NaiveDate> = days.keys().copied().collect();
    let counts = (0..funnel.len())
        .map(|step| days.values().map(|row| row[step]).collect())
        .collect();

    DailyCounts {
        dates,
        steps: funnel.steps().to_vec(),
        counts,
    }
}

/// Outcome of comparing conversion to one step between two segments
#[derive(Debug, Clone, Serialize)]
pub struct SegmentComparison {
    pub dimension: String,
    pub segment_a: String,
    pub segment_b: String,
    pub step: String,
    pub samples_a: u64,
    pub samples_b: u64,
    pub rate_a: Option<f64>,
    pub rate_b: Option<f64>,
    /// None when either segment is below the minimum sample size
    pub p_value: Option<f64>,
    pub significant: Option<bool>,
}

/// Compare conversion to a given step between two segments with a
/// two-proportion z-test. Returns a null significance result (p_value and
/// flag both None) when either segment's entry count is below
/// `min_sample`, rather than producing unreliable statistics.
pub fn compare_segments(
    a: &FunnelMetrics,
    b: &FunnelMetrics,
    step_index: usize,
    alpha: f64,
    min_sample: u64,
) -> SegmentComparison {
    let step = a
        .steps
        .get(step_index)
        .map(|s| s.step.clone())
        .unwrap_or_default();
    let (x1, n1) = (a.reached(step_index), a.entered);
    let (x2, n2) = (b.reached(step_index), b.entered);

    let (p_value, significant) = if n1 < min_sample || n2 < min_sample {
        (None, None)
    } else {
        let p = two_proportion_z_test(x1, n1, x2, n2);
        (Some(p), Some(p < alpha))
    };

    SegmentComparison {
        dimension: a.dimension.clone(),
        segment_a: a.segment.clone(),
        segment_b: b.segment.clone(),
        step,
        samples_a: n1,
        samples_b: n2,
        rate_a: ratio(x1, n1),
        rate_b: ratio(x2, n2),
        p_value,
        significant,
    }
}

/// All pairwise comparisons of final-step conversion within one dimension
pub fn pairwise_comparisons(
    segments: &[FunnelMetrics],
    step_index: usize,
    alpha: f64,
    min_sample: u64,
) -> Vec<SegmentComparison> {
    let mut comparisons = Vec::new();
    for i in 0..segments.len() {
        for j in (i + 1)..segments.len() {
            comparisons.push(compare_segments(
                &segments[i],
                &segments[j],
                step_index,
                alpha,
                min_sample,
            ));
        }
    }
    comparisons
}

/// Two-sided p-value for the difference between two proportions
fn two_proportion_z_test(x1: u64, n1: u64, x2: u64, n2: u64) -> f64 {
    if n1 == 0 || n2 == 0 {
        return 1.0;
    }
    let p1 = x1 as f64 / n1 as f64;
    let p2 = x2 as f64 / n2 as f64;
    let pooled = (x1 + x2) as f64 / (n1 + n2) as f64;
    let se = (pooled * (1.0 - pooled) * (1.0 / n1 as f64 + 1.0 / n2 as f64)).sqrt();
    if se == 0.0 {
        return 1.0;
    }
    let z = (p1 - p2).abs() / se;
    // Abramowitz-Stegun polynomial approximation of the normal tail
    let t = 1.0 / (1.0 + 0.2316419 * z);
    let d = 0.3989422804014327;
    let tail = d
        * (-z * z / 2.0).exp()
        * (t * (0.3193815
            + t * (-0.3565638 + t * (1.781478 + t * (-1.821256 + t * 1.330274)))));
    (2.0 * tail).min(1.0)
}
