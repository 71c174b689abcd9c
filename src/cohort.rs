//! Cohort retention: bucket users by first-seen date and track progression
//! over elapsed periods

use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, Duration, NaiveDate};
use clap::ValueEnum;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::data::EventTable;
use crate::funnel::{FunnelDefinition, JourneySet, UserJourney};

/// Elapsed-period granularity for cohort bucketing. Exposed as a
/// configuration option; the default is weekly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CohortPeriod {
    Daily,
    Weekly,
    Monthly,
}

impl CohortPeriod {
    /// Truncate a date to the start of its period
    pub fn truncate(&self, date: NaiveDate) -> NaiveDate {
        match self {
            CohortPeriod::Daily => date,
            CohortPeriod::Weekly => {
                date - Duration::days(date.weekday().num_days_from_monday() as i64)
            }
            CohortPeriod::Monthly => {
                NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date)
            }
        }
    }

    /// Whole periods elapsed between a cohort start (already truncated)
    /// and a later date
    pub fn elapsed(&self, cohort_start: NaiveDate, date: NaiveDate) -> i64 {
        match self {
            CohortPeriod::Daily => (date - cohort_start).num_days(),
            CohortPeriod::Weekly => (self.truncate(date) - cohort_start).num_days() / 7,
            CohortPeriod::Monthly => {
                let a = cohort_start.year() * 12 + cohort_start.month0() as i32;
                let b = date.year() * 12 + date.month0() as i32;
                (b - a) as i64
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CohortPeriod::Daily => "daily",
            CohortPeriod::Weekly => "weekly",
            CohortPeriod::Monthly => "monthly",
        }
    }
}

/// A cohort_date x elapsed_period retention matrix
///
/// Each row is one cohort (users sharing a first-seen period); each column
/// is an elapsed period 0..=horizon. Values are fractions of cohort
/// members, always in [0, 1].
#[derive(Debug)]
pub struct CohortMatrix {
    /// Funnel step this matrix tracks; None for the any-activity matrix
    pub step: Option<String>,
    pub cohort_dates: Vec<NaiveDate>,
    pub cohort_sizes: Vec<u64>,
    /// Cohorts below the minimum member count are computed but flagged
    pub low_confidence: Vec<bool>,
    pub retention: Array2<f64>,
}

impl CohortMatrix {
    pub fn periods(&self) -> usize {
        self.retention.ncols()
    }

    pub fn label(&self) -> &str {
        self.step.as_deref().unwrap_or("any_activity")
    }
}

/// Output of the cohort stage: one activity matrix plus one matrix per
/// funnel step
#[derive(Debug)]
pub struct CohortReport {
    pub period: CohortPeriod,
    pub activity: CohortMatrix,
    pub by_step: Vec<CohortMatrix>,
}

/// Build cohort retention matrices
///
/// Users are bucketed by the period start of their first event. The
/// activity matrix reports the fraction of each cohort with any event in
/// elapsed period p; the per-step matrices report the fraction that had
/// reached the step by the end of elapsed period p (cumulative).
pub fn build_cohorts(
    table: &EventTable,
    journeys: &JourneySet,
    funnel: &FunnelDefinition,
    period: CohortPeriod,
    horizon: usize,
    min_cohort_size: u64,
) -> CohortReport {
    // Cohort membership, keyed by cohort start date
    let mut cohorts: BTreeMap<NaiveDate, Vec<&UserJourney>> = BTreeMap::new();
    let mut cohort_of: HashMap<&str, NaiveDate> = HashMap::new();
    for journey in &journeys.journeys {
        let start = period.truncate(journey.first_event_date());
        cohorts.entry(start).or_default().push(journey);
        cohort_of.insert(journey.user_id.as_str(), start);
    }

    // Distinct users active per (cohort, elapsed period), from raw events
    let mut active: HashMap<(NaiveDate, usize), u64> = HashMap::new();
    for user_events in table.per_user() {
        let user = user_events[0].user_id.as_str();
        let start = match cohort_of.get(user) {
            Some(start) => *start,
            None => continue,
        };
        let mut seen = vec![false; horizon + 1];
        for event in user_events {
            let p = period.elapsed(start, event.date());
            if (0..=horizon as i64).contains(&p) {
                seen[p as usize] = true;
            }
        }
        for (p, was_active) in seen.iter().enumerate() {
            if *was_active {
                *active.entry((start, p)).or_insert(0) += 1;
            }
        }
    }

    let cohort_dates: Vec<NaiveDate> = cohorts.keys().copied().collect();
    let cohort_sizes: Vec<u64> = cohorts.values().map(|m| m.len() as u64).collect();
    let low_confidence: Vec<bool> = cohort_sizes.iter().map(|&s| s < min_cohort_size).collect();

    let mut activity: Array2<f64> = Array2::zeros((cohort_dates.len(), horizon + 1));
    for (row, start) in cohort_dates.iter().enumerate() {
        let size = cohort_sizes[row] as f64;
        for p in 0..=horizon {
            let count = active.get(&(*start, p)).copied().unwrap_or(0) as f64;
            activity[[row, p]] = count / size;
        }
    }

    let by_step = funnel
        .steps()
        .iter()
        .enumerate()
        .map(|(step_index, step)| {
            let mut retention: Array2<f64> = Array2::zeros((cohort_dates.len(), horizon + 1));
            for (row, (start, members)) in cohorts.iter().enumerate() {
                let size = members.len() as f64;
                for member in members {
                    if !member.reached(step_index) {
                        continue;
                    }
                    let reached_at = match member.first_seen[step_index] {
                        Some(ts) => ts.date(),
                        None => continue,
                    };
                    let p = period.elapsed(*start, reached_at);
                    if p < 0 {
                        continue;
                    }
                    // cumulative: reaching in period p counts for p..=horizon
                    for q in (p as usize).min(horizon + 1)..=horizon {
                        retention[[row, q]] += 1.0;
                    }
                }
                for q in 0..=horizon {
                    retention[[row, q]] /= size;
                }
            }
            CohortMatrix {
                step: Some(step.clone()),
                cohort_dates: cohort_dates.clone(),
                cohort_sizes: cohort_sizes.clone(),
                low_confidence: low_confidence.clone(),
                retention,
            }
        })
        .collect();

    CohortReport {
        period,
        activity: CohortMatrix {
            step: None,
            cohort_dates,
            cohort_sizes,
            low_confidence,
            retention: activity,
        },
        by_step,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Device, Event, Source};
    use crate::funnel::resolve_journeys;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn event(user: &str, name: &str, y: i32, m: u32, d: u32) -> Event {
        Event {
            user_id: user.to_string(),
            event: name.to_string(),
            timestamp: date(y, m, d).and_hms_opt(12, 0, 0).unwrap(),
            source: Source::Organic,
            device: Device::Desktop,
        }
    }

    fn table(mut events: Vec<Event>) -> EventTable {
        events.sort_by(|a, b| a.user_id.cmp(&b.user_id).then(a.timestamp.cmp(&b.timestamp)));
        EventTable {
            events,
            dropped_rows: 0,
            deduped_rows: 0,
        }
    }

    fn funnel() -> FunnelDefinition {
        FunnelDefinition::new(vec!["visit".into(), "signup".into()]).unwrap()
    }

    #[test]
    fn test_period_truncation() {
        let d = date(2024, 1, 18); // a Thursday
        assert_eq!(CohortPeriod::Daily.truncate(d), d);
        assert_eq!(CohortPeriod::Weekly.truncate(d), date(2024, 1, 15));
        assert_eq!(CohortPeriod::Monthly.truncate(d), date(2024, 1, 1));
    }

    #[test]
    fn test_elapsed_periods() {
        let start = date(2024, 1, 1);
        assert_eq!(CohortPeriod::Daily.elapsed(start, date(2024, 1, 4)), 3);
        assert_eq!(CohortPeriod::Weekly.elapsed(start, date(2024, 1, 9)), 1);
        assert_eq!(CohortPeriod::Monthly.elapsed(start, date(2024, 3, 15)), 2);
    }

    #[test]
    fn test_activity_matrix_day_zero_is_full() {
        let t = table(vec![
            event("u1", "visit", 2024, 1, 1),
            event("u2", "visit", 2024, 1, 1),
            event("u2", "signup", 2024, 1, 3),
        ]);
        let f = funnel();
        let journeys = resolve_journeys(&t, &f);
        let report = build_cohorts(&t, &journeys, &f, CohortPeriod::Daily, 4, 1);

        assert_eq!(report.activity.cohort_dates, vec![date(2024, 1, 1)]);
        assert_eq!(report.activity.cohort_sizes, vec![2]);
        // everyone is active in their first period
        assert!((report.activity.retention[[0, 0]] - 1.0).abs() < 1e-9);
        // only u2 came back on day 2
        assert!((report.activity.retention[[0, 2]] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_step_retention_is_cumulative_and_bounded() {
        let t = table(vec![
            event("u1", "visit", 2024, 1, 1),
            event("u1", "signup", 2024, 1, 2),
            event("u2", "visit", 2024, 1, 1),
        ]);
        let f = funnel();
        let journeys = resolve_journeys(&t, &f);
        let report = build_cohorts(&t, &journeys, &f, CohortPeriod::Daily, 3, 1);

        let signup = &report.by_step[1];
        // u1 reaches signup on day 1; cumulative from then on
        assert!((signup.retention[[0, 0]] - 0.0).abs() < 1e-9);
        assert!((signup.retention[[0, 1]] - 0.5).abs() < 1e-9);
        assert!((signup.retention[[0, 3]] - 0.5).abs() < 1e-9);

        for matrix in report.by_step.iter().chain(std::iter::once(&report.activity)) {
            for &v in matrix.retention.iter() {
                assert!((0.0..=1.0).contains(&v));
            }
        }
    }

    #[test]
    fn test_small_cohorts_flagged_not_suppressed() {
        let t = table(vec![
            event("u1", "visit", 2024, 1, 1),
            event("u2", "visit", 2024, 2, 1),
            event("u3", "visit", 2024, 2, 1),
        ]);
        let f = funnel();
        let journeys = resolve_journeys(&t, &f);
        let report = build_cohorts(&t, &journeys, &f, CohortPeriod::Monthly, 2, 2);

        assert_eq!(report.activity.cohort_dates.len(), 2);
        assert_eq!(report.activity.low_confidence, vec![true, false]);
    }

    #[test]
    fn test_unclassified_users_still_counted_in_cohort() {
        let t = table(vec![
            event("u1", "visit", 2024, 1, 1),
            event("u2", "newsletter", 2024, 1, 1),
        ]);
        let f = funnel();
        let journeys = resolve_journeys(&t, &f);
        let report = build_cohorts(&t, &journeys, &f, CohortPeriod::Weekly, 1, 1);

        assert_eq!(report.activity.cohort_sizes, vec![2]);
        // only u1 reached the visit step
        assert!((report.by_step[0].retention[[0, 0]] - 0.5).abs() < 1e-9);
    }
}
