//! Funnel step resolution: per-user journeys against an ordered step list

use chrono::{NaiveDate, NaiveDateTime};

use crate::data::{Device, Event, EventTable, Source};

/// An ordered list of canonical funnel step names. Progression is always
/// measured against this ordering, never against raw event order.
#[derive(Debug, Clone)]
pub struct FunnelDefinition {
    steps: Vec<String>,
}

impl FunnelDefinition {
    /// Build a funnel definition, rejecting empty or duplicated step lists
    pub fn new(steps: Vec<String>) -> crate::Result<Self> {
        if steps.is_empty() {
            anyhow::bail!("funnel definition must contain at least one step");
        }
        for (i, step) in steps.iter().enumerate() {
            if step.is_empty() {
                anyhow::bail!("funnel step names must not be empty");
            }
            if steps[..i].contains(step) {
                anyhow::bail!("duplicate funnel step '{}'", step);
            }
        }
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Index of a step name in the funnel ordering, if it is a defined step
    pub fn index_of(&self, event: &str) -> Option<usize> {
        self.steps.iter().position(|s| s == event)
    }
}

/// Derived per-user view of funnel progression
#[derive(Debug, Clone)]
pub struct UserJourney {
    pub user_id: String,
    /// First-occurrence timestamp of each defined step, aligned with the
    /// funnel ordering
    pub first_seen: Vec<Option<NaiveDateTime>>,
    /// Highest step index reached under the monotonic-timestamp policy;
    /// None when step 0 is missing or the chain breaks immediately
    pub furthest_step_index: Option<usize>,
    /// Total deduplicated events for the user, recognized or not
    pub event_count: usize,
    /// Attributes of the user's first recorded event; segments partition
    /// users by these
    pub source: Source,
    pub device: Device,
    pub first_event: NaiveDateTime,
}

impl UserJourney {
    /// Whether the user performed at least one recognized funnel step
    pub fn is_classified(&self) -> bool {
        self.first_seen.iter().any(|s| s.is_some())
    }

    /// Calendar date of the user's first recorded event
    pub fn first_event_date(&self) -> NaiveDate {
        self.first_event.date()
    }

    /// Whether the journey reached the given step index
    pub fn reached(&self, step: usize) -> bool {
        self.furthest_step_index.map_or(false, |f| f >= step)
    }
}

/// All journeys for one analysis run, sorted by user_id
#[derive(Debug)]
pub struct JourneySet {
    pub journeys: Vec<UserJourney>,
}

impl JourneySet {
    /// Journeys with at least one recognized funnel step; only these enter
    /// conversion-rate denominators
    pub fn classified(&self) -> impl Iterator<Item = &UserJourney> {
        self.journeys.iter().filter(|j| j.is_classified())
    }

    /// Users with zero recognized funnel events
    pub fn unclassified_count(&self) -> usize {
        self.journeys.iter().filter(|j| !j.is_classified()).count()
    }
}

/// Resolve one journey per user from a clean event table
///
/// For each user the earliest timestamp of every defined step is recorded,
/// and the furthest step index is the longest prefix of the funnel whose
/// first-occurrence timestamps are monotonically non-decreasing. Equal
/// timestamps count as satisfied, not violated.
pub fn resolve_journeys(table: &EventTable, funnel: &FunnelDefinition) -> JourneySet {
    let mut journeys = Vec::new();

    for user_events in table.per_user() {
        journeys.push(resolve_user(user_events, funnel));
    }

    JourneySet { journeys }
}

fn resolve_user(events: &[Event], funnel: &FunnelDefinition) -> UserJourney {
    let mut first_seen: Vec<Option<NaiveDateTime>> = vec![None; funnel.len()];

    for event in events {
        if let Some(idx) = funnel.index_of(&event.event) {
            let slot = &mut first_seen[idx];
            match slot {
                Some(existing) if *existing <= event.timestamp => {}
                _ => *slot = Some(event.timestamp),
            }
        }
    }

    let furthest_step_index = furthest_monotonic(&first_seen);
    let first = &events[0];

    UserJourney {
        user_id: first.user_id.clone(),
        first_seen,
        furthest_step_index,
        event_count: events.len(),
        source: first.source,
        device: first.device,
        first_event: first.timestamp,
    }
}

/// Longest prefix of steps present with non-decreasing first timestamps
fn furthest_monotonic(first_seen: &[Option<NaiveDateTime>]) -> Option<usize> {
    let mut furthest = None;
    let mut prev: Option<NaiveDateTime> = None;

    for (i, seen) in first_seen.iter().enumerate() {
        match seen {
            Some(ts) if prev.map_or(true, |p| *ts >= p) => {
                furthest = Some(i);
                prev = Some(*ts);
            }
            _ => break,
        }
    }

    furthest
}
