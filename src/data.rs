//! Event loading and cleaning: CSV rows into a typed in-memory event table

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::SchemaError;

/// Columns the input CSV must carry. Extra columns are tolerated and the
/// order does not matter.
pub const REQUIRED_COLUMNS: [&str; 5] = ["user_id", "event", "timestamp", "source", "device"];

/// Traffic source a user arrived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Organic,
    Paid,
    Social,
    Email,
    Direct,
}

impl Source {
    /// All variants in their canonical reporting order
    pub const ALL: [Source; 5] = [
        Source::Organic,
        Source::Paid,
        Source::Social,
        Source::Email,
        Source::Direct,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Organic => "organic",
            Source::Paid => "paid",
            Source::Social => "social",
            Source::Email => "email",
            Source::Direct => "direct",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "organic" => Ok(Source::Organic),
            "paid" => Ok(Source::Paid),
            "social" => Ok(Source::Social),
            "email" => Ok(Source::Email),
            "direct" => Ok(Source::Direct),
            other => Err(format!("unknown source '{}'", other)),
        }
    }
}

/// Device type an event was recorded on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Desktop,
    Mobile,
    Tablet,
}

impl Device {
    /// All variants in their canonical reporting order
    pub const ALL: [Device; 3] = [Device::Desktop, Device::Mobile, Device::Tablet];

    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Desktop => "desktop",
            Device::Mobile => "mobile",
            Device::Tablet => "tablet",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "desktop" => Ok(Device::Desktop),
            "mobile" => Ok(Device::Mobile),
            "tablet" => Ok(Device::Tablet),
            other => Err(format!("unknown device '{}'", other)),
        }
    }
}

/// A single validated event row. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub user_id: String,
    pub event: String,
    pub timestamp: NaiveDateTime,
    pub source: Source,
    pub device: Device,
}

impl Event {
    /// Calendar date of the event
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }
}

/// Clean in-memory event table plus counts of rows that did not survive
/// cleaning. Events are sorted by (user_id, timestamp) and duplicate
/// (user_id, event) pairs are collapsed to their earliest occurrence.
#[derive(Debug)]
pub struct EventTable {
    pub events: Vec<Event>,
    /// Rows dropped for unparseable timestamps or unknown enum values
    pub dropped_rows: usize,
    /// Rows collapsed as duplicate (user_id, event) pairs
    pub deduped_rows: usize,
}

impl EventTable {
    /// Number of distinct users in the table
    pub fn unique_users(&self) -> usize {
        self.per_user().count()
    }

    /// Iterate events grouped by user. The table is sorted by user_id, so
    /// each yielded slice is one user's events in timestamp order.
    pub fn per_user(&self) -> PerUser<'_> {
        PerUser {
            events: &self.events,
            pos: 0,
        }
    }
}

/// Iterator over contiguous per-user event slices
pub struct PerUser<'a> {
    events: &'a [Event],
    pos: usize,
}

impl<'a> Iterator for PerUser<'a> {
    type Item = &'a [Event];

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.events.len() {
            return None;
        }
        let start = self.pos;
        let user = &self.events[start].user_id;
        let mut end = start + 1;
        while end < self.events.len() && &self.events[end].user_id == user {
            end += 1;
        }
        self.pos = end;
        Some(&self.events[start..end])
    }
}

/// Raw CSV row before validation; all fields read as strings so that a
/// single bad value drops the row instead of failing the whole load.
#[derive(Debug, Deserialize)]
struct RawRecord {
    user_id: String,
    event: String,
    timestamp: String,
    source: String,
    device: String,
}

/// Load a CSV of user events into a clean, typed event table
///
/// Validates that all required columns are present (fatal if not), parses
/// timestamps and enum columns (rows that fail are dropped and counted),
/// sorts by (user_id, timestamp) and collapses duplicate (user_id, event)
/// pairs to the earliest occurrence.
pub fn load_events(path: &str) -> crate::Result<EventTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| SchemaError::Unreadable {
            path: path.to_string(),
            source,
        })?;

    let headers = rdr.headers()?.clone();
    for col in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == col) {
            return Err(SchemaError::MissingColumn(col).into());
        }
    }

    let mut events = Vec::new();
    let mut dropped = 0usize;

    for (row, result) in rdr.deserialize::<RawRecord>().enumerate() {
        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                dropped += 1;
                warn!(row = row + 2, error = %e, "dropping malformed row");
                continue;
            }
        };

        let timestamp = match parse_timestamp(&raw.timestamp) {
            Some(ts) => ts,
            None => {
                dropped += 1;
                warn!(row = row + 2, value = %raw.timestamp, "dropping row with unparseable timestamp");
                continue;
            }
        };

        let source = match raw.source.parse::<Source>() {
            Ok(s) => s,
            Err(e) => {
                dropped += 1;
                warn!(row = row + 2, error = %e, "dropping row");
                continue;
            }
        };

        let device = match raw.device.parse::<Device>() {
            Ok(d) => d,
            Err(e) => {
                dropped += 1;
                warn!(row = row + 2, error = %e, "dropping row");
                continue;
            }
        };

        events.push(Event {
            user_id: raw.user_id,
            event: raw.event,
            timestamp,
            source,
            device,
        });
    }

    // Sort by user and timestamp, then collapse repeated (user, event)
    // pairs to their first occurrence; journey resolution assumes this
    // cleaning has happened.
    events.sort_by(|a, b| {
        a.user_id
            .cmp(&b.user_id)
            .then(a.timestamp.cmp(&b.timestamp))
            .then(a.event.cmp(&b.event))
    });

    let before = events.len();
    let mut seen: HashSet<(String, String)> = HashSet::new();
    events.retain(|e| seen.insert((e.user_id.clone(), e.event.clone())));
    let deduped = before - events.len();

    if events.is_empty() {
        return Err(SchemaError::Empty.into());
    }

    Ok(EventTable {
        events,
        dropped_rows: dropped,
        deduped_rows: deduped,
    })
}

/// Parse a timestamp in RFC 3339 or a small set of unambiguous formats
fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
