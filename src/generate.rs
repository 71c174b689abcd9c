//! Synthetic sample-data generation for demos and testing
//!
//! Simulates user journeys through the configured funnel with decreasing
//! continuation probabilities, writing a CSV compatible with the loader.

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::data::{Device, Source, REQUIRED_COLUMNS};
use crate::funnel::FunnelDefinition;

/// Probability of continuing from each step to the next; steps beyond the
/// list fall back to the last entry.
const CONTINUATION: [f64; 3] = [0.65, 0.35, 0.30];

const START_DATE: (i32, u32, u32) = (2024, 1, 1);
const START_SPREAD_DAYS: i64 = 90;

/// Write a synthetic event CSV for `n_users` users to `path`
///
/// Every user performs the first funnel step; each subsequent step is
/// reached with a fixed continuation probability. Output is deterministic
/// for a given seed.
pub fn generate_sample_csv(
    path: &str,
    funnel: &FunnelDefinition,
    n_users: usize,
    seed: u64,
) -> crate::Result<u64> {
    if n_users == 0 {
        anyhow::bail!("number of users to generate must be positive");
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(REQUIRED_COLUMNS)?;

    let (y, m, d) = START_DATE;
    let start = NaiveDate::from_ymd_opt(y, m, d)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .ok_or_else(|| anyhow::anyhow!("invalid generator start date"))?;

    let mut rows = 0u64;
    for user in 1..=n_users {
        let user_id = format!("user_{:05}", user);
        let source = *Source::ALL.choose(&mut rng).unwrap_or(&Source::Organic);
        let device = *Device::ALL.choose(&mut rng).unwrap_or(&Device::Desktop);

        let mut ts = start
            + Duration::days(rng.gen_range(0..START_SPREAD_DAYS))
            + Duration::minutes(rng.gen_range(0..24 * 60));

        for (i, step) in funnel.steps().iter().enumerate() {
            if i > 0 {
                let p = CONTINUATION
                    .get(i - 1)
                    .copied()
                    .unwrap_or(*CONTINUATION.last().unwrap_or(&0.3));
                if rng.gen::<f64>() >= p {
                    break;
                }
                // later steps happen progressively further apart
                ts += match i {
                    1 => Duration::minutes(rng.gen_range(1..120)),
                    2 => Duration::hours(rng.gen_range(1..72)),
                    _ => Duration::days(rng.gen_range(1..21)),
                };
            }
            wtr.write_record([
                user_id.clone(),
                step.clone(),
                ts.format("%Y-%m-%dT%H:%M:%S").to_string(),
                source.as_str().to_string(),
                device.as_str().to_string(),
            ])?;
            rows += 1;
        }
    }

    wtr.flush()?;
    Ok(rows)
}
