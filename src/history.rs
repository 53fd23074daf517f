//! Historical post-filter.
//!
//! Haze and glare score above 0.5 at similar times of day across multiple
//! days. For each exact bounding box this filter raises the effective
//! threshold based on the box's max score at the same time of day over the
//! last few days: halfway between the historical max and 1, and never less
//! than 0.2 above the historical max. Boxes that already scored near 0.8
//! historically can therefore never clear.

use anyhow::{Context, Result};
use chrono::{Local, TimeZone, Timelike};

use crate::db::Database;
use crate::segmenter::{HistStats, Segment};

/// History window: same camera, 3.5 days to 12 hours before the detection.
/// Closer rows would share today's correlated noise; older rows are stale.
const HISTORY_OLDEST_SECS: i64 = 60 * 60 * 84; // 3.5 days
const HISTORY_NEWEST_SECS: i64 = 60 * 60 * 12;

/// Time-of-day band matching comparable lighting conditions.
const TIME_OF_DAY_BAND_SECS: i64 = 60 * 60;

pub fn seconds_in_day(timestamp: i64) -> Result<i64> {
    let dt = Local
        .timestamp_opt(timestamp, 0)
        .single()
        .context("timestamp out of range")?;
    Ok(i64::from(dt.num_seconds_from_midnight()))
}

pub fn threshold_for(historical_max: f64) -> f64 {
    ((historical_max + 1.0) / 2.0).max(historical_max + 0.2)
}

/// Select at most one vetted fire candidate from segments sorted by
/// descending score. Returns the highest-scoring segment that clears its
/// box's historical threshold, with history stats attached when the box has
/// any. A box with no history clears outright and carries no stats.
pub fn post_filter(
    db: &Database,
    camera_id: &str,
    timestamp: i64,
    segments: &[Segment],
) -> Result<Option<Segment>> {
    // segments are sorted, so skip all work if the max score is below 0.5
    match segments.first() {
        Some(top) if top.score >= 0.5 => {}
        _ => return Ok(None),
    }

    let sid = seconds_in_day(timestamp)?;
    let history = db.history_for(
        camera_id,
        timestamp - HISTORY_OLDEST_SECS,
        timestamp - HISTORY_NEWEST_SECS,
        sid - TIME_OF_DAY_BAND_SECS,
        sid + TIME_OF_DAY_BAND_SECS,
    )?;

    let mut best: Option<Segment> = None;
    let mut best_score = 0.0;
    for segment in segments {
        if segment.score < 0.5 {
            // sorted input: nothing below this point can qualify
            break;
        }
        let row = history
            .iter()
            .find(|r| segment.matches(r.min_x, r.min_y, r.max_x, r.max_y));
        let (clears, hist) = match row {
            Some(row) => (
                segment.score > threshold_for(row.max_score),
                Some(HistStats {
                    avg: row.avg_score,
                    max: row.max_score,
                    samples: row.samples,
                }),
            ),
            None => (true, None),
        };
        if clears && segment.score > best_score {
            best_score = segment.score;
            let mut chosen = segment.clone();
            chosen.hist = hist;
            best = Some(chosen);
        }
    }
    Ok(best)
}
