//! Travel time percentiles and Level Of Travel Time Reliability (LOTTR).
//!
//! Percentiles are taken per (segment, time of day) group with the
//! nearest-rank method, so each value is one of the observed travel times.

use std::collections::HashMap;
use tracing::debug;

use crate::bucket::TimeOfDay;
use crate::error::{LottrError, Result};
use crate::segment::SegmentId;
use crate::types::{
    BucketedObservation, InputLayout, Reliability, ReliabilityObservation, ReliabilityTable,
};

/// Validated pair of percentiles, `low` for the denominator and `high` for
/// the numerator of the LOTTR ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PercentilePair {
    low: u8,
    high: u8,
}

impl PercentilePair {
    /// Pair used for the all-vehicle feeds.
    pub const ALL_VEHICLES: PercentilePair = PercentilePair { low: 50, high: 80 };
    /// Pair used for the truck-only feed.
    pub const TRUCKS: PercentilePair = PercentilePair { low: 50, high: 95 };

    /// Fails if either percentile is outside `0..=100`.
    pub fn new(q1: i32, q2: i32) -> Result<Self> {
        Ok(PercentilePair {
            low: Self::check(q1)?,
            high: Self::check(q2)?,
        })
    }

    fn check(value: i32) -> Result<u8> {
        u8::try_from(value)
            .ok()
            .filter(|q| *q <= 100)
            .ok_or(LottrError::PercentileOutOfRange { value })
    }

    pub fn low(&self) -> u8 {
        self.low
    }

    pub fn high(&self) -> u8 {
        self.high
    }

    /// Output column holding the low percentile, e.g. `TT50P`.
    pub fn low_column(&self) -> String {
        format!("TT{}P", self.low)
    }

    pub fn high_column(&self) -> String {
        format!("TT{}P", self.high)
    }
}

pub type GroupKey = (SegmentId, TimeOfDay);

#[derive(Debug, Clone, PartialEq)]
pub struct PercentileRecord {
    pub segment: SegmentId,
    pub time_of_day: TimeOfDay,
    pub low: f32,
    pub high: f32,
}

/// Index of the `q`-th percentile in a sorted slice of length `n`:
/// `q * (n - 1) / 100` rounded to the nearest integer, ties to even.
/// `None` when `n == 0`.
fn nearest_rank_index(n: usize, q: u8) -> Option<usize> {
    let scaled = q as usize * n.checked_sub(1)?;
    let (index, remainder) = (scaled / 100, scaled % 100);
    let round_up = remainder > 50 || (remainder == 50 && index % 2 == 1);
    Some(if round_up { index + 1 } else { index })
}

/// Nearest-rank percentile of `values`. Sorts the slice in place.
/// Returns `None` for an empty slice.
pub fn nearest_rank(values: &mut [f32], q: u8) -> Option<f32> {
    let index = nearest_rank_index(values.len(), q)?;
    values.sort_by(f32::total_cmp);
    Some(values[index])
}

/// `high / low`, or `None` when either side is missing or `low` is zero.
pub fn lottr(low: Option<f32>, high: Option<f32>) -> Option<f32> {
    match (low, high) {
        (Some(low), Some(high)) if low != 0.0 => Some(high / low).filter(|r| r.is_finite()),
        _ => None,
    }
}

/// Computes both percentiles for every (segment, time of day) group that has
/// at least one travel time. Rows with a missing travel time are skipped.
pub fn percentile_table(
    rows: &[BucketedObservation],
    pair: PercentilePair,
) -> HashMap<GroupKey, PercentileRecord> {
    let mut groups: HashMap<GroupKey, Vec<f32>> = HashMap::new();

    for row in rows {
        if let Some(tt) = row.observation.travel_time {
            groups
                .entry((row.observation.segment.clone(), row.bucket.time_of_day))
                .or_default()
                .push(tt);
        }
    }

    groups
        .into_iter()
        .filter_map(|((segment, time_of_day), mut values)| {
            let low = nearest_rank(&mut values, pair.low)?;
            let high = nearest_rank(&mut values, pair.high)?;
            Some((
                (segment.clone(), time_of_day),
                PercentileRecord {
                    segment,
                    time_of_day,
                    low,
                    high,
                },
            ))
        })
        .collect()
}

/// Joins group percentiles back onto every row and computes LOTTR.
///
/// Rows whose group has no travel time at all keep missing percentiles.
/// `layout` describes the input columns the rows were read with.
pub fn add_lottr(
    layout: InputLayout,
    rows: Vec<BucketedObservation>,
    pair: PercentilePair,
) -> ReliabilityTable {
    let table = percentile_table(&rows, pair);
    debug!(
        rows = rows.len(),
        groups = table.len(),
        q1 = pair.low,
        q2 = pair.high,
        "Percentile groups computed"
    );

    let groups = table.len();
    let rows = rows
        .into_iter()
        .map(|row| {
            let key = (row.observation.segment.clone(), row.bucket.time_of_day);
            let (low, high) = table
                .get(&key)
                .map_or((None, None), |rec| (Some(rec.low), Some(rec.high)));
            ReliabilityObservation {
                observation: row.observation,
                bucket: row.bucket,
                reliability: Reliability {
                    low,
                    high,
                    lottr: lottr(low, high),
                },
            }
        })
        .collect();

    ReliabilityTable {
        layout,
        percentiles: pair,
        rows,
        groups,
    }
}
