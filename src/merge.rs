//! Reconciles the truck-only feed with the all-vehicle feed.
//!
//! Both feeds are keyed by (segment, timestamp). The all-vehicle feed is the
//! primary side of a left join: every primary row appears exactly once, and
//! where the truck measurement is missing its speed and travel time are
//! imputed from the primary row and the row is flagged.

use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use tracing::{debug, warn};

use crate::segment::SegmentId;
use crate::types::{
    MergedObservation, MergedTable, Observation, ReliabilityObservation, ReliabilityTable,
    SecondaryFields,
};

type Key = (SegmentId, NaiveDateTime);

/// Indexes `rows` by key, keeping the first row for duplicate keys.
/// Returns the index and the number of duplicates ignored.
fn index_first<T>(
    rows: impl IntoIterator<Item = T>,
    key: impl Fn(&T) -> Key,
) -> (HashMap<Key, T>, usize) {
    let mut index = HashMap::new();
    let mut duplicates = 0;
    for row in rows {
        match index.entry(key(&row)) {
            Entry::Vacant(slot) => {
                slot.insert(row);
            }
            Entry::Occupied(_) => duplicates += 1,
        }
    }
    (index, duplicates)
}

/// Reshapes `secondary` onto the key set of `primary`: one row per primary
/// key, in primary order, carrying the secondary measurement when there is
/// one and empty measurements otherwise. Secondary rows whose key is absent
/// from `primary` are dropped.
pub fn align_to_primary<'a>(
    primary: impl IntoIterator<Item = &'a Observation>,
    secondary: Vec<Observation>,
) -> Vec<Observation> {
    let total = secondary.len();
    let (index, duplicates) = index_first(secondary, Observation::key);
    if duplicates > 0 {
        warn!(duplicates, "Duplicate keys in secondary feed, keeping first occurrence");
    }

    let mut matched = 0usize;
    let aligned: Vec<Observation> = primary
        .into_iter()
        .map(|p| match index.get(&p.key()) {
            Some(s) => {
                matched += 1;
                s.clone()
            }
            None => Observation {
                segment: p.segment.clone(),
                timestamp: p.timestamp,
                speed: None,
                travel_time: None,
                extra: Box::default(),
            },
        })
        .collect();

    debug!(
        secondary_rows = total,
        matched,
        aligned_rows = aligned.len(),
        "Secondary feed aligned to primary keys"
    );
    aligned
}

/// Left joins `secondary` onto `primary` and imputes missing secondary
/// measurements from the primary row.
///
/// `secondary` is expected to be aligned with [`align_to_primary`], so a key
/// repeated in `primary` is repeated here too and matches the same row.
pub fn merge_and_impute(primary: ReliabilityTable, secondary: ReliabilityTable) -> MergedTable {
    let (index, repeated) = index_first(secondary.rows, |r: &ReliabilityObservation| {
        r.observation.key()
    });
    if repeated > 0 {
        debug!(repeated, "Repeated keys in aligned secondary rows, keeping first occurrence");
    }

    let rows: Vec<MergedObservation> = primary
        .rows
        .into_iter()
        .map(|p| {
            let matched = index.get(&p.observation.key());
            let mut fields = matched.map_or_else(SecondaryFields::default, |s| SecondaryFields {
                speed: s.observation.speed,
                travel_time: s.observation.travel_time,
                extra: s.observation.extra.clone(),
                reliability: s.reliability,
            });

            let imputed = fields.travel_time.is_none();
            if imputed {
                fields.speed = p.observation.speed;
                fields.travel_time = p.observation.travel_time;
            }

            MergedObservation {
                primary: p,
                secondary: fields,
                imputed,
            }
        })
        .collect();

    debug!(
        rows = rows.len(),
        secondary_rows = index.len(),
        "Secondary feed merged"
    );

    MergedTable {
        primary_layout: primary.layout,
        secondary_layout: secondary.layout,
        primary_percentiles: primary.percentiles,
        secondary_percentiles: secondary.percentiles,
        rows,
        groups: primary.groups,
    }
}
