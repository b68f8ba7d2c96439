//! Record types flowing through the pipeline.
//!
//! Each stage wraps the previous stage's record instead of mutating it:
//! [`Observation`] -> [`BucketedObservation`] -> [`ReliabilityObservation`]
//! -> [`MergedObservation`].

use chrono::NaiveDateTime;

use crate::bucket::TimeBucket;
use crate::reliability::PercentilePair;
use crate::segment::SegmentId;

/// Role of one input column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputColumn {
    Segment,
    Timestamp,
    Speed,
    TravelTime,
    /// Passed through untouched; indexes [`Observation::extra`].
    Extra(usize),
}

/// Column order of an input file, with the names used on output.
///
/// Required columns carry their output names (`tmc_code`, `DATETIME`, `MPH`,
/// `TT_SEC`); every other column keeps its input header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputLayout {
    columns: Vec<(InputColumn, String)>,
}

impl InputLayout {
    pub fn new(columns: Vec<(InputColumn, String)>) -> Self {
        InputLayout { columns }
    }

    pub fn columns(&self) -> impl Iterator<Item = (InputColumn, &str)> {
        self.columns.iter().map(|(col, name)| (*col, name.as_str()))
    }

    /// Columns other than the (segment, timestamp) join key.
    pub fn measurement_columns(&self) -> impl Iterator<Item = (InputColumn, &str)> {
        self.columns()
            .filter(|(col, _)| !matches!(col, InputColumn::Segment | InputColumn::Timestamp))
    }
}

impl Default for InputLayout {
    fn default() -> Self {
        InputLayout::new(vec![
            (InputColumn::Segment, "tmc_code".to_string()),
            (InputColumn::Timestamp, "DATETIME".to_string()),
            (InputColumn::Speed, "MPH".to_string()),
            (InputColumn::TravelTime, "TT_SEC".to_string()),
        ])
    }
}

/// One travel time measurement for a segment at a timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub segment: SegmentId,
    pub timestamp: NaiveDateTime,
    /// Miles per hour.
    pub speed: Option<f32>,
    pub travel_time: Option<f32>,
    /// Raw cells of the pass-through columns, in input order.
    pub extra: Box<[Box<str>]>,
}

impl Observation {
    /// Join key shared by the all-vehicle and truck feeds.
    pub fn key(&self) -> (SegmentId, NaiveDateTime) {
        (self.segment.clone(), self.timestamp)
    }
}

/// Observations read from one input file.
#[derive(Debug, Clone)]
pub struct Feed {
    pub layout: InputLayout,
    pub observations: Vec<Observation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketedObservation {
    pub observation: Observation,
    pub bucket: TimeBucket,
}

/// Percentile values joined from the row's (segment, time of day) group.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Reliability {
    pub low: Option<f32>,
    pub high: Option<f32>,
    /// `high / low`; `None` when undefined.
    pub lottr: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReliabilityObservation {
    pub observation: Observation,
    pub bucket: TimeBucket,
    pub reliability: Reliability,
}

/// Output of the reliability stage for one feed.
#[derive(Debug, Clone)]
pub struct ReliabilityTable {
    pub layout: InputLayout,
    pub percentiles: PercentilePair,
    pub rows: Vec<ReliabilityObservation>,
    /// Number of (segment, time of day) groups with at least one travel time.
    pub groups: usize,
}

/// Truck-feed fields carried on a merged row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SecondaryFields {
    pub speed: Option<f32>,
    pub travel_time: Option<f32>,
    /// Pass-through cells of the truck feed. Empty when no truck row matched.
    pub extra: Box<[Box<str>]>,
    pub reliability: Reliability,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergedObservation {
    pub primary: ReliabilityObservation,
    pub secondary: SecondaryFields,
    /// Secondary speed and travel time were copied from the primary row.
    pub imputed: bool,
}

impl MergedObservation {
    pub fn flag(&self) -> u8 {
        u8::from(self.imputed)
    }
}

#[derive(Debug, Clone)]
pub struct MergedTable {
    pub primary_layout: InputLayout,
    pub secondary_layout: InputLayout,
    pub primary_percentiles: PercentilePair,
    pub secondary_percentiles: PercentilePair,
    pub rows: Vec<MergedObservation>,
    pub groups: usize,
}

impl MergedTable {
    pub fn imputed_count(&self) -> usize {
        self.rows.iter().filter(|r| r.imputed).count()
    }
}
