//! CSV reader for NPMRDS travel time exports.

use chrono::NaiveDateTime;
use csv::StringRecord;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::debug;

use crate::error::{LottrError, Result};
use crate::segment::SegmentInterner;
use crate::types::{Feed, InputColumn, InputLayout, Observation};

/// Required columns: the name used in errors, the header names accepted for
/// it, and the name written on output.
type Required = (&'static str, &'static [&'static str], &'static str);

const SEGMENT: Required = ("tmc_code", &["tmc_code"], "tmc_code");
const TIMESTAMP: Required = ("measurement_tstamp", &["measurement_tstamp", "DATETIME"], "DATETIME");
const SPEED: Required = ("speed", &["speed", "MPH"], "MPH");
const TRAVEL_TIME: Required = ("travel_time_seconds", &["travel_time_seconds", "TT_SEC"], "TT_SEC");

const MISSING: &[&str] = &["nan", "null", "na"];

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Positions of the required and pass-through columns in a header row.
#[derive(Debug, Clone)]
struct Columns {
    segment: usize,
    timestamp: usize,
    speed: usize,
    travel_time: usize,
    extra: Vec<usize>,
}

impl Columns {
    fn resolve(headers: &StringRecord, path: &Path) -> Result<(Self, InputLayout)> {
        let find = |(column, aliases, _): Required| {
            headers
                .iter()
                .position(|h| aliases.contains(&h.trim()))
                .ok_or_else(|| LottrError::MissingColumn {
                    path: path.to_path_buf(),
                    column,
                })
        };
        let mut columns = Columns {
            segment: find(SEGMENT)?,
            timestamp: find(TIMESTAMP)?,
            speed: find(SPEED)?,
            travel_time: find(TRAVEL_TIME)?,
            extra: Vec::new(),
        };

        let mut layout = Vec::with_capacity(headers.len());
        for (idx, header) in headers.iter().enumerate() {
            let (column, name) = match idx {
                i if i == columns.segment => (InputColumn::Segment, SEGMENT.2),
                i if i == columns.timestamp => (InputColumn::Timestamp, TIMESTAMP.2),
                i if i == columns.speed => (InputColumn::Speed, SPEED.2),
                i if i == columns.travel_time => (InputColumn::TravelTime, TRAVEL_TIME.2),
                _ => {
                    columns.extra.push(idx);
                    (InputColumn::Extra(columns.extra.len() - 1), header.trim())
                }
            };
            layout.push((column, name.to_string()));
        }

        Ok((columns, InputLayout::new(layout)))
    }
}

/// Opens `path` for reading, decompressing on the fly when it ends in `.gz`.
pub fn open_input(path: &Path) -> Result<Box<dyn Read + Send>> {
    let file = BufReader::new(File::open(path)?);
    if path.extension().and_then(|e| e.to_str()) == Some("gz") {
        Ok(Box::new(MultiGzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// Reads every observation from the CSV file at `path`.
pub fn read_observations(path: &Path) -> Result<Feed> {
    parse_observations(open_input(path)?, path)
}

/// Parses observations from CSV data. `path` is only used in error messages.
///
/// # Errors
///
/// Fails on a missing required column, an empty segment code, a missing or
/// unparseable timestamp, or a non-numeric measurement.
pub fn parse_observations<R: Read>(reader: R, path: &Path) -> Result<Feed> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let (columns, layout) = Columns::resolve(rdr.headers()?, path)?;

    let mut interner = SegmentInterner::new();
    let mut rows = Vec::new();
    let mut record = StringRecord::new();

    while rdr.read_record(&mut record)? {
        let line = record.position().map_or(0, |p| p.line());
        let field = |idx: usize| record.get(idx).unwrap_or("").trim();

        let code = field(columns.segment);
        if code.is_empty() {
            return Err(LottrError::MissingKey {
                path: path.to_path_buf(),
                line,
                column: SEGMENT.0,
            });
        }

        let raw_ts = field(columns.timestamp);
        if raw_ts.is_empty() {
            return Err(LottrError::MissingKey {
                path: path.to_path_buf(),
                line,
                column: TIMESTAMP.0,
            });
        }
        let timestamp = parse_timestamp(raw_ts).ok_or_else(|| LottrError::InvalidTimestamp {
            path: path.to_path_buf(),
            line,
            value: raw_ts.to_string(),
        })?;

        let measure = |idx: usize, column: &'static str| {
            let raw = field(idx);
            parse_measure(raw).map_err(|_| LottrError::InvalidNumber {
                path: path.to_path_buf(),
                line,
                column,
                value: raw.to_string(),
            })
        };

        rows.push(Observation {
            segment: interner.intern(code),
            timestamp,
            speed: measure(columns.speed, SPEED.0)?,
            travel_time: measure(columns.travel_time, TRAVEL_TIME.0)?,
            extra: columns.extra.iter().map(|&idx| field(idx).into()).collect(),
        });
    }

    debug!(
        path = %path.display(),
        rows = rows.len(),
        segments = interner.len(),
        "Observations loaded"
    );
    Ok(Feed {
        layout,
        observations: rows,
    })
}

/// Parses an NPMRDS timestamp such as `2023-01-01 07:15:00`.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// Parses a measurement cell. Empty, `NaN` and `null` cells are missing.
fn parse_measure(raw: &str) -> std::result::Result<Option<f32>, std::num::ParseFloatError> {
    if raw.is_empty() || MISSING.iter().any(|m| raw.eq_ignore_ascii_case(m)) {
        return Ok(None);
    }
    let value: f32 = raw.parse()?;
    Ok(Some(value).filter(|v| v.is_finite()))
}
