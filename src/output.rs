//! Output naming and CSV serialization for reliability tables.
//!
//! Output files are written next to a `.partial` sibling and renamed into
//! place only once fully written, so a failed feed never leaves a truncated
//! CSV behind.

use chrono::NaiveDateTime;
use csv::WriterBuilder;
use serde::{Serialize, Serializer};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::Result;
use crate::reliability::PercentilePair;
use crate::types::{
    InputColumn, InputLayout, MergedObservation, MergedTable, Observation, Reliability,
    ReliabilityObservation, ReliabilityTable, SecondaryFields,
};

pub const OUTPUT_PREFIX: &str = "LOTTR_";
pub const TRUCK_PREFIX: &str = "TRK_";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const BUCKET_COLUMNS: [&str; 3] = ["HOD", "DOW", "TOD"];

/// `LOTTR_<stem>.csv`, where `<stem>` is the input file name up to its
/// first `.` (so `OHINT23.csv.gz` becomes `LOTTR_OHINT23.csv`).
pub fn output_file_name(input: &Path) -> String {
    let name = input
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let stem = name.split('.').next().unwrap_or_default();
    format!("{OUTPUT_PREFIX}{stem}.csv")
}

pub fn output_path(output_dir: &Path, input: &Path) -> PathBuf {
    output_dir.join(output_file_name(input))
}

/// One output cell. Numbers go through the CSV serializer so they are
/// formatted the same way in every column.
enum Cell<'a> {
    Text(&'a str),
    Timestamp(NaiveDateTime),
    Number(Option<f32>),
    Small(u8),
}

impl Serialize for Cell<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Cell::Text(text) => serializer.serialize_str(text),
            Cell::Timestamp(ts) => serializer.collect_str(&ts.format(TIMESTAMP_FORMAT)),
            Cell::Number(value) => value.serialize(serializer),
            Cell::Small(value) => serializer.serialize_u8(*value),
        }
    }
}

fn extra_cell(extra: &[Box<str>], idx: usize) -> &str {
    extra.get(idx).map_or("", |cell| &**cell)
}

fn input_cell(column: InputColumn, obs: &Observation) -> Cell<'_> {
    match column {
        InputColumn::Segment => Cell::Text(obs.segment.as_str()),
        InputColumn::Timestamp => Cell::Timestamp(obs.timestamp),
        InputColumn::Speed => Cell::Number(obs.speed),
        InputColumn::TravelTime => Cell::Number(obs.travel_time),
        InputColumn::Extra(idx) => Cell::Text(extra_cell(&obs.extra, idx)),
    }
}

/// Truck cell for a measurement column. The join key is not repeated.
fn secondary_cell(column: InputColumn, fields: &SecondaryFields) -> Option<Cell<'_>> {
    match column {
        InputColumn::Segment | InputColumn::Timestamp => None,
        InputColumn::Speed => Some(Cell::Number(fields.speed)),
        InputColumn::TravelTime => Some(Cell::Number(fields.travel_time)),
        InputColumn::Extra(idx) => Some(Cell::Text(extra_cell(&fields.extra, idx))),
    }
}

fn reliability_cells<'a>(
    layout: &InputLayout,
    row: &'a ReliabilityObservation,
    cells: &mut Vec<Cell<'a>>,
) {
    cells.extend(layout.columns().map(|(column, _)| input_cell(column, &row.observation)));
    cells.extend([
        Cell::Small(row.bucket.hour_of_day),
        Cell::Small(row.bucket.day_of_week),
        Cell::Text(row.bucket.time_of_day.as_str()),
    ]);
    push_reliability(&row.reliability, cells);
}

fn push_reliability(reliability: &Reliability, cells: &mut Vec<Cell<'_>>) {
    cells.extend([
        Cell::Number(reliability.low),
        Cell::Number(reliability.high),
        Cell::Number(reliability.lottr),
    ]);
}

fn merged_cells<'a>(table: &MergedTable, row: &'a MergedObservation, cells: &mut Vec<Cell<'a>>) {
    reliability_cells(&table.primary_layout, &row.primary, cells);
    cells.extend(
        table
            .secondary_layout
            .columns()
            .filter_map(|(column, _)| secondary_cell(column, &row.secondary)),
    );
    push_reliability(&row.secondary.reliability, cells);
    cells.push(Cell::Small(row.flag()));
}

fn reliability_columns(pair: PercentilePair) -> [String; 3] {
    [pair.low_column(), pair.high_column(), "LOTTR".to_string()]
}

/// Header for a standalone feed: the input columns in input order, then the
/// time buckets and the percentile columns named after the percentiles used,
/// e.g. `TT50P,TT80P`.
pub fn reliability_header(table: &ReliabilityTable) -> Vec<String> {
    let mut header: Vec<String> = table.layout.columns().map(|(_, name)| name.to_string()).collect();
    header.extend(BUCKET_COLUMNS.map(String::from));
    header.extend(reliability_columns(table.percentiles));
    header
}

/// Header for the merged Interstate output. Truck columns carry the `TRK_`
/// prefix and leave out the join key and the time buckets.
pub fn merged_header(table: &MergedTable) -> Vec<String> {
    let mut header: Vec<String> = table
        .primary_layout
        .columns()
        .map(|(_, name)| name.to_string())
        .collect();
    header.extend(BUCKET_COLUMNS.map(String::from));
    header.extend(reliability_columns(table.primary_percentiles));
    header.extend(
        table
            .secondary_layout
            .measurement_columns()
            .map(|(_, name)| name.to_string())
            .chain(reliability_columns(table.secondary_percentiles))
            .map(|c| format!("{TRUCK_PREFIX}{c}")),
    );
    header.push("FLAG".to_string());
    header
}

pub fn write_reliability<W: Write>(writer: W, table: &ReliabilityTable) -> Result<()> {
    let mut wtr = WriterBuilder::new().has_headers(false).from_writer(writer);
    wtr.write_record(reliability_header(table))?;
    let mut cells = Vec::new();
    for row in &table.rows {
        cells.clear();
        reliability_cells(&table.layout, row, &mut cells);
        wtr.serialize(&cells)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_merged<W: Write>(writer: W, table: &MergedTable) -> Result<()> {
    let mut wtr = WriterBuilder::new().has_headers(false).from_writer(writer);
    wtr.write_record(merged_header(table))?;
    let mut cells = Vec::new();
    for row in &table.rows {
        cells.clear();
        merged_cells(table, row, &mut cells);
        wtr.serialize(&cells)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Runs `write` against `<path>.partial`, then renames it to `path`.
/// The partial file is removed if `write` fails.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let mut partial = path.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    let result: Result<()> = (|| {
        let mut writer = BufWriter::new(File::create(&partial)?);
        write(&mut writer)?;
        writer.flush()?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            fs::rename(&partial, path)?;
            info!(path = %path.display(), "Output written");
            Ok(())
        }
        Err(e) => {
            debug!(path = %partial.display(), "Removing partial output");
            let _ = fs::remove_file(&partial);
            Err(e)
        }
    }
}

/// Logs any serializable value as pretty-printed JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;
    info!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::TimeBucket;
    use crate::segment::SegmentId;
    use chrono::NaiveDate;

    fn observation() -> ReliabilityObservation {
        let timestamp = NaiveDate::from_ymd_opt(2023, 1, 2)
            .unwrap()
            .and_hms_opt(7, 15, 0)
            .unwrap();
        ReliabilityObservation {
            observation: Observation {
                segment: SegmentId::from("108+04520"),
                timestamp,
                speed: Some(55.5),
                travel_time: None,
                extra: Box::default(),
            },
            bucket: TimeBucket::from_timestamp(&timestamp),
            reliability: Reliability {
                low: Some(10.0),
                high: Some(15.0),
                lottr: Some(1.5),
            },
        }
    }

    #[test]
    fn test_output_file_name() {
        assert_eq!(
            output_file_name(Path::new("./Datafiles/OHINT23/OHINT23.csv")),
            "LOTTR_OHINT23.csv"
        );
        assert_eq!(output_file_name(Path::new("OHSRO23.csv.gz")), "LOTTR_OHSRO23.csv");
        assert_eq!(
            output_path(Path::new("out"), Path::new("a/OHUSR23.csv")),
            PathBuf::from("out/LOTTR_OHUSR23.csv")
        );
    }

    #[test]
    fn test_write_reliability() {
        let table = ReliabilityTable {
            layout: InputLayout::default(),
            percentiles: PercentilePair::ALL_VEHICLES,
            rows: vec![observation()],
            groups: 1,
        };
        let mut buf = Vec::new();
        write_reliability(&mut buf, &table).unwrap();

        let content = String::from_utf8(buf).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines[0], "tmc_code,DATETIME,MPH,TT_SEC,HOD,DOW,TOD,TT50P,TT80P,LOTTR");
        assert_eq!(lines[1], "108+04520,2023-01-02 07:15:00,55.5,,7,2,AM,10.0,15.0,1.5");
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_write_merged_header_and_flag() {
        let table = MergedTable {
            primary_layout: InputLayout::default(),
            secondary_layout: InputLayout::default(),
            primary_percentiles: PercentilePair::ALL_VEHICLES,
            secondary_percentiles: PercentilePair::TRUCKS,
            rows: vec![MergedObservation {
                primary: observation(),
                secondary: SecondaryFields {
                    speed: Some(55.5),
                    travel_time: None,
                    extra: Box::default(),
                    reliability: Reliability::default(),
                },
                imputed: true,
            }],
            groups: 1,
        };
        let mut buf = Vec::new();
        write_merged(&mut buf, &table).unwrap();

        let content = String::from_utf8(buf).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(
            lines[0],
            "tmc_code,DATETIME,MPH,TT_SEC,HOD,DOW,TOD,TT50P,TT80P,LOTTR,TRK_MPH,TRK_TT_SEC,TRK_TT50P,TRK_TT95P,TRK_LOTTR,FLAG"
        );
        assert!(lines[1].ends_with(",55.5,,,,,1"));
    }

    /// Input order `tmc_code, measurement_tstamp, speed, data_density,
    /// travel_time_seconds`.
    fn npmrds_layout() -> InputLayout {
        InputLayout::new(vec![
            (InputColumn::Segment, "tmc_code".to_string()),
            (InputColumn::Timestamp, "DATETIME".to_string()),
            (InputColumn::Speed, "MPH".to_string()),
            (InputColumn::Extra(0), "data_density".to_string()),
            (InputColumn::TravelTime, "TT_SEC".to_string()),
        ])
    }

    #[test]
    fn test_pass_through_columns_keep_their_position() {
        let mut row = observation();
        row.observation.extra = vec!["B".into()].into_boxed_slice();
        let table = ReliabilityTable {
            layout: npmrds_layout(),
            percentiles: PercentilePair::ALL_VEHICLES,
            rows: vec![row.clone()],
            groups: 1,
        };
        let mut buf = Vec::new();
        write_reliability(&mut buf, &table).unwrap();

        let content = String::from_utf8(buf).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(
            lines[0],
            "tmc_code,DATETIME,MPH,data_density,TT_SEC,HOD,DOW,TOD,TT50P,TT80P,LOTTR"
        );
        assert_eq!(lines[1], "108+04520,2023-01-02 07:15:00,55.5,B,,7,2,AM,10.0,15.0,1.5");

        let merged = MergedTable {
            primary_layout: npmrds_layout(),
            secondary_layout: npmrds_layout(),
            primary_percentiles: PercentilePair::ALL_VEHICLES,
            secondary_percentiles: PercentilePair::TRUCKS,
            rows: vec![
                MergedObservation {
                    primary: row.clone(),
                    secondary: SecondaryFields {
                        speed: Some(48.0),
                        travel_time: Some(20.0),
                        extra: vec!["C".into()].into_boxed_slice(),
                        reliability: Reliability::default(),
                    },
                    imputed: false,
                },
                // No truck row matched: pass-through cells stay empty.
                MergedObservation {
                    primary: row,
                    secondary: SecondaryFields::default(),
                    imputed: true,
                },
            ],
            groups: 1,
        };
        let mut buf = Vec::new();
        write_merged(&mut buf, &merged).unwrap();

        let content = String::from_utf8(buf).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(
            lines[0],
            "tmc_code,DATETIME,MPH,data_density,TT_SEC,HOD,DOW,TOD,TT50P,TT80P,LOTTR,\
             TRK_MPH,TRK_data_density,TRK_TT_SEC,TRK_TT50P,TRK_TT95P,TRK_LOTTR,FLAG"
        );
        assert!(lines[1].ends_with(",1.5,48.0,C,20.0,,,,0"));
        assert!(lines[2].ends_with(",1.5,,,,,,,1"));
    }

    #[test]
    fn test_write_atomic_failure_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("LOTTR_FAIL.csv");

        let result = write_atomic(&path, |w| {
            w.write_all(b"partial")?;
            Err(std::io::Error::other("disk full").into())
        });

        assert!(result.is_err());
        assert!(!path.exists());
        assert!(!dir.path().join("LOTTR_FAIL.csv.partial").exists());
    }

    #[test]
    fn test_write_atomic_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("LOTTR_OK.csv");

        write_atomic(&path, |w| Ok(w.write_all(b"a,b\n")?)).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "a,b\n");
    }

    #[test]
    fn test_print_json_does_not_panic() {
        print_json(&vec!["LOTTR_OHINT23.csv"]).unwrap();
    }
}
