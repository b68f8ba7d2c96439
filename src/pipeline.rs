//! Drives the four NPMRDS feeds through bucketing, reliability and, for the
//! Interstate class, the truck merge.
//!
//! Feeds are independent and run concurrently on the blocking thread pool.
//! The Interstate truck stage waits for both Interstate inputs. A failing
//! feed is reported and produces no output; the others still complete.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{Instrument, Span, error, info};

use crate::bucket::bucket_observations;
use crate::ingest::read_observations;
use crate::merge::{align_to_primary, merge_and_impute};
use crate::output::{output_path, write_atomic, write_merged, write_reliability};
use crate::reliability::{PercentilePair, add_lottr};
use crate::error::LottrError;
use crate::types::{Feed, MergedTable, ReliabilityTable};

/// The four fixed inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    Interstate,
    InterstateTrucks,
    StateRoutes,
    UsRoutes,
}

impl FeedKind {
    pub fn label(self) -> &'static str {
        match self {
            FeedKind::Interstate => "interstates (all vehicles)",
            FeedKind::InterstateTrucks => "interstates (trucks only)",
            FeedKind::StateRoutes => "state routes (all vehicles)",
            FeedKind::UsRoutes => "US routes (all vehicles)",
        }
    }

    pub fn percentiles(self) -> PercentilePair {
        match self {
            FeedKind::InterstateTrucks => PercentilePair::TRUCKS,
            _ => PercentilePair::ALL_VEHICLES,
        }
    }
}

/// Input locations and output directory for a full run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub interstate: PathBuf,
    pub interstate_trucks: PathBuf,
    pub state_routes: PathBuf,
    pub us_routes: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            interstate: PathBuf::from("./Datafiles/OHINT23/OHINT23.csv"),
            interstate_trucks: PathBuf::from("./Datafiles/OHINTRK23/OHINTRK23.csv"),
            state_routes: PathBuf::from("./Datafiles/OHSRO23/OHSRO23.csv"),
            us_routes: PathBuf::from("./Datafiles/OHUSR23/OHUSR23.csv"),
            output_dir: PathBuf::from("."),
        }
    }
}

/// What a successful feed produced.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedOutcome {
    pub output: PathBuf,
    pub rows: usize,
    pub groups: usize,
    /// Rows whose truck values were imputed. Only set for the merged output.
    pub imputed: Option<usize>,
}

/// Per-feed result of a pipeline run, logged as JSON at the end.
#[derive(Debug, Clone, Serialize)]
pub struct FeedReport {
    pub feed: FeedKind,
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub rows: usize,
    pub groups: usize,
    pub imputed: Option<usize>,
    pub elapsed_ms: u64,
    pub error: Option<String>,
    /// The input file itself was malformed, as opposed to unreadable.
    pub invalid_input: bool,
}

impl FeedReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Reads a feed and computes its reliability table.
pub fn load_reliability(input: &Path, pair: PercentilePair) -> Result<ReliabilityTable> {
    let feed = read_observations(input)
        .with_context(|| format!("failed to load {}", input.display()))?;
    Ok(add_lottr(feed.layout, bucket_observations(feed.observations), pair))
}

/// Aligns the raw truck feed onto the all-vehicle keys, computes truck
/// reliability and merges it into the all-vehicle table.
pub fn merge_trucks(primary: ReliabilityTable, trucks: Feed) -> MergedTable {
    let aligned = align_to_primary(
        primary.rows.iter().map(|r| &r.observation),
        trucks.observations,
    );
    let secondary = add_lottr(
        trucks.layout,
        bucket_observations(aligned),
        FeedKind::InterstateTrucks.percentiles(),
    );
    merge_and_impute(primary, secondary)
}

/// Processes one standalone feed and writes `LOTTR_<stem>.csv`.
#[tracing::instrument(
    skip_all,
    fields(input = %input.display(), q1 = pair.low(), q2 = pair.high())
)]
pub fn run_feed(input: &Path, pair: PercentilePair, output_dir: &Path) -> Result<FeedOutcome> {
    let table = load_reliability(input, pair)?;
    let output = output_path(output_dir, input);
    write_atomic(&output, |w| write_reliability(w, &table))
        .with_context(|| format!("failed to write {}", output.display()))?;

    Ok(FeedOutcome {
        output,
        rows: table.rows.len(),
        groups: table.groups,
        imputed: None,
    })
}

/// Processes the Interstate all-vehicle and truck feeds and writes the
/// merged output, named after the all-vehicle input.
#[tracing::instrument(
    skip_all,
    fields(all_vehicles = %all_vehicles.display(), trucks = %trucks.display())
)]
pub async fn run_interstate(
    all_vehicles: PathBuf,
    trucks: PathBuf,
    output_dir: PathBuf,
) -> Result<FeedOutcome> {
    let primary = spawn_feed_task({
        let path = all_vehicles.clone();
        move || load_reliability(&path, FeedKind::Interstate.percentiles())
    });
    let secondary = spawn_feed_task(move || {
        read_observations(&trucks)
            .with_context(|| format!("failed to load trucks feed {}", trucks.display()))
    });

    let (primary, secondary) = tokio::join!(primary, secondary);
    let primary = primary?;
    let secondary = secondary?;

    spawn_feed_task(move || {
        let merged = merge_trucks(primary, secondary);
        let output = output_path(&output_dir, &all_vehicles);
        write_atomic(&output, |w| write_merged(w, &merged))
            .with_context(|| format!("failed to write {}", output.display()))?;

        Ok(FeedOutcome {
            output,
            rows: merged.rows.len(),
            groups: merged.groups,
            imputed: Some(merged.imputed_count()),
        })
    })
    .await
}

/// Runs every feed in `config` and returns one report per output file.
#[tracing::instrument(skip_all, fields(output_dir = %config.output_dir.display()))]
pub async fn run_pipeline(config: &PipelineConfig) -> Vec<FeedReport> {
    let out = config.output_dir.clone();

    let interstate = tracked(
        FeedKind::Interstate,
        config.interstate.clone(),
        run_interstate(
            config.interstate.clone(),
            config.interstate_trucks.clone(),
            out.clone(),
        ),
    );
    let state_routes = tracked(
        FeedKind::StateRoutes,
        config.state_routes.clone(),
        standalone(FeedKind::StateRoutes, config.state_routes.clone(), out.clone()),
    );
    let us_routes = tracked(
        FeedKind::UsRoutes,
        config.us_routes.clone(),
        standalone(FeedKind::UsRoutes, config.us_routes.clone(), out),
    );

    let (interstate, state_routes, us_routes) = tokio::join!(interstate, state_routes, us_routes);
    vec![interstate, state_routes, us_routes]
}

async fn standalone(feed: FeedKind, input: PathBuf, output_dir: PathBuf) -> Result<FeedOutcome> {
    spawn_feed_task(move || run_feed(&input, feed.percentiles(), &output_dir)).await
}

/// Runs a blocking stage on tokio's blocking pool inside the caller's span.
async fn spawn_feed_task<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let span = Span::current();
    tokio::task::spawn_blocking(move || span.in_scope(f))
        .await
        .context("feed task panicked")?
}

/// Times `fut` and turns its result into a [`FeedReport`].
async fn tracked<F>(feed: FeedKind, input: PathBuf, fut: F) -> FeedReport
where
    F: Future<Output = Result<FeedOutcome>>,
{
    let started = Instant::now();
    let span = tracing::info_span!("feed", feed = feed.label());
    let result = fut.instrument(span).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(outcome) => {
            info!(
                feed = feed.label(),
                rows = outcome.rows,
                groups = outcome.groups,
                imputed = outcome.imputed,
                elapsed_ms,
                "Feed processed"
            );
            FeedReport {
                feed,
                input,
                output: Some(outcome.output),
                rows: outcome.rows,
                groups: outcome.groups,
                imputed: outcome.imputed,
                elapsed_ms,
                error: None,
                invalid_input: false,
            }
        }
        Err(e) => {
            let message = format!("{e:#}");
            let invalid_input = is_invalid_input(&e);
            error!(feed = feed.label(), invalid_input, error = %message, "Feed failed");
            FeedReport {
                feed,
                input,
                output: None,
                rows: 0,
                groups: 0,
                imputed: None,
                elapsed_ms,
                error: Some(message),
                invalid_input,
            }
        }
    }
}

fn is_invalid_input(e: &anyhow::Error) -> bool {
    e.downcast_ref::<LottrError>()
        .is_some_and(LottrError::is_structural)
}
