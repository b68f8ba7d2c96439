//! CLI entry point for the NPMRDS LOTTR tool.
//!
//! With no subcommand it processes the four fixed Ohio NPMRDS inputs and
//! writes one `LOTTR_<name>.csv` per road class.

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use npmrds_lottr::output::print_json;
use npmrds_lottr::pipeline::{PipelineConfig, run_feed, run_pipeline};
use npmrds_lottr::reliability::PercentilePair;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "npmrds_lottr")]
#[command(about = "Compute travel time reliability (LOTTR) from NPMRDS exports", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Process the Interstate, Interstate truck, State Route and US Route feeds
    Run {
        /// Interstate feed, all vehicles
        #[arg(long, default_value = "./Datafiles/OHINT23/OHINT23.csv")]
        interstate: PathBuf,

        /// Interstate feed, trucks only
        #[arg(long, default_value = "./Datafiles/OHINTRK23/OHINTRK23.csv")]
        interstate_trucks: PathBuf,

        /// State Route feed, all vehicles
        #[arg(long, default_value = "./Datafiles/OHSRO23/OHSRO23.csv")]
        state_routes: PathBuf,

        /// US Route feed, all vehicles
        #[arg(long, default_value = "./Datafiles/OHUSR23/OHUSR23.csv")]
        us_routes: PathBuf,

        /// Directory to write LOTTR_*.csv files to
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// Compute LOTTR for a single feed with a custom percentile pair
    Lottr {
        /// NPMRDS CSV export (optionally .gz)
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Lower percentile (denominator)
        #[arg(long, default_value_t = 50, allow_negative_numbers = true)]
        q1: i32,

        /// Upper percentile (numerator)
        #[arg(long, default_value_t = 80, allow_negative_numbers = true)]
        q2: i32,

        /// Directory to write the LOTTR_*.csv file to
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/npmrds_lottr.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("npmrds_lottr.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    let config = match cli.command {
        None => PipelineConfig::default(),
        Some(Commands::Run {
            interstate,
            interstate_trucks,
            state_routes,
            us_routes,
            output_dir,
        }) => PipelineConfig {
            interstate,
            interstate_trucks,
            state_routes,
            us_routes,
            output_dir,
        },
        Some(Commands::Lottr {
            input,
            q1,
            q2,
            output_dir,
        }) => {
            let pair = PercentilePair::new(q1, q2)?;
            std::fs::create_dir_all(&output_dir)?;
            let outcome =
                tokio::task::spawn_blocking(move || run_feed(&input, pair, &output_dir)).await??;
            info!(
                output = %outcome.output.display(),
                rows = outcome.rows,
                groups = outcome.groups,
                "LOTTR written"
            );
            return Ok(());
        }
    };

    std::fs::create_dir_all(&config.output_dir)?;
    let reports = run_pipeline(&config).await;
    print_json(&reports)?;

    let failed = reports.iter().filter(|r| !r.is_ok()).count();
    if failed > 0 {
        error!(failed, total = reports.len(), "Some feeds failed");
        bail!("{failed} of {} feeds failed", reports.len());
    }

    info!(output_dir = %config.output_dir.display(), "Finished processing all feeds");
    Ok(())
}
