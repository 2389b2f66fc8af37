use std::path::PathBuf;
use std::process;
use std::str::FromStr;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use log::LevelFilter;
use planilla::config::{HarvestConfig, default_workers};
use planilla::export::{self, ExportFormat};
use planilla::{Harvester, RetryPolicy};

const DEFAULT_OUTPUT: &str = "planilla_gobierno_central.xlsx";

#[derive(Parser)]
#[command(name = "planilla")]
#[command(about = "Harvests the central government payroll from contraloria.gob.pa", long_about = None)]
struct Cli {
    #[arg(
        short = 'l',
        long = "log-level",
        value_enum,
        default_value = "info",
        help = "Set the logging level"
    )]
    log_level: LogLevel,

    #[arg(long, help = "Payroll portal form URL (defaults to the public portal)")]
    url: Option<String>,

    #[arg(
        short = 'o',
        long = "output",
        default_value = DEFAULT_OUTPUT,
        help = "Export file path"
    )]
    output: PathBuf,

    #[arg(
        long,
        value_parser = parse_format,
        help = "Export format: csv, json or xlsx (inferred from the output extension when omitted)"
    )]
    format: Option<ExportFormat>,

    #[arg(
        long,
        help = "Institutions scraped concurrently [default: available cores - 1]",
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    workers: Option<u16>,

    #[arg(
        long,
        default_value_t = 5,
        help = "Attempts per request before giving up",
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    max_retries: u32,

    #[arg(long, default_value_t = 2, help = "Seconds to wait after the first failed attempt")]
    initial_wait: u64,

    #[arg(long, default_value_t = 60, help = "Upper bound in seconds for the wait between attempts")]
    max_wait: u64,

    #[arg(long, default_value_t = 30, help = "Per-request timeout in seconds")]
    timeout: u64,
}

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

fn parse_format(s: &str) -> Result<ExportFormat, String> {
    ExportFormat::from_str(s).map_err(|e| e.to_string())
}

impl Cli {
    fn harvest_config(&self) -> HarvestConfig {
        let defaults = HarvestConfig::default();
        HarvestConfig {
            url: self.url.clone().unwrap_or(defaults.url),
            timeout: Duration::from_secs(self.timeout),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                initial_wait: Duration::from_secs(self.initial_wait),
                max_wait: Duration::from_secs(self.max_wait),
            },
            workers: self
                .workers
                .map(usize::from)
                .unwrap_or_else(default_workers),
            ..defaults
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level.clone().into())
        .init();

    let started = Instant::now();

    let harvester = Harvester::new(cli.harvest_config()).unwrap_or_else(|e| {
        log::error!("Error creating harvester: {}", e);
        process::exit(1);
    });

    log::info!(
        "Harvesting {} with {} worker(s)...",
        harvester.url(),
        harvester.workers()
    );

    let report = harvester.harvest().await;
    print!("{}", report);

    let format = cli
        .format
        .unwrap_or_else(|| ExportFormat::from_path(&cli.output));
    let written = export::export(&report.records, &cli.output, format).unwrap_or_else(|e| {
        log::error!("Error exporting to {}: {}", cli.output.display(), e);
        process::exit(1);
    });

    println!("\nExported {} records to {}.", written, cli.output.display());
    println!("Elapsed: {:.2} seconds.", started.elapsed().as_secs_f64());
}
