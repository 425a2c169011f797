use anyhow::{Context, Result};
use chrono::Local;
use clap::{builder::BoolishValueParser, Parser, Subcommand};
use membugs::{
    AccountingHeap, BugSummary, Harness, HarnessConfig, HarnessError, HeapStats, HostSanitizer,
    ModeState, Outcome,
};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const LOG_ENV_VAR: &str = "MEMBUGS_LOG";

/// membugs-ctl: runs one memory-defect testcase at a time so you can check
/// whether your sanitizer reports it.
#[derive(Parser, Debug)]
#[command(version, about = "Control surface for the membugs defect corpus")]
struct Args {
    /// YAML file with harness options (multi_shot, release_leaks, repeat)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Keep the sanitizer reporting after the first error for this session
    #[arg(
        long,
        global = true,
        env = "MEMBUGS_MULTI_SHOT",
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    multi_shot: Option<bool>,

    /// Release the blocks the leak testcases would otherwise lose
    #[arg(
        long,
        global = true,
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    release_leaks: Option<bool>,

    /// Run the selected testcase this many times
    #[arg(long, global = true)]
    repeat: Option<u32>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every testcase in catalog order
    List,
    /// Run one testcase
    Run { id: String },
    /// Show one testcase's descriptor
    Describe { id: String },
}

#[derive(Serialize)]
struct RunReport<'a> {
    id: &'a str,
    status: i32,
    timestamp: String,
    outcomes: Vec<Outcome>,
    heap: HeapStats,
    sanitizer: ModeState,
}

#[derive(Serialize)]
struct ErrorReport<'a> {
    id: Option<&'a str>,
    status: i32,
    error: String,
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(args: &Args) -> Result<HarnessConfig> {
    let mut config = if let Some(path) = &args.config {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        serde_yaml::from_str(&contents)
            .with_context(|| format!("parse config file {}", path.display()))?
    } else {
        HarnessConfig::default()
    };

    if let Some(multi_shot) = args.multi_shot {
        config.multi_shot = multi_shot;
    }
    if let Some(release_leaks) = args.release_leaks {
        config.release_leaks = release_leaks;
    }
    if let Some(repeat) = args.repeat {
        config.repeat = repeat;
    }
    Ok(config)
}

/// Process exit code for a harness error: the errno without its sign.
fn exit_code(err: &HarnessError) -> i32 {
    err.status().abs()
}

fn report_error(json: bool, id: Option<&str>, err: &HarnessError) -> Result<()> {
    if json {
        let report = ErrorReport {
            id,
            status: err.status(),
            error: err.to_string(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        eprintln!("membugs-ctl: {err} (status {})", err.status());
    }
    Ok(())
}

fn print_listing(json: bool, listing: &[BugSummary]) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(listing)?);
        return Ok(());
    }

    println!(
        "{:<28} {:<19} {:<14} {:<6} {:<10} {}",
        "ID", "CATEGORY", "REGION", "MODE", "DIRECTION", "DETECTOR"
    );
    for entry in listing {
        println!(
            "{:<28} {:<19} {:<14} {:<6} {:<10} {}",
            entry.id,
            entry.category.label(),
            entry.region.label(),
            entry.access.map(|mode| mode.label()).unwrap_or("-"),
            entry.direction.label(),
            entry.expected_detector.label()
        );
    }
    println!("{} testcase(s)", listing.len());
    Ok(())
}

fn print_description(json: bool, entry: &BugSummary) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(entry)?);
        return Ok(());
    }
    println!("{}", entry.id);
    println!("  {}", entry.summary);
    println!("  category:          {}", entry.category.label());
    println!("  region:            {}", entry.region.label());
    println!(
        "  access:            {}",
        entry.access.map(|mode| mode.label()).unwrap_or("-")
    );
    println!("  direction:         {}", entry.direction.label());
    println!("  expected detector: {}", entry.expected_detector.label());
    Ok(())
}

fn print_run(json: bool, harness: &Harness, id: &str, outcomes: Vec<Outcome>) -> Result<()> {
    let heap = harness.heap_stats();
    if json {
        let report = RunReport {
            id,
            status: 0,
            timestamp: Local::now().to_rfc3339(),
            outcomes,
            heap,
            sanitizer: harness.mode_state(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for (round, outcome) in outcomes.iter().enumerate() {
        println!("{id} [{}]: {outcome}", round + 1);
    }
    println!(
        "heap: {} outstanding block(s), {} byte(s)",
        heap.outstanding_blocks, heap.outstanding_bytes
    );
    println!("status: 0");
    Ok(())
}

/// Runs one command against an initialized harness. Harness errors come back
/// as `Ok(Err(..))` so the caller can tear down before exiting.
fn dispatch(args: &Args, harness: &Harness) -> Result<Result<(), HarnessError>> {
    match &args.command {
        Command::List => {
            print_listing(args.json, &harness.list())?;
            Ok(Ok(()))
        }
        Command::Describe { id } => match harness.dispatcher().catalog().lookup(id) {
            Ok(descriptor) => {
                print_description(args.json, &descriptor.summary())?;
                Ok(Ok(()))
            }
            Err(err) => Ok(Err(err)),
        },
        Command::Run { id } => match harness.run(id) {
            Ok(outcomes) => {
                print_run(args.json, harness, id, outcomes)?;
                Ok(Ok(()))
            }
            Err(err) => Ok(Err(err)),
        },
    }
}

fn requested_id(command: &Command) -> Option<&str> {
    match command {
        Command::List => None,
        Command::Run { id } | Command::Describe { id } => Some(id.as_str()),
    }
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();
    let config = load_config(&args)?;
    debug!(?config, "effective harness configuration");

    let harness = match Harness::init(config, Arc::new(HostSanitizer), AccountingHeap::system()) {
        Ok(harness) => harness,
        Err(err) => {
            report_error(args.json, None, &err)?;
            std::process::exit(exit_code(&err));
        }
    };

    let result = dispatch(&args, &harness);
    harness.teardown();

    if let Err(err) = result? {
        report_error(args.json, requested_id(&args.command), &err)?;
        std::process::exit(exit_code(&err));
    }
    Ok(())
}
