//! The `mcmini` executable.
//!
//! Drives the classic DPOR search over a target executable:
//!
//! ```bash
//! # Explore every reduced interleaving of ./deadlock
//! mcmini ./deadlock
//!
//! # Stop at the first deadlock, cap each thread at 40 transitions
//! mcmini --first-deadlock -m 40 ./deadlock arg1 arg2
//!
//! # Skip model checking; record the target under the checkpointing
//! # supervisor with a 10-second interval
//! mcmini --record 10 ./server
//! ```
//!
//! Every explored trace is printed as a `TRACE <n>` block on stdout;
//! undefined behavior in the target goes to stderr.  Exit code 0 means
//! the search itself succeeded (deadlocks are results, not failures).

use std::io;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{self, Command};
use std::time::Duration;

use clap::Parser;
use log::warn;

use mcmini_checker::dpor::{ClassicDpor, SearchCallbacks, SearchReport};
use mcmini_checker::report::{self, TraceRecord};
use mcmini_checker::{CheckerConfig, CheckerError};
use mcmini_model::ProgramModel;
use mcmini_protocol as protocol;
use mcmini_runtime::{Coordinator, ForkProcessSource, Target, TransitionRegistry};

#[derive(Parser)]
#[command(name = "mcmini")]
#[command(about = "Stateless model checker for pthread programs")]
#[command(version)]
struct Cli {
    /// Cap on the transitions a single thread may execute per trace.
    #[arg(short = 'm', long = "max-depth-per-thread", value_name = "N")]
    max_depth_per_thread: Option<usize>,

    /// Stop after the first deadlock found.
    #[arg(short = 'f', long = "first-deadlock", visible_alias = "first")]
    first_deadlock: bool,

    /// Emit diagnostic information when this trace id is explored.
    #[arg(short = 'p', long = "print-at-traceId", value_name = "N")]
    print_at_trace_id: Option<u64>,

    /// Skip model checking; relaunch the target under the checkpointing
    /// supervisor with the given checkpoint interval.
    #[arg(short = 'r', long = "record", value_name = "SECONDS")]
    record: Option<u64>,

    /// Directory for per-trace JSON records and the final summary.
    #[arg(short = 'o', long = "output", value_name = "DIR")]
    output: Option<PathBuf>,

    /// Target executable.
    #[arg(value_name = "TARGET")]
    target: PathBuf,

    /// Arguments passed to the target.
    #[arg(value_name = "ARGS", trailing_var_arg = true, allow_hyphen_values = true)]
    target_args: Vec<String>,
}

fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).ok().as_deref(),
        Some("1") | Some("true") | Some("yes")
    )
}

fn init_logging() {
    let default = if env_flag(protocol::ENV_VERBOSE) {
        "debug"
    } else if env_flag(protocol::ENV_QUIET) {
        "error"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn main() {
    init_logging();

    // Usage problems (including --help) exit 1.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            process::exit(1);
        }
    };

    if std::fs::metadata(&cli.target).is_err() {
        eprintln!("*** Missing target_executable or no such file.\n");
        process::exit(1);
    }
    if cli.target.file_name().map(|n| n == "mcmini").unwrap_or(false) {
        eprintln!("\n*** McMini being called on 'mcmini'.  This doesn't work.");
        process::exit(1);
    }

    let mut config = CheckerConfig::new(cli.target, cli.target_args);
    config.max_depth_per_thread = cli.max_depth_per_thread;
    config.stop_at_first_deadlock = cli.first_deadlock;
    config.print_at_trace_id = cli.print_at_trace_id;
    config.checkpoint_period = cli.record.map(Duration::from_secs);
    config.output_dir = cli.output;
    config.apply_environment();

    if config.checkpoint_period.is_some() {
        let err = do_recording(&config);
        eprintln!("mcmini: failed to launch the recording supervisor: {err}");
        process::exit(1);
    }

    match do_model_checking(&config) {
        Ok(report) => {
            println!("Model checking completed!");
            if let Some(dir) = &config.output_dir {
                if let Err(e) = report::write_search_report(dir, &report) {
                    warn!("failed to write the search report: {e}");
                }
            }
        }
        Err(err) => {
            eprintln!("mcmini: {err}");
            process::exit(1);
        }
    }
}

/// Record mode: replace this process with the checkpointing supervisor
/// running the target.  Returns only if the exec itself failed.
fn do_recording(config: &CheckerConfig) -> io::Error {
    let period = config
        .checkpoint_period
        .expect("record mode requires a checkpoint period")
        .as_secs();
    let mut command = Command::new("dmtcp_launch");
    command
        .arg("-i")
        .arg(period.to_string())
        .arg(&config.target_executable)
        .args(&config.target_args)
        .env(protocol::ENV_RECORD, "1");
    println!("Recording: {}", config.target_executable.display());
    command.exec()
}

fn do_model_checking(config: &CheckerConfig) -> Result<SearchReport, CheckerError> {
    let target = Target::new(&config.target_executable, config.target_args.clone());
    let source = ForkProcessSource::new(target).with_child_env(config.child_environment());

    let mut coordinator = Coordinator::new(
        ProgramModel::starting_at_main(),
        TransitionRegistry::standard(),
        Box::new(source),
    )
    .map_err(CheckerError::Runtime)?;

    let output_dir = config.output_dir.clone();
    let mut callbacks = SearchCallbacks {
        trace_completed: Some(Box::new(move |model, trace_id, outcome| {
            report::print_trace(model, trace_id, outcome);
            if let Some(dir) = &output_dir {
                let record = TraceRecord::from_model(model, trace_id, outcome);
                if let Err(e) = report::write_trace_record(dir, &record) {
                    warn!("failed to write trace {trace_id}: {e}");
                }
            }
        })),
        undefined_behavior: Some(Box::new(|model, trace_id, ub| {
            eprintln!("UNDEFINED BEHAVIOR:\n{}", ub.message());
            print!("{}", report::format_trace(model, trace_id));
            use io::Write as _;
            let _ = io::stdout().flush();
        })),
    };

    let mut engine = ClassicDpor::new(config.dpor());
    engine.verify_using(&mut coordinator, &mut callbacks)
}
