use std::{
    io::{self, Write},
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
    thread::sleep,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use bpf_prog_input::{
    BpfProgInput, GatherSummary, KernelRegistry, LineProtocol, OpenMetrics,
};
use clap::Parser;
use nix::{
    libc,
    sys::signal::{signal, SigHandler, Signal},
    unistd::Uid,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{sample_config, AgentConfig, Output};

mod config;

/// Set once SIGINT or SIGTERM is received.
static TERMINATE: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(author, version, about = "Reports loaded eBPF programs as bpf_prog metrics", long_about = None)]
struct Args {
    /// YAML configuration file.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Record encoding, overrides the configuration file.
    #[arg(short, long, value_enum)]
    output: Option<Output>,

    /// Run a single collection cycle and exit.
    #[arg(long)]
    once: bool,

    /// Log to the systemd journal instead of stderr.
    #[arg(long)]
    journald: bool,

    /// Print a sample configuration and exit.
    #[arg(long)]
    sample_config: bool,
}

/// Where gathered records go.
enum Sink {
    Influx,
    OpenMetrics(OpenMetrics),
}

impl Sink {
    fn new(output: Output) -> Self {
        match output {
            Output::Influx => Self::Influx,
            Output::Openmetrics => Self::OpenMetrics(OpenMetrics::new()),
        }
    }

    /// Runs one collection cycle and writes its records to stdout.
    fn cycle(&mut self, input: &BpfProgInput<KernelRegistry>) -> Result<GatherSummary> {
        match self {
            Self::Influx => {
                let mut out = LineProtocol::new(io::stdout().lock());
                let summary = input.gather(&mut out)?;
                drop(out.finish().context("failed to write records")?);
                Ok(summary)
            }
            Self::OpenMetrics(metrics) => {
                let summary = input.gather(metrics)?;
                let mut buffer = String::new();
                metrics.export(&mut buffer)?;
                io::stdout()
                    .lock()
                    .write_all(buffer.as_bytes())
                    .context("failed to write records")?;
                Ok(summary)
            }
        }
    }
}

extern "C" fn handle_signal(_: libc::c_int) {
    TERMINATE.store(true, Ordering::Relaxed);
}

fn install_signal_handlers() -> Result<()> {
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        // The handler only stores to an atomic, which is async-signal-safe
        unsafe { signal(sig, SigHandler::Handler(handle_signal)) }
            .with_context(|| format!("failed to install {sig} handler"))?;
    }
    Ok(())
}

/// Sleeps for `duration`, returning `false` early if termination was requested.
///
/// A `duration` too large to reach is waited out until termination.
fn wait(duration: Duration) -> bool {
    const SLICE: Duration = Duration::from_millis(200);

    let deadline = Instant::now().checked_add(duration);
    while !TERMINATE.load(Ordering::Relaxed) {
        let Some(deadline) = deadline else {
            sleep(SLICE);
            continue;
        };
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        sleep((deadline - now).min(SLICE));
    }
    false
}

fn init_logging(journald: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if journald {
        let journald_layer = tracing_journald::layer().context("failed to connect to journald")?;
        registry.with(journald_layer).init();
    } else {
        registry.with(fmt::layer().with_writer(io::stderr)).init();
    }
    Ok(())
}

fn run(args: &Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::default(),
    };
    if let Some(output) = args.output {
        config.output = output;
    }

    if !Uid::effective().is_root() {
        warn!("not running as root, loaded programs are likely not visible");
    }
    install_signal_handlers()?;

    let mut input = BpfProgInput::with_config(KernelRegistry, config.prog_config());
    input.initialize();
    let mut sink = Sink::new(config.output);
    info!(interval = config.interval, output = ?config.output, "collecting bpf_prog metrics");

    let result = loop {
        let started = Instant::now();
        match sink.cycle(&input) {
            Ok(summary) => debug!(
                emitted = summary.emitted,
                skipped = summary.skipped,
                "collection cycle done"
            ),
            Err(err) if args.once => break Err(err),
            Err(err) => error!("{err:#}"),
        }
        if args.once || !wait(config.interval().saturating_sub(started.elapsed())) {
            break Ok(());
        }
    };

    input.shutdown();
    result
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.sample_config {
        print!("{}", sample_config());
        return Ok(());
    }

    init_logging(args.journald)?;
    run(&args)
}
