//! `kbridge`
//!
//! Runs one kernel session driven by JSON-lines commands on stdin and
//! writes relayed kernel output as JSON lines to stdout.

use std::path::PathBuf;

use clap::Parser;
use tokio::io::BufReader;
use tracing::info;

use kbridge_core::config::{self, Config, ReadinessMode};
use kbridge_session::host::run_host;
use kbridge_session::{JsonLinesChannel, KernelSession, ProcessEngine};

#[derive(Parser, Debug)]
#[command(name = "kbridge")]
#[command(version, about = "kbridge - relay notebook cells to a kernel process")]
struct Args {
    /// Settings file; replaces the global/project lookup.
    #[arg(long, env = "KBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Runtime-name tag of the kernel (e.g. "groovy").
    #[arg(long)]
    kernel_name: Option<String>,

    /// Kernel command line, whitespace separated.
    #[arg(long)]
    kernel_cmd: Option<String>,

    /// Per-event wait while draining kernel output, in milliseconds.
    #[arg(long)]
    drain_timeout_ms: Option<u64>,

    /// Upper bound on waiting for an execute reply, in seconds.
    #[arg(long)]
    reply_timeout_secs: Option<u64>,

    /// How kernel readiness is established.
    #[arg(long, value_parser = ["auto", "kernel-info", "settle"])]
    readiness: Option<String>,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "KBRIDGE_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(name) = &self.kernel_name {
            config.kernel.name.clone_from(name);
        }
        if let Some(cmd) = &self.kernel_cmd {
            let argv: Vec<String> = cmd.split_whitespace().map(String::from).collect();
            if !argv.is_empty() {
                config.kernel.argv = argv;
            }
        }
        if let Some(ms) = self.drain_timeout_ms {
            config.session.drain_timeout_ms = ms;
        }
        if let Some(secs) = self.reply_timeout_secs {
            config.session.reply_timeout_secs = Some(secs);
        }
        match self.readiness.as_deref() {
            Some("kernel-info") => config.session.readiness = ReadinessMode::KernelInfo,
            Some("settle") => config.session.readiness = ReadinessMode::Settle,
            Some("auto") => config.session.readiness = ReadinessMode::Auto,
            _ => {}
        }
        if let Some(level) = &self.log_level {
            config.log_level.clone_from(level);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config(std::env::current_dir().ok().as_deref())?,
    };
    args.apply(&mut config);

    kbridge_core::tracing_init::init_tracing(
        &kbridge_core::tracing_init::default_filter(&config.log_level),
        args.log_json,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        runtime = %config.kernel.name,
        "Starting kbridge"
    );

    let engine = ProcessEngine::new(config.kernel.clone());
    let channel = JsonLinesChannel::new(std::io::stdout(), std::io::stderr());
    let mut session = KernelSession::new(engine, channel, &config.session);

    let input = BufReader::new(tokio::io::stdin());
    tokio::select! {
        result = run_host(&mut session, input) => {
            let summary = result?;
            info!(
                cells = summary.cells,
                routed = summary.routed,
                dropped = summary.dropped,
                failures = summary.failures,
                "Host input finished"
            );
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
    }

    session.shutdown().await?;
    info!("kbridge stopped");
    Ok(())
}
