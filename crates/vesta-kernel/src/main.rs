//! Vesta kernel - executes code snippets sent as line-delimited JSON.
//!
//! Requests arrive on stdin, responses leave on stdout, logs go to stderr.

mod signal;

use std::io;

use clap::Parser;
use vesta_core::{
    DEFAULT_MAX_CALL_DEPTH, Kernel, KernelConfig, MAX_CALL_DEPTH_LIMIT, RestartPolicy,
};

#[derive(Parser)]
#[command(name = "vesta-kernel")]
#[command(about = "Line-delimited JSON execution kernel")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Make `restart` discard all bindings instead of only acknowledging
    #[arg(long)]
    reset_on_restart: bool,

    /// Do not interrupt running snippets on SIGINT
    #[arg(long)]
    no_sigint: bool,

    /// Maximum nesting of script function calls
    #[arg(long, default_value_t = DEFAULT_MAX_CALL_DEPTH, value_parser = parse_call_depth)]
    max_call_depth: usize,
}

fn parse_call_depth(value: &str) -> Result<usize, String> {
    let depth: usize = value.parse().map_err(|e: std::num::ParseIntError| e.to_string())?;
    if (1..=MAX_CALL_DEPTH_LIMIT).contains(&depth) {
        Ok(depth)
    } else {
        Err(format!("must be between 1 and {}", MAX_CALL_DEPTH_LIMIT))
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for protocol lines
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let config = KernelConfig {
        restart_policy: if cli.reset_on_restart {
            RestartPolicy::ResetContext
        } else {
            RestartPolicy::Acknowledge
        },
        max_call_depth: cli.max_call_depth,
    };

    let mut kernel = Kernel::new(config);
    if !cli.no_sigint {
        signal::install(kernel.abort_handle());
    }

    kernel
        .serve(io::stdin().lock(), io::stdout().lock())
        .map_err(|err| anyhow::anyhow!("{}", err.with_hint()))?;
    Ok(())
}
