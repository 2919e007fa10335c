//! AD9081 Processed-Input Patch Test
//!
//! Connects to an AD9081 over libiio and checks that the driver keeps the
//! DDS, streamed-buffer and processed/input modes mutually exclusive.
//!
//! # Usage Examples
//!
//! ## Local context, default 8 pairs
//! ```bash
//! ad9081-patch-test -v
//! ```
//!
//! ## Remote board, apply default NCO and tone tables first
//! ```bash
//! ad9081-patch-test --uri ip:192.168.2.1 --setup -vv
//! ```
//!
//! ## Driver that keeps the last tone request after a release
//! ```bash
//! ad9081-patch-test --release table
//! ```

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use tracing::{error, info, warn};

use ad9081_tx::config::{
    DEFAULT_RX_PATHS, DEFAULT_TONES, DEFAULT_TX_CHANNELS, DEFAULT_TX_PATHS, MAX_TX_CHANNELS,
};
use ad9081_tx::prelude::*;
use ad9081_tx::selftest::{ReleaseCheck, SelfTestOptions};
use ad9081_tx::{selftest, setup};

/// Register contents expected once a pair is released
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Release {
    /// Back on the tone generator (0x0), as the patched board driver does
    Dds,
    /// Follow the last tone request (0x0 with raw on, 0x3 with raw off)
    Table,
}

impl From<Release> for ReleaseCheck {
    fn from(release: Release) -> Self {
        match release {
            Release::Dds => Self::Dds,
            Release::Table => Self::Table,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "ad9081-patch-test",
    version,
    about = "AD9081 transmit mode arbitration test",
    after_help = "The patched driver on AD9081 boards puts a pair back on the DDS tone \
                  generator when a buffer is destroyed or processed/input is disabled. \
                  Use --release table for a driver that keeps the last raw request."
)]
struct Args {
    /// IIO context URI (e.g. ip:192.168.2.1), local context when omitted
    #[arg(short, long)]
    uri: Option<String>,

    /// Number of I/Q pairs to test
    #[arg(
        short,
        long,
        default_value_t = DEFAULT_TX_CHANNELS,
        value_parser = clap::value_parser!(u8)
            .range(1..=MAX_TX_CHANNELS as i64)
            .map(usize::from)
    )]
    channels: usize,

    /// Register contents expected after a buffer or processed/input release
    #[arg(long, value_enum, default_value_t = Release::Dds)]
    release: Release,

    /// Apply the default NCO and DDS tone tables before testing
    #[arg(long, default_value_t = false)]
    setup: bool,

    /// Verbosity level (-v=info, -vv=debug, -vvv=trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // 0 = WARN (quiet), 1 = INFO, 2 = DEBUG, 3+ = TRACE
    let log_level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    let _ = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();

    match run(&args) {
        Ok(report) => {
            println!(
                "Test completed successfully: {} steps, {} registers verified, {} refusals",
                report.steps, report.registers_verified, report.refusals
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err:#}");
            eprintln!("Test failure: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<selftest::SelfTestReport> {
    info!("AD9081 patch test v{}", env!("CARGO_PKG_VERSION"));

    let backend = IioBackend::connect(args.uri.as_deref())
        .context("could not open the AD9081 devices")?;
    let config = TxConfig::with_channels(args.channels);
    let mut arbiter = ModeArbiter::discover(backend, config)
        .context("could not find all the AD9081 channels")?;
    info!(channels = arbiter.channel_count(), "channels loaded");

    if args.setup {
        let summary = setup::configure_rx_paths(&mut arbiter, &DEFAULT_RX_PATHS)
            .merge(setup::configure_tx_paths(&mut arbiter, &DEFAULT_TX_PATHS))
            .merge(setup::configure_tones(&mut arbiter, &DEFAULT_TONES));
        if summary.is_clean() {
            info!(writes = summary.writes, "default configuration applied");
        } else {
            warn!(
                writes = summary.writes,
                failures = summary.failures,
                "default configuration incomplete"
            );
        }
    }

    let options = SelfTestOptions {
        release: args.release.into(),
    };
    let report = selftest::run_with(&mut arbiter, options)?;
    Ok(report)
}
