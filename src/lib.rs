//! Shared CLI plumbing for the `sync-seq` and `sync-par` drivers: argument
//! parsing and logging initialization, in the style of the teacher's
//! `src/cli.rs` (derive-based, doc-comments as help text) and `src/main.rs`
//! (`tracing_subscriber::fmt()` init before anything else runs).

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Positional and amortization arguments shared by both drivers (spec §6):
/// `<driver> <path-to-.kth> <min_event_diff_ns> <min_msg_delay_ns>`.
#[derive(Parser, Debug)]
pub struct CommonArgs {
    /// Path to the trace's .kth header file
    pub kth_path: PathBuf,

    /// Minimum nanosecond gap enforced between consecutive events within a process
    pub min_event_diff_ns: u64,

    /// Minimum nanosecond gap enforced between a send and its receive
    pub min_msg_delay_ns: u64,

    /// Disable forward amortization (enabled by default)
    #[clap(long = "no-forward-amort", action = clap::ArgAction::SetFalse, default_value_t = true)]
    pub forward_amort: bool,

    /// Disable backward amortization (enabled by default)
    #[clap(long = "no-backward-amort", action = clap::ArgAction::SetFalse, default_value_t = true)]
    pub backward_amort: bool,

    /// Raise log verbosity (-v debug, -vv trace)
    #[clap(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

pub fn init_logging(verbose: u8) -> Result<()> {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_level.parse()?))
        .init();
    Ok(())
}

impl CommonArgs {
    pub fn sync_config(&self) -> sync_engine::SyncConfig {
        sync_engine::SyncConfig {
            min_event_diff: self.min_event_diff_ns,
            min_msg_delay: self.min_msg_delay_ns,
            forward_amort: self.forward_amort,
            backward_amort: self.backward_amort,
        }
    }
}
