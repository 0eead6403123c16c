//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(author, version, about = "Watch containers for filesystem drift and restore them from snapshots", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: SubCommand,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "WARDEN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Container runtime command line client
    #[arg(long, global = true, env = "WARDEN_RUNTIME")]
    pub runtime: Option<String>,

    /// Output format as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log filter, e.g. `info` or `warden=debug`
    #[arg(long, global = true, env = "WARDEN_LOG", default_value = "info")]
    pub log: String,

    /// Do not check or fix runtime access before supervising
    #[arg(long, global = true, env = "WARDEN_SKIP_BOOTSTRAP")]
    pub skip_bootstrap: bool,

    /// Set on the process restarted by the bootstrap
    #[arg(long, global = true, hide = true)]
    pub post_reexec: bool,
}

#[derive(Subcommand, Debug)]
pub enum SubCommand {
    /// Supervise a single unit
    Watch {
        /// Unit (container) name
        unit: String,

        /// Snapshot artifact to restore from; detection only when absent
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Image contained in the snapshot, when it differs from the file name
        #[arg(long, requires = "snapshot")]
        image: Option<String>,

        /// Seconds between integrity checks
        #[arg(long, short, env = "WARDEN_INTERVAL")]
        interval: Option<u64>,
    },

    /// Supervise several units, each in its own loop
    WatchAll {
        /// Units to supervise, comma separated; discovered when omitted
        #[arg(long, value_delimiter = ',')]
        units: Vec<String>,

        /// Which discovered units to supervise: `all` or 1-based indexes such as `1,3`
        #[arg(long, default_value = "all")]
        select: String,

        /// Snapshot for one unit
        #[arg(long = "snapshot", value_name = "UNIT=PATH")]
        snapshots: Vec<String>,

        /// Directory holding `<unit>.tar` snapshots
        #[arg(long, env = "WARDEN_SNAPSHOT_DIR")]
        snapshot_dir: Option<PathBuf>,

        /// Seconds between integrity checks
        #[arg(long, short, env = "WARDEN_INTERVAL")]
        interval: Option<u64>,
    },

    /// List running units
    Units,

    /// Print the filesystem fingerprint of a unit
    Fingerprint {
        /// Unit (container) name
        unit: String,
    },

    /// Show the recommended base image for a host
    Resolve {
        /// Distribution family; the current host is detected when omitted
        #[arg(long)]
        family: Option<String>,

        /// Distribution version
        #[arg(long, requires = "family")]
        version: Option<String>,
    },

    /// Check runtime access, installing and fixing permissions if needed
    Bootstrap,
}

impl SubCommand {
    /// Whether the command talks to the container runtime
    pub fn needs_runtime(&self) -> bool {
        !matches!(self, SubCommand::Resolve { .. })
    }
}
