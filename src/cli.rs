// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use pdo::types::{Color, ImageDigest};

#[derive(Parser)]
#[command(name = "pdo")]
#[command(about = "Progressive blue/green rollouts with health-gated traffic shifting")]
#[command(version)]
pub struct Cli {
    /// Path to the config file (default: discover pdo.yml in the current directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print the final result
    #[arg(short, long, global = true, conflicts_with = "json")]
    pub quiet: bool,

    /// Print JSON lines instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new pdo.yml configuration file
    Init {
        /// Service name to write into the template
        #[arg(short, long)]
        service: Option<String>,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Record the version already serving production as the stable baseline
    Adopt {
        /// Image digest of the running version (sha256:...)
        digest: ImageDigest,

        /// Slot the running version occupies
        #[arg(long, default_value = "blue")]
        color: Color,

        /// Replica count (default: from config)
        #[arg(long)]
        replicas: Option<u32>,
    },

    /// Roll out a new image digest and wait for it to finish
    Deploy {
        /// Image digest to roll out (sha256:... or repo@sha256:...)
        digest: ImageDigest,
    },

    /// Show deployments, or one deployment in detail
    Status {
        /// Deployment id
        id: Option<String>,
    },

    /// Stop a rollout and roll it back
    Abort {
        /// Deployment id
        id: String,
    },

    /// Continue rollouts interrupted by a previous process
    Resume,

    /// Retry the rollback of a deployment frozen for manual intervention
    RetryRollback {
        /// Deployment id
        id: String,
    },

    /// Delete finished deployment records
    Prune {
        /// Minimum age of records to delete (e.g. "7d", "12h")
        #[arg(long, default_value = "30d", value_parser = humantime::parse_duration)]
        older_than: Duration,
    },
}
