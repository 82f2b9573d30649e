// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "flotilla")]
#[command(about = "Deployment control plane for Docker Swarm and Kubernetes")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit JSON lines instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Print only final results
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new flotilla.yml configuration file
    Init {
        /// Name of the first application
        #[arg(long)]
        name: Option<String>,

        /// Image of the first application
        #[arg(long)]
        image: Option<String>,

        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Check the health of a cluster
    Health {
        /// Server id from flotilla.yml; the control node when omitted
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Probe which orchestrator a server runs
    Detect {
        /// Server id from flotilla.yml
        #[arg(short, long)]
        server: String,
    },

    /// Deploy an application and wait for the result
    Deploy {
        /// Application name
        app: String,

        /// Rebuild with the current settings instead of a fresh deploy
        #[arg(long)]
        redeploy: bool,
    },

    /// Set the replica count of an application
    Scale {
        /// Application name
        app: String,

        /// Desired replicas
        replicas: u32,
    },

    /// Restart every task or pod of an application
    Restart {
        /// Application name
        app: String,
    },

    /// Show recent cluster events for an application
    Events {
        /// Application name
        app: String,

        /// Maximum number of events to show
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: usize,
    },

    /// Configure horizontal autoscaling (Kubernetes only)
    Autoscale {
        /// Application name
        app: String,

        #[arg(long)]
        min: u32,

        #[arg(long)]
        max: u32,

        /// Target CPU utilization in percent
        #[arg(long)]
        cpu: Option<u32>,
    },
}
