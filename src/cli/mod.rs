//! Command-line surface for fleetroll
//!
//! Without `--fleet` or `--filter` the binary starts the interactive search
//! prompt; otherwise it runs the selected mode once over the named and
//! filtered fleets.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

pub mod display;
pub mod interactive;

pub use display::*;

use crate::fleet::BalancerKind;
use crate::rollout::RunMode;

#[derive(Parser, Debug)]
#[command(name = "fleetroll")]
#[command(about = "Rolling capacity updates for auto-scaled fleets behind load balancers")]
#[command(version)]
pub struct Args {
    /// Enable verbose logging output (-v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Path to config file (default: ~/.fleetroll/config.yaml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Path to a .env file for loading API keys
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    /// Cloud profile from the config file
    #[arg(long, env = "FLEETROLL_PROFILE")]
    pub profile: Option<String>,

    /// Override the configured regions (repeatable)
    #[arg(long = "region", value_name = "REGION")]
    pub regions: Vec<String>,

    /// Log every action without mutating anything
    #[arg(long)]
    pub dry_run: bool,

    /// Minutes to wait between scale up and the first health check
    #[arg(long = "wait", value_name = "MINUTES", default_value = "5")]
    pub wait_minutes: u64,

    /// Fleet to update (repeatable)
    #[arg(long = "fleet", visible_alias = "asg", value_name = "NAME")]
    pub fleets: Vec<String>,

    /// Tag filter KEY==VALUE[,KEY==VALUE...] (repeatable, groups are OR'd)
    #[arg(long = "filter", value_name = "EXPR")]
    pub filters: Vec<String>,

    /// Fleets sit behind target groups rather than classic balancers
    #[arg(long, visible_alias = "is-alb")]
    pub target_group: bool,

    /// Drain to zero, then restore each fleet
    #[arg(long, conflicts_with_all = ["scale_down", "scale_up"])]
    pub worker_node: bool,

    /// Drain every fleet to zero and leave it there
    #[arg(long, conflicts_with = "scale_up")]
    pub scale_down: bool,

    /// Pin every fleet to --desired-capacity
    #[arg(long)]
    pub scale_up: bool,

    /// Capacity used by --scale-up
    #[arg(long, value_name = "N", default_value = "0")]
    pub desired_capacity: u32,

    /// Largest capacity change applied in one step
    #[arg(long, value_name = "N", default_value = "10", value_parser = clap::value_parser!(u32).range(1..))]
    pub scaler: u32,

    /// Give up after this many polling passes (default: wait indefinitely)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub max_polls: Option<u32>,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

impl Args {
    pub fn run_mode(&self) -> RunMode {
        if self.scale_down {
            RunMode::ScaleDownOnly
        } else if self.scale_up {
            RunMode::ScaleUpOnly {
                capacity: self.desired_capacity,
            }
        } else if self.worker_node {
            RunMode::WorkerNodeReplacement
        } else {
            RunMode::RollingUpdate
        }
    }

    pub fn balancer_kind(&self) -> BalancerKind {
        if self.target_group {
            BalancerKind::TargetGroup
        } else {
            BalancerKind::Classic
        }
    }

    pub fn initial_wait(&self) -> Duration {
        Duration::from_secs(self.wait_minutes.saturating_mul(60))
    }

    /// True when fleets come from the command line rather than the prompt
    pub fn is_batch(&self) -> bool {
        !self.fleets.is_empty() || !self.filters.is_empty()
    }
}
