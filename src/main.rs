use std::process;
use std::sync::Arc;

use clap::Parser;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fleetroll::cli::interactive::{read_line, Action, Prompt};
use fleetroll::cli::{
    format_filters, format_fleet_list, format_run_report, format_run_report_json, Args,
};
use fleetroll::cloud::CloudHandles;
use fleetroll::config::{default_config_path, load_config_from, Config};
use fleetroll::fleet::{compile_filters, discover, select_fleets, FleetRegistry};
use fleetroll::gate::CompletionGate;
use fleetroll::health::balancer_for;
use fleetroll::rollout::{production_flag, Orchestrator, SessionOptions, UpdateSession};
use fleetroll::scaling::ScalingController;
use fleetroll::wait::{TokioClock, Waiter};

/// Everything a run needs that stays fixed for the invocation
struct Runtime {
    args: Args,
    config: Config,
    handles: CloudHandles,
    waiter: Waiter,
    production: bool,
}

impl Runtime {
    fn orchestrator(&self) -> Orchestrator {
        let scaling = Arc::new(ScalingController::new(
            self.handles.autoscaling.clone(),
            self.waiter.clone(),
            self.config.scaling_settings(self.args.scaler),
            self.args.dry_run,
            self.production,
        ));
        let gate = CompletionGate::new(
            balancer_for(
                self.args.balancer_kind(),
                self.handles.autoscaling.clone(),
                self.handles.load_balancing.clone(),
            ),
            self.waiter.clone(),
            self.config.retry_policy(self.args.max_polls),
        );
        Orchestrator::new(scaling, gate, self.waiter.clone())
    }

    /// Run the selected mode once; returns false when the run failed
    async fn run(&self, registry: &mut FleetRegistry, targets: Vec<String>) -> bool {
        let options = SessionOptions::new(self.args.run_mode())
            .with_initial_wait(self.args.initial_wait())
            .with_dry_run(self.args.dry_run)
            .with_production(self.production);
        let mut session = UpdateSession::new(targets, options);
        info!(fleets = ?session.targets(), "Fleets selected");

        match self.orchestrator().run(registry, &mut session).await {
            Ok(report) if self.args.json => match format_run_report_json(&report) {
                Ok(json) => {
                    println!("{}", json);
                    true
                }
                Err(e) => {
                    error!("Failed to serialize run report: {}", e);
                    false
                }
            },
            Ok(report) => {
                println!("{}", format_run_report(&report));
                true
            }
            Err(e) if e.is_cancelled() => {
                warn!(remaining = ?session.completed().remaining(session.targets()), "Interrupted");
                false
            }
            Err(e) => {
                error!("Run failed: {}", e);
                false
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = args.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let config = match load_config_from(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load config {}: {}", config_path.display(), e);
            process::exit(1);
        }
    };

    let handles = match config
        .profile(args.profile.as_deref())
        .and_then(|backend| backend.connect())
    {
        Ok(handles) => handles,
        Err(e) => {
            error!("Failed to set up cloud backend: {}", e);
            process::exit(1);
        }
    };

    let account_id = match handles.identity.account_id().await {
        Ok(id) => id,
        Err(e) => {
            error!("Failed to resolve account identity: {}", e);
            process::exit(1);
        }
    };
    let production = production_flag(&account_id, &config.production_accounts);
    info!(account = %account_id, production, "Resolved account");

    let regions = if args.regions.is_empty() {
        config.regions.clone()
    } else {
        args.regions.clone()
    };
    let mut registry = match discover(handles.autoscaling.as_ref(), &regions).await {
        Ok(registry) => registry,
        Err(e) => {
            error!("Failed to list fleets: {}", e);
            process::exit(1);
        }
    };
    info!(fleets = registry.len(), regions = ?regions, "Discovered fleets");

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, stopping after the current call");
            signal_token.cancel();
        }
    });

    let runtime = Runtime {
        waiter: Waiter::new(Arc::new(TokioClock), cancel.clone()),
        args,
        config,
        handles,
        production,
    };

    if runtime.args.is_batch() {
        let groups = match compile_filters(&runtime.args.filters) {
            Ok(groups) => groups,
            Err(e) => {
                error!("Invalid filter: {}", e);
                process::exit(1);
            }
        };
        if !groups.is_empty() {
            println!("{}", format_filters(&groups));
        }

        let mut targets = runtime.args.fleets.clone();
        targets.extend(select_fleets(&registry, &groups));

        if !runtime.run(&mut registry, targets).await {
            process::exit(1);
        }
        return;
    }

    println!("{}", format_fleet_list(&registry));
    println!("{}", Prompt::banner(runtime.args.dry_run));

    let mut prompt = Prompt::new(registry.sorted_names());
    let mut stdin = BufReader::new(tokio::io::stdin());
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = read_line(&mut stdin) => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read input: {}", e);
                process::exit(1);
            }
        };

        match prompt.handle(&line) {
            Action::Print(text) => print!("{}", text),
            Action::List => println!("{}", format_fleet_list(&registry)),
            Action::Run(targets) => {
                runtime.run(&mut registry, targets).await;
                if cancel.is_cancelled() {
                    process::exit(1);
                }
            }
            Action::Exit => break,
            Action::Continue => {}
        }
    }
}
