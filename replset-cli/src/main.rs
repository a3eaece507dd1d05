//! replctl -- operate a primary/secondary replica set from an inventory file.
//!
//! Every subcommand is a one-shot run: it scans the listed servers, does its
//! work against whichever node is primary right now, and exits.

mod inventory;
mod render;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use inventory::Inventory;
use replset_controller::{
    poll_budget, ControlError, ControllerConfig, ErrorClass, ReconfigMode, ReplicaSetController,
    ScanMode,
};
use replset_core::MemberId;
use replset_network::TcpAdminConnector;

#[derive(Parser, Debug)]
#[command(name = "replctl", version, about = "Replica-set topology controller")]
struct Cli {
    /// Path to the YAML inventory of servers.
    #[arg(short, long, default_value = "mongo_servers.yml")]
    inventory: String,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long)]
    verbose: bool,

    /// Upper bound for a single leadership probe.
    #[arg(long, default_value_t = 3000)]
    probe_timeout_ms: u64,

    /// Upper bound for each administrative command.
    #[arg(long, default_value_t = 10000)]
    command_timeout_ms: u64,

    /// Probe every server at once instead of one after another.
    #[arg(long)]
    parallel_scan: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the leadership of every server and the replica-set status.
    Status,
    /// Print the address of the current primary.
    Primary,
    /// Initiate the replica set through the first listed server.
    Init,
    /// Bring the member list in line with the inventory.
    Reconcile {
        /// Override or add a member binding, as ID=HOST.
        #[arg(long = "member", value_parser = parse_member)]
        members: Vec<(MemberId, String)>,

        /// Drop a member by id.
        #[arg(long = "remove")]
        removed: Vec<u32>,

        /// Submit with force, for sets that have lost their majority.
        #[arg(long)]
        force: bool,

        /// Show the planned change without submitting it.
        #[arg(long)]
        dry_run: bool,

        /// Status polls to wait for the members to settle.
        #[arg(long)]
        poll_attempts: Option<u32>,

        #[arg(long)]
        poll_interval_ms: Option<u64>,

        /// Overall time limit for polling, whatever the attempt count.
        #[arg(long)]
        poll_deadline_ms: Option<u64>,
    },
    /// Create the inventory's application user on the primary.
    CreateUser,
}

fn parse_member(value: &str) -> Result<(MemberId, String), String> {
    let (id, host) = value
        .split_once('=')
        .ok_or_else(|| format!("expected ID=HOST, got '{}'", value))?;
    let id: u32 = id
        .trim()
        .parse()
        .map_err(|_| format!("member id '{}' is not a number", id))?;
    let host = host.trim();
    if host.is_empty() {
        return Err(format!("member {} has an empty host", id));
    }
    Ok((MemberId::new(id), host.to_string()))
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn exit_code(class: ErrorClass) -> u8 {
    match class {
        ErrorClass::NotFound => 2,
        ErrorClass::Reconfig => 3,
        ErrorClass::Bootstrap => 4,
        _ => 1,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            let code = err
                .downcast_ref::<ControlError>()
                .map(|e| exit_code(e.class()))
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    info!("Loading inventory from {}", cli.inventory);
    let inventory = Inventory::load(&cli.inventory)?;
    let candidates = inventory.candidates();

    let mut config = ControllerConfig::new()
        .with_probe_timeout(Duration::from_millis(cli.probe_timeout_ms))
        .with_command_timeout(Duration::from_millis(cli.command_timeout_ms));
    if cli.parallel_scan {
        config = config.with_scan_mode(ScanMode::Parallel);
    }

    match cli.command {
        Command::Status => {
            let controller = ReplicaSetController::new(TcpAdminConnector::default(), config);
            let report = controller.status(&candidates).await?;
            print!("{}", render::cluster_status(&report));
        }
        Command::Primary => {
            let controller = ReplicaSetController::new(TcpAdminConnector::default(), config);
            let located = controller.find_primary(&candidates).await?;
            print!("{}", render::primary(&located));
        }
        Command::Init => {
            let controller = ReplicaSetController::new(TcpAdminConnector::default(), config);
            let seed = candidates
                .first()
                .context("inventory lists no servers")?;
            let report = controller
                .bootstrap(seed, &inventory.initial_config())
                .await?;
            print!("{}", render::bootstrap(&report));
        }
        Command::Reconcile {
            members,
            removed,
            force,
            dry_run,
            poll_attempts,
            poll_interval_ms,
            poll_deadline_ms,
        } => {
            if force {
                config = config.with_reconfig_mode(ReconfigMode::Forced);
            }
            if let Some(attempts) = poll_attempts {
                config = config.with_poll_attempts(attempts);
            }
            if let Some(ms) = poll_interval_ms {
                config = config.with_poll_interval(Duration::from_millis(ms));
            }
            if let Some(ms) = poll_deadline_ms {
                config = config.with_poll_deadline(Duration::from_millis(ms));
            }

            let mut desired = inventory.desired_topology();
            for (id, host) in members {
                desired.set_member(id, host);
            }
            for id in removed {
                desired = desired.with_removed(id);
            }
            debug!(?desired, "desired topology");

            let budget = poll_budget(&config);
            let controller = ReplicaSetController::new(TcpAdminConnector::default(), config);
            if dry_run {
                let plan = controller.plan(&candidates, &desired).await?;
                print!("{}", render::plan(&plan));
            } else {
                let report = controller.reconcile(&candidates, &desired).await?;
                print!("{}", render::reconcile(&report, budget));
            }
        }
        Command::CreateUser => {
            let user = inventory
                .app_user()
                .context("inventory has no app_user section")?;
            let controller = ReplicaSetController::new(TcpAdminConnector::default(), config);
            let outcome = controller.ensure_user(&candidates, &user).await?;
            print!(
                "{}",
                render::provision(outcome, &user.database, &user.username)
            );
        }
    }
    Ok(())
}
