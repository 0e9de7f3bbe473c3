//! fleet-sim — runs a fleet build against the in-memory spot market.
//!
//! # Usage
//!
//! ```text
//! fleet-sim run --config demos/fleet-sim/fleet.toml
//! fleet-sim run --config fleet.toml --price m4.large@us-west-2b=0.031 --poll-errors 2
//! fleet-sim check --config fleet.toml
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use spotfleet_core::{FleetConfig, InstanceRequirement};
use spotfleet_provider::SimulatedProvider;
use spotfleet_provision::{DiskLayoutTable, FleetController, plan_batches};

#[derive(Parser)]
#[command(name = "fleet-sim", about = "Spot fleet provisioning against a simulated market")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Provision every requirement in the fleet file and print the report.
    Run {
        /// Path to fleet.toml.
        #[arg(long, default_value = "fleet.toml")]
        config: PathBuf,

        /// Spot price for one zone, as TYPE@ZONE=PRICE. Repeatable.
        /// Types without an explicit price get a synthetic ladder.
        #[arg(long = "price")]
        prices: Vec<String>,

        /// Fail this many poll calls at the start of the run.
        #[arg(long, default_value = "0")]
        poll_errors: usize,

        /// Print the report as compact JSON.
        #[arg(long)]
        compact: bool,
    },
    /// Validate the fleet file and show the batch plan without bidding.
    Check {
        #[arg(long, default_value = "fleet.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,spotfleet_provision=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            prices,
            poll_errors,
            compact,
        } => run(config, prices, poll_errors, compact).await,
        Command::Check { config } => check(config),
    }
}

async fn run(
    path: PathBuf,
    prices: Vec<String>,
    poll_errors: usize,
    compact: bool,
) -> anyhow::Result<()> {
    let config = load(&path)?;
    if config.requirements.is_empty() {
        bail!("{} lists no requirements", path.display());
    }

    let explicit = prices
        .iter()
        .map(|p| parse_price(p))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let provider = seed_market(&config, &explicit).with_poll_errors(poll_errors);

    let controller = FleetController::new(provider, &config)?;
    let report = controller.start_instances(&config.requirements).await?;

    info!(
        running = report.instance_ids().len(),
        bids = controller.api().bids().len(),
        tag_calls = controller.api().tag_calls().len(),
        "simulation finished"
    );

    let out = if compact {
        serde_json::to_string(&report)?
    } else {
        serde_json::to_string_pretty(&report)?
    };
    println!("{out}");
    Ok(())
}

fn check(path: PathBuf) -> anyhow::Result<()> {
    let config = load(&path)?;
    let timings = config.timing.resolve()?;
    let layouts = DiskLayoutTable::builtin().with_overrides(&config.disk_layouts);
    layouts.validate(config.storage.as_ref())?;

    println!("{}: ok", path.display());
    println!("zones: {}", config.network.zones().collect::<Vec<_>>().join(", "));
    for req in &config.requirements {
        let batches = plan_batches(req.desired_count, timings.batch_size);
        println!(
            "  {} x{} @ ${:.4}  ephemeral={} batches={:?}",
            req.instance_type,
            req.desired_count,
            req.max_bid_price,
            layouts.ephemeral_disks(&req.instance_type),
            batches
        );
    }
    Ok(())
}

fn load(path: &Path) -> anyhow::Result<FleetConfig> {
    FleetConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

struct PriceArg {
    instance_type: String,
    zone: String,
    price: f64,
}

/// Parse `TYPE@ZONE=PRICE`.
fn parse_price(s: &str) -> anyhow::Result<PriceArg> {
    let (target, price) = s
        .split_once('=')
        .with_context(|| format!("expected TYPE@ZONE=PRICE, got {s:?}"))?;
    let (instance_type, zone) = target
        .split_once('@')
        .with_context(|| format!("expected TYPE@ZONE=PRICE, got {s:?}"))?;
    let price = price
        .parse::<f64>()
        .with_context(|| format!("invalid price in {s:?}"))?;
    Ok(PriceArg {
        instance_type: instance_type.to_string(),
        zone: zone.to_string(),
        price,
    })
}

/// Build the simulated market. Explicit prices win; any requirement
/// type left unpriced gets a ladder from 60% of its bid upward across
/// the configured zones.
fn seed_market(config: &FleetConfig, explicit: &[PriceArg]) -> SimulatedProvider {
    let mut provider = SimulatedProvider::new();

    let mut types: Vec<&str> = config
        .requirements
        .iter()
        .map(|r| r.instance_type.as_str())
        .chain(explicit.iter().map(|p| p.instance_type.as_str()))
        .collect();
    types.sort_unstable();
    types.dedup();

    for instance_type in types {
        let given: Vec<(&str, f64)> = explicit
            .iter()
            .filter(|p| p.instance_type == instance_type)
            .map(|p| (p.zone.as_str(), p.price))
            .collect();

        let prices = if given.is_empty() {
            let bid = highest_bid(&config.requirements, instance_type);
            config
                .network
                .zones()
                .enumerate()
                .map(|(i, zone)| (zone, bid * (0.6 + 0.15 * i as f64)))
                .collect()
        } else {
            given
        };
        provider = provider.with_prices(instance_type, &prices);
    }
    provider
}

fn highest_bid(requirements: &[InstanceRequirement], instance_type: &str) -> f64 {
    requirements
        .iter()
        .filter(|r| r.instance_type == instance_type)
        .map(|r| r.max_bid_price)
        .fold(0.0, f64::max)
}
