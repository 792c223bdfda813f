//! mockcloud - inspect and exercise the in-memory cloud
//!
//! ## Usage
//!
//! ```bash
//! # Static catalogs
//! mockcloud regions
//! mockcloud products
//!
//! # Validate a YAML config
//! mockcloud check-config mockcloud.yaml
//!
//! # Launch 5 VMs, drive 20 monitor passes, print the final states
//! mockcloud simulate --vms 5 --ticks 20 --seed 7
//! mockcloud simulate --vms 3 --ticks 2 --forced --json
//! ```

use clap::{Parser, Subcommand};
use mockcloud::{
    Architecture, LaunchOptions, ManualClock, MockCloud, MockCloudConfig, MonitorConfig,
    ProviderContext, ThreadRandom, VirtualMachine, VmState,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Mock cloud: in-memory VM lifecycle simulator
#[derive(Parser)]
#[command(name = "mockcloud")]
#[command(about = "In-memory mock cloud provider", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List regions and their data centers
    Regions,

    /// List VM products
    Products,

    /// Load and validate a YAML config file
    CheckConfig {
        /// Config file path
        path: PathBuf,
    },

    /// Launch VMs and drive the monitor
    Simulate {
        /// Number of VMs to launch
        #[arg(long, default_value_t = 3)]
        vms: usize,

        /// Monitor passes to run
        #[arg(long, default_value_t = 10)]
        ticks: u32,

        /// Region to launch in
        #[arg(long, default_value = "usmn")]
        region: String,

        /// Account that owns the VMs
        #[arg(long, default_value = "000000000001")]
        account: String,

        /// Config file (defaults apply when omitted)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Advance every eligible VM on every pass and never crash
        #[arg(long)]
        forced: bool,

        /// Seed for the monitor's random draws
        #[arg(long)]
        seed: Option<u64>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct SimulationReport {
    region: String,
    account: String,
    ticks: u32,
    advanced: usize,
    crashed: Vec<String>,
    states: BTreeMap<String, usize>,
    vms: Vec<VirtualMachine>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mockcloud=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Regions => list_regions(),
        Commands::Products => list_products(),
        Commands::CheckConfig { path } => check_config(path),
        Commands::Simulate {
            vms,
            ticks,
            region,
            account,
            config,
            forced,
            seed,
            json,
        } => simulate(vms, ticks, region, account, config, forced, seed, json),
    }
}

fn list_regions() -> anyhow::Result<()> {
    let cloud = MockCloud::builder().build()?;
    let dcs = cloud.data_centers();

    for region in dcs.list_regions()? {
        println!(
            "{:<6} {:<8} {:<3} active={:<5} available={}",
            region.id, region.name, region.jurisdiction, region.active, region.available
        );
        for dc in dcs.list_data_centers(&region.id)? {
            println!(
                "    {:<8} {:<18} active={:<5} available={}",
                dc.id, dc.name, dc.active, dc.available
            );
        }
    }
    Ok(())
}

fn list_products() -> anyhow::Result<()> {
    let cloud = MockCloud::builder().build()?;
    for product in cloud.vms().list_products(Architecture::I64) {
        println!(
            "{:<7} {:<7} {:<28} ${:.2}/h",
            product.id, product.name, product.description, product.hourly_rate
        );
    }
    Ok(())
}

fn check_config(path: PathBuf) -> anyhow::Result<()> {
    let config = MockCloudConfig::load(&path)?;
    info!(path = %path.display(), "Config is valid");
    print!("{}", config.to_yaml_string()?);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn simulate(
    vm_count: usize,
    ticks: u32,
    region: String,
    account: String,
    config_path: Option<PathBuf>,
    forced: bool,
    seed: Option<u64>,
    json: bool,
) -> anyhow::Result<()> {
    let mut config = match &config_path {
        Some(path) => MockCloudConfig::load(path)?,
        None => MockCloudConfig::default(),
    };
    if forced {
        config = config.with_monitor(MonitorConfig::deterministic());
    }

    let clock = ManualClock::starting_now();
    let random = seed.map(ThreadRandom::seeded).unwrap_or_default();
    let cloud = MockCloud::builder()
        .with_config(config)
        .with_clock(clock.clone())
        .with_random(random)
        .build()?;

    let ctx = ProviderContext::new("https://mockcloud.local", region.clone(), account.clone());
    let compute = cloud.compute(ctx);
    let interval = cloud.config().monitor.interval;

    for n in 0..vm_count {
        let options = LaunchOptions::new(format!("{}-1", region), "small", format!("sim-{}", n + 1));
        let vm = compute.launch(&options)?;
        debug!(vm_id = %vm.id, "Launched simulation VM");
    }

    let mut advanced = 0;
    let mut crashed = Vec::new();
    for pass in 0..ticks {
        clock.advance(interval);
        let report = cloud.tick();
        advanced += report.advanced.len();
        if !report.crashed.is_empty() {
            warn!(pass, crashed = ?report.crashed, "VMs crashed during simulation");
        }
        crashed.extend(report.crashed);
    }

    let vms = compute.list_virtual_machines()?;
    let mut states: BTreeMap<String, usize> = BTreeMap::new();
    for vm in &vms {
        *states.entry(vm.state.to_string()).or_default() += 1;
    }

    let report = SimulationReport {
        region,
        account,
        ticks,
        advanced,
        crashed,
        states,
        vms,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Region {} / account {}: {} passes, {} advances, {} crashes",
        report.region,
        report.account,
        report.ticks,
        report.advanced,
        report.crashed.len()
    );
    for vm in &report.vms {
        let marker = if vm.state == VmState::Running { "*" } else { " " };
        println!(
            "{} {:<10} {:<11} {:<15} {}",
            marker,
            vm.id,
            vm.state.to_string(),
            vm.private_ip.as_deref().unwrap_or("-"),
            vm.public_ip.as_deref().unwrap_or("-")
        );
    }
    for (state, count) in &report.states {
        println!("  {:<11} {}", state, count);
    }
    Ok(())
}
