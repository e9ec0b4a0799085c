//! RouteOrch entry point.
//!
//! Replays a file of route events against an in-memory switch and prints
//! the resulting routes.

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use serde::Deserialize;
use sonic_orch_common::{KeyOpFieldsValues, Operation};
use sonic_routeorch::daemon::{OrchDaemon, OrchDaemonConfig, SharedOrch};
use sonic_routeorch::route::{
    InterfaceDirectory, InterfaceTable, NeighborTable, NextHopKey, RouteCollaborators, RouteOrch,
    RouteOrchConfig, StateTables, VrfDirectory, VrfTable,
};
use sonic_sai::VirtualSwitch;
use sonic_types::IpPrefix;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::Mutex;

/// SONiC route orchestration agent
#[derive(Parser, Debug)]
#[command(name = "routeorch")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// RouteOrch configuration (JSON)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Route events to replay (JSON)
    #[arg(short = 'e', long)]
    events: PathBuf,

    /// Override the maximum number of next-hop groups
    #[arg(long)]
    max_nhg_count: Option<usize>,

    /// Create ordered ECMP groups
    #[arg(long)]
    ordered_ecmp: bool,

    /// Seed for temporary next-hop selection
    #[arg(long)]
    seed: Option<u64>,

    /// Events queued per daemon run
    #[arg(short = 'b', long, default_value = "128")]
    batch_size: usize,

    /// Rounds per batch before giving up on leftover work
    #[arg(long, default_value = "16")]
    max_rounds: usize,
}

#[derive(Debug, Deserialize)]
struct InterfaceSpec {
    name: String,
    #[serde(default)]
    subnets: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Event {
    key: String,
    op: Operation,
    #[serde(default)]
    fields: BTreeMap<String, String>,
}

impl From<Event> for KeyOpFieldsValues {
    fn from(event: Event) -> Self {
        KeyOpFieldsValues::new(event.key, event.op, event.fields.into_iter().collect())
    }
}

/// Topology and events read from `--events`.
#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(default)]
    interfaces: Vec<InterfaceSpec>,
    /// Resolved neighbors as `ip@alias`.
    #[serde(default)]
    neighbors: Vec<String>,
    #[serde(default)]
    vrfs: Vec<String>,
    #[serde(default)]
    l3_vnis: Vec<u32>,
    events: Vec<Event>,
}

fn load_config(args: &Args) -> Result<RouteOrchConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("failed to parse config {}", path.display()))?
        }
        None => RouteOrchConfig::default(),
    };
    if let Some(max) = args.max_nhg_count {
        config.max_nhg_count = max;
    }
    if args.ordered_ecmp {
        config.ordered_ecmp = true;
    }
    if args.seed.is_some() {
        config.rng_seed = args.seed;
    }
    Ok(config)
}

fn load_scenario(path: &Path) -> Result<Scenario> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read events {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse events {}", path.display()))
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    let scenario = load_scenario(&args.events)?;

    let switch = Arc::new(VirtualSwitch::new());
    let interfaces = Arc::new(InterfaceTable::new(switch.clone()));
    let neighbors = Arc::new(NeighborTable::new(switch.clone()));
    let vrfs = Arc::new(VrfTable::new(switch.clone()));
    let state = Arc::new(StateTables::new());

    for iface in scenario.interfaces {
        let subnets = iface
            .subnets
            .iter()
            .map(|s| s.parse::<IpPrefix>().with_context(|| format!("invalid subnet {}", s)))
            .collect::<Result<Vec<_>>>()?;
        interfaces.add_interface(&iface.name, subnets);
    }
    let mut aliases = BTreeSet::new();
    for neighbor in &scenario.neighbors {
        let nexthop: NextHopKey = neighbor
            .parse()
            .with_context(|| format!("invalid neighbor {}", neighbor))?;
        aliases.insert(nexthop.alias().to_string());
        neighbors.add_neighbor(nexthop);
    }
    for alias in aliases {
        if interfaces.router_intf_id(&alias).is_none() {
            interfaces.add_interface(&alias, Vec::new());
        }
    }
    for vrf in &scenario.vrfs {
        vrfs.add_vrf(vrf);
    }
    for vni in scenario.l3_vnis {
        vrfs.add_l3_vni(vni);
    }

    let collaborators = RouteCollaborators::new(
        switch.clone(),
        switch.clone(),
        switch.default_virtual_router(),
        switch.cpu_port(),
        neighbors,
        interfaces,
        vrfs.clone(),
        state,
    );
    let route_orch = Arc::new(Mutex::new(
        RouteOrch::new(config, collaborators)
            .await
            .context("failed to start RouteOrch")?,
    ));

    let mut daemon = OrchDaemon::new(OrchDaemonConfig {
        max_rounds: args.max_rounds,
    });
    let shared: SharedOrch = route_orch.clone();
    daemon.register_orch(shared).await;

    let total = scenario.events.len();
    let mut events = scenario.events.into_iter().map(KeyOpFieldsValues::from).peekable();
    let batch_size = args.batch_size.max(1);
    while events.peek().is_some() {
        let batch: Vec<_> = events.by_ref().take(batch_size).collect();
        info!("Replaying {} events", batch.len());
        route_orch.lock().await.add_task(batch);
        daemon.run_until_idle().await;
    }
    info!("Replayed {} events", total);

    let orch = route_orch.lock().await;
    if orch.pending_count() > 0 {
        warn!("{} events could not be programmed", orch.pending_count());
    }
    let default_vrf = orch.default_vrf();
    let mut vrf_ids = vec![default_vrf];
    vrf_ids.extend(vrfs.vrf_ids());
    for vrf_id in vrf_ids {
        let Some(routes) = orch.routes(vrf_id) else {
            continue;
        };
        let name = vrfs.vrf_name(vrf_id).unwrap_or_else(|| "default".to_string());
        for (prefix, route) in routes {
            let target = match &route.nhg_index {
                Some(index) => format!("group {}", index),
                None if route.is_blackhole() => "blackhole".to_string(),
                None => route.nhg_key.to_string(),
            };
            info!("{} {} -> {}", name, prefix, target);
        }
    }
    info!(
        "{} next hop groups in use, {} group members on the switch",
        orch.nhg_count(),
        switch.next_hop_group_member_count()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    info!("Starting SONiC routeorch");
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("routeorch failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
