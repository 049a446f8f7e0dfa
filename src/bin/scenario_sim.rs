//! 按场景 JSON 运行 mote 网络仿真

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use motenet_rs::net::{MoteStats, NetWorld, Stats};
use motenet_rs::sim::{ScenarioSpec, SimTime, Simulator};
use motenet_rs::viz::VizLogger;
use serde::Serialize;

#[derive(Debug, Parser)]
#[command(name = "scenario-sim", about = "Run a scenario.json on the motenet-rs simulator")]
struct Args {
    /// Path to scenario.json
    #[arg(long)]
    scenario: PathBuf,

    /// Run until this time (ms); overrides `until_ms` in the scenario
    #[arg(long)]
    until_ms: Option<u64>,

    /// Output structured event JSON
    #[arg(long)]
    viz_json: Option<PathBuf>,

    /// Output a summary JSON (per-mote counters, routes, connections)
    #[arg(long)]
    summary_json: Option<PathBuf>,
}

const DEFAULT_UNTIL_MS: u64 = 10_000;

#[derive(Debug, Serialize)]
struct RouteSummary {
    dest: u16,
    next_hop: u16,
    cost: u8,
}

#[derive(Debug, Serialize)]
struct ConnSummary {
    local_port: u8,
    remote: u16,
    remote_port: u8,
    state: String,
    bytes_acked: u64,
    bytes_delivered: u64,
    retransmissions: u64,
}

#[derive(Debug, Serialize)]
struct MoteSummary {
    id: u16,
    powered: bool,
    neighbors: Vec<u16>,
    routes: Vec<RouteSummary>,
    connections: Vec<ConnSummary>,
    stats: MoteStats,
}

#[derive(Debug, Serialize)]
struct Summary {
    now_ms: u64,
    events_executed: u64,
    net: Stats,
    motes: Vec<MoteSummary>,
}

fn summarize(world: &NetWorld, sim: &Simulator) -> Summary {
    let motes = world
        .net
        .mote_ids()
        .into_iter()
        .filter_map(|id| world.net.mote(id).map(|m| (id, m)))
        .map(|(id, m)| MoteSummary {
            id: id.0,
            powered: world.net.is_powered(id),
            neighbors: m.neighbors().ids().map(|n| n.0).collect(),
            routes: m
                .router()
                .routes()
                .map(|r| RouteSummary {
                    dest: r.dest.0,
                    next_hop: r.next_hop.0,
                    cost: r.cost,
                })
                .collect(),
            connections: m
                .tcp()
                .conns()
                .map(|c| ConnSummary {
                    local_port: c.key().local_port,
                    remote: c.key().remote.0,
                    remote_port: c.key().remote_port,
                    state: c.state().to_string(),
                    bytes_acked: c.stats().bytes_acked,
                    bytes_delivered: c.stats().bytes_delivered,
                    retransmissions: c.stats().retransmissions,
                })
                .collect(),
            stats: m.stats.clone(),
        })
        .collect();
    Summary {
        now_ms: sim.now().as_millis(),
        events_executed: sim.executed(),
        net: world.net.stats.clone(),
        motes,
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();

    let args = Args::parse();
    let spec = ScenarioSpec::load(&args.scenario).expect("load scenario");

    let mut sim = Simulator::default();
    let mut world = NetWorld::default();
    if args.viz_json.is_some() {
        world.net.viz = Some(VizLogger::default());
    }
    spec.build(&mut world, &mut sim, args.scenario.parent())
        .expect("build scenario");

    let until_ms = args.until_ms.or(spec.until_ms).unwrap_or(DEFAULT_UNTIL_MS);
    sim.run_until(SimTime::from_millis(until_ms), &mut world);

    if let Some(path) = args.viz_json {
        if let Some(v) = world.net.viz.take() {
            let json = serde_json::to_string_pretty(&v.events).expect("serialize viz events");
            fs::write(&path, json).expect("write viz json");
            eprintln!("wrote viz events to {}", path.display());
        }
    }

    let summary = summarize(&world, &sim);
    if let Some(path) = args.summary_json {
        let json = serde_json::to_string_pretty(&summary).expect("serialize summary");
        fs::write(&path, json).expect("write summary json");
        eprintln!("wrote summary to {}", path.display());
    }
    println!(
        "done @ {}ms: events={}, frames sent={}, lost={}, delivered={}",
        summary.now_ms,
        summary.events_executed,
        summary.net.frames_sent,
        summary.net.frames_lost,
        summary.net.frames_delivered
    );
}
