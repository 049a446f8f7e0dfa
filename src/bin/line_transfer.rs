//! 直线拓扑传输实验
//!
//! m1 <-> m2 <-> ... <-> mN：m1 上的客户端经多跳向 mN 上的服务端写出一串 u16。

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use clap::Parser;
use motenet_rs::app::{TransferClient, TransferClientLog, TransferServer, TransferServerLog};
use motenet_rs::net::{LinkOpts, MoteConfig, NetWorld};
use motenet_rs::sim::{SimTime, Simulator};
use motenet_rs::topo::line::{LineOpts, build_line};
use motenet_rs::viz::VizLogger;

#[derive(Debug, Parser)]
#[command(name = "line-transfer", about = "直线拓扑仿真：m1 -> mN 单连接可靠传输")]
struct Args {
    /// mote 个数（≥ 2）
    #[arg(long, default_value_t = 5)]
    motes: u16,

    /// 客户端写出的 u16 个数
    #[arg(long, default_value_t = 100)]
    transfer: u16,

    #[arg(long, default_value_t = 41)]
    server_port: u8,

    #[arg(long, default_value_t = 20)]
    client_port: u8,

    /// 客户端何时开始（毫秒）；留出路由收敛时间
    #[arg(long, default_value_t = 2000)]
    start_ms: u64,

    /// 单向链路传播时延（毫秒）
    #[arg(long, default_value_t = 5)]
    latency_ms: u64,

    /// 均匀丢包率（百分比）
    #[arg(long, default_value_t = 0.0)]
    loss_pct: f64,

    /// 突发丢包：每 LENGTH 帧丢 HIGH 帧，格式 HIGH/LENGTH
    #[arg(long)]
    burst: Option<String>,

    #[arg(long, default_value_t = 0)]
    jitter_ms: u64,

    #[arg(long, default_value_t = 0.0)]
    dup_pct: f64,

    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// 初始 RTO（毫秒）
    #[arg(long, default_value_t = 400)]
    rto_ms: u64,

    /// 接收缓冲 / 通告窗口（字节）
    #[arg(long, default_value_t = 64)]
    recv_buffer: u16,

    /// 仿真运行到多少毫秒
    #[arg(long, default_value_t = 30_000)]
    until_ms: u64,

    /// 输出结构化事件 JSON；不填则不生成
    #[arg(long)]
    viz_json: Option<PathBuf>,
}

fn parse_burst(s: &str) -> Option<(u32, u32)> {
    let (high, length) = s.split_once('/')?;
    Some((high.trim().parse().ok()?, length.trim().parse().ok()?))
}

/// 服务端启动后延迟到 `start_ms` 才安装客户端
struct StartClient {
    node: motenet_rs::net::NodeId,
    client: Option<TransferClient>,
}

impl motenet_rs::sim::Event for StartClient {
    fn execute(self: Box<Self>, _sim: &mut Simulator, world: &mut dyn motenet_rs::sim::World) {
        let w = world
            .as_any_mut()
            .downcast_mut::<NetWorld>()
            .expect("world must be NetWorld");
        if let Some(client) = self.client {
            w.net
                .install_app(self.node, Box::new(client))
                .expect("client mote exists");
        }
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

    let mut sim = Simulator::default();
    let mut world = NetWorld::default();

    let mut mote = MoteConfig::default();
    mote.tcp.init_rto = SimTime::from_millis(args.rto_ms);
    mote.tcp.recv_buffer = args.recv_buffer;

    let opts = LineOpts {
        motes: args.motes.max(2),
        first_id: 1,
        link: LinkOpts {
            latency_ms: args.latency_ms,
            loss_pct: args.loss_pct,
            burst: args.burst.as_deref().and_then(parse_burst),
            jitter_ms: args.jitter_ms,
            dup_pct: args.dup_pct,
            seed: args.seed,
        },
        mote,
    };
    let ids = build_line(&mut world, &opts);
    let (first, last) = (ids[0], ids[ids.len() - 1]);

    if args.viz_json.is_some() {
        world.net.viz = Some(VizLogger::default());
    }

    let server_log = Arc::new(Mutex::new(TransferServerLog::default()));
    let client_log = Arc::new(Mutex::new(TransferClientLog::default()));
    world
        .net
        .install_app(last, Box::new(TransferServer::with_log(args.server_port, Arc::clone(&server_log))))
        .expect("server mote exists");
    let client = TransferClient::new(args.client_port, last, args.server_port, args.transfer)
        .close_when_done()
        .with_log(Arc::clone(&client_log));

    world.net.start(&mut sim);
    sim.schedule(
        SimTime::from_millis(args.start_ms),
        StartClient {
            node: first,
            client: Some(client),
        },
    );
    sim.run_until(SimTime::from_millis(args.until_ms), &mut world);

    if let Some(path) = args.viz_json {
        if let Some(v) = world.net.viz.take() {
            let json = serde_json::to_string_pretty(&v.events).expect("serialize viz events");
            fs::write(&path, json).expect("write viz json");
            eprintln!("wrote viz events to {}", path.display());
        }
    }

    let server = server_log.lock().unwrap_or_else(PoisonError::into_inner);
    let client = client_log.lock().unwrap_or_else(PoisonError::into_inner);
    let in_order = server
        .values
        .iter()
        .enumerate()
        .all(|(i, (_, v))| usize::from(*v) == i);
    println!(
        "done @ {}\n  transfer: written_bytes={}, received_values={}/{}, in_order={}\n  client events: {:?}\n  server events: {:?}\n  net: sent={}, lost={}, duplicated={}, delivered={}",
        sim.now(),
        client.bytes_written,
        server.values.len(),
        args.transfer,
        in_order,
        client.events.iter().map(|(_, e)| *e).collect::<Vec<_>>(),
        server.events.iter().map(|(_, e)| *e).collect::<Vec<_>>(),
        world.net.stats.frames_sent,
        world.net.stats.frames_lost,
        world.net.stats.frames_duplicated,
        world.net.stats.frames_delivered,
    );
}
