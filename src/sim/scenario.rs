//! 场景描述（JSON）
//!
//! 一个场景 = 拓扑 + 链路质量 + mote 参数 + 按时间投递的命令序列。

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use super::{SimTime, Simulator};
use crate::net::{Command, CommandEvent, LinkError, LinkOpts, MoteConfig, NetWorld, NodeId};
use crate::topo::line::{LineOpts, build_line};
use crate::topo::topo_file::{TopoError, load_topo};

pub const SCENARIO_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read scenario: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid scenario JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported schema_version {0}")]
    UnsupportedSchema(u32),
    #[error(transparent)]
    Topo(#[from] TopoError),
    #[error(transparent)]
    Link(#[from] LinkError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioSpec {
    pub schema_version: u32,
    #[serde(default)]
    pub name: Option<String>,
    pub topology: TopologySpec,
    /// 所有链路的默认参数
    #[serde(default)]
    pub link: LinkOpts,
    /// 对单条链路的覆盖
    #[serde(default)]
    pub links: Vec<LinkOverride>,
    #[serde(default)]
    pub mote: MoteSpec,
    #[serde(default)]
    pub commands: Vec<ScheduledCommand>,
    #[serde(default)]
    pub until_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TopologySpec {
    Line {
        motes: u16,
        #[serde(default = "default_first_id")]
        first_id: u16,
    },
    /// 显式列出的双向边
    Edges { edges: Vec<(u16, u16)> },
    /// TOSSIM `.topo` 文件；相对路径相对于场景文件所在目录
    TopoFile { path: PathBuf },
}

fn default_first_id() -> u16 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkOverride {
    pub from: u16,
    pub to: u16,
    /// 同时覆盖反方向
    #[serde(default)]
    pub bidi: bool,
    #[serde(flatten)]
    pub opts: LinkOpts,
}

/// mote 参数（缺省项取 [`MoteConfig::default`]）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MoteSpec {
    pub tick_ms: Option<u64>,
    pub dv_period_ticks: Option<u32>,
    pub beacon_period_ticks: Option<u32>,
    pub neighbor_timeout_ticks: Option<u8>,
    pub route_capacity: Option<usize>,
    pub poison_reverse: Option<bool>,
    pub rto_ms: Option<u64>,
    pub max_rto_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub recv_buffer: Option<u16>,
    pub send_buffer: Option<usize>,
    pub time_wait_ms: Option<u64>,
    pub fin_wait2_timeout_ms: Option<u64>,
}

impl MoteSpec {
    pub fn to_config(&self) -> MoteConfig {
        let mut cfg = MoteConfig::default();
        if let Some(v) = self.tick_ms {
            cfg.tick = SimTime::from_millis(v.max(1));
        }
        if let Some(v) = self.dv_period_ticks {
            cfg.dv_period_ticks = v;
        }
        if let Some(v) = self.beacon_period_ticks {
            cfg.beacon_period_ticks = v;
        }
        if let Some(v) = self.neighbor_timeout_ticks {
            cfg.neighbor_timeout_ticks = v;
        }
        if let Some(v) = self.route_capacity {
            cfg.router.capacity = v;
        }
        if let Some(v) = self.poison_reverse {
            cfg.router.poison_reverse = v;
        }
        if let Some(v) = self.rto_ms {
            cfg.tcp.init_rto = SimTime::from_millis(v);
        }
        if let Some(v) = self.max_rto_ms {
            cfg.tcp.max_rto = SimTime::from_millis(v);
        }
        if let Some(v) = self.max_retries {
            cfg.tcp.max_retries = v;
        }
        if let Some(v) = self.recv_buffer {
            cfg.tcp.recv_buffer = v;
        }
        if let Some(v) = self.send_buffer {
            cfg.tcp.send_buffer = v;
        }
        if let Some(v) = self.time_wait_ms {
            cfg.tcp.time_wait = SimTime::from_millis(v);
        }
        if let Some(v) = self.fin_wait2_timeout_ms {
            cfg.tcp.fin_wait2_timeout = SimTime::from_millis(v);
        }
        cfg
    }
}

/// 在 `at_ms` 时刻投递给 `node` 的命令
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduledCommand {
    pub at_ms: u64,
    pub node: u16,
    #[serde(flatten)]
    pub cmd: Command,
}

impl ScenarioSpec {
    pub fn from_json(text: &str) -> Result<Self, ScenarioError> {
        let spec: ScenarioSpec = serde_json::from_str(text)?;
        if spec.schema_version != SCENARIO_SCHEMA_VERSION {
            return Err(ScenarioError::UnsupportedSchema(spec.schema_version));
        }
        Ok(spec)
    }

    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// 建拓扑、启动所有 mote 并调度命令；返回 mote 编号
    pub fn build(
        &self,
        world: &mut NetWorld,
        sim: &mut Simulator,
        base_dir: Option<&Path>,
    ) -> Result<Vec<NodeId>, ScenarioError> {
        let mote_cfg = self.mote.to_config();
        let ids = match &self.topology {
            TopologySpec::Line { motes, first_id } => build_line(
                world,
                &LineOpts {
                    motes: *motes,
                    first_id: *first_id,
                    link: self.link.clone(),
                    mote: mote_cfg,
                },
            ),
            TopologySpec::Edges { edges } => {
                let mut ids = Vec::new();
                for &(a, b) in edges {
                    for id in [NodeId(a), NodeId(b)] {
                        if world.net.mote(id).is_none() {
                            world.net.add_mote(id, mote_cfg.clone())?;
                            ids.push(id);
                        }
                    }
                    world.net.connect_bidi(NodeId(a), NodeId(b), &self.link);
                }
                ids.sort();
                ids
            }
            TopologySpec::TopoFile { path } => {
                let path = match base_dir {
                    Some(dir) if path.is_relative() => dir.join(path),
                    _ => path.clone(),
                };
                load_topo(world, &path, &self.link, &mote_cfg)?
            }
        };

        for o in &self.links {
            let (from, to) = (NodeId(o.from), NodeId(o.to));
            if world.net.link(from, to).is_none() {
                return Err(LinkError::NoLink { from, to }.into());
            }
            world.net.connect(from, to, &o.opts);
            if o.bidi {
                world.net.connect(to, from, &o.opts);
            }
        }

        world.net.start(sim);
        for c in &self.commands {
            sim.schedule(
                SimTime::from_millis(c.at_ms),
                CommandEvent {
                    node: NodeId(c.node),
                    cmd: c.cmd.clone(),
                },
            );
        }
        info!(
            name = self.name.as_deref().unwrap_or("unnamed"),
            motes = ids.len(),
            commands = self.commands.len(),
            "📋 场景已加载"
        );
        Ok(ids)
    }
}
