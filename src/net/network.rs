//! 网络拓扑管理
//!
//! 持有所有 mote 与单向链路，负责把帧交给链路（丢包 / 抖动 / 重复）并调度到达事件。

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use super::command::Command;
use super::deliver_frame::DeliverFrame;
use super::id::{LinkId, NodeId};
use super::impair::mix64;
use super::link::{Link, LinkOpts};
use super::mote::{Mote, MoteConfig};
use super::packet::Frame;
use super::stats::Stats;
use super::tick::MoteTick;
use crate::app::Application;
use crate::sim::{SimTime, Simulator};
use crate::viz::VizLogger;

/// 链路层发送目标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDest {
    Unicast(NodeId),
    /// 发给所有出链路的邻居
    Broadcast,
}

/// 链路层 / 拓扑错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("no link from {from} to {to}")]
    NoLink { from: NodeId, to: NodeId },
    #[error("link from {from} to {to} is down")]
    LinkDown { from: NodeId, to: NodeId },
    #[error("mote {0} is powered off")]
    NodeDown(NodeId),
    #[error("no such mote {0}")]
    NoSuchMote(NodeId),
    #[error("mote {0} already exists")]
    DuplicateMote(NodeId),
}

struct MoteSlot {
    /// 处理事件期间暂时取出
    mote: Option<Mote>,
    powered: bool,
    /// 每次开机加一；旧的 tick 链据此自行终止
    epoch: u64,
}

/// 网络拓扑
#[derive(Default)]
pub struct Network {
    motes: BTreeMap<NodeId, MoteSlot>,
    links: Vec<Link>,
    edges: HashMap<(NodeId, NodeId), LinkId>,
    out_links: BTreeMap<NodeId, Vec<LinkId>>,
    pub stats: Stats,
    pub viz: Option<VizLogger>,
}

impl Network {
    /// 添加 mote
    pub fn add_mote(&mut self, id: NodeId, cfg: MoteConfig) -> Result<NodeId, LinkError> {
        if self.motes.contains_key(&id) {
            return Err(LinkError::DuplicateMote(id));
        }
        self.motes.insert(
            id,
            MoteSlot {
                mote: Some(Mote::new(id, cfg)),
                powered: true,
                epoch: 0,
            },
        );
        Ok(id)
    }

    /// 连接两个 mote（创建单向链路）；已存在时替换参数。
    pub fn connect(&mut self, from: NodeId, to: NodeId, opts: &LinkOpts) -> LinkId {
        let link = Link::new(from, to, opts);
        if let Some(&id) = self.edges.get(&(from, to)) {
            self.links[id.0] = link;
            return id;
        }
        let id = LinkId(self.links.len());
        self.links.push(link);
        self.edges.insert((from, to), id);
        self.out_links.entry(from).or_default().push(id);
        id
    }

    /// 双向连接
    pub fn connect_bidi(&mut self, a: NodeId, b: NodeId, opts: &LinkOpts) -> (LinkId, LinkId) {
        (self.connect(a, b, opts), self.connect(b, a, opts))
    }

    pub fn mote_ids(&self) -> Vec<NodeId> {
        self.motes.keys().copied().collect()
    }

    pub fn mote(&self, id: NodeId) -> Option<&Mote> {
        self.motes.get(&id).and_then(|s| s.mote.as_ref())
    }

    pub fn mote_mut(&mut self, id: NodeId) -> Option<&mut Mote> {
        self.motes.get_mut(&id).and_then(|s| s.mote.as_mut())
    }

    pub fn is_powered(&self, id: NodeId) -> bool {
        self.motes.get(&id).is_some_and(|s| s.powered)
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn link(&self, from: NodeId, to: NodeId) -> Option<&Link> {
        self.edges.get(&(from, to)).map(|id| &self.links[id.0])
    }

    pub fn link_mut(&mut self, from: NodeId, to: NodeId) -> Option<&mut Link> {
        self.edges.get(&(from, to)).map(|id| &mut self.links[id.0])
    }

    /// 给某个 mote 安装应用
    pub fn install_app(&mut self, id: NodeId, app: Box<dyn Application>) -> Result<(), LinkError> {
        let mote = self.mote_mut(id).ok_or(LinkError::NoSuchMote(id))?;
        mote.install_app(app);
        Ok(())
    }

    /// 管理性开关一条单向链路
    pub fn set_link_up(&mut self, from: NodeId, to: NodeId, up: bool) -> Result<(), LinkError> {
        let link = self
            .link_mut(from, to)
            .ok_or(LinkError::NoLink { from, to })?;
        link.up = up;
        info!(%from, %to, up, "🔌 链路状态变化");
        Ok(())
    }

    /// 为所有 mote 调度第一个 tick；每个 mote 有一个确定性的相位偏移。
    pub fn start(&mut self, sim: &mut Simulator) {
        self.emit_viz_meta();
        let ids: Vec<(NodeId, u64)> = self.motes.iter().map(|(id, s)| (*id, s.epoch)).collect();
        for (id, epoch) in ids {
            let Some(tick) = self.mote(id).map(|m| m.config().tick) else {
                continue;
            };
            let phase = SimTime(mix64(u64::from(id.0)) % tick.0.max(1));
            sim.schedule_in(phase, MoteTick { node: id, epoch });
        }
        info!(motes = self.motes.len(), links = self.links.len(), "▶️  网络启动");
    }

    /// 关机：mote 不再收发，其定时器失效
    pub fn power_off(&mut self, id: NodeId, now: SimTime) -> Result<(), LinkError> {
        let slot = self.motes.get_mut(&id).ok_or(LinkError::NoSuchMote(id))?;
        slot.powered = false;
        slot.epoch = slot.epoch.wrapping_add(1);
        warn!(node = %id, "💤 mote 关机");
        self.viz_power(now, id, false);
        Ok(())
    }

    /// 开机：以空状态重启（路由表、邻居表、连接与应用全部清空）
    pub fn power_on(&mut self, id: NodeId, sim: &mut Simulator) -> Result<(), LinkError> {
        let slot = self.motes.get_mut(&id).ok_or(LinkError::NoSuchMote(id))?;
        if slot.powered {
            return Ok(());
        }
        slot.powered = true;
        slot.epoch = slot.epoch.wrapping_add(1);
        let epoch = slot.epoch;
        let tick = match slot.mote.as_mut() {
            Some(m) => {
                m.reboot();
                m.config().tick
            }
            None => return Ok(()),
        };
        info!(node = %id, "🔋 mote 开机");
        self.viz_power(sim.now(), id, true);
        sim.schedule_in(tick, MoteTick { node: id, epoch });
        Ok(())
    }

    /// 把一帧交给链路层；返回实际发出的副本数（丢失的帧也算已发出）。
    pub fn transmit(
        &mut self,
        from: NodeId,
        dest: LinkDest,
        frame: Frame,
        sim: &mut Simulator,
    ) -> Result<usize, LinkError> {
        if !self.is_powered(from) {
            return Err(LinkError::NodeDown(from));
        }
        let targets: Vec<LinkId> = match dest {
            LinkDest::Unicast(to) => {
                let id = *self
                    .edges
                    .get(&(from, to))
                    .ok_or(LinkError::NoLink { from, to })?;
                if !self.links[id.0].up {
                    return Err(LinkError::LinkDown { from, to });
                }
                vec![id]
            }
            LinkDest::Broadcast => self
                .out_links
                .get(&from)
                .map(|ids| ids.iter().copied().filter(|id| self.links[id.0].up).collect())
                .unwrap_or_default(),
        };

        let now = sim.now();
        for &id in &targets {
            self.send_on_link(id, frame, now, sim);
        }
        Ok(targets.len())
    }

    fn send_on_link(&mut self, id: LinkId, frame: Frame, now: SimTime, sim: &mut Simulator) {
        let link = &mut self.links[id.0];
        let (from, to) = (link.from, link.to);
        self.stats.frames_sent += 1;
        if link.impair.lose() {
            self.stats.frames_lost += 1;
            trace!(%from, %to, "帧在链路上丢失");
            self.viz_frame_lost(now, &frame, from, to);
            return;
        }
        let copies = if link.impair.duplicate() { 2 } else { 1 };
        let mut arrivals = Vec::with_capacity(copies);
        for _ in 0..copies {
            let arrive = now.after(link.latency).after(link.impair.extra_delay());
            arrivals.push(arrive);
        }
        if copies > 1 {
            self.stats.frames_duplicated += 1;
        }
        for (i, arrive) in arrivals.into_iter().enumerate() {
            trace!(%from, %to, %arrive, "调度帧到达事件");
            self.viz_frame_tx(now, &frame, from, to, arrive, i > 0);
            sim.schedule(arrive, DeliverFrame { from, to, frame });
        }
    }

    /// 取出 mote 执行 `f`，完成后放回（避免 &mut self 与 &mut mote 的重叠借用）。
    fn with_mote<R>(
        &mut self,
        id: NodeId,
        sim: &mut Simulator,
        f: impl FnOnce(&mut Mote, &mut Network, &mut Simulator) -> R,
    ) -> Option<R> {
        let slot = self.motes.get_mut(&id)?;
        if !slot.powered {
            return None;
        }
        let mut mote = slot.mote.take()?;
        let r = f(&mut mote, self, sim);
        mote.poll_apps(self, sim);
        if let Some(slot) = self.motes.get_mut(&id) {
            slot.mote = Some(mote);
        }
        Some(r)
    }

    /// 帧到达 `to`
    #[tracing::instrument(skip(self, frame, sim), fields(from = %from, to = %to))]
    pub fn deliver(&mut self, from: NodeId, to: NodeId, frame: Frame, sim: &mut Simulator) {
        if !self.is_powered(to) {
            self.stats.frames_to_dead_mote += 1;
            debug!("接收方已关机，帧被丢弃");
            return;
        }
        self.stats.frames_delivered += 1;
        self.with_mote(to, sim, |mote, net, sim| mote.on_frame(from, &frame, net, sim));
    }

    /// mote 的周期性 tick；返回是否应继续调度
    pub fn tick(&mut self, id: NodeId, epoch: u64, sim: &mut Simulator) -> Option<SimTime> {
        let slot = self.motes.get(&id)?;
        if slot.epoch != epoch || !slot.powered {
            trace!(node = %id, "过期的 tick 链终止");
            return None;
        }
        self.with_mote(id, sim, |mote, net, sim| {
            mote.on_tick(net, sim);
            mote.config().tick
        })
    }

    /// 当前 tick 链的 epoch
    pub fn epoch(&self, id: NodeId) -> Option<u64> {
        self.motes.get(&id).map(|s| s.epoch)
    }

    /// 执行一条控制命令
    #[tracing::instrument(skip(self, sim), fields(node = %node))]
    pub fn command(&mut self, node: NodeId, cmd: Command, sim: &mut Simulator) -> Result<(), LinkError> {
        if !self.motes.contains_key(&node) {
            return Err(LinkError::NoSuchMote(node));
        }
        match cmd {
            Command::MoteOff => self.power_off(node, sim.now()),
            Command::MoteOn => self.power_on(node, sim),
            Command::LinkDown { to } => self.set_link_pair(node, NodeId(to), false),
            Command::LinkUp { to } => self.set_link_pair(node, NodeId(to), true),
            other => {
                if self
                    .with_mote(node, sim, |mote, net, sim| mote.on_command(other, net, sim))
                    .is_none()
                {
                    return Err(LinkError::NodeDown(node));
                }
                Ok(())
            }
        }
    }

    fn set_link_pair(&mut self, a: NodeId, b: NodeId, up: bool) -> Result<(), LinkError> {
        self.set_link_up(a, b, up)?;
        self.set_link_up(b, a, up)
    }
}
