//! mote：单个节点的全部状态
//!
//! 每个 mote 拥有自己的路由表、邻居表、洪泛去重缓存、TCP 协议栈和应用，
//! 没有任何全局状态。mote 在处理事件期间被从 [`Network`] 中取出，
//! 需要发送时通过传入的 `&mut Network` 把帧交给链路层。

use tracing::{debug, info, trace, warn};

use super::command::Command;
use super::forwarding::{DropReason, Forwarder, Verdict};
use super::id::NodeId;
use super::neighbor::{NeighborTable, PING_KIND_DISCOVERY, PING_KIND_ECHO};
use super::network::{LinkDest, Network};
use super::packet::{MAX_TTL, Packet, Protocol};
use super::routing::{AdvertKind, DvRouter, RouterOpts, decode_advert, encode_adverts};
use super::stats::MoteStats;
use crate::app::{AppSet, Application, TransferClient, TransferServer};
use crate::proto::{ConnKey, Segment, TcpConfig, TcpNotice, TcpStack};
use crate::sim::{SimTime, Simulator};

/// mote 参数
#[derive(Debug, Clone)]
pub struct MoteConfig {
    /// 定时器周期：路由老化、邻居老化、TCP 定时检查都以它为单位
    pub tick: SimTime,
    /// 每隔多少个 tick 发一次完整的 DV 通告
    pub dv_period_ticks: u32,
    /// 每隔多少个 tick 广播一次邻居发现 PING
    pub beacon_period_ticks: u32,
    /// 邻居多少个 tick 没有回复后判定丢失
    pub neighbor_timeout_ticks: u8,
    pub router: RouterOpts,
    pub dedup_capacity: usize,
    pub tcp: TcpConfig,
}

impl Default for MoteConfig {
    fn default() -> Self {
        Self {
            tick: SimTime::from_millis(100),
            dv_period_ticks: 2,
            beacon_period_ticks: 1,
            neighbor_timeout_ticks: 5,
            router: RouterOpts::default(),
            dedup_capacity: 32,
            tcp: TcpConfig::default(),
        }
    }
}

pub struct Mote {
    id: NodeId,
    cfg: MoteConfig,
    router: DvRouter,
    neighbors: NeighborTable,
    forwarder: Forwarder,
    tcp: TcpStack,
    apps: AppSet,
    next_seq: u16,
    ticks: u64,
    pub stats: MoteStats,
}

impl Mote {
    pub fn new(id: NodeId, cfg: MoteConfig) -> Self {
        Self {
            id,
            router: DvRouter::new(id, cfg.router.clone()),
            neighbors: NeighborTable::new(cfg.neighbor_timeout_ticks),
            forwarder: Forwarder::new(id, cfg.dedup_capacity),
            tcp: TcpStack::new(id, cfg.tcp.clone()),
            apps: AppSet::default(),
            next_seq: 0,
            ticks: 0,
            stats: MoteStats::default(),
            cfg,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn config(&self) -> &MoteConfig {
        &self.cfg
    }

    pub fn router(&self) -> &DvRouter {
        &self.router
    }

    pub fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    pub fn forwarder(&self) -> &Forwarder {
        &self.forwarder
    }

    pub fn tcp(&self) -> &TcpStack {
        &self.tcp
    }

    pub fn tcp_mut(&mut self) -> &mut TcpStack {
        &mut self.tcp
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn install_app(&mut self, app: Box<dyn Application>) {
        self.apps.push(app);
    }

    /// 开机重启：所有协议状态与应用清空
    pub fn reboot(&mut self) {
        *self = Mote::new(self.id, self.cfg.clone());
    }

    fn take_seq(&mut self) -> u16 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }

    /// 本地发起一个包（单播按路由，广播 / 洪泛类直接发到所有邻居）。
    pub fn send_packet(
        &mut self,
        dest: NodeId,
        protocol: Protocol,
        ttl: u8,
        payload: &[u8],
        net: &mut Network,
        sim: &mut Simulator,
    ) {
        let seq = self.take_seq();
        let pkt = match Packet::new(dest, self.id, seq, ttl, protocol, payload) {
            Ok(p) => p,
            Err(err) => {
                warn!(node = %self.id, %err, "无法构造数据包");
                return;
            }
        };
        self.stats.originated += 1;
        let verdict = self.forwarder.originate(pkt.clone(), &self.router);
        if let Verdict::Drop(reason) = verdict {
            debug!(node = %self.id, %pkt, ?reason, "本地发起的包被丢弃");
        }
        self.execute(verdict, net, sim);
    }

    /// 直接发给链路邻居（不查路由表），用于邻居发现的回复
    fn send_link_local(
        &mut self,
        neighbor: NodeId,
        protocol: Protocol,
        payload: &[u8],
        net: &mut Network,
        sim: &mut Simulator,
    ) {
        let seq = self.take_seq();
        let Ok(pkt) = Packet::new(neighbor, self.id, seq, 1, protocol, payload) else {
            return;
        };
        if let Err(err) = net.transmit(self.id, LinkDest::Unicast(neighbor), pkt.encode(), sim) {
            trace!(node = %self.id, %err, "链路本地发送失败");
        }
    }

    /// 处理一帧
    #[tracing::instrument(level = "debug", skip(self, frame, net, sim), fields(node = %self.id))]
    pub fn on_frame(&mut self, from: NodeId, frame: &[u8], net: &mut Network, sim: &mut Simulator) {
        self.stats.frames_rx += 1;
        let pkt = match Packet::decode(frame) {
            Ok(p) => p,
            Err(err) => {
                debug!(%from, %err, "无法解析的帧，丢弃");
                self.stats.dropped_malformed += 1;
                net.viz_drop(sim.now(), None, self.id, DropReason::Malformed);
                return;
            }
        };
        trace!(%pkt, "收到包");
        net.viz_frame_rx(sim.now(), &pkt, self.id, from);
        let verdict = self.forwarder.on_receive(pkt, &self.router);
        self.execute(verdict, net, sim);
    }

    fn execute(&mut self, verdict: Verdict, net: &mut Network, sim: &mut Simulator) {
        match verdict {
            Verdict::Deliver(pkt) => self.deliver_local(pkt, net, sim),
            Verdict::DeliverAndFlood { local, flood } => {
                self.flood(flood, net, sim);
                self.deliver_local(local, net, sim);
            }
            Verdict::Flood(pkt) => self.flood(pkt, net, sim),
            Verdict::Unicast { next_hop, pkt } => {
                let originated = pkt.src == self.id;
                match net.transmit(self.id, LinkDest::Unicast(next_hop), pkt.encode(), sim) {
                    Ok(_) => {
                        if !originated {
                            self.stats.forwarded += 1;
                            trace!(node = %self.id, %pkt, %next_hop, "🚀 转发");
                        }
                        net.viz_forward(sim.now(), &pkt, self.id, next_hop);
                    }
                    Err(err) => {
                        debug!(node = %self.id, %pkt, %err, "链路拒绝发送");
                        self.drop_packet(Some(&pkt), DropReason::LinkRefused, net, sim.now());
                    }
                }
            }
            Verdict::Drop(reason) => self.drop_packet(None, reason, net, sim.now()),
        }
    }

    fn flood(&mut self, pkt: Packet, net: &mut Network, sim: &mut Simulator) {
        if pkt.src != self.id {
            self.stats.flooded += 1;
        }
        net.viz_flood(sim.now(), &pkt, self.id);
        if let Err(err) = net.transmit(self.id, LinkDest::Broadcast, pkt.encode(), sim) {
            debug!(node = %self.id, %err, "广播失败");
        }
    }

    fn drop_packet(&mut self, pkt: Option<&Packet>, reason: DropReason, net: &mut Network, now: SimTime) {
        match reason {
            DropReason::TtlExpired => self.stats.dropped_ttl += 1,
            DropReason::NoRoute => self.stats.dropped_no_route += 1,
            DropReason::Duplicate => self.stats.dropped_duplicate += 1,
            DropReason::Malformed => self.stats.dropped_malformed += 1,
            DropReason::LinkRefused => self.stats.dropped_link += 1,
        }
        trace!(node = %self.id, ?reason, "丢弃");
        net.viz_drop(now, pkt, self.id, reason);
    }

    fn deliver_local(&mut self, pkt: Packet, net: &mut Network, sim: &mut Simulator) {
        self.stats.delivered += 1;
        net.viz_delivered(sim.now(), &pkt, self.id);
        let payload = *pkt.payload();
        match pkt.protocol {
            Protocol::Ping => {
                if payload[0] == PING_KIND_DISCOVERY {
                    self.send_link_local(pkt.src, Protocol::PingReply, &[PING_KIND_DISCOVERY], net, sim);
                } else {
                    info!(node = %self.id, from = %pkt.src, text = %text_of(&payload[1..]), "🏓 收到 PING");
                    self.stats.pings_answered += 1;
                    self.send_packet(pkt.src, Protocol::PingReply, MAX_TTL, &payload, net, sim);
                }
            }
            Protocol::PingReply => {
                if payload[0] == PING_KIND_DISCOVERY {
                    if self.neighbors.refresh(pkt.src) {
                        debug!(node = %self.id, neighbor = %pkt.src, "👋 发现新邻居");
                    }
                } else {
                    self.stats.ping_replies += 1;
                    info!(node = %self.id, from = %pkt.src, text = %text_of(&payload[1..]), "🏓 收到 PING_REPLY");
                }
            }
            Protocol::DistanceVector if !self.neighbors.contains(pkt.src) => {
                // 只有确认过双向链路的邻居，其通告才能作为一跳路由
                trace!(node = %self.id, from = %pkt.src, "忽略未确认邻居的路由通告");
                self.stats.ignored_adverts += 1;
            }
            Protocol::DistanceVector => match decode_advert(&payload) {
                Ok(entries) => {
                    let changed = self.router.ingest_advertisement(pkt.src, &entries);
                    for dest in changed {
                        if let Some(r) = self.router.route(dest) {
                            net.viz_route_change(sim.now(), self.id, dest, r.cost, r.next_hop);
                        }
                    }
                }
                Err(err) => {
                    debug!(node = %self.id, %err, "无法解析的路由通告");
                    self.stats.dropped_malformed += 1;
                }
            },
            Protocol::Tcp => match Segment::decode(&payload) {
                Ok(seg) => {
                    trace!(node = %self.id, from = %pkt.src, %seg, "收到 TCP 段");
                    self.tcp.on_segment(pkt.src, seg, sim.now(), &mut self.apps);
                    self.flush_tcp(net, sim);
                }
                Err(err) => {
                    debug!(node = %self.id, %err, "无法解析的 TCP 段");
                    self.stats.dropped_malformed += 1;
                }
            },
            Protocol::Flood | Protocol::Name => {
                self.stats.floods_received += 1;
                info!(node = %self.id, from = %pkt.src, protocol = %pkt.protocol, text = %text_of(&payload), "🌊 收到洪泛包");
            }
            Protocol::Command => {
                debug!(node = %self.id, "CMD 包由仿真命令事件代替，忽略");
            }
        }
    }

    /// 把协议栈产生的段发出去，并记录状态迁移 / 连接事件
    fn flush_tcp(&mut self, net: &mut Network, sim: &mut Simulator) {
        let now = sim.now();
        for n in self.tcp.drain_notices() {
            match n {
                TcpNotice::Transition { conn, from, to } => net.viz_tcp_state(now, self.id, conn, from, to),
                TcpNotice::Event { conn, event } => net.viz_conn_event(now, self.id, conn, event),
            }
        }
        for out in self.tcp.drain_outbox() {
            let conn = ConnKey {
                local_port: out.seg.src_port,
                remote: out.to,
                remote_port: out.seg.dest_port,
            };
            net.viz_tcp_send(now, self.id, conn, &out.seg, out.retransmit);
            self.send_packet(out.to, Protocol::Tcp, MAX_TTL, &out.seg.encode(), net, sim);
        }
    }

    /// 让应用有机会调用协议栈，然后把结果发出去
    pub fn poll_apps(&mut self, net: &mut Network, sim: &mut Simulator) {
        let now = sim.now();
        self.tcp.flush_deferred(&mut self.apps);
        self.apps.poll(&mut self.tcp, now);
        self.tcp.flush_deferred(&mut self.apps);
        self.flush_tcp(net, sim);
    }

    /// 周期性 tick：路由与邻居老化、TCP 定时器、邻居发现与 DV 通告
    pub fn on_tick(&mut self, net: &mut Network, sim: &mut Simulator) {
        self.ticks += 1;
        let now = sim.now();

        let mut invalidated = self.router.tick().invalidated;
        for lost in self.neighbors.tick() {
            info!(node = %self.id, neighbor = %lost, "⚠️  邻居丢失");
            invalidated.extend(self.router.on_neighbor_lost(lost));
        }
        for dest in invalidated {
            if let Some(r) = self.router.route(dest) {
                net.viz_route_change(now, self.id, dest, r.cost, r.next_hop);
            }
        }

        self.tcp.on_tick(now, &mut self.apps);
        self.flush_tcp(net, sim);

        let beacon = u64::from(self.cfg.beacon_period_ticks.max(1));
        if self.ticks % beacon == 0 {
            self.send_packet(NodeId::BROADCAST, Protocol::Ping, 1, &[PING_KIND_DISCOVERY], net, sim);
        }

        let dv = u64::from(self.cfg.dv_period_ticks.max(1));
        let kind = if self.ticks % dv == 0 {
            Some(AdvertKind::Periodic)
        } else if self.router.has_changes() {
            Some(AdvertKind::Triggered)
        } else {
            None
        };
        if let Some(kind) = kind {
            let entries = self.router.advertisement(kind);
            for payload in encode_adverts(&entries) {
                self.send_packet(NodeId::BROADCAST, Protocol::DistanceVector, 1, &payload, net, sim);
            }
        }
    }

    /// 执行控制命令
    pub fn on_command(&mut self, cmd: Command, net: &mut Network, sim: &mut Simulator) {
        let now = sim.now();
        match cmd {
            Command::Ping { dest, text } => {
                let mut payload = vec![PING_KIND_ECHO];
                payload.extend(text.bytes().take(super::packet::PACKET_MAX_PAYLOAD_SIZE - 1));
                info!(node = %self.id, dest, %text, "🏓 发送 PING");
                self.send_packet(NodeId(dest), Protocol::Ping, MAX_TTL, &payload, net, sim);
            }
            Command::Flood { text } => {
                let payload: Vec<u8> = text.bytes().take(super::packet::PACKET_MAX_PAYLOAD_SIZE).collect();
                self.send_packet(NodeId::BROADCAST, Protocol::Flood, MAX_TTL, &payload, net, sim);
            }
            Command::NeighborDump => info!("{}", self.neighbors.dump(self.id)),
            Command::RouteDump => info!("{}", self.router.dump()),
            Command::TestServer { port } => {
                info!(node = %self.id, port, "启动传输服务端");
                self.install_app(Box::new(TransferServer::new(port)));
            }
            Command::TestClient {
                src_port,
                dest,
                dest_port,
                transfer,
                close_when_done,
            } => {
                info!(node = %self.id, src_port, dest, dest_port, transfer, "启动传输客户端");
                let client = TransferClient::new(src_port, NodeId(dest), dest_port, transfer);
                let client = if close_when_done { client.close_when_done() } else { client };
                self.install_app(Box::new(client));
            }
            Command::CloseClient { src_port, dest, dest_port } => {
                let key = ConnKey {
                    local_port: src_port,
                    remote: NodeId(dest),
                    remote_port: dest_port,
                };
                if let Err(err) = self.tcp.close(key, now) {
                    warn!(node = %self.id, %err, "关闭客户端失败");
                }
            }
            Command::AbortClient { src_port, dest, dest_port } => {
                let key = ConnKey {
                    local_port: src_port,
                    remote: NodeId(dest),
                    remote_port: dest_port,
                };
                if let Err(err) = self.tcp.abort(key) {
                    warn!(node = %self.id, %err, "中止连接失败");
                }
            }
            Command::MoteOff | Command::MoteOn | Command::LinkDown { .. } | Command::LinkUp { .. } => {
                debug!(node = %self.id, ?cmd, "网络级命令不应交给 mote");
            }
        }
        self.flush_tcp(net, sim);
    }
}

fn text_of(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
