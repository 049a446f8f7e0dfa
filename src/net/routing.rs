//! 距离向量路由
//!
//! 每个 mote 维护一张 `dest -> (cost, next_hop, ttl)` 的路由表：
//! - 与直连邻居交换向量（触发更新 + 周期更新），链路代价统一为 1 跳；
//! - 代价封顶 `ROUTE_MAX_COST`（16 = 不可达），限制 count-to-infinity 的收敛时间；
//! - 表项先失效（cost = MAX）再经过 `ROUTE_GARBAGE_COLLECT` 个 tick 才被删除，
//!   以吸收短暂的链路抖动。
//!
//! 通告格式：每条 5 字节 `(dest, cost, next_hop, ttl, changed)`，一个包最多 4 条。
//! `dest == 0` 的槽位是填充，因此参与路由的节点编号为 1..=255。

use std::collections::BTreeMap;
use std::fmt::Write as _;

use thiserror::Error;
use tracing::{debug, trace, warn};

use super::id::NodeId;
use super::packet::PACKET_MAX_PAYLOAD_SIZE;

/// 不可达代价
pub const ROUTE_MAX_COST: u8 = 16;
/// 通告中每条路由的字节数
pub const ROUTE_SIZE: usize = 5;
/// 表项未刷新多少个 tick 后失效
pub const ROUTE_TIMEOUT: u8 = 6;
/// 失效后再过多少个 tick 删除
pub const ROUTE_GARBAGE_COLLECT: u8 = 4;
/// 单个包能携带的通告条数
pub const ROUTES_PER_PACKET: usize = PACKET_MAX_PAYLOAD_SIZE / ROUTE_SIZE;

/// 通告编解码错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdvertError {
    #[error("node {0} cannot be carried in a one-byte advertisement slot")]
    NodeIdOutOfRange(NodeId),
    #[error("advertisement payload of {0} bytes is not a whole number of entries")]
    Truncated(usize),
}

/// 线上的一条通告
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertEntry {
    pub dest: NodeId,
    pub cost: u8,
    pub next_hop: NodeId,
    pub ttl: u8,
    pub changed: bool,
}

fn id_byte(id: NodeId) -> Result<u8, AdvertError> {
    match u8::try_from(id.0) {
        Ok(b) if b != 0 => Ok(b),
        _ => Err(AdvertError::NodeIdOutOfRange(id)),
    }
}

/// 把一组通告编码为若干个 ≤ 20 字节的载荷
pub fn encode_adverts(entries: &[AdvertEntry]) -> Vec<Vec<u8>> {
    let mut encoded = Vec::with_capacity(entries.len());
    for e in entries {
        let (dest, next_hop) = match (id_byte(e.dest), id_byte(e.next_hop)) {
            (Ok(d), Ok(n)) => (d, n),
            (Err(err), _) | (_, Err(err)) => {
                warn!(%err, "跳过无法编码的路由通告");
                continue;
            }
        };
        encoded.push([dest, e.cost.min(ROUTE_MAX_COST), next_hop, e.ttl, u8::from(e.changed)]);
    }
    encoded
        .chunks(ROUTES_PER_PACKET)
        .map(|chunk| chunk.iter().flatten().copied().collect())
        .collect()
}

/// 解码一个通告载荷；填充槽位被跳过，代价被截断到 `ROUTE_MAX_COST`。
pub fn decode_advert(payload: &[u8]) -> Result<Vec<AdvertEntry>, AdvertError> {
    if payload.len() % ROUTE_SIZE != 0 {
        return Err(AdvertError::Truncated(payload.len()));
    }
    Ok(payload
        .chunks_exact(ROUTE_SIZE)
        .filter(|slot| slot[0] != 0)
        .map(|slot| AdvertEntry {
            dest: NodeId(u16::from(slot[0])),
            cost: slot[1].min(ROUTE_MAX_COST),
            next_hop: NodeId(u16::from(slot[2])),
            ttl: slot[3],
            changed: slot[4] != 0,
        })
        .collect())
}

/// 路由表项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub dest: NodeId,
    pub cost: u8,
    pub next_hop: NodeId,
    pub ttl: u8,
    pub route_changed: bool,
    /// 失效后经过的 tick 数
    gc_ticks: u8,
}

impl RouteEntry {
    pub fn is_reachable(&self) -> bool {
        self.cost < ROUTE_MAX_COST
    }

    fn invalidate(&mut self) {
        self.cost = ROUTE_MAX_COST;
        self.route_changed = true;
        self.gc_ticks = 0;
    }

    fn to_advert(&self) -> AdvertEntry {
        AdvertEntry {
            dest: self.dest,
            cost: self.cost,
            next_hop: self.next_hop,
            ttl: self.ttl,
            changed: self.route_changed,
        }
    }
}

/// 路由器参数
#[derive(Debug, Clone)]
pub struct RouterOpts {
    /// 路由表容量；满时淘汰最旧的表项
    pub capacity: usize,
    /// 接收侧毒性逆转：邻居经由本节点到达的路由视为不可达
    pub poison_reverse: bool,
}

impl Default for RouterOpts {
    fn default() -> Self {
        Self {
            capacity: 64,
            poison_reverse: true,
        }
    }
}

/// 一次 tick 的结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub invalidated: Vec<NodeId>,
    pub removed: Vec<NodeId>,
}

/// 通告种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertKind {
    /// 只含 `route_changed` 的表项
    Triggered,
    /// 整张表（含本节点自身，代价 0）
    Periodic,
}

/// 距离向量路由表
#[derive(Debug, Clone)]
pub struct DvRouter {
    local: NodeId,
    opts: RouterOpts,
    routes: BTreeMap<NodeId, RouteEntry>,
}

impl DvRouter {
    pub fn new(local: NodeId, opts: RouterOpts) -> Self {
        Self {
            local,
            opts,
            routes: BTreeMap::new(),
        }
    }

    pub fn local(&self) -> NodeId {
        self.local
    }

    /// 到 `dest` 的下一跳；不存在或不可达时返回 None。
    pub fn next_hop_for(&self, dest: NodeId) -> Option<NodeId> {
        self.routes
            .get(&dest)
            .filter(|r| r.is_reachable())
            .map(|r| r.next_hop)
    }

    pub fn route(&self, dest: NodeId) -> Option<&RouteEntry> {
        self.routes.get(&dest)
    }

    pub fn routes(&self) -> impl Iterator<Item = &RouteEntry> {
        self.routes.values()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn has_changes(&self) -> bool {
        self.routes.values().any(|r| r.route_changed)
    }

    /// 处理邻居 `from` 的通告，返回代价或下一跳发生变化的目的地。
    pub fn ingest_advertisement(&mut self, from: NodeId, entries: &[AdvertEntry]) -> Vec<NodeId> {
        let mut changed = Vec::new();
        for e in entries {
            if e.dest == self.local || e.dest.is_broadcast() {
                continue;
            }
            let mut cost = e.cost.min(ROUTE_MAX_COST);
            if self.opts.poison_reverse && e.next_hop == self.local && e.dest != from {
                cost = ROUTE_MAX_COST;
            }
            let candidate = cost.saturating_add(1).min(ROUTE_MAX_COST);

            if let Some(r) = self.routes.get_mut(&e.dest) {
                let from_next_hop = r.next_hop == from;
                if !from_next_hop && candidate >= r.cost {
                    continue;
                }
                if candidate >= ROUTE_MAX_COST {
                    // 当前路径的来源报告不可达：失效，但已失效的表项不刷新，让 GC 继续计时
                    if r.is_reachable() {
                        r.invalidate();
                        debug!(dest = %e.dest, via = %from, "路由被下一跳宣告不可达");
                        changed.push(e.dest);
                    }
                    continue;
                }
                let differs = r.cost != candidate || r.next_hop != from;
                r.cost = candidate;
                r.next_hop = from;
                r.ttl = ROUTE_TIMEOUT;
                r.gc_ticks = 0;
                if differs {
                    r.route_changed = true;
                    trace!(dest = %e.dest, cost = candidate, via = %from, "路由更新");
                    changed.push(e.dest);
                }
            } else if candidate < ROUTE_MAX_COST {
                self.make_room();
                self.routes.insert(
                    e.dest,
                    RouteEntry {
                        dest: e.dest,
                        cost: candidate,
                        next_hop: from,
                        ttl: ROUTE_TIMEOUT,
                        route_changed: true,
                        gc_ticks: 0,
                    },
                );
                trace!(dest = %e.dest, cost = candidate, via = %from, "新路由");
                changed.push(e.dest);
            }
        }
        changed
    }

    /// 表满时腾出一个位置：优先淘汰已失效最久的表项，其次是最久未刷新的表项。
    fn make_room(&mut self) {
        if self.routes.len() < self.opts.capacity.max(1) {
            return;
        }
        let victim = self
            .routes
            .values()
            .filter(|r| !r.is_reachable())
            .max_by_key(|r| r.gc_ticks)
            .or_else(|| self.routes.values().min_by_key(|r| r.ttl))
            .map(|r| r.dest);
        if let Some(dest) = victim {
            debug!(%dest, "路由表已满，淘汰表项");
            self.routes.remove(&dest);
        }
    }

    /// 下一跳邻居丢失：所有经由它的可达路由立即失效。
    pub fn on_neighbor_lost(&mut self, neighbor: NodeId) -> Vec<NodeId> {
        let mut invalidated = Vec::new();
        for r in self.routes.values_mut() {
            if r.next_hop == neighbor && r.is_reachable() {
                r.invalidate();
                invalidated.push(r.dest);
            }
        }
        if !invalidated.is_empty() {
            debug!(%neighbor, count = invalidated.len(), "邻居丢失，相关路由失效");
        }
        invalidated
    }

    /// 每个时间单位调用一次：老化、失效、垃圾回收。
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        for r in self.routes.values_mut() {
            if r.is_reachable() {
                r.ttl = r.ttl.saturating_sub(1);
                if r.ttl == 0 {
                    r.invalidate();
                    report.invalidated.push(r.dest);
                }
            } else {
                r.gc_ticks = r.gc_ticks.saturating_add(1);
                if r.gc_ticks >= ROUTE_GARBAGE_COLLECT {
                    report.removed.push(r.dest);
                }
            }
        }
        for dest in &report.removed {
            self.routes.remove(dest);
        }
        if !report.invalidated.is_empty() || !report.removed.is_empty() {
            debug!(
                node = %self.local,
                invalidated = ?report.invalidated,
                removed = ?report.removed,
                "路由老化"
            );
        }
        report
    }

    /// 生成要发送的通告并清除 `route_changed`。
    pub fn advertisement(&mut self, kind: AdvertKind) -> Vec<AdvertEntry> {
        let mut out = Vec::new();
        if kind == AdvertKind::Periodic {
            out.push(AdvertEntry {
                dest: self.local,
                cost: 0,
                next_hop: self.local,
                ttl: ROUTE_TIMEOUT,
                changed: false,
            });
        }
        for r in self.routes.values_mut() {
            if kind == AdvertKind::Periodic || r.route_changed {
                out.push(r.to_advert());
            }
            r.route_changed = false;
        }
        out
    }

    /// 路由表转储
    pub fn dump(&self) -> String {
        let mut s = format!("Routing table of {}\nDest  Hop  Count\n", self.local);
        for r in self.routes.values() {
            let _ = writeln!(s, "{:<5} {:<4} {}", r.dest, r.next_hop, r.cost);
        }
        s
    }
}
