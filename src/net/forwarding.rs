//! 转发 / 洪泛层
//!
//! 对每个需要处理的包（本地发起或从链路收到）做出决定：
//! 本地交付、按路由表单播转发、或洪泛（TTL 递减 + 按 (src, seq) 去重）。
//! 这里只做决定，不做发送；真正的发送由 [`super::Mote`] 完成。

use std::collections::{HashSet, VecDeque};

use serde::Serialize;

use super::id::NodeId;
use super::packet::Packet;
use super::routing::DvRouter;

/// 丢弃原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// TTL 已耗尽
    TtlExpired,
    /// 没有可达路由
    NoRoute,
    /// 重复的洪泛包（或本节点自己洪泛出去又回来的包）
    Duplicate,
    /// 无法解析的帧
    Malformed,
    /// 链路层拒绝发送
    LinkRefused,
}

/// 转发决定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// 本地交付
    Deliver(Packet),
    /// 本地交付，同时把 TTL 递减后的副本广播出去
    DeliverAndFlood { local: Packet, flood: Packet },
    /// 广播给所有邻居
    Flood(Packet),
    /// 单播给下一跳
    Unicast { next_hop: NodeId, pkt: Packet },
    Drop(DropReason),
}

/// 洪泛去重缓存：有界，满时淘汰最旧的条目。
#[derive(Debug, Clone)]
pub struct DedupCache {
    capacity: usize,
    order: VecDeque<(NodeId, u16)>,
    seen: HashSet<(NodeId, u16)>,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// 记录 (src, seq)；已见过时返回 false。
    pub fn insert(&mut self, src: NodeId, seq: u16) -> bool {
        if !self.seen.insert((src, seq)) {
            return false;
        }
        self.order.push_back((src, seq));
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }

    pub fn contains(&self, src: NodeId, seq: u16) -> bool {
        self.seen.contains(&(src, seq))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// 单个 mote 的转发器
#[derive(Debug, Clone)]
pub struct Forwarder {
    local: NodeId,
    seen: DedupCache,
}

impl Forwarder {
    pub fn new(local: NodeId, dedup_capacity: usize) -> Self {
        Self {
            local,
            seen: DedupCache::new(dedup_capacity),
        }
    }

    pub fn dedup(&self) -> &DedupCache {
        &self.seen
    }

    /// 处理从链路收到的包
    pub fn on_receive(&mut self, pkt: Packet, router: &DvRouter) -> Verdict {
        if pkt.protocol.is_flood_class() {
            if pkt.src == self.local || !self.seen.insert(pkt.src, pkt.seq) {
                return Verdict::Drop(DropReason::Duplicate);
            }
            if pkt.dest == self.local {
                return Verdict::Deliver(pkt);
            }
            let broadcast = pkt.dest.is_broadcast();
            return match (pkt.decremented(), broadcast) {
                (Some(flood), true) => Verdict::DeliverAndFlood { local: pkt, flood },
                (Some(flood), false) => Verdict::Flood(flood),
                (None, true) => Verdict::Deliver(pkt),
                (None, false) => Verdict::Drop(DropReason::TtlExpired),
            };
        }

        // 非洪泛类的广播（邻居发现、DV 通告）只在本跳有效
        if pkt.dest == self.local || pkt.dest.is_broadcast() {
            return Verdict::Deliver(pkt);
        }

        let Some(next_hop) = router.next_hop_for(pkt.dest) else {
            return Verdict::Drop(DropReason::NoRoute);
        };
        match pkt.decremented() {
            Some(pkt) => Verdict::Unicast { next_hop, pkt },
            None => Verdict::Drop(DropReason::TtlExpired),
        }
    }

    /// 处理本地发起的包；发起时不递减 TTL。
    pub fn originate(&mut self, pkt: Packet, router: &DvRouter) -> Verdict {
        if pkt.dest == self.local {
            return Verdict::Deliver(pkt);
        }
        if pkt.protocol.is_flood_class() {
            self.seen.insert(pkt.src, pkt.seq);
            return Verdict::Flood(pkt);
        }
        if pkt.dest.is_broadcast() {
            return Verdict::Flood(pkt);
        }
        match router.next_hop_for(pkt.dest) {
            Some(next_hop) => Verdict::Unicast { next_hop, pkt },
            None => Verdict::Drop(DropReason::NoRoute),
        }
    }
}
