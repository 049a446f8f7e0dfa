//! 邻居发现
//!
//! mote 周期性广播发现用的 PING（TTL 1），收到的邻居回一个发现用的 PING_REPLY。
//! 收到回复说明双向链路可用，刷新邻居表项；连续若干 tick 没有回复则判定邻居丢失。

use std::collections::BTreeMap;
use std::fmt::Write as _;

use super::id::NodeId;

/// PING / PING_REPLY 载荷首字节：普通回显
pub const PING_KIND_ECHO: u8 = 0;
/// PING / PING_REPLY 载荷首字节：邻居发现
pub const PING_KIND_DISCOVERY: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbor {
    pub id: NodeId,
    /// 剩余存活 tick 数
    pub ttl: u8,
    /// 累计收到的发现回复数
    pub replies: u32,
}

#[derive(Debug, Clone)]
pub struct NeighborTable {
    timeout_ticks: u8,
    entries: BTreeMap<NodeId, Neighbor>,
}

impl NeighborTable {
    pub fn new(timeout_ticks: u8) -> Self {
        Self {
            timeout_ticks: timeout_ticks.max(1),
            entries: BTreeMap::new(),
        }
    }

    /// 刷新邻居，返回是否为新邻居。
    pub fn refresh(&mut self, id: NodeId) -> bool {
        let timeout = self.timeout_ticks;
        let mut fresh = false;
        let n = self.entries.entry(id).or_insert_with(|| {
            fresh = true;
            Neighbor {
                id,
                ttl: timeout,
                replies: 0,
            }
        });
        n.ttl = timeout;
        n.replies = n.replies.saturating_add(1);
        fresh
    }

    /// 老化一个 tick，返回本次丢失的邻居。
    pub fn tick(&mut self) -> Vec<NodeId> {
        let mut lost = Vec::new();
        for n in self.entries.values_mut() {
            n.ttl = n.ttl.saturating_sub(1);
            if n.ttl == 0 {
                lost.push(n.id);
            }
        }
        for id in &lost {
            self.entries.remove(id);
        }
        lost
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 邻居表转储
    pub fn dump(&self, local: NodeId) -> String {
        let mut s = format!("Neighbors of {local}:");
        for n in self.entries.values() {
            let _ = write!(s, " {}", n.id);
        }
        s
    }
}
