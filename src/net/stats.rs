//! 统计信息

use serde::Serialize;

/// 链路层（整个网络）统计
#[derive(Debug, Default, Clone, Serialize)]
pub struct Stats {
    pub frames_sent: u64,
    pub frames_lost: u64,
    pub frames_duplicated: u64,
    pub frames_delivered: u64,
    /// 到达时接收方已关机
    pub frames_to_dead_mote: u64,
}

/// 单个 mote 的转发 / 协议统计
#[derive(Debug, Default, Clone, Serialize)]
pub struct MoteStats {
    pub frames_rx: u64,
    pub originated: u64,
    pub delivered: u64,
    pub forwarded: u64,
    pub flooded: u64,
    pub dropped_ttl: u64,
    pub dropped_no_route: u64,
    pub dropped_duplicate: u64,
    pub dropped_malformed: u64,
    pub dropped_link: u64,
    /// 来自未确认邻居的 DV 通告
    pub ignored_adverts: u64,
    pub pings_answered: u64,
    pub ping_replies: u64,
    pub floods_received: u64,
}
