//! 链路类型
//!
//! 单向无线链路：固定传播时延 + 损伤模型，可被管理性关闭。

use serde::Deserialize;

use super::id::NodeId;
use super::impair::Impairment;
use crate::sim::SimTime;

/// 构造链路用的参数（可直接从场景 JSON 反序列化）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkOpts {
    pub latency_ms: u64,
    /// 均匀丢包率（百分比）
    pub loss_pct: f64,
    /// 脉冲式丢包 `(high, length)`：每 `length` 帧丢 `high` 帧，优先于 `loss_pct`
    pub burst: Option<(u32, u32)>,
    pub jitter_ms: u64,
    pub dup_pct: f64,
    pub seed: u64,
}

impl Default for LinkOpts {
    fn default() -> Self {
        Self {
            latency_ms: 5,
            loss_pct: 0.0,
            burst: None,
            jitter_ms: 0,
            dup_pct: 0.0,
            seed: 1,
        }
    }
}

impl LinkOpts {
    pub fn latency(&self) -> SimTime {
        SimTime::from_millis(self.latency_ms)
    }

    /// 为 `from -> to` 方向生成损伤模型；种子按方向打散，两个方向互不相关。
    pub fn impairment(&self, from: NodeId, to: NodeId) -> Impairment {
        let seed = self.seed ^ (u64::from(from.0) << 16) ^ u64::from(to.0);
        let base = match self.burst {
            Some((high, length)) if length > 0 && high <= length => {
                Impairment::pulsed(high, length).with_seed(seed)
            }
            _ => Impairment::uniform(self.loss_pct, seed),
        };
        base.with_jitter(SimTime::from_millis(self.jitter_ms))
            .with_duplication(self.dup_pct)
    }
}

/// 单向链路
#[derive(Debug, Clone)]
pub struct Link {
    pub from: NodeId,
    pub to: NodeId,
    pub latency: SimTime,
    /// 管理性开关；关闭后发送被拒绝
    pub up: bool,
    pub impair: Impairment,
}

impl Link {
    pub fn new(from: NodeId, to: NodeId, opts: &LinkOpts) -> Self {
        Self {
            from,
            to,
            latency: opts.latency(),
            up: true,
            impair: opts.impairment(from, to),
        }
    }

    /// 理想链路
    pub fn perfect(from: NodeId, to: NodeId, latency: SimTime) -> Self {
        Self {
            from,
            to,
            latency,
            up: true,
            impair: Impairment::none(),
        }
    }
}
