//! 链路损伤模型：丢包（均匀/脉冲突发）、抖动（导致乱序）、重复。
//!
//! 全部基于确定性的伪随机数，同一 seed 的仿真结果可复现。

use crate::sim::SimTime;

/// splitmix64：简单、确定性的 64-bit 生成器。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E3779B97F4A7C15);
        mix64(self.state)
    }

    pub fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    /// `[0, bound)` 内的值；`bound == 0` 时返回 0。
    pub fn below(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        self.next_u64() % bound
    }
}

/// splitmix64 的 finalizer，也用作 ISN / 种子的散列。
pub fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// 百分比（0..=100）转 32 bit 定点概率
fn pct_to_fixed(pct: f64) -> Option<u32> {
    if pct <= 0.0 {
        return None;
    }
    let p = (pct / 100.0).min(1.0);
    Some((p * f64::from(u32::MAX)) as u32)
}

/// 单条链路的损伤参数与状态
#[derive(Debug, Clone)]
pub struct Impairment {
    /// 丢包率（32 bit 定点数）；`None` 表示不丢包
    pub lossrate: Option<u32>,
    /// 脉冲窗口：`count < threshold` 时才可能丢包
    pub threshold: u32,
    /// 当前脉冲计数，减到 0 后回到 `reset`
    pub count: u32,
    pub reset: u32,
    /// 额外时延上限；每帧在 `[0, jitter]` 内取值，可造成乱序
    pub jitter: SimTime,
    /// 重复概率（32 bit 定点数）
    pub duplicate_rate: Option<u32>,
    prng: SplitMix64,
}

impl Default for Impairment {
    fn default() -> Self {
        Self::none()
    }
}

impl Impairment {
    /// 理想链路
    pub fn none() -> Self {
        Self {
            lossrate: None,
            threshold: 1,
            count: 0,
            reset: 0,
            jitter: SimTime::ZERO,
            duplicate_rate: None,
            prng: SplitMix64::new(0),
        }
    }

    /// 均匀随机丢包
    pub fn uniform(loss_pct: f64, seed: u64) -> Self {
        Self {
            lossrate: pct_to_fixed(loss_pct),
            prng: SplitMix64::new(seed),
            ..Self::none()
        }
    }

    /// 脉冲式突发丢包：每 `length` 帧中固定丢 `high` 帧，连续丢包数有上界。
    pub fn pulsed(high: u32, length: u32) -> Self {
        assert!(length > 0, "pulse length must not be zero");
        assert!(high <= length, "high part must fit in the pulse length");
        Self {
            lossrate: Some(u32::MAX),
            threshold: high,
            count: length - 1,
            reset: length - 1,
            ..Self::none()
        }
    }

    pub fn with_jitter(mut self, jitter: SimTime) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_duplication(mut self, dup_pct: f64) -> Self {
        self.duplicate_rate = pct_to_fixed(dup_pct);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.prng = SplitMix64::new(seed);
        self
    }

    /// 决定下一帧是否丢失
    pub fn lose(&mut self) -> bool {
        let in_window = self.count < self.threshold;
        let roll = self.prng.next_u32();
        let fate = matches!(self.lossrate, Some(rate) if roll <= rate);
        self.count = self.count.checked_sub(1).unwrap_or(self.reset);
        fate && in_window
    }

    /// 决定是否额外投递一份副本
    pub fn duplicate(&mut self) -> bool {
        match self.duplicate_rate {
            Some(rate) => self.prng.next_u32() <= rate,
            None => false,
        }
    }

    /// 本帧的额外时延
    pub fn extra_delay(&mut self) -> SimTime {
        if self.jitter == SimTime::ZERO {
            return SimTime::ZERO;
        }
        SimTime(self.prng.below(self.jitter.0.saturating_add(1)))
    }
}
