//! 仿真器
//!
//! 定义事件驱动仿真器，维护当前时间与事件队列。
//! 单线程、run-to-completion：一次只执行一个事件，执行完才取下一个。

use super::event::Event;
use super::scheduled_event::ScheduledEvent;
use super::time::SimTime;
use super::world::World;
use std::collections::BinaryHeap;
use tracing::{debug, info, trace};

/// 事件驱动仿真器：维护当前时间与事件队列。
#[derive(Default)]
pub struct Simulator {
    now: SimTime,
    next_seq: u64,
    executed: u64,
    q: BinaryHeap<ScheduledEvent>,
}

impl Simulator {
    /// 获取当前仿真时间
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// 队列中尚未执行的事件数
    pub fn pending(&self) -> usize {
        self.q.len()
    }

    /// 已执行的事件总数
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// 调度事件在指定时间执行；早于当前时间的请求按当前时间处理。
    #[tracing::instrument(level = "trace", skip(self, ev), fields(event_type = std::any::type_name::<E>(), schedule_at = %at))]
    pub fn schedule<E: Event>(&mut self, at: SimTime, ev: E) {
        let at = at.max(self.now);
        let seq = self.next_seq;
        trace!(now = %self.now, seq, "调度事件");

        self.next_seq = self.next_seq.wrapping_add(1);
        self.q.push(ScheduledEvent {
            at,
            seq,
            kind: std::any::type_name::<E>(),
            ev: Box::new(ev),
        });
    }

    /// 在当前时间之后 `delay` 调度事件
    pub fn schedule_in<E: Event>(&mut self, delay: SimTime, ev: E) {
        let at = self.now.after(delay);
        self.schedule(at, ev);
    }

    /// 执行队首事件；队列为空时返回 false。
    pub fn step(&mut self, world: &mut dyn World) -> bool {
        let Some(item) = self.q.pop() else {
            return false;
        };
        self.now = item.at;
        self.executed = self.executed.wrapping_add(1);
        trace!(now = %self.now, seq = item.seq, kind = item.kind, "执行事件");
        item.ev.execute(self, world);
        world.on_event_done(self);
        true
    }

    /// 运行直到事件队列为空或到达 `until`（含 `until` 时刻的事件）。
    pub fn run_until(&mut self, until: SimTime, world: &mut dyn World) {
        debug!(now = %self.now, until = %until, queue_size = self.q.len(), "▶️  运行到指定时间");
        while let Some(top) = self.q.peek() {
            if top.at > until {
                break;
            }
            self.step(world);
        }
        self.now = self.now.max(until);
    }

    /// 运行所有事件直到队列为空。
    ///
    /// mote 的 tick 会不断自我调度，带 mote 的世界应使用 [`Simulator::run_until`]。
    #[tracing::instrument(skip(self, world))]
    pub fn run(&mut self, world: &mut dyn World) {
        info!("▶️  开始运行仿真");
        let start = self.executed;
        while self.step(world) {}
        info!(
            total_events = self.executed - start,
            final_time = %self.now,
            "✅ 仿真完成"
        );
    }
}
