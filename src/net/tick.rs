//! mote 定时器事件

use super::id::NodeId;
use super::net_world::NetWorld;
use crate::sim::{Event, Simulator, World};

/// 事件：mote 的周期性 tick，执行后按 mote 的 tick 周期重新调度自己。
///
/// `epoch` 与 mote 当前的开机次数不一致时（关机或重启过），事件直接结束。
#[derive(Debug)]
pub struct MoteTick {
    pub node: NodeId,
    pub epoch: u64,
}

impl Event for MoteTick {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) {
        let w = world
            .as_any_mut()
            .downcast_mut::<NetWorld>()
            .expect("world must be NetWorld");
        if let Some(period) = w.net.tick(self.node, self.epoch, sim) {
            sim.schedule_in(period, *self);
        }
    }
}
