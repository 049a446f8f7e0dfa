//! 帧到达事件

use super::id::NodeId;
use super::net_world::NetWorld;
use super::packet::Frame;
use crate::sim::{Event, Simulator, World};
use tracing::trace;

/// 事件：一帧经链路 `from -> to` 到达。
#[derive(Debug)]
pub struct DeliverFrame {
    pub from: NodeId,
    pub to: NodeId,
    pub frame: Frame,
}

impl Event for DeliverFrame {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) {
        let DeliverFrame { from, to, frame } = *self;
        trace!(%from, %to, now = %sim.now(), "📨 帧到达");
        let w = world
            .as_any_mut()
            .downcast_mut::<NetWorld>()
            .expect("world must be NetWorld");
        w.net.deliver(from, to, frame, sim);
    }
}
