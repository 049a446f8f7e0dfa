//! 世界 trait
//!
//! 定义仿真世界接口。

use super::simulator::Simulator;
use std::any::Any;

/// 仿真世界：由业务层实现（例如 mote 网络）。
pub trait World: Any {
    fn as_any_mut(&mut self) -> &mut dyn Any;
    /// 每个事件执行完毕后调用一次（run-to-completion 之后的钩子）
    fn on_event_done(&mut self, _sim: &mut Simulator) {}
}
