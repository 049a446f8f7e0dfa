//! 事件 trait
//!
//! 定义仿真事件接口：帧到达、定时器 tick、应用/控制命令都是事件。

use super::simulator::Simulator;
use super::world::World;

/// 事件：可被调度执行。使用 `self: Box<Self>` 以支持 move/所有权转移。
///
/// 每个事件执行到完成后才会处理下一个事件，事件处理过程中不会被抢占。
pub trait Event: Send + 'static {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World);
}
