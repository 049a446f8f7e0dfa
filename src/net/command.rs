//! 控制命令
//!
//! 命令（ping、打印路由表、启动测试应用等）作为仿真事件直接投递给目标 mote，
//! 同一套定义也用于场景 JSON。

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::id::NodeId;
use super::net_world::NetWorld;
use crate::sim::{Event, Simulator, World};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    /// 向 `dest` 发送带文本的 PING
    Ping { dest: u16, text: String },
    /// 全网洪泛一段文本
    Flood { text: String },
    /// 打印邻居表
    NeighborDump,
    /// 打印路由表
    RouteDump,
    /// 在 `port` 上启动传输服务端
    TestServer { port: u8 },
    /// 启动传输客户端，写出 `transfer` 个 u16
    TestClient {
        src_port: u8,
        dest: u16,
        dest_port: u8,
        transfer: u16,
        #[serde(default)]
        close_when_done: bool,
    },
    /// 关闭客户端连接
    CloseClient { src_port: u8, dest: u16, dest_port: u8 },
    /// 立即中止连接
    AbortClient { src_port: u8, dest: u16, dest_port: u8 },
    MoteOff,
    MoteOn,
    /// 断开与邻居 `to` 之间的双向链路
    LinkDown { to: u16 },
    LinkUp { to: u16 },
}

/// 事件：在某个 mote 上执行命令
#[derive(Debug)]
pub struct CommandEvent {
    pub node: NodeId,
    pub cmd: Command,
}

impl Event for CommandEvent {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) {
        let CommandEvent { node, cmd } = *self;
        let w = world
            .as_any_mut()
            .downcast_mut::<NetWorld>()
            .expect("world must be NetWorld");
        if let Err(err) = w.net.command(node, cmd, sim) {
            warn!(%node, %err, "命令执行失败");
        }
    }
}
