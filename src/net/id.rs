//! 标识符类型
//!
//! 定义 mote 和链路的唯一标识符。

use std::fmt;

/// mote（节点）标识符，线上为 16 bit。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u16);

impl NodeId {
    /// 广播地址（TinyOS 的 `AM_BROADCAST_ADDR`）
    pub const BROADCAST: NodeId = NodeId(0xFFFF);

    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_broadcast() {
            f.write_str("*")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// 链路标识符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub usize);
