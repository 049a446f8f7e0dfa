use serde::Serialize;

use crate::net::DropReason;
use crate::net::packet::Protocol;
use crate::proto::{ConnEvent, ConnKey, TcpState};

/// 可视化事件类型
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VizEventKind {
    /// 拓扑元信息（作为 t=0 的第一条事件）
    Meta {
        nodes: Vec<VizNodeInfo>,
        links: Vec<VizLinkInfo>,
    },
    /// 帧交给链路，将在 `arrive_ns` 到达
    FrameTx {
        from: u16,
        to: u16,
        arrive_ns: u64,
        duplicate: bool,
    },
    /// 帧在链路上丢失
    FrameLost { from: u16, to: u16 },
    /// 节点收到一帧
    FrameRx { node: u16, from: u16 },
    /// 按路由表单播转发
    Forward { node: u16, next_hop: u16 },
    /// 洪泛 / 链路本地广播
    Flood { node: u16 },
    /// 本地交付
    Delivered { node: u16 },
    Drop { node: u16, reason: DropReason },
    /// TCP：发出一个段
    TcpSend(VizTcp),
    /// TCP：状态迁移
    TcpState {
        node: u16,
        conn: VizConn,
        from: TcpState,
        to: TcpState,
    },
    /// TCP：连接事件
    ConnEvent {
        node: u16,
        conn: VizConn,
        event: ConnEvent,
    },
    /// 路由表项的代价或下一跳变化
    RouteChange {
        node: u16,
        dest: u16,
        cost: u8,
        next_hop: u16,
    },
    /// mote 开机 / 关机
    Power { node: u16, on: bool },
}

/// packet 的类别（便于可视化上色）
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VizPacketKind {
    Ping,
    PingReply,
    Flood,
    Name,
    Tcp,
    Dv,
    Cmd,
}

impl From<Protocol> for VizPacketKind {
    fn from(p: Protocol) -> Self {
        match p {
            Protocol::Ping => Self::Ping,
            Protocol::PingReply => Self::PingReply,
            Protocol::Flood => Self::Flood,
            Protocol::Name => Self::Name,
            Protocol::Tcp => Self::Tcp,
            Protocol::DistanceVector => Self::Dv,
            Protocol::Command => Self::Cmd,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VizNodeInfo {
    pub id: u16,
    pub powered: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct VizLinkInfo {
    pub from: u16,
    pub to: u16,
    /// 单向传播时延（ns）
    pub latency_ns: u64,
    pub up: bool,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct VizConn {
    pub local_port: u8,
    pub remote: u16,
    pub remote_port: u8,
}

impl From<ConnKey> for VizConn {
    fn from(k: ConnKey) -> Self {
        Self {
            local_port: k.local_port,
            remote: k.remote.0,
            remote_port: k.remote_port,
        }
    }
}

/// 与 TCP 段有关的字段
#[derive(Debug, Clone, Serialize)]
pub struct VizTcp {
    pub node: u16,
    pub conn: VizConn,
    pub flag: &'static str,
    pub seq: u16,
    pub len: u8,
    pub window: u16,
    /// 是否为超时重传
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub retrans: bool,
}

/// 一个可回放的事件（JSON）
#[derive(Debug, Clone, Serialize)]
pub struct VizEvent {
    /// 仿真时间（纳秒，和 `SimTime.0` 同口径）
    pub t_ns: u64,
    pub pkt_src: Option<u16>,
    pub pkt_seq: Option<u16>,
    pub pkt_kind: Option<VizPacketKind>,
    #[serde(flatten)]
    pub kind: VizEventKind,
}

/// 一个简单的事件收集器（存内存，仿真结束写 JSON 文件）
#[derive(Debug, Default)]
pub struct VizLogger {
    pub events: Vec<VizEvent>,
}

impl VizLogger {
    pub fn push(&mut self, ev: VizEvent) {
        self.events.push(ev);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
