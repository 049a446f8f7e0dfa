//! 网络层数据包（Packet Framer）
//!
//! 固定 28 字节：8 字节头部 + 20 字节载荷，多字节字段一律大端（网络序）。
//!
//! ```text
//!  0      2      4      6    7        8                    28
//!  +------+------+------+----+--------+--------------------+
//!  | dest | src  | seq  |TTL |protocol|   payload[20]      |
//!  +------+------+------+----+--------+--------------------+
//! ```

use std::fmt;

use thiserror::Error;

use super::id::NodeId;

/// 整包长度（字节）
pub const PACKET_SIZE: usize = 28;
/// 头部长度（字节）
pub const PACKET_HEADER_LENGTH: usize = 8;
/// 最大载荷长度（字节）
pub const PACKET_MAX_PAYLOAD_SIZE: usize = PACKET_SIZE - PACKET_HEADER_LENGTH;
/// 最大跳数预算
pub const MAX_TTL: u8 = 15;

/// 一帧线上字节
pub type Frame = [u8; PACKET_SIZE];

/// 载荷协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Ping,
    PingReply,
    /// 洪泛
    Flood,
    Name,
    Tcp,
    DistanceVector,
    Command,
}

impl Protocol {
    pub fn as_u8(self) -> u8 {
        match self {
            Protocol::Ping => 0,
            Protocol::PingReply => 1,
            Protocol::Flood => 2,
            Protocol::Name => 3,
            Protocol::Tcp => 4,
            Protocol::DistanceVector => 5,
            Protocol::Command => 99,
        }
    }

    pub fn from_u8(raw: u8) -> Option<Protocol> {
        Some(match raw {
            0 => Protocol::Ping,
            1 => Protocol::PingReply,
            2 => Protocol::Flood,
            3 => Protocol::Name,
            4 => Protocol::Tcp,
            5 => Protocol::DistanceVector,
            99 => Protocol::Command,
            _ => return None,
        })
    }

    /// 洪泛类协议：按 (src, seq) 去重后向所有邻居转播
    pub fn is_flood_class(self) -> bool {
        matches!(self, Protocol::Flood | Protocol::Name)
    }

    /// 链路本地协议：广播时只在本地交付，不转发
    pub fn is_link_local(self) -> bool {
        matches!(self, Protocol::Ping | Protocol::PingReply | Protocol::DistanceVector)
    }

    pub fn name(self) -> &'static str {
        match self {
            Protocol::Ping => "PING",
            Protocol::PingReply => "PINGREPLY",
            Protocol::Flood => "LINKEDLIST",
            Protocol::Name => "NAME",
            Protocol::Tcp => "TCP",
            Protocol::DistanceVector => "DV",
            Protocol::Command => "CMD",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 编解码错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("payload of {len} bytes exceeds the {max}-byte packet payload")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("malformed packet: {0}")]
    Malformed(&'static str),
}

/// 网络数据包
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub dest: NodeId,
    pub src: NodeId,
    pub seq: u16,
    pub ttl: u8,
    pub protocol: Protocol,
    payload: [u8; PACKET_MAX_PAYLOAD_SIZE],
}

impl Packet {
    /// 创建数据包；载荷超过 20 字节时报错（调用方需先分段）。
    pub fn new(
        dest: NodeId,
        src: NodeId,
        seq: u16,
        ttl: u8,
        protocol: Protocol,
        payload: &[u8],
    ) -> Result<Packet, FrameError> {
        if payload.len() > PACKET_MAX_PAYLOAD_SIZE {
            return Err(FrameError::PayloadTooLarge {
                len: payload.len(),
                max: PACKET_MAX_PAYLOAD_SIZE,
            });
        }
        let mut buf = [0u8; PACKET_MAX_PAYLOAD_SIZE];
        buf[..payload.len()].copy_from_slice(payload);
        Ok(Packet {
            dest,
            src,
            seq,
            ttl: ttl.min(MAX_TTL),
            protocol,
            payload: buf,
        })
    }

    /// 载荷（总是 20 字节，未使用部分为 0）
    pub fn payload(&self) -> &[u8; PACKET_MAX_PAYLOAD_SIZE] {
        &self.payload
    }

    /// 转发前的 TTL 递减；TTL 已为 0 时返回 None（不可再转发）。
    pub fn decremented(&self) -> Option<Packet> {
        let ttl = self.ttl.checked_sub(1)?;
        Some(Packet {
            ttl,
            ..self.clone()
        })
    }

    /// 编码为 28 字节线上格式
    pub fn encode(&self) -> Frame {
        let mut out = [0u8; PACKET_SIZE];
        out[0..2].copy_from_slice(&self.dest.0.to_be_bytes());
        out[2..4].copy_from_slice(&self.src.0.to_be_bytes());
        out[4..6].copy_from_slice(&self.seq.to_be_bytes());
        out[6] = self.ttl;
        out[7] = self.protocol.as_u8();
        out[PACKET_HEADER_LENGTH..].copy_from_slice(&self.payload);
        out
    }

    /// 从线上字节解码；长度必须恰为 28 字节。
    pub fn decode(bytes: &[u8]) -> Result<Packet, FrameError> {
        if bytes.len() != PACKET_SIZE {
            return Err(FrameError::Malformed("packet must be exactly 28 bytes"));
        }
        let ttl = bytes[6];
        if ttl > MAX_TTL {
            return Err(FrameError::Malformed("ttl above MAX_TTL"));
        }
        let protocol =
            Protocol::from_u8(bytes[7]).ok_or(FrameError::Malformed("unknown protocol id"))?;
        let mut payload = [0u8; PACKET_MAX_PAYLOAD_SIZE];
        payload.copy_from_slice(&bytes[PACKET_HEADER_LENGTH..]);
        Ok(Packet {
            dest: NodeId(u16::from_be_bytes([bytes[0], bytes[1]])),
            src: NodeId(u16::from_be_bytes([bytes[2], bytes[3]])),
            seq: u16::from_be_bytes([bytes[4], bytes[5]]),
            ttl,
            protocol,
            payload,
        })
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Src: {} Dest: {} Seq: {} TTL: {} Protocol: {}",
            self.src, self.dest, self.seq, self.ttl, self.protocol
        )
    }
}
