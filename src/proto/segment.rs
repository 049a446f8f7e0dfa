//! 传输层段（Transport Segment Framer）
//!
//! 段放在网络层包的 20 字节载荷里：8 字节头部 + 最多 12 字节数据，大端。
//!
//! ```text
//!  0        1         2     4               6      7             8          20
//!  +--------+---------+-----+---------------+------+-------------+----------+
//!  |src_port|dest_port| seq | advert_window | flag | payload_size| payload  |
//!  +--------+---------+-----+---------------+------+-------------+----------+
//! ```
//!
//! `flag` 是单选值而不是位掩码：一个段只承担 SYN / ACK / FIN / DAT 中的一种角色。

use std::fmt;

use thiserror::Error;

/// 段头长度
pub const TCP_HEADER_SIZE: usize = 8;
/// 段载荷上限
pub const TCP_PAYLOAD_SIZE: usize = 20 - TCP_HEADER_SIZE;
/// 整段长度
pub const TCP_SEGMENT_SIZE: usize = TCP_HEADER_SIZE + TCP_PAYLOAD_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    Syn,
    Ack,
    Fin,
    Dat,
}

impl Flag {
    pub fn as_u8(self) -> u8 {
        match self {
            Flag::Syn => 0,
            Flag::Ack => 1,
            Flag::Fin => 2,
            Flag::Dat => 3,
        }
    }

    pub fn from_u8(raw: u8) -> Option<Flag> {
        match raw {
            0 => Some(Flag::Syn),
            1 => Some(Flag::Ack),
            2 => Some(Flag::Fin),
            3 => Some(Flag::Dat),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Flag::Syn => "SYN",
            Flag::Ack => "ACK",
            Flag::Fin => "FIN",
            Flag::Dat => "DAT",
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SegmentError {
    #[error("segment payload of {len} bytes exceeds {max}")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("malformed segment: {0}")]
    Malformed(&'static str),
}

/// 传输层段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub src_port: u8,
    pub dest_port: u8,
    pub seq: u16,
    pub advert_window: u16,
    pub flag: Flag,
    payload_size: u8,
    payload: [u8; TCP_PAYLOAD_SIZE],
}

impl Segment {
    pub fn new(
        src_port: u8,
        dest_port: u8,
        seq: u16,
        advert_window: u16,
        flag: Flag,
        payload: &[u8],
    ) -> Result<Segment, SegmentError> {
        if payload.len() > TCP_PAYLOAD_SIZE {
            return Err(SegmentError::PayloadTooLarge {
                len: payload.len(),
                max: TCP_PAYLOAD_SIZE,
            });
        }
        let mut buf = [0u8; TCP_PAYLOAD_SIZE];
        buf[..payload.len()].copy_from_slice(payload);
        Ok(Segment {
            src_port,
            dest_port,
            seq,
            advert_window,
            flag,
            payload_size: payload.len() as u8,
            payload: buf,
        })
    }

    /// 不带数据的控制段（SYN / ACK / FIN / 零窗口探测）
    pub fn control(src_port: u8, dest_port: u8, seq: u16, advert_window: u16, flag: Flag) -> Segment {
        Segment {
            src_port,
            dest_port,
            seq,
            advert_window,
            flag,
            payload_size: 0,
            payload: [0u8; TCP_PAYLOAD_SIZE],
        }
    }

    pub fn payload_size(&self) -> u8 {
        self.payload_size
    }

    /// 有效数据
    pub fn payload(&self) -> &[u8] {
        &self.payload[..usize::from(self.payload_size)]
    }

    pub fn encode(&self) -> [u8; TCP_SEGMENT_SIZE] {
        let mut out = [0u8; TCP_SEGMENT_SIZE];
        out[0] = self.src_port;
        out[1] = self.dest_port;
        out[2..4].copy_from_slice(&self.seq.to_be_bytes());
        out[4..6].copy_from_slice(&self.advert_window.to_be_bytes());
        out[6] = self.flag.as_u8();
        out[7] = self.payload_size;
        out[TCP_HEADER_SIZE..].copy_from_slice(&self.payload);
        out
    }

    /// 从包载荷解码；载荷少于 20 字节、flag 非法或 payload_size 越界都视为畸形。
    pub fn decode(bytes: &[u8]) -> Result<Segment, SegmentError> {
        if bytes.len() < TCP_SEGMENT_SIZE {
            return Err(SegmentError::Malformed("segment shorter than 20 bytes"));
        }
        let flag = Flag::from_u8(bytes[6]).ok_or(SegmentError::Malformed("unknown flag"))?;
        let payload_size = bytes[7];
        if usize::from(payload_size) > TCP_PAYLOAD_SIZE {
            return Err(SegmentError::Malformed("payload_size above 12"));
        }
        let mut payload = [0u8; TCP_PAYLOAD_SIZE];
        payload[..usize::from(payload_size)]
            .copy_from_slice(&bytes[TCP_HEADER_SIZE..TCP_HEADER_SIZE + usize::from(payload_size)]);
        Ok(Segment {
            src_port: bytes[0],
            dest_port: bytes[1],
            seq: u16::from_be_bytes([bytes[2], bytes[3]]),
            advert_window: u16::from_be_bytes([bytes[4], bytes[5]]),
            flag,
            payload_size,
            payload,
        })
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "src_port: {}, dest_port: {}, seq: {}, advert_window: {}, flag: {}, payload_size: {}",
            self.src_port, self.dest_port, self.seq, self.advert_window, self.flag, self.payload_size
        )
    }
}
