//! 传输层模块
//!
//! mote 网络上的简化 TCP：段格式、连接状态、连接状态机与协议栈。

pub mod segment;
pub mod state;
pub mod tcp;

pub use segment::{Flag, Segment, SegmentError, TCP_HEADER_SIZE, TCP_PAYLOAD_SIZE, TCP_SEGMENT_SIZE};
pub use state::TcpState;
pub use tcp::{ConnEvent, ConnKey, TcpConfig, TcpConn, TcpError, TcpNotice, TcpStack};
