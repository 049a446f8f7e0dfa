//! 结构化事件记录（用于离线回放 / 分析）
//!
//! 设计目标：
//! - **结构化**：用 JSON 事件而不是解析文本日志
//! - **轻量**：只收集在内存里，仿真结束后一次性写出
//! - **可过滤**：每条事件带节点与包的 (src, seq)，便于按节点或按包追踪

mod types;

pub use types::{
    VizConn, VizEvent, VizEventKind, VizLinkInfo, VizLogger, VizNodeInfo, VizPacketKind, VizTcp,
};
