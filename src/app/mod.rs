//! 应用层
//!
//! 应用通过 [`Application`] 与 mote 上的 TCP 协议栈交互：
//! 协议栈把按序数据和连接事件回调给应用，应用在 [`Application::poll`] 中
//! 主动调用 `listen` / `connect` / `send` / `close`。

mod recorder;
mod transfer;

pub use recorder::{Recorder, RecorderLog};
pub use transfer::{TransferClient, TransferClientLog, TransferServer, TransferServerLog};

use tracing::trace;

use crate::proto::{ConnEvent, ConnKey, TcpStack};
use crate::sim::SimTime;

/// 运行在 mote 上的应用
pub trait Application: Send {
    /// 该连接的数据与事件是否归本应用处理
    fn owns(&self, _conn: &ConnKey) -> bool {
        true
    }

    /// 交付按序数据，返回本次取走的字节数；没取走的部分留在接收缓冲里。
    fn on_deliver(&mut self, conn: ConnKey, bytes: &[u8]) -> usize;

    fn on_connection_event(&mut self, conn: ConnKey, event: ConnEvent);

    /// 每次 mote 处理完一个事件后调用
    fn poll(&mut self, _tcp: &mut TcpStack, _now: SimTime) {}
}

/// 一个 mote 上的全部应用：按 [`Application::owns`] 把回调分派给第一个认领的应用。
#[derive(Default)]
pub struct AppSet {
    apps: Vec<Box<dyn Application>>,
}

impl AppSet {
    pub fn push(&mut self, app: Box<dyn Application>) {
        self.apps.push(app);
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    fn owner(&mut self, conn: &ConnKey) -> Option<&mut Box<dyn Application>> {
        self.apps.iter_mut().find(|a| a.owns(conn))
    }
}

impl Application for AppSet {
    fn owns(&self, conn: &ConnKey) -> bool {
        self.apps.iter().any(|a| a.owns(conn))
    }

    fn on_deliver(&mut self, conn: ConnKey, bytes: &[u8]) -> usize {
        match self.owner(&conn) {
            Some(app) => app.on_deliver(conn, bytes),
            None => {
                // 没有应用认领：直接丢掉，避免窗口被永久占满
                trace!(%conn, len = bytes.len(), "无应用认领，丢弃数据");
                bytes.len()
            }
        }
    }

    fn on_connection_event(&mut self, conn: ConnKey, event: ConnEvent) {
        if let Some(app) = self.owner(&conn) {
            app.on_connection_event(conn, event);
        }
    }

    fn poll(&mut self, tcp: &mut TcpStack, now: SimTime) {
        for app in &mut self.apps {
            app.poll(tcp, now);
        }
    }
}
