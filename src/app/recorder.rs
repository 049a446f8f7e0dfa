use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;

use super::Application;
use crate::net::NodeId;
use crate::proto::{ConnEvent, ConnKey, TcpStack};
use crate::sim::SimTime;

/// 记录每条连接收到的字节与连接事件
#[derive(Debug, Default, Clone)]
pub struct RecorderLog {
    pub received: BTreeMap<ConnKey, Vec<u8>>,
    pub events: Vec<(ConnKey, ConnEvent)>,
    /// 还允许取走多少字节；`None` 表示不限（用于制造接收端背压）
    pub budget: Option<usize>,
}

impl RecorderLog {
    pub fn received_from(&self, remote: NodeId) -> Vec<u8> {
        self.received
            .iter()
            .filter(|(k, _)| k.remote == remote)
            .flat_map(|(_, v)| v.iter().copied())
            .collect()
    }

    pub fn saw(&self, event: ConnEvent) -> bool {
        self.events.iter().any(|(_, e)| *e == event)
    }
}

/// 按脚本行事的应用：可选监听、主动连接、连接建立后写出一段数据、写完后关闭。
pub struct Recorder {
    listen_port: Option<u8>,
    connect_to: Option<(u8, NodeId, u8)>,
    payload: Vec<u8>,
    close_after_send: bool,
    started: bool,
    conn: Option<ConnKey>,
    established: bool,
    sent: usize,
    closed: bool,
    log: Arc<Mutex<RecorderLog>>,
}

impl Recorder {
    pub fn new(log: Arc<Mutex<RecorderLog>>) -> Self {
        Self {
            listen_port: None,
            connect_to: None,
            payload: Vec::new(),
            close_after_send: false,
            started: false,
            conn: None,
            established: false,
            sent: 0,
            closed: false,
            log,
        }
    }

    pub fn listening(mut self, port: u8) -> Self {
        self.listen_port = Some(port);
        self
    }

    pub fn connecting(mut self, local_port: u8, dest: NodeId, dest_port: u8) -> Self {
        self.connect_to = Some((local_port, dest, dest_port));
        self
    }

    pub fn sending(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.payload = bytes.into();
        self
    }

    pub fn closing(mut self) -> Self {
        self.close_after_send = true;
        self
    }
}

impl Application for Recorder {
    fn on_deliver(&mut self, conn: ConnKey, bytes: &[u8]) -> usize {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        let take = log.budget.map_or(bytes.len(), |b| b.min(bytes.len()));
        if let Some(b) = log.budget.as_mut() {
            *b -= take;
        }
        log.received
            .entry(conn)
            .or_default()
            .extend_from_slice(&bytes[..take]);
        take
    }

    fn on_connection_event(&mut self, conn: ConnKey, event: ConnEvent) {
        if Some(conn) == self.conn && event == ConnEvent::Established {
            self.established = true;
        }
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.events.push((conn, event));
    }

    fn poll(&mut self, tcp: &mut TcpStack, now: SimTime) {
        if !self.started {
            self.started = true;
            if let Some(port) = self.listen_port {
                if let Err(err) = tcp.listen(port) {
                    warn!(%err, "Recorder 监听失败");
                }
            }
            if let Some((local_port, dest, dest_port)) = self.connect_to {
                match tcp.connect(local_port, dest, dest_port, now) {
                    Ok(key) => self.conn = Some(key),
                    Err(err) => warn!(%err, "Recorder 连接失败"),
                }
            }
        }
        let Some(conn) = self.conn else {
            return;
        };
        if !self.established || self.closed {
            return;
        }
        if self.sent < self.payload.len() {
            match tcp.send(conn, &self.payload[self.sent..], now) {
                Ok(n) => self.sent += n,
                Err(err) => {
                    warn!(%err, %conn, "Recorder 写入失败");
                    self.closed = true;
                    return;
                }
            }
        }
        if self.close_after_send && self.sent == self.payload.len() {
            self.closed = true;
            if let Err(err) = tcp.close(conn, now) {
                warn!(%err, %conn, "Recorder 关闭失败");
            }
        }
    }
}
