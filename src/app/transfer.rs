//! 传输测试应用：客户端按序写出 `0..transfer` 的 u16（大端），服务端解码并打印。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, warn};

use super::Application;
use crate::net::NodeId;
use crate::proto::{ConnEvent, ConnKey, TcpStack};
use crate::sim::SimTime;

/// 服务端收到的数值与连接事件
#[derive(Debug, Default, Clone)]
pub struct TransferServerLog {
    pub values: Vec<(ConnKey, u16)>,
    pub events: Vec<(ConnKey, ConnEvent)>,
}

/// 监听端口、接受任意数量的连接；对端关闭后本端也关闭。
pub struct TransferServer {
    port: u8,
    listening: bool,
    /// 每条连接上半个 u16 的残留字节
    carry: HashMap<ConnKey, u8>,
    to_close: Vec<ConnKey>,
    log: Arc<Mutex<TransferServerLog>>,
}

impl TransferServer {
    pub fn new(port: u8) -> Self {
        Self::with_log(port, Arc::new(Mutex::new(TransferServerLog::default())))
    }

    pub fn with_log(port: u8, log: Arc<Mutex<TransferServerLog>>) -> Self {
        Self {
            port,
            listening: false,
            carry: HashMap::new(),
            to_close: Vec::new(),
            log,
        }
    }

    pub fn log(&self) -> Arc<Mutex<TransferServerLog>> {
        Arc::clone(&self.log)
    }
}

impl Application for TransferServer {
    fn owns(&self, conn: &ConnKey) -> bool {
        conn.local_port == self.port
    }

    fn on_deliver(&mut self, conn: ConnKey, bytes: &[u8]) -> usize {
        let mut values = Vec::new();
        let mut rest = bytes;
        if let Some(hi) = self.carry.remove(&conn) {
            if let Some((&lo, tail)) = rest.split_first() {
                values.push(u16::from_be_bytes([hi, lo]));
                rest = tail;
            } else {
                self.carry.insert(conn, hi);
            }
        }
        let mut pairs = rest.chunks_exact(2);
        values.extend(pairs.by_ref().map(|p| u16::from_be_bytes([p[0], p[1]])));
        if let [odd] = pairs.remainder() {
            self.carry.insert(conn, *odd);
        }

        for v in &values {
            info!(%conn, value = v, "📥 Reading Data");
        }
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.values.extend(values.into_iter().map(|v| (conn, v)));
        bytes.len()
    }

    fn on_connection_event(&mut self, conn: ConnKey, event: ConnEvent) {
        match event {
            ConnEvent::PeerClosed => self.to_close.push(conn),
            ConnEvent::Closed | ConnEvent::Failed => {
                self.carry.remove(&conn);
            }
            ConnEvent::Established => {}
        }
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.events.push((conn, event));
    }

    fn poll(&mut self, tcp: &mut TcpStack, now: SimTime) {
        if !self.listening {
            if let Err(err) = tcp.listen(self.port) {
                warn!(%err, port = self.port, "服务端监听失败");
            }
            self.listening = true;
        }
        for conn in std::mem::take(&mut self.to_close) {
            if let Err(err) = tcp.close(conn, now) {
                warn!(%err, %conn, "服务端关闭连接失败");
            }
        }
    }
}

/// 客户端的连接事件与写出进度
#[derive(Debug, Default, Clone)]
pub struct TransferClientLog {
    pub events: Vec<(ConnKey, ConnEvent)>,
    pub bytes_written: usize,
}

/// 连接到服务端，写出 `transfer` 个 u16；可选写完即关闭。
pub struct TransferClient {
    local_port: u8,
    dest: NodeId,
    dest_port: u8,
    transfer: u16,
    close_when_done: bool,
    conn: Option<ConnKey>,
    established: bool,
    written: usize,
    close_issued: bool,
    finished: bool,
    log: Arc<Mutex<TransferClientLog>>,
}

impl TransferClient {
    pub fn new(local_port: u8, dest: NodeId, dest_port: u8, transfer: u16) -> Self {
        Self {
            local_port,
            dest,
            dest_port,
            transfer,
            close_when_done: false,
            conn: None,
            established: false,
            written: 0,
            close_issued: false,
            finished: false,
            log: Arc::new(Mutex::new(TransferClientLog::default())),
        }
    }

    pub fn close_when_done(mut self) -> Self {
        self.close_when_done = true;
        self
    }

    pub fn with_log(mut self, log: Arc<Mutex<TransferClientLog>>) -> Self {
        self.log = log;
        self
    }

    pub fn log(&self) -> Arc<Mutex<TransferClientLog>> {
        Arc::clone(&self.log)
    }

    fn total_bytes(&self) -> usize {
        usize::from(self.transfer) * 2
    }

    fn stream_bytes(&self, from: usize, max: usize) -> Vec<u8> {
        (from..self.total_bytes().min(from + max))
            .map(|i| {
                let v = (i / 2) as u16;
                v.to_be_bytes()[i % 2]
            })
            .collect()
    }
}

impl Application for TransferClient {
    fn owns(&self, conn: &ConnKey) -> bool {
        conn.local_port == self.local_port
            && conn.remote == self.dest
            && conn.remote_port == self.dest_port
    }

    fn on_deliver(&mut self, _conn: ConnKey, bytes: &[u8]) -> usize {
        bytes.len()
    }

    fn on_connection_event(&mut self, conn: ConnKey, event: ConnEvent) {
        match event {
            ConnEvent::Established => self.established = true,
            ConnEvent::Closed | ConnEvent::Failed => self.finished = true,
            ConnEvent::PeerClosed => {}
        }
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.events.push((conn, event));
    }

    fn poll(&mut self, tcp: &mut TcpStack, now: SimTime) {
        if self.finished {
            return;
        }
        let Some(conn) = self.conn else {
            match tcp.connect(self.local_port, self.dest, self.dest_port, now) {
                Ok(key) => self.conn = Some(key),
                Err(err) => {
                    warn!(%err, "客户端连接失败");
                    self.finished = true;
                }
            }
            return;
        };
        if !self.established {
            return;
        }
        if self.written < self.total_bytes() {
            let chunk = self.stream_bytes(self.written, tcp.config().send_buffer);
            match tcp.send(conn, &chunk, now) {
                Ok(n) => {
                    self.written += n;
                    let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
                    log.bytes_written = self.written;
                }
                Err(err) => {
                    warn!(%err, %conn, "客户端写入失败");
                    self.finished = true;
                    return;
                }
            }
        }
        if self.close_when_done && !self.close_issued && self.written >= self.total_bytes() {
            self.close_issued = true;
            info!(%conn, "👋 客户端数据写完，关闭连接");
            if let Err(err) = tcp.close(conn, now) {
                warn!(%err, %conn, "客户端关闭失败");
            }
        }
    }
}
