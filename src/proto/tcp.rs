//! TCP（简化版）协议实现
//!
//! 运行在多跳、有损的 mote 网络上的可靠字节流：
//! - 三次握手 / 四次挥手，十个状态（见 [`TcpState`]）；
//! - 16 bit 字节序号，SYN 与 FIN 各占一个序号；ACK 段的 `seq` 即累计确认号；
//! - 由对端通告窗口做流量控制（不做拥塞控制），零窗口时发 0 字节的 DAT 探测；
//! - 每个未确认段独立的超时重传，线性退避 `rto * (retries + 1)`，上限 `max_rto`；
//!   超过 `max_retries` 次仍未确认则中止连接并上报 `Failed`。
//!
//! `flag` 是单选值：应答方对 SYN 的回应也是一个 SYN（对发起方 SYN 的确认是隐含的）。

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::app::Application;
use crate::net::NodeId;
use crate::net::impair::mix64;
use crate::sim::SimTime;

use super::segment::{Flag, Segment, TCP_PAYLOAD_SIZE};
use super::state::TcpState;

/// 连接标识：(本地端口, 远端节点, 远端端口)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnKey {
    pub local_port: u8,
    pub remote: NodeId,
    pub remote_port: u8,
}

impl fmt::Display for ConnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{} <-> {}:{}", self.local_port, self.remote, self.remote_port)
    }
}

/// 上报给应用层的连接事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnEvent {
    Established,
    /// 对端已发送 FIN，本端进入 CLOSE_WAIT
    PeerClosed,
    Closed,
    /// 重传次数耗尽，连接已被销毁
    Failed,
}

/// 应用层调用错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TcpError {
    #[error("port {0} is already listening")]
    PortInUse(u8),
    #[error("connection {0} already exists")]
    ConnectionExists(ConnKey),
    #[error("no such connection {0}")]
    NoSuchConnection(ConnKey),
    #[error("connection {conn} cannot do that in state {state}")]
    InvalidState { conn: ConnKey, state: TcpState },
    #[error("connection table is full")]
    TooManyConnections,
}

#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// 发送缓冲（待发送 + 未确认，字节）
    pub send_buffer: usize,
    /// 接收缓冲（字节），即最大通告窗口
    pub recv_buffer: u16,
    /// 初始 RTO
    pub init_rto: SimTime,
    /// 最大 RTO（用于退避上限）
    pub max_rto: SimTime,
    /// 单个段最多重传次数
    pub max_retries: u32,
    /// TIME_WAIT 停留时长
    pub time_wait: SimTime,
    /// FIN_WAIT_2 空闲上限：对端一直不发 FIN 时到期关闭
    pub fin_wait2_timeout: SimTime,
    /// 同时存在的连接数上限
    pub max_connections: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            send_buffer: 128,
            recv_buffer: 64,
            init_rto: SimTime::from_millis(400),
            max_rto: SimTime::from_secs(2),
            max_retries: 6,
            time_wait: SimTime::from_secs(1),
            fin_wait2_timeout: SimTime::from_secs(10),
            max_connections: 16,
        }
    }
}

impl TcpConfig {
    /// 第 `retries` 次重传后的超时：线性退避并封顶
    pub fn backoff(&self, retries: u32) -> SimTime {
        let rto = self.init_rto.times(u64::from(retries) + 1);
        rto.min(self.max_rto.max(self.init_rto))
    }
}

/// 16 bit 序号空间比较（RFC 1982 风格）
pub fn seq_lt(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) < 0
}

pub fn seq_le(a: u16, b: u16) -> bool {
    a == b || seq_lt(a, b)
}

pub fn seq_gt(a: u16, b: u16) -> bool {
    seq_lt(b, a)
}

/// 待发出的段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outgoing {
    pub to: NodeId,
    pub seg: Segment,
    pub retransmit: bool,
}

/// 协议栈产生的通知（供 mote 记录日志 / 可视化）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpNotice {
    Transition {
        conn: ConnKey,
        from: TcpState,
        to: TcpState,
    },
    Event {
        conn: ConnKey,
        event: ConnEvent,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnStats {
    pub segments_sent: u64,
    pub retransmissions: u64,
    pub bytes_acked: u64,
    pub bytes_delivered: u64,
}

#[derive(Debug, Clone)]
struct Outstanding {
    seg: Segment,
    /// 该段之后的下一个序号
    end: u16,
    deadline: SimTime,
    retries: u32,
}

/// 一次事件处理期间可写的协议栈部件
struct Io<'a> {
    out: &'a mut Vec<Outgoing>,
    notices: &'a mut Vec<TcpNotice>,
    cfg: &'a TcpConfig,
    now: SimTime,
}

impl Io<'_> {
    fn notify(&mut self, app: &mut dyn Application, conn: ConnKey, event: ConnEvent) {
        info!(%conn, ?event, "🔔 连接事件");
        self.notices.push(TcpNotice::Event { conn, event });
        app.on_connection_event(conn, event);
    }
}

/// 连接记录
#[derive(Debug, Clone)]
pub struct TcpConn {
    key: ConnKey,
    state: TcpState,

    // sender
    iss: u16,
    snd_una: u16,
    snd_nxt: u16,
    peer_window: u16,
    send_queue: VecDeque<u8>,
    rtx: VecDeque<Outstanding>,
    fin_pending: bool,
    fin_seq: Option<u16>,
    close_requested: bool,
    probe_deadline: Option<SimTime>,
    probe_retries: u32,

    // receiver
    rcv_nxt: u16,
    recv_capacity: u16,
    recv_buf: VecDeque<u8>,
    out_of_order: HashMap<u16, Vec<u8>>,
    fin_received: bool,
    last_advertised: u16,

    linger_until: Option<SimTime>,
    stats: ConnStats,
}

impl TcpConn {
    fn new(key: ConnKey, state: TcpState, iss: u16, cfg: &TcpConfig) -> Self {
        Self {
            key,
            state,
            iss,
            snd_una: iss,
            snd_nxt: iss,
            peer_window: 0,
            send_queue: VecDeque::new(),
            rtx: VecDeque::new(),
            fin_pending: false,
            fin_seq: None,
            close_requested: false,
            probe_deadline: None,
            probe_retries: 0,
            rcv_nxt: 0,
            recv_capacity: cfg.recv_buffer,
            recv_buf: VecDeque::new(),
            out_of_order: HashMap::new(),
            fin_received: false,
            last_advertised: cfg.recv_buffer,
            linger_until: None,
            stats: ConnStats::default(),
        }
    }

    pub fn key(&self) -> ConnKey {
        self.key
    }

    pub fn state(&self) -> TcpState {
        self.state
    }

    pub fn initial_seq(&self) -> u16 {
        self.iss
    }

    /// 已发送未确认的数据字节（不含 SYN / FIN）
    pub fn bytes_in_flight(&self) -> usize {
        self.rtx
            .iter()
            .filter(|o| o.seg.flag == Flag::Dat)
            .map(|o| usize::from(o.seg.payload_size()))
            .sum()
    }

    /// 最近一次采纳的对端通告窗口
    pub fn peer_window(&self) -> u16 {
        self.peer_window
    }

    /// 本端当前可通告的接收窗口
    pub fn recv_window(&self) -> u16 {
        let used = u16::try_from(self.recv_buf.len()).unwrap_or(u16::MAX);
        self.recv_capacity.saturating_sub(used)
    }

    /// 尚未发出的应用数据
    pub fn unsent(&self) -> usize {
        self.send_queue.len()
    }

    /// 已收到、尚未被应用取走的数据
    pub fn buffered(&self) -> usize {
        self.recv_buf.len()
    }

    pub fn stats(&self) -> ConnStats {
        self.stats
    }

    fn set_state(&mut self, to: TcpState, io: &mut Io<'_>) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        info!(conn = %self.key, %from, %to, "🔁 TCP 状态迁移");
        io.notices.push(TcpNotice::Transition {
            conn: self.key,
            from,
            to,
        });
    }

    fn data_segment(&self, seq: u16, payload: &[u8]) -> Segment {
        Segment::new(
            self.key.local_port,
            self.key.remote_port,
            seq,
            self.recv_window(),
            Flag::Dat,
            payload,
        )
        .expect("chunk bounded by TCP_PAYLOAD_SIZE")
    }

    fn control_segment(&self, seq: u16, flag: Flag) -> Segment {
        Segment::control(
            self.key.local_port,
            self.key.remote_port,
            seq,
            self.recv_window(),
            flag,
        )
    }

    fn emit(&mut self, seg: Segment, retransmit: bool, io: &mut Io<'_>) {
        trace!(conn = %self.key, %seg, retransmit, "发出段");
        self.stats.segments_sent += 1;
        if retransmit {
            self.stats.retransmissions += 1;
        } else {
            self.last_advertised = seg.advert_window;
        }
        io.out.push(Outgoing {
            to: self.key.remote,
            seg,
            retransmit,
        });
    }

    /// 发送并放入重传队列
    fn send_reliable(&mut self, seg: Segment, end: u16, io: &mut Io<'_>) {
        self.rtx.push_back(Outstanding {
            seg,
            end,
            deadline: io.now.after(io.cfg.init_rto),
            retries: 0,
        });
        self.emit(seg, false, io);
    }

    fn send_ack(&mut self, io: &mut Io<'_>) {
        let seg = self.control_segment(self.rcv_nxt, Flag::Ack);
        self.emit(seg, false, io);
    }

    fn send_syn(&mut self, io: &mut Io<'_>) {
        let seg = self.control_segment(self.iss, Flag::Syn);
        self.snd_nxt = self.iss.wrapping_add(1);
        self.send_reliable(seg, self.snd_nxt, io);
    }

    fn can_send_data(&self) -> bool {
        match self.state {
            TcpState::Established | TcpState::CloseWait => true,
            TcpState::FinWait1 | TcpState::LastAck => self.fin_seq.is_none(),
            _ => false,
        }
    }

    /// 在窗口允许的范围内发出待发送数据，数据发完后再发 FIN。
    fn pump(&mut self, io: &mut Io<'_>) {
        if self.can_send_data() {
            while !self.send_queue.is_empty() {
                let avail = usize::from(self.peer_window).saturating_sub(self.bytes_in_flight());
                let len = TCP_PAYLOAD_SIZE.min(self.send_queue.len()).min(avail);
                if len == 0 {
                    self.arm_probe(io);
                    break;
                }
                let chunk: Vec<u8> = self.send_queue.drain(..len).collect();
                let seq = self.snd_nxt;
                self.snd_nxt = seq.wrapping_add(len as u16);
                let seg = self.data_segment(seq, &chunk);
                self.send_reliable(seg, self.snd_nxt, io);
            }
        }

        let fin_state = matches!(self.state, TcpState::FinWait1 | TcpState::LastAck);
        if fin_state && self.fin_pending && self.fin_seq.is_none() && self.send_queue.is_empty() {
            let seq = self.snd_nxt;
            self.snd_nxt = seq.wrapping_add(1);
            self.fin_seq = Some(seq);
            let seg = self.control_segment(seq, Flag::Fin);
            self.send_reliable(seg, self.snd_nxt, io);
        }
    }

    fn arm_probe(&mut self, io: &Io<'_>) {
        if self.peer_window == 0 && self.bytes_in_flight() == 0 && self.probe_deadline.is_none() {
            self.probe_deadline = Some(io.now.after(io.cfg.backoff(self.probe_retries)));
        }
    }

    /// 确认到 `ack`（不含）为止的所有段
    fn ack_through(&mut self, ack: u16) {
        let before = self.snd_una;
        while let Some(front) = self.rtx.front() {
            if !seq_le(front.end, ack) {
                break;
            }
            if front.seg.flag == Flag::Dat {
                self.stats.bytes_acked += u64::from(front.seg.payload_size());
            }
            self.rtx.pop_front();
        }
        if seq_gt(ack, before) {
            self.snd_una = ack;
        }
    }

    fn fin_acked(&self) -> bool {
        self.fin_seq.is_some_and(|f| seq_gt(self.snd_una, f))
    }

    fn establish(&mut self, io: &mut Io<'_>, app: &mut dyn Application) {
        self.set_state(TcpState::Established, io);
        io.notify(app, self.key, ConnEvent::Established);
        if self.close_requested {
            self.close_requested = false;
            self.fin_pending = true;
            self.set_state(TcpState::FinWait1, io);
        }
        self.pump(io);
    }

    fn on_segment(&mut self, seg: &Segment, io: &mut Io<'_>, app: &mut dyn Application) -> bool {
        match self.state {
            TcpState::SynSent => {
                if seg.flag != Flag::Syn {
                    debug!(conn = %self.key, flag = %seg.flag, "SYN_SENT 忽略非 SYN 段");
                    return false;
                }
                self.rcv_nxt = seg.seq.wrapping_add(1);
                self.peer_window = seg.advert_window;
                self.ack_through(self.snd_nxt);
                self.send_ack(io);
                self.establish(io, app);
                false
            }
            TcpState::SynReceived => match seg.flag {
                Flag::Ack if seg.seq == self.snd_nxt => {
                    self.peer_window = seg.advert_window;
                    self.ack_through(seg.seq);
                    self.establish(io, app);
                    false
                }
                Flag::Syn if seg.seq.wrapping_add(1) == self.rcv_nxt => {
                    // 对端没收到我们的 SYN，立即补发
                    if let Some(ours) = self.rtx.front().map(|o| o.seg) {
                        self.emit(ours, true, io);
                    }
                    false
                }
                Flag::Dat | Flag::Fin => {
                    // 握手 ACK 丢失，但对端已开始发数据：视为隐含确认
                    self.ack_through(self.snd_nxt);
                    self.establish(io, app);
                    self.on_segment(seg, io, app)
                }
                _ => {
                    debug!(conn = %self.key, %seg, "SYN_RECEIVED 忽略段");
                    false
                }
            },
            TcpState::Closed | TcpState::Listen => false,
            _ => {
                if self.state == TcpState::FinWait2 {
                    // 对端仍有动静，重新计时
                    self.linger_until = Some(io.now.after(io.cfg.fin_wait2_timeout));
                }
                self.on_established_segment(seg, io, app)
            }
        }
    }

    fn on_established_segment(
        &mut self,
        seg: &Segment,
        io: &mut Io<'_>,
        app: &mut dyn Application,
    ) -> bool {
        match seg.flag {
            Flag::Ack => {
                self.on_ack(seg);
                self.after_ack(io, app)
            }
            Flag::Dat => {
                if self.state.receives_data() {
                    self.on_data(seg, io, app);
                } else {
                    self.send_ack(io);
                }
                false
            }
            Flag::Fin => {
                self.on_fin(seg, io, app);
                false
            }
            Flag::Syn => {
                if seg.seq.wrapping_add(1) == self.rcv_nxt {
                    // 握手 ACK 丢失，对端重传了它的 SYN
                    self.send_ack(io);
                } else {
                    debug!(conn = %self.key, %seg, "忽略无关 SYN");
                }
                false
            }
        }
    }

    fn on_ack(&mut self, seg: &Segment) {
        let ack = seg.seq;
        if seq_gt(ack, self.snd_nxt) {
            debug!(conn = %self.key, ack, snd_nxt = self.snd_nxt, "ACK 确认了未发送的序号，忽略");
            return;
        }
        if seq_lt(ack, self.snd_una) {
            trace!(conn = %self.key, ack, snd_una = self.snd_una, "过期 ACK");
            return;
        }
        if ack != self.snd_una {
            self.ack_through(ack);
            self.peer_window = seg.advert_window;
        } else {
            // 同一确认号：只在窗口右沿不后退时采纳（防止乱序的旧 ACK 缩小窗口）
            let cur_edge = self.snd_una.wrapping_add(self.peer_window);
            let new_edge = ack.wrapping_add(seg.advert_window);
            if seq_le(cur_edge, new_edge) {
                self.peer_window = seg.advert_window;
            }
        }
        self.probe_retries = 0;
        if self.peer_window > 0 {
            self.probe_deadline = None;
        }
    }

    fn after_ack(&mut self, io: &mut Io<'_>, app: &mut dyn Application) -> bool {
        match self.state {
            TcpState::FinWait1 if self.fin_acked() => {
                self.set_state(TcpState::FinWait2, io);
                self.linger_until = Some(io.now.after(io.cfg.fin_wait2_timeout));
            }
            TcpState::LastAck if self.fin_acked() => {
                self.set_state(TcpState::Closed, io);
                io.notify(app, self.key, ConnEvent::Closed);
                return true;
            }
            _ => {}
        }
        self.pump(io);
        false
    }

    fn on_data(&mut self, seg: &Segment, io: &mut Io<'_>, app: &mut dyn Application) {
        let len = usize::from(seg.payload_size());
        if len == 0 {
            // 零窗口探测：回一个带当前窗口的 ACK
            self.send_ack(io);
            return;
        }
        if seq_lt(seg.seq, self.rcv_nxt) {
            trace!(conn = %self.key, seq = seg.seq, rcv_nxt = self.rcv_nxt, "重复数据段");
            self.send_ack(io);
            return;
        }
        let offset = usize::from(seg.seq.wrapping_sub(self.rcv_nxt));
        if offset + len > usize::from(self.recv_window()) {
            debug!(conn = %self.key, seq = seg.seq, len, window = self.recv_window(), "数据段超出接收窗口");
            self.send_ack(io);
            return;
        }
        if offset == 0 {
            self.recv_buf.extend(seg.payload());
            self.rcv_nxt = self.rcv_nxt.wrapping_add(len as u16);
            while let Some(bytes) = self.out_of_order.remove(&self.rcv_nxt) {
                self.rcv_nxt = self.rcv_nxt.wrapping_add(bytes.len() as u16);
                self.recv_buf.extend(bytes);
            }
        } else {
            trace!(conn = %self.key, seq = seg.seq, rcv_nxt = self.rcv_nxt, "乱序段暂存");
            self.out_of_order
                .entry(seg.seq)
                .or_insert_with(|| seg.payload().to_vec());
        }
        self.deliver(app);
        self.send_ack(io);
    }

    /// 把按序数据交给应用；应用可以只取走一部分（其余留在缓冲区里占用窗口）。
    fn deliver(&mut self, app: &mut dyn Application) {
        if self.recv_buf.is_empty() {
            return;
        }
        let available = self.recv_buf.len();
        let consumed = app
            .on_deliver(self.key, self.recv_buf.make_contiguous())
            .min(available);
        self.recv_buf.drain(..consumed);
        self.stats.bytes_delivered += consumed as u64;
    }

    fn on_fin(&mut self, seg: &Segment, io: &mut Io<'_>, app: &mut dyn Application) {
        if self.fin_received {
            if seg.seq.wrapping_add(1) == self.rcv_nxt {
                self.send_ack(io);
                if self.state == TcpState::TimeWait {
                    self.linger_until = Some(io.now.after(io.cfg.time_wait));
                }
            }
            return;
        }
        if seg.seq != self.rcv_nxt || !self.state.receives_data() {
            // 前面的数据还没收齐，FIN 等对端重传
            self.send_ack(io);
            return;
        }
        self.fin_received = true;
        self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
        self.send_ack(io);
        match self.state {
            TcpState::Established => {
                self.set_state(TcpState::CloseWait, io);
                io.notify(app, self.key, ConnEvent::PeerClosed);
            }
            TcpState::FinWait1 | TcpState::FinWait2 => {
                self.set_state(TcpState::TimeWait, io);
                self.linger_until = Some(io.now.after(io.cfg.time_wait));
            }
            _ => {}
        }
    }

    /// 定时检查；返回 true 表示连接应被销毁。
    fn on_tick(&mut self, io: &mut Io<'_>, app: &mut dyn Application) -> bool {
        let lingered = self.linger_until.is_some_and(|t| t <= io.now);
        if self.state == TcpState::TimeWait && lingered {
            self.set_state(TcpState::Closed, io);
            io.notify(app, self.key, ConnEvent::Closed);
            return true;
        }
        if self.state == TcpState::FinWait2 && lingered {
            info!(conn = %self.key, "⏳ FIN_WAIT_2 超时，对端未关闭");
            self.set_state(TcpState::Closed, io);
            io.notify(app, self.key, ConnEvent::Closed);
            return true;
        }

        let mut resend = Vec::new();
        let mut exhausted = false;
        for o in self.rtx.iter_mut() {
            if o.deadline > io.now {
                continue;
            }
            o.retries += 1;
            if o.retries > io.cfg.max_retries {
                exhausted = true;
                break;
            }
            o.deadline = io.now.after(io.cfg.backoff(o.retries));
            resend.push(o.seg);
        }
        if exhausted {
            if self.state == TcpState::TimeWait {
                // 对端已确认过我们的数据并发来了 FIN，剩余的 FIN 重传交给 linger 收尾
                self.rtx.clear();
            } else {
                warn!(conn = %self.key, state = %self.state, "❌ 重传次数耗尽，中止连接");
                self.set_state(TcpState::Closed, io);
                io.notify(app, self.key, ConnEvent::Failed);
                return true;
            }
        }
        for seg in resend {
            debug!(conn = %self.key, seq = seg.seq, flag = %seg.flag, "⏱️  超时重传");
            self.emit(seg, true, io);
        }

        if let Some(deadline) = self.probe_deadline {
            let stalled = self.peer_window == 0
                && self.bytes_in_flight() == 0
                && !self.send_queue.is_empty();
            if !stalled {
                self.probe_deadline = None;
            } else if deadline <= io.now {
                self.probe_retries += 1;
                if self.probe_retries > io.cfg.max_retries {
                    warn!(conn = %self.key, "❌ 零窗口探测无响应，中止连接");
                    self.set_state(TcpState::Closed, io);
                    io.notify(app, self.key, ConnEvent::Failed);
                    return true;
                }
                let probe = self.control_segment(self.snd_nxt, Flag::Dat);
                self.emit(probe, false, io);
                self.probe_deadline = Some(io.now.after(io.cfg.backoff(self.probe_retries)));
            }
        }

        // 应用可能在两次 tick 之间腾出了缓冲区：重新交付并在窗口重新打开时通告
        self.deliver(app);
        let small = TCP_PAYLOAD_SIZE as u16;
        if self.state.receives_data()
            && self.last_advertised < small
            && self.recv_window() > self.last_advertised
        {
            self.send_ack(io);
        }
        false
    }
}

/// 一个 mote 上的 TCP 协议栈
#[derive(Debug)]
pub struct TcpStack {
    local: NodeId,
    cfg: TcpConfig,
    listeners: BTreeSet<u8>,
    conns: BTreeMap<ConnKey, TcpConn>,
    outbox: Vec<Outgoing>,
    notices: Vec<TcpNotice>,
    deferred: Vec<(ConnKey, ConnEvent)>,
    isn_counter: u64,
}

impl TcpStack {
    pub fn new(local: NodeId, cfg: TcpConfig) -> Self {
        Self {
            local,
            cfg,
            listeners: BTreeSet::new(),
            conns: BTreeMap::new(),
            outbox: Vec::new(),
            notices: Vec::new(),
            deferred: Vec::new(),
            isn_counter: 0,
        }
    }

    pub fn config(&self) -> &TcpConfig {
        &self.cfg
    }

    pub fn get(&self, key: ConnKey) -> Option<&TcpConn> {
        self.conns.get(&key)
    }

    pub fn state(&self, key: ConnKey) -> Option<TcpState> {
        self.conns.get(&key).map(|c| c.state)
    }

    pub fn conns(&self) -> impl Iterator<Item = &TcpConn> {
        self.conns.values()
    }

    pub fn is_listening(&self, port: u8) -> bool {
        self.listeners.contains(&port)
    }

    /// 取走待发出的段
    pub fn drain_outbox(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    /// 取走状态迁移 / 连接事件通知
    pub fn drain_notices(&mut self) -> Vec<TcpNotice> {
        std::mem::take(&mut self.notices)
    }

    fn next_isn(&mut self, port: u8) -> u16 {
        self.isn_counter = self.isn_counter.wrapping_add(1);
        let seed = (u64::from(self.local.0) << 32) | (u64::from(port) << 24) | self.isn_counter;
        (mix64(seed) >> 48) as u16
    }

    /// 被动打开：端口进入 LISTEN
    pub fn listen(&mut self, port: u8) -> Result<(), TcpError> {
        if !self.listeners.insert(port) {
            return Err(TcpError::PortInUse(port));
        }
        info!(node = %self.local, port, "👂 LISTEN");
        Ok(())
    }

    /// 停止监听；已接受的连接不受影响
    pub fn unlisten(&mut self, port: u8) -> bool {
        self.listeners.remove(&port)
    }

    /// 主动打开：发送 SYN，进入 SYN_SENT
    pub fn connect(
        &mut self,
        local_port: u8,
        remote: NodeId,
        remote_port: u8,
        now: SimTime,
    ) -> Result<ConnKey, TcpError> {
        let key = ConnKey {
            local_port,
            remote,
            remote_port,
        };
        if self.conns.contains_key(&key) {
            return Err(TcpError::ConnectionExists(key));
        }
        if self.conns.len() >= self.cfg.max_connections {
            return Err(TcpError::TooManyConnections);
        }
        let iss = self.next_isn(local_port);
        let Self {
            cfg,
            conns,
            outbox,
            notices,
            ..
        } = self;
        let mut io = Io {
            out: outbox,
            notices,
            cfg,
            now,
        };
        let mut conn = TcpConn::new(key, TcpState::Closed, iss, cfg);
        conn.set_state(TcpState::SynSent, &mut io);
        conn.send_syn(&mut io);
        conns.insert(key, conn);
        Ok(key)
    }

    /// 写入数据；返回实际接受的字节数（受发送缓冲限制）。
    pub fn send(&mut self, key: ConnKey, bytes: &[u8], now: SimTime) -> Result<usize, TcpError> {
        let Self {
            cfg,
            conns,
            outbox,
            notices,
            ..
        } = self;
        let conn = conns
            .get_mut(&key)
            .ok_or(TcpError::NoSuchConnection(key))?;
        if !conn.state.accepts_writes() || conn.fin_pending || conn.close_requested {
            return Err(TcpError::InvalidState {
                conn: key,
                state: conn.state,
            });
        }
        let used = conn.send_queue.len() + conn.bytes_in_flight();
        let n = cfg.send_buffer.saturating_sub(used).min(bytes.len());
        conn.send_queue.extend(&bytes[..n]);
        let mut io = Io {
            out: outbox,
            notices,
            cfg,
            now,
        };
        conn.pump(&mut io);
        Ok(n)
    }

    /// 本地关闭。
    ///
    /// 由此产生的连接事件（例如 SYN_SENT 直接关闭）不会立即回调应用，
    /// 而是在下一次 [`TcpStack::flush_deferred`] 时交付。
    pub fn close(&mut self, key: ConnKey, now: SimTime) -> Result<(), TcpError> {
        let Self {
            cfg,
            conns,
            outbox,
            notices,
            deferred,
            ..
        } = self;
        let conn = conns
            .get_mut(&key)
            .ok_or(TcpError::NoSuchConnection(key))?;
        let mut io = Io {
            out: outbox,
            notices,
            cfg,
            now,
        };
        match conn.state {
            TcpState::SynSent => {
                conn.set_state(TcpState::Closed, &mut io);
                conns.remove(&key);
                deferred.push((key, ConnEvent::Closed));
            }
            TcpState::SynReceived => conn.close_requested = true,
            TcpState::Established => {
                conn.fin_pending = true;
                conn.set_state(TcpState::FinWait1, &mut io);
                conn.pump(&mut io);
            }
            TcpState::CloseWait => {
                conn.fin_pending = true;
                conn.set_state(TcpState::LastAck, &mut io);
                conn.pump(&mut io);
            }
            state => return Err(TcpError::InvalidState { conn: key, state }),
        }
        Ok(())
    }

    /// 立即销毁连接，取消它的所有定时器（不发送任何段）
    pub fn abort(&mut self, key: ConnKey) -> Result<(), TcpError> {
        let mut conn = self
            .conns
            .remove(&key)
            .ok_or(TcpError::NoSuchConnection(key))?;
        let mut io = Io {
            out: &mut self.outbox,
            notices: &mut self.notices,
            cfg: &self.cfg,
            now: SimTime::ZERO,
        };
        conn.set_state(TcpState::Closed, &mut io);
        self.deferred.push((key, ConnEvent::Closed));
        Ok(())
    }

    /// 把 `close` / `abort` 产生的连接事件交给应用
    pub fn flush_deferred(&mut self, app: &mut dyn Application) {
        for (conn, event) in std::mem::take(&mut self.deferred) {
            info!(%conn, ?event, "🔔 连接事件");
            self.notices.push(TcpNotice::Event { conn, event });
            app.on_connection_event(conn, event);
        }
    }

    /// 处理来自 `from` 的段
    pub fn on_segment(
        &mut self,
        from: NodeId,
        seg: Segment,
        now: SimTime,
        app: &mut dyn Application,
    ) {
        let key = ConnKey {
            local_port: seg.dest_port,
            remote: from,
            remote_port: seg.src_port,
        };
        let accept = seg.flag == Flag::Syn
            && !self.conns.contains_key(&key)
            && self.listeners.contains(&seg.dest_port);
        let iss = if accept { self.next_isn(seg.dest_port) } else { 0 };

        let Self {
            cfg,
            conns,
            outbox,
            notices,
            ..
        } = self;
        let mut io = Io {
            out: outbox,
            notices,
            cfg,
            now,
        };

        if accept {
            if conns.len() >= cfg.max_connections {
                warn!(%key, "连接表已满，丢弃 SYN");
                return;
            }
            let mut conn = TcpConn::new(key, TcpState::Listen, iss, cfg);
            conn.rcv_nxt = seg.seq.wrapping_add(1);
            conn.peer_window = seg.advert_window;
            conn.set_state(TcpState::SynReceived, &mut io);
            conn.send_syn(&mut io);
            conns.insert(key, conn);
            return;
        }

        let Some(conn) = conns.get_mut(&key) else {
            debug!(%key, %seg, "没有匹配的连接，丢弃段");
            return;
        };
        if conn.on_segment(&seg, &mut io, app) {
            conns.remove(&key);
        }
    }

    /// 定时器：重传、零窗口探测、TIME_WAIT 到期、窗口更新
    pub fn on_tick(&mut self, now: SimTime, app: &mut dyn Application) {
        let Self {
            cfg,
            conns,
            outbox,
            notices,
            ..
        } = self;
        let mut io = Io {
            out: outbox,
            notices,
            cfg,
            now,
        };
        conns.retain(|_, conn| !conn.on_tick(&mut io, app));
    }
}
