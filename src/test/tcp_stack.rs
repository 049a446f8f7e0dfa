use std::sync::{Arc, Mutex};

use crate::app::{Recorder, RecorderLog};
use crate::net::NodeId;
use crate::proto::tcp::{Outgoing, seq_gt, seq_le, seq_lt};
use crate::proto::{
    ConnEvent, ConnKey, Flag, Segment, TcpConfig, TcpError, TcpNotice, TcpStack, TcpState,
};
use crate::sim::SimTime;

const A: NodeId = NodeId(1);
const B: NodeId = NodeId(3);
const CLIENT_PORT: u8 = 20;
const SERVER_PORT: u8 = 41;

/// 两个直接相连的协议栈；段在 `pump` 时按发送顺序交给对端
struct Duo {
    a: TcpStack,
    b: TcpStack,
    app_a: Recorder,
    app_b: Recorder,
    log_a: Arc<Mutex<RecorderLog>>,
    log_b: Arc<Mutex<RecorderLog>>,
    now: SimTime,
}

impl Duo {
    fn new(cfg_b: TcpConfig) -> Self {
        let log_a = Arc::new(Mutex::new(RecorderLog::default()));
        let log_b = Arc::new(Mutex::new(RecorderLog::default()));
        Self {
            a: TcpStack::new(A, TcpConfig::default()),
            b: TcpStack::new(B, cfg_b),
            app_a: Recorder::new(Arc::clone(&log_a)),
            app_b: Recorder::new(Arc::clone(&log_b)),
            log_a,
            log_b,
            now: SimTime::ZERO,
        }
    }

    fn client_key() -> ConnKey {
        ConnKey {
            local_port: CLIENT_PORT,
            remote: B,
            remote_port: SERVER_PORT,
        }
    }

    fn server_key() -> ConnKey {
        ConnKey {
            local_port: SERVER_PORT,
            remote: A,
            remote_port: CLIENT_PORT,
        }
    }

    fn check_flow_control(&self) {
        for stack in [&self.a, &self.b] {
            for c in stack.conns() {
                assert!(
                    c.bytes_in_flight() <= usize::from(c.peer_window()),
                    "in flight {} exceeds peer window {}",
                    c.bytes_in_flight(),
                    c.peer_window()
                );
            }
        }
    }

    /// 来回交换段直到没有新段；`keep` 返回 false 的段被丢弃。返回交付的段数。
    fn pump_with(&mut self, mut keep: impl FnMut(NodeId, &Segment) -> bool) -> usize {
        let mut delivered = 0;
        for _ in 0..1000 {
            let from_a = self.a.drain_outbox();
            let from_b = self.b.drain_outbox();
            if from_a.is_empty() && from_b.is_empty() {
                return delivered;
            }
            for Outgoing { seg, .. } in from_a {
                if keep(A, &seg) {
                    self.b.on_segment(A, seg, self.now, &mut self.app_b);
                    delivered += 1;
                    self.check_flow_control();
                }
            }
            for Outgoing { seg, .. } in from_b {
                if keep(B, &seg) {
                    self.a.on_segment(B, seg, self.now, &mut self.app_a);
                    delivered += 1;
                    self.check_flow_control();
                }
            }
        }
        panic!("segments kept bouncing");
    }

    fn pump(&mut self) -> usize {
        self.pump_with(|_, _| true)
    }

    fn tick(&mut self, advance: SimTime) {
        self.now = self.now.after(advance);
        self.a.on_tick(self.now, &mut self.app_a);
        self.b.on_tick(self.now, &mut self.app_b);
    }

    fn establish(&mut self) -> (ConnKey, ConnKey) {
        self.b.listen(SERVER_PORT).unwrap();
        let key = self
            .a
            .connect(CLIENT_PORT, B, SERVER_PORT, self.now)
            .unwrap();
        self.pump();
        assert_eq!(self.a.state(key), Some(TcpState::Established));
        assert_eq!(self.b.state(Self::server_key()), Some(TcpState::Established));
        (key, Self::server_key())
    }

    fn received_by_b(&self) -> Vec<u8> {
        self.log_b.lock().unwrap().received_from(A)
    }

    fn events(log: &Arc<Mutex<RecorderLog>>) -> Vec<ConnEvent> {
        log.lock().unwrap().events.iter().map(|(_, e)| *e).collect()
    }
}

fn transitions(stack: &mut TcpStack) -> Vec<(TcpState, TcpState)> {
    stack
        .drain_notices()
        .into_iter()
        .filter_map(|n| match n {
            TcpNotice::Transition { from, to, .. } => Some((from, to)),
            TcpNotice::Event { .. } => None,
        })
        .collect()
}

#[test]
fn handshake_walks_both_sides_to_established() {
    let mut duo = Duo::new(TcpConfig::default());
    duo.b.listen(SERVER_PORT).unwrap();
    let key = duo.a.connect(CLIENT_PORT, B, SERVER_PORT, duo.now).unwrap();
    assert_eq!(key, Duo::client_key());
    assert_eq!(duo.a.state(key), Some(TcpState::SynSent));

    duo.pump();

    assert_eq!(
        transitions(&mut duo.a),
        vec![
            (TcpState::Closed, TcpState::SynSent),
            (TcpState::SynSent, TcpState::Established)
        ]
    );
    assert_eq!(
        transitions(&mut duo.b),
        vec![
            (TcpState::Listen, TcpState::SynReceived),
            (TcpState::SynReceived, TcpState::Established)
        ]
    );
    assert!(duo.b.is_listening(SERVER_PORT), "listener keeps listening");
    assert_eq!(Duo::events(&duo.log_a), vec![ConnEvent::Established]);
    assert_eq!(Duo::events(&duo.log_b), vec![ConnEvent::Established]);
}

#[test]
fn fifteen_bytes_go_out_as_twelve_plus_three() {
    let mut duo = Duo::new(TcpConfig::default());
    let (key, _) = duo.establish();

    assert_eq!(duo.a.send(key, b"HELLO WORLD!!!!", duo.now), Ok(15));
    let out = duo.a.drain_outbox();
    let sizes: Vec<u8> = out.iter().map(|o| o.seg.payload_size()).collect();
    assert_eq!(sizes, vec![12, 3]);
    assert!(out.iter().all(|o| o.seg.flag == Flag::Dat && o.to == B));
    assert_eq!(
        out[1].seg.seq,
        out[0].seg.seq.wrapping_add(12),
        "sequence numbers count bytes"
    );

    for o in out {
        duo.b.on_segment(A, o.seg, duo.now, &mut duo.app_b);
    }
    duo.pump();
    assert_eq!(duo.received_by_b(), b"HELLO WORLD!!!!");
    assert_eq!(duo.a.get(key).unwrap().bytes_in_flight(), 0);
}

#[test]
fn data_written_before_establishment_is_sent_once_connected() {
    let mut duo = Duo::new(TcpConfig::default());
    duo.b.listen(SERVER_PORT).unwrap();
    let key = duo.a.connect(CLIENT_PORT, B, SERVER_PORT, duo.now).unwrap();
    assert_eq!(duo.a.send(key, b"early", duo.now), Ok(5));
    duo.pump();
    assert_eq!(duo.received_by_b(), b"early");
}

#[test]
fn out_of_order_segments_are_reassembled() {
    let mut duo = Duo::new(TcpConfig::default());
    let (key, _) = duo.establish();
    duo.a.send(key, b"0123456789abcdefghijklmn", duo.now).unwrap();
    let mut out = duo.a.drain_outbox();
    assert_eq!(out.len(), 2);
    out.reverse();

    duo.b.on_segment(A, out[0].seg, duo.now, &mut duo.app_b);
    assert!(duo.received_by_b().is_empty(), "gap holds back delivery");
    duo.b.on_segment(A, out[1].seg, duo.now, &mut duo.app_b);
    assert_eq!(duo.received_by_b(), b"0123456789abcdefghijklmn");

    // 重复段只会触发 ACK，不会重复交付
    duo.b.on_segment(A, out[1].seg, duo.now, &mut duo.app_b);
    assert_eq!(duo.received_by_b().len(), 24);
    duo.pump();
    assert_eq!(duo.a.get(key).unwrap().bytes_in_flight(), 0);
}

#[test]
fn every_data_segment_is_acknowledged_with_next_expected_seq() {
    let mut duo = Duo::new(TcpConfig::default());
    let (key, _) = duo.establish();
    duo.a.send(key, b"abc", duo.now).unwrap();
    let data = duo.a.drain_outbox().remove(0).seg;
    duo.b.on_segment(A, data, duo.now, &mut duo.app_b);
    duo.b.on_segment(A, data, duo.now, &mut duo.app_b);

    let acks = duo.b.drain_outbox();
    assert_eq!(acks.len(), 2);
    for ack in acks {
        assert_eq!(ack.seg.flag, Flag::Ack);
        assert_eq!(ack.seg.seq, data.seq.wrapping_add(3));
        assert_eq!(ack.seg.advert_window, 64);
    }
}

#[test]
fn lost_data_is_retransmitted_after_rto() {
    let mut duo = Duo::new(TcpConfig::default());
    let (key, _) = duo.establish();
    duo.a.send(key, b"retry me", duo.now).unwrap();
    duo.pump_with(|from, seg| !(from == A && seg.flag == Flag::Dat));
    assert!(duo.received_by_b().is_empty());

    duo.tick(SimTime::from_millis(100));
    assert!(duo.a.drain_outbox().is_empty(), "not before the deadline");

    duo.tick(SimTime::from_millis(300));
    let resent = duo.a.drain_outbox();
    assert_eq!(resent.len(), 1);
    assert!(resent[0].retransmit);
    assert_eq!(resent[0].seg.payload(), b"retry me");

    duo.b.on_segment(A, resent[0].seg, duo.now, &mut duo.app_b);
    duo.pump();
    assert_eq!(duo.received_by_b(), b"retry me");
    assert_eq!(duo.a.get(key).unwrap().stats().retransmissions, 1);
}

#[test]
fn lost_syn_is_retransmitted() {
    let mut duo = Duo::new(TcpConfig::default());
    duo.b.listen(SERVER_PORT).unwrap();
    let key = duo.a.connect(CLIENT_PORT, B, SERVER_PORT, duo.now).unwrap();
    duo.pump_with(|_, _| false);
    assert_eq!(duo.a.state(key), Some(TcpState::SynSent));

    duo.tick(SimTime::from_millis(400));
    duo.pump();
    assert_eq!(duo.a.state(key), Some(TcpState::Established));
}

#[test]
fn lost_handshake_ack_is_recovered_by_first_data_segment() {
    let mut duo = Duo::new(TcpConfig::default());
    duo.b.listen(SERVER_PORT).unwrap();
    let key = duo.a.connect(CLIENT_PORT, B, SERVER_PORT, duo.now).unwrap();
    duo.pump_with(|from, seg| !(from == A && seg.flag == Flag::Ack));
    assert_eq!(duo.a.state(key), Some(TcpState::Established));
    assert_eq!(duo.b.state(Duo::server_key()), Some(TcpState::SynReceived));

    duo.a.send(key, b"data", duo.now).unwrap();
    duo.pump();
    assert_eq!(duo.b.state(Duo::server_key()), Some(TcpState::Established));
    assert_eq!(duo.received_by_b(), b"data");
}

#[test]
fn unanswered_connect_fails_after_max_retries() {
    let mut duo = Duo::new(TcpConfig::default());
    let key = duo.a.connect(CLIENT_PORT, B, SERVER_PORT, duo.now).unwrap();
    assert_eq!(duo.a.drain_outbox().len(), 1);
    let mut syns = 0;
    for _ in 0..200 {
        duo.tick(SimTime::from_millis(100));
        syns += duo
            .a
            .drain_outbox()
            .iter()
            .filter(|o| o.seg.flag == Flag::Syn)
            .count();
    }
    assert!(duo.a.get(key).is_none(), "record destroyed");
    assert_eq!(syns, TcpConfig::default().max_retries as usize);
    assert_eq!(Duo::events(&duo.log_a), vec![ConnEvent::Failed]);
}

#[test]
fn backoff_is_linear_and_capped() {
    let cfg = TcpConfig::default();
    assert_eq!(cfg.backoff(0), cfg.init_rto);
    assert_eq!(cfg.backoff(1), cfg.init_rto.times(2));
    assert_eq!(cfg.backoff(100), cfg.max_rto);
}

#[test]
fn zero_window_stalls_sender_and_probes_until_reopened() {
    let cfg_b = TcpConfig {
        recv_buffer: 24,
        ..TcpConfig::default()
    };
    let mut duo = Duo::new(cfg_b);
    let (key, server) = duo.establish();
    duo.log_b.lock().unwrap().budget = Some(0);

    assert_eq!(duo.a.send(key, &[7u8; 60], duo.now), Ok(60));
    duo.pump();
    {
        let c = duo.a.get(key).unwrap();
        assert_eq!(c.peer_window(), 0);
        assert_eq!(c.bytes_in_flight(), 0);
        assert_eq!(c.unsent(), 36);
    }
    assert_eq!(duo.b.get(server).unwrap().buffered(), 24);
    assert_eq!(duo.b.get(server).unwrap().recv_window(), 0);

    duo.tick(SimTime::from_millis(400));
    let probe = duo.a.drain_outbox();
    assert_eq!(probe.len(), 1);
    assert_eq!(probe[0].seg.flag, Flag::Dat);
    assert_eq!(probe[0].seg.payload_size(), 0);
    duo.b.on_segment(A, probe[0].seg, duo.now, &mut duo.app_b);
    duo.pump();
    assert_eq!(duo.a.get(key).unwrap().unsent(), 36);

    duo.log_b.lock().unwrap().budget = None;
    duo.tick(SimTime::from_millis(100));
    duo.pump();
    assert_eq!(duo.received_by_b(), vec![7u8; 60]);
}

#[test]
fn ack_beyond_sent_data_and_stale_window_are_ignored() {
    let mut duo = Duo::new(TcpConfig::default());
    let (key, _) = duo.establish();
    let iss = duo.a.get(key).unwrap().initial_seq();

    let bogus = Segment::control(SERVER_PORT, CLIENT_PORT, iss.wrapping_add(100), 5, Flag::Ack);
    duo.a.on_segment(B, bogus, duo.now, &mut duo.app_a);
    assert_eq!(duo.a.get(key).unwrap().peer_window(), 64);

    let stale = Segment::control(SERVER_PORT, CLIENT_PORT, iss, 5, Flag::Ack);
    duo.a.on_segment(B, stale, duo.now, &mut duo.app_a);
    assert_eq!(duo.a.get(key).unwrap().peer_window(), 64);
    assert_eq!(duo.a.state(key), Some(TcpState::Established));
}

#[test]
fn orderly_close_runs_both_sides_to_closed() {
    let mut duo = Duo::new(TcpConfig::default());
    let (key, server) = duo.establish();
    transitions(&mut duo.a);
    transitions(&mut duo.b);

    duo.a.send(key, b"bye", duo.now).unwrap();
    duo.a.close(key, duo.now).unwrap();
    assert_eq!(duo.a.state(key), Some(TcpState::FinWait1));
    duo.pump();
    assert_eq!(duo.received_by_b(), b"bye");
    assert_eq!(duo.a.state(key), Some(TcpState::FinWait2));
    assert_eq!(duo.b.state(server), Some(TcpState::CloseWait));
    assert!(Duo::events(&duo.log_b).contains(&ConnEvent::PeerClosed));

    duo.b.close(server, duo.now).unwrap();
    duo.pump();
    assert_eq!(duo.b.state(server), None);
    assert_eq!(duo.a.state(key), Some(TcpState::TimeWait));

    duo.tick(SimTime::from_secs(1));
    assert_eq!(duo.a.state(key), None);

    assert_eq!(
        transitions(&mut duo.a),
        vec![
            (TcpState::Established, TcpState::FinWait1),
            (TcpState::FinWait1, TcpState::FinWait2),
            (TcpState::FinWait2, TcpState::TimeWait),
            (TcpState::TimeWait, TcpState::Closed)
        ]
    );
    assert_eq!(
        transitions(&mut duo.b),
        vec![
            (TcpState::Established, TcpState::CloseWait),
            (TcpState::CloseWait, TcpState::LastAck),
            (TcpState::LastAck, TcpState::Closed)
        ]
    );
    assert_eq!(Duo::events(&duo.log_a).last(), Some(&ConnEvent::Closed));
    assert_eq!(Duo::events(&duo.log_b).last(), Some(&ConnEvent::Closed));
}

#[test]
fn simultaneous_close_passes_through_time_wait() {
    let mut duo = Duo::new(TcpConfig::default());
    let (key, server) = duo.establish();
    duo.a.close(key, duo.now).unwrap();
    duo.b.close(server, duo.now).unwrap();
    duo.pump();
    assert_eq!(duo.a.state(key), Some(TcpState::TimeWait));
    assert_eq!(duo.b.state(server), Some(TcpState::TimeWait));

    duo.tick(SimTime::from_secs(1));
    assert!(duo.a.get(key).is_none());
    assert!(duo.b.get(server).is_none());
}

#[test]
fn fin_wait_2_times_out_when_peer_vanishes() {
    let mut duo = Duo::new(TcpConfig::default());
    let (key, server) = duo.establish();
    duo.a.close(key, duo.now).unwrap();
    duo.pump();
    assert_eq!(duo.a.state(key), Some(TcpState::FinWait2));
    transitions(&mut duo.a);

    duo.b.abort(server).unwrap();
    duo.b.flush_deferred(&mut duo.app_b);
    for _ in 0..99 {
        duo.tick(SimTime::from_millis(100));
    }
    assert_eq!(duo.a.state(key), Some(TcpState::FinWait2));

    duo.tick(SimTime::from_millis(100));
    assert!(duo.a.get(key).is_none());
    assert_eq!(duo.a.conns().count(), 0);
    assert_eq!(
        transitions(&mut duo.a),
        vec![(TcpState::FinWait2, TcpState::Closed)]
    );
    assert_eq!(Duo::events(&duo.log_a).last(), Some(&ConnEvent::Closed));
}

#[test]
fn fin_wait_2_timer_restarts_while_peer_keeps_sending() {
    let mut duo = Duo::new(TcpConfig::default());
    let (key, server) = duo.establish();
    duo.a.close(key, duo.now).unwrap();
    duo.pump();

    duo.tick(SimTime::from_secs(8));
    duo.b.send(server, b"late", duo.now).unwrap();
    duo.pump();
    assert_eq!(duo.log_a.lock().unwrap().received_from(B), b"late");

    duo.tick(SimTime::from_secs(4));
    assert_eq!(duo.a.state(key), Some(TcpState::FinWait2));

    duo.b.close(server, duo.now).unwrap();
    duo.pump();
    assert_eq!(duo.a.state(key), Some(TcpState::TimeWait));
}

#[test]
fn close_wait_with_unacked_data_fails_when_peer_is_gone() {
    let mut duo = Duo::new(TcpConfig::default());
    let (key, server) = duo.establish();
    duo.a.close(key, duo.now).unwrap();
    duo.pump();
    assert_eq!(duo.b.state(server), Some(TcpState::CloseWait));

    duo.a.abort(key).unwrap();
    duo.b.send(server, b"nobody home", duo.now).unwrap();
    for _ in 0..200 {
        duo.tick(SimTime::from_millis(100));
        duo.b.drain_outbox();
    }
    assert!(duo.b.get(server).is_none());
    assert_eq!(Duo::events(&duo.log_b).last(), Some(&ConnEvent::Failed));
}

#[test]
fn last_ack_fails_when_peer_never_acks_the_fin() {
    let mut duo = Duo::new(TcpConfig::default());
    let (key, server) = duo.establish();
    duo.a.close(key, duo.now).unwrap();
    duo.pump();

    duo.a.abort(key).unwrap();
    duo.b.close(server, duo.now).unwrap();
    assert_eq!(duo.b.state(server), Some(TcpState::LastAck));
    for _ in 0..200 {
        duo.tick(SimTime::from_millis(100));
        duo.b.drain_outbox();
    }
    assert!(duo.b.get(server).is_none());
    assert_eq!(Duo::events(&duo.log_b).last(), Some(&ConnEvent::Failed));
}

#[test]
fn time_wait_with_unacked_fin_closes_after_linger() {
    let mut duo = Duo::new(TcpConfig::default());
    let (key, server) = duo.establish();
    duo.a.close(key, duo.now).unwrap();
    duo.b.close(server, duo.now).unwrap();
    // B 对 A 的 FIN 的确认全部丢失
    duo.pump_with(|from, seg| !(from == B && seg.flag == Flag::Ack));
    assert_eq!(duo.a.state(key), Some(TcpState::TimeWait));

    let mut fin_resends = 0;
    for _ in 0..9 {
        duo.tick(SimTime::from_millis(100));
        fin_resends += duo
            .a
            .drain_outbox()
            .iter()
            .filter(|o| o.seg.flag == Flag::Fin && o.retransmit)
            .count();
        duo.b.drain_outbox();
    }
    assert!(fin_resends > 0, "unacked FIN keeps being retransmitted");
    assert_eq!(duo.a.state(key), Some(TcpState::TimeWait));

    duo.tick(SimTime::from_millis(100));
    assert!(duo.a.get(key).is_none());
    assert!(duo.b.get(server).is_none());
    assert_eq!(Duo::events(&duo.log_a).last(), Some(&ConnEvent::Closed));
}

#[test]
fn closing_a_pending_connect_closes_immediately() {
    let mut duo = Duo::new(TcpConfig::default());
    let key = duo.a.connect(CLIENT_PORT, B, SERVER_PORT, duo.now).unwrap();
    duo.a.drain_outbox();
    duo.a.close(key, duo.now).unwrap();
    assert!(duo.a.get(key).is_none());
    assert!(duo.a.drain_outbox().is_empty());

    duo.a.flush_deferred(&mut duo.app_a);
    assert_eq!(Duo::events(&duo.log_a), vec![ConnEvent::Closed]);
}

#[test]
fn abort_destroys_record_without_sending() {
    let mut duo = Duo::new(TcpConfig::default());
    let (key, _) = duo.establish();
    duo.a.send(key, b"never acked", duo.now).unwrap();
    duo.a.drain_outbox();

    duo.a.abort(key).unwrap();
    duo.a.flush_deferred(&mut duo.app_a);
    assert!(duo.a.get(key).is_none());
    assert!(duo.a.drain_outbox().is_empty());
    duo.tick(SimTime::from_secs(5));
    assert!(duo.a.drain_outbox().is_empty(), "timers cancelled");
    assert_eq!(Duo::events(&duo.log_a).last(), Some(&ConnEvent::Closed));
}

#[test]
fn api_misuse_is_reported() {
    let mut duo = Duo::new(TcpConfig::default());
    let (key, _) = duo.establish();

    assert_eq!(duo.b.listen(SERVER_PORT), Err(TcpError::PortInUse(SERVER_PORT)));
    assert_eq!(
        duo.a.connect(CLIENT_PORT, B, SERVER_PORT, duo.now),
        Err(TcpError::ConnectionExists(key))
    );
    let unknown = ConnKey {
        local_port: 99,
        remote: B,
        remote_port: 1,
    };
    assert_eq!(
        duo.a.send(unknown, b"x", duo.now),
        Err(TcpError::NoSuchConnection(unknown))
    );

    duo.a.close(key, duo.now).unwrap();
    assert!(matches!(
        duo.a.send(key, b"late", duo.now),
        Err(TcpError::InvalidState { .. })
    ));
    assert!(matches!(
        duo.a.close(key, duo.now),
        Err(TcpError::InvalidState { .. })
    ));
}

#[test]
fn send_buffer_limits_accepted_bytes() {
    let mut duo = Duo::new(TcpConfig::default());
    let (key, _) = duo.establish();
    let cap = TcpConfig::default().send_buffer;
    assert_eq!(duo.a.send(key, &vec![1u8; cap + 50], duo.now), Ok(cap));
    assert_eq!(duo.a.send(key, b"more", duo.now), Ok(0));
}

#[test]
fn serial_number_comparison_wraps() {
    assert!(seq_lt(65_535, 0));
    assert!(seq_gt(2, 65_530));
    assert!(seq_le(7, 7));
    assert!(!seq_lt(100, 50));
}
