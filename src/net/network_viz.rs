//! Visualization hooks for the network.

use crate::proto::{ConnEvent, ConnKey, Segment, TcpState};
use crate::sim::SimTime;
use crate::viz::{VizEvent, VizEventKind, VizLinkInfo, VizNodeInfo, VizPacketKind, VizTcp};

use super::forwarding::DropReason;
use super::packet::{Frame, Packet};
use super::{Network, NodeId};

/// 从原始帧里取出 (src, seq, kind)；帧无法解析时全部为 None。
fn frame_tags(frame: &Frame) -> (Option<u16>, Option<u16>, Option<VizPacketKind>) {
    match Packet::decode(frame) {
        Ok(p) => (Some(p.src.0), Some(p.seq), Some(p.protocol.into())),
        Err(_) => (None, None, None),
    }
}

impl Network {
    fn viz_push(&mut self, ev: VizEvent) {
        if let Some(v) = &mut self.viz {
            v.push(ev);
        }
    }

    fn viz_plain(&mut self, t: SimTime, kind: VizEventKind) {
        if self.viz.is_none() {
            return;
        }
        self.viz_push(VizEvent {
            t_ns: t.0,
            pkt_src: None,
            pkt_seq: None,
            pkt_kind: None,
            kind,
        });
    }

    fn viz_pkt(&mut self, t: SimTime, pkt: &Packet, kind: VizEventKind) {
        if self.viz.is_none() {
            return;
        }
        self.viz_push(VizEvent {
            t_ns: t.0,
            pkt_src: Some(pkt.src.0),
            pkt_seq: Some(pkt.seq),
            pkt_kind: Some(pkt.protocol.into()),
            kind,
        });
    }

    fn viz_frame(&mut self, t: SimTime, frame: &Frame, kind: VizEventKind) {
        if self.viz.is_none() {
            return;
        }
        let (pkt_src, pkt_seq, pkt_kind) = frame_tags(frame);
        self.viz_push(VizEvent {
            t_ns: t.0,
            pkt_src,
            pkt_seq,
            pkt_kind,
            kind,
        });
    }

    pub fn emit_viz_meta(&mut self) {
        if self.viz.is_none() {
            return;
        }
        let nodes = self
            .mote_ids()
            .into_iter()
            .map(|id| VizNodeInfo {
                id: id.0,
                powered: self.is_powered(id),
            })
            .collect::<Vec<_>>();
        let links = self
            .links()
            .iter()
            .map(|l| VizLinkInfo {
                from: l.from.0,
                to: l.to.0,
                latency_ns: l.latency.0,
                up: l.up,
            })
            .collect::<Vec<_>>();
        self.viz_plain(SimTime::ZERO, VizEventKind::Meta { nodes, links });
    }

    pub(crate) fn viz_frame_tx(
        &mut self,
        t: SimTime,
        frame: &Frame,
        from: NodeId,
        to: NodeId,
        arrive: SimTime,
        duplicate: bool,
    ) {
        self.viz_frame(
            t,
            frame,
            VizEventKind::FrameTx {
                from: from.0,
                to: to.0,
                arrive_ns: arrive.0,
                duplicate,
            },
        );
    }

    pub(crate) fn viz_frame_lost(&mut self, t: SimTime, frame: &Frame, from: NodeId, to: NodeId) {
        self.viz_frame(
            t,
            frame,
            VizEventKind::FrameLost {
                from: from.0,
                to: to.0,
            },
        );
    }

    pub(crate) fn viz_frame_rx(&mut self, t: SimTime, pkt: &Packet, node: NodeId, from: NodeId) {
        self.viz_pkt(
            t,
            pkt,
            VizEventKind::FrameRx {
                node: node.0,
                from: from.0,
            },
        );
    }

    pub(crate) fn viz_forward(&mut self, t: SimTime, pkt: &Packet, node: NodeId, next_hop: NodeId) {
        self.viz_pkt(
            t,
            pkt,
            VizEventKind::Forward {
                node: node.0,
                next_hop: next_hop.0,
            },
        );
    }

    pub(crate) fn viz_flood(&mut self, t: SimTime, pkt: &Packet, node: NodeId) {
        self.viz_pkt(t, pkt, VizEventKind::Flood { node: node.0 });
    }

    pub(crate) fn viz_delivered(&mut self, t: SimTime, pkt: &Packet, node: NodeId) {
        self.viz_pkt(t, pkt, VizEventKind::Delivered { node: node.0 });
    }

    pub(crate) fn viz_drop(&mut self, t: SimTime, pkt: Option<&Packet>, node: NodeId, reason: DropReason) {
        let kind = VizEventKind::Drop {
            node: node.0,
            reason,
        };
        match pkt {
            Some(p) => self.viz_pkt(t, p, kind),
            None => self.viz_plain(t, kind),
        }
    }

    pub(crate) fn viz_tcp_send(
        &mut self,
        t: SimTime,
        node: NodeId,
        conn: ConnKey,
        seg: &Segment,
        retrans: bool,
    ) {
        self.viz_plain(
            t,
            VizEventKind::TcpSend(VizTcp {
                node: node.0,
                conn: conn.into(),
                flag: seg.flag.name(),
                seq: seg.seq,
                len: seg.payload_size(),
                window: seg.advert_window,
                retrans,
            }),
        );
    }

    pub(crate) fn viz_tcp_state(
        &mut self,
        t: SimTime,
        node: NodeId,
        conn: ConnKey,
        from: TcpState,
        to: TcpState,
    ) {
        self.viz_plain(
            t,
            VizEventKind::TcpState {
                node: node.0,
                conn: conn.into(),
                from,
                to,
            },
        );
    }

    pub(crate) fn viz_conn_event(&mut self, t: SimTime, node: NodeId, conn: ConnKey, event: ConnEvent) {
        self.viz_plain(
            t,
            VizEventKind::ConnEvent {
                node: node.0,
                conn: conn.into(),
                event,
            },
        );
    }

    pub(crate) fn viz_route_change(&mut self, t: SimTime, node: NodeId, dest: NodeId, cost: u8, next_hop: NodeId) {
        self.viz_plain(
            t,
            VizEventKind::RouteChange {
                node: node.0,
                dest: dest.0,
                cost,
                next_hop: next_hop.0,
            },
        );
    }

    pub(crate) fn viz_power(&mut self, t: SimTime, node: NodeId, on: bool) {
        self.viz_plain(t, VizEventKind::Power { node: node.0, on });
    }
}
