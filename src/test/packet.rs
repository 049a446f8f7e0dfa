use crate::net::packet::{MAX_TTL, PACKET_SIZE};
use crate::net::{FrameError, NodeId, Packet, Protocol};

#[test]
fn encode_lays_out_header_big_endian_and_pads_payload() {
    let pkt = Packet::new(NodeId(0x0102), NodeId(7), 0xA0B0, 9, Protocol::Tcp, b"hi").unwrap();
    let frame = pkt.encode();
    assert_eq!(frame.len(), PACKET_SIZE);
    assert_eq!(&frame[..8], &[0x01, 0x02, 0x00, 0x07, 0xA0, 0xB0, 9, 4]);
    assert_eq!(&frame[8..10], b"hi");
    assert!(frame[10..].iter().all(|&b| b == 0));

    let back = Packet::decode(&frame).unwrap();
    assert_eq!(back, pkt);
    assert_eq!(back.payload().len(), 20);
}

#[test]
fn payload_longer_than_twenty_bytes_is_rejected() {
    let err = Packet::new(NodeId(1), NodeId(2), 0, 5, Protocol::Flood, &[0u8; 21]).unwrap_err();
    assert_eq!(err, FrameError::PayloadTooLarge { len: 21, max: 20 });
    assert!(Packet::new(NodeId(1), NodeId(2), 0, 5, Protocol::Flood, &[0u8; 20]).is_ok());
}

#[test]
fn decode_rejects_wrong_length_unknown_protocol_and_high_ttl() {
    let frame = Packet::new(NodeId(1), NodeId(2), 3, 4, Protocol::Ping, b"x")
        .unwrap()
        .encode();

    assert!(matches!(Packet::decode(&frame[..27]), Err(FrameError::Malformed(_))));
    let mut long = frame.to_vec();
    long.push(0);
    assert!(matches!(Packet::decode(&long), Err(FrameError::Malformed(_))));

    let mut bad_proto = frame;
    bad_proto[7] = 42;
    assert!(matches!(Packet::decode(&bad_proto), Err(FrameError::Malformed(_))));

    let mut bad_ttl = frame;
    bad_ttl[6] = MAX_TTL + 1;
    assert!(matches!(Packet::decode(&bad_ttl), Err(FrameError::Malformed(_))));
}

#[test]
fn protocol_ids_match_wire_values() {
    let ids = [
        (Protocol::Ping, 0),
        (Protocol::PingReply, 1),
        (Protocol::Flood, 2),
        (Protocol::Name, 3),
        (Protocol::Tcp, 4),
        (Protocol::DistanceVector, 5),
        (Protocol::Command, 99),
    ];
    for (p, raw) in ids {
        assert_eq!(p.as_u8(), raw);
        assert_eq!(Protocol::from_u8(raw), Some(p));
    }
    assert_eq!(Protocol::from_u8(6), None);
}

#[test]
fn ttl_is_clamped_and_decrement_stops_at_zero() {
    let pkt = Packet::new(NodeId(1), NodeId(2), 0, 200, Protocol::Tcp, &[]).unwrap();
    assert_eq!(pkt.ttl, MAX_TTL);

    let one = Packet::new(NodeId(1), NodeId(2), 0, 1, Protocol::Tcp, &[]).unwrap();
    let zero = one.decremented().expect("ttl 1 can be forwarded once");
    assert_eq!(zero.ttl, 0);
    assert!(zero.decremented().is_none());
}
