use std::fs;

use crate::net::{Command, LinkError, NetWorld, NodeId};
use crate::sim::scenario::SCENARIO_SCHEMA_VERSION;
use crate::sim::{ScenarioError, ScenarioSpec, SimTime, Simulator, TopologySpec};

#[test]
fn scenario_parses_minimal_json_with_defaults() {
    let raw = r#"
    {
        "schema_version": 1,
        "topology": { "kind": "line", "motes": 3 }
    }
    "#;
    let spec = ScenarioSpec::from_json(raw).expect("parse scenario");
    assert_eq!(spec.schema_version, SCENARIO_SCHEMA_VERSION);
    assert!(matches!(
        spec.topology,
        TopologySpec::Line {
            motes: 3,
            first_id: 1
        }
    ));
    assert_eq!(spec.link.latency_ms, 5);
    assert!(spec.links.is_empty());
    assert!(spec.commands.is_empty());
    assert!(spec.until_ms.is_none());
    assert!(spec.name.is_none());

    let cfg = spec.mote.to_config();
    assert_eq!(cfg.tick, SimTime::from_millis(100));
    assert_eq!(cfg.tcp.recv_buffer, 64);
}

#[test]
fn scenario_rejects_unknown_schema_version() {
    let raw = r#"{ "schema_version": 2, "topology": { "kind": "line", "motes": 2 } }"#;
    assert!(matches!(
        ScenarioSpec::from_json(raw),
        Err(ScenarioError::UnsupportedSchema(2))
    ));
    assert!(matches!(
        ScenarioSpec::from_json("{"),
        Err(ScenarioError::Json(_))
    ));
}

#[test]
fn scenario_parses_link_mote_and_command_fields() {
    let raw = r#"
    {
        "schema_version": 1,
        "name": "lossy",
        "topology": { "kind": "edges", "edges": [[1, 2], [2, 3]] },
        "link": { "latency_ms": 2, "loss_pct": 10, "burst": [1, 5], "seed": 9 },
        "links": [ { "from": 2, "to": 3, "bidi": true, "latency_ms": 20 } ],
        "mote": { "tick_ms": 50, "rto_ms": 300, "recv_buffer": 24, "poison_reverse": false },
        "commands": [
            { "at_ms": 1000, "node": 1, "cmd": "ping", "dest": 3, "text": "hi" },
            { "at_ms": 1500, "node": 2, "cmd": "link_down", "to": 3 },
            { "at_ms": 2000, "node": 1, "cmd": "test_client", "src_port": 20, "dest": 3, "dest_port": 41, "transfer": 10 },
            { "at_ms": 2500, "node": 3, "cmd": "mote_off" }
        ],
        "until_ms": 4000
    }
    "#;
    let spec = ScenarioSpec::from_json(raw).expect("parse scenario");
    assert_eq!(spec.name.as_deref(), Some("lossy"));
    assert_eq!(spec.link.latency_ms, 2);
    assert_eq!(spec.link.loss_pct, 10.0);
    assert_eq!(spec.link.burst, Some((1, 5)));
    assert_eq!(spec.links[0].opts.latency_ms, 20);
    assert!(spec.links[0].bidi);

    let cfg = spec.mote.to_config();
    assert_eq!(cfg.tick, SimTime::from_millis(50));
    assert_eq!(cfg.tcp.init_rto, SimTime::from_millis(300));
    assert_eq!(cfg.tcp.recv_buffer, 24);
    assert!(!cfg.router.poison_reverse);

    let cmds: Vec<&Command> = spec.commands.iter().map(|c| &c.cmd).collect();
    assert_eq!(
        cmds[0],
        &Command::Ping {
            dest: 3,
            text: "hi".to_string()
        }
    );
    assert_eq!(cmds[1], &Command::LinkDown { to: 3 });
    assert_eq!(
        cmds[2],
        &Command::TestClient {
            src_port: 20,
            dest: 3,
            dest_port: 41,
            transfer: 10,
            close_when_done: false
        }
    );
    assert_eq!(cmds[3], &Command::MoteOff);
    assert_eq!(spec.until_ms, Some(4000));
}

#[test]
fn scenario_build_wires_topology_overrides_and_commands() {
    let raw = r#"
    {
        "schema_version": 1,
        "topology": { "kind": "line", "motes": 3 },
        "links": [ { "from": 1, "to": 2, "latency_ms": 30 } ],
        "commands": [ { "at_ms": 2000, "node": 1, "cmd": "ping", "dest": 3, "text": "x" } ]
    }
    "#;
    let spec = ScenarioSpec::from_json(raw).unwrap();
    let mut world = NetWorld::default();
    let mut sim = Simulator::default();
    let ids = spec.build(&mut world, &mut sim, None).unwrap();
    assert_eq!(ids, vec![NodeId(1), NodeId(2), NodeId(3)]);
    assert_eq!(
        world.net.link(NodeId(1), NodeId(2)).unwrap().latency,
        SimTime::from_millis(30)
    );
    assert_eq!(
        world.net.link(NodeId(2), NodeId(1)).unwrap().latency,
        SimTime::from_millis(5)
    );

    sim.run_until(SimTime::from_secs(3), &mut world);
    assert_eq!(world.net.mote(NodeId(3)).unwrap().stats.pings_answered, 1);
    assert_eq!(world.net.mote(NodeId(1)).unwrap().stats.ping_replies, 1);
}

#[test]
fn scenario_override_of_missing_link_is_an_error() {
    let raw = r#"
    {
        "schema_version": 1,
        "topology": { "kind": "line", "motes": 3 },
        "links": [ { "from": 1, "to": 3 } ]
    }
    "#;
    let spec = ScenarioSpec::from_json(raw).unwrap();
    let mut world = NetWorld::default();
    let mut sim = Simulator::default();
    assert!(matches!(
        spec.build(&mut world, &mut sim, None),
        Err(ScenarioError::Link(LinkError::NoLink { .. }))
    ));
}

#[test]
fn scenario_topo_file_path_is_relative_to_scenario_dir() {
    let dir = std::env::temp_dir().join(format!("motenet_scenario_{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("pair.topo"), "4 5 -40\n5 4 -40\n").unwrap();
    let scenario = dir.join("pair.json");
    fs::write(
        &scenario,
        r#"{ "schema_version": 1, "topology": { "kind": "topo_file", "path": "pair.topo" } }"#,
    )
    .unwrap();

    let spec = ScenarioSpec::load(&scenario).unwrap();
    let mut world = NetWorld::default();
    let mut sim = Simulator::default();
    let ids = spec.build(&mut world, &mut sim, scenario.parent()).unwrap();
    assert_eq!(ids, vec![NodeId(4), NodeId(5)]);
    assert!(world.net.link(NodeId(4), NodeId(5)).is_some());
    let _ = fs::remove_dir_all(&dir);
}
