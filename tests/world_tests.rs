//! World validation tests
//!
//! Objects, hooks, timers, the remote bridge and layout files, driven
//! through the public world API.

use relay_sim::simulation::{
    AxleCounterNode, AxleCounterState, ButtonState, CircuitType, CommandNode, CommandPhase, DeviatorControl,
    DeviatorNode, LayoutFile, NodeId, NodeKind, ObjectId, ObjectKind, RelayCoilNode, RelayState, SimWorld,
    SimulatorMessage, TurnoutPosition, ACCESSORY_STATE_NORMAL, ACCESSORY_STATE_REVERSE, AXLE_FREE_TRACK_OUT,
    AXLE_OCCUPIED_TRACK_OUT, AXLE_POWER_IN, AXLE_RESET_IN, DEVIATOR_COMMON, DEVIATOR_UP,
};

fn source(world: &mut SimWorld, name: &str) -> NodeId {
    world
        .add_node(name, NodeKind::PowerSource { enabled: true })
        .unwrap()
}

/// Lever L (0..=1) closes a contact feeding relay R's coil
fn lever_relay_world(delay_up: f32) -> (SimWorld, ObjectId, ObjectId, NodeId) {
    let mut world = SimWorld::new();
    let lever = world.add_lever("L", 0, 1);
    let relay = world.add_relay("R");
    let s = source(&mut world, "S");
    let contact = world
        .add_node(
            "L contact",
            NodeKind::Deviator(DeviatorNode::new(DeviatorControl::Lever {
                lever,
                up_positions: vec![1],
                down_positions: vec![],
            })),
        )
        .unwrap();
    let coil = world
        .add_node(
            "R coil",
            NodeKind::RelayCoil(RelayCoilNode {
                relay: Some(relay),
                delay_up,
                ..RelayCoilNode::default()
            }),
        )
        .unwrap();
    world.connect(s, 0, contact, DEVIATOR_COMMON).unwrap();
    world.connect(contact, DEVIATOR_UP, coil, 0).unwrap();
    (world, lever, relay, coil)
}

/// Axle counter section with a free lamp, an occupied lamp and a reset
/// button
struct Section {
    world: SimWorld,
    counter: ObjectId,
    button: ObjectId,
    feed: NodeId,
    free: NodeId,
    occupied: NodeId,
}

fn section_world() -> Section {
    let mut world = SimWorld::new();
    let counter = world.add_axle_counter("AC");
    let button = world.add_button("Reset");

    let feed = source(&mut world, "S");
    let node = world
        .add_node(
            "AC node",
            NodeKind::AxleCounter(AxleCounterNode {
                counter: Some(counter),
                state: None,
            }),
        )
        .unwrap();
    let free = world.add_node("Free", NodeKind::Lamp).unwrap();
    let occupied = world.add_node("Occupied", NodeKind::Lamp).unwrap();
    world.connect(feed, 0, node, AXLE_POWER_IN).unwrap();
    world.connect(node, AXLE_OCCUPIED_TRACK_OUT, occupied, 0).unwrap();
    world.connect(node, AXLE_FREE_TRACK_OUT, free, 0).unwrap();

    let reset_feed = source(&mut world, "S reset");
    let reset_contact = world
        .add_node(
            "Reset contact",
            NodeKind::Deviator(DeviatorNode::new(DeviatorControl::Button {
                button,
                up_states: [false, true, false],
                down_states: [false; 3],
            })),
        )
        .unwrap();
    world.connect(reset_feed, 0, reset_contact, DEVIATOR_COMMON).unwrap();
    world.connect(reset_contact, DEVIATOR_UP, node, AXLE_RESET_IN).unwrap();

    Section {
        world,
        counter,
        button,
        feed,
        free,
        occupied,
    }
}

fn coil_powered(world: &SimWorld, relay: ObjectId, coil: NodeId) -> bool {
    match world.object(relay).map(|o| &o.kind) {
        Some(ObjectKind::Relay(r)) => r.is_coil_powered(coil, 0),
        _ => false,
    }
}

#[test]
fn test_lever_drives_relay() {
    let (mut world, lever, relay, coil) = lever_relay_world(0.0);
    assert_eq!(world.relay_state(relay), Some(RelayState::Down));
    assert!(!world.is_node_powered(coil));

    world.set_lever_position(lever, 1).unwrap();
    assert!(world.is_node_powered(coil));
    assert_eq!(world.relay_state(relay), Some(RelayState::Up));
    assert!(coil_powered(&world, relay, coil));

    world.set_lever_position(lever, 0).unwrap();
    assert!(!world.is_node_powered(coil));
    assert_eq!(world.relay_state(relay), Some(RelayState::Down));
    assert!(!coil_powered(&world, relay, coil));
}

#[test]
fn test_lever_range_and_lock() {
    let (mut world, lever, _, _) = lever_relay_world(0.0);
    assert!(world.set_lever_position(lever, 5).is_err());
    assert_eq!(world.lever_position(lever), Some(0));

    if let Some(ObjectKind::Lever(l)) = world.object_mut(lever).map(|o| &mut o.kind) {
        l.locked = true;
    }
    assert!(world.set_lever_position(lever, 1).is_err());
    assert_eq!(world.lever_position(lever), Some(0));
}

#[test]
fn test_relay_coil_delay() {
    let (mut world, lever, relay, coil) = lever_relay_world(2.0);

    world.set_lever_position(lever, 1).unwrap();
    assert!(world.is_node_powered(coil));
    assert_eq!(world.relay_state(relay), Some(RelayState::Down));

    world.tick(1.0);
    assert_eq!(world.relay_state(relay), Some(RelayState::Down));

    world.tick(1.5);
    assert_eq!(world.relay_state(relay), Some(RelayState::Up));
}

#[test]
fn test_lever_spring_return() {
    let (mut world, lever, relay, _) = lever_relay_world(0.0);
    if let Some(ObjectKind::Lever(l)) = world.object_mut(lever).map(|o| &mut o.kind) {
        l.rest_position = Some(0);
        l.spring_delay = 1.0;
    }

    world.set_lever_position(lever, 1).unwrap();
    assert_eq!(world.relay_state(relay), Some(RelayState::Up));

    world.tick(1.5);
    assert_eq!(world.lever_position(lever), Some(0));
    assert_eq!(world.relay_state(relay), Some(RelayState::Down));
}

#[test]
fn test_relay_switches_lamps() {
    let mut world = SimWorld::create_demo_world().unwrap();
    let lever = world.object_by_name("L1").unwrap();
    let green = world.node_by_name("Green").unwrap();
    let red = world.node_by_name("Red").unwrap();

    assert!(world.is_node_powered(red));
    assert!(!world.is_node_powered(green));

    world.set_lever_position(lever, 1).unwrap();
    assert!(world.is_node_powered(green));
    assert!(!world.is_node_powered(red));
}

#[test]
fn test_turnout_follows_motor_and_reports() {
    let mut world = SimWorld::create_demo_world().unwrap();
    let lever = world.object_by_name("L1").unwrap();
    let turnout = world.object_by_name("T1").unwrap();
    assert_eq!(world.turnout_position(turnout), Some(TurnoutPosition::Unknown));

    world.tick(1.0);
    assert_eq!(world.turnout_position(turnout), Some(TurnoutPosition::Unknown));
    world.tick(1.0);
    assert_eq!(world.turnout_position(turnout), Some(TurnoutPosition::Normal));
    let sent = world.bridge.take_outbound();
    assert!(sent.contains(&SimulatorMessage::AccessorySetState {
        channel: 1,
        address: 5,
        state: ACCESSORY_STATE_NORMAL,
    }));

    world.set_lever_position(lever, 1).unwrap();
    world.tick(2.0);
    assert_eq!(world.turnout_position(turnout), Some(TurnoutPosition::Reverse));
    let sent = world.bridge.take_outbound();
    assert!(sent.contains(&SimulatorMessage::AccessorySetState {
        channel: 1,
        address: 5,
        state: ACCESSORY_STATE_REVERSE,
    }));
}

#[test]
fn test_turnout_controlled_deviator() {
    let mut world = SimWorld::new();
    let turnout = world.add_turnout("T", 0, 9);
    let motor_feed = source(&mut world, "S motor");
    let motor = world
        .add_node("Motor", NodeKind::Turnout { turnout: Some(turnout) })
        .unwrap();
    world.connect(motor_feed, 0, motor, 0).unwrap();

    let s = source(&mut world, "S");
    let contact = world
        .add_node(
            "T contact",
            NodeKind::Deviator(DeviatorNode::new(DeviatorControl::Turnout { turnout })),
        )
        .unwrap();
    let lamp = world.add_node("Lamp", NodeKind::Lamp).unwrap();
    world.connect(s, 0, contact, DEVIATOR_COMMON).unwrap();
    world.connect(contact, DEVIATOR_UP, lamp, 0).unwrap();
    assert!(!world.is_node_powered(lamp));

    world.tick(2.0);
    assert_eq!(world.turnout_position(turnout), Some(TurnoutPosition::Normal));
    assert!(world.is_node_powered(lamp));
}

#[test]
fn test_command_node_moves_lever() {
    let mut world = SimWorld::new();
    let lever = world.add_lever("L", 0, 2);
    let s = source(&mut world, "S");
    let command = world
        .add_node(
            "Cmd",
            NodeKind::Command(CommandNode {
                object: Some(lever),
                target_position: 2,
                ..CommandNode::default()
            }),
        )
        .unwrap();
    world.connect(s, 0, command, 0).unwrap();

    assert_eq!(world.command_phase(command), Some(CommandPhase::Waiting));
    assert_eq!(world.lever_position(lever), Some(0));

    world.tick(0.6);
    assert_eq!(world.command_phase(command), Some(CommandPhase::Done));
    assert_eq!(world.lever_position(lever), Some(2));
}

#[test]
fn test_command_node_retries_locked_lever() {
    let mut world = SimWorld::new();
    let lever = world.add_lever("L", 0, 1);
    if let Some(ObjectKind::Lever(l)) = world.object_mut(lever).map(|o| &mut o.kind) {
        l.locked = true;
    }
    let s = source(&mut world, "S");
    let command = world
        .add_node(
            "Cmd",
            NodeKind::Command(CommandNode {
                object: Some(lever),
                target_position: 1,
                ..CommandNode::default()
            }),
        )
        .unwrap();
    world.connect(s, 0, command, 0).unwrap();

    world.tick(0.6);
    assert_eq!(world.command_phase(command), Some(CommandPhase::Retry));
    assert_eq!(world.lever_position(lever), Some(0));

    if let Some(ObjectKind::Lever(l)) = world.object_mut(lever).map(|o| &mut o.kind) {
        l.locked = false;
    }
    world.tick(1.1);
    assert_eq!(world.command_phase(command), Some(CommandPhase::Done));
    assert_eq!(world.lever_position(lever), Some(1));
}

#[test]
fn test_command_node_cancelled_by_power_loss() {
    let mut world = SimWorld::new();
    let button = world.add_button("B");
    let s = source(&mut world, "S");
    let command = world
        .add_node(
            "Cmd",
            NodeKind::Command(CommandNode {
                object: Some(button),
                target_position: 1,
                ..CommandNode::default()
            }),
        )
        .unwrap();
    world.connect(s, 0, command, 0).unwrap();
    assert_eq!(world.command_phase(command), Some(CommandPhase::Waiting));

    world.set_power_source_enabled(s, false).unwrap();
    assert_eq!(world.command_phase(command), Some(CommandPhase::Off));
    assert_eq!(world.network.circuit_count(), 0);
    assert!(world
        .bridge
        .pending()
        .any(|m| *m == SimulatorMessage::Power { on: false }));

    world.tick(2.0);
    assert_eq!(world.button_state(button), Some(ButtonState::Normal));
}

#[test]
fn test_axle_counter_reset_sequence() {
    let Section {
        mut world,
        counter,
        button,
        free,
        occupied,
        ..
    } = section_world();

    assert_eq!(world.axle_counter_state(counter), Some(AxleCounterState::OccupiedAtStart));
    assert!(world.is_node_powered(occupied));
    assert!(!world.is_node_powered(free));

    world.set_button_state(button, ButtonState::Pressed).unwrap();
    assert_eq!(world.axle_counter_state(counter), Some(AxleCounterState::ResetPre));
    assert!(!world.is_node_powered(occupied));

    world.tick(3.5);
    assert_eq!(world.axle_counter_state(counter), Some(AxleCounterState::Reset));

    world.set_button_state(button, ButtonState::Normal).unwrap();
    assert_eq!(world.axle_counter_state(counter), Some(AxleCounterState::Free));
    assert!(world.is_node_powered(free));
    assert!(!world.is_node_powered(occupied));

    // Axles entering and leaving
    world.axle_counter_event(counter, 1, true).unwrap();
    assert_eq!(world.axle_counter_state(counter), Some(AxleCounterState::Occupied));
    assert!(world.is_node_powered(occupied));
    assert!(!world.is_node_powered(free));

    world.axle_counter_event(counter, 1, false).unwrap();
    assert_eq!(world.axle_counter_state(counter), Some(AxleCounterState::Free));
    assert!(world.is_node_powered(free));
}

#[test]
fn test_axle_counter_early_release_and_power_loss() {
    let Section {
        mut world,
        counter,
        button,
        feed,
        ..
    } = section_world();

    // Released before the reset step: back to OccupiedAtStart
    world.set_button_state(button, ButtonState::Pressed).unwrap();
    world.set_button_state(button, ButtonState::Normal).unwrap();
    assert_eq!(world.axle_counter_state(counter), Some(AxleCounterState::OccupiedAtStart));

    world.set_button_state(button, ButtonState::Pressed).unwrap();
    world.tick(3.5);
    world.set_button_state(button, ButtonState::Normal).unwrap();
    assert_eq!(world.axle_counter_state(counter), Some(AxleCounterState::Free));

    world.set_power_source_enabled(feed, false).unwrap();
    assert_eq!(world.axle_counter_state(counter), Some(AxleCounterState::OccupiedAtStart));
}

#[test]
fn test_sensor_frames_count_axles() {
    let Section {
        mut world,
        counter,
        button,
        ..
    } = section_world();
    world.set_button_state(button, ButtonState::Pressed).unwrap();
    world.tick(3.5);
    world.set_button_state(button, ButtonState::Normal).unwrap();
    assert_eq!(world.axle_counter_state(counter), Some(AxleCounterState::Free));

    // First sensor: channel 0, address 0
    world.receive_bridge_bytes(&[3, 7, 0, 0, 0, 0, 1]).unwrap();
    assert_eq!(world.axle_counter_state(counter), Some(AxleCounterState::Occupied));

    // Second sensor arrives in two pieces
    world.receive_bridge_bytes(&[3, 7, 0, 0]).unwrap();
    assert_eq!(world.axle_counter_state(counter), Some(AxleCounterState::Occupied));
    world.receive_bridge_bytes(&[1, 0, 1]).unwrap();
    assert_eq!(world.axle_counter_state(counter), Some(AxleCounterState::Free));

    assert!(world.receive_bridge_bytes(&[9, 7, 0, 0, 0, 0, 0]).is_err());
}

#[test]
fn test_binding_errors_change_nothing() {
    let mut world = SimWorld::new();
    let lever = world.add_lever("L", 0, 1);
    let counter = world.add_axle_counter("AC");

    let result = world.add_node(
        "Coil",
        NodeKind::RelayCoil(RelayCoilNode {
            relay: Some(lever),
            ..RelayCoilNode::default()
        }),
    );
    assert!(result.is_err());
    assert_eq!(world.network.node_count(), 0);

    let first = world
        .add_node(
            "AC 1",
            NodeKind::AxleCounter(AxleCounterNode {
                counter: Some(counter),
                state: None,
            }),
        )
        .unwrap();
    let second = world
        .add_node("AC 2", NodeKind::AxleCounter(AxleCounterNode::default()))
        .unwrap();
    let err = world.bind_object(second, Some(counter)).unwrap_err();
    assert!(format!("{:#}", err).contains("already wired"));

    // Rebinding the node that owns the counter is fine
    world.bind_object(first, Some(counter)).unwrap();

    let lamp = world.add_node("Lamp", NodeKind::Lamp).unwrap();
    assert!(world.bind_object(lamp, Some(lever)).is_err());

    let deviator = world
        .add_node("Dev", NodeKind::Deviator(DeviatorNode::default()))
        .unwrap();
    assert!(world
        .set_deviator_control(deviator, DeviatorControl::Relay { relay: lever })
        .is_err());
    world
        .set_deviator_control(
            deviator,
            DeviatorControl::Lever {
                lever,
                up_positions: vec![1],
                down_positions: vec![0],
            },
        )
        .unwrap();
    assert!(world.set_deviator_contacts(deviator, true, false).is_err());
}

#[test]
fn test_bind_coil_later() {
    let mut world = SimWorld::new();
    let relay = world.add_relay("R");
    let s = source(&mut world, "S");
    let coil = world
        .add_node("Coil", NodeKind::RelayCoil(RelayCoilNode::default()))
        .unwrap();
    world.connect(s, 0, coil, 0).unwrap();
    assert!(!world.is_node_powered(coil));

    world.bind_object(coil, Some(relay)).unwrap();
    assert!(world.is_node_powered(coil));
    assert_eq!(world.relay_state(relay), Some(RelayState::Up));

    world.bind_object(coil, None).unwrap();
    assert!(!world.is_node_powered(coil));
    assert_eq!(world.relay_state(relay), Some(RelayState::Down));
}

#[test]
fn test_connect_rejects_busy_contact() {
    let mut world = SimWorld::new();
    let s = source(&mut world, "S");
    let lamp = world.add_node("Lamp", NodeKind::Lamp).unwrap();
    let other = world.add_node("Other", NodeKind::Lamp).unwrap();
    world.connect(s, 0, lamp, 0).unwrap();

    assert!(world.connect(s, 0, other, 0).is_err());
    assert!(world.connect(lamp, 3, other, 0).is_err());
    assert_eq!(world.network.cable_count(), 1);
    assert!(world.is_node_powered(lamp));
    assert!(world.node(other).unwrap().contact_cable(0).is_none());
}

#[test]
fn test_disconnect_and_remove_node() {
    let mut world = SimWorld::new();
    let s = source(&mut world, "S");
    let switch = world
        .add_node("SW", NodeKind::OnOffSwitch { on: true })
        .unwrap();
    let lamp = world.add_node("Lamp", NodeKind::Lamp).unwrap();
    world.connect(s, 0, switch, 0).unwrap();
    let cable = world.connect(switch, 1, lamp, 0).unwrap();
    assert!(world.is_node_powered(lamp));
    assert!(world.network.are_wired(s, lamp));
    assert_eq!(world.network.terminals().len(), 4);
    let far = world.network.far_end(switch, 1).unwrap();
    assert_eq!((far.node, far.contact), (lamp, 0));

    world.disconnect(cable).unwrap();
    assert!(!world.is_node_powered(lamp));
    assert!(!world.network.are_wired(s, lamp));
    assert!(world.network.far_end(switch, 1).is_none());
    assert_eq!(world.network.terminals().len(), 2);
    assert_eq!(world.network.cable_count(), 1);
    assert_eq!(world.network.circuit_count(), 1);

    world.connect(switch, 1, lamp, 0).unwrap();
    assert!(world.is_node_powered(lamp));

    world.remove_node(switch).unwrap();
    assert!(world.node(switch).is_none());
    assert!(!world.is_node_powered(lamp));
    assert_eq!(world.network.cable_count(), 0);
    assert_eq!(world.network.circuit_count(), 1);
    assert!(world.network.circuits().all(|c| c.kind == CircuitType::Open));
    assert!(world.remove_node(switch).is_err());
}

#[test]
fn test_layout_round_trip() {
    let world = SimWorld::create_demo_world().unwrap();
    let json = world.to_layout().to_json().unwrap();

    let layout = LayoutFile::from_json(&json).unwrap();
    let mut loaded = SimWorld::from_layout(&layout).unwrap();

    assert_eq!(loaded.objects.len(), world.objects.len());
    assert_eq!(loaded.network.node_count(), world.network.node_count());
    assert_eq!(loaded.network.cable_count(), world.network.cable_count());
    for node in world.network.nodes() {
        let id = loaded.node_by_name(&node.name).unwrap();
        assert_eq!(id, node.id);
        assert_eq!(
            loaded.is_node_powered(id),
            world.is_node_powered(node.id),
            "power differs at '{}'",
            node.name
        );
    }

    // Fresh ids do not collide with loaded ones
    let extra = loaded.add_node("Extra", NodeKind::Lamp).unwrap();
    assert!(world.node(extra).is_none());

    let lever = loaded.object_by_name("L1").unwrap();
    loaded.set_lever_position(lever, 1).unwrap();
    let green = loaded.node_by_name("Green").unwrap();
    assert!(loaded.is_node_powered(green));
}

#[test]
fn test_layout_file_save_and_load() {
    let world = SimWorld::create_demo_world().unwrap();
    let path = std::env::temp_dir().join(format!("relay_sim_layout_{}.json", std::process::id()));
    world.to_layout().save(&path).unwrap();

    let layout = LayoutFile::load(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(layout.nodes.len(), world.network.node_count());
    assert!(SimWorld::from_layout(&layout).is_ok());
}

#[test]
fn test_layout_validation_errors() {
    let missing_object = r#"{
        "nodes": [
            { "id": 0, "name": "coil", "kind": { "type": "relay_coil", "relay": 7 } }
        ]
    }"#;
    let layout = LayoutFile::from_json(missing_object).unwrap();
    let err = SimWorld::from_layout(&layout).unwrap_err();
    assert!(format!("{:#}", err).contains("coil"));

    let duplicate = r#"{
        "nodes": [
            { "id": 0, "name": "a", "kind": { "type": "lamp" } },
            { "id": 0, "name": "b", "kind": { "type": "lamp" } }
        ]
    }"#;
    let layout = LayoutFile::from_json(duplicate).unwrap();
    let err = SimWorld::from_layout(&layout).unwrap_err();
    assert!(format!("{:#}", err).contains("Duplicate node id"));

    let bad_contact = r#"{
        "nodes": [
            { "id": 0, "name": "lamp", "kind": { "type": "lamp" } }
        ],
        "cables": [
            { "id": 1, "a": { "node": 0, "contact": 3 } }
        ]
    }"#;
    let layout = LayoutFile::from_json(bad_contact).unwrap();
    assert!(SimWorld::from_layout(&layout).is_err());

    assert!(LayoutFile::from_json("{ not json").is_err());
}

#[test]
fn test_layout_from_json_powers_lamp() {
    let json = r#"{
        "nodes": [
            { "id": 0, "name": "S", "kind": { "type": "power_source", "enabled": true } },
            { "id": 1, "name": "Lamp", "kind": { "type": "lamp" } }
        ],
        "cables": [
            { "id": 2, "a": { "node": 0, "contact": 0 }, "b": { "node": 1, "contact": 0 } }
        ]
    }"#;
    let layout = LayoutFile::from_json(json).unwrap();
    let world = SimWorld::from_layout(&layout).unwrap();
    let lamp = world.node_by_name("Lamp").unwrap();
    assert!(world.is_node_powered(lamp));
    assert_eq!(world.network.circuit_count(), 1);
}

#[test]
fn test_layout_diode_and_passthrough() {
    let json = r#"{
        "nodes": [
            { "id": 0, "name": "S", "kind": { "type": "power_source", "enabled": true } },
            { "id": 1, "name": "D", "kind": { "type": "diode" } },
            { "id": 2, "name": "Dev", "kind": { "type": "deviator", "pole_types": ["passthrough", "passthrough"] } },
            { "id": 3, "name": "Lamp", "kind": { "type": "lamp" } }
        ],
        "cables": [
            { "id": 4, "a": { "node": 0, "contact": 0 }, "b": { "node": 1, "contact": 0 } },
            { "id": 5, "a": { "node": 1, "contact": 1 }, "b": { "node": 2, "contact": 0 } },
            { "id": 6, "a": { "node": 2, "contact": 2 }, "b": { "node": 3, "contact": 0 } }
        ]
    }"#;
    let layout = LayoutFile::from_json(json).unwrap();
    let world = SimWorld::from_layout(&layout).unwrap();
    let lamp = world.node_by_name("Lamp").unwrap();
    assert!(world.is_node_powered(lamp));

    let saved = world.to_layout().to_json().unwrap();
    assert!(saved.contains("\"diode\""));
    assert!(saved.contains("\"passthrough\""));
}
