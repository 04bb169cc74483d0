//! Circuit propagation validation tests
//!
//! These tests build small networks through the world API and check which
//! circuits the engine discovers, keeps and cuts.

use relay_sim::simulation::{
    AnyCircuitType, CircuitItem, CircuitPole, CircuitType, CoilPolarity, DeviatorNode, NodeId, NodeKind,
    RelayCoilNode, RelayState, SimWorld, DEVIATOR_COMMON, DEVIATOR_DOWN, DEVIATOR_UP, DIODE_ANODE, DIODE_CATHODE,
};

fn source(world: &mut SimWorld, name: &str) -> NodeId {
    world
        .add_node(name, NodeKind::PowerSource { enabled: true })
        .unwrap()
}

fn manual_deviator(world: &mut SimWorld, name: &str) -> NodeId {
    world
        .add_node(name, NodeKind::Deviator(DeviatorNode::default()))
        .unwrap()
}

fn count(world: &SimWorld, kind: CircuitType) -> usize {
    world.network.circuits().filter(|c| c.kind == kind).count()
}

fn last_node(world: &SimWorld) -> Option<NodeId> {
    let circuit = world.network.circuits().next()?;
    circuit.items.iter().rev().find_map(CircuitItem::as_node).map(|n| n.node)
}

fn chains(world: &SimWorld, kind: CircuitType) -> Vec<Vec<CircuitItem>> {
    let mut chains: Vec<_> = world
        .network
        .circuits()
        .filter(|c| c.kind == kind)
        .map(|c| c.items.clone())
        .collect();
    chains.sort_by_key(|items| format!("{:?}", items));
    chains
}

/// No two circuits of the same type share a chain
fn assert_no_duplicates(world: &SimWorld) {
    let circuits: Vec<_> = world.network.circuits().collect();
    for (i, a) in circuits.iter().enumerate() {
        for b in &circuits[i + 1..] {
            assert!(
                a.kind != b.kind || a.items != b.items,
                "circuits {:?} and {:?} share a chain",
                a.id,
                b.id
            );
        }
    }
}

/// Node and cable counters agree with the circuit chains
fn assert_consistent(world: &SimWorld) {
    let presence = |flags: [bool; 2]| AnyCircuitType::from_presence(flags[0], flags[1]);

    for node in world.network.nodes() {
        for contact in 0..node.contact_count() {
            for pole in CircuitPole::BOTH {
                let mut entrance = [false; 2];
                let mut exit = [false; 2];
                for circuit in world.network.circuits() {
                    for item in circuit.occurrences_of(node.id) {
                        if item.from_contact == Some(contact) && item.from_pole == pole {
                            entrance[circuit.kind.index()] = true;
                        }
                        if item.to_contact == Some(contact) && item.to_pole == pole {
                            exit[circuit.kind.index()] = true;
                        }
                    }
                }
                let any = [entrance[0] || exit[0], entrance[1] || exit[1]];
                assert_eq!(
                    node.has_any_entrance_circuit_on_pole(contact, pole),
                    presence(entrance),
                    "entrance of '{}' contact {} on {:?}",
                    node.name,
                    contact,
                    pole
                );
                assert_eq!(
                    node.has_any_exit_circuit_on_pole(contact, pole),
                    presence(exit),
                    "exit of '{}' contact {} on {:?}",
                    node.name,
                    contact,
                    pole
                );
                assert_eq!(node.has_any_circuit_on_pole(contact, pole), presence(any));
            }
        }
        for kind in CircuitType::BOTH {
            let expected = world
                .network
                .circuits()
                .any(|c| c.kind == kind && c.passes_node(node.id));
            assert_eq!(node.has_circuits_of(kind), expected, "{:?} list of '{}'", kind, node.name);
        }
    }

    for cable in world.network.cables() {
        for pole in CircuitPole::BOTH {
            let carries = |kind: CircuitType| {
                world.network.circuits().any(|c| {
                    c.kind == kind && c.cable_items().any(|item| item.cable == cable.id && item.pole == pole)
                })
            };
            assert_eq!(
                cable.power(pole),
                AnyCircuitType::from_presence(carries(CircuitType::Open), carries(CircuitType::Closed)),
                "cable {:?} on {:?}",
                cable.id,
                pole
            );
        }
    }
}

#[test]
fn test_unwired_source_has_open_circuit() {
    let mut world = SimWorld::new();
    let s = source(&mut world, "S");

    assert_eq!(world.network.circuit_count(), 1);
    assert_eq!(count(&world, CircuitType::Open), 1);
    let node = world.node(s).unwrap();
    assert_eq!(node.has_any_circuit(0), AnyCircuitType::Open);
    assert!(!world.is_node_powered(s));
}

#[test]
fn test_lamp_on_source_closes_circuit() {
    let mut world = SimWorld::new();
    let s = source(&mut world, "S");
    let lamp = world.add_node("Lamp", NodeKind::Lamp).unwrap();
    let cable = world.connect(s, 0, lamp, 0).unwrap();

    assert_eq!(world.network.circuit_count(), 1);
    assert_eq!(count(&world, CircuitType::Closed), 1);
    assert!(world.is_node_powered(lamp));
    assert!(world.is_node_powered(s));

    // The cable carries the outgoing and the returning conductor
    let sim_cable = world.network.cable(cable).unwrap();
    assert!(sim_cable.power(CircuitPole::First).has_closed());
    assert!(sim_cable.power(CircuitPole::Second).has_closed());

    let circuit = world.network.circuits().next().unwrap();
    let last = circuit.items.last().and_then(CircuitItem::as_node).unwrap();
    assert_eq!(last.node, s);
    assert_eq!(last.from_pole, CircuitPole::Second);
}

#[test]
fn test_reseed_is_idempotent() {
    let mut world = SimWorld::new();
    let s = source(&mut world, "S");
    let switch = world
        .add_node("SW", NodeKind::OnOffSwitch { on: true })
        .unwrap();
    let lamp = world.add_node("Lamp", NodeKind::Lamp).unwrap();
    world.connect(s, 0, switch, 0).unwrap();
    world.connect(switch, 1, lamp, 0).unwrap();

    let circuits = world.network.circuit_count();
    let before: Vec<_> = world.network.nodes().map(|n| n.power()).collect();

    world.network.reseed_all();
    world.network.reseed_all();
    world.settle();

    let after: Vec<_> = world.network.nodes().map(|n| n.power()).collect();
    assert_eq!(world.network.circuit_count(), circuits);
    assert_eq!(before, after);
}

#[test]
fn test_switch_off_demotes_and_switch_on_restores() {
    let mut world = SimWorld::new();
    let s = source(&mut world, "S");
    let switch = world
        .add_node("SW", NodeKind::OnOffSwitch { on: true })
        .unwrap();
    let lamp = world.add_node("Lamp", NodeKind::Lamp).unwrap();
    world.connect(s, 0, switch, 0).unwrap();
    world.connect(switch, 1, lamp, 0).unwrap();

    assert_eq!(world.network.circuit_count(), 1);
    assert!(world.is_node_powered(lamp));

    world.set_switch_on(switch, false).unwrap();
    assert!(!world.is_node_powered(lamp));
    assert_eq!(world.network.circuit_count(), 1);
    assert_eq!(count(&world, CircuitType::Open), 1);
    assert_eq!(last_node(&world), Some(switch));
    assert_eq!(
        world.node(lamp).unwrap().has_any_circuit(0),
        AnyCircuitType::None
    );

    world.set_switch_on(switch, true).unwrap();
    assert!(world.is_node_powered(lamp));
    assert_eq!(world.network.circuit_count(), 1);
    assert_eq!(count(&world, CircuitType::Closed), 1);
}

#[test]
fn test_truncate_keeps_prefix() {
    let mut world = SimWorld::new();
    let s = source(&mut world, "S");
    let first = world
        .add_node("SW1", NodeKind::OnOffSwitch { on: true })
        .unwrap();
    let second = world
        .add_node("SW2", NodeKind::OnOffSwitch { on: true })
        .unwrap();
    world.connect(s, 0, first, 0).unwrap();
    let middle = world.connect(first, 1, second, 0).unwrap();

    // Open circuit leaving SW2 through its free contact
    assert_eq!(count(&world, CircuitType::Open), 1);
    assert_eq!(
        world.node(second).unwrap().has_any_circuit(1),
        AnyCircuitType::Open
    );

    world.set_switch_on(first, false).unwrap();

    assert_eq!(world.network.circuit_count(), 1);
    let circuit = world.network.circuits().next().unwrap();
    assert_eq!(circuit.kind, CircuitType::Open);
    assert_eq!(circuit.items.len(), 3);
    let last = circuit.items.last().and_then(CircuitItem::as_node).unwrap();
    assert_eq!(last.node, first);
    assert_eq!(last.to_contact, None);

    let first_node = world.node(first).unwrap();
    assert_eq!(first_node.has_any_circuit(0), AnyCircuitType::Open);
    assert_eq!(first_node.has_any_circuit(1), AnyCircuitType::None);
    assert!(!world.node(second).unwrap().has_circuits_of(CircuitType::Open));
    let middle = world.network.cable(middle).unwrap();
    assert_eq!(middle.power(CircuitPole::First), AnyCircuitType::None);
}

#[test]
fn test_chained_deviators() {
    let mut world = SimWorld::new();
    let s = source(&mut world, "S");
    let a = manual_deviator(&mut world, "A");
    let b = manual_deviator(&mut world, "B");
    let lamp = world.add_node("Lamp", NodeKind::Lamp).unwrap();
    world.connect(s, 0, a, DEVIATOR_COMMON).unwrap();
    world.connect(a, DEVIATOR_UP, b, DEVIATOR_COMMON).unwrap();
    world.connect(b, DEVIATOR_UP, lamp, 0).unwrap();

    assert_eq!(world.network.circuit_count(), 1);
    assert_eq!(last_node(&world), Some(a));

    world.set_deviator_contacts(a, true, false).unwrap();
    assert_eq!(world.network.circuit_count(), 1);
    assert_eq!(count(&world, CircuitType::Open), 1);
    assert_eq!(last_node(&world), Some(b));
    assert!(!world.is_node_powered(lamp));

    world.set_deviator_contacts(b, true, false).unwrap();
    assert_eq!(world.network.circuit_count(), 1);
    assert_eq!(count(&world, CircuitType::Closed), 1);
    assert!(world.is_node_powered(lamp));
    let circuit = world.network.circuits().next().unwrap();
    assert_eq!(circuit.items.len(), 13);
    for node in [a, b] {
        let deviator = world.node(node).unwrap();
        assert!(deviator.has_circuit(DEVIATOR_COMMON, CircuitType::Closed));
        assert!(deviator.has_circuit(DEVIATOR_UP, CircuitType::Closed));
        assert!(!deviator.has_circuit(DEVIATOR_DOWN, CircuitType::Closed));
    }
    assert_consistent(&world);

    // Cutting upstream demotes the circuit to the part still valid
    world.set_deviator_contacts(a, false, false).unwrap();
    assert!(!world.is_node_powered(lamp));
    assert_eq!(world.network.circuit_count(), 1);
    assert_eq!(count(&world, CircuitType::Open), 1);
    assert_eq!(last_node(&world), Some(a));
    assert!(!world.node(b).unwrap().has_circuits_of(CircuitType::Open));
    assert!(!world.node(a).unwrap().has_circuit(DEVIATOR_UP, CircuitType::Open));
    assert_consistent(&world);

    world.set_deviator_contacts(a, true, false).unwrap();
    assert!(world.is_node_powered(lamp));
    assert_eq!(count(&world, CircuitType::Closed), 1);
    assert_consistent(&world);
}

#[test]
fn test_junction_loop_terminates() {
    let mut world = SimWorld::new();
    let s = source(&mut world, "S");
    let junction = world
        .add_node("J", NodeKind::SimpleJunction { disabled_contact: 0 })
        .unwrap();
    let lamp = world.add_node("Lamp", NodeKind::Lamp).unwrap();
    world.connect(s, 0, junction, 0).unwrap();
    world.connect(junction, 1, junction, 2).unwrap();

    // The feed into the junction survives the loop
    assert!(world.network.circuit_count() >= 1);
    assert!(world.node(junction).unwrap().has_circuits_of(CircuitType::Open));
    assert_no_duplicates(&world);
    assert_consistent(&world);

    world.connect(junction, 3, lamp, 0).unwrap();

    assert!(world.is_settled());
    assert!(world.is_node_powered(lamp));
    assert!(count(&world, CircuitType::Closed) >= 1);
    assert!(world.network.circuits().all(|c| c.items.len() < 64));
    assert_no_duplicates(&world);
    assert_consistent(&world);
}

#[test]
fn test_junction_loop_added_last_keeps_lamp() {
    let mut world = SimWorld::new();
    let s = source(&mut world, "S");
    let junction = world
        .add_node("J", NodeKind::SimpleJunction { disabled_contact: 0 })
        .unwrap();
    let lamp = world.add_node("Lamp", NodeKind::Lamp).unwrap();
    world.connect(s, 0, junction, 0).unwrap();
    world.connect(junction, 3, lamp, 0).unwrap();
    assert!(world.is_node_powered(lamp));

    world.connect(junction, 1, junction, 2).unwrap();
    assert!(world.is_node_powered(lamp));
    assert_no_duplicates(&world);
    assert_consistent(&world);
}

#[test]
fn test_disabled_junction_contact_leaves_no_duplicates() {
    let mut world = SimWorld::new();
    let s = source(&mut world, "S");
    let junction = world
        .add_node("J", NodeKind::SimpleJunction { disabled_contact: 0 })
        .unwrap();
    let lamp = world.add_node("Lamp", NodeKind::Lamp).unwrap();
    world.connect(s, 0, junction, 1).unwrap();
    world.connect(junction, 2, lamp, 0).unwrap();
    assert!(world.is_node_powered(lamp));

    world.set_junction_disabled_contact(junction, 1).unwrap();
    assert!(!world.is_node_powered(lamp));
    assert_eq!(world.network.circuit_count(), 1);
    assert_eq!(last_node(&world), Some(junction));
    assert_no_duplicates(&world);
    assert_consistent(&world);

    world.network.reseed_all();
    world.settle();
    assert_eq!(world.network.circuit_count(), 1);
    assert_no_duplicates(&world);

    world.set_junction_disabled_contact(junction, 0).unwrap();
    assert!(world.is_node_powered(lamp));
    assert_no_duplicates(&world);
    assert_consistent(&world);
}

#[test]
fn test_disable_then_recreate_restores_circuits() {
    let mut world = SimWorld::new();
    let s = source(&mut world, "S");
    let deviator = manual_deviator(&mut world, "D");
    let up_lamp = world.add_node("Up", NodeKind::Lamp).unwrap();
    let down_lamp = world.add_node("Down", NodeKind::Lamp).unwrap();
    world.connect(s, 0, deviator, DEVIATOR_COMMON).unwrap();
    world.connect(deviator, DEVIATOR_UP, up_lamp, 0).unwrap();
    world.connect(deviator, DEVIATOR_DOWN, down_lamp, 0).unwrap();
    world.set_deviator_contacts(deviator, true, true).unwrap();
    assert_eq!(count(&world, CircuitType::Closed), 2);
    let closed = chains(&world, CircuitType::Closed);

    // Only the circuit through Down is affected
    let ids = world.node(deviator).unwrap().circuits(CircuitType::Closed);
    world.network.disable_circuits(&ids, deviator, Some(DEVIATOR_DOWN));
    assert_eq!(count(&world, CircuitType::Closed), 1);
    assert!(world.node(up_lamp).unwrap().has_circuits());
    assert!(!world.node(down_lamp).unwrap().has_circuits());
    assert_consistent(&world);

    // Nothing changed in the deviator, so re-seeding brings back the same
    // chains
    world.network.create_circuits_from_other_node(deviator);
    assert_eq!(chains(&world, CircuitType::Closed), closed);
    assert_no_duplicates(&world);
    assert_consistent(&world);

    let ids = world.node(deviator).unwrap().circuits(CircuitType::Closed);
    world.network.disable_circuits(&ids, deviator, None);
    assert_eq!(count(&world, CircuitType::Closed), 0);
    assert_eq!(count(&world, CircuitType::Open), 1);
    assert_eq!(last_node(&world), Some(deviator));
    assert_consistent(&world);

    world.network.create_circuits_from_other_node(deviator);
    assert_eq!(chains(&world, CircuitType::Closed), closed);
    assert_consistent(&world);
}

#[test]
fn test_truncate_then_recreate_restores_circuits() {
    let mut world = SimWorld::new();
    let s = source(&mut world, "S");
    let first = world
        .add_node("SW1", NodeKind::OnOffSwitch { on: true })
        .unwrap();
    let second = world
        .add_node("SW2", NodeKind::OnOffSwitch { on: true })
        .unwrap();
    world.connect(s, 0, first, 0).unwrap();
    world.connect(first, 1, second, 0).unwrap();
    let open = chains(&world, CircuitType::Open);
    assert_eq!(open.len(), 1);

    // A contact the circuit does not cross leaves it alone
    let ids = world.node(second).unwrap().circuits(CircuitType::Open);
    world.network.truncate_circuits(&ids, first, Some(5));
    assert_eq!(chains(&world, CircuitType::Open), open);

    world.network.truncate_circuits(&ids, first, Some(1));
    assert_eq!(last_node(&world), Some(first));
    assert!(!world.node(second).unwrap().has_circuits_of(CircuitType::Open));
    assert_consistent(&world);

    world.network.create_circuits_from_other_node(first);
    assert_eq!(chains(&world, CircuitType::Open), open);
    assert_consistent(&world);

    // Truncating at the source removes the circuit
    let ids = world.node(s).unwrap().circuits(CircuitType::Open);
    world.network.truncate_circuits(&ids, s, None);
    assert_eq!(world.network.circuit_count(), 0);
    assert_consistent(&world);
}

#[test]
fn test_source_to_source_carries_nothing() {
    let mut world = SimWorld::new();
    let a = source(&mut world, "S1");
    let b = source(&mut world, "S2");
    world.connect(a, 0, b, 0).unwrap();

    assert_eq!(world.network.circuit_count(), 0);
    assert!(!world.is_node_powered(a));
    assert!(!world.is_node_powered(b));
}

#[test]
fn test_polarized_coil_behind_inversion() {
    let mut world = SimWorld::new();
    let relay = world.add_relay("R");
    let s = source(&mut world, "S");
    let inversion = world.add_node("P", NodeKind::PolarityInversion).unwrap();
    let coil = world
        .add_node(
            "Coil",
            NodeKind::RelayCoil(RelayCoilNode {
                relay: Some(relay),
                polarity: CoilPolarity::FirstPole,
                ..RelayCoilNode::default()
            }),
        )
        .unwrap();
    world.connect(s, 0, inversion, 0).unwrap();
    let cable = world.connect(inversion, 1, coil, 0).unwrap();

    // The coil sees the second pole and refuses it
    assert!(!world.is_node_powered(coil));
    assert_eq!(world.relay_state(relay), Some(RelayState::Down));

    // Without the inversion the coil picks up
    world.disconnect(cable).unwrap();
    world.remove_node(inversion).unwrap();
    world.connect(s, 0, coil, 0).unwrap();
    assert!(world.is_node_powered(coil));
    assert_eq!(world.relay_state(relay), Some(RelayState::Up));
}

#[test]
fn test_inversion_closes_with_lamp() {
    let mut world = SimWorld::new();
    let s = source(&mut world, "S");
    let inversion = world.add_node("P", NodeKind::PolarityInversion).unwrap();
    let lamp = world.add_node("Lamp", NodeKind::Lamp).unwrap();
    world.connect(s, 0, inversion, 0).unwrap();
    world.connect(inversion, 1, lamp, 0).unwrap();

    assert!(world.is_node_powered(lamp));
    let circuit = world.network.circuits().next().unwrap();
    let lamp_item = circuit
        .items
        .iter()
        .filter_map(CircuitItem::as_node)
        .find(|n| n.node == lamp)
        .unwrap();
    assert_eq!(lamp_item.from_pole, CircuitPole::Second);
}

#[test]
fn test_double_inversion_restores_pole() {
    let mut world = SimWorld::new();
    let s = source(&mut world, "S");
    let p1 = world.add_node("P1", NodeKind::PolarityInversion).unwrap();
    let p2 = world.add_node("P2", NodeKind::PolarityInversion).unwrap();
    let lamp = world.add_node("Lamp", NodeKind::Lamp).unwrap();
    world.connect(s, 0, p1, 0).unwrap();
    world.connect(p1, 1, p2, 0).unwrap();
    world.connect(p2, 1, lamp, 0).unwrap();

    assert!(world.is_node_powered(lamp));
    assert_eq!(world.network.circuit_count(), 1);
    let circuit = world.network.circuits().next().unwrap();
    let pole_at = |node: NodeId| {
        circuit
            .node_items()
            .find(|item| item.node == node)
            .map(|item| (item.from_pole, item.to_pole))
            .unwrap()
    };
    assert_eq!(pole_at(p1), (CircuitPole::First, CircuitPole::Second));
    assert_eq!(pole_at(p2), (CircuitPole::Second, CircuitPole::First));
    assert_eq!(pole_at(lamp), (CircuitPole::First, CircuitPole::Second));
    assert_consistent(&world);
}

#[test]
fn test_diode_conducts_one_way() {
    let mut world = SimWorld::new();
    let s = source(&mut world, "S");
    let diode = world.add_node("D", NodeKind::Diode).unwrap();
    let lamp = world.add_node("Lamp", NodeKind::Lamp).unwrap();
    world.connect(s, 0, diode, DIODE_ANODE).unwrap();
    world.connect(diode, DIODE_CATHODE, lamp, 0).unwrap();
    assert!(world.is_node_powered(lamp));
    assert_consistent(&world);

    // Fed from the cathode nothing gets through
    let mut world = SimWorld::new();
    let s = source(&mut world, "S");
    let diode = world.add_node("D", NodeKind::Diode).unwrap();
    let lamp = world.add_node("Lamp", NodeKind::Lamp).unwrap();
    world.connect(s, 0, diode, DIODE_CATHODE).unwrap();
    world.connect(diode, DIODE_ANODE, lamp, 0).unwrap();
    assert!(!world.is_node_powered(lamp));
    assert_eq!(count(&world, CircuitType::Open), 1);
    assert_eq!(last_node(&world), Some(diode));
    assert_eq!(world.node(lamp).unwrap().has_any_circuit(0), AnyCircuitType::None);

    // So is the anode reached on the inverted pole
    let mut world = SimWorld::new();
    let s = source(&mut world, "S");
    let inversion = world.add_node("P", NodeKind::PolarityInversion).unwrap();
    let diode = world.add_node("D", NodeKind::Diode).unwrap();
    let lamp = world.add_node("Lamp", NodeKind::Lamp).unwrap();
    world.connect(s, 0, inversion, 0).unwrap();
    world.connect(inversion, 1, diode, DIODE_ANODE).unwrap();
    world.connect(diode, DIODE_CATHODE, lamp, 0).unwrap();
    assert!(!world.is_node_powered(lamp));
    assert_consistent(&world);
}

#[test]
fn test_deviator_passthrough_ignores_flags() {
    let mut world = SimWorld::new();
    let s = source(&mut world, "S");
    let deviator = manual_deviator(&mut world, "D");
    let lamp = world.add_node("Lamp", NodeKind::Lamp).unwrap();
    world.connect(s, 0, deviator, DEVIATOR_COMMON).unwrap();
    world.connect(deviator, DEVIATOR_DOWN, lamp, 0).unwrap();
    assert!(!world.is_node_powered(lamp));

    // Out through the first pole only: the return stays switched
    world
        .set_deviator_passthrough(deviator, CircuitPole::First, true)
        .unwrap();
    assert!(!world.is_node_powered(lamp));
    assert_eq!(world.node(lamp).unwrap().has_any_circuit(0), AnyCircuitType::Open);

    world
        .set_deviator_passthrough(deviator, CircuitPole::Second, true)
        .unwrap();
    assert!(world.is_node_powered(lamp));
    assert!(!world.node(deviator).unwrap().has_circuit(DEVIATOR_UP, CircuitType::Closed));
    assert_consistent(&world);

    // The contact flags make no difference
    world.set_deviator_contacts(deviator, true, false).unwrap();
    assert!(world.is_node_powered(lamp));

    world
        .set_deviator_passthrough(deviator, CircuitPole::Second, false)
        .unwrap();
    assert!(!world.is_node_powered(lamp));
    assert_no_duplicates(&world);
    assert_consistent(&world);
}
