//! Circuit propagation engine
//!
//! Discovers circuits by walking node routing functions and cables outward
//! from a seed node, and keeps them consistent when a node stops conducting
//! by disabling closed circuits and truncating open ones.
//!
//! None of these operations fail: missing cables, contacts or nodes simply
//! stop propagation at that point.

use log::{debug, trace, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::AddAssign;

use super::circuit::{contains_node, first_node, CableItem, Circuit, CircuitItem, NodeItem};
use super::network::SimCircuitNetwork;
use super::routing::{ContactSelection, NodeKind};
use super::types::{
    AnyCircuitType, CableEnd, CableId, CableSide, CircuitId, CircuitPole, CircuitType, NodeId,
    MAX_TRAVERSAL_DEPTH,
};

/// One way out of a node
#[derive(Debug, Clone, Copy)]
struct Route {
    contact: usize,
    pole: CircuitPole,
    cable: Option<(CableId, CableSide)>,
}

#[derive(Debug, Clone, Copy, Default)]
struct PassMode {
    /// An electric load was passed on this chain
    load_passed: bool,
    /// Do not enter any further load
    skip_loads: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct PassResult {
    open: usize,
    closed: usize,
    /// Some chain was registered, or already existed, past this point
    registered: bool,
}

impl AddAssign for PassResult {
    fn add_assign(&mut self, other: Self) {
        self.open += other.open;
        self.closed += other.closed;
        self.registered |= other.registered;
    }
}

/// Marks a node passage as the end of its chain
fn end_here(item: &mut NodeItem) {
    item.to_contact = None;
    item.to_pole = item.from_pole;
}

impl SimCircuitNetwork {
    fn routes(&self, node: NodeId, contact: usize, pole: CircuitPole) -> Vec<Route> {
        let Some(sim_node) = self.nodes.get(&node) else {
            return Vec::new();
        };
        sim_node
            .kind
            .route_from(contact, pole)
            .into_iter()
            .map(|(contact, pole)| Route {
                contact,
                pole,
                cable: sim_node.contact_cable(contact),
            })
            .collect()
    }

    fn is_load(&self, node: NodeId) -> bool {
        self.nodes
            .get(&node)
            .is_some_and(|n| n.kind.is_electric_load())
    }

    fn exit_power(&self, node: NodeId, contact: usize, pole: CircuitPole) -> AnyCircuitType {
        self.nodes
            .get(&node)
            .map(|n| n.has_any_exit_circuit_on_pole(contact, pole))
            .unwrap_or_default()
    }

    /// Registers a new circuit on every node and cable it passes.
    ///
    /// A circuit with the same chain and type as one already starting at
    /// its source is discarded.
    fn enable_circuit(&mut self, kind: CircuitType, items: Vec<CircuitItem>) -> Option<CircuitId> {
        let source = first_node(&items)?;
        let duplicate = self.nodes.get(&source).is_some_and(|node| {
            node.circuits(kind)
                .iter()
                .filter_map(|id| self.circuits.get(id))
                .any(|other| other.items == items)
        });
        if duplicate {
            trace!("Dropping duplicate {:?} circuit from {:?}", kind, source);
            return None;
        }

        let id = CircuitId(self.next_sim_id());
        let circuit = Circuit::new(id, kind, items);

        for node in circuit.nodes() {
            let occurrences = circuit.occurrences_of(node);
            if let Some(sim_node) = self.nodes.get_mut(&node) {
                sim_node.add_circuit(id, kind, &occurrences);
            }
            self.touch(node);
        }
        for item in circuit.cable_items() {
            if let Some(cable) = self.cables.get_mut(&item.cable) {
                cable.add_circuit(kind, item.pole);
            }
        }

        debug!(
            "Enabled {:?} circuit {:?} ({} items) from {:?}",
            kind,
            id,
            circuit.items.len(),
            source
        );
        self.circuits.insert(id, circuit);
        Some(id)
    }

    /// Removes a circuit from every node and cable it passes
    fn unregister_circuit(&mut self, id: CircuitId) -> Option<Circuit> {
        let circuit = self.circuits.remove(&id)?;
        for node in circuit.nodes() {
            let occurrences = circuit.occurrences_of(node);
            if let Some(sim_node) = self.nodes.get_mut(&node) {
                sim_node.remove_circuit(id, circuit.kind, &occurrences);
            }
            self.touch(node);
        }
        for item in circuit.cable_items() {
            if let Some(cable) = self.cables.get_mut(&item.cable) {
                cable.remove_circuit(circuit.kind, item.pole);
            }
        }
        debug!("Removed {:?} circuit {:?}", circuit.kind, id);
        Some(circuit)
    }

    /// Starts discovery at a power source: contact 0, pole First
    pub fn create_circuits_from_power_node(&mut self, source: NodeId) {
        let Some(node) = self.nodes.get(&source) else {
            return;
        };
        if !matches!(node.kind, NodeKind::PowerSource { enabled: true }) {
            return;
        }

        let first = NodeItem {
            node: source,
            from_contact: None,
            from_pole: CircuitPole::First,
            to_contact: Some(0),
            to_pole: CircuitPole::First,
        };

        let Some((cable, side)) = node.contact_cable(0) else {
            self.enable_circuit(CircuitType::Open, vec![CircuitItem::Node(first)]);
            return;
        };
        let cable_item = CableItem {
            cable,
            side,
            pole: first.to_pole,
        };

        let Some(far) = self.cables.get(&cable).and_then(|c| c.end(!side)) else {
            self.enable_circuit(
                CircuitType::Open,
                vec![CircuitItem::Node(first), CircuitItem::Cable(cable_item)],
            );
            return;
        };

        let mut items = vec![CircuitItem::Node(first), CircuitItem::Cable(cable_item)];
        let result = self.pass_circuit_node(far.node, far.contact, &mut items, 1, PassMode::default());
        debug!(
            "Seeded {:?}: {} closed, {} open branches",
            source, result.closed, result.open
        );

        self.check_closed_circuits(source);
    }

    /// Walks into `node` through `contact` and follows its routes.
    ///
    /// `items` holds the chain so far, ending with the cable we came from.
    /// It is restored to its original length before returning.
    fn pass_circuit_node(
        &mut self,
        node: NodeId,
        contact: usize,
        items: &mut Vec<CircuitItem>,
        depth: usize,
        mode: PassMode,
    ) -> PassResult {
        if depth > MAX_TRAVERSAL_DEPTH {
            warn!("Circuit traversal deeper than {} nodes abandoned", MAX_TRAVERSAL_DEPTH);
            return PassResult::default();
        }

        let Some(last_cable) = items.last().and_then(CircuitItem::as_cable).copied() else {
            return PassResult::default();
        };
        let Some(source) = items.first().and_then(CircuitItem::as_node).copied() else {
            return PassResult::default();
        };

        trace!("Passing {:?} contact {} on {:?}", node, contact, last_cable.pole);

        let mut node_item = NodeItem {
            node,
            from_contact: Some(contact),
            from_pole: last_cable.pole,
            to_contact: None,
            to_pole: last_cable.pole,
        };

        if node == source.node {
            if node_item.from_pole == !source.to_pole {
                // Back at the source on the opposite pole
                let mut closed = items.clone();
                closed.push(CircuitItem::Node(node_item));
                self.enable_circuit(CircuitType::Closed, closed);
                return PassResult {
                    open: 0,
                    closed: 1,
                    registered: true,
                };
            }
            return PassResult::default();
        }

        match self.nodes.get(&node) {
            Some(sim_node) if !sim_node.kind.is_source_node() => {}
            _ => return PassResult::default(),
        }

        let routes = self.routes(node, contact, last_cable.pole);
        let mut ends_here = true;
        let mut result = PassResult::default();
        let old_len = items.len();

        for route in routes {
            node_item.to_contact = Some(route.contact);
            node_item.to_pole = route.pole;

            let Some((cable, side)) = route.cable else {
                if self.exit_power(node, route.contact, route.pole) != AnyCircuitType::None {
                    continue;
                }
                let mut open = items.clone();
                open.push(CircuitItem::Node(node_item));
                self.enable_circuit(CircuitType::Open, open);
                ends_here = false;
                result.open += 1;
                result.registered = true;
                continue;
            };

            let next_cable = CableItem {
                cable,
                side,
                pole: route.pole,
            };

            let Some(far) = self.cables.get(&cable).and_then(|c| c.end(!side)) else {
                if self.exit_power(node, route.contact, route.pole) != AnyCircuitType::None {
                    continue;
                }
                let mut open = items.clone();
                open.push(CircuitItem::Node(node_item));
                open.push(CircuitItem::Cable(next_cable));
                self.enable_circuit(CircuitType::Open, open);
                ends_here = false;
                result.open += 1;
                result.registered = true;
                continue;
            };

            // From here the chain goes on, or is a loop we drop; either way
            // it does not end on this node.
            ends_here = false;

            if far.node == node && far.contact == contact {
                continue;
            }
            if contains_node(items, node, contact, last_cable.pole) {
                continue;
            }

            let mut next_mode = mode;
            if self.is_load(far.node) {
                if mode.skip_loads {
                    continue;
                }
                next_mode.load_passed = true;
            }

            if self.exit_power(far.node, far.contact, route.pole).has_closed() {
                // Entering where a closed circuit leaves: against the voltage
                continue;
            }

            items.push(CircuitItem::Node(node_item));
            items.push(CircuitItem::Cable(next_cable));
            let new_len = items.len();

            let mut next = PassResult::default();
            if next_mode.load_passed {
                let skip = PassMode {
                    skip_loads: true,
                    ..next_mode
                };
                next = self.pass_circuit_node(far.node, far.contact, items, depth + 1, skip);
            }

            if next.closed == 0 && !next_mode.skip_loads {
                items.truncate(new_len);
                let allow = PassMode {
                    skip_loads: false,
                    ..next_mode
                };
                next += self.pass_circuit_node(far.node, far.contact, items, depth + 1, allow);
            }

            items.truncate(old_len);
            result += next;
        }

        if ends_here {
            if depth == 0 {
                return PassResult::default();
            }
            end_here(&mut node_item);
            let mut open = items.clone();
            open.push(CircuitItem::Node(node_item));
            self.enable_circuit(CircuitType::Open, open);
            // The half circuit replaces its parent, so it is not counted
            return PassResult {
                registered: true,
                ..PassResult::default()
            };
        }

        result
    }

    /// Re-seeds discovery from a node whose state changed.
    ///
    /// Every open circuit reaching the node is extended towards the node's
    /// other routes. An open circuit that ended on this node is replaced by
    /// its extensions, and only once at least one of them is registered.
    pub fn create_circuits_from_other_node(&mut self, node: NodeId) {
        let Some(sim_node) = self.nodes.get(&node) else {
            return;
        };
        if sim_node.kind.is_source_node() {
            self.create_circuits_from_power_node(node);
            return;
        }

        for orig_id in sim_node.circuits(CircuitType::Open) {
            let Some(orig) = self.circuits.get(&orig_id).cloned() else {
                continue;
            };

            let mut remove_original = false;
            let mut load_passed = false;

            for (i, item) in orig.items.iter().enumerate() {
                let CircuitItem::Node(other) = item else {
                    continue;
                };
                if self.is_load(other.node) {
                    load_passed = true;
                }
                if other.node != node {
                    continue;
                }
                if i == 0 {
                    break;
                }

                let Some(last_cable) = orig.items[i - 1].as_cable().copied() else {
                    continue;
                };
                let Some(from_contact) = other.from_contact else {
                    continue;
                };

                let mut extended = false;

                for route in self.routes(node, from_contact, last_cable.pole) {
                    if Some(route.contact) == other.to_contact {
                        continue;
                    }

                    let mut items = orig.items[..i].to_vec();
                    let node_item = NodeItem {
                        to_contact: Some(route.contact),
                        to_pole: route.pole,
                        ..*other
                    };

                    let Some((cable, side)) = route.cable else {
                        if self.exit_power(node, route.contact, route.pole) != AnyCircuitType::None {
                            continue;
                        }
                        items.push(CircuitItem::Node(node_item));
                        self.enable_circuit(CircuitType::Open, items);
                        extended = true;
                        continue;
                    };

                    let next_cable = CableItem {
                        cable,
                        side,
                        pole: route.pole,
                    };

                    let Some(far) = self.cables.get(&cable).and_then(|c| c.end(!side)) else {
                        if self.exit_power(node, route.contact, route.pole) != AnyCircuitType::None {
                            continue;
                        }
                        items.push(CircuitItem::Node(node_item));
                        items.push(CircuitItem::Cable(next_cable));
                        self.enable_circuit(CircuitType::Open, items);
                        extended = true;
                        continue;
                    };

                    if far.node == node && far.contact == from_contact {
                        continue;
                    }
                    if contains_node(&items, node, from_contact, last_cable.pole) {
                        continue;
                    }

                    items.push(CircuitItem::Node(node_item));
                    items.push(CircuitItem::Cable(next_cable));

                    let mode = PassMode {
                        load_passed: load_passed || self.is_load(far.node),
                        skip_loads: false,
                    };
                    if self.pass_circuit_node(far.node, far.contact, &mut items, 1, mode).registered {
                        extended = true;
                    }
                }

                if extended && other.to_contact.is_none() && orig.is_last_node(node) {
                    remove_original = true;
                }
            }

            if remove_original {
                self.unregister_circuit(orig_id);
            }
        }

        self.check_closed_circuits(node);
    }

    fn check_closed_circuits(&mut self, node: NodeId) {
        let closed = self
            .nodes
            .get(&node)
            .map(|n| n.circuits(CircuitType::Closed))
            .unwrap_or_default();
        for id in closed {
            self.check_reverse_voltage_siblings(id);
        }
    }

    /// Drops open circuits that cross a closed circuit's nodes backwards.
    ///
    /// Voltage direction is only known once a closed circuit exists, so
    /// open circuits found earlier may run against it.
    fn check_reverse_voltage_siblings(&mut self, id: CircuitId) {
        let Some(circuit) = self.circuits.get(&id).cloned() else {
            return;
        };
        if circuit.kind != CircuitType::Closed {
            return;
        }

        for item in circuit.node_items() {
            let Some(node) = self.nodes.get(&item.node) else {
                continue;
            };

            let reversed_exit = item.from_contact.is_some_and(|contact| {
                node.has_exit_circuit_on_pole(contact, item.from_pole, CircuitType::Open)
            });
            let reversed_entrance = item.to_contact.is_some_and(|contact| {
                node.has_entrance_circuit_on_pole(contact, item.to_pole, CircuitType::Open)
            });
            if !reversed_exit && !reversed_entrance {
                continue;
            }

            for open_id in node.circuits(CircuitType::Open) {
                let Some(open) = self.circuits.get(&open_id) else {
                    continue;
                };
                let opposite = open.occurrences_of(item.node).iter().any(|other| {
                    (other.from_contact.is_some()
                        && other.from_contact == item.to_contact
                        && other.from_pole == item.to_pole)
                        || (other.to_contact.is_some()
                            && other.to_contact == item.from_contact
                            && other.to_pole == item.from_pole)
                });
                if opposite {
                    debug!("Open circuit {:?} runs against closed circuit {:?}", open_id, id);
                    self.unregister_circuit(open_id);
                }
            }
        }
    }

    /// Chain of a disabled closed circuit cut to end at the first passage
    /// through `goal`, if every node before it still routes the same way
    fn reach_open_prefix(&self, circuit: &Circuit, goal: NodeId) -> Option<Vec<CircuitItem>> {
        if circuit.source() == Some(goal) {
            return None;
        }

        let mut prev_pole = None;
        let mut goal_idx = None;

        for (i, item) in circuit.items.iter().enumerate().skip(1) {
            match item {
                CircuitItem::Node(node_item) => {
                    if node_item.node == goal {
                        goal_idx = Some(i);
                        break;
                    }
                    let (Some(from_contact), Some(pole)) = (node_item.from_contact, prev_pole) else {
                        return None;
                    };
                    let still_routes = self
                        .routes(node_item.node, from_contact, pole)
                        .iter()
                        .any(|r| Some(r.contact) == node_item.to_contact && r.pole == node_item.to_pole);
                    if !still_routes {
                        return None;
                    }
                }
                CircuitItem::Cable(cable_item) => {
                    if !self.cables.contains_key(&cable_item.cable) {
                        return None;
                    }
                    prev_pole = Some(cable_item.pole);
                }
            }
        }

        let goal_idx = goal_idx?;
        let mut items = circuit.items[..=goal_idx].to_vec();
        if let Some(CircuitItem::Node(last)) = items.last_mut() {
            end_here(last);
        }
        Some(items)
    }

    /// Disables a closed circuit, keeping an open prefix up to `goal` when
    /// the path before it is still valid
    fn disable_or_terminate(&mut self, id: CircuitId, goal: NodeId) {
        let Some(circuit) = self.unregister_circuit(id) else {
            return;
        };
        debug_assert_eq!(circuit.kind, CircuitType::Closed);

        if let Some(items) = self.reach_open_prefix(&circuit, goal) {
            debug!("Closed circuit {:?} demoted to open at {:?}", id, goal);
            self.enable_circuit(CircuitType::Open, items);
        }
    }

    /// Shrinks an open circuit to end at its first passage through `goal`.
    ///
    /// If `goal` is the source the circuit is removed. A circuit whose kept
    /// prefix equals another open circuit from the same source is removed
    /// too.
    fn terminate_here(&mut self, id: CircuitId, goal: NodeId) {
        let Some(circuit) = self.circuits.get(&id).cloned() else {
            return;
        };
        debug_assert_eq!(circuit.kind, CircuitType::Open);

        let Some(goal_idx) = circuit
            .items
            .iter()
            .position(|item| matches!(item, CircuitItem::Node(n) if n.node == goal))
        else {
            return;
        };

        let mut kept_end = if goal_idx > 0 { goal_idx + 1 } else { 0 };

        if kept_end > 0 {
            let mut prefix = circuit.items[..kept_end].to_vec();
            if let Some(CircuitItem::Node(last)) = prefix.last_mut() {
                end_here(last);
            }
            if self.has_open_duplicate(id, &prefix) {
                kept_end = 0;
            }
        }

        if kept_end == 0 {
            self.unregister_circuit(id);
            return;
        }

        let kept: BTreeSet<NodeId> = circuit.items[..kept_end]
            .iter()
            .filter_map(CircuitItem::as_node)
            .map(|item| item.node)
            .collect();

        let mut removed: BTreeMap<NodeId, Vec<NodeItem>> = BTreeMap::new();
        for item in &circuit.items[kept_end..] {
            match item {
                CircuitItem::Node(node_item) => {
                    removed.entry(node_item.node).or_default().push(*node_item);
                }
                CircuitItem::Cable(cable_item) => {
                    if let Some(cable) = self.cables.get_mut(&cable_item.cable) {
                        cable.remove_circuit(CircuitType::Open, cable_item.pole);
                    }
                }
            }
        }

        for (node, occurrences) in removed {
            if let Some(sim_node) = self.nodes.get_mut(&node) {
                if kept.contains(&node) {
                    sim_node.partial_remove_circuit(id, CircuitType::Open, &occurrences);
                } else {
                    sim_node.remove_circuit(id, CircuitType::Open, &occurrences);
                }
            }
            self.touch(node);
        }

        let mut items = circuit.items;
        items.truncate(kept_end);
        if let Some(CircuitItem::Node(last)) = items.last_mut() {
            if let Some(contact) = last.to_contact {
                if let Some(sim_node) = self.nodes.get_mut(&goal) {
                    sim_node.unregister_open_exit(contact, last.to_pole);
                }
            }
            end_here(last);
        }
        self.touch(goal);

        if let Some(stored) = self.circuits.get_mut(&id) {
            stored.items = items;
        }
        debug!("Open circuit {:?} truncated at {:?}", id, goal);
    }

    /// Whether an open circuit other than `id` starting at the same source
    /// has exactly this chain
    fn has_open_duplicate(&self, id: CircuitId, items: &[CircuitItem]) -> bool {
        let Some(source) = first_node(items).and_then(|source| self.nodes.get(&source)) else {
            return false;
        };
        source
            .circuits(CircuitType::Open)
            .iter()
            .filter(|other| **other != id)
            .filter_map(|other| self.circuits.get(other))
            .any(|other| other.items == items)
    }

    /// Whether a circuit passes `node` through `contact`, ignoring a
    /// circuit that enters there and ends on the node
    fn crosses_contact(&self, id: CircuitId, node: NodeId, contact: usize) -> bool {
        self.circuits.get(&id).is_some_and(|circuit| {
            circuit.occurrences_of(node).iter().any(|item| {
                let enters_and_ends = item.from_contact == Some(contact) && item.to_contact.is_none();
                !enters_and_ends
                    && (item.from_contact == Some(contact) || item.to_contact == Some(contact))
            })
        })
    }

    /// Disables closed circuits no longer valid through `at_node`.
    ///
    /// With a contact, only circuits passing through that contact are
    /// affected. Each is demoted to an open prefix or removed.
    pub fn disable_circuits(&mut self, circuits: &[CircuitId], at_node: NodeId, at_contact: Option<usize>) {
        for id in circuits {
            match self.circuits.get(id) {
                Some(circuit) if circuit.kind == CircuitType::Closed => {}
                _ => continue,
            }
            if let Some(contact) = at_contact {
                if !self.crosses_contact(*id, at_node, contact) {
                    continue;
                }
            }
            self.disable_or_terminate(*id, at_node);
        }
    }

    /// Cuts open circuits at `at_node`, keeping the prefix before it.
    ///
    /// With a contact, only circuits passing through that contact are
    /// affected.
    pub fn truncate_circuits(&mut self, circuits: &[CircuitId], at_node: NodeId, at_contact: Option<usize>) {
        for id in circuits {
            match self.circuits.get(id) {
                Some(circuit) if circuit.kind == CircuitType::Open => {}
                _ => continue,
            }
            if let Some(contact) = at_contact {
                if !self.crosses_contact(*id, at_node, contact) {
                    continue;
                }
            }
            self.terminate_here(*id, at_node);
        }
    }

    /// Snapshot, cut, then re-seed: the update run after a node's internal
    /// state changed
    pub fn update_node(&mut self, node: NodeId) {
        let Some(sim_node) = self.nodes.get(&node) else {
            return;
        };
        let selection = sim_node.kind.non_conducting_contacts();
        match selection {
            ContactSelection::Nothing => {}
            ContactSelection::All => self.cut_at(node, None),
            ContactSelection::Only(contacts) => {
                for contact in contacts {
                    self.cut_at(node, Some(contact));
                }
            }
        }
        self.create_circuits_from_other_node(node);
    }

    fn cut_at(&mut self, node: NodeId, contact: Option<usize>) {
        let Some(sim_node) = self.nodes.get(&node) else {
            return;
        };
        let closed = sim_node.circuits(CircuitType::Closed);
        self.disable_circuits(&closed, node, contact);

        let open = self
            .nodes
            .get(&node)
            .map(|n| n.circuits(CircuitType::Open))
            .unwrap_or_default();
        self.truncate_circuits(&open, node, contact);
    }

    /// Cuts every circuit running along a cable at the node before it
    pub fn cut_circuits_at_cable(&mut self, cable: CableId) {
        let ids: Vec<CircuitId> = self
            .circuits
            .values()
            .filter(|c| c.uses_cable(cable))
            .map(|c| c.id)
            .collect();

        for id in ids {
            let Some(circuit) = self.circuits.get(&id) else {
                continue;
            };
            let kind = circuit.kind;
            let goal = circuit
                .items
                .iter()
                .position(|item| matches!(item, CircuitItem::Cable(c) if c.cable == cable))
                .and_then(|idx| circuit.items[..idx].iter().rev().find_map(CircuitItem::as_node))
                .map(|item| item.node);
            let Some(goal) = goal else {
                self.unregister_circuit(id);
                continue;
            };
            match kind {
                CircuitType::Closed => self.disable_or_terminate(id, goal),
                CircuitType::Open => self.terminate_here(id, goal),
            }
        }
    }

    /// Wiring at some node contacts changed: cut what went through them,
    /// then re-seed from each node
    pub fn rewire(&mut self, ends: &[CableEnd]) {
        for end in ends {
            self.cut_at(end.node, Some(end.contact));
        }
        for end in ends {
            self.create_circuits_from_other_node(end.node);
        }
    }

    /// Removes every circuit touching a node or one of its cables
    pub fn drop_node_circuits(&mut self, node: NodeId) {
        let cables: BTreeSet<CableId> = self
            .nodes
            .get(&node)
            .map(|n| n.attached_contacts().map(|(_, cable, _)| cable).collect())
            .unwrap_or_default();
        let ids: Vec<CircuitId> = self
            .circuits
            .values()
            .filter(|c| c.passes_node(node) || cables.iter().any(|cable| c.uses_cable(*cable)))
            .map(|c| c.id)
            .collect();
        for id in ids {
            self.unregister_circuit(id);
        }
    }

    /// Re-seeds discovery from every enabled power source
    pub fn reseed_all(&mut self) {
        let sources: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| matches!(n.kind, NodeKind::PowerSource { enabled: true }))
            .map(|n| n.id)
            .collect();
        for source in sources {
            self.create_circuits_from_power_node(source);
        }
    }
}
