//! Circuit nodes and their per-contact bookkeeping
//!
//! Every node keeps, for each contact, how many circuits of each type enter
//! and leave through it on each pole. These counters are a cache of the
//! circuit chains owned by the network and are only changed by the
//! propagation engine.

use log::warn;
use sorted_vec::SortedSet;

use super::circuit::NodeItem;
use super::routing::NodeKind;
use super::types::{AnyCircuitType, CableId, CableSide, CircuitId, CircuitPole, CircuitType, NodeId};

/// A contact slot on a node
#[derive(Debug, Clone, Default)]
pub struct NodeContact {
    /// Attached cable and the side of that cable bound here
    pub cable: Option<(CableId, CableSide)>,
    /// Circuits entering through this contact, per [type][pole]
    entrance: [[u32; 2]; 2],
    /// Circuits leaving through this contact, per [type][pole]
    exit: [[u32; 2]; 2],
}

impl NodeContact {
    fn entrance_count(&self, kind: CircuitType, pole: CircuitPole) -> u32 {
        self.entrance[kind.index()][pole.index()]
    }

    fn exit_count(&self, kind: CircuitType, pole: CircuitPole) -> u32 {
        self.exit[kind.index()][pole.index()]
    }
}

/// Counts one more circuit passage, saturating at the counter limit
fn increment(count: &mut u32, node: &str) {
    match count.checked_add(1) {
        Some(next) => *count = next,
        None => warn!("Circuit counter on node '{}' saturated", node),
    }
}

/// Snapshot of what a node reports as powered, compared between updates
/// to detect changes that need a hook to run
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodePower {
    pub active: bool,
    pub contacts: Vec<AnyCircuitType>,
}

/// A node in the circuit network
#[derive(Debug, Clone)]
pub struct SimNode {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    contacts: Vec<NodeContact>,
    closed: SortedSet<CircuitId>,
    open: SortedSet<CircuitId>,
}

impl SimNode {
    pub fn new(id: NodeId, name: impl Into<String>, kind: NodeKind) -> Self {
        let contacts = vec![NodeContact::default(); kind.contact_count()];
        Self {
            id,
            name: name.into(),
            kind,
            contacts,
            closed: SortedSet::new(),
            open: SortedSet::new(),
        }
    }

    pub fn contact_count(&self) -> usize {
        self.contacts.len()
    }

    pub fn contact(&self, contact: usize) -> Option<&NodeContact> {
        self.contacts.get(contact)
    }

    pub fn contact_cable(&self, contact: usize) -> Option<(CableId, CableSide)> {
        self.contacts.get(contact).and_then(|c| c.cable)
    }

    pub(super) fn set_contact_cable(&mut self, contact: usize, cable: Option<(CableId, CableSide)>) {
        if let Some(slot) = self.contacts.get_mut(contact) {
            slot.cable = cable;
        }
    }

    /// Contacts currently bound to a cable
    pub fn attached_contacts(&self) -> impl Iterator<Item = (usize, CableId, CableSide)> + '_ {
        self.contacts
            .iter()
            .enumerate()
            .filter_map(|(idx, c)| c.cable.map(|(cable, side)| (idx, cable, side)))
    }

    fn list(&self, kind: CircuitType) -> &SortedSet<CircuitId> {
        match kind {
            CircuitType::Open => &self.open,
            CircuitType::Closed => &self.closed,
        }
    }

    fn list_mut(&mut self, kind: CircuitType) -> &mut SortedSet<CircuitId> {
        match kind {
            CircuitType::Open => &mut self.open,
            CircuitType::Closed => &mut self.closed,
        }
    }

    /// True if any closed circuit passes through this node
    pub fn has_circuits(&self) -> bool {
        !self.closed.is_empty()
    }

    pub fn has_circuits_of(&self, kind: CircuitType) -> bool {
        !self.list(kind).is_empty()
    }

    /// Copy of the circuits of one type passing through this node.
    ///
    /// Callers iterate the copy; the live set changes as circuits are
    /// disabled or truncated.
    pub fn circuits(&self, kind: CircuitType) -> Vec<CircuitId> {
        self.list(kind).iter().copied().collect()
    }

    pub fn contains_circuit(&self, id: CircuitId, kind: CircuitType) -> bool {
        self.list(kind).binary_search(&id).is_ok()
    }

    pub fn has_entrance_circuit_on_pole(
        &self,
        contact: usize,
        pole: CircuitPole,
        kind: CircuitType,
    ) -> bool {
        self.contacts
            .get(contact)
            .is_some_and(|c| c.entrance_count(kind, pole) > 0)
    }

    pub fn has_exit_circuit_on_pole(&self, contact: usize, pole: CircuitPole, kind: CircuitType) -> bool {
        self.contacts
            .get(contact)
            .is_some_and(|c| c.exit_count(kind, pole) > 0)
    }

    pub fn has_circuit_on_pole(&self, contact: usize, pole: CircuitPole, kind: CircuitType) -> bool {
        self.has_entrance_circuit_on_pole(contact, pole, kind)
            || self.has_exit_circuit_on_pole(contact, pole, kind)
    }

    /// True if a circuit of the given type passes through the contact
    pub fn has_circuit(&self, contact: usize, kind: CircuitType) -> bool {
        CircuitPole::BOTH
            .iter()
            .any(|pole| self.has_circuit_on_pole(contact, *pole, kind))
    }

    pub fn has_any_circuit(&self, contact: usize) -> AnyCircuitType {
        AnyCircuitType::from_presence(
            self.has_circuit(contact, CircuitType::Open),
            self.has_circuit(contact, CircuitType::Closed),
        )
    }

    pub fn has_any_circuit_on_pole(&self, contact: usize, pole: CircuitPole) -> AnyCircuitType {
        AnyCircuitType::from_presence(
            self.has_circuit_on_pole(contact, pole, CircuitType::Open),
            self.has_circuit_on_pole(contact, pole, CircuitType::Closed),
        )
    }

    pub fn has_any_entrance_circuit_on_pole(&self, contact: usize, pole: CircuitPole) -> AnyCircuitType {
        AnyCircuitType::from_presence(
            self.has_entrance_circuit_on_pole(contact, pole, CircuitType::Open),
            self.has_entrance_circuit_on_pole(contact, pole, CircuitType::Closed),
        )
    }

    pub fn has_any_exit_circuit_on_pole(&self, contact: usize, pole: CircuitPole) -> AnyCircuitType {
        AnyCircuitType::from_presence(
            self.has_exit_circuit_on_pole(contact, pole, CircuitType::Open),
            self.has_exit_circuit_on_pole(contact, pole, CircuitType::Closed),
        )
    }

    pub fn power(&self) -> NodePower {
        NodePower {
            active: self.has_circuits(),
            contacts: (0..self.contacts.len())
                .map(|contact| self.has_any_circuit(contact))
                .collect(),
        }
    }

    /// Registers a circuit and counts each of its passages here.
    ///
    /// A circuit passing twice through this node is registered once, with
    /// all passages given together.
    pub(super) fn add_circuit(&mut self, id: CircuitId, kind: CircuitType, occurrences: &[NodeItem]) {
        if self.contains_circuit(id, kind) {
            return;
        }
        self.list_mut(kind).push(id);

        for item in occurrences {
            if let Some(contact) = item.from_contact.and_then(|c| self.contacts.get_mut(c)) {
                increment(&mut contact.entrance[kind.index()][item.from_pole.index()], &self.name);
            }
            if let Some(contact) = item.to_contact.and_then(|c| self.contacts.get_mut(c)) {
                increment(&mut contact.exit[kind.index()][item.to_pole.index()], &self.name);
            }
        }
    }

    pub(super) fn remove_circuit(&mut self, id: CircuitId, kind: CircuitType, occurrences: &[NodeItem]) {
        debug_assert!(self.contains_circuit(id, kind), "circuit not on node");
        self.partial_remove_circuit(id, kind, occurrences);
        self.list_mut(kind).remove_item(&id);
    }

    /// Uncounts some passages while the circuit stays registered
    pub(super) fn partial_remove_circuit(
        &mut self,
        id: CircuitId,
        kind: CircuitType,
        occurrences: &[NodeItem],
    ) {
        debug_assert!(self.contains_circuit(id, kind), "circuit not on node");
        for item in occurrences {
            if let Some(contact) = item.from_contact.and_then(|c| self.contacts.get_mut(c)) {
                let count = &mut contact.entrance[kind.index()][item.from_pole.index()];
                debug_assert!(*count > 0, "entrance count underflow");
                *count = count.saturating_sub(1);
            }
            if let Some(contact) = item.to_contact.and_then(|c| self.contacts.get_mut(c)) {
                let count = &mut contact.exit[kind.index()][item.to_pole.index()];
                debug_assert!(*count > 0, "exit count underflow");
                *count = count.saturating_sub(1);
            }
        }
    }

    /// An open circuit now ends on this node: stop counting its exit
    pub(super) fn unregister_open_exit(&mut self, contact: usize, pole: CircuitPole) {
        if let Some(slot) = self.contacts.get_mut(contact) {
            let count = &mut slot.exit[CircuitType::Open.index()][pole.index()];
            debug_assert!(*count > 0, "open exit count underflow");
            *count = count.saturating_sub(1);
        }
    }
}
