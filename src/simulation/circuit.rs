//! Circuit entities
//!
//! A circuit is an ordered chain of node passages joined by cable passages.
//! The chain starts at the power source node. Closed circuits end back at the
//! source on the opposite pole; open circuits end wherever exploration stopped.

use super::types::{CableId, CableSide, CircuitId, CircuitPole, CircuitType, NodeId};

/// One passage of a circuit through a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeItem {
    pub node: NodeId,
    /// Contact the circuit enters from (None for the source start)
    pub from_contact: Option<usize>,
    /// Contact the circuit leaves through (None where the circuit ends)
    pub to_contact: Option<usize>,
    pub from_pole: CircuitPole,
    pub to_pole: CircuitPole,
}

/// One passage of a circuit along a cable conductor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CableItem {
    pub cable: CableId,
    /// Side the circuit enters the cable from
    pub side: CableSide,
    pub pole: CircuitPole,
}

/// An element of a circuit chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitItem {
    Node(NodeItem),
    Cable(CableItem),
}

impl CircuitItem {
    pub fn as_node(&self) -> Option<&NodeItem> {
        match self {
            CircuitItem::Node(item) => Some(item),
            CircuitItem::Cable(_) => None,
        }
    }

    pub fn as_cable(&self) -> Option<&CableItem> {
        match self {
            CircuitItem::Cable(item) => Some(item),
            CircuitItem::Node(_) => None,
        }
    }
}

/// A discovered electrical path
#[derive(Debug, Clone)]
pub struct Circuit {
    pub id: CircuitId,
    pub kind: CircuitType,
    pub items: Vec<CircuitItem>,
}

impl Circuit {
    pub fn new(id: CircuitId, kind: CircuitType, items: Vec<CircuitItem>) -> Self {
        Self { id, kind, items }
    }

    /// The power source node this circuit starts from
    pub fn source(&self) -> Option<NodeId> {
        first_node(&self.items)
    }

    /// Every passage of this circuit through the given node, in chain order
    pub fn occurrences_of(&self, node: NodeId) -> Vec<NodeItem> {
        node_occurrences(&self.items, node)
    }

    pub fn node_items(&self) -> impl Iterator<Item = &NodeItem> {
        self.items.iter().filter_map(CircuitItem::as_node)
    }

    pub fn cable_items(&self) -> impl Iterator<Item = &CableItem> {
        self.items.iter().filter_map(CircuitItem::as_cable)
    }

    pub fn passes_node(&self, node: NodeId) -> bool {
        self.node_items().any(|item| item.node == node)
    }

    pub fn uses_cable(&self, cable: CableId) -> bool {
        self.cable_items().any(|item| item.cable == cable)
    }

    /// Whether the chain ends on the given node
    pub fn is_last_node(&self, node: NodeId) -> bool {
        matches!(self.items.last(), Some(CircuitItem::Node(item)) if item.node == node)
    }

    /// Distinct nodes touched by this circuit, in order of first appearance
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = Vec::new();
        for item in self.node_items() {
            if !nodes.contains(&item.node) {
                nodes.push(item.node);
            }
        }
        nodes
    }
}

pub(super) fn first_node(items: &[CircuitItem]) -> Option<NodeId> {
    match items.first() {
        Some(CircuitItem::Node(item)) => Some(item.node),
        _ => None,
    }
}

pub(super) fn node_occurrences(items: &[CircuitItem], node: NodeId) -> Vec<NodeItem> {
    items
        .iter()
        .filter_map(CircuitItem::as_node)
        .filter(|item| item.node == node)
        .copied()
        .collect()
}

/// Cycle guard: has the chain already entered or left `node` through
/// `contact` on `pole`?
pub(super) fn contains_node(
    items: &[CircuitItem],
    node: NodeId,
    contact: usize,
    pole: CircuitPole,
) -> bool {
    items
        .iter()
        .filter_map(CircuitItem::as_node)
        .filter(|item| item.node == node)
        .any(|item| {
            (item.from_contact == Some(contact) && item.from_pole == pole)
                || (item.to_contact == Some(contact) && item.to_pole == pole)
        })
}
