//! The circuit network arena
//!
//! Nodes, cables and circuits live in id-keyed maps. Circuits refer to
//! nodes and cables by id only, so removing a node never leaves a dangling
//! reference as long as its circuits are dropped first.

use anyhow::{bail, Context, Result};
use log::debug;
use petgraph::algo::{connected_components, has_path_connecting};
use petgraph::graph::{NodeIndex, UnGraph};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::cable::SimCable;
use super::circuit::Circuit;
use super::node::SimNode;
use super::routing::NodeKind;
use super::types::{CableEnd, CableId, CableSide, CircuitId, NodeId, SimId, Terminal};

/// Arena of nodes, cables and circuits
#[derive(Debug, Default)]
pub struct SimCircuitNetwork {
    pub(super) nodes: BTreeMap<NodeId, SimNode>,
    pub(super) cables: BTreeMap<CableId, SimCable>,
    pub(super) circuits: BTreeMap<CircuitId, Circuit>,

    /// Nodes whose circuit bookkeeping changed since the last drain
    touched: BTreeSet<NodeId>,

    next_id: usize,
}

impl SimCircuitNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn next_sim_id(&mut self) -> SimId {
        let id = SimId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Keeps freshly generated ids clear of ids restored from a layout
    pub(super) fn reserve_ids(&mut self, used: usize) {
        self.next_id = self.next_id.max(used + 1);
    }

    pub fn add_node(&mut self, name: impl Into<String>, kind: NodeKind) -> NodeId {
        let id = NodeId(self.next_sim_id());
        self.insert_node(SimNode::new(id, name, kind));
        id
    }

    pub(super) fn insert_node(&mut self, node: SimNode) {
        debug!("Adding {} node '{}'", node.kind.type_name(), node.name);
        self.nodes.insert(node.id, node);
    }

    pub fn add_cable(&mut self) -> CableId {
        let id = CableId(self.next_sim_id());
        self.cables.insert(id, SimCable::new(id));
        id
    }

    pub(super) fn insert_cable(&mut self, id: CableId) {
        self.cables.insert(id, SimCable::new(id));
    }

    pub fn node(&self, id: NodeId) -> Option<&SimNode> {
        self.nodes.get(&id)
    }

    pub(super) fn node_mut(&mut self, id: NodeId) -> Option<&mut SimNode> {
        self.nodes.get_mut(&id)
    }

    pub fn node_by_name(&self, name: &str) -> Option<&SimNode> {
        self.nodes.values().find(|node| node.name == name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &SimNode> {
        self.nodes.values()
    }

    pub fn cable(&self, id: CableId) -> Option<&SimCable> {
        self.cables.get(&id)
    }

    pub fn cables(&self) -> impl Iterator<Item = &SimCable> {
        self.cables.values()
    }

    pub fn circuit(&self, id: CircuitId) -> Option<&Circuit> {
        self.circuits.get(&id)
    }

    pub fn circuits(&self) -> impl Iterator<Item = &Circuit> {
        self.circuits.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn cable_count(&self) -> usize {
        self.cables.len()
    }

    pub fn circuit_count(&self) -> usize {
        self.circuits.len()
    }

    pub(super) fn touch(&mut self, node: NodeId) {
        self.touched.insert(node);
    }

    /// Drains the set of nodes whose bookkeeping changed
    pub(super) fn take_touched(&mut self) -> BTreeSet<NodeId> {
        std::mem::take(&mut self.touched)
    }

    /// Binds one side of a cable to a node contact.
    /// Only wiring is changed; circuits are updated by the caller.
    pub fn attach(&mut self, cable: CableId, side: CableSide, node: NodeId, contact: usize) -> Result<()> {
        let sim_cable = self
            .cables
            .get(&cable)
            .with_context(|| format!("Cable {:?} does not exist", cable))?;
        if let Some(end) = sim_cable.end(side) {
            bail!(
                "Cable {:?} side {:?} is already attached to node {:?}",
                cable,
                side,
                end.node
            );
        }

        let sim_node = self
            .nodes
            .get_mut(&node)
            .with_context(|| format!("Node {:?} does not exist", node))?;
        if contact >= sim_node.contact_count() {
            bail!(
                "Node '{}' has no contact {} (it has {})",
                sim_node.name,
                contact,
                sim_node.contact_count()
            );
        }
        if let Some((other, _)) = sim_node.contact_cable(contact) {
            bail!(
                "Contact {} of node '{}' is already wired to cable {:?}",
                contact,
                sim_node.name,
                other
            );
        }

        sim_node.set_contact_cable(contact, Some((cable, side)));
        if let Some(sim_cable) = self.cables.get_mut(&cable) {
            sim_cable.set_end(side, Some(CableEnd { node, contact }));
        }
        Ok(())
    }

    /// Frees one side of a cable. A cable left with no ends is destroyed.
    pub fn detach(&mut self, cable: CableId, side: CableSide) -> Option<CableEnd> {
        let sim_cable = self.cables.get_mut(&cable)?;
        let end = sim_cable.end(side)?;
        sim_cable.set_end(side, None);
        let detached = sim_cable.is_detached();

        if let Some(node) = self.nodes.get_mut(&end.node) {
            node.set_contact_cable(end.contact, None);
        }
        if detached {
            debug!("Destroying cable {:?}", cable);
            self.cables.remove(&cable);
        }
        Some(end)
    }

    /// Destroys a cable, detaching both ends
    pub fn remove_cable(&mut self, cable: CableId) {
        for side in [CableSide::A, CableSide::B] {
            self.detach(cable, side);
        }
        self.cables.remove(&cable);
    }

    /// Removes a node and destroys every cable attached to it.
    /// Its circuits must already be gone.
    pub(super) fn remove_node(&mut self, id: NodeId) -> Option<SimNode> {
        let cables: Vec<CableId> = self
            .nodes
            .get(&id)?
            .attached_contacts()
            .map(|(_, cable, _)| cable)
            .collect();
        for cable in cables {
            self.remove_cable(cable);
        }
        self.touched.remove(&id);
        self.nodes.remove(&id)
    }

    /// The node contact at the other end of the cable bound to `contact`
    pub fn far_end(&self, node: NodeId, contact: usize) -> Option<CableEnd> {
        let (cable, side) = self.nodes.get(&node)?.contact_cable(contact)?;
        self.cables.get(&cable)?.end(!side)
    }

    /// Every bound connection point of the network
    pub fn terminals(&self) -> Vec<Terminal> {
        self.nodes
            .values()
            .flat_map(|node| {
                node.attached_contacts().map(move |(contact, cable, side)| Terminal {
                    node: node.id,
                    contact,
                    cable,
                    side,
                })
            })
            .collect()
    }

    /// Undirected graph of nodes joined by cables with both ends attached
    pub fn wiring_graph(&self) -> (UnGraph<NodeId, CableId>, HashMap<NodeId, NodeIndex>) {
        let mut graph = UnGraph::new_undirected();
        let mut indices = HashMap::new();
        for id in self.nodes.keys() {
            indices.insert(*id, graph.add_node(*id));
        }
        for cable in self.cables.values() {
            if let [Some(a), Some(b)] = cable.ends() {
                if let (Some(ia), Some(ib)) = (indices.get(&a.node), indices.get(&b.node)) {
                    graph.add_edge(*ia, *ib, cable.id);
                }
            }
        }
        (graph, indices)
    }

    /// Number of electrically separate wiring groups
    pub fn wiring_groups(&self) -> usize {
        let (graph, _) = self.wiring_graph();
        connected_components(&graph)
    }

    pub fn are_wired(&self, a: NodeId, b: NodeId) -> bool {
        let (graph, indices) = self.wiring_graph();
        match (indices.get(&a), indices.get(&b)) {
            (Some(ia), Some(ib)) => has_path_connecting(&graph, *ia, *ib, None),
            _ => false,
        }
    }
}
