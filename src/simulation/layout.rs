//! Layout files
//!
//! A layout is the wiring and configuration of a world: objects, nodes and
//! cables with their ids. Runtime state (circuits, relay coils, counts,
//! pending timers) is not stored; it is rebuilt on load by refreshing every
//! node from its objects and re-seeding the power sources.

use anyhow::{bail, Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use super::node::SimNode;
use super::objects::{ObjectKind, SimObject};
use super::routing::NodeKind;
use super::types::{CableEnd, CableId, CableSide, NodeId, ObjectId};
use super::world::SimWorld;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub id: ObjectId,
    pub name: String,
    pub kind: ObjectKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CableRecord {
    pub id: CableId,
    #[serde(default)]
    pub a: Option<CableEnd>,
    #[serde(default)]
    pub b: Option<CableEnd>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayoutFile {
    #[serde(default)]
    pub objects: Vec<ObjectRecord>,
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub cables: Vec<CableRecord>,
}

impl LayoutFile {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Invalid layout JSON")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize layout")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read layout {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Failed to load layout {}", path.display()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        std::fs::write(path, self.to_json()?)
            .with_context(|| format!("Failed to write layout {}", path.display()))
    }
}

impl SimWorld {
    /// Snapshot the wiring and configuration of this world
    pub fn to_layout(&self) -> LayoutFile {
        LayoutFile {
            objects: self
                .objects
                .values()
                .map(|o| ObjectRecord {
                    id: o.id,
                    name: o.name.clone(),
                    kind: o.kind.clone(),
                })
                .collect(),
            nodes: self
                .network
                .nodes()
                .map(|n| NodeRecord {
                    id: n.id,
                    name: n.name.clone(),
                    kind: n.kind.clone(),
                })
                .collect(),
            cables: self
                .network
                .cables()
                .map(|c| CableRecord {
                    id: c.id,
                    a: c.end(CableSide::A),
                    b: c.end(CableSide::B),
                })
                .collect(),
        }
    }

    pub fn from_layout(layout: &LayoutFile) -> Result<Self> {
        Self::build_from_layout(SimWorld::new(), layout)
    }

    /// Rebuild a layout into an empty world
    pub fn build_from_layout(mut world: SimWorld, layout: &LayoutFile) -> Result<Self> {
        if !world.objects.is_empty() || world.network.node_count() > 0 {
            bail!("Layouts can only be loaded into an empty world");
        }

        let mut max_object = 0;
        for record in &layout.objects {
            if world.objects.contains_key(&record.id) {
                bail!("Duplicate object id {} ('{}')", record.id.0 .0, record.name);
            }
            max_object = max_object.max(record.id.0 .0);
            world.insert_object(SimObject::new(record.id, record.name.clone(), record.kind.clone()));
        }
        world.reserve_object_ids(max_object);

        let mut max_network = 0;
        for record in &layout.nodes {
            if world.network.node(record.id).is_some() {
                bail!("Duplicate node id {} ('{}')", record.id.0 .0, record.name);
            }
            world
                .check_binding(Some(record.id), &record.kind)
                .with_context(|| format!("Node '{}' has an invalid binding", record.name))?;
            max_network = max_network.max(record.id.0 .0);
            world
                .network
                .insert_node(SimNode::new(record.id, record.name.clone(), record.kind.clone()));
            world.link_axle_counter(record.id);
        }

        let mut seen = BTreeSet::new();
        for record in &layout.cables {
            if !seen.insert(record.id) {
                bail!("Duplicate cable id {}", record.id.0 .0);
            }
            max_network = max_network.max(record.id.0 .0);
            world.network.insert_cable(record.id);
            for (side, end) in [(CableSide::A, record.a), (CableSide::B, record.b)] {
                if let Some(end) = end {
                    world
                        .network
                        .attach(record.id, side, end.node, end.contact)
                        .with_context(|| format!("Cable {} side {:?} cannot be attached", record.id.0 .0, side))?;
                }
            }
        }
        world.network.reserve_ids(max_network);

        let nodes: Vec<NodeId> = world.network.nodes().map(|n| n.id).collect();
        for node in nodes {
            world.refresh_node_state(node);
        }
        world.network.reseed_all();
        world.settle();

        info!(
            "Loaded layout: {} objects, {} nodes, {} cables, {} circuits",
            world.objects.len(),
            world.network.node_count(),
            world.network.cable_count(),
            world.network.circuit_count()
        );
        Ok(world)
    }
}
