//! Main simulation world that ties everything together
//!
//! Owns the circuit network, the external objects, the timer queue and the
//! remote bridge. Every public mutator leaves the world settled: node
//! re-evaluations and object messages queued by the change have all been
//! processed before it returns.

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::Rng;
use rand::SeedableRng;
use std::collections::{BTreeMap, HashMap, VecDeque};

use super::bridge::{RemoteBridge, SimulatorMessage, ACCESSORY_STATE_NORMAL, ACCESSORY_STATE_REVERSE};
use super::network::SimCircuitNetwork;
use super::node::{NodePower, SimNode};
use super::objects::{
    AxleCounter, AxleCounterState, Button, ButtonState, Lever, ObjectKind, Relay, RelayState, SimObject,
    Turnout, TurnoutPosition,
};
use super::routing::{
    AxleCounterNode, CommandPhase, DeviatorControl, DeviatorNode, NodeKind, RelayCoilNode, AXLE_OCCUPIED_TRACK_OUT,
    AXLE_POWER_IN, AXLE_RESET_IN, DEVIATOR_COMMON, DEVIATOR_DOWN, DEVIATOR_UP, TURNOUT_N, TURNOUT_R,
};
use super::scheduler::{Scheduler, TimerEvent, TimerKey};
use super::types::{
    CableEnd, CableId, CableSide, CircuitPole, CircuitType, NodeId, ObjectId, SimId, AXLE_COUNTER_RESET_PRE_TIME,
    AXLE_COUNTER_RESET_TIME, COMMAND_RETRY_DELAY, MAX_SETTLE_STEPS,
};

/// Work queued for the drain loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldTask {
    /// Cut what the node no longer conducts, then re-seed from it
    Reevaluate(NodeId),
}

/// Deferred notification from a node hook to an object
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ObjectMessage {
    RelayCoil {
        relay: ObjectId,
        node: NodeId,
        coil: usize,
        powered: bool,
    },
    AxleCounterInput {
        counter: ObjectId,
        power: bool,
        reset: bool,
    },
    TurnoutCommand {
        turnout: ObjectId,
        command: Option<TurnoutPosition>,
    },
}

/// Node state derived from an object, applied after the lookup
enum StateRefresh {
    Deviator(bool, bool),
    AxleCounter(Option<AxleCounterState>),
}

fn closed_at(power: &NodePower, contact: usize) -> bool {
    power.contacts.get(contact).is_some_and(|c| c.has_closed())
}

fn powered_at(power: &NodePower, contact: usize) -> bool {
    power.contacts.get(contact).is_some_and(|c| c.has_closed() || c.has_open())
}

/// The main simulation world
#[derive(Debug)]
pub struct SimWorld {
    /// Nodes, cables and circuits
    pub network: SimCircuitNetwork,

    /// Relays, levers, buttons, axle counters and turnouts
    pub objects: BTreeMap<ObjectId, SimObject>,

    pub scheduler: Scheduler,

    /// Outbound and inbound remote frames
    pub bridge: RemoteBridge,

    tasks: VecDeque<WorldTask>,
    messages: VecDeque<ObjectMessage>,

    /// Last power report per node, compared to decide whether hooks run
    reported: HashMap<NodeId, NodePower>,

    /// Next object ID to assign
    next_id: usize,

    /// Simulation time
    pub time: f32,

    /// Optional seeded RNG for reproducible simulations
    rng: Option<StdRng>,
}

impl Default for SimWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl SimWorld {
    fn new_internal(rng: Option<StdRng>) -> Self {
        Self {
            network: SimCircuitNetwork::new(),
            objects: BTreeMap::new(),
            scheduler: Scheduler::new(),
            bridge: RemoteBridge::new(),
            tasks: VecDeque::new(),
            messages: VecDeque::new(),
            reported: HashMap::new(),
            next_id: 0,
            time: 0.0,
            rng,
        }
    }

    pub fn new() -> Self {
        Self::new_internal(None)
    }

    /// Create a new SimWorld with a seeded RNG for reproducible simulations
    pub fn new_with_seed(seed: u64) -> Self {
        Self::new_internal(Some(StdRng::seed_from_u64(seed)))
    }

    /// Get a random value in the given range, using seeded RNG if available
    fn random_range(&mut self, range: std::ops::RangeInclusive<i32>) -> i32 {
        match &mut self.rng {
            Some(rng) => rng.random_range(range),
            None => rand::rng().random_range(range),
        }
    }

    /// Choose a random element from a slice, using seeded RNG if available
    fn choose_random<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            return None;
        }
        match &mut self.rng {
            Some(rng) => slice.choose(rng),
            None => slice.choose(&mut rand::rng()),
        }
    }

    fn next_sim_id(&mut self) -> SimId {
        let id = SimId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Keeps object ids clear of ids restored from a layout
    pub(super) fn reserve_object_ids(&mut self, used: usize) {
        self.next_id = self.next_id.max(used + 1);
    }

    // ---------------------------------------------------------------
    // Objects
    // ---------------------------------------------------------------

    pub fn add_object(&mut self, name: impl Into<String>, kind: ObjectKind) -> ObjectId {
        let id = ObjectId(self.next_sim_id());
        self.insert_object(SimObject::new(id, name, kind));
        id
    }

    pub(super) fn insert_object(&mut self, object: SimObject) {
        debug!("Adding {} '{}'", object.kind.type_name(), object.name);
        self.objects.insert(object.id, object);
    }

    pub fn add_relay(&mut self, name: impl Into<String>) -> ObjectId {
        self.add_object(name, ObjectKind::Relay(Relay::default()))
    }

    pub fn add_lever(&mut self, name: impl Into<String>, min: i32, max: i32) -> ObjectId {
        self.add_object(name, ObjectKind::Lever(Lever::new(min, max)))
    }

    pub fn add_button(&mut self, name: impl Into<String>) -> ObjectId {
        self.add_object(name, ObjectKind::Button(Button::default()))
    }

    pub fn add_axle_counter(&mut self, name: impl Into<String>) -> ObjectId {
        self.add_object(name, ObjectKind::AxleCounter(AxleCounter::default()))
    }

    pub fn add_turnout(&mut self, name: impl Into<String>, channel: u16, address: u16) -> ObjectId {
        self.add_object(name, ObjectKind::Turnout(Turnout::new(channel, address)))
    }

    pub fn object(&self, id: ObjectId) -> Option<&SimObject> {
        self.objects.get(&id)
    }

    /// Mutable access for configuration (spring return, extraction, sensors).
    /// State changes must go through the world's setters.
    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut SimObject> {
        self.objects.get_mut(&id)
    }

    pub fn object_by_name(&self, name: &str) -> Option<ObjectId> {
        self.objects.values().find(|o| o.name == name).map(|o| o.id)
    }

    pub fn relay_state(&self, relay: ObjectId) -> Option<RelayState> {
        match &self.objects.get(&relay)?.kind {
            ObjectKind::Relay(r) => Some(r.state()),
            _ => None,
        }
    }

    pub fn lever_position(&self, lever: ObjectId) -> Option<i32> {
        match &self.objects.get(&lever)?.kind {
            ObjectKind::Lever(l) => Some(l.position),
            _ => None,
        }
    }

    pub fn button_state(&self, button: ObjectId) -> Option<ButtonState> {
        match &self.objects.get(&button)?.kind {
            ObjectKind::Button(b) => Some(b.state),
            _ => None,
        }
    }

    pub fn axle_counter_state(&self, counter: ObjectId) -> Option<AxleCounterState> {
        match &self.objects.get(&counter)?.kind {
            ObjectKind::AxleCounter(ac) => Some(ac.state()),
            _ => None,
        }
    }

    pub fn turnout_position(&self, turnout: ObjectId) -> Option<TurnoutPosition> {
        match &self.objects.get(&turnout)?.kind {
            ObjectKind::Turnout(t) => Some(t.position()),
            _ => None,
        }
    }

    // ---------------------------------------------------------------
    // Nodes and wiring
    // ---------------------------------------------------------------

    pub fn node(&self, id: NodeId) -> Option<&SimNode> {
        self.network.node(id)
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.network.node_by_name(name).map(|n| n.id)
    }

    /// True when a Closed circuit passes through any contact of the node
    pub fn is_node_powered(&self, id: NodeId) -> bool {
        self.network
            .node(id)
            .is_some_and(|n| n.has_circuits_of(CircuitType::Closed))
    }

    fn expect_object(&self, id: ObjectId, wanted: &str) -> Result<&SimObject> {
        let object = self
            .objects
            .get(&id)
            .with_context(|| format!("Object {:?} does not exist", id))?;
        if object.kind.type_name() != wanted {
            bail!(
                "'{}' is a {}, expected a {}",
                object.name,
                object.kind.type_name(),
                wanted
            );
        }
        Ok(object)
    }

    /// Rejects bindings to missing objects or objects of the wrong kind
    pub(super) fn check_binding(&self, node: Option<NodeId>, kind: &NodeKind) -> Result<()> {
        match kind {
            NodeKind::Deviator(dev) => match &dev.control {
                DeviatorControl::Manual => {}
                DeviatorControl::Relay { relay } => {
                    self.expect_object(*relay, "relay")?;
                }
                DeviatorControl::Lever { lever, .. } => {
                    self.expect_object(*lever, "lever")?;
                }
                DeviatorControl::Button { button, .. } => {
                    self.expect_object(*button, "button")?;
                }
                DeviatorControl::Turnout { turnout } => {
                    self.expect_object(*turnout, "turnout")?;
                }
            },
            NodeKind::RelayCoil(coil) => {
                if let Some(relay) = coil.relay {
                    self.expect_object(relay, "relay")?;
                }
            }
            NodeKind::AxleCounter(ac) => {
                if let Some(counter) = ac.counter {
                    let object = self.expect_object(counter, "axle_counter")?;
                    if let ObjectKind::AxleCounter(obj) = &object.kind {
                        if obj.node.is_some() && obj.node != node {
                            bail!("Axle counter '{}' is already wired to a node", object.name);
                        }
                    }
                }
            }
            NodeKind::Turnout {
                turnout: Some(turnout),
            } => {
                self.expect_object(*turnout, "turnout")?;
            }
            NodeKind::Command(cmd) => {
                if let Some(object) = cmd.object {
                    let sim = self
                        .objects
                        .get(&object)
                        .with_context(|| format!("Object {:?} does not exist", object))?;
                    if !matches!(sim.kind, ObjectKind::Lever(_) | ObjectKind::Button(_)) {
                        bail!(
                            "Command nodes drive levers or buttons, '{}' is a {}",
                            sim.name,
                            sim.kind.type_name()
                        );
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub(super) fn link_axle_counter(&mut self, node: NodeId) {
        let counter = match self.network.node(node).map(|n| &n.kind) {
            Some(NodeKind::AxleCounter(ac)) => ac.counter,
            _ => None,
        };
        if let Some(ObjectKind::AxleCounter(obj)) = counter
            .and_then(|c| self.objects.get_mut(&c))
            .map(|o| &mut o.kind)
        {
            obj.node = Some(node);
        }
    }

    /// Add a node to the network
    pub fn add_node(&mut self, name: impl Into<String>, kind: NodeKind) -> Result<NodeId> {
        self.check_binding(None, &kind)
            .context("Failed to add node")?;
        let id = self.network.add_node(name, kind);
        self.link_axle_counter(id);
        self.refresh_node_state(id);
        self.tasks.push_back(WorldTask::Reevaluate(id));
        self.settle();
        Ok(id)
    }

    /// Wire contact `a_contact` of `a` to contact `b_contact` of `b` with a
    /// new cable. Nothing changes if either end is invalid.
    pub fn connect(&mut self, a: NodeId, a_contact: usize, b: NodeId, b_contact: usize) -> Result<CableId> {
        let cable = self.network.add_cable();
        let attached = self
            .network
            .attach(cable, CableSide::A, a, a_contact)
            .and_then(|_| self.network.attach(cable, CableSide::B, b, b_contact));
        if let Err(err) = attached {
            self.network.remove_cable(cable);
            return Err(err).context("Failed to connect nodes");
        }

        self.network.rewire(&[
            CableEnd {
                node: a,
                contact: a_contact,
            },
            CableEnd {
                node: b,
                contact: b_contact,
            },
        ]);
        self.settle();
        Ok(cable)
    }

    /// Bind a free cable side to a node contact
    pub fn attach_cable_end(&mut self, cable: CableId, side: CableSide, node: NodeId, contact: usize) -> Result<()> {
        self.network
            .attach(cable, side, node, contact)
            .context("Failed to attach cable")?;
        let ends: Vec<CableEnd> = self
            .network
            .cable(cable)
            .map(|c| c.ends().into_iter().flatten().collect())
            .unwrap_or_default();
        self.network.rewire(&ends);
        self.settle();
        Ok(())
    }

    /// Free one side of a cable. A cable left with no ends is destroyed.
    pub fn detach_cable_end(&mut self, cable: CableId, side: CableSide) -> Result<()> {
        let sim_cable = self
            .network
            .cable(cable)
            .with_context(|| format!("Cable {:?} does not exist", cable))?;
        if sim_cable.end(side).is_none() {
            bail!("Cable {:?} side {:?} is not attached", cable, side);
        }
        let other = sim_cable.end(!side);

        self.network.cut_circuits_at_cable(cable);
        let detached = self.network.detach(cable, side);
        for end in detached.into_iter().chain(other) {
            self.network.create_circuits_from_other_node(end.node);
        }
        self.settle();
        Ok(())
    }

    /// Destroy a cable and both of its attachments
    pub fn disconnect(&mut self, cable: CableId) -> Result<()> {
        let ends = self
            .network
            .cable(cable)
            .with_context(|| format!("Cable {:?} does not exist", cable))?
            .ends();
        self.network.cut_circuits_at_cable(cable);
        self.network.remove_cable(cable);
        for end in ends.into_iter().flatten() {
            self.network.create_circuits_from_other_node(end.node);
        }
        self.settle();
        Ok(())
    }

    /// Remove a node, its cables and every circuit that referenced it
    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        let kind = self
            .network
            .node(id)
            .with_context(|| format!("Node {:?} does not exist", id))?
            .kind
            .clone();

        self.network.drop_node_circuits(id);
        self.network.remove_node(id);
        self.reported.remove(&id);
        self.scheduler
            .cancel_where(|key| matches!(key, TimerKey::Command(n) | TimerKey::RelayCoil(n, _) if *n == id));

        match kind {
            NodeKind::AxleCounter(ac) => {
                if let Some(ObjectKind::AxleCounter(obj)) = ac
                    .counter
                    .and_then(|c| self.objects.get_mut(&c))
                    .map(|o| &mut o.kind)
                {
                    if obj.node == Some(id) {
                        obj.node = None;
                    }
                }
            }
            NodeKind::RelayCoil(coil) => {
                if let Some(relay) = coil.relay {
                    self.release_relay_coils(relay, id);
                }
            }
            NodeKind::Turnout {
                turnout: Some(turnout),
            } => {
                self.messages.push_back(ObjectMessage::TurnoutCommand {
                    turnout,
                    command: None,
                });
            }
            _ => {}
        }

        self.network.reseed_all();
        self.settle();
        Ok(())
    }

    fn release_relay_coils(&mut self, relay: ObjectId, node: NodeId) {
        let changed = match self.objects.get_mut(&relay).map(|o| &mut o.kind) {
            Some(ObjectKind::Relay(r)) => r.drop_node(node),
            _ => false,
        };
        if changed {
            self.object_changed(relay);
        }
    }

    /// Bind a coil, axle counter, turnout or command node to an object.
    /// `None` unbinds it.
    pub fn bind_object(&mut self, node: NodeId, object: Option<ObjectId>) -> Result<()> {
        let current = self
            .network
            .node(node)
            .with_context(|| format!("Node {:?} does not exist", node))?
            .kind
            .clone();
        let mut kind = current.clone();
        match &mut kind {
            NodeKind::RelayCoil(coil) => coil.relay = object,
            NodeKind::AxleCounter(ac) => ac.counter = object,
            NodeKind::Turnout { turnout } => *turnout = object,
            NodeKind::Command(cmd) => {
                cmd.object = object;
                cmd.phase = CommandPhase::Off;
            }
            other => bail!("{} nodes are not bound to objects", other.type_name()),
        }
        self.check_binding(Some(node), &kind)
            .with_context(|| format!("Failed to bind node {:?}", node))?;

        match current {
            NodeKind::AxleCounter(old) => {
                if let Some(ObjectKind::AxleCounter(obj)) = old
                    .counter
                    .and_then(|c| self.objects.get_mut(&c))
                    .map(|o| &mut o.kind)
                {
                    obj.node = None;
                }
            }
            NodeKind::RelayCoil(old) => {
                if let Some(relay) = old.relay {
                    self.release_relay_coils(relay, node);
                }
            }
            NodeKind::Turnout {
                turnout: Some(turnout),
            } => {
                self.messages.push_back(ObjectMessage::TurnoutCommand {
                    turnout,
                    command: None,
                });
            }
            NodeKind::Command(_) => {
                self.scheduler.cancel(TimerKey::Command(node));
            }
            _ => {}
        }

        if let Some(sim) = self.network.node_mut(node) {
            sim.kind = kind;
        }
        self.link_axle_counter(node);
        self.refresh_node_state(node);

        // The new object has seen nothing yet
        self.reported.remove(&node);
        self.network.touch(node);
        self.tasks.push_back(WorldTask::Reevaluate(node));
        self.settle();
        Ok(())
    }

    pub fn set_deviator_control(&mut self, node: NodeId, control: DeviatorControl) -> Result<()> {
        let sim = self
            .network
            .node(node)
            .with_context(|| format!("Node {:?} does not exist", node))?;
        let NodeKind::Deviator(dev) = &sim.kind else {
            bail!("Node '{}' is not a deviator", sim.name);
        };
        let kind = NodeKind::Deviator(DeviatorNode {
            control,
            ..dev.clone()
        });
        self.check_binding(Some(node), &kind)
            .context("Failed to set deviator control")?;

        if let Some(sim) = self.network.node_mut(node) {
            sim.kind = kind;
        }
        self.refresh_node_state(node);
        self.tasks.push_back(WorldTask::Reevaluate(node));
        self.settle();
        Ok(())
    }

    /// Set the flags of a manually controlled deviator
    pub fn set_deviator_contacts(&mut self, node: NodeId, up: bool, down: bool) -> Result<()> {
        let sim = self
            .network
            .node_mut(node)
            .with_context(|| format!("Node {:?} does not exist", node))?;
        let NodeKind::Deviator(dev) = &mut sim.kind else {
            bail!("Node '{}' is not a deviator", sim.name);
        };
        if dev.control != DeviatorControl::Manual {
            bail!("Deviator '{}' follows an object, its contacts cannot be set", sim.name);
        }
        dev.set_state(up, down);
        self.tasks.push_back(WorldTask::Reevaluate(node));
        self.settle();
        Ok(())
    }

    /// Join a deviator's Common and Down contacts on one pole regardless
    /// of its flags
    pub fn set_deviator_passthrough(&mut self, node: NodeId, pole: CircuitPole, passthrough: bool) -> Result<()> {
        let sim = self
            .network
            .node_mut(node)
            .with_context(|| format!("Node {:?} does not exist", node))?;
        let NodeKind::Deviator(dev) = &mut sim.kind else {
            bail!("Node '{}' is not a deviator", sim.name);
        };
        dev.set_passthrough(pole, passthrough);
        self.tasks.push_back(WorldTask::Reevaluate(node));
        self.settle();
        Ok(())
    }

    pub fn set_power_source_enabled(&mut self, node: NodeId, enabled: bool) -> Result<()> {
        let sim = self
            .network
            .node_mut(node)
            .with_context(|| format!("Node {:?} does not exist", node))?;
        let NodeKind::PowerSource { enabled: current } = &mut sim.kind else {
            bail!("Node '{}' is not a power source", sim.name);
        };
        if *current == enabled {
            return Ok(());
        }
        *current = enabled;
        info!(
            "Power source '{}' {}",
            sim.name,
            if enabled { "enabled" } else { "disabled" }
        );

        let any_enabled = self
            .network
            .nodes()
            .any(|n| matches!(n.kind, NodeKind::PowerSource { enabled: true }));
        self.bridge.send(SimulatorMessage::Power { on: any_enabled });
        self.tasks.push_back(WorldTask::Reevaluate(node));
        self.settle();
        Ok(())
    }

    pub fn set_switch_on(&mut self, node: NodeId, on: bool) -> Result<()> {
        let sim = self
            .network
            .node_mut(node)
            .with_context(|| format!("Node {:?} does not exist", node))?;
        let NodeKind::OnOffSwitch { on: current } = &mut sim.kind else {
            bail!("Node '{}' is not an on/off switch", sim.name);
        };
        *current = on;
        self.tasks.push_back(WorldTask::Reevaluate(node));
        self.settle();
        Ok(())
    }

    /// Disable one junction contact (1..=3), or none with 0
    pub fn set_junction_disabled_contact(&mut self, node: NodeId, contact: usize) -> Result<()> {
        let sim = self
            .network
            .node_mut(node)
            .with_context(|| format!("Node {:?} does not exist", node))?;
        let NodeKind::SimpleJunction { disabled_contact } = &mut sim.kind else {
            bail!("Node '{}' is not a junction", sim.name);
        };
        if contact > 3 {
            bail!("Junction '{}' has no contact {}", sim.name, contact);
        }
        *disabled_contact = contact;
        self.tasks.push_back(WorldTask::Reevaluate(node));
        self.settle();
        Ok(())
    }

    // ---------------------------------------------------------------
    // Object inputs
    // ---------------------------------------------------------------

    pub fn set_lever_position(&mut self, lever: ObjectId, position: i32) -> Result<()> {
        self.apply_lever_position(lever, position)?;
        self.settle();
        Ok(())
    }

    fn apply_lever_position(&mut self, lever: ObjectId, position: i32) -> Result<()> {
        let object = self
            .objects
            .get_mut(&lever)
            .with_context(|| format!("Object {:?} does not exist", lever))?;
        let ObjectKind::Lever(sim_lever) = &mut object.kind else {
            bail!("'{}' is not a lever", object.name);
        };
        let changed = sim_lever
            .set_position(position)
            .with_context(|| format!("Cannot move lever '{}'", object.name))?;
        let spring = match sim_lever.rest_position {
            Some(rest) if rest != position => Some(sim_lever.spring_delay),
            _ => None,
        };

        match spring {
            Some(delay) => self
                .scheduler
                .schedule(TimerKey::LeverSpring(lever), self.time + delay),
            None => {
                self.scheduler.cancel(TimerKey::LeverSpring(lever));
            }
        }
        if changed {
            self.object_changed(lever);
        }
        Ok(())
    }

    pub fn set_button_state(&mut self, button: ObjectId, state: ButtonState) -> Result<()> {
        self.apply_button_state(button, state)?;
        self.settle();
        Ok(())
    }

    fn apply_button_state(&mut self, button: ObjectId, state: ButtonState) -> Result<()> {
        let object = self
            .objects
            .get_mut(&button)
            .with_context(|| format!("Object {:?} does not exist", button))?;
        let ObjectKind::Button(sim_button) = &mut object.kind else {
            bail!("'{}' is not a button", object.name);
        };
        let changed = sim_button
            .set_state(state)
            .with_context(|| format!("Cannot set button '{}'", object.name))?;
        let release = match (state, sim_button.release_after) {
            (ButtonState::Pressed, Some(after)) => Some(after),
            _ => None,
        };

        match release {
            Some(after) => self
                .scheduler
                .schedule(TimerKey::ButtonRelease(button), self.time + after),
            None => {
                self.scheduler.cancel(TimerKey::ButtonRelease(button));
            }
        }
        if changed {
            self.object_changed(button);
        }
        Ok(())
    }

    /// Feed an axle count difference from one of the counter's sensors
    pub fn axle_counter_event(&mut self, counter: ObjectId, diff: i32, first_sensor: bool) -> Result<()> {
        let object = self
            .objects
            .get_mut(&counter)
            .with_context(|| format!("Object {:?} does not exist", counter))?;
        let ObjectKind::AxleCounter(ac) = &mut object.kind else {
            bail!("'{}' is not an axle counter", object.name);
        };
        if ac.axle_event(diff, first_sensor) {
            self.after_axle_state_change(counter);
        }
        self.settle();
        Ok(())
    }

    /// Decode frames received from the remote network and apply them
    pub fn receive_bridge_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let messages = self.bridge.feed(bytes).context("Bad frame from remote network")?;
        for message in messages {
            match message {
                SimulatorMessage::SensorChanged {
                    channel,
                    address,
                    value,
                } => {
                    if value == 0 {
                        continue;
                    }
                    let hits: Vec<(ObjectId, bool)> = self
                        .objects
                        .values()
                        .filter_map(|o| match &o.kind {
                            ObjectKind::AxleCounter(ac) => ac.sensor_for(channel, address).map(|first| (o.id, first)),
                            _ => None,
                        })
                        .collect();
                    for (counter, first) in hits {
                        let changed = match self.objects.get_mut(&counter).map(|o| &mut o.kind) {
                            Some(ObjectKind::AxleCounter(ac)) => ac.axle_event(1, first),
                            _ => false,
                        };
                        if changed {
                            self.after_axle_state_change(counter);
                        }
                    }
                }
                other => debug!("Ignoring inbound {:?}", other),
            }
        }
        self.settle();
        Ok(())
    }

    // ---------------------------------------------------------------
    // Drain loop and hooks
    // ---------------------------------------------------------------

    /// Drain queued node re-evaluations, then object messages, until both
    /// queues are empty
    pub fn settle(&mut self) {
        self.process_touched();
        let mut steps = 0;
        loop {
            if steps >= MAX_SETTLE_STEPS {
                warn!(
                    "Settling abandoned after {} steps ({} tasks, {} messages left)",
                    steps,
                    self.tasks.len(),
                    self.messages.len()
                );
                self.tasks.clear();
                self.messages.clear();
                break;
            }
            steps += 1;

            if let Some(task) = self.tasks.pop_front() {
                match task {
                    WorldTask::Reevaluate(node) => self.network.update_node(node),
                }
                self.process_touched();
                continue;
            }
            if let Some(message) = self.messages.pop_front() {
                self.deliver(message);
                self.process_touched();
                continue;
            }
            break;
        }
    }

    pub fn is_settled(&self) -> bool {
        self.tasks.is_empty() && self.messages.is_empty()
    }

    /// Compare the power of every touched node with its last report and
    /// run hooks for the ones that changed
    fn process_touched(&mut self) {
        for node in self.network.take_touched() {
            let Some(sim) = self.network.node(node) else {
                self.reported.remove(&node);
                continue;
            };
            let power = sim.power();
            let previous = self.reported.get(&node).cloned().unwrap_or_default();
            if previous == power {
                continue;
            }
            self.run_hook(node, &previous, &power);
            self.reported.insert(node, power);
        }
    }

    fn run_hook(&mut self, node: NodeId, previous: &NodePower, power: &NodePower) {
        let Some(sim) = self.network.node(node) else {
            return;
        };
        let name = sim.name.clone();
        match sim.kind.clone() {
            NodeKind::RelayCoil(coil) => self.relay_coil_hook(node, &coil, previous, power),
            NodeKind::AxleCounter(ac) => {
                let Some(counter) = ac.counter else {
                    return;
                };
                let input = |p: &NodePower| (powered_at(p, AXLE_POWER_IN), closed_at(p, AXLE_RESET_IN));
                if input(previous) == input(power) {
                    return;
                }
                let (has_power, reset) = input(power);
                self.messages.push_back(ObjectMessage::AxleCounterInput {
                    counter,
                    power: has_power,
                    reset,
                });
            }
            NodeKind::Turnout {
                turnout: Some(turnout),
            } => {
                let command = |p: &NodePower| match (closed_at(p, TURNOUT_N), closed_at(p, TURNOUT_R)) {
                    (true, false) => Some(TurnoutPosition::Normal),
                    (false, true) => Some(TurnoutPosition::Reverse),
                    _ => None,
                };
                if command(previous) == command(power) {
                    return;
                }
                self.messages.push_back(ObjectMessage::TurnoutCommand {
                    turnout,
                    command: command(power),
                });
            }
            NodeKind::Command(cmd) => {
                if cmd.object.is_none() {
                    return;
                }
                let was = closed_at(previous, 0);
                let is = closed_at(power, 0);
                if !was && is {
                    debug!("Command '{}' armed for {:.2}s", name, cmd.delay);
                    self.set_command_phase(node, CommandPhase::Waiting);
                    self.scheduler
                        .schedule(TimerKey::Command(node), self.time + cmd.delay);
                } else if was && !is {
                    self.set_command_phase(node, CommandPhase::Off);
                    self.scheduler.cancel(TimerKey::Command(node));
                }
            }
            NodeKind::Lamp => {
                let was = closed_at(previous, 0);
                let is = closed_at(power, 0);
                if was != is {
                    info!("Lamp '{}' {}", name, if is { "lit" } else { "dark" });
                }
            }
            _ => {}
        }
    }

    fn relay_coil_hook(&mut self, node: NodeId, coil: &RelayCoilNode, previous: &NodePower, power: &NodePower) {
        let Some(relay) = coil.relay else {
            return;
        };
        let coils = if coil.second_connector { 2 } else { 1 };
        for idx in 0..coils {
            let was = closed_at(previous, idx);
            let is = closed_at(power, idx);
            if was == is {
                continue;
            }
            let delay = if is { coil.delay_up } else { coil.delay_down };
            let key = TimerKey::RelayCoil(node, idx);
            if delay > 0.0 {
                self.scheduler.schedule_with(key, self.time + delay, is);
            } else {
                self.scheduler.cancel(key);
                self.messages.push_back(ObjectMessage::RelayCoil {
                    relay,
                    node,
                    coil: idx,
                    powered: is,
                });
            }
        }
    }

    fn set_command_phase(&mut self, node: NodeId, phase: CommandPhase) {
        if let Some(NodeKind::Command(cmd)) = self.network.node_mut(node).map(|n| &mut n.kind) {
            cmd.phase = phase;
        }
    }

    pub fn command_phase(&self, node: NodeId) -> Option<CommandPhase> {
        match &self.network.node(node)?.kind {
            NodeKind::Command(cmd) => Some(cmd.phase),
            _ => None,
        }
    }

    fn deliver(&mut self, message: ObjectMessage) {
        debug!("Delivering {:?}", message);
        match message {
            ObjectMessage::RelayCoil {
                relay,
                node,
                coil,
                powered,
            } => {
                let changed = match self.objects.get_mut(&relay).map(|o| &mut o.kind) {
                    Some(ObjectKind::Relay(r)) => r.set_coil(node, coil, powered),
                    _ => false,
                };
                if changed {
                    self.object_changed(relay);
                }
            }
            ObjectMessage::AxleCounterInput { counter, power, reset } => {
                let changed = match self.objects.get_mut(&counter).map(|o| &mut o.kind) {
                    Some(ObjectKind::AxleCounter(ac)) => ac.set_has_power(power) | ac.trigger_reset(reset),
                    _ => false,
                };
                if changed {
                    self.after_axle_state_change(counter);
                }
            }
            ObjectMessage::TurnoutCommand { turnout, command } => {
                let motor_time = match self.objects.get_mut(&turnout).map(|o| &mut o.kind) {
                    Some(ObjectKind::Turnout(t)) => {
                        if !t.set_command(command) {
                            return;
                        }
                        t.motor_time
                    }
                    _ => return,
                };
                let key = TimerKey::TurnoutMotor(turnout);
                if command.is_some() {
                    self.scheduler.schedule(key, self.time + motor_time);
                } else {
                    self.scheduler.cancel(key);
                }
            }
        }
    }

    fn after_axle_state_change(&mut self, counter: ObjectId) {
        let key = TimerKey::AxleReset(counter);
        match self.axle_counter_state(counter) {
            Some(AxleCounterState::ResetPre) => self
                .scheduler
                .schedule(key, self.time + AXLE_COUNTER_RESET_PRE_TIME),
            Some(AxleCounterState::Reset) => self.scheduler.schedule(key, self.time + AXLE_COUNTER_RESET_TIME),
            _ => {
                self.scheduler.cancel(key);
            }
        }
        self.object_changed(counter);
    }

    fn object_changed(&mut self, object: ObjectId) {
        if let Some(sim) = self.objects.get(&object) {
            sim.log_state();
        }
        self.on_object_changed(object);
    }

    /// Refresh every node reading this object and queue the ones whose
    /// routing changed
    fn on_object_changed(&mut self, object: ObjectId) {
        let nodes: Vec<NodeId> = self
            .network
            .nodes()
            .filter(|n| n.kind.bound_object() == Some(object))
            .map(|n| n.id)
            .collect();
        for node in nodes {
            if self.refresh_node_state(node) {
                self.tasks.push_back(WorldTask::Reevaluate(node));
            }
        }
    }

    /// Copy object state into a node. Returns true if the node's routing
    /// changed.
    pub(super) fn refresh_node_state(&mut self, node: NodeId) -> bool {
        let Some(sim) = self.network.node(node) else {
            return false;
        };
        let refresh = match &sim.kind {
            NodeKind::Deviator(dev) => self.deviator_flags(&dev.control).map(|(up, down)| StateRefresh::Deviator(up, down)),
            NodeKind::AxleCounter(ac) => Some(StateRefresh::AxleCounter(
                ac.counter.and_then(|c| self.axle_counter_state(c)),
            )),
            _ => None,
        };
        let Some(refresh) = refresh else {
            return false;
        };
        let Some(sim) = self.network.node_mut(node) else {
            return false;
        };

        match (refresh, &mut sim.kind) {
            (StateRefresh::Deviator(up, down), NodeKind::Deviator(dev)) => {
                let before = dev.contact_on;
                dev.set_state(up, down);
                dev.contact_on != before
            }
            (StateRefresh::AxleCounter(state), NodeKind::AxleCounter(ac)) => {
                let changed = ac.state != state;
                ac.state = state;
                changed
            }
            _ => false,
        }
    }

    fn deviator_flags(&self, control: &DeviatorControl) -> Option<(bool, bool)> {
        let kind = control.object().and_then(|id| self.objects.get(&id)).map(|o| &o.kind);
        match (control, kind) {
            (DeviatorControl::Relay { .. }, Some(ObjectKind::Relay(relay))) => {
                let up = relay.state() == RelayState::Up;
                Some((up, !up))
            }
            (
                DeviatorControl::Lever {
                    up_positions,
                    down_positions,
                    ..
                },
                Some(ObjectKind::Lever(lever)),
            ) => Some(DeviatorControl::lever_flags(up_positions, down_positions, lever.position)),
            (
                DeviatorControl::Button {
                    up_states, down_states, ..
                },
                Some(ObjectKind::Button(button)),
            ) => Some(DeviatorControl::button_flags(up_states, down_states, button.state)),
            (DeviatorControl::Turnout { .. }, Some(ObjectKind::Turnout(turnout))) => Some((
                turnout.position() == TurnoutPosition::Normal,
                turnout.position() == TurnoutPosition::Reverse,
            )),
            _ => None,
        }
    }

    // ---------------------------------------------------------------
    // Time
    // ---------------------------------------------------------------

    /// Advance the simulation by one tick, firing due timers in order
    pub fn tick(&mut self, delta_secs: f32) {
        self.time += delta_secs;
        while let Some(event) = self.scheduler.pop_due(self.time) {
            self.fire_timer(event);
            self.settle();
        }
        self.settle();
    }

    fn fire_timer(&mut self, event: TimerEvent) {
        debug!("Timer {:?} fired (due {:.2}s)", event.key, event.due);
        match event.key {
            TimerKey::Command(node) => self.perform_command(node),
            TimerKey::RelayCoil(node, coil) => {
                let relay = match self.network.node(node).map(|n| &n.kind) {
                    Some(NodeKind::RelayCoil(c)) => c.relay,
                    _ => None,
                };
                if let Some(relay) = relay {
                    self.messages.push_back(ObjectMessage::RelayCoil {
                        relay,
                        node,
                        coil,
                        powered: event.powered,
                    });
                }
            }
            TimerKey::TurnoutMotor(turnout) => {
                let moved = match self.objects.get_mut(&turnout).map(|o| &mut o.kind) {
                    Some(ObjectKind::Turnout(t)) => {
                        if t.finish_motion() {
                            Some((t.channel, t.address, t.position()))
                        } else {
                            None
                        }
                    }
                    _ => None,
                };
                if let Some((channel, address, position)) = moved {
                    let state = match position {
                        TurnoutPosition::Normal => ACCESSORY_STATE_NORMAL,
                        TurnoutPosition::Reverse => ACCESSORY_STATE_REVERSE,
                        TurnoutPosition::Unknown => 0,
                    };
                    self.bridge.send(SimulatorMessage::AccessorySetState {
                        channel,
                        address,
                        state,
                    });
                    self.object_changed(turnout);
                }
            }
            TimerKey::AxleReset(counter) => {
                let changed = match self.objects.get_mut(&counter).map(|o| &mut o.kind) {
                    Some(ObjectKind::AxleCounter(ac)) => ac.reset_step_elapsed(),
                    _ => false,
                };
                if changed {
                    self.after_axle_state_change(counter);
                }
            }
            TimerKey::LeverSpring(lever) => {
                let rest = match self.objects.get(&lever).map(|o| &o.kind) {
                    Some(ObjectKind::Lever(l)) => l.rest_position,
                    _ => None,
                };
                if let Some(rest) = rest {
                    if let Err(err) = self.apply_lever_position(lever, rest) {
                        warn!("Spring return failed: {:#}", err);
                    }
                }
            }
            TimerKey::ButtonRelease(button) => {
                if let Err(err) = self.apply_button_state(button, ButtonState::Normal) {
                    warn!("Button release failed: {:#}", err);
                }
            }
        }
    }

    fn perform_command(&mut self, node: NodeId) {
        let Some(sim) = self.network.node(node) else {
            return;
        };
        let NodeKind::Command(cmd) = sim.kind.clone() else {
            return;
        };
        let name = sim.name.clone();
        let Some(object) = cmd.object else {
            return;
        };
        self.set_command_phase(node, CommandPhase::PerformingAction);

        let outcome = match self.objects.get(&object).map(|o| &o.kind) {
            Some(ObjectKind::Lever(_)) => self.apply_lever_position(object, cmd.target_position),
            Some(ObjectKind::Button(_)) => match ButtonState::from_index(cmd.target_position) {
                Some(state) => self.apply_button_state(object, state),
                None => Err(anyhow::anyhow!("no button state {}", cmd.target_position)),
            },
            _ => Err(anyhow::anyhow!("object {:?} is gone", object)),
        };

        match outcome {
            Ok(()) => {
                info!("Command '{}' done", name);
                self.set_command_phase(node, CommandPhase::Done);
            }
            Err(err) => {
                warn!("Command '{}' failed, retrying: {:#}", name, err);
                self.set_command_phase(node, CommandPhase::Retry);
                self.scheduler
                    .schedule(TimerKey::Command(node), self.time + COMMAND_RETRY_DELAY);
            }
        }
    }

    // ---------------------------------------------------------------
    // Demo world
    // ---------------------------------------------------------------

    /// Flip a random lever to a random position of its range.
    /// Returns the lever's name and new position when one moved.
    pub fn random_lever_flip(&mut self) -> Option<(String, i32)> {
        let levers: Vec<(ObjectId, i32, i32)> = self
            .objects
            .values()
            .filter_map(|o| match &o.kind {
                ObjectKind::Lever(l) if !l.locked => Some((o.id, l.min, l.max)),
                _ => None,
            })
            .collect();
        let (lever, min, max) = *self.choose_random(&levers)?;
        let position = self.random_range(min..=max);
        match self.set_lever_position(lever, position) {
            Ok(()) => self.objects.get(&lever).map(|o| (o.name.clone(), position)),
            Err(err) => {
                warn!("Random flip rejected: {:#}", err);
                None
            }
        }
    }

    /// Create the demo interlocking
    pub fn create_demo_world() -> Result<Self> {
        Self::build_demo_world(SimWorld::new())
    }

    /// Create the demo interlocking with a seeded RNG for reproducible runs
    pub fn create_demo_world_with_seed(seed: u64) -> Result<Self> {
        Self::build_demo_world(SimWorld::new_with_seed(seed))
    }

    /// A lever drives a relay; the relay switches two lamps and a turnout;
    /// a track section is watched by an axle counter reset by a button.
    pub fn build_demo_world(mut world: SimWorld) -> Result<Self> {
        let lever = world.add_lever("L1", 0, 1);
        let relay = world.add_relay("R1");
        let turnout = world.add_turnout("T1", 1, 5);
        let counter = world.add_axle_counter("AC1");
        let reset = world.add_button("B1");

        // Lever -> relay coil
        let src = world.add_node("S1", NodeKind::PowerSource { enabled: true })?;
        let lever_dev = world.add_node(
            "L1 contact",
            NodeKind::Deviator(DeviatorNode::new(DeviatorControl::Lever {
                lever,
                up_positions: vec![1],
                down_positions: vec![0],
            })),
        )?;
        let coil = world.add_node(
            "R1 coil",
            NodeKind::RelayCoil(RelayCoilNode {
                relay: Some(relay),
                ..RelayCoilNode::default()
            }),
        )?;
        world.connect(src, 0, lever_dev, DEVIATOR_COMMON)?;
        world.connect(lever_dev, DEVIATOR_UP, coil, 0)?;

        // Relay -> signal lamps
        let src = world.add_node("S2", NodeKind::PowerSource { enabled: true })?;
        let relay_dev = world.add_node(
            "R1 front contact",
            NodeKind::Deviator(DeviatorNode::new(DeviatorControl::Relay { relay })),
        )?;
        let green = world.add_node("Green", NodeKind::Lamp)?;
        let red = world.add_node("Red", NodeKind::Lamp)?;
        world.connect(src, 0, relay_dev, DEVIATOR_COMMON)?;
        world.connect(relay_dev, DEVIATOR_UP, green, 0)?;
        world.connect(relay_dev, DEVIATOR_DOWN, red, 0)?;

        // Relay -> turnout motor
        let src = world.add_node("S3", NodeKind::PowerSource { enabled: true })?;
        let motor_dev = world.add_node(
            "R1 motor contact",
            NodeKind::Deviator(DeviatorNode::new(DeviatorControl::Relay { relay })),
        )?;
        let motor = world.add_node(
            "T1 motor",
            NodeKind::Turnout {
                turnout: Some(turnout),
            },
        )?;
        world.connect(src, 0, motor_dev, DEVIATOR_COMMON)?;
        world.connect(motor_dev, DEVIATOR_DOWN, motor, TURNOUT_N)?;
        world.connect(motor_dev, DEVIATOR_UP, motor, TURNOUT_R)?;

        // Track section
        let src = world.add_node("S4", NodeKind::PowerSource { enabled: true })?;
        let section = world.add_node(
            "AC1 section",
            NodeKind::AxleCounter(AxleCounterNode {
                counter: Some(counter),
                state: None,
            }),
        )?;
        let occupied = world.add_node("Occupied", NodeKind::Lamp)?;
        world.connect(src, 0, section, AXLE_POWER_IN)?;
        world.connect(section, AXLE_OCCUPIED_TRACK_OUT, occupied, 0)?;

        let src = world.add_node("S5", NodeKind::PowerSource { enabled: true })?;
        let reset_dev = world.add_node(
            "B1 contact",
            NodeKind::Deviator(DeviatorNode::new(DeviatorControl::Button {
                button: reset,
                up_states: [false, true, false],
                down_states: [false; 3],
            })),
        )?;
        world.connect(src, 0, reset_dev, DEVIATOR_COMMON)?;
        world.connect(reset_dev, DEVIATOR_UP, section, AXLE_RESET_IN)?;

        Ok(world)
    }

    /// Print a summary of the current simulation state
    pub fn print_summary(&self) {
        let closed = self
            .network
            .circuits()
            .filter(|c| c.kind == CircuitType::Closed)
            .count();
        println!("=== Relay Simulation Summary ===");
        println!("Time: {:.2}s", self.time);
        println!(
            "Nodes: {}, Cables: {}, Wiring groups: {}",
            self.network.node_count(),
            self.network.cable_count(),
            self.network.wiring_groups()
        );
        println!(
            "Circuits: {} closed, {} open",
            closed,
            self.network.circuit_count() - closed
        );
        println!("Pending timers: {}", self.scheduler.len());
        println!();

        println!("--- Objects ---");
        for object in self.objects.values() {
            println!(
                "  {} '{}': {}",
                object.kind.type_name(),
                object.name,
                object.describe_state()
            );
        }

        let powered: Vec<&str> = self
            .network
            .nodes()
            .filter(|n| n.kind.is_electric_load() && self.is_node_powered(n.id))
            .map(|n| n.name.as_str())
            .collect();
        println!("--- Powered loads ---");
        if powered.is_empty() {
            println!("  (none)");
        }
        for name in powered {
            println!("  {}", name);
        }
    }
}
