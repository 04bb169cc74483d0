//! External simulation objects
//!
//! Relays, levers, buttons, axle counters and turnouts own the state that
//! nodes read to decide their routing. Objects never touch circuits; the
//! world turns their state changes into node re-evaluations.

use anyhow::{bail, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::types::{NodeId, ObjectId, TURNOUT_DEFAULT_MOTOR_TIME};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RelayState {
    #[default]
    Down,
    Up,
}

/// A relay pulled up while any of its coils is powered
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Relay {
    #[serde(skip)]
    powered_coils: BTreeSet<(NodeId, usize)>,
    #[serde(skip)]
    state: RelayState,
}

impl Relay {
    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn is_coil_powered(&self, node: NodeId, coil: usize) -> bool {
        self.powered_coils.contains(&(node, coil))
    }

    /// Returns true if the relay changed state
    pub fn set_coil(&mut self, node: NodeId, coil: usize, powered: bool) -> bool {
        if powered {
            self.powered_coils.insert((node, coil));
        } else {
            self.powered_coils.remove(&(node, coil));
        }

        let new_state = if self.powered_coils.is_empty() {
            RelayState::Down
        } else {
            RelayState::Up
        };
        let changed = new_state != self.state;
        self.state = new_state;
        changed
    }

    /// Forget every coil of a node that went away
    pub fn drop_node(&mut self, node: NodeId) -> bool {
        let coils: Vec<_> = self
            .powered_coils
            .iter()
            .filter(|(n, _)| *n == node)
            .copied()
            .collect();
        let mut changed = false;
        for (n, coil) in coils {
            changed |= self.set_coil(n, coil, false);
        }
        changed
    }
}

/// A lever with a discrete position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lever {
    pub position: i32,
    pub min: i32,
    pub max: i32,
    /// Position the lever springs back to after `spring_delay`
    #[serde(default)]
    pub rest_position: Option<i32>,
    #[serde(default)]
    pub spring_delay: f32,
    #[serde(default)]
    pub locked: bool,
}

impl Lever {
    pub fn new(min: i32, max: i32) -> Self {
        Self {
            position: min,
            min,
            max,
            rest_position: None,
            spring_delay: 0.0,
            locked: false,
        }
    }

    /// Moves the lever, returning true if the position changed
    pub fn set_position(&mut self, position: i32) -> Result<bool> {
        if self.locked {
            bail!("lever is locked");
        }
        if position < self.min || position > self.max {
            bail!(
                "lever position {} outside range {}..={}",
                position,
                self.min,
                self.max
            );
        }
        let changed = self.position != position;
        self.position = position;
        Ok(changed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ButtonState {
    #[default]
    Normal,
    Pressed,
    Extracted,
}

impl ButtonState {
    pub fn index(self) -> usize {
        match self {
            ButtonState::Normal => 0,
            ButtonState::Pressed => 1,
            ButtonState::Extracted => 2,
        }
    }

    pub fn from_index(idx: i32) -> Option<Self> {
        match idx {
            0 => Some(ButtonState::Normal),
            1 => Some(ButtonState::Pressed),
            2 => Some(ButtonState::Extracted),
            _ => None,
        }
    }
}

/// A push button, optionally extractable
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Button {
    #[serde(skip)]
    pub state: ButtonState,
    #[serde(default)]
    pub can_extract: bool,
    /// Seconds after which a pressed button returns to Normal
    #[serde(default)]
    pub release_after: Option<f32>,
}

impl Button {
    pub fn set_state(&mut self, state: ButtonState) -> Result<bool> {
        if state == ButtonState::Extracted && !self.can_extract {
            bail!("button cannot be extracted");
        }
        let changed = self.state != state;
        self.state = state;
        Ok(changed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AxleCounterState {
    #[default]
    OccupiedAtStart,
    ResetPre,
    Reset,
    ResetPost,
    Free,
    Occupied,
}

/// A track sensor feeding an axle counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxleSensor {
    pub channel: u16,
    pub address: u16,
    /// Axles seen by this sensor are subtracted instead of added
    pub invert: bool,
}

/// Counts axles entering and leaving a track section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxleCounter {
    pub sensors: [AxleSensor; 2],
    #[serde(skip)]
    state: AxleCounterState,
    #[serde(skip)]
    count: i32,
    #[serde(skip)]
    has_power: bool,
    /// The single node wired to this counter
    #[serde(skip)]
    pub node: Option<NodeId>,
}

impl Default for AxleCounter {
    fn default() -> Self {
        Self {
            sensors: [
                AxleSensor {
                    channel: 0,
                    address: 0,
                    invert: false,
                },
                AxleSensor {
                    channel: 0,
                    address: 1,
                    invert: true,
                },
            ],
            state: AxleCounterState::OccupiedAtStart,
            count: 0,
            has_power: false,
            node: None,
        }
    }
}

impl AxleCounter {
    pub fn state(&self) -> AxleCounterState {
        self.state
    }

    pub fn count(&self) -> i32 {
        self.count
    }

    pub fn has_power(&self) -> bool {
        self.has_power
    }

    pub fn is_resetting(&self) -> bool {
        matches!(
            self.state,
            AxleCounterState::ResetPre | AxleCounterState::Reset | AxleCounterState::ResetPost
        )
    }

    /// Returns true if the state changed
    fn set_state(&mut self, state: AxleCounterState) -> bool {
        if self.state == state {
            return false;
        }
        self.state = state;
        if state == AxleCounterState::OccupiedAtStart || self.is_resetting() {
            self.count = 0;
        }
        true
    }

    /// Power loss outside a reset forces the counter to OccupiedAtStart
    pub fn set_has_power(&mut self, power: bool) -> bool {
        if self.has_power == power {
            return false;
        }
        self.has_power = power;
        if self.is_resetting() {
            return false;
        }
        self.set_state(AxleCounterState::OccupiedAtStart)
    }

    pub fn trigger_reset(&mut self, reset: bool) -> bool {
        if reset && !self.is_resetting() {
            self.set_state(AxleCounterState::ResetPre)
        } else if !reset && self.is_resetting() {
            if self.has_power && self.state == AxleCounterState::Reset {
                let next = if self.count == 0 {
                    AxleCounterState::Free
                } else {
                    AxleCounterState::Occupied
                };
                self.set_state(next)
            } else {
                self.set_state(AxleCounterState::OccupiedAtStart)
            }
        } else {
            false
        }
    }

    /// Advances ResetPre to Reset and Reset to ResetPost
    pub fn reset_step_elapsed(&mut self) -> bool {
        match self.state {
            AxleCounterState::ResetPre => self.set_state(AxleCounterState::Reset),
            AxleCounterState::Reset => self.set_state(AxleCounterState::ResetPost),
            _ => false,
        }
    }

    /// Applies an axle count difference reported by one sensor
    pub fn axle_event(&mut self, diff: i32, first_sensor: bool) -> bool {
        if self.state == AxleCounterState::OccupiedAtStart || self.is_resetting() || diff == 0 {
            return false;
        }
        let sensor = &self.sensors[if first_sensor { 0 } else { 1 }];
        let diff = if sensor.invert { -diff } else { diff };
        self.count += diff;
        let next = if self.count == 0 {
            AxleCounterState::Free
        } else {
            AxleCounterState::Occupied
        };
        self.set_state(next)
    }

    /// Which sensor, if any, listens on the given channel and address
    pub fn sensor_for(&self, channel: u16, address: u16) -> Option<bool> {
        self.sensors
            .iter()
            .position(|s| s.channel == channel && s.address == address)
            .map(|idx| idx == 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TurnoutPosition {
    #[default]
    Unknown,
    Normal,
    Reverse,
}

/// A turnout moved by a motor node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turnout {
    #[serde(default = "default_motor_time")]
    pub motor_time: f32,
    pub channel: u16,
    pub address: u16,
    #[serde(skip)]
    commanded: Option<TurnoutPosition>,
    #[serde(skip)]
    position: TurnoutPosition,
}

fn default_motor_time() -> f32 {
    TURNOUT_DEFAULT_MOTOR_TIME
}

impl Default for Turnout {
    fn default() -> Self {
        Self {
            motor_time: TURNOUT_DEFAULT_MOTOR_TIME,
            channel: 0,
            address: 0,
            commanded: None,
            position: TurnoutPosition::Unknown,
        }
    }
}

impl Turnout {
    pub fn new(channel: u16, address: u16) -> Self {
        Self {
            channel,
            address,
            ..Self::default()
        }
    }

    pub fn position(&self) -> TurnoutPosition {
        self.position
    }

    pub fn commanded(&self) -> Option<TurnoutPosition> {
        self.commanded
    }

    /// Sets the motor command; returns true if it changed
    pub fn set_command(&mut self, command: Option<TurnoutPosition>) -> bool {
        let changed = self.commanded != command;
        self.commanded = command;
        changed
    }

    /// Motor reached the commanded side; returns true if the position changed
    pub fn finish_motion(&mut self) -> bool {
        match self.commanded {
            Some(target) if target != self.position => {
                self.position = target;
                true
            }
            _ => false,
        }
    }
}

/// Every kind of external object
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectKind {
    Relay(Relay),
    Lever(Lever),
    Button(Button),
    AxleCounter(AxleCounter),
    Turnout(Turnout),
}

impl ObjectKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ObjectKind::Relay(_) => "relay",
            ObjectKind::Lever(_) => "lever",
            ObjectKind::Button(_) => "button",
            ObjectKind::AxleCounter(_) => "axle_counter",
            ObjectKind::Turnout(_) => "turnout",
        }
    }
}

/// A named simulation object
#[derive(Debug, Clone)]
pub struct SimObject {
    pub id: ObjectId,
    pub name: String,
    pub kind: ObjectKind,
}

impl SimObject {
    pub fn new(id: ObjectId, name: impl Into<String>, kind: ObjectKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
        }
    }

    /// Short state label for logs and summaries
    pub fn describe_state(&self) -> String {
        match &self.kind {
            ObjectKind::Relay(relay) => format!("{:?}", relay.state()),
            ObjectKind::Lever(lever) => format!("position {}", lever.position),
            ObjectKind::Button(button) => format!("{:?}", button.state),
            ObjectKind::AxleCounter(ac) => format!("{:?} ({} axles)", ac.state(), ac.count()),
            ObjectKind::Turnout(turnout) => format!("{:?}", turnout.position()),
        }
    }

    pub(super) fn log_state(&self) {
        info!(
            "{} '{}' is now {}",
            self.kind.type_name(),
            self.name,
            self.describe_state()
        );
    }
}
