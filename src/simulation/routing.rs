//! Node variants and their routing functions
//!
//! A node's routing function maps an incoming (contact, pole) to the
//! outgoing (contact, pole) pairs it conducts to, given only the node's
//! current internal state. The traversal engine never looks inside a
//! variant beyond these methods.

use serde::{Deserialize, Serialize};

use super::objects::{AxleCounterState, ButtonState};
use super::types::{CircuitPole, ObjectId, COMMAND_DEFAULT_DELAY};

/// Deviator contact indices
pub const DEVIATOR_COMMON: usize = 0;
pub const DEVIATOR_UP: usize = 1;
pub const DEVIATOR_DOWN: usize = 2;

/// Axle counter contact indices
pub const AXLE_FREE_TRACK_OUT: usize = 0;
pub const AXLE_RESET_IN: usize = 1;
pub const AXLE_OCCUPIED_TRACK_OUT: usize = 2;
pub const AXLE_POWER_IN: usize = 3;

/// Diode contact indices
pub const DIODE_ANODE: usize = 0;
pub const DIODE_CATHODE: usize = 1;

/// Turnout motor contact indices
pub const TURNOUT_N: usize = 0;
pub const TURNOUT_R: usize = 1;

fn default_true() -> bool {
    true
}

/// Where a deviator's two contact flags come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DeviatorControl {
    /// Flags are set directly
    #[default]
    Manual,
    /// Up while the relay is up, Down while it is down
    Relay { relay: ObjectId },
    /// A flag is on while the lever sits in one of its positions
    Lever {
        lever: ObjectId,
        up_positions: Vec<i32>,
        down_positions: Vec<i32>,
    },
    /// A flag per button state (normal, pressed, extracted)
    Button {
        button: ObjectId,
        up_states: [bool; 3],
        down_states: [bool; 3],
    },
    /// Up while the turnout is Normal, Down while Reverse
    Turnout { turnout: ObjectId },
}

impl DeviatorControl {
    pub fn object(&self) -> Option<ObjectId> {
        match self {
            DeviatorControl::Manual => None,
            DeviatorControl::Relay { relay } => Some(*relay),
            DeviatorControl::Lever { lever, .. } => Some(*lever),
            DeviatorControl::Button { button, .. } => Some(*button),
            DeviatorControl::Turnout { turnout } => Some(*turnout),
        }
    }

    /// Flags for a lever at the given position
    pub fn lever_flags(up_positions: &[i32], down_positions: &[i32], position: i32) -> (bool, bool) {
        (
            up_positions.contains(&position),
            down_positions.contains(&position),
        )
    }

    /// Flags for a button in the given state
    pub fn button_flags(up_states: &[bool; 3], down_states: &[bool; 3], state: ButtonState) -> (bool, bool) {
        let idx = state.index();
        (up_states[idx], down_states[idx])
    }
}

/// How a deviator's Common and Down contacts behave on one pole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContactType {
    /// Conducts according to the contact flags
    #[default]
    Switched,
    /// Common joined straight to Down, whatever the flags
    Passthrough,
}

/// A three-way contact switched by an external object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviatorNode {
    /// Up and Down flags, stored after swapping
    #[serde(default)]
    pub contact_on: [bool; 2],
    #[serde(default = "default_true")]
    pub has_central_connector: bool,
    #[serde(default)]
    pub swap_state: bool,
    #[serde(default)]
    pub control: DeviatorControl,
    /// Contact type per pole
    #[serde(default)]
    pub pole_types: [ContactType; 2],
}

impl Default for DeviatorNode {
    fn default() -> Self {
        Self {
            contact_on: [false; 2],
            has_central_connector: true,
            swap_state: false,
            control: DeviatorControl::Manual,
            pole_types: [ContactType::Switched; 2],
        }
    }
}

impl DeviatorNode {
    pub fn new(control: DeviatorControl) -> Self {
        Self {
            control,
            ..Self::default()
        }
    }

    pub fn is_up_on(&self) -> bool {
        self.contact_on[0]
    }

    pub fn is_down_on(&self) -> bool {
        self.contact_on[1]
    }

    /// Sets both flags, swapping them if configured.
    /// Returns true when a flag went from off to on.
    pub fn set_state(&mut self, up: bool, down: bool) -> bool {
        let (up, down) = if self.swap_state { (down, up) } else { (up, down) };
        let new_connections = (up && !self.contact_on[0]) || (down && !self.contact_on[1]);
        self.contact_on = [up, down];
        new_connections
    }

    pub fn set_passthrough(&mut self, pole: CircuitPole, passthrough: bool) {
        self.pole_types[pole.index()] = if passthrough {
            ContactType::Passthrough
        } else {
            ContactType::Switched
        };
    }

    fn route(&self, contact: usize, pole: CircuitPole) -> Vec<usize> {
        if self.pole_types[pole.index()] == ContactType::Passthrough {
            match contact {
                DEVIATOR_COMMON => return vec![DEVIATOR_DOWN],
                DEVIATOR_DOWN => return vec![DEVIATOR_COMMON],
                _ => {}
            }
        }

        let up = self.is_up_on() && self.has_central_connector;
        let down = self.is_down_on();
        let mut result = Vec::with_capacity(2);
        match contact {
            DEVIATOR_COMMON => {
                if up {
                    result.push(DEVIATOR_UP);
                }
                if down {
                    result.push(DEVIATOR_DOWN);
                }
            }
            DEVIATOR_UP if up => {
                result.push(DEVIATOR_COMMON);
                if down {
                    result.push(DEVIATOR_DOWN);
                }
            }
            DEVIATOR_DOWN if down => {
                result.push(DEVIATOR_COMMON);
                if up {
                    result.push(DEVIATOR_UP);
                }
            }
            _ => {}
        }
        result
    }
}

/// Which incoming pole a relay coil accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoilPolarity {
    #[default]
    Any,
    FirstPole,
    SecondPole,
}

impl CoilPolarity {
    pub fn accepts(self, pole: CircuitPole) -> bool {
        match self {
            CoilPolarity::Any => true,
            CoilPolarity::FirstPole => pole == CircuitPole::First,
            CoilPolarity::SecondPole => pole == CircuitPole::Second,
        }
    }
}

/// The coil side of a relay: a load that powers one or two relay coils
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RelayCoilNode {
    pub relay: Option<ObjectId>,
    #[serde(default)]
    pub second_connector: bool,
    #[serde(default)]
    pub polarity: CoilPolarity,
    /// Seconds between the coil gaining power and the relay seeing it
    #[serde(default)]
    pub delay_up: f32,
    /// Seconds between the coil losing power and the relay seeing it
    #[serde(default)]
    pub delay_down: f32,
}

/// Axle counter node: routes power to the Free or Occupied output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AxleCounterNode {
    pub counter: Option<ObjectId>,
    /// Mirror of the bound counter's state, refreshed by the world
    #[serde(skip)]
    pub state: Option<AxleCounterState>,
}

impl AxleCounterNode {
    fn power_output(&self) -> Option<usize> {
        match self.state? {
            AxleCounterState::Occupied | AxleCounterState::OccupiedAtStart => {
                Some(AXLE_OCCUPIED_TRACK_OUT)
            }
            AxleCounterState::Free => Some(AXLE_FREE_TRACK_OUT),
            _ => None,
        }
    }
}

/// Progress of a timed command node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CommandPhase {
    #[default]
    Off,
    Waiting,
    PerformingAction,
    Retry,
    Done,
}

/// A load that, once powered, drives a lever or button after a delay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandNode {
    pub object: Option<ObjectId>,
    /// Seconds before the action
    #[serde(default = "default_command_delay")]
    pub delay: f32,
    /// Lever position or button state index to reach
    #[serde(default)]
    pub target_position: i32,
    #[serde(skip)]
    pub phase: CommandPhase,
}

fn default_command_delay() -> f32 {
    COMMAND_DEFAULT_DELAY
}

impl Default for CommandNode {
    fn default() -> Self {
        Self {
            object: None,
            delay: COMMAND_DEFAULT_DELAY,
            target_position: 0,
            phase: CommandPhase::Off,
        }
    }
}

/// Contacts whose circuits no longer hold under the current state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactSelection {
    Nothing,
    All,
    Only(Vec<usize>),
}

/// The closed set of node variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    PowerSource {
        #[serde(default)]
        enabled: bool,
    },
    /// Four contacts joined together; 0 means no contact is disabled
    SimpleJunction {
        #[serde(default)]
        disabled_contact: usize,
    },
    OnOffSwitch {
        #[serde(default)]
        on: bool,
    },
    Deviator(DeviatorNode),
    PolarityInversion,
    RelayCoil(RelayCoilNode),
    AxleCounter(AxleCounterNode),
    Turnout {
        turnout: Option<ObjectId>,
    },
    Command(CommandNode),
    Lamp,
    /// Conducts anode to cathode on the first pole and back on the second
    Diode,
}

impl NodeKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::PowerSource { .. } => "power_source",
            NodeKind::SimpleJunction { .. } => "simple_junction",
            NodeKind::OnOffSwitch { .. } => "on_off_switch",
            NodeKind::Deviator(_) => "deviator",
            NodeKind::PolarityInversion => "polarity_inversion",
            NodeKind::RelayCoil(_) => "relay_coil",
            NodeKind::AxleCounter(_) => "axle_counter",
            NodeKind::Turnout { .. } => "turnout",
            NodeKind::Command(_) => "command",
            NodeKind::Lamp => "lamp",
            NodeKind::Diode => "diode",
        }
    }

    pub fn contact_count(&self) -> usize {
        match self {
            NodeKind::PowerSource { .. } | NodeKind::Command(_) | NodeKind::Lamp => 1,
            NodeKind::OnOffSwitch { .. }
            | NodeKind::PolarityInversion
            | NodeKind::RelayCoil(_)
            | NodeKind::Turnout { .. }
            | NodeKind::Diode => 2,
            NodeKind::Deviator(_) => 3,
            NodeKind::SimpleJunction { .. } | NodeKind::AxleCounter(_) => 4,
        }
    }

    /// Loads are preferably passed once per circuit
    pub fn is_electric_load(&self) -> bool {
        matches!(
            self,
            NodeKind::RelayCoil(_)
                | NodeKind::AxleCounter(_)
                | NodeKind::Turnout { .. }
                | NodeKind::Command(_)
                | NodeKind::Lamp
        )
    }

    pub fn is_source_node(&self) -> bool {
        matches!(self, NodeKind::PowerSource { .. })
    }

    /// Objects this node reads its state from
    pub fn bound_object(&self) -> Option<ObjectId> {
        match self {
            NodeKind::Deviator(dev) => dev.control.object(),
            NodeKind::RelayCoil(coil) => coil.relay,
            NodeKind::AxleCounter(ac) => ac.counter,
            NodeKind::Turnout { turnout } => *turnout,
            NodeKind::Command(cmd) => cmd.object,
            _ => None,
        }
    }

    /// Where power entering `contact` on `pole` goes next
    pub fn route_from(&self, contact: usize, pole: CircuitPole) -> Vec<(usize, CircuitPole)> {
        if contact >= self.contact_count() {
            return Vec::new();
        }

        match self {
            NodeKind::PowerSource { .. } => Vec::new(),
            NodeKind::SimpleJunction { disabled_contact } => {
                let enabled = |c: usize| *disabled_contact == 0 || c != *disabled_contact;
                if !enabled(contact) {
                    return Vec::new();
                }
                (0..4)
                    .filter(|other| *other != contact && enabled(*other))
                    .map(|other| (other, pole))
                    .collect()
            }
            NodeKind::OnOffSwitch { on } => {
                if *on {
                    vec![(1 - contact, pole)]
                } else {
                    Vec::new()
                }
            }
            NodeKind::Deviator(dev) => dev
                .route(contact, pole)
                .into_iter()
                .map(|c| (c, pole))
                .collect(),
            NodeKind::PolarityInversion => vec![(1 - contact, !pole)],
            NodeKind::RelayCoil(coil) => {
                if coil.relay.is_none() || (contact == 1 && !coil.second_connector) {
                    return Vec::new();
                }
                if !coil.polarity.accepts(pole) {
                    return Vec::new();
                }
                vec![(contact, !pole)]
            }
            NodeKind::AxleCounter(ac) => {
                if ac.counter.is_none() {
                    return Vec::new();
                }
                match contact {
                    AXLE_RESET_IN => vec![(AXLE_RESET_IN, !pole)],
                    AXLE_POWER_IN => ac.power_output().map(|out| vec![(out, pole)]).unwrap_or_default(),
                    out if ac.power_output() == Some(out) => vec![(AXLE_POWER_IN, pole)],
                    _ => Vec::new(),
                }
            }
            NodeKind::Turnout { turnout } => {
                if turnout.is_some() {
                    vec![(contact, !pole)]
                } else {
                    Vec::new()
                }
            }
            NodeKind::Command(_) | NodeKind::Lamp => vec![(contact, !pole)],
            NodeKind::Diode => match (contact, pole) {
                (DIODE_ANODE, CircuitPole::First) => vec![(DIODE_CATHODE, pole)],
                (DIODE_CATHODE, CircuitPole::Second) => vec![(DIODE_ANODE, pole)],
                _ => Vec::new(),
            },
        }
    }

    /// Contacts whose existing circuits must be cut before re-seeding
    pub fn non_conducting_contacts(&self) -> ContactSelection {
        match self {
            NodeKind::PowerSource { enabled } => {
                if *enabled {
                    ContactSelection::Nothing
                } else {
                    ContactSelection::All
                }
            }
            NodeKind::SimpleJunction { disabled_contact } => {
                if *disabled_contact == 0 {
                    ContactSelection::Nothing
                } else {
                    ContactSelection::Only(vec![*disabled_contact])
                }
            }
            NodeKind::OnOffSwitch { on } => {
                if *on {
                    ContactSelection::Nothing
                } else {
                    ContactSelection::All
                }
            }
            NodeKind::Deviator(dev) => match (dev.is_up_on(), dev.is_down_on()) {
                (false, false) => ContactSelection::All,
                (false, true) => ContactSelection::Only(vec![DEVIATOR_UP]),
                (true, false) => ContactSelection::Only(vec![DEVIATOR_DOWN]),
                (true, true) => ContactSelection::Nothing,
            },
            NodeKind::RelayCoil(coil) => {
                if coil.relay.is_none() {
                    ContactSelection::All
                } else if !coil.second_connector {
                    ContactSelection::Only(vec![1])
                } else {
                    ContactSelection::Nothing
                }
            }
            NodeKind::AxleCounter(ac) => {
                if ac.counter.is_none() {
                    return ContactSelection::Only(vec![
                        AXLE_FREE_TRACK_OUT,
                        AXLE_OCCUPIED_TRACK_OUT,
                        AXLE_RESET_IN,
                    ]);
                }
                let mut contacts = Vec::with_capacity(2);
                if ac.power_output() != Some(AXLE_FREE_TRACK_OUT) {
                    contacts.push(AXLE_FREE_TRACK_OUT);
                }
                if ac.power_output() != Some(AXLE_OCCUPIED_TRACK_OUT) {
                    contacts.push(AXLE_OCCUPIED_TRACK_OUT);
                }
                ContactSelection::Only(contacts)
            }
            NodeKind::Turnout { turnout } => {
                if turnout.is_some() {
                    ContactSelection::Nothing
                } else {
                    ContactSelection::All
                }
            }
            NodeKind::PolarityInversion | NodeKind::Command(_) | NodeKind::Lamp | NodeKind::Diode => {
                ContactSelection::Nothing
            }
        }
    }
}
