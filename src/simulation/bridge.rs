//! Remote protocol bridge
//!
//! Fixed little-endian binary frames exchanged with a train-control
//! network: `[opcode u8][size u8][payload]`, where size counts the whole
//! frame. Only final node and object state crosses this boundary.

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use std::collections::VecDeque;
use std::io::Write;

const OP_POWER: u8 = 1;
const OP_SENSOR_CHANGED: u8 = 3;
const OP_ACCESSORY_SET_STATE: u8 = 4;

const POWER_SIZE: u8 = 3;
const CHANNEL_ADDRESS_SIZE: u8 = 7;

/// Accessory state values carried by `AccessorySetState`
pub const ACCESSORY_STATE_NORMAL: u8 = 1;
pub const ACCESSORY_STATE_REVERSE: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatorMessage {
    Power { on: bool },
    SensorChanged { channel: u16, address: u16, value: u8 },
    AccessorySetState { channel: u16, address: u16, state: u8 },
}

impl SimulatorMessage {
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            SimulatorMessage::Power { on } => vec![OP_POWER, POWER_SIZE, u8::from(on)],
            SimulatorMessage::SensorChanged {
                channel,
                address,
                value,
            } => encode_channel_address(OP_SENSOR_CHANGED, channel, address, value),
            SimulatorMessage::AccessorySetState {
                channel,
                address,
                state,
            } => encode_channel_address(OP_ACCESSORY_SET_STATE, channel, address, state),
        }
    }

    /// Decodes one frame from the start of `bytes`.
    /// Returns the message and the number of bytes consumed.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < 2 {
            bail!("Frame header truncated ({} bytes)", bytes.len());
        }
        let op = bytes[0];
        let size = bytes[1];
        let expected = match op {
            OP_POWER => POWER_SIZE,
            OP_SENSOR_CHANGED | OP_ACCESSORY_SET_STATE => CHANNEL_ADDRESS_SIZE,
            other => bail!("Unknown opcode {}", other),
        };
        if size != expected {
            bail!("Opcode {} expects size {}, frame says {}", op, expected, size);
        }
        let frame = bytes
            .get(..usize::from(size))
            .with_context(|| format!("Frame truncated: need {} bytes, have {}", size, bytes.len()))?;

        let message = match op {
            OP_POWER => SimulatorMessage::Power { on: frame[2] != 0 },
            _ => {
                let channel = u16::from_le_bytes([frame[2], frame[3]]);
                let address = u16::from_le_bytes([frame[4], frame[5]]);
                let value = frame[6];
                if op == OP_SENSOR_CHANGED {
                    SimulatorMessage::SensorChanged {
                        channel,
                        address,
                        value,
                    }
                } else {
                    SimulatorMessage::AccessorySetState {
                        channel,
                        address,
                        state: value,
                    }
                }
            }
        };
        Ok((message, usize::from(size)))
    }
}

fn encode_channel_address(op: u8, channel: u16, address: u16, value: u8) -> Vec<u8> {
    let mut frame = Vec::with_capacity(usize::from(CHANNEL_ADDRESS_SIZE));
    frame.push(op);
    frame.push(CHANNEL_ADDRESS_SIZE);
    frame.extend_from_slice(&channel.to_le_bytes());
    frame.extend_from_slice(&address.to_le_bytes());
    frame.push(value);
    frame
}

/// Outbound queue and inbound frame buffer
#[derive(Debug, Default)]
pub struct RemoteBridge {
    outbound: VecDeque<SimulatorMessage>,
    inbound: Vec<u8>,
}

impl RemoteBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&mut self, message: SimulatorMessage) {
        debug!("Bridge out: {:?}", message);
        self.outbound.push_back(message);
    }

    pub fn pending(&self) -> impl Iterator<Item = &SimulatorMessage> {
        self.outbound.iter()
    }

    pub fn take_outbound(&mut self) -> Vec<SimulatorMessage> {
        self.outbound.drain(..).collect()
    }

    /// Writes every queued frame to the sink
    pub fn flush_to(&mut self, sink: &mut impl Write) -> Result<usize> {
        let mut written = 0;
        while let Some(message) = self.outbound.pop_front() {
            let frame = message.encode();
            sink.write_all(&frame)
                .with_context(|| format!("Failed to write {:?}", message))?;
            written += frame.len();
        }
        sink.flush().context("Failed to flush bridge sink")?;
        Ok(written)
    }

    /// Buffers received bytes and returns every complete frame.
    ///
    /// A malformed frame drops the buffered bytes and is reported as an
    /// error.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<SimulatorMessage>> {
        self.inbound.extend_from_slice(bytes);
        let mut messages = Vec::new();
        loop {
            if self.inbound.len() < 2 {
                break;
            }
            let size = usize::from(self.inbound[1]);
            if size >= 2 && self.inbound.len() < size {
                break;
            }
            match SimulatorMessage::decode(&self.inbound) {
                Ok((message, used)) => {
                    self.inbound.drain(..used);
                    messages.push(message);
                }
                Err(err) => {
                    warn!("Dropping {} bridge bytes: {:#}", self.inbound.len(), err);
                    self.inbound.clear();
                    return Err(err);
                }
            }
        }
        Ok(messages)
    }
}
