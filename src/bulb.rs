//! Bulb records held by the registry.

use serde::Serialize;

use crate::address::Address;
use crate::packet::LightState;
use crate::types::{Hsbk, PowerMode};

/// The last light state a bulb reported, without its label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BulbState {
    color: Hsbk,
    dim: i16,
    power: u16,
    tags: u64,
}

impl BulbState {
    pub fn color(&self) -> Hsbk {
        self.color
    }

    pub fn dim(&self) -> i16 {
        self.dim
    }

    /// Raw power level as reported (0 is off).
    pub fn power_level(&self) -> u16 {
        self.power
    }

    pub fn power(&self) -> PowerMode {
        PowerMode::from_word(self.power)
    }

    /// Tag bitmask at the time of this report.
    pub fn tags(&self) -> u64 {
        self.tags
    }
}

impl From<&LightState> for BulbState {
    fn from(state: &LightState) -> Self {
        BulbState {
            color: state.color,
            dim: state.dim,
            power: state.power,
            tags: state.tags,
        }
    }
}

/// A bulb seen through one of the gateways.
///
/// Bulbs are keyed by their lower-cased display name; the address is what
/// commands are aimed at. Records handed out by the registry are copies and
/// do not follow later updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bulb {
    address: Address,
    name: String,
    state: BulbState,
}

impl Bulb {
    pub(crate) fn new(address: Address, name: &str, state: BulbState) -> Self {
        Bulb {
            address,
            name: name.to_lowercase(),
            state,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Lower-cased display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &BulbState {
        &self.state
    }

    pub(crate) fn update_state(&mut self, state: BulbState) {
        self.state = state;
    }
}
