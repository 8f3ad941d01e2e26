//! Power mode for light control.

use serde::{Deserialize, Serialize};

/// Power state for a bulb.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    /// Turn the light on
    On,
    /// Turn the light off
    Off,
}

impl PowerMode {
    const ON_WORD: u16 = 0xFFFF;
    const OFF_WORD: u16 = 0x0000;

    /// The on/off word carried by set-power frames.
    ///
    /// # Examples
    ///
    /// ```
    /// use lifx_lights_rs::PowerMode;
    ///
    /// assert_eq!(PowerMode::On.word(), 0xFFFF);
    /// assert_eq!(PowerMode::Off.word(), 0);
    /// ```
    pub fn word(&self) -> u16 {
        match self {
            PowerMode::On => Self::ON_WORD,
            PowerMode::Off => Self::OFF_WORD,
        }
    }

    /// Interpret a power word received from a bulb. Any non-zero level is on.
    pub fn from_word(word: u16) -> Self {
        if word == Self::OFF_WORD {
            PowerMode::Off
        } else {
            PowerMode::On
        }
    }
}

impl From<bool> for PowerMode {
    fn from(on: bool) -> Self {
        if on { PowerMode::On } else { PowerMode::Off }
    }
}
