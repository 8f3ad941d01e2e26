//! Hue, saturation, brightness and kelvin color representation.

use serde::{Deserialize, Serialize};

/// A color as the bulbs understand it.
///
/// Hue, saturation and brightness are full-range 16-bit values (`0..=65535`);
/// kelvin is the white point used when saturation is low. These are the raw
/// wire values, no scaling happens on encode or decode.
#[derive(Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Hsbk {
    pub hue: u16,
    pub saturation: u16,
    pub brightness: u16,
    pub kelvin: u16,
}

impl Hsbk {
    const DEFAULT_KELVIN: u16 = 3500;

    pub fn new(hue: u16, saturation: u16, brightness: u16, kelvin: u16) -> Self {
        Hsbk {
            hue,
            saturation,
            brightness,
            kelvin,
        }
    }

    /// An unsaturated white at the given brightness and color temperature.
    pub fn white(brightness: u16, kelvin: u16) -> Self {
        Hsbk::new(0, 0, brightness, kelvin)
    }

    /// Build a color from a hue angle in degrees and saturation/brightness
    /// fractions, clamping out-of-range inputs.
    ///
    /// # Examples
    ///
    /// ```
    /// use lifx_lights_rs::Hsbk;
    ///
    /// let red = Hsbk::from_degrees(0.0, 1.0, 1.0);
    /// assert_eq!(red.hue, 0);
    /// assert_eq!(red.saturation, 65535);
    /// assert_eq!(red.brightness, 65535);
    ///
    /// let cyan = Hsbk::from_degrees(180.0, 0.5, 0.25);
    /// assert_eq!(cyan.hue, 32768);
    /// ```
    pub fn from_degrees(hue: f32, saturation: f32, brightness: f32) -> Self {
        let hue = hue.rem_euclid(360.0);
        Hsbk {
            hue: ((hue / 360.0) * 65536.0).min(65535.0) as u16,
            saturation: scale_fraction(saturation),
            brightness: scale_fraction(brightness),
            kelvin: Self::DEFAULT_KELVIN,
        }
    }
}

fn scale_fraction(value: f32) -> u16 {
    (value.clamp(0.0, 1.0) * 65535.0).round() as u16
}
