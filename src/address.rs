//! Six-byte site and target addresses.

use std::fmt;
use std::str::FromStr;

use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::errors::Error;

/// A 6-byte protocol address.
///
/// The protocol uses the same representation for two things: the *site*
/// address that scopes a gateway's network, and the *target* address of an
/// individual bulb. Addresses compare as raw bytes; their text form is
/// lower-case, colon-separated hex, and parsing accepts either case with or
/// without separators.
///
/// # Examples
///
/// ```
/// use lifx_lights_rs::Address;
///
/// let addr: Address = "AA:BB:CC:DD:EE:FF".parse().unwrap();
/// assert_eq!(addr, "aabbccddeeff".parse().unwrap());
/// assert_eq!(addr.to_string(), "aa:bb:cc:dd:ee:ff");
/// ```
#[derive(
    Default, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr,
)]
pub struct Address(pub [u8; Address::LEN]);

impl Address {
    pub const LEN: usize = 6;

    /// The all-zero address, used when a frame is not aimed at one bulb.
    pub const ZERO: Address = Address([0; Address::LEN]);

    pub fn new(bytes: [u8; Address::LEN]) -> Self {
        Address(bytes)
    }

    /// Copy an address out of the first six bytes of `bytes`.
    ///
    /// Returns `None` if fewer than six bytes are available.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; Address::LEN] = bytes.get(..Address::LEN)?.try_into().ok()?;
        Some(Address(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; Address::LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == Address::ZERO
    }
}

impl From<[u8; Address::LEN]> for Address {
    fn from(bytes: [u8; Address::LEN]) -> Self {
        Address(bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let digits: Vec<u8> = s
            .bytes()
            .filter(|b| !matches!(b, b':' | b'-'))
            .collect();
        if digits.len() != Address::LEN * 2 || !digits.iter().all(u8::is_ascii_hexdigit) {
            return Err(Error::InvalidAddress(s.to_string()));
        }

        let mut bytes = [0u8; Address::LEN];
        for (slot, pair) in bytes.iter_mut().zip(digits.chunks(2)) {
            *slot = (hex_value(pair[0]) << 4) | hex_value(pair[1]);
        }
        Ok(Address(bytes))
    }
}

// Caller guarantees an ASCII hex digit.
fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}
