//! Binary frame codec.
//!
//! Every frame starts with a fixed 36-byte little-endian preamble:
//!
//! | offset | size | field                        |
//! |--------|------|------------------------------|
//! | 0      | 2    | total frame size             |
//! | 2      | 2    | protocol / flag word         |
//! | 4      | 4    | reserved                     |
//! | 8      | 6    | target (bulb) address        |
//! | 14     | 2    | reserved                     |
//! | 16     | 6    | site (gateway) address       |
//! | 22     | 2    | reserved                     |
//! | 24     | 8    | timestamp                    |
//! | 32     | 2    | packet type                  |
//! | 34     | 2    | reserved                     |
//!
//! The payload follows at offset 36 and its shape depends on the packet type.
//! Nothing here performs I/O.

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;
use strum::IntoEnumIterator;
use strum_macros::EnumIter;

use crate::address::Address;
use crate::errors::DecodeError;
use crate::types::{Hsbk, PowerMode};

type Result<T> = std::result::Result<T, DecodeError>;

/// Size of the fixed preamble; also the minimum decodable frame.
pub const HEADER_SIZE: usize = 36;

/// Protocol word of a broadcast discovery request.
pub const PROTOCOL_DISCOVERY: u16 = 0x5400;
/// Protocol word of every other outbound frame.
pub const PROTOCOL_COMMAND: u16 = 0x3400;

/// Service id a gateway announces for its TCP control channel.
pub const SERVICE_TCP: u8 = 1;

/// Largest payload a frame can carry; the size field is 16 bits wide.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize - HEADER_SIZE;

const LABEL_SIZE: usize = 32;

const SIZE_OFFSET: usize = 0;
const PROTOCOL_OFFSET: usize = 2;
const TARGET_OFFSET: usize = 8;
const SITE_OFFSET: usize = 16;
const TIMESTAMP_OFFSET: usize = 24;
const TYPE_OFFSET: usize = 32;

/// Packet type codes understood by this crate.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum PacketType {
    GetPanGateway = 0x02,
    PanGateway = 0x03,
    GetPowerState = 0x14,
    SetPowerState = 0x15,
    PowerState = 0x16,
    GetTags = 0x1a,
    Tags = 0x1c,
    GetTagLabels = 0x1d,
    TagLabels = 0x1f,
    GetLightState = 0x65,
    SetLightColor = 0x66,
    LightStatus = 0x6b,
}

impl PacketType {
    pub fn from_code(code: u16) -> Option<Self> {
        PacketType::iter().find(|t| t.code() == code)
    }

    pub fn code(&self) -> u16 {
        *self as u16
    }
}

/// The decoded preamble of a frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Header {
    pub size: u16,
    pub protocol: u16,
    pub target: Address,
    pub site: Address,
    pub timestamp: u64,
    pub packet_type: u16,
}

/// Light state reported by a bulb.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LightState {
    pub color: Hsbk,
    pub dim: i16,
    pub power: u16,
    pub label: String,
    pub tags: u64,
}

/// Type-specific frame contents, one variant per packet type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    GetPanGateway,
    /// Gateway announcement: the service offered and the port it listens on.
    PanGateway { service: u8, port: u32 },
    GetPowerState,
    SetPowerState { power: PowerMode },
    PowerState { level: u16 },
    GetTags,
    Tags { tags: u64 },
    GetTagLabels { tags: u64 },
    TagLabels { tags: u64, label: String },
    GetLightState,
    /// Change color; `stream` is the stream marker (normally 0) and
    /// `fade_time` is in milliseconds.
    SetLightColor { stream: u8, color: Hsbk, fade_time: u32 },
    LightStatus(LightState),
    /// A type code this crate does not interpret, or a known code whose
    /// payload was too short to decode. The payload bytes are kept as-is.
    /// On encode, bytes past [`MAX_PAYLOAD_SIZE`] are dropped.
    Unknown { packet_type: u16, payload: Vec<u8> },
}

impl Payload {
    pub fn packet_type(&self) -> u16 {
        let known = match self {
            Payload::GetPanGateway => PacketType::GetPanGateway,
            Payload::PanGateway { .. } => PacketType::PanGateway,
            Payload::GetPowerState => PacketType::GetPowerState,
            Payload::SetPowerState { .. } => PacketType::SetPowerState,
            Payload::PowerState { .. } => PacketType::PowerState,
            Payload::GetTags => PacketType::GetTags,
            Payload::Tags { .. } => PacketType::Tags,
            Payload::GetTagLabels { .. } => PacketType::GetTagLabels,
            Payload::TagLabels { .. } => PacketType::TagLabels,
            Payload::GetLightState => PacketType::GetLightState,
            Payload::SetLightColor { .. } => PacketType::SetLightColor,
            Payload::LightStatus(_) => PacketType::LightStatus,
            Payload::Unknown { packet_type, .. } => return *packet_type,
        };
        known.code()
    }

    fn encoded_len(&self) -> usize {
        match self {
            Payload::GetPanGateway
            | Payload::GetPowerState
            | Payload::GetTags
            | Payload::GetLightState => 0,
            Payload::PanGateway { .. } => 5,
            Payload::SetPowerState { .. } | Payload::PowerState { .. } => 2,
            Payload::Tags { .. } | Payload::GetTagLabels { .. } => 8,
            Payload::TagLabels { .. } => 8 + LABEL_SIZE,
            Payload::SetLightColor { .. } => 13,
            Payload::LightStatus(_) => 12 + LABEL_SIZE + 8,
            Payload::Unknown { payload, .. } => payload.len().min(MAX_PAYLOAD_SIZE),
        }
    }

    fn write(&self, buf: &mut [u8]) {
        match self {
            Payload::GetPanGateway
            | Payload::GetPowerState
            | Payload::GetTags
            | Payload::GetLightState => {}
            Payload::PanGateway { service, port } => {
                buf[0] = *service;
                LittleEndian::write_u32(&mut buf[1..5], *port);
            }
            Payload::SetPowerState { power } => LittleEndian::write_u16(&mut buf[0..2], power.word()),
            Payload::PowerState { level } => LittleEndian::write_u16(&mut buf[0..2], *level),
            Payload::Tags { tags } | Payload::GetTagLabels { tags } => {
                LittleEndian::write_u64(&mut buf[0..8], *tags)
            }
            Payload::TagLabels { tags, label } => {
                LittleEndian::write_u64(&mut buf[0..8], *tags);
                write_label(&mut buf[8..8 + LABEL_SIZE], label);
            }
            Payload::SetLightColor {
                stream,
                color,
                fade_time,
            } => {
                buf[0] = *stream;
                write_hsbk(&mut buf[1..9], color);
                LittleEndian::write_u32(&mut buf[9..13], *fade_time);
            }
            Payload::LightStatus(state) => {
                write_hsbk(&mut buf[0..8], &state.color);
                LittleEndian::write_i16(&mut buf[8..10], state.dim);
                LittleEndian::write_u16(&mut buf[10..12], state.power);
                write_label(&mut buf[12..12 + LABEL_SIZE], &state.label);
                LittleEndian::write_u64(&mut buf[44..52], state.tags);
            }
            Payload::Unknown { payload, .. } => buf.copy_from_slice(&payload[..buf.len()]),
        }
    }

    fn read(packet_type: u16, buf: &[u8]) -> Payload {
        let unknown = || Payload::Unknown {
            packet_type,
            payload: buf.to_vec(),
        };
        let Some(known) = PacketType::from_code(packet_type) else {
            return unknown();
        };

        let needed = match known {
            PacketType::GetPanGateway
            | PacketType::GetPowerState
            | PacketType::GetTags
            | PacketType::GetLightState => 0,
            PacketType::PanGateway => 5,
            PacketType::SetPowerState | PacketType::PowerState => 2,
            PacketType::Tags | PacketType::GetTagLabels => 8,
            PacketType::TagLabels => 8 + LABEL_SIZE,
            PacketType::SetLightColor => 13,
            PacketType::LightStatus => 12 + LABEL_SIZE + 8,
        };
        if buf.len() < needed {
            return unknown();
        }

        match known {
            PacketType::GetPanGateway => Payload::GetPanGateway,
            PacketType::PanGateway => Payload::PanGateway {
                service: buf[0],
                port: LittleEndian::read_u32(&buf[1..5]),
            },
            PacketType::GetPowerState => Payload::GetPowerState,
            PacketType::SetPowerState => Payload::SetPowerState {
                power: PowerMode::from_word(LittleEndian::read_u16(&buf[0..2])),
            },
            PacketType::PowerState => Payload::PowerState {
                level: LittleEndian::read_u16(&buf[0..2]),
            },
            PacketType::GetTags => Payload::GetTags,
            PacketType::Tags => Payload::Tags {
                tags: LittleEndian::read_u64(&buf[0..8]),
            },
            PacketType::GetTagLabels => Payload::GetTagLabels {
                tags: LittleEndian::read_u64(&buf[0..8]),
            },
            PacketType::TagLabels => Payload::TagLabels {
                tags: LittleEndian::read_u64(&buf[0..8]),
                label: read_label(&buf[8..8 + LABEL_SIZE]),
            },
            PacketType::GetLightState => Payload::GetLightState,
            PacketType::SetLightColor => Payload::SetLightColor {
                stream: buf[0],
                color: read_hsbk(&buf[1..9]),
                fade_time: LittleEndian::read_u32(&buf[9..13]),
            },
            PacketType::LightStatus => Payload::LightStatus(LightState {
                color: read_hsbk(&buf[0..8]),
                dim: LittleEndian::read_i16(&buf[8..10]),
                power: LittleEndian::read_u16(&buf[10..12]),
                label: read_label(&buf[12..12 + LABEL_SIZE]),
                tags: LittleEndian::read_u64(&buf[44..52]),
            }),
        }
    }
}

/// A decoded frame: preamble plus typed payload.
///
/// Packets are plain values; decoding never borrows from the input buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Packet {
    pub header: Header,
    pub payload: Payload,
}

impl Packet {
    /// Build an outbound packet with zeroed addresses.
    ///
    /// # Examples
    ///
    /// ```
    /// use lifx_lights_rs::{Packet, Payload, PowerMode};
    ///
    /// let bytes = Packet::set_power_state(PowerMode::On).encode();
    /// assert_eq!(bytes.len(), 38);
    /// assert_eq!(&bytes[36..], &[0xff, 0xff]);
    ///
    /// let packet = Packet::decode(&bytes).unwrap();
    /// assert_eq!(packet.payload, Payload::SetPowerState { power: PowerMode::On });
    /// ```
    pub fn new(payload: Payload) -> Self {
        let protocol = match payload {
            Payload::GetPanGateway => PROTOCOL_DISCOVERY,
            _ => PROTOCOL_COMMAND,
        };
        Packet {
            header: Header {
                size: frame_size(&payload),
                protocol,
                target: Address::ZERO,
                site: Address::ZERO,
                timestamp: 0,
                packet_type: payload.packet_type(),
            },
            payload,
        }
    }

    /// Broadcast request asking gateways to announce themselves.
    pub fn discovery_request() -> Self {
        Packet::new(Payload::GetPanGateway)
    }

    pub fn get_light_state() -> Self {
        Packet::new(Payload::GetLightState)
    }

    pub fn set_power_state(power: PowerMode) -> Self {
        Packet::new(Payload::SetPowerState { power })
    }

    pub fn set_light_color(color: Hsbk, fade_time: u32) -> Self {
        Packet::new(Payload::SetLightColor {
            stream: 0,
            color,
            fade_time,
        })
    }

    pub fn get_tag_labels(tags: u64) -> Self {
        Packet::new(Payload::GetTagLabels { tags })
    }

    pub fn with_target(mut self, target: Address) -> Self {
        self.header.target = target;
        self
    }

    pub fn with_site(mut self, site: Address) -> Self {
        self.header.site = site;
        self
    }

    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_code(self.header.packet_type)
    }

    /// Serialize to wire bytes. The size field always reflects the bytes
    /// actually produced, whatever `header.size` holds.
    pub fn encode(&self) -> Vec<u8> {
        let size = frame_size(&self.payload);
        let mut buf = vec![0u8; usize::from(size)];

        LittleEndian::write_u16(&mut buf[SIZE_OFFSET..], size);
        LittleEndian::write_u16(&mut buf[PROTOCOL_OFFSET..], self.header.protocol);
        buf[TARGET_OFFSET..TARGET_OFFSET + Address::LEN].copy_from_slice(self.header.target.as_bytes());
        buf[SITE_OFFSET..SITE_OFFSET + Address::LEN].copy_from_slice(self.header.site.as_bytes());
        LittleEndian::write_u64(&mut buf[TIMESTAMP_OFFSET..], self.header.timestamp);
        LittleEndian::write_u16(&mut buf[TYPE_OFFSET..], self.payload.packet_type());

        self.payload.write(&mut buf[HEADER_SIZE..]);
        buf
    }

    /// Parse wire bytes.
    ///
    /// Fails only when the buffer cannot hold the preamble. If the size
    /// field is plausible, bytes beyond it are ignored; otherwise the whole
    /// buffer is taken as the frame.
    pub fn decode(bytes: &[u8]) -> Result<Packet> {
        if bytes.len() < HEADER_SIZE {
            return Err(DecodeError::TooShort {
                len: bytes.len(),
                min: HEADER_SIZE,
            });
        }

        let header = Header {
            size: LittleEndian::read_u16(&bytes[SIZE_OFFSET..]),
            protocol: LittleEndian::read_u16(&bytes[PROTOCOL_OFFSET..]),
            target: read_address(&bytes[TARGET_OFFSET..]),
            site: read_address(&bytes[SITE_OFFSET..]),
            timestamp: LittleEndian::read_u64(&bytes[TIMESTAMP_OFFSET..]),
            packet_type: LittleEndian::read_u16(&bytes[TYPE_OFFSET..]),
        };

        let declared = header.size as usize;
        let end = if (HEADER_SIZE..=bytes.len()).contains(&declared) {
            declared
        } else {
            bytes.len()
        };
        let payload = Payload::read(header.packet_type, &bytes[HEADER_SIZE..end]);

        Ok(Packet { header, payload })
    }
}

fn frame_size(payload: &Payload) -> u16 {
    u16::try_from(HEADER_SIZE + payload.encoded_len()).unwrap_or(u16::MAX)
}

/// Overwrite the site address of an encoded frame in place.
///
/// Frames shorter than the preamble are left untouched.
pub fn stamp_site(frame: &mut [u8], site: &Address) {
    stamp(frame, SITE_OFFSET, site);
}

/// Overwrite the target address of an encoded frame in place.
///
/// Frames shorter than the preamble are left untouched.
pub fn stamp_target(frame: &mut [u8], target: &Address) {
    stamp(frame, TARGET_OFFSET, target);
}

fn stamp(frame: &mut [u8], offset: usize, address: &Address) {
    if frame.len() < HEADER_SIZE {
        return;
    }
    frame[offset..offset + Address::LEN].copy_from_slice(address.as_bytes());
}

/// Lower-case hex rendering of a frame for verbose logs.
pub(crate) fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn read_address(buf: &[u8]) -> Address {
    let mut bytes = [0u8; Address::LEN];
    bytes.copy_from_slice(&buf[..Address::LEN]);
    Address(bytes)
}

fn write_hsbk(buf: &mut [u8], color: &Hsbk) {
    LittleEndian::write_u16(&mut buf[0..2], color.hue);
    LittleEndian::write_u16(&mut buf[2..4], color.saturation);
    LittleEndian::write_u16(&mut buf[4..6], color.brightness);
    LittleEndian::write_u16(&mut buf[6..8], color.kelvin);
}

fn read_hsbk(buf: &[u8]) -> Hsbk {
    Hsbk {
        hue: LittleEndian::read_u16(&buf[0..2]),
        saturation: LittleEndian::read_u16(&buf[2..4]),
        brightness: LittleEndian::read_u16(&buf[4..6]),
        kelvin: LittleEndian::read_u16(&buf[6..8]),
    }
}

// Labels are NUL-padded; longer labels are cut at a char boundary.
fn write_label(buf: &mut [u8], label: &str) {
    let mut end = label.len().min(buf.len());
    while !label.is_char_boundary(end) {
        end -= 1;
    }
    buf[..end].copy_from_slice(&label.as_bytes()[..end]);
}

fn read_label(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> Address {
        Address([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff])
    }

    fn bulb() -> Address {
        Address([0x11, 0x22, 0x33, 0x44, 0x55, 0x66])
    }

    fn roundtrip(packet: Packet) -> Packet {
        Packet::decode(&packet.encode()).unwrap()
    }

    #[test]
    fn test_discovery_request_bytes() {
        let bytes = Packet::discovery_request().encode();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[0..4], &[0x24, 0x00, 0x00, 0x54]);
        assert_eq!(bytes[32], 0x02);
        assert!(bytes[8..24].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_set_light_color_layout() {
        let color = Hsbk::new(0x1234, 0x5678, 0x9abc, 0x0dac);
        let bytes = Packet::set_light_color(color, 0x0102_0304)
            .with_target(bulb())
            .with_site(site())
            .encode();

        assert_eq!(bytes.len(), HEADER_SIZE + 13);
        assert_eq!(LittleEndian::read_u16(&bytes[0..2]), 49);
        assert_eq!(LittleEndian::read_u16(&bytes[2..4]), PROTOCOL_COMMAND);
        assert_eq!(&bytes[8..14], bulb().as_bytes());
        assert_eq!(&bytes[16..22], site().as_bytes());
        assert_eq!(bytes[32], 0x66);
        assert_eq!(
            &bytes[36..],
            &[0x00, 0x34, 0x12, 0x78, 0x56, 0xbc, 0x9a, 0xac, 0x0d, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn test_set_power_words() {
        let on = Packet::set_power_state(PowerMode::On).encode();
        let off = Packet::set_power_state(PowerMode::Off).encode();
        assert_eq!(&on[36..], &[0xff, 0xff]);
        assert_eq!(&off[36..], &[0x00, 0x00]);
        assert_eq!(on[32], 0x15);
    }

    #[test]
    fn test_command_roundtrips() {
        let commands = [
            Packet::discovery_request(),
            Packet::get_light_state().with_target(bulb()),
            Packet::set_power_state(PowerMode::Off).with_site(site()),
            Packet::set_power_state(PowerMode::On),
            Packet::set_light_color(Hsbk::new(65535, 0, 32768, 9000), 3500),
            Packet::get_tag_labels(0x8000_0000_0000_0001),
        ];
        for packet in commands {
            assert_eq!(roundtrip(packet.clone()), packet);
        }
    }

    #[test]
    fn test_decode_light_status() {
        let state = LightState {
            color: Hsbk::new(1, 2, 3, 4),
            dim: -5,
            power: 0xffff,
            label: "Kitchen".to_string(),
            tags: 0x01,
        };
        let bytes = Packet::new(Payload::LightStatus(state.clone()))
            .with_target(bulb())
            .with_site(site())
            .encode();
        assert_eq!(bytes.len(), HEADER_SIZE + 52);
        assert_eq!(bytes[32], 0x6b);

        let packet = Packet::decode(&bytes).unwrap();
        assert_eq!(packet.header.target, bulb());
        assert_eq!(packet.header.site, site());
        assert_eq!(packet.packet_type(), Some(PacketType::LightStatus));
        assert_eq!(packet.payload, Payload::LightStatus(state));
    }

    #[test]
    fn test_decode_pan_gateway() {
        let mut bytes = vec![0u8; HEADER_SIZE + 5];
        bytes[0] = 41;
        bytes[16..22].copy_from_slice(site().as_bytes());
        bytes[32] = 0x03;
        bytes[36] = SERVICE_TCP;
        LittleEndian::write_u32(&mut bytes[37..41], 56700);

        let packet = Packet::decode(&bytes).unwrap();
        assert_eq!(packet.header.site, site());
        assert_eq!(
            packet.payload,
            Payload::PanGateway {
                service: SERVICE_TCP,
                port: 56700
            }
        );
    }

    #[test]
    fn test_decode_tag_labels() {
        let packet = Packet::new(Payload::TagLabels {
            tags: 0x04,
            label: "Living Room".to_string(),
        });
        assert_eq!(roundtrip(packet.clone()).payload, packet.payload);
    }

    #[test]
    fn test_long_label_is_truncated() {
        let label = "x".repeat(40);
        let packet = Packet::new(Payload::TagLabels { tags: 1, label });
        let Payload::TagLabels { label, .. } = roundtrip(packet).payload else {
            panic!("wrong payload kind");
        };
        assert_eq!(label.len(), 32);
    }

    #[test]
    fn test_unknown_type_is_opaque() {
        let mut bytes = vec![0u8; HEADER_SIZE + 3];
        bytes[0] = 39;
        bytes[32] = 0x99;
        bytes[33] = 0x01;
        bytes[36..].copy_from_slice(&[7, 8, 9]);

        let packet = Packet::decode(&bytes).unwrap();
        assert_eq!(packet.packet_type(), None);
        assert_eq!(
            packet.payload,
            Payload::Unknown {
                packet_type: 0x0199,
                payload: vec![7, 8, 9]
            }
        );
        assert_eq!(packet.encode(), bytes);
    }

    #[test]
    fn test_truncated_known_payload_is_opaque() {
        let mut bytes = Packet::get_tag_labels(5).encode();
        bytes.truncate(HEADER_SIZE + 3);
        let packet = Packet::decode(&bytes).unwrap();
        assert!(matches!(packet.payload, Payload::Unknown { packet_type: 0x1d, .. }));
    }

    #[test]
    fn test_trailing_bytes_beyond_size_are_ignored() {
        let mut bytes = Packet::set_power_state(PowerMode::On).encode();
        bytes.extend_from_slice(&[0xde, 0xad]);
        let packet = Packet::decode(&bytes).unwrap();
        assert_eq!(packet.payload, Payload::SetPowerState { power: PowerMode::On });
    }

    #[test]
    fn test_oversized_unknown_payload_is_cut() {
        let packet = Packet::new(Payload::Unknown {
            packet_type: 0x200,
            payload: vec![7; 70_000],
        });
        assert_eq!(packet.header.size, u16::MAX);

        let bytes = packet.encode();
        assert_eq!(bytes.len(), usize::from(u16::MAX));
        assert_eq!(LittleEndian::read_u16(&bytes[0..2]), u16::MAX);

        let decoded = Packet::decode(&bytes).unwrap();
        assert!(matches!(
            decoded.payload,
            Payload::Unknown { payload, .. } if payload.len() == MAX_PAYLOAD_SIZE
        ));
    }

    #[test]
    fn test_short_buffer_fails() {
        let err = Packet::decode(&[0u8; 35]).unwrap_err();
        assert_eq!(err, DecodeError::TooShort { len: 35, min: 36 });
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0x00, 0x54, 0xff]), "0054ff");
    }

    #[test]
    fn test_stamp_addresses() {
        let mut bytes = Packet::get_light_state().encode();
        stamp_site(&mut bytes, &site());
        stamp_target(&mut bytes, &bulb());
        let packet = Packet::decode(&bytes).unwrap();
        assert_eq!(packet.header.site, site());
        assert_eq!(packet.header.target, bulb());

        let mut short = vec![0u8; 10];
        stamp_site(&mut short, &site());
        assert_eq!(short, vec![0u8; 10]);
    }
}
