//! # lifx_lights_rs
//!
//! An async Rust client for LIFX bulbs behind first-generation LAN gateways.
//!
//! The client finds gateways with a UDP broadcast, keeps one TCP control
//! connection open to each of them, and tracks every bulb and tag group the
//! gateways report. Commands are routed to all bulbs, a list of bulbs, or a
//! group, and go out without waiting for the bulbs to answer; answers come
//! back as [`Event`]s and as updates to the bulb registry.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use lifx_lights_rs::{Client, ClientConfig, Hsbk, Selection};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::start(ClientConfig::default());
//!
//!     // give the gateways a moment to report their bulbs
//!     tokio::time::sleep(Duration::from_secs(3)).await;
//!     println!("bulbs: {:?}", client.list_bulbs(None));
//!
//!     client.lights_on(Selection::All)?;
//!     client.set_color("kitchen", Hsbk::from_degrees(240.0, 1.0, 0.8), 1000)?;
//!     client.close();
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Discovery**: gateways are found with a periodic broadcast, see [`discovery`]
//! - **Persistent connections**: one TCP connection per gateway, reconnected
//!   according to a [`ReconnectPolicy`]
//! - **Registry**: bulbs by name or address, groups by label, see [`Client::bulbs`]
//! - **Commands**: power, color and status requests aimed by [`Selection`]
//! - **Events**: a broadcast stream of [`Event`]s, see [`Client::subscribe`]
//! - **Codec**: the raw frame format is available as [`Packet`]
//!
//! ## Communication
//!
//! Discovery uses UDP port 56700. Each gateway announces the TCP port of its
//! control service; all commands and replies travel over that connection.
//!
//! ## Logging
//!
//! Diagnostics go through the [`log`] facade. With [`Client::set_debug`] on,
//! every frame is logged in hex at debug level, tagged `U+`/`U-` for UDP and
//! `T+`/`T-` for TCP.

mod address;
mod bulb;
mod client;
mod config;
pub mod connection;
pub mod discovery;
mod dispatch;
mod errors;
mod events;
mod packet;
mod registry;
mod types;

// Re-export public API
pub use address::Address;
pub use bulb::{Bulb, BulbState};
pub use client::{Client, GatewayStatus};
pub use config::{ClientConfig, DEFAULT_PORT, DebugFlag, ReconnectPolicy};
pub use connection::{ConnectionState, FrameSink, GatewayConnection, InboundChunk};
pub use discovery::GatewayDescriptor;
pub use dispatch::{Selection, Target};
pub use errors::{DecodeError, Error};
pub use events::{Event, EventBus};
pub use packet::{
    HEADER_SIZE, Header, LightState, MAX_PAYLOAD_SIZE, Packet, PacketType, Payload, stamp_site,
    stamp_target,
};
pub use registry::{Gateway, Registry};
pub use types::{Hsbk, PowerMode};
