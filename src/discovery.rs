//! Gateway discovery via UDP broadcast.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::address::Address;
use crate::config::{ClientConfig, DebugFlag};
use crate::errors::Error;
use crate::packet::{self, Packet, Payload, SERVICE_TCP};

/// A gateway as announced over UDP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayDescriptor {
    /// Sender of the announcement
    pub ip: Ipv4Addr,
    /// Announced TCP control port
    pub port: u16,
    /// Site address from the announcement's preamble
    pub site: Address,
}

/// Turn a received datagram into a gateway descriptor.
///
/// Only gateway announcements for the TCP control service from IPv4 senders
/// qualify; everything else, including undecodable datagrams, gives `None`.
///
/// # Examples
///
/// ```
/// use lifx_lights_rs::{Packet, Payload, discovery::parse_announcement};
///
/// let announcement = Packet::new(Payload::PanGateway { service: 1, port: 56700 })
///     .with_site("aa:bb:cc:dd:ee:ff".parse().unwrap())
///     .encode();
/// let desc = parse_announcement(&announcement, "192.168.1.50:56700".parse().unwrap()).unwrap();
/// assert_eq!(desc.port, 56700);
/// assert_eq!(desc.site.to_string(), "aa:bb:cc:dd:ee:ff");
///
/// let request = Packet::discovery_request().encode();
/// assert!(parse_announcement(&request, "192.168.1.50:56700".parse().unwrap()).is_none());
/// ```
pub fn parse_announcement(bytes: &[u8], from: SocketAddr) -> Option<GatewayDescriptor> {
    let SocketAddr::V4(from) = from else {
        return None;
    };
    let packet = Packet::decode(bytes).ok()?;
    let Payload::PanGateway { service, port } = packet.payload else {
        return None;
    };
    if service != SERVICE_TCP {
        return None;
    }
    let Ok(port) = u16::try_from(port) else {
        warn!("gateway {} announced invalid port {port}", from.ip());
        return None;
    };

    Some(GatewayDescriptor {
        ip: *from.ip(),
        port,
        site: packet.header.site,
    })
}

/// Start the discovery loop.
///
/// Every `discovery_interval` a discovery request is broadcast; every
/// qualifying announcement received is forwarded to `found`. The loop ends
/// when `found` is closed or the task is aborted. A socket that fails to
/// bind, or fails a receive, is rebound on the next tick.
pub(crate) fn spawn(
    config: &ClientConfig,
    found: mpsc::UnboundedSender<GatewayDescriptor>,
    verbose: DebugFlag,
) -> JoinHandle<()> {
    let bind_addr = SocketAddrV4::new(config.bind_addr, config.port);
    let target = SocketAddrV4::new(config.broadcast_addr, config.port);
    let period = config.discovery_interval;

    tokio::spawn(async move {
        let request = Packet::discovery_request().encode();
        let mut socket: Option<UdpSocket> = None;
        let mut buffer = [0u8; 4096];
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if socket.is_none() {
                        socket = bind(bind_addr).await;
                    }
                    let Some(sock) = &socket else { continue };
                    if verbose.get() {
                        debug!(" U+ {}", packet::to_hex(&request));
                    }
                    if let Err(e) = sock.send_to(&request, target).await {
                        warn!("discovery send to {target} failed: {e}");
                    }
                }
                received = recv(socket.as_ref(), &mut buffer) => match received {
                    Ok((size, from)) => {
                        let datagram = &buffer[..size];
                        if verbose.get() {
                            debug!(" U- {}", packet::to_hex(datagram));
                        }
                        if let Some(desc) = parse_announcement(datagram, from)
                            && found.send(desc).is_err()
                        {
                            return;
                        }
                    }
                    Err(e) => recv_failed(&mut socket, e),
                },
            }
        }
    })
}

async fn bind(addr: SocketAddrV4) -> Option<UdpSocket> {
    match try_bind(addr).await {
        Ok(socket) => {
            info!("discovery listening on {addr}");
            Some(socket)
        }
        Err(e) => {
            error!("discovery socket on {addr} unavailable: {e}");
            None
        }
    }
}

async fn try_bind(addr: SocketAddrV4) -> Result<UdpSocket, Error> {
    let socket = UdpSocket::bind(addr)
        .await
        .map_err(|e| Error::socket("bind", e))?;
    socket
        .set_broadcast(true)
        .map_err(|e| Error::socket("set_broadcast", e))?;
    Ok(socket)
}

fn recv_failed(socket: &mut Option<UdpSocket>, e: std::io::Error) {
    warn!("discovery receive failed, rebinding: {e}");
    *socket = None;
}

// Pends forever while there is no socket, so the ticker drives rebinding.
async fn recv(socket: Option<&UdpSocket>, buffer: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
    match socket {
        Some(socket) => socket.recv_from(buffer).await,
        None => std::future::pending().await,
    }
}
