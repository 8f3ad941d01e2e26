//! Persistent TCP control connection to one gateway.
//!
//! Each connection runs as its own task:
//!
//! ```text
//! disconnected -> connecting -> connected -> closing -> disconnected
//!                     ^             |
//!                     |             v (socket closed, reconnect allowed)
//!                     +------- reconnecting
//! ```
//!
//! Inbound reads are forwarded as-is: every chunk returned by the socket is
//! treated as one frame. Outbound frames are queued and written in order
//! once the socket is connected, so sending never waits on the network.
//! The queue holds at most [`OUTBOUND_QUEUE_SIZE`] frames; while a gateway
//! is unreachable, frames beyond that are refused.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use log::{debug, info, warn};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time;

use crate::address::Address;
use crate::config::{DebugFlag, ReconnectPolicy};
use crate::errors::Error;
use crate::packet;
use crate::registry::Gateway;

type Result<T> = std::result::Result<T, Error>;

const READ_BUFFER_SIZE: usize = 4096;

/// Frames a connection holds while waiting for its socket.
pub const OUTBOUND_QUEUE_SIZE: usize = 256;

/// Where a gateway connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Reconnecting,
}

/// Bytes read from a gateway, tagged with the gateway they came from.
#[derive(Debug, Clone)]
pub struct InboundChunk {
    pub gateway: Ipv4Addr,
    pub bytes: Vec<u8>,
}

/// Anything encoded frames can be pushed into.
///
/// The site address is part of the sink, not the frame: implementations
/// stamp their own site into every frame they accept.
pub trait FrameSink {
    fn site(&self) -> Address;

    /// Queue a frame for writing, with this sink's site address stamped
    /// over whatever the frame carried.
    fn send(&self, frame: Vec<u8>) -> Result<()>;
}

/// Handle to one gateway's control connection.
///
/// Dropping the handle shuts the connection down for good.
#[derive(Debug)]
pub struct GatewayConnection {
    gateway: Gateway,
    outbound: mpsc::Sender<Vec<u8>>,
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<ConnectionState>,
}

impl GatewayConnection {
    /// Open a connection to `gateway` and keep it open according to
    /// `policy`. Every chunk read is pushed into `inbound`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(
        gateway: &Gateway,
        policy: ReconnectPolicy,
        inbound: mpsc::UnboundedSender<InboundChunk>,
        verbose: DebugFlag,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let task = ConnectionTask {
            addr: SocketAddrV4::new(gateway.ip, gateway.port),
            policy,
            outbound: outbound_rx,
            shutdown: shutdown_rx,
            state: state_tx,
            inbound,
            verbose,
        };
        tokio::spawn(task.run());

        GatewayConnection {
            gateway: gateway.clone(),
            outbound: outbound_tx,
            shutdown: shutdown_tx,
            state: state_rx,
        }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Follow state transitions as they happen.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Stop reconnecting and end the socket. Frames still queued are
    /// dropped. Calling it again has no effect.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow() || self.outbound.is_closed()
    }
}

impl FrameSink for GatewayConnection {
    fn site(&self) -> Address {
        self.gateway.site
    }

    fn send(&self, mut frame: Vec<u8>) -> Result<()> {
        if *self.shutdown.borrow() {
            return Err(Error::Closed);
        }
        packet::stamp_site(&mut frame, &self.gateway.site);
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::QueueFull(self.gateway.ip),
            mpsc::error::TrySendError::Closed(_) => Error::Closed,
        })
    }
}

enum Served {
    /// The socket went away; reconnect if allowed.
    Lost,
    /// The connection was closed on purpose or its owner is gone.
    Finished,
}

struct ConnectionTask {
    addr: SocketAddrV4,
    policy: ReconnectPolicy,
    outbound: mpsc::Receiver<Vec<u8>>,
    shutdown: watch::Receiver<bool>,
    state: watch::Sender<ConnectionState>,
    inbound: mpsc::UnboundedSender<InboundChunk>,
    verbose: DebugFlag,
}

impl ConnectionTask {
    async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            self.state.send_replace(ConnectionState::Connecting);
            debug!("connecting to {}", self.addr);

            let connected = tokio::select! {
                result = TcpStream::connect(SocketAddr::V4(self.addr)) => Some(result),
                _ = closed(&mut self.shutdown) => None,
            };
            match connected {
                None => break,
                Some(Ok(stream)) => {
                    info!("connected to gateway {}", self.addr);
                    attempt = 0;
                    self.state.send_replace(ConnectionState::Connected);
                    if let Served::Finished = self.serve(stream).await {
                        break;
                    }
                    debug!("connection to {} lost", self.addr);
                }
                Some(Err(e)) => warn!("TCP connect to {} failed: {e}", self.addr),
            }

            if *self.shutdown.borrow() {
                break;
            }
            let Some(delay) = self.policy.delay(attempt) else {
                break;
            };
            attempt = attempt.saturating_add(1);
            self.state.send_replace(ConnectionState::Reconnecting);

            if !delay.is_zero() {
                debug!("reconnecting to {} in {delay:?}", self.addr);
                tokio::select! {
                    _ = time::sleep(delay) => {}
                    _ = closed(&mut self.shutdown) => break,
                }
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        debug!("connection to {} is down", self.addr);
    }

    async fn serve(&mut self, stream: TcpStream) -> Served {
        let (mut reader, mut writer) = stream.into_split();
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];

        loop {
            tokio::select! {
                read = reader.read(&mut buffer) => match read {
                    Ok(0) => return Served::Lost,
                    Ok(size) => {
                        let bytes = buffer[..size].to_vec();
                        if self.verbose.get() {
                            debug!(" T- {}", packet::to_hex(&bytes));
                        }
                        let chunk = InboundChunk { gateway: *self.addr.ip(), bytes };
                        if self.inbound.send(chunk).is_err() {
                            return Served::Finished;
                        }
                    }
                    Err(e) => {
                        warn!("TCP client error on {}: {e}", self.addr);
                        return Served::Lost;
                    }
                },
                frame = self.outbound.recv() => {
                    let Some(frame) = frame else {
                        return Served::Finished;
                    };
                    if self.verbose.get() {
                        debug!(" T+ {}", packet::to_hex(&frame));
                    }
                    if let Err(e) = writer.write_all(&frame).await {
                        warn!("TCP write to {} failed: {e}", self.addr);
                        return Served::Lost;
                    }
                }
                _ = closed(&mut self.shutdown) => {
                    self.state.send_replace(ConnectionState::Closing);
                    if let Err(e) = writer.shutdown().await {
                        debug!("TCP shutdown of {} failed: {e}", self.addr);
                    }
                    return Served::Finished;
                }
            }
        }
    }
}

// Resolves once close() was called or the handle was dropped.
async fn closed(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}
