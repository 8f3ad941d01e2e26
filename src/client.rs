//! The client: discovery, gateway connections and the registry, wired
//! together behind one handle.
//!
//! A single engine task owns every registry update. Discovery and the
//! gateway connections feed it through channels; public queries read the
//! registry snapshot it maintains.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::address::Address;
use crate::bulb::Bulb;
use crate::config::{ClientConfig, DebugFlag};
use crate::connection::{ConnectionState, FrameSink, GatewayConnection, InboundChunk};
use crate::discovery::{self, GatewayDescriptor};
use crate::dispatch::{Selection, dispatch};
use crate::errors::Error;
use crate::events::{Event, EventBus};
use crate::packet::Packet;
use crate::registry::{Gateway, Registry};
use crate::types::{Hsbk, PowerMode};

type Result<T> = std::result::Result<T, Error>;

/// A gateway together with the state of its control connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayStatus {
    #[serde(flatten)]
    pub gateway: Gateway,
    pub state: ConnectionState,
}

#[derive(Debug)]
struct Shared {
    config: ClientConfig,
    registry: RwLock<Registry>,
    connections: RwLock<Vec<GatewayConnection>>,
    events: EventBus,
    verbose: DebugFlag,
    closed: AtomicBool,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Handle to a running LIFX LAN client.
///
/// Commands return as soon as their frames are queued on the gateway
/// connections, with the number of frames queued. Replies arrive later as
/// [`Event`]s and registry updates.
///
/// Dropping the client shuts it down like [`Client::close`].
///
/// # Examples
///
/// ```no_run
/// use lifx_lights_rs::{Client, ClientConfig, Hsbk, Selection};
///
/// # async fn run() -> Result<(), lifx_lights_rs::Error> {
/// let client = Client::start(ClientConfig::default());
/// let mut events = client.subscribe();
///
/// // wait for the first bulb to show up
/// while let Ok(event) = events.recv().await {
///     if let lifx_lights_rs::Event::Bulb(bulb) = event {
///         client.set_color(&bulb, Hsbk::from_degrees(0.0, 1.0, 1.0), 500)?;
///         break;
///     }
/// }
/// client.lights_on(Selection::All)?;
/// client.close();
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Client {
    shared: Arc<Shared>,
    found: mpsc::UnboundedSender<GatewayDescriptor>,
    discovery: Mutex<Option<JoinHandle<()>>>,
    engine: JoinHandle<()>,
}

impl Client {
    /// Create a client without starting discovery. Gateways can still be
    /// fed in through [`Client::observe_gateway`].
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ClientConfig) -> Self {
        let shared = Arc::new(Shared {
            registry: RwLock::new(Registry::new()),
            connections: RwLock::new(Vec::new()),
            events: EventBus::new(config.event_capacity),
            verbose: DebugFlag::new(config.debug),
            closed: AtomicBool::new(false),
            config,
        });
        let (found_tx, found_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let engine = Engine {
            shared: shared.clone(),
            found: found_rx,
            inbound: inbound_rx,
            inbound_tx,
        };

        Client {
            shared,
            found: found_tx,
            discovery: Mutex::new(None),
            engine: tokio::spawn(engine.run()),
        }
    }

    /// Create a client and start discovering gateways right away.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: ClientConfig) -> Self {
        let client = Client::new(config);
        client.start_discovery();
        client
    }

    /// Start the periodic discovery broadcast. Does nothing if discovery is
    /// already running or the client is closed.
    pub fn start_discovery(&self) {
        let mut discovery = lock(&self.discovery);
        if self.shared.is_closed() {
            warn!("client is closed, not starting discovery");
            return;
        }
        if discovery.is_none() {
            *discovery = Some(discovery::spawn(
                &self.shared.config,
                self.found.clone(),
                self.shared.verbose.clone(),
            ));
        }
    }

    /// Hand a gateway to the client as if discovery had found it.
    ///
    /// A gateway whose IP is already known is ignored.
    pub fn observe_gateway(&self, desc: GatewayDescriptor) {
        if self.found.send(desc).is_err() {
            warn!("engine is gone, dropping gateway");
        }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.events.subscribe()
    }

    /// Switch hex logging of every frame on or off.
    pub fn set_debug(&self, enabled: bool) {
        self.shared.verbose.set(enabled);
    }

    pub fn is_debug(&self) -> bool {
        self.shared.verbose.get()
    }

    pub fn lights_on(&self, selection: impl Into<Selection>) -> Result<usize> {
        self.send(Packet::set_power_state(PowerMode::On), &selection.into())
    }

    pub fn lights_off(&self, selection: impl Into<Selection>) -> Result<usize> {
        self.send(Packet::set_power_state(PowerMode::Off), &selection.into())
    }

    /// Ask the selected bulbs to report their light state.
    pub fn request_status(&self, selection: impl Into<Selection>) -> Result<usize> {
        self.send(Packet::get_light_state(), &selection.into())
    }

    /// Fade the selected bulbs to `color` over `fade_time` milliseconds.
    pub fn set_color(
        &self,
        selection: impl Into<Selection>,
        color: Hsbk,
        fade_time: u32,
    ) -> Result<usize> {
        self.send(Packet::set_light_color(color, fade_time), &selection.into())
    }

    /// Ask every gateway for the labels of the groups in the `tags` mask.
    pub fn get_tag_labels(&self, tags: u64) -> Result<usize> {
        self.send(Packet::get_tag_labels(tags), &Selection::All)
    }

    /// Ask every gateway to report all of its bulbs.
    pub fn find_bulbs(&self) -> Result<usize> {
        self.request_status(Selection::All)
    }

    /// Refresh bulb state from the network.
    ///
    /// Without a group every bulb is asked and an empty list comes back.
    /// With a group only its members are asked, and their names are
    /// returned; an unknown group asks nobody.
    pub fn poll_bulbs(&self, group: Option<&str>) -> Result<Vec<String>> {
        let Some(label) = group else {
            self.find_bulbs()?;
            return Ok(Vec::new());
        };
        self.request_status(Selection::group(label))?;
        Ok(read(&self.shared.registry).bulb_names_in_group(label))
    }

    /// Names of the known bulbs, sorted, or of one group's members.
    pub fn list_bulbs(&self, group: Option<&str>) -> Vec<String> {
        let registry = read(&self.shared.registry);
        match group {
            Some(label) => registry.bulb_names_in_group(label),
            None => registry.bulb_names(),
        }
    }

    /// Like [`Client::list_bulbs`], with full bulb records.
    pub fn bulbs(&self, group: Option<&str>) -> Vec<Bulb> {
        let registry = read(&self.shared.registry);
        match group {
            Some(label) => registry.bulbs_in_group(label),
            None => registry.bulbs(),
        }
    }

    pub fn bulb(&self, name: &str) -> Option<Bulb> {
        read(&self.shared.registry).bulb(name)
    }

    pub fn bulb_by_address(&self, address: &Address) -> Option<Bulb> {
        read(&self.shared.registry).bulb_by_address(address)
    }

    /// Labels of the groups whose label has been received, sorted.
    pub fn groups(&self) -> Vec<String> {
        read(&self.shared.registry).group_labels()
    }

    /// Every gateway found so far, in discovery order.
    pub fn gateways(&self) -> Vec<GatewayStatus> {
        read(&self.shared.connections)
            .iter()
            .map(|conn| GatewayStatus {
                gateway: conn.gateway().clone(),
                state: conn.state(),
            })
            .collect()
    }

    /// Snapshot of the whole client state as JSON.
    pub fn diagnostics(&self) -> Value {
        let gateways = self.gateways();
        let registry = read(&self.shared.registry);
        let labels: Vec<Value> = registry
            .group_labels()
            .into_iter()
            .map(|label| json!({ "label": label, "tags": registry.group_tag(&label) }))
            .collect();
        let groups: Vec<Value> = registry
            .groups()
            .into_iter()
            .map(|(tags, members)| json!({ "tags": tags, "members": members }))
            .collect();

        json!({
            "debug": self.is_debug(),
            "closed": self.is_closed(),
            "subscribers": self.shared.events.subscriber_count(),
            "gateways": gateways,
            "bulbs": registry.bulbs(),
            "groups": groups,
            "group_labels": labels,
        })
    }

    /// Stop discovery and close every gateway connection for good.
    ///
    /// Commands issued afterwards fail with [`Error::Closed`]; queries keep
    /// answering from the last known state.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = lock(&self.discovery).take() {
            task.abort();
        }
        for conn in write(&self.shared.connections).iter() {
            conn.close();
        }
        info!("client closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    fn send(&self, packet: Packet, selection: &Selection) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let targets = selection.resolve(&read(&self.shared.registry))?;
        let frame = packet.encode();
        let connections = read(&self.shared.connections);
        Ok(dispatch(&frame, connections.iter(), targets.as_deref()))
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
        self.engine.abort();
    }
}

struct Engine {
    shared: Arc<Shared>,
    found: mpsc::UnboundedReceiver<GatewayDescriptor>,
    inbound: mpsc::UnboundedReceiver<InboundChunk>,
    inbound_tx: mpsc::UnboundedSender<InboundChunk>,
}

impl Engine {
    async fn run(mut self) {
        loop {
            tokio::select! {
                Some(desc) = self.found.recv() => self.on_gateway(desc),
                Some(chunk) = self.inbound.recv() => self.on_chunk(chunk),
                else => break,
            }
        }
        debug!("engine stopped");
    }

    fn on_gateway(&self, desc: GatewayDescriptor) {
        let mut connections = write(&self.shared.connections);
        if self.shared.is_closed() {
            debug!("client is closed, ignoring gateway {}", desc.ip);
            return;
        }
        let Some(gateway) = write(&self.shared.registry).observe_gateway(desc) else {
            return;
        };
        info!(
            "found gateway {} on port {} for site {}",
            gateway.ip, gateway.port, gateway.site
        );

        let conn = GatewayConnection::connect(
            &gateway,
            self.shared.config.reconnect,
            self.inbound_tx.clone(),
            self.shared.verbose.clone(),
        );
        if let Err(e) = conn.send(Packet::get_light_state().encode()) {
            warn!("initial light state request to {} failed: {e}", gateway.ip);
        }
        connections.push(conn);
        drop(connections);

        self.shared.events.publish(Event::Gateway(gateway));
    }

    fn on_chunk(&self, chunk: InboundChunk) {
        let packet = match Packet::decode(&chunk.bytes) {
            Ok(packet) => packet,
            Err(e) => {
                if self.shared.verbose.get() {
                    debug!("ignoring frame from {}: {e}", chunk.gateway);
                }
                return;
            }
        };

        let events = {
            let mut registry = write(&self.shared.registry);
            let Some(gateway) = registry.gateway(chunk.gateway) else {
                debug!("frame from unknown gateway {}", chunk.gateway);
                return;
            };
            registry.handle_packet(&packet, &gateway)
        };

        for event in events {
            if let Event::Tag(tags) = event {
                self.request_tag_labels(tags);
            }
            self.shared.events.publish(event);
        }
    }

    fn request_tag_labels(&self, tags: u64) {
        if self.shared.is_closed() {
            return;
        }
        if self.shared.verbose.get() {
            debug!("asking for labels of tag {tags:#x}");
        }
        let frame = Packet::get_tag_labels(tags).encode();
        dispatch(&frame, read(&self.shared.connections).iter(), None);
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;

    use crate::packet::{self, LightState, Payload};

    async fn fake_gateway() -> (TcpListener, GatewayDescriptor) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let desc = GatewayDescriptor {
            ip: Ipv4Addr::LOCALHOST,
            port: listener.local_addr().unwrap().port(),
            site: Address([0xaa; 6]),
        };
        (listener, desc)
    }

    async fn read_packet(stream: &mut TcpStream) -> Packet {
        let mut header = [0u8; packet::HEADER_SIZE];
        timeout(Duration::from_secs(5), stream.read_exact(&mut header))
            .await
            .unwrap()
            .unwrap();
        let size = u16::from_le_bytes([header[0], header[1]]) as usize;
        let mut frame = header.to_vec();
        frame.resize(size, 0);
        stream.read_exact(&mut frame[packet::HEADER_SIZE..]).await.unwrap();
        Packet::decode(&frame).unwrap()
    }

    async fn next_event(events: &mut broadcast::Receiver<Event>, pred: impl Fn(&Event) -> bool) -> Event {
        timeout(Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.unwrap();
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("event not published")
    }

    fn status(target: &str, label: &str, tags: u64) -> Vec<u8> {
        Packet::new(Payload::LightStatus(LightState {
            color: Hsbk::new(100, 200, 300, 3500),
            dim: 0,
            power: 0xffff,
            label: label.to_string(),
            tags,
        }))
        .with_target(target.parse().unwrap())
        .encode()
    }

    #[tokio::test]
    async fn test_new_gateway_is_polled_and_published() {
        let client = Client::new(ClientConfig::default());
        let mut events = client.subscribe();
        let (listener, desc) = fake_gateway().await;

        client.observe_gateway(desc.clone());
        let event = next_event(&mut events, |e| matches!(e, Event::Gateway(_))).await;
        assert!(matches!(event, Event::Gateway(gw) if gw.ip == desc.ip));

        let (mut peer, _) = listener.accept().await.unwrap();
        let request = read_packet(&mut peer).await;
        assert!(matches!(request.payload, Payload::GetLightState));
        assert_eq!(request.header.site, desc.site);

        client.observe_gateway(desc);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.gateways().len(), 1);
    }

    #[tokio::test]
    async fn test_status_reports_fill_registry() {
        let client = Client::new(ClientConfig::default());
        let mut events = client.subscribe();
        let (listener, desc) = fake_gateway().await;
        client.observe_gateway(desc);

        let (mut peer, _) = listener.accept().await.unwrap();
        read_packet(&mut peer).await;
        peer.write_all(&status("11:22:33:44:55:66", "Kitchen", 0x01)).await.unwrap();

        next_event(&mut events, |e| matches!(e, Event::BulbState { .. })).await;
        assert_eq!(client.list_bulbs(None), vec!["kitchen".to_string()]);
        let bulb = client.bulb("KITCHEN").unwrap();
        assert_eq!(bulb.state().color().brightness, 300);

        // a new tag makes the engine ask for its labels
        let request = read_packet(&mut peer).await;
        assert!(matches!(request.payload, Payload::GetTagLabels { tags: 0x01 }));
    }

    #[tokio::test]
    async fn test_unknown_target_sends_nothing() {
        let client = Client::new(ClientConfig::default());
        let (_listener, desc) = fake_gateway().await;
        client.observe_gateway(desc);

        assert_eq!(
            client.lights_on(Selection::Bulbs(vec!["nowhere".into()])),
            Err(Error::UnknownBulb("nowhere".to_string()))
        );
    }

    #[tokio::test]
    async fn test_commands_fail_after_close() {
        let client = Client::new(ClientConfig::default());
        client.close();
        client.close();
        assert!(client.is_closed());
        assert_eq!(client.lights_off(Selection::All), Err(Error::Closed));
        assert_eq!(client.poll_bulbs(None), Err(Error::Closed));
        assert!(client.list_bulbs(None).is_empty());
    }

    #[tokio::test]
    async fn test_debug_toggle_and_diagnostics() {
        let client = Client::new(ClientConfig::default());
        assert!(!client.is_debug());
        client.set_debug(true);
        assert!(client.is_debug());

        let diagnostics = client.diagnostics();
        assert_eq!(diagnostics["debug"], json!(true));
        assert_eq!(diagnostics["gateways"], json!([]));
        assert_eq!(diagnostics["bulbs"], json!([]));
    }

    #[tokio::test]
    async fn test_poll_unknown_group_is_empty() {
        let client = Client::new(ClientConfig::default());
        assert_eq!(client.poll_bulbs(Some("attic")), Ok(Vec::new()));
        assert!(client.bulbs(Some("attic")).is_empty());
        assert!(client.groups().is_empty());
    }
}
