//! Client configuration and reconnect policy.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

/// Well-known UDP discovery port, also the usual control port.
pub const DEFAULT_PORT: u16 = 56700;

/// How a gateway connection behaves after its socket closes.
///
/// An explicit [`crate::Client::close`] always stops reconnection, whatever
/// the policy.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Reconnect at once, with no delay. A gateway that refuses connections
    /// will be retried in a tight loop.
    Immediate,
    /// Wait `initial` before the first retry and double the delay on each
    /// consecutive failure, up to `max`.
    Backoff {
        #[serde_as(as = "DurationMilliSeconds<u64>")]
        initial: Duration,
        #[serde_as(as = "DurationMilliSeconds<u64>")]
        max: Duration,
    },
    /// Stay disconnected once the socket closes.
    Never,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Backoff {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (0-based), or `None`
    /// if no attempt should be made.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use lifx_lights_rs::ReconnectPolicy;
    ///
    /// let policy = ReconnectPolicy::Backoff {
    ///     initial: Duration::from_millis(100),
    ///     max: Duration::from_millis(500),
    /// };
    /// assert_eq!(policy.delay(0), Some(Duration::from_millis(100)));
    /// assert_eq!(policy.delay(2), Some(Duration::from_millis(400)));
    /// assert_eq!(policy.delay(10), Some(Duration::from_millis(500)));
    /// assert_eq!(ReconnectPolicy::Immediate.delay(7), Some(Duration::ZERO));
    /// assert_eq!(ReconnectPolicy::Never.delay(0), None);
    /// ```
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        match self {
            ReconnectPolicy::Immediate => Some(Duration::ZERO),
            ReconnectPolicy::Backoff { initial, max } => {
                let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
                Some(initial.saturating_mul(factor).min(*max))
            }
            ReconnectPolicy::Never => None,
        }
    }
}

/// Settings threaded through [`crate::Client::start`].
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// UDP port used for discovery, both for binding and as broadcast target.
    pub port: u16,
    /// Local address the discovery socket binds to.
    pub bind_addr: Ipv4Addr,
    /// Where discovery requests are sent.
    pub broadcast_addr: Ipv4Addr,
    /// Period between discovery requests.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub discovery_interval: Duration,
    pub reconnect: ReconnectPolicy,
    /// Log every frame in hex.
    pub debug: bool,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            port: DEFAULT_PORT,
            bind_addr: Ipv4Addr::UNSPECIFIED,
            broadcast_addr: Ipv4Addr::BROADCAST,
            discovery_interval: Duration::from_millis(1000),
            reconnect: ReconnectPolicy::default(),
            debug: false,
            event_capacity: 1024,
        }
    }
}

/// Shared switch for hex frame logging, flipped at runtime by
/// [`crate::Client::set_debug`].
#[derive(Debug, Clone, Default)]
pub struct DebugFlag(Arc<AtomicBool>);

impl DebugFlag {
    pub fn new(enabled: bool) -> Self {
        DebugFlag(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Relaxed);
    }
}
