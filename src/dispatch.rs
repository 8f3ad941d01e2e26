//! Routing of outbound command frames to gateways and bulbs.
//!
//! A command is one encoded frame. Without targets it goes out once per
//! gateway, untouched. With targets, each gateway gets one copy per target
//! with the target address written into the frame.

use log::{debug, warn};

use crate::address::Address;
use crate::bulb::Bulb;
use crate::connection::FrameSink;
use crate::errors::Error;
use crate::packet;
use crate::registry::Registry;

type Result<T> = std::result::Result<T, Error>;

/// One bulb a command can be aimed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A raw device address, used as-is.
    Address(Address),
    /// A bulb record, as returned by the client's queries.
    Bulb(Bulb),
    /// A display name, looked up in the registry ignoring case.
    Name(String),
}

impl Target {
    fn resolve(&self, registry: &Registry) -> Result<Address> {
        match self {
            Target::Address(address) => Ok(*address),
            Target::Bulb(bulb) => Ok(bulb.address()),
            Target::Name(name) => registry
                .bulb(name)
                .map(|bulb| bulb.address())
                .ok_or_else(|| Error::UnknownBulb(name.clone())),
        }
    }
}

impl From<Address> for Target {
    fn from(address: Address) -> Self {
        Target::Address(address)
    }
}

impl From<Bulb> for Target {
    fn from(bulb: Bulb) -> Self {
        Target::Bulb(bulb)
    }
}

impl From<&Bulb> for Target {
    fn from(bulb: &Bulb) -> Self {
        Target::Bulb(bulb.clone())
    }
}

impl From<&str> for Target {
    fn from(name: &str) -> Self {
        Target::Name(name.to_string())
    }
}

impl From<String> for Target {
    fn from(name: String) -> Self {
        Target::Name(name)
    }
}

/// Which bulbs a command is for.
///
/// # Examples
///
/// ```
/// use lifx_lights_rs::{Selection, Target};
///
/// assert_eq!(Selection::default(), Selection::All);
/// assert_eq!(
///     Selection::from("kitchen"),
///     Selection::Bulbs(vec![Target::Name("kitchen".to_string())])
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    /// Every bulb behind every gateway.
    #[default]
    All,
    /// These bulbs only. An empty list selects nothing.
    Bulbs(Vec<Target>),
    /// Members of the group with this label. An unknown label selects
    /// nothing.
    Group(String),
}

impl Selection {
    pub fn group(label: &str) -> Self {
        Selection::Group(label.to_string())
    }

    /// Resolve to concrete addresses. `None` means every bulb.
    ///
    /// Fails on the first target that cannot be resolved, before anything
    /// is sent.
    pub(crate) fn resolve(&self, registry: &Registry) -> Result<Option<Vec<Address>>> {
        match self {
            Selection::All => Ok(None),
            Selection::Bulbs(targets) => targets
                .iter()
                .map(|target| target.resolve(registry))
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Selection::Group(label) => Ok(Some(
                registry
                    .bulbs_in_group(label)
                    .iter()
                    .map(Bulb::address)
                    .collect(),
            )),
        }
    }
}

impl From<Target> for Selection {
    fn from(target: Target) -> Self {
        Selection::Bulbs(vec![target])
    }
}

impl From<Address> for Selection {
    fn from(address: Address) -> Self {
        Target::from(address).into()
    }
}

impl From<&Bulb> for Selection {
    fn from(bulb: &Bulb) -> Self {
        Target::from(bulb).into()
    }
}

impl From<&str> for Selection {
    fn from(name: &str) -> Self {
        Target::from(name).into()
    }
}

impl From<Vec<Target>> for Selection {
    fn from(targets: Vec<Target>) -> Self {
        Selection::Bulbs(targets)
    }
}

impl From<Vec<Bulb>> for Selection {
    fn from(bulbs: Vec<Bulb>) -> Self {
        Selection::Bulbs(bulbs.into_iter().map(Target::Bulb).collect())
    }
}

/// Push `frame` through every sink, once per target or once in total when
/// `targets` is `None`.
///
/// Returns the number of frames accepted. A sink that refuses a frame is
/// logged and skipped; the rest still get theirs.
pub(crate) fn dispatch<'a, S, I>(frame: &[u8], sinks: I, targets: Option<&[Address]>) -> usize
where
    S: FrameSink + 'a,
    I: IntoIterator<Item = &'a S>,
{
    let mut sent = 0;
    for sink in sinks {
        match targets {
            None => sent += send(sink, frame.to_vec()),
            Some(targets) => {
                for target in targets {
                    let mut framed = frame.to_vec();
                    packet::stamp_target(&mut framed, target);
                    sent += send(sink, framed);
                }
            }
        }
    }
    debug!("dispatched {sent} frame(s)");
    sent
}

fn send<S: FrameSink>(sink: &S, frame: Vec<u8>) -> usize {
    match sink.send(frame) {
        Ok(()) => 1,
        Err(e) => {
            warn!("send to site {} failed: {e}", sink.site());
            0
        }
    }
}
