//! The table of known gateways, bulbs and tag groups.

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;

use log::{debug, info};
use serde::Serialize;

use crate::address::Address;
use crate::bulb::{Bulb, BulbState};
use crate::discovery::GatewayDescriptor;
use crate::events::Event;
use crate::packet::{LightState, Packet, Payload};

/// A gateway the registry knows about. Identified by its IP address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Gateway {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub site: Address,
}

impl From<GatewayDescriptor> for Gateway {
    fn from(desc: GatewayDescriptor) -> Self {
        Gateway {
            ip: desc.ip,
            port: desc.port,
            site: desc.site,
        }
    }
}

/// Merge point for everything received from every gateway.
///
/// The registry does no I/O. Feeding it packets returns the events those
/// packets caused; the caller publishes them and reacts to them.
///
/// Group membership is fixed when a bulb is first created, from the tag
/// mask of its first report. Later tag changes on the same bulb do not move
/// it between groups.
#[derive(Debug, Default)]
pub struct Registry {
    gateways: Vec<Gateway>,
    bulbs: BTreeMap<String, Bulb>,
    // members as (registry key, address) at the time they joined
    groups: HashMap<u64, Vec<(String, Address)>>,
    group_labels: BTreeMap<String, u64>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a gateway seen by discovery.
    ///
    /// Returns the new entry, or `None` when a gateway with the same IP is
    /// already known (port and site of the repeat are ignored).
    pub fn observe_gateway(&mut self, desc: GatewayDescriptor) -> Option<Gateway> {
        if self.gateways.iter().any(|gw| gw.ip == desc.ip) {
            return None;
        }
        let gateway = Gateway::from(desc);
        self.gateways.push(gateway.clone());
        Some(gateway)
    }

    /// Merge one packet received from `gateway`.
    ///
    /// Every packet yields at least the generic [`Event::Packet`], which
    /// always comes last.
    pub fn handle_packet(&mut self, packet: &Packet, gateway: &Gateway) -> Vec<Event> {
        let mut events = Vec::new();

        match &packet.payload {
            Payload::LightStatus(state) => {
                self.found_bulb(packet.header.target, state, gateway, &mut events)
            }
            Payload::Tags { tags } => info!("tags: {tags:#x}"),
            Payload::TagLabels { tags, label } => {
                self.group_labels.insert(label.to_lowercase(), *tags);
            }
            _ => {}
        }

        events.push(Event::Packet {
            gateway: gateway.ip,
            packet: packet.clone(),
        });
        events
    }

    fn found_bulb(
        &mut self,
        address: Address,
        reported: &LightState,
        gateway: &Gateway,
        events: &mut Vec<Event>,
    ) {
        let name = reported.label.to_lowercase();
        let state = BulbState::from(reported);
        debug!("bulb {name:?} at {address} reported by gateway {}", gateway.ip);

        if let Some(known) = self
            .bulbs
            .get_mut(&name)
            .filter(|known| known.address() == address)
        {
            known.update_state(state);
            events.push(Event::BulbState {
                bulb: known.clone(),
                state,
            });
            return;
        }

        // Unseen name, or a known name at a new address: the new bulb
        // replaces whatever the name pointed to.
        let bulb = Bulb::new(address, &name, state);
        info!("new bulb {name:?} ({address}) found by gateway {}", gateway.ip);
        self.bulbs.insert(name.clone(), bulb.clone());

        let tags = reported.tags;
        if tags != 0 {
            match self.groups.get_mut(&tags) {
                Some(members) => members.push((name, address)),
                None => {
                    info!("new tag {tags:#x} found");
                    self.groups.insert(tags, vec![(name, address)]);
                    events.push(Event::Tag(tags));
                }
            }
        }

        events.push(Event::Bulb(bulb.clone()));
        events.push(Event::BulbState { bulb, state });
    }

    pub fn gateways(&self) -> Vec<Gateway> {
        self.gateways.clone()
    }

    pub fn gateway(&self, ip: Ipv4Addr) -> Option<Gateway> {
        self.gateways.iter().find(|gw| gw.ip == ip).cloned()
    }

    /// Names of every known bulb, sorted.
    pub fn bulb_names(&self) -> Vec<String> {
        self.bulbs.keys().cloned().collect()
    }

    pub fn bulbs(&self) -> Vec<Bulb> {
        self.bulbs.values().cloned().collect()
    }

    /// Look up a bulb by display name, ignoring case.
    pub fn bulb(&self, name: &str) -> Option<Bulb> {
        self.bulbs.get(&name.to_lowercase()).cloned()
    }

    pub fn bulb_by_address(&self, address: &Address) -> Option<Bulb> {
        self.bulbs
            .values()
            .find(|bulb| bulb.address() == *address)
            .cloned()
    }

    /// Labels of every group whose label is known, sorted.
    pub fn group_labels(&self) -> Vec<String> {
        self.group_labels.keys().cloned().collect()
    }

    /// Tag mask behind a group label, ignoring case.
    pub fn group_tag(&self, label: &str) -> Option<u64> {
        self.group_labels.get(&label.to_lowercase()).copied()
    }

    /// Members of the group with this label, in the order they joined.
    ///
    /// An unknown label yields an empty list. Members whose name has since
    /// been taken over by a bulb at another address are skipped.
    pub fn bulbs_in_group(&self, label: &str) -> Vec<Bulb> {
        let Some(members) = self.group_tag(label).and_then(|tag| self.groups.get(&tag)) else {
            return Vec::new();
        };
        members
            .iter()
            .filter_map(|(name, address)| {
                self.bulbs
                    .get(name)
                    .filter(|bulb| bulb.address() == *address)
                    .cloned()
            })
            .collect()
    }

    pub fn bulb_names_in_group(&self, label: &str) -> Vec<String> {
        self.bulbs_in_group(label)
            .into_iter()
            .map(|bulb| bulb.name().to_string())
            .collect()
    }

    /// Every tag mask seen so far, with member addresses.
    pub fn groups(&self) -> BTreeMap<u64, Vec<Address>> {
        self.groups
            .iter()
            .map(|(tag, members)| (*tag, members.iter().map(|(_, address)| *address).collect()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Hsbk;

    fn gateway() -> Gateway {
        Gateway {
            ip: Ipv4Addr::new(192, 168, 1, 50),
            port: 56700,
            site: "aa:bb:cc:dd:ee:ff".parse().unwrap(),
        }
    }

    fn descriptor(ip: [u8; 4], port: u16, site: u8) -> GatewayDescriptor {
        GatewayDescriptor {
            ip: Ipv4Addr::from(ip),
            port,
            site: Address([site; 6]),
        }
    }

    fn light_status(target: &str, label: &str, tags: u64, brightness: u16) -> Packet {
        Packet::new(Payload::LightStatus(LightState {
            color: Hsbk::new(0, 0, brightness, 3500),
            dim: 0,
            power: 0xffff,
            label: label.to_string(),
            tags,
        }))
        .with_target(target.parse().unwrap())
    }

    fn count(events: &[Event], pred: impl Fn(&Event) -> bool) -> usize {
        events.iter().filter(|e| pred(e)).count()
    }

    #[test]
    fn test_gateway_dedup_by_ip() {
        let mut registry = Registry::new();
        assert!(registry.observe_gateway(descriptor([192, 168, 1, 50], 56700, 1)).is_some());
        assert!(registry.observe_gateway(descriptor([192, 168, 1, 50], 56701, 2)).is_none());
        assert_eq!(registry.gateways().len(), 1);
        assert_eq!(registry.gateways()[0].port, 56700);

        assert!(registry.observe_gateway(descriptor([192, 168, 1, 51], 56700, 1)).is_some());
        assert_eq!(registry.gateways().len(), 2);
    }

    #[test]
    fn test_first_light_status_creates_bulb_and_group() {
        let mut registry = Registry::new();
        let gw = gateway();
        let events = registry.handle_packet(&light_status("11:22:33:44:55:66", "Kitchen", 0x01, 100), &gw);

        assert_eq!(registry.bulb_names(), vec!["kitchen".to_string()]);
        assert_eq!(registry.groups().get(&0x01).map(Vec::len), Some(1));

        assert!(matches!(events[0], Event::Tag(0x01)));
        assert!(matches!(events[1], Event::Bulb(_)));
        assert!(matches!(events[2], Event::BulbState { .. }));
        assert!(matches!(events[3], Event::Packet { .. }));
        assert_eq!(events.len(), 4);
    }

    #[test]
    fn test_replayed_status_is_idempotent() {
        let mut registry = Registry::new();
        let gw = gateway();
        let packet = light_status("11:22:33:44:55:66", "Kitchen", 0x01, 100);

        registry.handle_packet(&packet, &gw);
        let once = registry.bulbs();
        let events = registry.handle_packet(&packet, &gw);

        assert_eq!(registry.bulbs(), once);
        assert_eq!(count(&events, |e| matches!(e, Event::Bulb(_))), 0);
        assert_eq!(count(&events, |e| matches!(e, Event::Tag(_))), 0);
        assert_eq!(count(&events, |e| matches!(e, Event::BulbState { .. })), 1);
        assert_eq!(registry.groups()[&0x01].len(), 1);
    }

    #[test]
    fn test_state_is_replaced_not_merged() {
        let mut registry = Registry::new();
        let gw = gateway();
        registry.handle_packet(&light_status("11:22:33:44:55:66", "Kitchen", 0x01, 100), &gw);
        registry.handle_packet(&light_status("11:22:33:44:55:66", "Kitchen", 0x02, 200), &gw);

        let bulb = registry.bulb("kitchen").unwrap();
        assert_eq!(bulb.state().color().brightness, 200);
        assert_eq!(bulb.state().tags(), 0x02);
        // membership stays where the first report put it
        assert!(!registry.groups().contains_key(&0x02));
    }

    #[test]
    fn test_tag_event_fires_once_per_tag() {
        let mut registry = Registry::new();
        let gw = gateway();
        let first = registry.handle_packet(&light_status("11:22:33:44:55:66", "Kitchen", 0x04, 1), &gw);
        let second = registry.handle_packet(&light_status("11:22:33:44:55:77", "Hall", 0x04, 1), &gw);

        assert_eq!(count(&first, |e| matches!(e, Event::Tag(0x04))), 1);
        assert_eq!(count(&second, |e| matches!(e, Event::Tag(_))), 0);
        assert_eq!(count(&second, |e| matches!(e, Event::Bulb(_))), 1);
        assert_eq!(registry.groups()[&0x04].len(), 2);
    }

    #[test]
    fn test_untagged_bulb_joins_no_group() {
        let mut registry = Registry::new();
        let events = registry.handle_packet(&light_status("11:22:33:44:55:66", "Desk", 0, 1), &gateway());
        assert!(registry.groups().is_empty());
        assert_eq!(count(&events, |e| matches!(e, Event::Tag(_))), 0);
    }

    #[test]
    fn test_lookup_ignores_case() {
        let mut registry = Registry::new();
        registry.handle_packet(&light_status("11:22:33:44:55:66", "Living Room", 0, 1), &gateway());

        let bulb = registry.bulb("living room").unwrap();
        assert_eq!(bulb.name(), "living room");
        assert_eq!(registry.bulb("LIVING ROOM"), Some(bulb.clone()));
        assert_eq!(
            registry.bulb_by_address(&"11:22:33:44:55:66".parse().unwrap()),
            Some(bulb)
        );
    }

    #[test]
    fn test_same_name_new_address_replaces_entry() {
        let mut registry = Registry::new();
        let gw = gateway();
        registry.handle_packet(&light_status("11:22:33:44:55:66", "Kitchen", 0x01, 1), &gw);
        let events = registry.handle_packet(&light_status("66:55:44:33:22:11", "KITCHEN", 0x01, 1), &gw);

        assert_eq!(registry.bulbs().len(), 1);
        let bulb = registry.bulb("kitchen").unwrap();
        assert_eq!(bulb.address(), "66:55:44:33:22:11".parse().unwrap());
        assert_eq!(count(&events, |e| matches!(e, Event::Bulb(_))), 1);
        assert!(registry.bulb_by_address(&"11:22:33:44:55:66".parse().unwrap()).is_none());
    }

    #[test]
    fn test_group_labels() {
        let mut registry = Registry::new();
        let gw = gateway();
        registry.handle_packet(&light_status("11:22:33:44:55:66", "Kitchen", 0x01, 1), &gw);
        registry.handle_packet(&light_status("11:22:33:44:55:77", "Pantry", 0x01, 1), &gw);

        // membership exists before the label does
        assert!(registry.bulbs_in_group("downstairs").is_empty());
        assert!(registry.group_labels().is_empty());

        let labels = Packet::new(Payload::TagLabels {
            tags: 0x01,
            label: "Downstairs".to_string(),
        });
        let events = registry.handle_packet(&labels, &gw);
        assert_eq!(events.len(), 1);

        assert_eq!(registry.group_labels(), vec!["downstairs".to_string()]);
        assert_eq!(
            registry.bulb_names_in_group("Downstairs"),
            vec!["kitchen".to_string(), "pantry".to_string()]
        );
        assert!(registry.bulb_names_in_group("upstairs").is_empty());
    }

    #[test]
    fn test_relabelled_bulb_keeps_both_group_entries() {
        let mut registry = Registry::new();
        let gw = gateway();
        registry.handle_packet(&light_status("11:22:33:44:55:66", "Kitchen", 0x01, 1), &gw);
        registry.handle_packet(&light_status("11:22:33:44:55:66", "Cook", 0x01, 1), &gw);
        registry.handle_packet(
            &Packet::new(Payload::TagLabels {
                tags: 0x01,
                label: "Down".to_string(),
            }),
            &gw,
        );

        assert_eq!(
            registry.bulb_names(),
            vec!["cook".to_string(), "kitchen".to_string()]
        );
        assert_eq!(
            registry.bulb_names_in_group("down"),
            vec!["kitchen".to_string(), "cook".to_string()]
        );
    }

    #[test]
    fn test_group_skips_member_whose_name_moved() {
        let mut registry = Registry::new();
        let gw = gateway();
        registry.handle_packet(&light_status("11:22:33:44:55:66", "Kitchen", 0x01, 1), &gw);
        registry.handle_packet(&light_status("66:55:44:33:22:11", "Kitchen", 0x01, 1), &gw);
        registry.handle_packet(
            &Packet::new(Payload::TagLabels {
                tags: 0x01,
                label: "Down".to_string(),
            }),
            &gw,
        );

        let members = registry.bulbs_in_group("down");
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].address(), "66:55:44:33:22:11".parse().unwrap());
    }

    #[test]
    fn test_other_packets_only_republished() {
        let mut registry = Registry::new();
        let gw = gateway();
        for packet in [
            Packet::new(Payload::Tags { tags: 3 }),
            Packet::new(Payload::PowerState { level: 0 }),
            Packet::new(Payload::Unknown {
                packet_type: 0x200,
                payload: vec![1],
            }),
        ] {
            let events = registry.handle_packet(&packet, &gw);
            assert_eq!(events.len(), 1);
            assert!(matches!(&events[0], Event::Packet { gateway, .. } if *gateway == gw.ip));
        }
        assert!(registry.bulbs().is_empty());
        assert!(registry.groups().is_empty());
    }
}
