/**
 * TOPOLOGY MODEL - Live graph of switches, links and host attachment points
 *
 * ROLE:
 * Holds what discovery told us about the network plus the per-link
 * bandwidth bookkeeping. Discovery events and the lifecycle manager's
 * reserve/release calls are the only writers.
 *
 * INVARIANT:
 * reserved <= capacity on every link, always. `reserve` refuses (and does
 * not mutate) when it would break it.
 *
 * LINK FAILURE:
 * A link going down is only flagged. Its reservation record stays so that a
 * later deactivation releases exactly what was reserved. A link is usable
 * when it is up and both of its switches are up.
 */

use crate::error::TopologyError;
use crate::models::{Bandwidth, Endpoint, Host, LinkId, PortNo, SwitchId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use tracing::{info, warn};

/// Largest accepted link capacity; keeps kbit/s percentage arithmetic in range.
pub const MAX_LINK_CAPACITY_MBPS: u64 = u64::MAX / 100_000;

/// Discovery events delivered by the switch-protocol transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TopologyEvent {
    SwitchJoined {
        switch: SwitchId,
        #[serde(default)]
        ports: Vec<PortNo>,
    },
    SwitchLeft {
        switch: SwitchId,
    },
    LinkUp {
        a: Endpoint,
        b: Endpoint,
        capacity_mbps: u64,
    },
    LinkDown {
        a: Endpoint,
        b: Endpoint,
    },
    HostDiscovered {
        address: Ipv4Addr,
        switch: SwitchId,
        port: PortNo,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct SwitchRecord {
    pub id: SwitchId,
    pub ports: BTreeSet<PortNo>,
    pub up: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkRecord {
    pub id: LinkId,
    pub capacity: Bandwidth,
    pub reserved: Bandwidth,
    pub up: bool,
}

impl LinkRecord {
    pub fn headroom(&self) -> Bandwidth {
        self.capacity.saturating_sub(self.reserved)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TopologyModel {
    switches: BTreeMap<SwitchId, SwitchRecord>,
    links: BTreeMap<LinkId, LinkRecord>,
    hosts: BTreeMap<Ipv4Addr, Host>,
}

impl TopologyModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one discovery event. Returns false when the event was ignored.
    pub fn apply(&mut self, event: &TopologyEvent) -> bool {
        match event {
            TopologyEvent::SwitchJoined { switch, ports } => {
                let record = self.ensure_switch(*switch);
                record.up = true;
                record.ports.extend(ports.iter().copied());
                info!("[topology] switch {} joined", switch);
                true
            }
            TopologyEvent::SwitchLeft { switch } => {
                let Some(record) = self.switches.get_mut(switch) else {
                    warn!("[topology] leave event for unknown switch {}", switch);
                    return false;
                };
                record.up = false;
                warn!("[topology] switch {} left, its links are unusable", switch);
                true
            }
            TopologyEvent::LinkUp { a, b, capacity_mbps } => {
                let id = LinkId::new(*a, *b);
                if *capacity_mbps > MAX_LINK_CAPACITY_MBPS {
                    warn!("[topology] ignoring link {} with out-of-range capacity {} Mbps", id, capacity_mbps);
                    return false;
                }
                self.ensure_switch(a.switch).ports.insert(a.port);
                self.ensure_switch(b.switch).ports.insert(b.port);
                match self.links.get_mut(&id) {
                    Some(link) => {
                        link.up = true;
                        info!("[topology] link {} ({} <-> {}) back up", id, a, b);
                    }
                    None => {
                        self.links.insert(id, LinkRecord {
                            id,
                            capacity: Bandwidth::from_mbps(*capacity_mbps),
                            reserved: Bandwidth::ZERO,
                            up: true,
                        });
                        info!("[topology] link {} ({} <-> {}) up, capacity {} Mbps", id, a, b, capacity_mbps);
                    }
                }
                true
            }
            TopologyEvent::LinkDown { a, b } => {
                let id = LinkId::new(*a, *b);
                let Some(link) = self.links.get_mut(&id) else {
                    warn!("[topology] down event for unknown link {}", id);
                    return false;
                };
                link.up = false;
                if link.reserved > Bandwidth::ZERO {
                    warn!("[topology] link {} down with {} Mbps reserved; slices over it are stale", id, link.reserved);
                } else {
                    info!("[topology] link {} down", id);
                }
                true
            }
            TopologyEvent::HostDiscovered { address, switch, port } => {
                let attachment = Endpoint { switch: *switch, port: *port };
                if let Some(known) = self.hosts.get(address) {
                    if known.attachment != attachment {
                        warn!(
                            "[topology] host {} reported at {} but already attached at {}; ignoring",
                            address, attachment, known.attachment
                        );
                    }
                    return false;
                }
                self.ensure_switch(*switch).ports.insert(*port);
                self.hosts.insert(*address, Host { addr: *address, attachment });
                info!("[topology] host {} attached at {}", address, attachment);
                true
            }
        }
    }

    fn ensure_switch(&mut self, id: SwitchId) -> &mut SwitchRecord {
        self.switches.entry(id).or_insert_with(|| SwitchRecord {
            id,
            ports: BTreeSet::new(),
            up: true,
        })
    }

    pub fn switches(&self) -> impl Iterator<Item = &SwitchRecord> {
        self.switches.values()
    }

    pub fn links(&self) -> impl Iterator<Item = &LinkRecord> {
        self.links.values()
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    pub fn link(&self, id: &LinkId) -> Option<&LinkRecord> {
        self.links.get(id)
    }

    /// Lowest-id link joining the two switches, if any.
    pub fn link_between(&self, x: SwitchId, y: SwitchId) -> Option<&LinkRecord> {
        self.links
            .values()
            .find(|l| l.id.touches(x) && l.id.far_end(x).map(|e| e.switch) == Some(y))
    }

    pub fn attachment_of(&self, host: Ipv4Addr) -> Option<Endpoint> {
        self.hosts.get(&host).map(|h| h.attachment)
    }

    pub fn host_at(&self, attachment: Endpoint) -> Option<&Host> {
        self.hosts.values().find(|h| h.attachment == attachment)
    }

    pub fn is_switch_up(&self, id: SwitchId) -> bool {
        self.switches.get(&id).is_some_and(|s| s.up)
    }

    /// Up and both ends on live switches.
    pub fn is_link_usable(&self, id: &LinkId) -> bool {
        self.links.get(id).is_some_and(|l| l.up)
            && self.is_switch_up(id.a().switch)
            && self.is_switch_up(id.b().switch)
    }

    /// Usable neighbours of `switch`, ordered by (neighbour id, link id).
    pub fn neighbors(&self, switch: SwitchId) -> Vec<(SwitchId, LinkId)> {
        let mut out: Vec<(SwitchId, LinkId)> = self
            .links
            .values()
            .filter(|l| l.id.touches(switch) && self.is_link_usable(&l.id))
            .filter_map(|l| l.id.far_end(switch).map(|far| (far.switch, l.id)))
            .filter(|(far, _)| *far != switch)
            .collect();
        out.sort();
        out
    }

    pub fn reserve(&mut self, id: &LinkId, amount: Bandwidth) -> Result<(), TopologyError> {
        let link = self.links.get_mut(id).ok_or(TopologyError::UnknownLink(*id))?;
        let next = link.reserved + amount;
        if next > link.capacity {
            return Err(TopologyError::CapacityExceeded {
                link: *id,
                requested: amount,
                reserved: link.reserved,
                capacity: link.capacity,
            });
        }
        link.reserved = next;
        info!("[topology] link {} usage: {}/{} Mbps", id, link.reserved, link.capacity);
        Ok(())
    }

    pub fn release(&mut self, id: &LinkId, amount: Bandwidth) -> Result<(), TopologyError> {
        let link = self.links.get_mut(id).ok_or(TopologyError::UnknownLink(*id))?;
        link.reserved = link.reserved.checked_sub(amount).ok_or(TopologyError::ReleaseUnderflow {
            link: *id,
            requested: amount,
            reserved: link.reserved,
        })?;
        info!("[topology] link {} usage: {}/{} Mbps", id, link.reserved, link.capacity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link_up(a: (u64, u32), b: (u64, u32), cap: u64) -> TopologyEvent {
        TopologyEvent::LinkUp {
            a: Endpoint::new(a.0, a.1),
            b: Endpoint::new(b.0, b.1),
            capacity_mbps: cap,
        }
    }

    fn s1_s4() -> LinkId {
        LinkId::new(Endpoint::new(1, 2), Endpoint::new(4, 1))
    }

    #[test]
    fn reserve_refuses_to_exceed_capacity_without_mutating() {
        let mut topo = TopologyModel::new();
        topo.apply(&link_up((1, 2), (4, 1), 100));
        topo.reserve(&s1_s4(), Bandwidth::from_mbps(60)).unwrap();

        let err = topo.reserve(&s1_s4(), Bandwidth::from_mbps(50)).unwrap_err();
        assert!(matches!(err, TopologyError::CapacityExceeded { .. }));
        assert_eq!(topo.link(&s1_s4()).unwrap().reserved, Bandwidth::from_mbps(60));

        topo.release(&s1_s4(), Bandwidth::from_mbps(60)).unwrap();
        assert_eq!(topo.link(&s1_s4()).unwrap().reserved, Bandwidth::ZERO);
        assert!(topo.release(&s1_s4(), Bandwidth::from_mbps(1)).is_err());
    }

    #[test]
    fn oversized_link_capacity_is_ignored() {
        let mut topo = TopologyModel::new();
        assert!(!topo.apply(&link_up((7, 1), (8, 1), u64::MAX / 10)));
        assert_eq!(topo.links().count(), 0);
        assert!(!topo.is_switch_up(SwitchId(7)));

        assert!(topo.apply(&link_up((7, 1), (8, 1), MAX_LINK_CAPACITY_MBPS)));
        let id = LinkId::new(Endpoint::new(7, 1), Endpoint::new(8, 1));
        let full = topo.link(&id).unwrap().capacity;
        assert_eq!(full.share(100), full);
    }

    #[test]
    fn link_down_keeps_reservation() {
        let mut topo = TopologyModel::new();
        topo.apply(&link_up((1, 2), (4, 1), 100));
        topo.reserve(&s1_s4(), Bandwidth::from_mbps(30)).unwrap();
        topo.apply(&TopologyEvent::LinkDown { a: Endpoint::new(4, 1), b: Endpoint::new(1, 2) });

        assert!(!topo.is_link_usable(&s1_s4()));
        assert!(topo.neighbors(SwitchId(1)).is_empty());
        assert_eq!(topo.link(&s1_s4()).unwrap().reserved, Bandwidth::from_mbps(30));

        topo.apply(&link_up((4, 1), (1, 2), 100));
        assert!(topo.is_link_usable(&s1_s4()));
        assert_eq!(topo.link(&s1_s4()).unwrap().reserved, Bandwidth::from_mbps(30));
    }

    #[test]
    fn switch_leaving_takes_its_links_down() {
        let mut topo = TopologyModel::new();
        topo.apply(&link_up((1, 1), (2, 1), 100));
        topo.apply(&link_up((1, 2), (4, 1), 100));
        topo.apply(&TopologyEvent::SwitchLeft { switch: SwitchId(4) });

        assert_eq!(topo.neighbors(SwitchId(1)).len(), 1);
        topo.apply(&TopologyEvent::SwitchJoined { switch: SwitchId(4), ports: vec![] });
        assert_eq!(topo.neighbors(SwitchId(1)).len(), 2);
    }

    #[test]
    fn hosts_are_immutable_after_discovery() {
        let mut topo = TopologyModel::new();
        let addr: Ipv4Addr = "10.0.0.1".parse().unwrap();
        assert!(topo.apply(&TopologyEvent::HostDiscovered { address: addr, switch: SwitchId(1), port: PortNo(3) }));
        assert!(!topo.apply(&TopologyEvent::HostDiscovered { address: addr, switch: SwitchId(2), port: PortNo(9) }));
        assert_eq!(topo.attachment_of(addr), Some(Endpoint::new(1, 3)));
    }

    #[test]
    fn events_decode_from_tagged_json() {
        let json = r#"{"event":"link_up","a":{"switch":1,"port":2},"b":{"switch":4,"port":1},"capacity_mbps":100}"#;
        let ev: TopologyEvent = serde_json::from_str(json).unwrap();
        assert_eq!(ev, link_up((1, 2), (4, 1), 100));
    }

    #[test]
    fn link_between_finds_either_direction() {
        let mut topo = TopologyModel::new();
        topo.apply(&link_up((1, 2), (4, 1), 100));
        assert_eq!(topo.link_between(SwitchId(4), SwitchId(1)).map(|l| l.id), Some(s1_s4()));
        assert!(topo.link_between(SwitchId(1), SwitchId(2)).is_none());
    }
}
