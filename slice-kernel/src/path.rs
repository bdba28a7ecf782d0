//! Deterministic shortest-path resolution between two host attachment points.
//!
//! Breadth-first search by hop count. Neighbours are expanded in ascending
//! (switch id, link id) order and the first discovery of a switch fixes its
//! parent, so an unchanged topology always yields the same path.

use crate::error::SliceError;
use crate::models::{Endpoint, Host, LinkId, SwitchId};
use crate::topology::TopologyModel;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::net::Ipv4Addr;

/// One traversed link, oriented in the direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Hop {
    pub link: LinkId,
    pub egress: Endpoint,
    pub ingress: Endpoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPath {
    pub src: Host,
    pub dst: Host,
    pub switches: Vec<SwitchId>,
    pub hops: Vec<Hop>,
}

impl ResolvedPath {
    /// The same path walked from `dst` back to `src`.
    pub fn reversed(&self) -> ResolvedPath {
        ResolvedPath {
            src: self.dst,
            dst: self.src,
            switches: self.switches.iter().rev().copied().collect(),
            hops: self
                .hops
                .iter()
                .rev()
                .map(|h| Hop { link: h.link, egress: h.ingress, ingress: h.egress })
                .collect(),
        }
    }

    pub fn links(&self) -> impl Iterator<Item = LinkId> + '_ {
        self.hops.iter().map(|h| h.link)
    }

    /// Output port at every switch on the path; the last one faces the
    /// destination host.
    pub fn egress_ports(&self) -> Vec<Endpoint> {
        let mut out: Vec<Endpoint> = self.hops.iter().map(|h| h.egress).collect();
        out.push(self.dst.attachment);
        out
    }
}

pub struct PathResolver;

impl PathResolver {
    pub fn resolve(topo: &TopologyModel, src: Ipv4Addr, dst: Ipv4Addr) -> Result<ResolvedPath, SliceError> {
        let not_found = || SliceError::PathNotFound { src, dst };
        let src_host = topo.hosts().find(|h| h.addr == src).copied().ok_or_else(not_found)?;
        let dst_host = topo.hosts().find(|h| h.addr == dst).copied().ok_or_else(not_found)?;
        let from = src_host.attachment.switch;
        let to = dst_host.attachment.switch;
        if !topo.is_switch_up(from) || !topo.is_switch_up(to) {
            return Err(not_found());
        }

        let mut parent: BTreeMap<SwitchId, (SwitchId, LinkId)> = BTreeMap::new();
        let mut queue = VecDeque::from([from]);
        let mut seen = BTreeSet::from([from]);
        while let Some(current) = queue.pop_front() {
            if current == to {
                break;
            }
            for (next, link) in topo.neighbors(current) {
                if seen.insert(next) {
                    parent.insert(next, (current, link));
                    queue.push_back(next);
                }
            }
        }
        if !seen.contains(&to) {
            return Err(not_found());
        }

        let mut switches = vec![to];
        let mut hops = Vec::new();
        let mut cursor = to;
        while cursor != from {
            let (prev, link) = parent[&cursor];
            let egress = link.endpoint_on(prev).ok_or_else(not_found)?;
            let ingress = link.far_end(prev).ok_or_else(not_found)?;
            hops.push(Hop { link, egress, ingress });
            switches.push(prev);
            cursor = prev;
        }
        switches.reverse();
        hops.reverse();

        Ok(ResolvedPath { src: src_host, dst: dst_host, switches, hops })
    }
}
