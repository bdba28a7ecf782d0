//! # Admission control with priority preemption
//!
//! Purely advisory: nothing here mutates the topology. The lifecycle manager
//! asks for a [`Verdict`] and acts on it.
//!
//! ## Rules
//! - Demand on a link is `capacity_pct%` of that link's nominal capacity, summed
//!   over every flow of the candidate that crosses it.
//! - Links are examined in path order (per flow, per path). On an
//!   over-subscribed link, incumbents with a strictly lower priority that
//!   traverse it are marked as victims, lowest priority first and, within
//!   equal priority, most recently activated first, until the deficit is gone.
//! - Victims marked for one link also count as freed on every later link.
//! - The first link that cannot be brought to a non-positive deficit makes
//!   the whole request [`Verdict::Infeasible`]; no partial preemption is
//!   ever proposed.

use crate::models::{Bandwidth, LinkId};
use crate::path::ResolvedPath;
use crate::topology::TopologyModel;
use std::collections::BTreeMap;

/// An ACTIVE slice as seen by admission control.
#[derive(Debug, Clone, Copy)]
pub struct Incumbent<'a> {
    pub name: &'a str,
    pub priority: i32,
    pub activation_seq: u64,
    pub reserved: &'a BTreeMap<LinkId, Bandwidth>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Feasible,
    /// Feasible once the named slices (in eviction order) are deactivated.
    FeasibleWithPreemption(Vec<String>),
    Infeasible {
        link: LinkId,
        required: Bandwidth,
        available: Bandwidth,
        deficit: Bandwidth,
    },
}

pub struct AdmissionController;

impl AdmissionController {
    /// Per-link demand of a slice, ordered by first appearance along its paths.
    pub fn demand(topo: &TopologyModel, paths: &[ResolvedPath], capacity_pct: u8) -> Vec<(LinkId, Bandwidth)> {
        let mut out: Vec<(LinkId, Bandwidth)> = Vec::new();
        for link in paths.iter().flat_map(|p| p.links()) {
            let Some(record) = topo.link(&link) else { continue };
            let amount = record.capacity.share(capacity_pct);
            match out.iter_mut().find(|(id, _)| *id == link) {
                Some((_, total)) => *total += amount,
                None => out.push((link, amount)),
            }
        }
        out
    }

    pub fn evaluate(
        topo: &TopologyModel,
        priority: i32,
        demand: &[(LinkId, Bandwidth)],
        incumbents: &[Incumbent<'_>],
    ) -> Verdict {
        let mut victims: Vec<&Incumbent<'_>> = Vec::new();

        for &(link, required) in demand {
            let Some(record) = topo.link(&link) else {
                return Verdict::Infeasible { link, required, available: Bandwidth::ZERO, deficit: required };
            };
            let mut in_use = record.reserved.saturating_sub(freed_on(&link, &victims));
            if in_use + required <= record.capacity {
                continue;
            }

            let mut eligible: Vec<&Incumbent<'_>> = incumbents
                .iter()
                .filter(|i| i.priority < priority)
                .filter(|i| i.reserved.contains_key(&link))
                .filter(|i| !victims.iter().any(|v| v.name == i.name))
                .collect();
            eligible.sort_by(|a, b| a.priority.cmp(&b.priority).then(b.activation_seq.cmp(&a.activation_seq)));

            for inc in eligible {
                if in_use + required <= record.capacity {
                    break;
                }
                in_use = in_use.saturating_sub(inc.reserved[&link]);
                victims.push(inc);
            }

            if in_use + required > record.capacity {
                let available = record.capacity.saturating_sub(in_use);
                return Verdict::Infeasible {
                    link,
                    required,
                    available,
                    deficit: required.saturating_sub(available),
                };
            }
        }

        if victims.is_empty() {
            Verdict::Feasible
        } else {
            Verdict::FeasibleWithPreemption(victims.iter().map(|v| v.name.to_string()).collect())
        }
    }
}

fn freed_on(link: &LinkId, victims: &[&Incumbent<'_>]) -> Bandwidth {
    victims.iter().filter_map(|v| v.reserved.get(link).copied()).sum()
}
