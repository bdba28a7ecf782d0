/*!
Packet walk over installed flow rules.

At each switch the highest-priority matching rule decides; without a match
the switch falls back to default L2 forwarding (shortest path towards the
destination's attachment switch). A ping needs both directions delivered.
*/

use slice_kernel::models::{Endpoint, SwitchId};
use slice_kernel::rules::{FlowRule, RuleAction};
use slice_kernel::topology::TopologyModel;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::net::Ipv4Addr;

const MAX_HOPS: usize = 32;

pub fn delivers(topo: &TopologyModel, rules: &[FlowRule], src: Ipv4Addr, dst: Ipv4Addr) -> bool {
    let (Some(from), Some(to)) = (topo.attachment_of(src), topo.attachment_of(dst)) else {
        return false;
    };

    let mut at = from.switch;
    for _ in 0..MAX_HOPS {
        let decision = rules
            .iter()
            .filter(|r| r.switch == at && r.rule_match.matches(src, dst))
            .max_by_key(|r| r.priority)
            .map(|r| r.action);

        let egress = match decision {
            Some(RuleAction::Drop) => return false,
            Some(RuleAction::Output { port }) => Endpoint { switch: at, port },
            None if at == to.switch => return true,
            None => match default_next_hop(topo, at, to.switch) {
                Some(egress) => egress,
                None => return false,
            },
        };

        if let Some(host) = topo.host_at(egress) {
            return host.addr == dst;
        }
        match far_side(topo, egress) {
            Some(next) => at = next.switch,
            None => return false,
        }
    }
    false
}

pub fn can_ping(topo: &TopologyModel, rules: &[FlowRule], a: Ipv4Addr, b: Ipv4Addr) -> bool {
    delivers(topo, rules, a, b) && delivers(topo, rules, b, a)
}

/// Host pairs (a < b) that cannot ping each other.
pub fn pingall(topo: &TopologyModel, rules: &[FlowRule]) -> Vec<(Ipv4Addr, Ipv4Addr)> {
    let hosts: Vec<Ipv4Addr> = topo.hosts().map(|h| h.addr).collect();
    let mut failures = Vec::new();
    for (i, a) in hosts.iter().enumerate() {
        for b in &hosts[i + 1..] {
            if !can_ping(topo, rules, *a, *b) {
                failures.push((*a, *b));
            }
        }
    }
    failures
}

fn far_side(topo: &TopologyModel, egress: Endpoint) -> Option<Endpoint> {
    topo.links()
        .find(|l| topo.is_link_usable(&l.id) && (l.id.a() == egress || l.id.b() == egress))
        .map(|l| if l.id.a() == egress { l.id.b() } else { l.id.a() })
}

fn default_next_hop(topo: &TopologyModel, from: SwitchId, to: SwitchId) -> Option<Endpoint> {
    let mut first_hop: BTreeMap<SwitchId, Endpoint> = BTreeMap::new();
    let mut seen = BTreeSet::from([from]);
    let mut queue = VecDeque::from([from]);
    while let Some(current) = queue.pop_front() {
        if current == to {
            return first_hop.get(&to).copied();
        }
        for (next, link) in topo.neighbors(current) {
            if seen.insert(next) {
                let hop = match first_hop.get(&current) {
                    Some(hop) => *hop,
                    None => link.endpoint_on(current)?,
                };
                first_hop.insert(next, hop);
                queue.push_back(next);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{ip, lab};
    use slice_kernel::models::PortNo;
    use slice_kernel::rules::RuleMatch;

    #[test]
    fn baseline_lab_is_fully_reachable() {
        assert!(pingall(&lab(), &[]).is_empty());
    }

    #[test]
    fn drop_rule_blocks_replies() {
        let topo = lab();
        let drop_h1 = FlowRule {
            switch: SwitchId(1),
            rule_match: RuleMatch { ipv4_src: ip("h1"), ipv4_dst: None },
            priority: 10,
            action: RuleAction::Drop,
        };
        assert!(delivers(&topo, std::slice::from_ref(&drop_h1), ip("h2"), ip("h1")));
        assert!(!can_ping(&topo, std::slice::from_ref(&drop_h1), ip("h2"), ip("h1")));

        let allow = FlowRule {
            switch: SwitchId(1),
            rule_match: RuleMatch { ipv4_src: ip("h1"), ipv4_dst: Some(ip("h2")) },
            priority: 20,
            action: RuleAction::Output { port: PortNo(4) },
        };
        assert!(can_ping(&topo, &[drop_h1, allow], ip("h2"), ip("h1")));
    }

    #[test]
    fn output_to_another_hosts_port_is_not_delivery() {
        let topo = lab();
        let misdirect = FlowRule {
            switch: SwitchId(1),
            rule_match: RuleMatch { ipv4_src: ip("h1"), ipv4_dst: Some(ip("h2")) },
            priority: 20,
            action: RuleAction::Output { port: PortNo(5) },
        };
        assert!(!delivers(&topo, std::slice::from_ref(&misdirect), ip("h1"), ip("h2")));
        assert!(delivers(&topo, std::slice::from_ref(&misdirect), ip("h2"), ip("h1")));
    }
}
