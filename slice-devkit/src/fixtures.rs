/*!
Reference lab: 5 switches, 9 hosts, 100 Mbit/s everywhere.

```text
      h1:3 h2:4 g1:5        h5:4           h3:2 h4:3 g2:4
           [s1] ---1----1--- [s2] ---2----1--- [s3]
            |2                |3
            1                 1
           [s4] gs:2         [s5] ps:2
```
*/

use slice_kernel::catalog::SliceCatalog;
use slice_kernel::models::{Endpoint, PortNo, SwitchId};
use slice_kernel::topology::{TopologyEvent, TopologyModel};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

pub const HOSTS: [(&str, [u8; 4], u64, u32); 9] = [
    ("h1", [10, 0, 0, 1], 1, 3),
    ("h2", [10, 0, 0, 2], 1, 4),
    ("g1", [10, 0, 0, 6], 1, 5),
    ("h5", [10, 0, 0, 5], 2, 4),
    ("h3", [10, 0, 0, 3], 3, 2),
    ("h4", [10, 0, 0, 4], 3, 3),
    ("g2", [10, 0, 0, 7], 3, 4),
    ("gs", [10, 0, 0, 8], 4, 2),
    ("ps", [10, 0, 0, 9], 5, 2),
];

pub const LINKS: [((u64, u32), (u64, u32)); 4] = [((1, 1), (2, 1)), ((1, 2), (4, 1)), ((2, 2), (3, 1)), ((2, 3), (5, 1))];

/// Slices used across the scenario tests.
///
/// - gaming / video / emergency / backup all cross s1-s4
/// - stream crosses s1-s2 and s1-s4
/// - work (s3-s2-s5) shares no link with the s1-s4 slices
pub const LAB_CATALOG: &str = r#"
gaming:
  flows:
    - { src: h1, dst: gs }
  capacity_pct: 60
  priority: 50
video:
  flows:
    - { src: h2, dst: gs }
  capacity_pct: 50
  priority: 30
emergency:
  flows:
    - { src: g1, dst: gs }
  capacity_pct: 50
  priority: 100
stream:
  flows:
    - { src: h5, dst: gs }
  capacity_pct: 30
  priority: 20
backup:
  flows:
    - { src: h2, dst: gs }
  capacity_pct: 70
  priority: 40
work:
  flows:
    - { src: h3, dst: ps }
    - { src: h4, dst: ps }
  capacity_pct: 20
  priority: 10
"#;

pub fn ip(alias: &str) -> Ipv4Addr {
    aliases().get(alias).copied().unwrap_or_else(|| panic!("no lab host {alias}"))
}

pub fn aliases() -> BTreeMap<String, Ipv4Addr> {
    HOSTS.iter().map(|(name, addr, _, _)| (name.to_string(), Ipv4Addr::from(*addr))).collect()
}

pub fn lab_events() -> Vec<TopologyEvent> {
    let mut events: Vec<TopologyEvent> =
        (1..=5).map(|s| TopologyEvent::SwitchJoined { switch: SwitchId(s), ports: Vec::new() }).collect();
    for (a, b) in LINKS {
        events.push(TopologyEvent::LinkUp { a: Endpoint::new(a.0, a.1), b: Endpoint::new(b.0, b.1), capacity_mbps: 100 });
    }
    for (_, addr, switch, port) in HOSTS {
        events.push(TopologyEvent::HostDiscovered { address: Ipv4Addr::from(addr), switch: SwitchId(switch), port: PortNo(port) });
    }
    events
}

pub fn lab() -> TopologyModel {
    let mut topo = TopologyModel::new();
    for event in lab_events() {
        topo.apply(&event);
    }
    topo
}

pub fn lab_catalog() -> SliceCatalog {
    SliceCatalog::from_yaml(LAB_CATALOG, &aliases()).unwrap_or_else(|e| panic!("lab catalog: {e}"))
}

pub fn s1_s4() -> slice_kernel::models::LinkId {
    slice_kernel::models::LinkId::new(Endpoint::new(1, 2), Endpoint::new(4, 1))
}
