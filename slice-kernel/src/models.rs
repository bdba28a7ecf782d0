use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::net::Ipv4Addr;
use std::ops::{Add, AddAssign};

/// Datapath identifier of a switch (`s1` == `SwitchId(1)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SwitchId(pub u64);

impl fmt::Display for SwitchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortNo(pub u32);

impl fmt::Display for PortNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A (switch, port) pair: one side of a link or a host attachment point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub switch: SwitchId,
    pub port: PortNo,
}

impl Endpoint {
    pub fn new(switch: u64, port: u32) -> Self {
        Self { switch: SwitchId(switch), port: PortNo(port) }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.switch, self.port)
    }
}

/// Undirected link identity. Endpoints are stored in ascending order so that
/// `LinkId::new(a, b) == LinkId::new(b, a)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkId {
    a: Endpoint,
    b: Endpoint,
}

impl LinkId {
    pub fn new(x: Endpoint, y: Endpoint) -> Self {
        if x <= y { Self { a: x, b: y } } else { Self { a: y, b: x } }
    }

    pub fn a(&self) -> Endpoint {
        self.a
    }

    pub fn b(&self) -> Endpoint {
        self.b
    }

    pub fn touches(&self, switch: SwitchId) -> bool {
        self.a.switch == switch || self.b.switch == switch
    }

    /// Endpoint of this link sitting on `switch`.
    pub fn endpoint_on(&self, switch: SwitchId) -> Option<Endpoint> {
        if self.a.switch == switch {
            Some(self.a)
        } else if self.b.switch == switch {
            Some(self.b)
        } else {
            None
        }
    }

    /// Endpoint of this link on the far side of `switch`.
    pub fn far_end(&self, switch: SwitchId) -> Option<Endpoint> {
        if self.a.switch == switch {
            Some(self.b)
        } else if self.b.switch == switch {
            Some(self.a)
        } else {
            None
        }
    }
}

// Label only names the switches; parallel links share a label.
impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.a.switch, self.b.switch)
    }
}

impl Serialize for LinkId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Bandwidth held as integer kbit/s so percentage shares of whole-Mbps
/// capacities are exact and reservations round-trip without drift.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bandwidth(u64);

impl Bandwidth {
    pub const ZERO: Bandwidth = Bandwidth(0);

    /// Saturates at `u64::MAX` kbit/s.
    pub fn from_mbps(mbps: u64) -> Self {
        Self(mbps.saturating_mul(1000))
    }

    pub fn from_kbps(kbps: u64) -> Self {
        Self(kbps)
    }

    pub fn kbps(&self) -> u64 {
        self.0
    }

    pub fn as_mbps(&self) -> f64 {
        self.0 as f64 / 1000.0
    }

    /// `pct` percent of this amount.
    pub fn share(&self, pct: u8) -> Self {
        let kbps = u128::from(self.0) * u128::from(pct) / 100;
        Self(u64::try_from(kbps).unwrap_or(u64::MAX))
    }

    pub fn checked_sub(self, rhs: Bandwidth) -> Option<Bandwidth> {
        self.0.checked_sub(rhs.0).map(Bandwidth)
    }

    pub fn saturating_sub(self, rhs: Bandwidth) -> Bandwidth {
        Bandwidth(self.0.saturating_sub(rhs.0))
    }
}

impl Add for Bandwidth {
    type Output = Bandwidth;
    fn add(self, rhs: Bandwidth) -> Bandwidth {
        Bandwidth(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Bandwidth {
    fn add_assign(&mut self, rhs: Bandwidth) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sum for Bandwidth {
    fn sum<I: Iterator<Item = Bandwidth>>(iter: I) -> Bandwidth {
        iter.fold(Bandwidth::ZERO, Add::add)
    }
}

impl fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 1000 == 0 {
            write!(f, "{}", self.0 / 1000)
        } else {
            write!(f, "{}", self.as_mbps())
        }
    }
}

// JSON carries Mbit/s numbers.
impl Serialize for Bandwidth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_mbps())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Host {
    pub addr: Ipv4Addr,
    pub attachment: Endpoint,
}

/// One declared (source, destination) pair of a slice, endpoints already
/// resolved to addresses. The labels keep the names used in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowSpec {
    pub src_label: String,
    pub dst_label: String,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl fmt::Display for FlowSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.src_label, self.dst_label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SliceDefinition {
    pub name: String,
    pub flows: Vec<FlowSpec>,
    pub capacity_pct: u8,
    pub priority: i32,
}
