//! Slice catalog: loaded once at startup, immutable afterwards.
//!
//! ```yaml
//! gaming:
//!   flows:
//!     - { src: h1, dst: gs }
//!   capacity_pct: 60
//!   priority: 50
//! ```

use crate::models::{FlowSpec, SliceDefinition};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("cannot read catalog {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("invalid catalog yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("slice name must not be empty")]
    EmptyName,
    #[error("slice '{0}' declares no flows")]
    NoFlows(String),
    #[error("slice '{slice}': capacity_pct {pct} outside 1..=100")]
    CapacityOutOfRange { slice: String, pct: u32 },
    #[error("slice '{slice}': endpoint '{endpoint}' is neither a known host alias nor an IPv4 address")]
    UnresolvedEndpoint { slice: String, endpoint: String },
    #[error("slice '{slice}': flow {src}->{dst} has identical endpoints")]
    SelfFlow { slice: String, src: String, dst: String },
}

#[derive(Debug, Deserialize)]
struct RawFlow {
    src: String,
    dst: String,
}

#[derive(Debug, Deserialize)]
struct RawSlice {
    flows: Vec<RawFlow>,
    capacity_pct: u32,
    #[serde(default)]
    priority: i32,
}

#[derive(Debug, Clone, Default)]
pub struct SliceCatalog {
    slices: BTreeMap<String, SliceDefinition>,
}

impl SliceCatalog {
    pub fn from_yaml(text: &str, aliases: &BTreeMap<String, Ipv4Addr>) -> Result<Self, CatalogError> {
        let raw: BTreeMap<String, RawSlice> = if text.trim().is_empty() { BTreeMap::new() } else { serde_yaml::from_str(text)? };

        let mut slices = BTreeMap::new();
        for (name, slice) in raw {
            if name.trim().is_empty() {
                return Err(CatalogError::EmptyName);
            }
            if slice.flows.is_empty() {
                return Err(CatalogError::NoFlows(name));
            }
            if !(1..=100).contains(&slice.capacity_pct) {
                return Err(CatalogError::CapacityOutOfRange { slice: name, pct: slice.capacity_pct });
            }

            let mut flows = Vec::with_capacity(slice.flows.len());
            for flow in slice.flows {
                let src = resolve(&name, &flow.src, aliases)?;
                let dst = resolve(&name, &flow.dst, aliases)?;
                if src == dst {
                    return Err(CatalogError::SelfFlow { slice: name, src: flow.src, dst: flow.dst });
                }
                flows.push(FlowSpec { src_label: flow.src, dst_label: flow.dst, src, dst });
            }

            let capacity_pct = slice.capacity_pct as u8;
            slices.insert(name.clone(), SliceDefinition { name, flows, capacity_pct, priority: slice.priority });
        }
        Ok(Self { slices })
    }

    pub async fn load(path: impl AsRef<Path>, aliases: &BTreeMap<String, Ipv4Addr>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| CatalogError::Io { path: path.display().to_string(), source })?;
        Self::from_yaml(&text, aliases)
    }

    pub fn get(&self, name: &str) -> Option<&SliceDefinition> {
        self.slices.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SliceDefinition> {
        self.slices.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.slices.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }
}

fn resolve(slice: &str, endpoint: &str, aliases: &BTreeMap<String, Ipv4Addr>) -> Result<Ipv4Addr, CatalogError> {
    aliases
        .get(endpoint)
        .copied()
        .or_else(|| endpoint.parse().ok())
        .ok_or_else(|| CatalogError::UnresolvedEndpoint { slice: slice.to_string(), endpoint: endpoint.to_string() })
}
