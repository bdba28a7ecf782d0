/**
 * SLICE LIFECYCLE MANAGER - ABSENT -> ACTIVE -> ABSENT
 *
 * ROLE:
 * Owns the slice store (topology + slice instances) and runs activation,
 * deactivation and topology updates against it. Each mutating call holds the
 * store's write lock from start to finish, so status readers only ever see
 * the state before or after a whole operation.
 *
 * ACTIVATION:
 * 1. catalog lookup, duplicate check
 * 2. path resolution for every flow, per-link demand
 * 3. admission; victims are deactivated with the same teardown as a user
 *    deactivate, then headroom is checked again
 * 4. rules (installer rolls itself back), QoS queues, reservations
 * Any failure in step 4 undoes what step 4 already did before returning.
 *
 * DEACTIVATION:
 * rules -> QoS on interfaces no other slice uses -> reservations. Failures of
 * the first two become warnings; reservations are always released.
 */

use crate::admission::{AdmissionController, Incumbent, Verdict};
use crate::catalog::SliceCatalog;
use crate::error::SliceError;
use crate::models::{Bandwidth, FlowSpec, Host, LinkId, SliceDefinition};
use crate::path::{PathResolver, ResolvedPath};
use crate::qos::{QosAdapter, QueueRequest};
use crate::rules::{FlowRuleInstaller, InstalledRule};
use crate::topology::{LinkRecord, SwitchRecord, TopologyEvent, TopologyModel};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ActiveFlow {
    pub flow: FlowSpec,
    pub path: ResolvedPath,
}

#[derive(Debug, Clone)]
pub struct SliceInstance {
    pub name: String,
    pub priority: i32,
    pub activation_seq: u64,
    pub activated_at: OffsetDateTime,
    pub flows: Vec<ActiveFlow>,
    pub rules: Vec<InstalledRule>,
    pub reservations: BTreeMap<LinkId, Bandwidth>,
    pub qos_interfaces: BTreeSet<String>,
}

impl SliceInstance {
    /// True once any switch or link under the slice is no longer usable.
    pub fn is_stale(&self, topo: &TopologyModel) -> bool {
        self.flows.iter().any(|f| {
            f.path.switches.iter().any(|s| !topo.is_switch_up(*s)) || f.path.links().any(|l| !topo.is_link_usable(&l))
        })
    }
}

#[derive(Debug, Default)]
pub struct SliceStore {
    pub topology: TopologyModel,
    instances: BTreeMap<String, SliceInstance>,
    next_seq: u64,
}

impl SliceStore {
    pub fn new(topology: TopologyModel) -> Self {
        Self { topology, instances: BTreeMap::new(), next_seq: 1 }
    }

    pub fn instance(&self, name: &str) -> Option<&SliceInstance> {
        self.instances.get(name)
    }

    pub fn active_names(&self) -> Vec<String> {
        self.instances.keys().cloned().collect()
    }

    fn incumbents(&self) -> Vec<Incumbent<'_>> {
        self.instances
            .values()
            .map(|i| Incumbent {
                name: &i.name,
                priority: i.priority,
                activation_seq: i.activation_seq,
                reserved: &i.reservations,
            })
            .collect()
    }

    /// Active slices other than `except` that have queues on `interface`.
    fn sharing(&self, interface: &str, except: &str) -> Vec<String> {
        self.instances
            .values()
            .filter(|i| i.name != except && i.qos_interfaces.contains(interface))
            .map(|i| i.name.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationReport {
    pub slice: String,
    pub installed_flows: Vec<String>,
    pub installed_rules: usize,
    pub preempted_slices: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeactivationReport {
    pub slice: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceStatus {
    pub name: String,
    pub priority: i32,
    pub activated_at: String,
    pub stale: bool,
    pub reserved_per_link: BTreeMap<String, Bandwidth>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkStatus {
    pub id: String,
    pub capacity: Bandwidth,
    pub reserved: Bandwidth,
    pub up: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub active_slices: Vec<SliceStatus>,
    pub links: Vec<LinkStatus>,
}

impl StatusSnapshot {
    pub fn slice(&self, name: &str) -> Option<&SliceStatus> {
        self.active_slices.iter().find(|s| s.name == name)
    }

    /// Reserved bandwidth on the first link carrying `label` (e.g. "s1-s4").
    pub fn reserved_on(&self, label: &str) -> Option<Bandwidth> {
        self.links.iter().find(|l| l.id == label).map(|l| l.reserved)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TopologyView {
    pub switches: Vec<SwitchRecord>,
    pub links: Vec<LinkRecord>,
    pub hosts: Vec<Host>,
}

/// Read side of the store, safe to clone into request handlers.
#[derive(Clone)]
pub struct StoreReader {
    store: Arc<RwLock<SliceStore>>,
}

impl StoreReader {
    pub async fn status(&self) -> StatusSnapshot {
        let store = self.store.read().await;
        let topo = &store.topology;
        let active_slices = store
            .instances
            .values()
            .map(|i| {
                let mut reserved_per_link: BTreeMap<String, Bandwidth> = BTreeMap::new();
                for (link, amount) in &i.reservations {
                    *reserved_per_link.entry(link.to_string()).or_default() += *amount;
                }
                SliceStatus {
                    name: i.name.clone(),
                    priority: i.priority,
                    activated_at: i
                        .activated_at
                        .format(&Rfc3339)
                        .unwrap_or_else(|_| i.activated_at.unix_timestamp().to_string()),
                    stale: i.is_stale(topo),
                    reserved_per_link,
                }
            })
            .collect();
        let links = topo
            .links()
            .map(|l| LinkStatus { id: l.id.to_string(), capacity: l.capacity, reserved: l.reserved, up: l.up })
            .collect();
        StatusSnapshot { active_slices, links }
    }

    pub async fn topology(&self) -> TopologyView {
        let store = self.store.read().await;
        TopologyView {
            switches: store.topology.switches().cloned().collect(),
            links: store.topology.links().cloned().collect(),
            hosts: store.topology.hosts().copied().collect(),
        }
    }

    pub async fn active_count(&self) -> usize {
        self.store.read().await.instances.len()
    }

    /// Runs `f` against the locked store. Test and diagnostics hook.
    pub async fn inspect<R>(&self, f: impl FnOnce(&SliceStore) -> R) -> R {
        f(&*self.store.read().await)
    }
}

pub struct SliceLifecycleManager {
    store: Arc<RwLock<SliceStore>>,
    catalog: Arc<SliceCatalog>,
    installer: FlowRuleInstaller,
    qos: QosAdapter,
}

impl SliceLifecycleManager {
    pub fn new(topology: TopologyModel, catalog: Arc<SliceCatalog>, installer: FlowRuleInstaller, qos: QosAdapter) -> Self {
        Self { store: Arc::new(RwLock::new(SliceStore::new(topology))), catalog, installer, qos }
    }

    pub fn reader(&self) -> StoreReader {
        StoreReader { store: self.store.clone() }
    }

    pub fn catalog(&self) -> &Arc<SliceCatalog> {
        &self.catalog
    }

    pub async fn status(&self) -> StatusSnapshot {
        self.reader().status().await
    }

    pub async fn apply_topology_event(&self, event: &TopologyEvent) -> bool {
        let mut store = self.store.write().await;
        let applied = store.topology.apply(event);
        if applied && matches!(event, TopologyEvent::LinkDown { .. } | TopologyEvent::SwitchLeft { .. }) {
            let store = &*store;
            for instance in store.instances.values().filter(|i| i.is_stale(&store.topology)) {
                warn!("[lifecycle] slice '{}' is stale (no rerouting); deactivate it to release its bandwidth", instance.name);
            }
        }
        applied
    }

    pub async fn activate(&self, name: &str) -> Result<ActivationReport, SliceError> {
        let def = self.catalog.get(name).ok_or_else(|| SliceError::UnknownSlice(name.to_string()))?.clone();
        let mut store = self.store.write().await;
        if store.instances.contains_key(name) {
            return Err(SliceError::AlreadyActive(name.to_string()));
        }
        info!("[lifecycle] activating '{}' ({}%, priority {})", name, def.capacity_pct, def.priority);

        let result = self.activate_locked(&mut store, &def).await;
        match &result {
            Ok(report) => info!(
                "[lifecycle] slice '{}' active: {} flows, {} rules",
                name,
                report.installed_flows.len(),
                report.installed_rules
            ),
            Err(e) => warn!("[lifecycle] activation of '{}' failed: {}", name, e),
        }
        result
    }

    async fn activate_locked(&self, store: &mut SliceStore, def: &SliceDefinition) -> Result<ActivationReport, SliceError> {
        let paths = def
            .flows
            .iter()
            .map(|f| PathResolver::resolve(&store.topology, f.src, f.dst))
            .collect::<Result<Vec<_>, _>>()?;
        let demand = AdmissionController::demand(&store.topology, &paths, def.capacity_pct);

        let verdict = AdmissionController::evaluate(&store.topology, def.priority, &demand, &store.incumbents());
        let preempted = match verdict {
            Verdict::Feasible => Vec::new(),
            Verdict::Infeasible { link, required, available, deficit } => {
                return Err(SliceError::InsufficientBandwidth { link, required, available, deficit });
            }
            Verdict::FeasibleWithPreemption(victims) => {
                for victim in &victims {
                    warn!("[lifecycle] preempting '{}' for higher-priority '{}'", victim, def.name);
                    if let Some(report) = self.teardown(store, victim).await {
                        for w in report.warnings {
                            warn!("[lifecycle] preemption of '{}': {}", victim, w);
                        }
                    }
                }
                if let Some((link, _)) = demand
                    .iter()
                    .find(|(link, required)| store.topology.link(link).is_none_or(|r| r.headroom() < *required))
                {
                    return Err(SliceError::PreemptionInfeasible { slice: def.name.clone(), link: *link });
                }
                victims
            }
        };

        let plan = self.installer.plan(&paths);
        let rules = self.installer.install(&plan).await?;

        let mut interfaces: BTreeSet<String> = BTreeSet::new();
        for (flow, path) in def.flows.iter().zip(&paths) {
            for interface in self.qos.interfaces_for(path) {
                let request = QueueRequest {
                    slice: def.name.clone(),
                    capacity_pct: def.capacity_pct,
                    src: flow.src,
                    dst: flow.dst,
                    interface: interface.clone(),
                };
                interfaces.insert(interface);
                if let Err(e) = self.qos.ensure(&request).await {
                    error!("[lifecycle] QoS for '{}' failed, rolling back: {}", def.name, e);
                    self.unwind(store, &def.name, &rules, &interfaces).await;
                    return Err(e);
                }
            }
        }

        let mut reserved: Vec<(LinkId, Bandwidth)> = Vec::with_capacity(demand.len());
        for (link, amount) in &demand {
            if let Err(e) = store.topology.reserve(link, *amount) {
                error!("[lifecycle] reservation for '{}' refused on {}: {}", def.name, link, e);
                for (done, amount) in reserved.iter().rev() {
                    if let Err(e) = store.topology.release(done, *amount) {
                        error!("[lifecycle] release during rollback failed: {}", e);
                    }
                }
                self.unwind(store, &def.name, &rules, &interfaces).await;
                return Err(e.into());
            }
            reserved.push((*link, *amount));
        }

        let activation_seq = store.next_seq;
        store.next_seq += 1;
        let instance = SliceInstance {
            name: def.name.clone(),
            priority: def.priority,
            activation_seq,
            activated_at: OffsetDateTime::now_utc(),
            flows: def
                .flows
                .iter()
                .cloned()
                .zip(paths)
                .map(|(flow, path)| ActiveFlow { flow, path })
                .collect(),
            rules,
            reservations: reserved.into_iter().collect(),
            qos_interfaces: interfaces,
        };
        let report = ActivationReport {
            slice: def.name.clone(),
            installed_flows: instance.flows.iter().map(|f| f.flow.to_string()).collect(),
            installed_rules: instance.rules.len(),
            preempted_slices: preempted,
        };
        store.instances.insert(def.name.clone(), instance);
        Ok(report)
    }

    /// Undoes a partial activation: queues on interfaces nobody else uses,
    /// then rules.
    async fn unwind(&self, store: &SliceStore, slice: &str, rules: &[InstalledRule], interfaces: &BTreeSet<String>) {
        for interface in interfaces {
            if !store.sharing(interface, slice).is_empty() {
                continue;
            }
            if let Err(e) = self.qos.remove(slice, interface).await {
                warn!("[lifecycle] rollback: {}", e);
            }
        }
        for w in self.installer.remove(rules).await {
            warn!("[lifecycle] rollback: {}", w);
        }
    }

    pub async fn deactivate(&self, name: &str) -> Result<DeactivationReport, SliceError> {
        let mut store = self.store.write().await;
        let report = self.teardown(&mut store, name).await.ok_or_else(|| SliceError::NotActive(name.to_string()))?;
        info!("[lifecycle] slice '{}' deactivated ({} warnings)", name, report.warnings.len());
        Ok(report)
    }

    /// Full removal of an active slice. None when it is not active.
    async fn teardown(&self, store: &mut SliceStore, name: &str) -> Option<DeactivationReport> {
        let instance = store.instances.remove(name)?;
        let mut warnings = self.installer.remove(&instance.rules).await;

        for interface in &instance.qos_interfaces {
            let co_located = store.sharing(interface, name);
            if !co_located.is_empty() {
                let w = format!("kept queues on {} (still used by {})", interface, co_located.join(", "));
                warn!("[lifecycle] {}", w);
                warnings.push(w);
                continue;
            }
            if let Err(e) = self.qos.remove(name, interface).await {
                warn!("[lifecycle] {}", e);
                warnings.push(e.to_string());
            }
        }

        for (link, amount) in &instance.reservations {
            if let Err(e) = store.topology.release(link, *amount) {
                error!("[lifecycle] releasing {} on {} failed: {}", amount, link, e);
                warnings.push(e.to_string());
            }
        }
        Some(DeactivationReport { slice: name.to_string(), warnings })
    }
}
