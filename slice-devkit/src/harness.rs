/*!
Engine test harness: a running engine over the in-memory doubles.
*/

use crate::fixtures;
use crate::qos::RecordingQos;
use crate::reachability;
use crate::switch::MemorySwitch;
use slice_kernel::catalog::SliceCatalog;
use slice_kernel::engine::{spawn_engine, EngineHandle};
use slice_kernel::qos::{QosAdapter, QosScope};
use slice_kernel::rules::{FlowRuleInstaller, RulePriorities};
use slice_kernel::topology::TopologyModel;
use slice_kernel::SliceLifecycleManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const BACKEND_TIMEOUT: Duration = Duration::from_millis(500);

/// Installs a test-friendly tracing subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "slice_kernel=debug".into()))
        .with_test_writer()
        .try_init();
}

pub struct Harness {
    pub engine: EngineHandle,
    pub switch: Arc<MemorySwitch>,
    pub qos: Arc<RecordingQos>,
    task: JoinHandle<()>,
}

impl Harness {
    /// Reference lab topology with the lab catalog.
    pub fn lab() -> Self {
        Self::with(fixtures::lab(), fixtures::lab_catalog(), QosScope::EveryHop)
    }

    pub fn with(topology: TopologyModel, catalog: SliceCatalog, scope: QosScope) -> Self {
        init_tracing();
        let switch = Arc::new(MemorySwitch::new());
        let qos = Arc::new(RecordingQos::new());
        let installer = FlowRuleInstaller::new(switch.clone(), RulePriorities::default(), BACKEND_TIMEOUT);
        let adapter = QosAdapter::new(qos.clone(), BACKEND_TIMEOUT, "s{switch}-eth{port}", scope);
        let manager = SliceLifecycleManager::new(topology, Arc::new(catalog), installer, adapter);
        let (engine, task) = spawn_engine(manager, 64);
        Self { engine, switch, qos, task }
    }

    pub async fn topology(&self) -> TopologyModel {
        self.engine.reader().inspect(|store| store.topology.clone()).await
    }

    pub async fn active(&self) -> Vec<String> {
        self.engine.reader().inspect(|store| store.active_names()).await
    }

    /// Both directions between two lab hosts, given the rules installed now.
    pub async fn can_ping(&self, a: &str, b: &str) -> bool {
        let topo = self.topology().await;
        reachability::can_ping(&topo, &self.switch.installed(), fixtures::ip(a), fixtures::ip(b))
    }

    pub async fn pingall_failures(&self) -> Vec<(String, String)> {
        let topo = self.topology().await;
        let names: std::collections::BTreeMap<std::net::Ipv4Addr, String> =
            fixtures::aliases().into_iter().map(|(name, addr)| (addr, name)).collect();
        reachability::pingall(&topo, &self.switch.installed())
            .into_iter()
            .map(|(a, b)| (names[&a].clone(), names[&b].clone()))
            .collect()
    }

    /// Kills the engine loop while handles are still around.
    pub async fn stop_engine(&mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }

    /// Drops the handle and waits for the engine loop to finish.
    pub async fn shutdown(self) {
        drop(self.engine);
        let _ = self.task.await;
    }
}
