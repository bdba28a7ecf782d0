/**
 * SLICE KERNEL - Process entry point
 *
 * ROLE: Wires config, catalog, QoS backend, MQTT switch transport, the
 * serialized engine and the HTTP control API together.
 *
 * STARTUP ORDER: config -> catalog -> transport + engine -> static topology
 * preload -> MQTT listener -> HTTP.
 */

use anyhow::Context;
use slice_kernel::catalog::SliceCatalog;
use slice_kernel::config::{load_config, QosBackendKind, QosConf};
use slice_kernel::health::HealthTracker;
use slice_kernel::http::{build_router, AppState};
use slice_kernel::mqtt::{self, MqttSwitchTransport, Topics};
use slice_kernel::qos::{NullBackend, QosAdapter, QosBackend, ScriptBackend, TcBackend, TokioRunner};
use slice_kernel::rules::FlowRuleInstaller;
use slice_kernel::topology::TopologyModel;
use slice_kernel::{spawn_engine, SliceLifecycleManager};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn qos_backend(cfg: &QosConf) -> anyhow::Result<Arc<dyn QosBackend>> {
    let runner = Arc::new(TokioRunner);
    let backend: Arc<dyn QosBackend> = match cfg.backend {
        QosBackendKind::Tc => Arc::new(TcBackend::new(runner, &cfg.tc_binary, cfg.removal)),
        QosBackendKind::Script => Arc::new(
            ScriptBackend::new(runner, &cfg.create_command, &cfg.delete_command).context("qos script templates")?,
        ),
        QosBackendKind::Disabled => Arc::new(NullBackend),
    };
    Ok(backend)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("slice_kernel=info")))
        .init();

    let cfg = load_config().await.context("loading kernel config")?;
    let catalog = SliceCatalog::load(&cfg.catalog_path, &cfg.hosts)
        .await
        .with_context(|| format!("loading slice catalog {}", cfg.catalog_path))?;
    info!("[kernel] catalog loaded: {:?}", catalog.names());

    let timeout = cfg.engine.backend_timeout();
    let topics = Topics::new(&cfg.mqtt.topic_prefix);
    let (client, eventloop) = mqtt::connect(&cfg.mqtt);
    let transport = Arc::new(MqttSwitchTransport::new(client.clone(), &topics, timeout));

    let installer = FlowRuleInstaller::new(transport.clone(), cfg.rules.priorities(), timeout);
    let qos = QosAdapter::new(qos_backend(&cfg.qos)?, timeout, cfg.qos.interface_template.clone(), cfg.qos.scope);
    info!("[kernel] qos backend {:?}, scope {:?}", cfg.qos.backend, cfg.qos.scope);

    let manager = SliceLifecycleManager::new(TopologyModel::new(), Arc::new(catalog), installer, qos);
    let (engine, _engine_task) = spawn_engine(manager, cfg.engine.queue_capacity);

    if let Some(static_topology) = &cfg.topology {
        let events = static_topology.events(&cfg.hosts)?;
        info!("[kernel] preloading {} static topology events", events.len());
        for event in events {
            engine.apply_topology(event).await?;
        }
    }

    let health_tracker = HealthTracker::new();
    mqtt::spawn_mqtt_listener(client, eventloop, topics, engine.clone(), transport, health_tracker.clone());

    let app = build_router(AppState {
        engine,
        health_tracker,
        api_key: cfg.http.api_key.as_deref().map(Arc::from),
    });

    let addr: SocketAddr = cfg.http.bind.parse().with_context(|| format!("invalid http.bind '{}'", cfg.http.bind))?;
    let listener = TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
    info!("[kernel] control API listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
