/**
 * SOUTHBOUND MQTT BRIDGE - Switch-protocol transport over the broker
 *
 * ROLE:
 * Links the kernel to the switch agent that speaks the switch protocol.
 *
 * TOPICS (prefix from config, default "slices"):
 * - <prefix>/topology/events@v1   <- discovery events (tagged JSON)
 * - <prefix>/switch/command@v1    -> install_rule / remove_rule with request_id
 * - <prefix>/switch/response@v1   <- success / error for a request_id
 *
 * FLOW:
 * Commands park a oneshot sender under their request_id, publish, and wait
 * with a timeout. The listener task routes responses back to the waiting
 * sender and forwards discovery events to the engine in arrival order.
 */

use crate::config::MqttConf;
use crate::engine::EngineHandle;
use crate::health::HealthTracker;
use crate::rules::{FlowRule, RuleHandle, SwitchTransport};
use crate::state::{new_state, Shared};
use crate::topology::TopologyEvent;
use anyhow::Context;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Topics {
    pub events: String,
    pub command: String,
    pub response: String,
}

impl Topics {
    pub fn new(prefix: &str) -> Self {
        Self {
            events: format!("{prefix}/topology/events@v1"),
            command: format!("{prefix}/switch/command@v1"),
            response: format!("{prefix}/switch/response@v1"),
        }
    }
}

/// Commands published to the switch agent.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SwitchCommand {
    InstallRule { request_id: String, rule: FlowRule },
    RemoveRule { request_id: String, handle: RuleHandle },
}

impl SwitchCommand {
    fn request_id(&self) -> &str {
        match self {
            Self::InstallRule { request_id, .. } | Self::RemoveRule { request_id, .. } => request_id,
        }
    }
}

/// Answers from the switch agent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SwitchResponse {
    Success {
        request_id: String,
        #[serde(default)]
        handle: Option<RuleHandle>,
    },
    Error {
        request_id: String,
        error: String,
    },
}

impl SwitchResponse {
    fn request_id(&self) -> &str {
        match self {
            Self::Success { request_id, .. } | Self::Error { request_id, .. } => request_id,
        }
    }
}

pub fn connect(cfg: &MqttConf) -> (AsyncClient, EventLoop) {
    let mut opts = MqttOptions::new(&cfg.client_id, &cfg.host, cfg.port);
    opts.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs.max(5)));
    AsyncClient::new(opts, 64)
}

pub struct MqttSwitchTransport {
    client: AsyncClient,
    command_topic: String,
    pending: Shared<HashMap<String, oneshot::Sender<SwitchResponse>>>,
    timeout: Duration,
}

impl MqttSwitchTransport {
    pub fn new(client: AsyncClient, topics: &Topics, timeout: Duration) -> Self {
        Self {
            client,
            command_topic: topics.command.clone(),
            pending: new_state(HashMap::new()),
            timeout,
        }
    }

    /// Routes a response to the request waiting for it.
    pub fn handle_response(&self, response: SwitchResponse) {
        let request_id = response.request_id().to_string();
        match self.pending.lock().remove(&request_id) {
            Some(sender) => {
                if sender.send(response).is_err() {
                    debug!("[mqtt] requester for {} already gave up", request_id);
                }
            }
            None => warn!("[mqtt] response for unknown request {}", request_id),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    async fn round_trip(&self, command: SwitchCommand) -> anyhow::Result<SwitchResponse> {
        let request_id = command.request_id().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.clone(), tx);

        let payload = serde_json::to_string(&command)?;
        if let Err(e) = self.client.publish(&self.command_topic, QoS::AtLeastOnce, false, payload).await {
            self.pending.lock().remove(&request_id);
            return Err(e).context("publishing switch command");
        }

        match timeout(self.timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.pending.lock().remove(&request_id);
                anyhow::bail!("response channel for {request_id} closed")
            }
            Err(_) => {
                self.pending.lock().remove(&request_id);
                anyhow::bail!("no switch response for {request_id} within {} ms", self.timeout.as_millis())
            }
        }
    }
}

#[async_trait]
impl SwitchTransport for MqttSwitchTransport {
    async fn install_rule(&self, rule: &FlowRule) -> anyhow::Result<RuleHandle> {
        let command = SwitchCommand::InstallRule { request_id: Uuid::new_v4().to_string(), rule: rule.clone() };
        match self.round_trip(command).await? {
            SwitchResponse::Success { handle: Some(handle), .. } => Ok(handle),
            SwitchResponse::Success { handle: None, .. } => anyhow::bail!("switch agent returned no rule handle"),
            SwitchResponse::Error { error, .. } => anyhow::bail!(error),
        }
    }

    async fn remove_rule(&self, handle: &RuleHandle) -> anyhow::Result<()> {
        let command = SwitchCommand::RemoveRule { request_id: Uuid::new_v4().to_string(), handle: handle.clone() };
        match self.round_trip(command).await? {
            SwitchResponse::Success { .. } => Ok(()),
            SwitchResponse::Error { error, .. } => anyhow::bail!(error),
        }
    }
}

/// Polls the broker connection for the lifetime of the process.
pub fn spawn_mqtt_listener(
    client: AsyncClient,
    mut eventloop: EventLoop,
    topics: Topics,
    engine: EngineHandle,
    transport: Arc<MqttSwitchTransport>,
    health: HealthTracker,
) -> JoinHandle<()> {
    // Discovery events go through their own queue so a full engine queue
    // never stalls broker polling (switch responses arrive on this loop).
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<TopologyEvent>();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if engine.submit_topology(event).await.is_err() {
                error!("[mqtt] engine stopped, dropping discovery events");
                break;
            }
        }
    });

    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("[mqtt] connected, subscribing to {} and {}", topics.events, topics.response);
                    health.mark_mqtt_connected();
                    for topic in [&topics.events, &topics.response] {
                        if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                            error!("[mqtt] subscribe {} failed: {:?}", topic, e);
                        }
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) if p.topic == topics.events => {
                    match serde_json::from_slice::<TopologyEvent>(&p.payload) {
                        Ok(event) => {
                            if event_tx.send(event).is_err() {
                                error!("[mqtt] discovery forwarder stopped");
                            }
                        }
                        Err(e) => warn!("[mqtt] invalid topology event: {} ({})", String::from_utf8_lossy(&p.payload), e),
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) if p.topic == topics.response => {
                    match serde_json::from_slice::<SwitchResponse>(&p.payload) {
                        Ok(response) => transport.handle_response(response),
                        Err(e) => warn!("[mqtt] invalid switch response: {} ({})", String::from_utf8_lossy(&p.payload), e),
                    }
                }
                Ok(Event::Incoming(Incoming::Disconnect)) => health.mark_mqtt_disconnected(),
                Ok(_) => {}
                Err(e) => {
                    error!("[mqtt] connection error: {:?}", e);
                    health.increment_reconnects();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PortNo, SwitchId};
    use crate::rules::{RuleAction, RuleMatch};

    fn transport(timeout_ms: u64) -> (Arc<MqttSwitchTransport>, EventLoop) {
        let (client, eventloop) = connect(&MqttConf::default());
        let transport = MqttSwitchTransport::new(client, &Topics::new("slices"), Duration::from_millis(timeout_ms));
        (Arc::new(transport), eventloop)
    }

    fn rule() -> FlowRule {
        FlowRule {
            switch: SwitchId(1),
            rule_match: RuleMatch { ipv4_src: "10.0.0.1".parse().unwrap(), ipv4_dst: Some("10.0.0.8".parse().unwrap()) },
            priority: 20,
            action: RuleAction::Output { port: PortNo(2) },
        }
    }

    #[test]
    fn command_wire_format() {
        let cmd = SwitchCommand::InstallRule { request_id: "r1".into(), rule: rule() };
        let json: serde_json::Value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["action"], "install_rule");
        assert_eq!(json["rule"]["switch"], 1);
        assert_eq!(json["rule"]["match"]["ipv4_src"], "10.0.0.1");
        assert_eq!(json["rule"]["action"]["type"], "output");
        assert_eq!(json["rule"]["action"]["port"], 2);

        let resp: SwitchResponse = serde_json::from_str(r#"{"type":"success","request_id":"r1","handle":"s1/42"}"#).unwrap();
        assert_eq!(resp, SwitchResponse::Success { request_id: "r1".into(), handle: Some(RuleHandle("s1/42".into())) });
    }

    #[tokio::test]
    async fn response_completes_the_waiting_request() {
        let (transport, _eventloop) = transport(2_000);
        let waiting = {
            let transport = transport.clone();
            tokio::spawn(async move {
                transport.round_trip(SwitchCommand::InstallRule { request_id: "abc".into(), rule: rule() }).await
            })
        };
        while transport.pending_count() == 0 {
            tokio::task::yield_now().await;
        }
        transport.handle_response(SwitchResponse::Success { request_id: "abc".into(), handle: Some(RuleHandle("h".into())) });

        let response = waiting.await.unwrap().unwrap();
        assert!(matches!(response, SwitchResponse::Success { handle: Some(_), .. }));
        assert_eq!(transport.pending_count(), 0);
    }

    #[tokio::test]
    async fn missing_response_times_out_and_clears_pending() {
        let (transport, _eventloop) = transport(30);
        let err = transport.install_rule(&rule()).await.unwrap_err();
        assert!(err.to_string().contains("no switch response"));
        assert_eq!(transport.pending_count(), 0);
    }
}
