/**
 * FLOW RULE INSTALLER - Resolved paths -> forwarding / isolation rules on switches
 *
 * ROLE:
 * Builds the rule plan of a slice and drives it through the switch-protocol
 * transport, keeping every returned RuleHandle so removal is exact.
 *
 * RULE CATEGORIES (strictly decreasing priority):
 * - forward   : every switch on the path, (src, dst) -> next-hop port
 * - reverse   : every switch on the reversed path, (dst, src) -> next-hop port
 * - isolation : attachment switch of each slice host, (host, *) -> drop
 *
 * ORDERING:
 * Install forward + reverse before isolation, remove isolation before
 * forward + reverse. A slice host never sees its drop rule without the
 * rules that let it reach its peer.
 */

use crate::error::SliceError;
use crate::models::{PortNo, SwitchId};
use crate::path::ResolvedPath;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Opaque reference returned by the transport for one installed rule.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleHandle(pub String);

impl std::fmt::Display for RuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// IPv4 match; `ipv4_dst: None` matches any destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleMatch {
    pub ipv4_src: Ipv4Addr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_dst: Option<Ipv4Addr>,
}

impl RuleMatch {
    pub fn matches(&self, src: Ipv4Addr, dst: Ipv4Addr) -> bool {
        self.ipv4_src == src && self.ipv4_dst.is_none_or(|d| d == dst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    Output { port: PortNo },
    Drop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRule {
    pub switch: SwitchId,
    #[serde(rename = "match")]
    pub rule_match: RuleMatch,
    pub priority: u16,
    pub action: RuleAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Forward,
    Reverse,
    Isolation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedRule {
    pub kind: RuleKind,
    pub rule: FlowRule,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledRule {
    pub kind: RuleKind,
    pub rule: FlowRule,
    pub handle: RuleHandle,
}

/// Command side of the switch-protocol transport.
#[async_trait]
pub trait SwitchTransport: Send + Sync {
    async fn install_rule(&self, rule: &FlowRule) -> anyhow::Result<RuleHandle>;
    async fn remove_rule(&self, handle: &RuleHandle) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulePriorities {
    pub forward: u16,
    pub reverse: u16,
    pub isolation: u16,
}

impl Default for RulePriorities {
    fn default() -> Self {
        Self { forward: 20, reverse: 15, isolation: 10 }
    }
}

pub struct FlowRuleInstaller {
    transport: Arc<dyn SwitchTransport>,
    priorities: RulePriorities,
    timeout: Duration,
}

impl FlowRuleInstaller {
    pub fn new(transport: Arc<dyn SwitchTransport>, priorities: RulePriorities, timeout: Duration) -> Self {
        Self { transport, priorities, timeout }
    }

    /// Full rule plan for a slice: forward + reverse for every flow in flow
    /// order, then the de-duplicated isolation rules.
    pub fn plan(&self, paths: &[ResolvedPath]) -> Vec<PlannedRule> {
        let mut plan = Vec::new();
        for path in paths {
            plan.extend(self.directed(path, RuleKind::Forward, self.priorities.forward));
            plan.extend(self.directed(&path.reversed(), RuleKind::Reverse, self.priorities.reverse));
        }

        let mut isolated: Vec<(SwitchId, Ipv4Addr)> = Vec::new();
        for path in paths {
            for host in [path.src, path.dst] {
                let key = (host.attachment.switch, host.addr);
                if isolated.contains(&key) {
                    continue;
                }
                isolated.push(key);
                plan.push(PlannedRule {
                    kind: RuleKind::Isolation,
                    rule: FlowRule {
                        switch: key.0,
                        rule_match: RuleMatch { ipv4_src: host.addr, ipv4_dst: None },
                        priority: self.priorities.isolation,
                        action: RuleAction::Drop,
                    },
                });
            }
        }
        plan
    }

    fn directed(&self, path: &ResolvedPath, kind: RuleKind, priority: u16) -> Vec<PlannedRule> {
        path.switches
            .iter()
            .zip(path.egress_ports())
            .map(|(switch, egress)| PlannedRule {
                kind,
                rule: FlowRule {
                    switch: *switch,
                    rule_match: RuleMatch { ipv4_src: path.src.addr, ipv4_dst: Some(path.dst.addr) },
                    priority,
                    action: RuleAction::Output { port: egress.port },
                },
            })
            .collect()
    }

    /// Installs the plan in order. On the first failure everything installed
    /// by this call is removed again before the error is returned.
    pub async fn install(&self, plan: &[PlannedRule]) -> Result<Vec<InstalledRule>, SliceError> {
        let mut installed: Vec<InstalledRule> = Vec::with_capacity(plan.len());
        for planned in plan {
            match self.install_one(&planned.rule).await {
                Ok(handle) => {
                    debug!(
                        "[rules] {:?} rule on {}: {} -> {:?} (prio {}) handle {}",
                        planned.kind,
                        planned.rule.switch,
                        planned.rule.rule_match.ipv4_src,
                        planned.rule.action,
                        planned.rule.priority,
                        handle
                    );
                    installed.push(InstalledRule { kind: planned.kind, rule: planned.rule.clone(), handle });
                }
                Err(reason) => {
                    error!("[rules] install failed on {}: {}; rolling back {} rules", planned.rule.switch, reason, installed.len());
                    for warning in self.remove(&installed).await {
                        warn!("[rules] rollback: {}", warning);
                    }
                    return Err(SliceError::RuleInstallFailure { switch: planned.rule.switch, reason });
                }
            }
        }
        Ok(installed)
    }

    async fn install_one(&self, rule: &FlowRule) -> Result<RuleHandle, String> {
        match tokio::time::timeout(self.timeout, self.transport.install_rule(rule)).await {
            Ok(Ok(handle)) => Ok(handle),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {} ms", self.timeout.as_millis())),
        }
    }

    /// Removes installed rules: isolation first, then forward + reverse, each
    /// group newest first. Failures do not stop the sweep; they come back as
    /// warnings.
    pub async fn remove(&self, installed: &[InstalledRule]) -> Vec<String> {
        let isolation = installed.iter().rev().filter(|r| r.kind == RuleKind::Isolation);
        let forwarding = installed.iter().rev().filter(|r| r.kind != RuleKind::Isolation);

        let mut warnings = Vec::new();
        for rule in isolation.chain(forwarding) {
            let outcome = tokio::time::timeout(self.timeout, self.transport.remove_rule(&rule.handle)).await;
            let failure = match outcome {
                Ok(Ok(())) => {
                    debug!("[rules] removed {:?} rule {} on {}", rule.kind, rule.handle, rule.rule.switch);
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {} ms", self.timeout.as_millis()),
            };
            warnings.push(format!("failed to remove rule {} on {}: {}", rule.handle, rule.rule.switch, failure));
        }
        warnings
    }
}
