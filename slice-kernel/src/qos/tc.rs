//! `tc` backend: one HTB hierarchy per egress interface.
//!
//! ```text
//! root 1: htb default 999
//! └── 1:1    1000mbit
//!     ├── 1:999  1000mbit          (unclassified traffic)
//!     └── 1:<id> <pct>mbit, 30k burst  <- u32 filter on src/32 + dst/32
//! ```

use super::{class_id, run_checked, CommandRunner, QosBackend, QueueRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// What is left on an interface after its queues are removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalMode {
    /// No root discipline at all.
    #[default]
    Purge,
    /// A plain pfifo_fast root.
    BestEffort,
}

pub struct TcBackend {
    runner: Arc<dyn CommandRunner>,
    binary: String,
    removal: RemovalMode,
}

impl TcBackend {
    pub fn new(runner: Arc<dyn CommandRunner>, binary: impl Into<String>, removal: RemovalMode) -> Self {
        Self { runner, binary: binary.into(), removal }
    }

    async fn tc(&self, args: &[&str]) -> anyhow::Result<String> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        Ok(run_checked(self.runner.as_ref(), &self.binary, args).await?.stdout)
    }

    async fn has_hierarchy(&self, iface: &str) -> anyhow::Result<bool> {
        let shown = self.tc(&["qdisc", "show", "dev", iface]).await?;
        Ok(shown.lines().any(|l| l.contains("htb 1:") && l.contains("root")))
    }
}

#[async_trait]
impl QosBackend for TcBackend {
    async fn ensure_queue(&self, request: &QueueRequest) -> anyhow::Result<()> {
        let iface = request.interface.as_str();
        if !self.has_hierarchy(iface).await? {
            debug!("[qos/tc] creating htb hierarchy on {}", iface);
            self.tc(&["qdisc", "replace", "dev", iface, "root", "handle", "1:", "htb", "default", "999"]).await?;
            self.tc(&["class", "add", "dev", iface, "parent", "1:", "classid", "1:1", "htb", "rate", "1000mbit", "ceil", "1000mbit"])
                .await?;
            self.tc(&["class", "add", "dev", iface, "parent", "1:1", "classid", "1:999", "htb", "rate", "1000mbit", "ceil", "1000mbit"])
                .await?;
        }

        let classid = format!("1:{}", class_id(&request.slice));
        let rate = format!("{}mbit", request.capacity_pct);
        let src = format!("{}/32", request.src);
        let dst = format!("{}/32", request.dst);
        self.tc(&[
            "class", "replace", "dev", iface, "parent", "1:1", "classid", &classid, "htb", "rate", &rate, "ceil", &rate, "burst", "30k",
        ])
        .await?;
        self.tc(&[
            "filter", "add", "dev", iface, "protocol", "ip", "parent", "1:0", "prio", "1", "u32", "match", "ip", "src", &src, "match",
            "ip", "dst", &dst, "flowid", &classid,
        ])
        .await?;
        Ok(())
    }

    async fn remove_queue(&self, slice: &str, interface: &str) -> anyhow::Result<()> {
        debug!("[qos/tc] removing hierarchy on {} for '{}'", interface, slice);
        self.tc(&["qdisc", "del", "dev", interface, "root"]).await?;
        if self.removal == RemovalMode::BestEffort {
            self.tc(&["qdisc", "add", "dev", interface, "root", "pfifo_fast"]).await?;
        }
        Ok(())
    }
}
