//! Script backend: runs operator-supplied commands such as
//! `./queue_create.sh {slice} {pct} {src} {dst} {iface}`.
//!
//! Templates are split with shell quoting rules first and the placeholders
//! are substituted per argument afterwards, so values never get re-split.

use super::{run_checked, CommandRunner, QosBackend, QueueRequest};
use async_trait::async_trait;
use std::sync::Arc;

pub struct ScriptBackend {
    runner: Arc<dyn CommandRunner>,
    create: Vec<String>,
    delete: Vec<String>,
}

impl ScriptBackend {
    pub fn new(runner: Arc<dyn CommandRunner>, create_template: &str, delete_template: &str) -> anyhow::Result<Self> {
        let create = split_template(create_template)?;
        let delete = split_template(delete_template)?;
        Ok(Self { runner, create, delete })
    }

    async fn invoke(&self, template: &[String], fill: impl Fn(&str) -> String) -> anyhow::Result<()> {
        let mut argv = template.iter().map(|part| fill(part));
        let program = argv.next().ok_or_else(|| anyhow::anyhow!("empty command template"))?;
        run_checked(self.runner.as_ref(), &program, argv.collect()).await?;
        Ok(())
    }
}

fn split_template(template: &str) -> anyhow::Result<Vec<String>> {
    let parts = shell_words::split(template).map_err(|e| anyhow::anyhow!("bad command template '{template}': {e}"))?;
    if parts.is_empty() {
        anyhow::bail!("command template is empty");
    }
    Ok(parts)
}

#[async_trait]
impl QosBackend for ScriptBackend {
    async fn ensure_queue(&self, request: &QueueRequest) -> anyhow::Result<()> {
        let pct = request.capacity_pct.to_string();
        let src = request.src.to_string();
        let dst = request.dst.to_string();
        self.invoke(&self.create, |part| {
            part.replace("{slice}", &request.slice)
                .replace("{pct}", &pct)
                .replace("{src}", &src)
                .replace("{dst}", &dst)
                .replace("{iface}", &request.interface)
        })
        .await
    }

    async fn remove_queue(&self, slice: &str, interface: &str) -> anyhow::Result<()> {
        self.invoke(&self.delete, |part| part.replace("{slice}", slice).replace("{iface}", interface)).await
    }
}
