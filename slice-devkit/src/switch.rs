/*!
In-memory switch transport.

Keeps the flow tables of every switch, hands out `s<n>/<seq>` handles and
records every install / remove in order. Failures can be injected after a
number of successful installs, on chosen switches, or on every removal.
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use slice_kernel::models::SwitchId;
use slice_kernel::rules::{FlowRule, RuleHandle, SwitchTransport};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchOp {
    Install(RuleHandle, FlowRule),
    Remove(RuleHandle),
}

#[derive(Default)]
struct Tables {
    next: u64,
    installed: BTreeMap<RuleHandle, FlowRule>,
    successful_installs: usize,
    ops: Vec<SwitchOp>,
}

#[derive(Default)]
struct Faults {
    fail_after: Option<usize>,
    fail_switches: BTreeSet<SwitchId>,
    fail_removals: bool,
    delay: Option<Duration>,
}

#[derive(Default)]
pub struct MemorySwitch {
    tables: Mutex<Tables>,
    faults: Mutex<Faults>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemorySwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every install after the first `n` successful ones fails.
    pub fn fail_after(&self, n: usize) {
        self.faults.lock().fail_after = Some(n);
    }

    pub fn fail_on_switch(&self, switch: SwitchId) {
        self.faults.lock().fail_switches.insert(switch);
    }

    pub fn fail_removals(&self, fail: bool) {
        self.faults.lock().fail_removals = fail;
    }

    /// Makes every call sleep first, to widen interleaving windows.
    pub fn with_delay(&self, delay: Duration) {
        self.faults.lock().delay = Some(delay);
    }

    pub fn clear_failures(&self) {
        let mut faults = self.faults.lock();
        faults.fail_after = None;
        faults.fail_switches.clear();
        faults.fail_removals = false;
    }

    pub fn installed(&self) -> Vec<FlowRule> {
        self.tables.lock().installed.values().cloned().collect()
    }

    pub fn installed_on(&self, switch: SwitchId) -> Vec<FlowRule> {
        self.tables.lock().installed.values().filter(|r| r.switch == switch).cloned().collect()
    }

    pub fn rule_count(&self) -> usize {
        self.tables.lock().installed.len()
    }

    pub fn ops(&self) -> Vec<SwitchOp> {
        self.tables.lock().ops.clone()
    }

    /// Highest number of rule operations that were in progress at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = self.faults.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn try_install(&self, rule: &FlowRule) -> anyhow::Result<RuleHandle> {
        let mut tables = self.tables.lock();
        {
            let faults = self.faults.lock();
            if faults.fail_after.is_some_and(|n| tables.successful_installs >= n) {
                anyhow::bail!("injected install failure on {}", rule.switch);
            }
            if faults.fail_switches.contains(&rule.switch) {
                anyhow::bail!("switch {} is refusing flow-mods", rule.switch);
            }
        }
        tables.next += 1;
        let handle = RuleHandle(format!("{}/{}", rule.switch, tables.next));
        tables.installed.insert(handle.clone(), rule.clone());
        tables.successful_installs += 1;
        tables.ops.push(SwitchOp::Install(handle.clone(), rule.clone()));
        Ok(handle)
    }

    fn try_remove(&self, handle: &RuleHandle) -> anyhow::Result<()> {
        if self.faults.lock().fail_removals {
            anyhow::bail!("injected removal failure for {handle}");
        }
        let mut tables = self.tables.lock();
        if tables.installed.remove(handle).is_none() {
            anyhow::bail!("unknown rule handle {handle}");
        }
        tables.ops.push(SwitchOp::Remove(handle.clone()));
        Ok(())
    }
}

#[async_trait]
impl SwitchTransport for MemorySwitch {
    async fn install_rule(&self, rule: &FlowRule) -> anyhow::Result<RuleHandle> {
        self.enter().await;
        let result = self.try_install(rule);
        self.leave();
        result
    }

    async fn remove_rule(&self, handle: &RuleHandle) -> anyhow::Result<()> {
        self.enter().await;
        let result = self.try_remove(handle);
        self.leave();
        result
    }
}
