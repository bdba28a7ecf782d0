/*!
QoS doubles: a backend that records ensure / remove calls, and a command
runner that captures argv with scripted outputs.
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use slice_kernel::qos::{CommandOutput, CommandRunner, QosBackend, QueueRequest};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QosCall {
    Ensure(QueueRequest),
    Remove { slice: String, interface: String },
}

#[derive(Default)]
struct QosFaults {
    fail_ensure_on: BTreeSet<String>,
    fail_removals: bool,
}

#[derive(Default)]
pub struct RecordingQos {
    calls: Mutex<Vec<QosCall>>,
    faults: Mutex<QosFaults>,
}

impl RecordingQos {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_ensure_on(&self, interface: &str) {
        self.faults.lock().fail_ensure_on.insert(interface.to_string());
    }

    pub fn fail_removals(&self, fail: bool) {
        self.faults.lock().fail_removals = fail;
    }

    pub fn clear_failures(&self) {
        let mut faults = self.faults.lock();
        faults.fail_ensure_on.clear();
        faults.fail_removals = false;
    }

    pub fn calls(&self) -> Vec<QosCall> {
        self.calls.lock().clone()
    }

    pub fn ensures(&self) -> Vec<QueueRequest> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                QosCall::Ensure(r) => Some(r.clone()),
                QosCall::Remove { .. } => None,
            })
            .collect()
    }

    /// Interfaces passed to remove, in call order.
    pub fn removals(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                QosCall::Remove { interface, .. } => Some(interface.clone()),
                QosCall::Ensure(_) => None,
            })
            .collect()
    }

    /// Interfaces that currently carry a hierarchy, replaying the calls with
    /// interface-wide removal.
    pub fn shaped_interfaces(&self) -> BTreeSet<String> {
        let mut shaped = BTreeSet::new();
        for call in self.calls.lock().iter() {
            match call {
                QosCall::Ensure(r) => {
                    shaped.insert(r.interface.clone());
                }
                QosCall::Remove { interface, .. } => {
                    shaped.remove(interface);
                }
            }
        }
        shaped
    }
}

#[async_trait]
impl QosBackend for RecordingQos {
    async fn ensure_queue(&self, request: &QueueRequest) -> anyhow::Result<()> {
        self.calls.lock().push(QosCall::Ensure(request.clone()));
        if self.faults.lock().fail_ensure_on.contains(&request.interface) {
            anyhow::bail!("Cannot find device \"{}\"", request.interface);
        }
        Ok(())
    }

    async fn remove_queue(&self, slice: &str, interface: &str) -> anyhow::Result<()> {
        self.calls.lock().push(QosCall::Remove { slice: slice.to_string(), interface: interface.to_string() });
        if self.faults.lock().fail_removals {
            anyhow::bail!("RTNETLINK answers: No such file or directory");
        }
        Ok(())
    }
}

/// Captures every invocation; replies with the first scripted output whose
/// pattern occurs in the joined command line, or a silent success.
#[derive(Default)]
pub struct RecordingRunner {
    invocations: Mutex<Vec<Vec<String>>>,
    script: Mutex<Vec<(String, CommandOutput)>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, pattern: &str, output: CommandOutput) {
        self.script.lock().push((pattern.to_string(), output));
    }

    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.invocations.lock().clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.invocations.lock().iter().map(|argv| argv.join(" ")).collect()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, program: &str, args: &[String]) -> anyhow::Result<CommandOutput> {
        let mut argv = vec![program.to_string()];
        argv.extend(args.iter().cloned());
        let line = argv.join(" ");
        self.invocations.lock().push(argv);

        let scripted = self.script.lock().iter().find(|(pattern, _)| line.contains(pattern.as_str())).map(|(_, out)| out.clone());
        Ok(scripted.unwrap_or_default())
    }
}
