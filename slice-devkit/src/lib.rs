/*!
# Slice DevKit - Test doubles and fixtures for the slice kernel

Everything needed to exercise the engine without switches, a broker or
root privileges:
- `MemorySwitch`: in-memory switch transport with failure injection
- `RecordingQos` / `RecordingRunner`: QoS backend and process runner doubles
- `fixtures`: the 5-switch / 9-host reference lab and its slice catalog
- `reachability`: packet walk over installed rules (pingall)
- `Harness`: spawns a full engine wired to the doubles
*/

pub mod fixtures;
pub mod harness;
pub mod qos;
pub mod reachability;
pub mod switch;

pub use harness::{init_tracing, Harness};
pub use qos::{QosCall, RecordingQos, RecordingRunner};
pub use switch::{MemorySwitch, SwitchOp};
