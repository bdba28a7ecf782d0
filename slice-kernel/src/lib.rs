//! Slice control engine: topology, path resolution, admission with priority
//! preemption, and rollback-safe installation of forwarding, isolation and
//! QoS state for bandwidth-guaranteed network slices.

pub mod admission;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod models;
pub mod mqtt;
pub mod path;
pub mod qos;
pub mod rules;
pub mod state;
pub mod topology;

pub use engine::{spawn_engine, EngineHandle};
pub use error::{SliceError, TopologyError};
pub use lifecycle::SliceLifecycleManager;
