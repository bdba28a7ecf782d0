use crate::models::{Bandwidth, LinkId, SwitchId};
use axum::http::StatusCode;
use std::net::Ipv4Addr;

/// Errors surfaced by the slice control engine to its callers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SliceError {
    #[error("Slice '{0}' not found.")]
    UnknownSlice(String),
    #[error("Slice '{0}' is already active.")]
    AlreadyActive(String),
    #[error("Slice '{0}' is not active.")]
    NotActive(String),
    #[error("Insufficient bandwidth on link {link}: required {required} Mbps, available {available} Mbps (deficit {deficit} Mbps)")]
    InsufficientBandwidth {
        link: LinkId,
        required: Bandwidth,
        available: Bandwidth,
        deficit: Bandwidth,
    },
    #[error("No path found for flow {src}->{dst}")]
    PathNotFound { src: Ipv4Addr, dst: Ipv4Addr },
    #[error("Preemption for slice '{slice}' did not free enough bandwidth on link {link}")]
    PreemptionInfeasible { slice: String, link: LinkId },
    #[error("Rule installation failed on {switch}: {reason}")]
    RuleInstallFailure { switch: SwitchId, reason: String },
    #[error("QoS backend failed on {interface}: {reason}")]
    QosBackendFailure { interface: String, reason: String },
    #[error("Topology refused update: {0}")]
    Topology(#[from] TopologyError),
    #[error("Slice engine is not running")]
    EngineUnavailable,
}

impl SliceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownSlice(_) | Self::NotActive(_) => StatusCode::NOT_FOUND,
            Self::AlreadyActive(_)
            | Self::InsufficientBandwidth { .. }
            | Self::PathNotFound { .. }
            | Self::PreemptionInfeasible { .. } => StatusCode::CONFLICT,
            Self::RuleInstallFailure { .. } | Self::QosBackendFailure { .. } => StatusCode::BAD_GATEWAY,
            Self::EngineUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Topology(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable tag used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownSlice(_) => "UnknownSlice",
            Self::AlreadyActive(_) => "AlreadyActive",
            Self::NotActive(_) => "NotActive",
            Self::InsufficientBandwidth { .. } => "InsufficientBandwidth",
            Self::PathNotFound { .. } => "PathNotFound",
            Self::PreemptionInfeasible { .. } => "PreemptionInfeasible",
            Self::RuleInstallFailure { .. } => "RuleInstallFailure",
            Self::QosBackendFailure { .. } => "QoSBackendFailure",
            Self::Topology(_) => "Topology",
            Self::EngineUnavailable => "EngineUnavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("link {0} not found")]
    UnknownLink(LinkId),
    #[error("reserving {requested} Mbps on {link} would exceed capacity ({reserved}/{capacity} Mbps)")]
    CapacityExceeded {
        link: LinkId,
        requested: Bandwidth,
        reserved: Bandwidth,
        capacity: Bandwidth,
    },
    #[error("releasing {requested} Mbps on {link} exceeds its reservation of {reserved} Mbps")]
    ReleaseUnderflow {
        link: LinkId,
        requested: Bandwidth,
        reserved: Bandwidth,
    },
}
