//! Error taxonomy for the monitor.
//!
//! The original implementation's "error base class" is explicitly out of
//! scope (see SPEC_FULL.md §1): only the contract — the four named error
//! kinds in SPEC_FULL.md §6 — is built here, the idiomatic way.

use thiserror::Error;

/// Contextual detail attached to a malformed-node error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeContext {
    pub address: Option<String>,
    pub node_name: Option<String>,
    pub service_id: Option<String>,
}

impl NodeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_node_name(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = Some(node_name.into());
        self
    }

    pub fn with_service_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = Some(service_id.into());
        self
    }
}

/// Errors surfaced by the monitor to its consumers.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Transport or HTTP error raised by the registry's long-poll.
    #[error("watch of service {service:?} failed: {message}")]
    Watch { service: String, message: String },

    /// `start_service` called while a watcher is already running.
    #[error("start_service called while the monitor is already initialized")]
    AlreadyInitialized,

    /// A state-dependent getter was called on a stopped monitor.
    #[error("monitor has not been initialized; call start_service first")]
    NotInitialized,

    /// A single node in a watcher payload failed structural validation,
    /// classification, or instance construction. Non-fatal: the offending
    /// node is dropped and the rest of the payload proceeds.
    #[error("invalid data{}: {message}", describe_context(context))]
    InvalidData {
        message: String,
        context: NodeContext,
    },
}

impl NodeContext {
    fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(node_name) = &self.node_name {
            parts.push(format!("node={node_name}"));
        }
        if let Some(address) = &self.address {
            parts.push(format!("address={address}"));
        }
        if let Some(service_id) = &self.service_id {
            parts.push(format!("service_id={service_id}"));
        }
        parts.join(", ")
    }
}

fn describe_context(context: &NodeContext) -> String {
    let described = context.describe();
    if described.is_empty() {
        String::new()
    } else {
        format!(" ({described})")
    }
}

impl MonitorError {
    pub fn watch(service: impl Into<String>, message: impl Into<String>) -> Self {
        MonitorError::Watch {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn invalid_data(message: impl Into<String>, context: NodeContext) -> Self {
        MonitorError::InvalidData {
            message: message.into(),
            context,
        }
    }

    /// `true` for errors that drop a single node but leave the snapshot
    /// otherwise intact.
    pub fn is_invalid_data(&self) -> bool {
        matches!(self, MonitorError::InvalidData { .. })
    }
}

pub type MonitorResult<T> = Result<T, MonitorError>;
