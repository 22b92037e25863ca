//! C3 — Instance Builder (SPEC_FULL.md §4.3).
//!
//! Builds the immutable [`ServiceInstance`] the classifier publishes, plus
//! the ordered, opaque [`InstanceInfo`] carrier for extractor output.

use crate::agent::AgentService;
use crate::catalog::Node;
use crate::error::{MonitorError, NodeContext};
use serde_json::Value;

/// Ordered mapping from extractor name to extracted value. Opaque to the
/// core except via [`InstanceInfo::get`] (SPEC_FULL.md §3).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceInfo {
    entries: Vec<(String, Value)>,
}

impl InstanceInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.entries.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.entries.iter()
    }
}

/// An immutable, validated service instance (SPEC_FULL.md §3).
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceInstance {
    pub lan_ip: Option<String>,
    pub wan_ip: Option<String>,
    pub service_address: Option<String>,
    pub port: i64,
    pub node_address: String,
    pub node_name: String,
    pub node_datacenter: String,
    pub service_id: String,
    pub service_tags: Vec<String>,
    pub info: Option<InstanceInfo>,
}

impl ServiceInstance {
    /// Dedup/bucket key, per SPEC_FULL.md §3: `serviceId + "_" + nodeAddress`.
    pub fn key(&self) -> String {
        format!("{}_{}", self.service_id, self.node_address)
    }
}

/// Builds a [`ServiceInstance`] from a validated node and service record
/// plus optional extracted info (SPEC_FULL.md §4.3). Returns `Err` on any
/// type violation; the caller is responsible for wrapping that into an
/// `InvalidData` error and skipping the node.
pub fn build_instance(
    node: &Node,
    service: &AgentService,
    info: Option<InstanceInfo>,
) -> Result<ServiceInstance, String> {
    let node_address = non_empty(node.Address.as_deref()).ok_or("Node.Address is required")?;
    let node_name = non_empty(node.Node.as_deref()).ok_or("Node.Node is required")?;
    let node_datacenter =
        non_empty(node.Datacenter.as_deref()).ok_or("Node.Datacenter is required")?;
    let service_id = non_empty(service.ID.as_deref()).ok_or("Service.ID is required")?;
    let port = service.Port.ok_or("Service.Port is required")? as i64;
    let service_tags = service.Tags.clone().unwrap_or_default();

    let (lan_ip, wan_ip) = match &node.TaggedAddresses {
        None => (None, None),
        Some(tagged) => (
            tagged.get("lan").cloned().filter(|s| !s.is_empty()),
            tagged.get("wan").cloned().filter(|s| !s.is_empty()),
        ),
    };

    let service_address = service
        .Address
        .clone()
        .filter(|address| !address.is_empty());

    Ok(ServiceInstance {
        lan_ip,
        wan_ip,
        service_address,
        port,
        node_address: node_address.to_string(),
        node_name: node_name.to_string(),
        node_datacenter: node_datacenter.to_string(),
        service_id: service_id.to_string(),
        service_tags,
        info,
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.is_empty())
}

/// Convenience for callers that want the `InvalidData` wrapping inline.
pub fn build_instance_or_invalid_data(
    node: &Node,
    service: &AgentService,
    info: Option<InstanceInfo>,
    context: NodeContext,
) -> Result<ServiceInstance, MonitorError> {
    build_instance(node, service, info).map_err(|message| {
        MonitorError::invalid_data(format!("invalid format of node data: {message}"), context)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn node(tagged: Option<HashMap<String, String>>) -> Node {
        Node {
            ID: None,
            Node: Some("node-1".to_string()),
            Address: Some("10.0.0.1".to_string()),
            Datacenter: Some("dc1".to_string()),
            TaggedAddresses: tagged,
            Meta: None,
            CreateIndex: None,
            ModifyIndex: None,
        }
    }

    fn service() -> AgentService {
        AgentService {
            ID: Some("svc-1".to_string()),
            Address: Some("10.0.0.2".to_string()),
            Port: Some(8080),
            Tags: Some(vec!["primary".to_string()]),
            ..Default::default()
        }
    }

    #[test]
    fn null_tagged_addresses_yield_null_ips() {
        let instance = build_instance(&node(None), &service(), None).unwrap();
        assert_eq!(instance.lan_ip, None);
        assert_eq!(instance.wan_ip, None);
        assert_eq!(instance.key(), "svc-1_10.0.0.1");
    }

    #[test]
    fn tagged_addresses_populate_ips() {
        let mut tagged = HashMap::new();
        tagged.insert("lan".to_string(), "192.168.0.1".to_string());
        tagged.insert("wan".to_string(), "203.0.113.1".to_string());
        let instance = build_instance(&node(Some(tagged)), &service(), None).unwrap();
        assert_eq!(instance.lan_ip.as_deref(), Some("192.168.0.1"));
        assert_eq!(instance.wan_ip.as_deref(), Some("203.0.113.1"));
    }

    #[test]
    fn empty_service_address_is_null() {
        let mut svc = service();
        svc.Address = Some(String::new());
        let instance = build_instance(&node(None), &svc, None).unwrap();
        assert_eq!(instance.service_address, None);
    }

    #[test]
    fn missing_required_field_fails() {
        let mut svc = service();
        svc.ID = None;
        assert!(build_instance(&node(None), &svc, None).is_err());
    }
}
