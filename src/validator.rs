//! C1 — Response Validator (SPEC_FULL.md §4.1).
//!
//! Structurally filters a raw watcher payload (`serde_json::Value`, before
//! it is decoded into [`crate::health::ServiceEntry`]) so that one
//! malformed node produces one contextual error without failing the whole
//! batch.

use serde_json::Value;

use crate::error::{MonitorError, NodeContext};
use crate::health::ServiceEntry;

/// Result of validating one watcher payload.
pub struct ValidationOutcome {
    pub valid_nodes: Vec<ServiceEntry>,
    pub errors: Vec<MonitorError>,
}

/// Validates `raw` (the decoded JSON body of a health-service response)
/// against SPEC_FULL.md §4.1's structural contract.
pub fn validate_response(raw: &Value) -> ValidationOutcome {
    let entries = match raw.as_array() {
        Some(entries) => entries,
        None => {
            return ValidationOutcome {
                valid_nodes: Vec::new(),
                errors: vec![MonitorError::invalid_data(
                    "watcher payload was not an array of node records",
                    NodeContext::new(),
                )],
            };
        }
    };

    let mut valid_nodes = Vec::with_capacity(entries.len());
    let mut errors = Vec::new();

    for entry in entries {
        match validate_node(entry) {
            Ok(entry_value) => valid_nodes.push(entry_value),
            Err(error) => errors.push(error),
        }
    }

    ValidationOutcome {
        valid_nodes,
        errors,
    }
}

fn validate_node(entry: &Value) -> Result<ServiceEntry, MonitorError> {
    let mut context = NodeContext::new();

    let node = entry.get("Node").ok_or_else(|| {
        MonitorError::invalid_data("missing Node object", context.clone())
    })?;
    let node_name = get_str(node, "Node");
    if let Some(name) = node_name {
        context = context.clone().with_node_name(name);
    }
    let node_address = get_str(node, "Address");
    if let Some(address) = node_address {
        context = context.clone().with_address(address);
    }
    if node_name.is_none() {
        return Err(MonitorError::invalid_data("missing Node.Node", context));
    }
    if node_address.is_none() {
        return Err(MonitorError::invalid_data("missing Node.Address", context));
    }

    match node.get("TaggedAddresses") {
        None | Some(Value::Null) => {}
        Some(tagged) => {
            if !tagged.is_object() {
                return Err(MonitorError::invalid_data(
                    "Node.TaggedAddresses must be null or an object",
                    context,
                ));
            }
            if tagged.get("lan").is_none() || tagged.get("wan").is_none() {
                return Err(MonitorError::invalid_data(
                    "Node.TaggedAddresses must carry both lan and wan when present",
                    context,
                ));
            }
        }
    }

    let service = entry.get("Service").ok_or_else(|| {
        MonitorError::invalid_data("missing Service object", context.clone())
    })?;
    let service_id = get_str(service, "ID");
    if let Some(service_id) = service_id {
        context = context.clone().with_service_id(service_id);
    }
    if service_id.is_none() {
        return Err(MonitorError::invalid_data("missing Service.ID", context));
    }
    match service.get("Tags") {
        Some(Value::Array(_)) => {}
        _ => {
            return Err(MonitorError::invalid_data(
                "Service.Tags must be an array",
                context,
            ))
        }
    }

    match entry.get("Checks") {
        Some(Value::Array(checks)) if !checks.is_empty() => {
            for check in checks {
                validate_check(check, &context)?;
            }
        }
        _ => {
            return Err(MonitorError::invalid_data(
                "Checks must be a non-empty array",
                context,
            ))
        }
    }

    serde_json::from_value(entry.clone()).map_err(|err| {
        MonitorError::invalid_data(format!("failed to decode node record: {err}"), context)
    })
}

fn validate_check(check: &Value, context: &NodeContext) -> Result<(), MonitorError> {
    for field in ["CheckID", "Status", "Name", "Output"] {
        if get_str(check, field).is_none() {
            return Err(MonitorError::invalid_data(
                format!("check is missing required field {field}"),
                context.clone(),
            ));
        }
    }
    Ok(())
}

fn get_str<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value.get(field).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_node() -> Value {
        json!({
            "Node": {
                "Node": "node-1",
                "Address": "10.0.0.1",
                "Datacenter": "dc1",
                "TaggedAddresses": {"lan": "10.0.0.1", "wan": "203.0.113.1"}
            },
            "Service": {
                "ID": "svc-1",
                "Address": "",
                "Port": 8080,
                "Tags": []
            },
            "Checks": [
                {"CheckID": "serfHealth", "Name": "Serf Health Status", "Status": "passing", "Output": ""}
            ]
        })
    }

    #[test]
    fn non_array_payload_is_one_error() {
        let outcome = validate_response(&json!({"not": "an array"}));
        assert!(outcome.valid_nodes.is_empty());
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn valid_node_passes() {
        let outcome = validate_response(&json!([valid_node()]));
        assert_eq!(outcome.valid_nodes.len(), 1);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn missing_checks_is_dropped_with_error() {
        let mut node = valid_node();
        node.as_object_mut().unwrap().remove("Checks");
        let outcome = validate_response(&json!([node]));
        assert!(outcome.valid_nodes.is_empty());
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn tagged_addresses_missing_wan_is_rejected() {
        let mut node = valid_node();
        node["Node"]["TaggedAddresses"] = json!({"lan": "10.0.0.1"});
        let outcome = validate_response(&json!([node]));
        assert!(outcome.valid_nodes.is_empty());
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn null_tagged_addresses_is_fine() {
        let mut node = valid_node();
        node["Node"]["TaggedAddresses"] = Value::Null;
        let outcome = validate_response(&json!([node]));
        assert_eq!(outcome.valid_nodes.len(), 1);
    }

    #[test]
    fn one_bad_node_does_not_drop_others() {
        let mut bad = valid_node();
        bad.as_object_mut().unwrap().remove("Service");
        let outcome = validate_response(&json!([valid_node(), bad]));
        assert_eq!(outcome.valid_nodes.len(), 1);
        assert_eq!(outcome.errors.len(), 1);
    }
}
