//! C4 — Classifier (SPEC_FULL.md §4.4). The algorithmic heart: applies the
//! multi-signal rules that assign each validated node to a bucket, or skip
//! it with a contextual `InvalidData` error.

use crate::error::{MonitorError, NodeContext};
use crate::extractor::{self, AppStatus, Extractor};
use crate::health::{HealthCheck, ServiceEntry};
use crate::instance::{self, InstanceInfo, ServiceInstance};
use crate::instance_set::Bucket;
use std::sync::Arc;

const SERF_HEALTH_CHECK_ID: &str = "serfHealth";
const STATUS_PASSING: &str = "passing";

/// Classifier configuration relevant to a single node (the slice the
/// classifier needs out of `MonitorConfig`).
pub struct ClassifierConfig<'a> {
    pub status_check_name: &'a str,
    pub extractors: &'a [Arc<dyn Extractor>],
    pub strict_status_consistency: bool,
}

/// Outcome of classifying one node: either a bucket assignment with the
/// built instance, or a skip. Either way, zero or more non-fatal errors may
/// have been produced along the way.
pub struct ClassifyOutcome {
    pub assignment: Option<(Bucket, ServiceInstance)>,
    pub errors: Vec<MonitorError>,
}

/// Classifies one validated node per the SPEC_FULL.md §4.4 truth table.
pub fn classify(node: &ServiceEntry, config: &ClassifierConfig) -> ClassifyOutcome {
    let mut errors = Vec::new();

    let node_record = match &node.Node {
        Some(n) => n,
        None => {
            errors.push(MonitorError::invalid_data(
                "invalid format of node data: missing Node",
                NodeContext::new(),
            ));
            return ClassifyOutcome {
                assignment: None,
                errors,
            };
        }
    };
    let service = match &node.Service {
        Some(s) => s,
        None => {
            errors.push(MonitorError::invalid_data(
                "invalid format of node data: missing Service",
                NodeContext::new(),
            ));
            return ClassifyOutcome {
                assignment: None,
                errors,
            };
        }
    };
    let checks = match &node.Checks {
        Some(c) if !c.checks().is_empty() => c.checks(),
        _ => {
            errors.push(MonitorError::invalid_data(
                "invalid format of node data: missing Checks",
                NodeContext::new(),
            ));
            return ClassifyOutcome {
                assignment: None,
                errors,
            };
        }
    };

    let mut context = NodeContext::new();
    if let Some(name) = &node_record.Node {
        context = context.with_node_name(name.clone());
    }
    if let Some(address) = &node_record.Address {
        context = context.with_address(address.clone());
    }
    if let Some(service_id) = &service.ID {
        context = context.with_service_id(service_id.clone());
    }

    // Step 1 — short-circuit on agent liveness.
    if let Some(serf) = find_check(checks, |c| c.CheckID.as_deref() == Some(SERF_HEALTH_CHECK_ID)) {
        if !is_passing(serf) {
            errors.push(MonitorError::invalid_data(
                "serfHealth check is in critical state, node will be skipped",
                context,
            ));
            return ClassifyOutcome {
                assignment: None,
                errors,
            };
        }
    }

    // Step 2/3 — scan remaining checks.
    let mut all_passing = true;
    let mut status_check_found = false;
    let mut status_check_passing = false;
    let mut status_check_output_parsed = true;
    let mut instance_info: Option<InstanceInfo> = None;

    for check in checks {
        if check.CheckID.as_deref() == Some(SERF_HEALTH_CHECK_ID) {
            continue;
        }

        let is_status_check = check.Name.as_deref() == Some(config.status_check_name);
        if is_status_check {
            status_check_found = true;
            status_check_passing = is_passing(check);
        } else if !is_passing(check) {
            all_passing = false;
        }

        if is_status_check {
            let output = check.Output.as_deref().unwrap_or("");
            match extractor::locate_payload(output) {
                None => {
                    errors.push(MonitorError::invalid_data(
                        "invalid format of output field: missing 'Output: ' marker",
                        context.clone(),
                    ));
                    status_check_output_parsed = false;
                }
                Some(raw_payload) => {
                    if !config.extractors.is_empty() {
                        match extractor::parse_payload(raw_payload) {
                            Err(err) => {
                                errors.push(MonitorError::invalid_data(
                                    format!("failed to parse embedded status payload: {err}"),
                                    context.clone(),
                                ));
                                status_check_output_parsed = false;
                            }
                            Ok(payload) => match extractor::run_extractors(config.extractors, &payload) {
                                Ok(info) => instance_info = Some(info),
                                Err(err) => errors.push(err),
                            },
                        }
                    }
                }
            }
        }
    }

    if !status_check_found {
        errors.push(MonitorError::invalid_data(
            "check with statusCheckName was not found",
            context,
        ));
        return ClassifyOutcome {
            assignment: None,
            errors,
        };
    }

    if !status_check_output_parsed {
        return ClassifyOutcome {
            assignment: None,
            errors,
        };
    }

    let built = instance::build_instance_or_invalid_data(
        node_record,
        service,
        instance_info.clone(),
        context.clone(),
    );
    let built_instance = match built {
        Ok(instance) => instance,
        Err(err) => {
            errors.push(err);
            return ClassifyOutcome {
                assignment: None,
                errors,
            };
        }
    };

    let bucket = assign_bucket(
        all_passing,
        status_check_passing,
        instance_info.as_ref(),
        config,
        &context,
        &mut errors,
    );

    ClassifyOutcome {
        assignment: Some((bucket, built_instance)),
        errors,
    }
}

fn assign_bucket(
    all_passing: bool,
    status_check_passing: bool,
    instance_info: Option<&InstanceInfo>,
    config: &ClassifierConfig,
    context: &NodeContext,
    errors: &mut Vec<MonitorError>,
) -> Bucket {
    // any other check failing => unhealthy, regardless of status-check state.
    if !all_passing {
        return Bucket::Unhealthy;
    }

    // status-check itself must be passing to trust the embedded status.
    if !status_check_passing {
        return Bucket::Unhealthy;
    }

    if config.extractors.is_empty() {
        // Embedded payload not inspected: healthy iff all checks passed,
        // which is guaranteed true at this point.
        return Bucket::Healthy;
    }

    let status = instance_info
        .and_then(|info| info.get("status"))
        .and_then(|v| v.as_str());

    let status = match status {
        Some(s) => s,
        // Extractors configured but none produced "status": fall back to
        // the all-passing rule (SPEC_FULL.md §4.2 "Resolved" note — an
        // unstated case, resolved conservatively).
        None => return Bucket::Healthy,
    };

    let app_status = match status {
        "OK" => AppStatus::Ok,
        "OVERLOADED" => AppStatus::Overloaded,
        "MAINTENANCE" => AppStatus::Maintenance,
        _ => AppStatus::Unknown,
    };

    if config.strict_status_consistency {
        match app_status {
            AppStatus::Ok if !status_check_passing => {
                errors.push(MonitorError::invalid_data(
                    "embedded status OK but status check is not passing",
                    context.clone(),
                ));
                return Bucket::Unhealthy;
            }
            AppStatus::Maintenance if !status_check_passing => {
                errors.push(MonitorError::invalid_data(
                    "embedded status MAINTENANCE but status check is not passing",
                    context.clone(),
                ));
                return Bucket::Unhealthy;
            }
            _ => {}
        }
    }

    match app_status {
        AppStatus::Ok => Bucket::Healthy,
        AppStatus::Overloaded => Bucket::Overloaded,
        AppStatus::Maintenance => Bucket::OnMaintenance,
        AppStatus::Unknown => Bucket::Unhealthy,
    }
}

fn find_check<'a>(
    checks: &'a [HealthCheck],
    predicate: impl Fn(&HealthCheck) -> bool,
) -> Option<&'a HealthCheck> {
    checks.iter().find(|c| predicate(c))
}

fn is_passing(check: &HealthCheck) -> bool {
    check.Status.as_deref() == Some(STATUS_PASSING)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentService;
    use crate::catalog::Node;
    use crate::extractor::StatusExtractor;
    use crate::health::{HealthChecks, ServiceEntry};
    use std::collections::HashMap;

    fn check(id: &str, name: &str, status: &str, output: &str) -> HealthCheck {
        HealthCheck {
            Node: None,
            CheckID: Some(id.to_string()),
            Name: Some(name.to_string()),
            Status: Some(status.to_string()),
            Notes: None,
            Output: Some(output.to_string()),
            ServiceID: None,
            ServiceName: None,
            ServiceTags: None,
            Type: None,
            Namespace: None,
            Definition: None,
            CreateIndex: None,
            ModifyIndex: None,
        }
    }

    fn service_entry(checks: Vec<HealthCheck>) -> ServiceEntry {
        let mut tagged = HashMap::new();
        tagged.insert("lan".to_string(), "192.168.0.1".to_string());
        tagged.insert("wan".to_string(), "203.0.113.1".to_string());

        ServiceEntry {
            Node: Some(Node {
                ID: None,
                Node: Some("node-1".to_string()),
                Address: Some("10.0.0.1".to_string()),
                Datacenter: Some("dc1".to_string()),
                TaggedAddresses: Some(tagged),
                Meta: None,
                CreateIndex: None,
                ModifyIndex: None,
            }),
            Service: Some(AgentService {
                ID: Some("sid1".to_string()),
                Address: Some("10.0.0.2".to_string()),
                Port: Some(8080),
                Tags: Some(vec![]),
                ..Default::default()
            }),
            Checks: Some(HealthChecks::from(checks)),
        }
    }

    fn config<'a>(extractors: &'a [Arc<dyn Extractor>]) -> ClassifierConfig<'a> {
        ClassifierConfig {
            status_check_name: "app:status",
            extractors,
            strict_status_consistency: false,
        }
    }

    fn ok_payload() -> String {
        r#"node output Output: {"data":{"status":"OK","pid":100,"mem":{"total":12813,"free":11786},"cpu":{"usage":0.72,"count":16}}}"#.to_string()
    }

    #[test]
    fn s1_all_passing_is_healthy() {
        let extractors: Vec<Arc<dyn Extractor>> = vec![Arc::new(StatusExtractor)];
        let entry = service_entry(vec![
            check("serfHealth", "Serf Health Status", "passing", ""),
            check("app:status", "app:status", "passing", &ok_payload()),
        ]);
        let outcome = classify(&entry, &config(&extractors));
        assert!(outcome.errors.is_empty());
        let (bucket, _) = outcome.assignment.unwrap();
        assert_eq!(bucket, Bucket::Healthy);
    }

    #[test]
    fn s2_serf_critical_skips_node() {
        let extractors: Vec<Arc<dyn Extractor>> = vec![Arc::new(StatusExtractor)];
        let entry = service_entry(vec![
            check("serfHealth", "Serf Health Status", "critical", ""),
            check("app:status", "app:status", "passing", &ok_payload()),
        ]);
        let outcome = classify(&entry, &config(&extractors));
        assert!(outcome.assignment.is_none());
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].to_string().contains("serfHealth"));
    }

    #[test]
    fn s3_overloaded_status_check_critical_is_overloaded() {
        let extractors: Vec<Arc<dyn Extractor>> = vec![Arc::new(StatusExtractor)];
        let payload = r#"Output: {"data":{"status":"OVERLOADED","pid":1,"mem":{"total":-1,"free":-1},"cpu":{"usage":99.9,"count":-1}}}"#;
        let entry = service_entry(vec![
            check("serfHealth", "Serf Health Status", "passing", ""),
            check("app:status", "app:status", "critical", payload),
        ]);
        let outcome = classify(&entry, &config(&extractors));
        assert!(outcome.errors.is_empty());
        let (bucket, _) = outcome.assignment.unwrap();
        assert_eq!(bucket, Bucket::Overloaded);
    }

    #[test]
    fn s4_maintenance_requires_status_check_passing() {
        let extractors: Vec<Arc<dyn Extractor>> = vec![Arc::new(StatusExtractor)];
        let payload = r#"Output: {"data":{"status":"MAINTENANCE","pid":1,"mem":{"total":-1,"free":-1},"cpu":{"usage":1.0,"count":-1}}}"#;
        let entry = service_entry(vec![
            check("serfHealth", "Serf Health Status", "passing", ""),
            check("app:status", "app:status", "passing", payload),
        ]);
        let outcome = classify(&entry, &config(&extractors));
        assert!(outcome.errors.is_empty());
        let (bucket, _) = outcome.assignment.unwrap();
        assert_eq!(bucket, Bucket::OnMaintenance);
    }

    #[test]
    fn s5_other_check_failing_is_unhealthy() {
        let extractors: Vec<Arc<dyn Extractor>> = vec![Arc::new(StatusExtractor)];
        let entry = service_entry(vec![
            check("serfHealth", "Serf Health Status", "passing", ""),
            check("other", "other check", "critical", ""),
            check("app:status", "app:status", "passing", &ok_payload()),
        ]);
        let outcome = classify(&entry, &config(&extractors));
        assert!(outcome.errors.is_empty());
        let (bucket, _) = outcome.assignment.unwrap();
        assert_eq!(bucket, Bucket::Unhealthy);
    }

    #[test]
    fn s6_missing_marker_is_skipped_with_error() {
        let extractors: Vec<Arc<dyn Extractor>> = vec![Arc::new(StatusExtractor)];
        let entry = service_entry(vec![
            check("serfHealth", "Serf Health Status", "passing", ""),
            check("app:status", "app:status", "passing", "no marker here"),
        ]);
        let outcome = classify(&entry, &config(&extractors));
        assert!(outcome.assignment.is_none());
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].to_string().contains("Invalid format") || outcome.errors[0].to_string().contains("invalid format"));
    }

    #[test]
    fn status_check_not_found_is_skipped() {
        let extractors: Vec<Arc<dyn Extractor>> = vec![Arc::new(StatusExtractor)];
        let entry = service_entry(vec![check("serfHealth", "Serf Health Status", "passing", "")]);
        let outcome = classify(&entry, &config(&extractors));
        assert!(outcome.assignment.is_none());
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn no_extractors_configured_uses_all_passing_rule() {
        let extractors: Vec<Arc<dyn Extractor>> = vec![];
        let entry = service_entry(vec![
            check("serfHealth", "Serf Health Status", "passing", ""),
            check("app:status", "app:status", "passing", &ok_payload()),
        ]);
        let outcome = classify(&entry, &config(&extractors));
        assert!(outcome.errors.is_empty());
        let (bucket, _) = outcome.assignment.unwrap();
        assert_eq!(bucket, Bucket::Healthy);
    }

    #[test]
    fn classification_is_deterministic() {
        let extractors: Vec<Arc<dyn Extractor>> = vec![Arc::new(StatusExtractor)];
        let entry = service_entry(vec![
            check("serfHealth", "Serf Health Status", "passing", ""),
            check("app:status", "app:status", "passing", &ok_payload()),
        ]);
        let first = classify(&entry, &config(&extractors));
        let second = classify(&entry, &config(&extractors));
        assert_eq!(first.assignment.map(|(b, _)| b), second.assignment.map(|(b, _)| b));
    }
}
