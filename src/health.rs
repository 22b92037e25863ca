use serde_derive::{Serialize, Deserialize};
use std::collections::HashMap;
use std::time::Duration;
use surf::http::Method;
use super::catalog;
use super::api;
use super::agent;
use super::error::MonitorError;

/// HealthCheck is used to represent a single check
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[allow(non_snake_case)]
pub struct HealthCheck {
    pub Node: Option<String>,
    pub CheckID: Option<String>,
    pub Name: Option<String>,
    pub Status: Option<String>,
    pub Notes: Option<String>,
    pub Output: Option<String>,
    pub ServiceID: Option<String>,
    pub ServiceName: Option<String>,
    pub ServiceTags: Option<Vec<String>>,
    pub Type: Option<String>,
    pub Namespace: Option<String>,
    pub Definition: Option<HealthCheckDefinition>,

    pub CreateIndex: Option<usize>,
    pub ModifyIndex: Option<usize>,
}

type ReadableDuration = Duration;

/// HealthCheckDefinition is used to store the details about a health check's execution.
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[allow(non_snake_case)]
pub struct HealthCheckDefinition {
    pub HTTP: Option<String>,
    pub Header: HashMap<String, Vec<String>>,
    pub Method: Option<String>,
    pub Body: Option<String>,
    pub TLSServerName: Option<String>,
    pub TLSSkipVerify: Option<bool>,
    pub TCP: Option<String>,
    pub IntervalDuration: Option<Duration>,
    pub TimeoutDuration: Option<Duration>,
    pub DeregisterCriticalServiceAfterDuration: Option<Duration>,

    /// DEPRECATED in Consul 1.4.1. Use the above time.Duration fields instead.
    pub Interval: Option<ReadableDuration>,
    pub Timeout: Option<ReadableDuration>,
    pub DeregisterCriticalServiceAfter: Option<ReadableDuration>,
}

/// HealthChecks is a collection of HealthCheck structs.
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[allow(non_snake_case)]
pub struct HealthChecks(Vec<HealthCheck>);

impl HealthChecks {
    /// Direct access to the checks, in registry order (the tuple field
    /// itself is private so the classifier and validator go through this
    /// accessor rather than reaching into `.0`).
    pub fn checks(&self) -> &[HealthCheck] {
        &self.0
    }
}

impl From<Vec<HealthCheck>> for HealthChecks {
    fn from(checks: Vec<HealthCheck>) -> Self {
        HealthChecks(checks)
    }
}

/// ServiceEntry is used for the health service endpoint
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[allow(non_snake_case)]
pub struct ServiceEntry  {
    pub Node: Option<catalog::Node>,
    pub Service: Option<agent::AgentService>,
    pub Checks:  Option<HealthChecks>
}

/// The three `X-Consul-*` response headers of interest (SPEC_FULL.md §6),
/// stored verbatim. Default (all-zero/false) before any successful query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsulHeaders {
    pub index: u64,
    pub known_leader: bool,
    pub last_contact: u64,
}

fn header_str<'a>(res: &'a surf::Response, name: &str) -> Option<&'a str> {
    res.header(name).and_then(|values| values.get(0)).map(|v| v.as_str())
}

impl ConsulHeaders {
    fn from_response(res: &surf::Response) -> Self {
        ConsulHeaders {
            index: header_str(res, "X-Consul-Index")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            known_leader: header_str(res, "X-Consul-Knownleader")
                .map(|v| v == "true")
                .unwrap_or(false),
            last_contact: header_str(res, "X-Consul-Lastcontact")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        }
    }
}

/// Health can be used to query the Health endpoints.
///
/// `service` is the only query this crate's watcher drives (C6 in
/// SPEC_FULL.md): a blocking `GET /v1/health/service/{name}`.
#[derive(Default, Debug, Clone)]
pub struct Health {
    pub c: api::Client,
}

impl Health {
    pub fn new(client: api::Client) -> Self {
        Health { c: client }
    }

    /// Performs one blocking health-service query (SPEC_FULL.md §6):
    /// `GET /v1/health/service/{serviceName}?index={i}&wait=60s`. Consul
    /// legitimately holds the connection open for up to the full `wait`
    /// window whenever nothing has changed — the common case — so the
    /// outer deadline guarding the whole round trip is `wait +
    /// request_timeout`, not `request_timeout` alone: `request_timeout` is
    /// the allowance for connection setup and transport overhead *on top
    /// of* the blocking wait the server itself is honoring, not a bound on
    /// the server's hold time. Returns the decoded body (still untyped —
    /// C1 in `validator.rs` validates it) plus the response's `X-Consul-*`
    /// headers. `index` is opaque to the caller (SPEC_FULL.md §4.6
    /// "indexes are opaque and managed by the primitive") — pass back
    /// whatever `ConsulHeaders.index` the previous call returned.
    pub async fn service_blocking(
        &self,
        service_name: &str,
        index: u64,
        wait: Duration,
        request_timeout: Duration,
    ) -> Result<(serde_json::Value, ConsulHeaders), MonitorError> {
        let path = format!("/v1/health/service/{}", service_name);
        let mut req = self
            .c
            .clone()
            .new_request(Method::Get, path)
            .await
            .map_err(|err| MonitorError::watch(service_name, err.to_string()))?;

        {
            let mut pairs = req.url_mut().query_pairs_mut();
            pairs.append_pair("wait", &format!("{}s", wait.as_secs()));
            if index > 0 {
                pairs.append_pair("index", &index.to_string());
            }
        }

        let client = surf::Client::new();
        let send = client.send(req);
        let overall_deadline = wait + request_timeout;
        let mut res = async_std::future::timeout(overall_deadline, send)
            .await
            .map_err(|_| MonitorError::watch(service_name, "request timed out"))?
            .map_err(|err| MonitorError::watch(service_name, err.to_string()))?;

        if !res.status().is_success() {
            return Err(MonitorError::watch(
                service_name,
                format!("registry responded with status {}", res.status()),
            ));
        }

        let headers = ConsulHeaders::from_response(&res);
        let body: serde_json::Value = res
            .body_json()
            .await
            .map_err(|err| MonitorError::watch(service_name, err.to_string()))?;

        Ok((body, headers))
    }
}