//! C2 — Status Extractor (SPEC_FULL.md §4.2, §6).
//!
//! Locates the `Output: ` marker in the status check's free-form output,
//! parses the suffix as JSON (the resolved reading of "structured text",
//! see SPEC_FULL.md §4.2), and runs the configured, ordered extractors over
//! the parsed payload.

use serde_derive::Deserialize;
use serde_json::Value;

use crate::error::MonitorError;
use crate::instance::InstanceInfo;

/// The literal marker the embedded application status follows
/// (SPEC_FULL.md §3, §6).
pub const OUTPUT_MARKER: &str = "Output: ";

/// `{"data":{"status":..,"pid":..,"mem":{...},"cpu":{...}}}` (SPEC_FULL.md §3).
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddedStatusPayload {
    pub data: EmbeddedStatusData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddedStatusData {
    pub status: String,
    pub pid: i64,
    pub mem: MemInfo,
    pub cpu: CpuInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemInfo {
    pub total: i64,
    pub free: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CpuInfo {
    pub usage: f64,
    pub count: i64,
}

/// A recognized embedded application status (SPEC_FULL.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppStatus {
    Ok,
    Overloaded,
    Maintenance,
    Unknown,
}

impl EmbeddedStatusData {
    pub fn app_status(&self) -> AppStatus {
        match self.status.as_str() {
            "OK" => AppStatus::Ok,
            "OVERLOADED" => AppStatus::Overloaded,
            "MAINTENANCE" => AppStatus::Maintenance,
            _ => AppStatus::Unknown,
        }
    }
}

/// A pluggable field extractor (SPEC_FULL.md §9 "Pluggable extractors").
/// Implementors return the value to store under [`Extractor::name`] in the
/// built [`InstanceInfo`]; an `Err` aborts extraction for the whole node and
/// surfaces as `InvalidData` (SPEC_FULL.md §4.2).
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;
    fn extract(&self, payload: &EmbeddedStatusPayload) -> Result<Value, MonitorError>;
}

/// Extracts the raw `status` string. Conventionally named `"status"`;
/// classification (§4.4) looks for a value under that name.
pub struct StatusExtractor;

impl Extractor for StatusExtractor {
    fn name(&self) -> &str {
        "status"
    }

    fn extract(&self, payload: &EmbeddedStatusPayload) -> Result<Value, MonitorError> {
        Ok(Value::String(payload.data.status.clone()))
    }
}

pub struct PidExtractor;

impl Extractor for PidExtractor {
    fn name(&self) -> &str {
        "pid"
    }

    fn extract(&self, payload: &EmbeddedStatusPayload) -> Result<Value, MonitorError> {
        Ok(Value::from(payload.data.pid))
    }
}

pub struct MemExtractor;

impl Extractor for MemExtractor {
    fn name(&self) -> &str {
        "mem"
    }

    fn extract(&self, payload: &EmbeddedStatusPayload) -> Result<Value, MonitorError> {
        Ok(serde_json::json!({
            "total": payload.data.mem.total,
            "free": payload.data.mem.free,
        }))
    }
}

pub struct CpuExtractor;

impl Extractor for CpuExtractor {
    fn name(&self) -> &str {
        "cpu"
    }

    fn extract(&self, payload: &EmbeddedStatusPayload) -> Result<Value, MonitorError> {
        Ok(serde_json::json!({
            "usage": payload.data.cpu.usage,
            "count": payload.data.cpu.count,
        }))
    }
}

/// Locates the `Output: ` marker and returns the suffix after it, or `None`
/// if the marker is absent or appears at position 0 ("fail if position <=
/// 0", SPEC_FULL.md §4.2 — position 0 would mean no prefix at all, which the
/// spec treats the same as "absent" since a prefix is always expected).
pub fn locate_payload(output: &str) -> Option<&str> {
    let position = output.find(OUTPUT_MARKER)?;
    if position == 0 {
        return None;
    }
    Some(&output[position + OUTPUT_MARKER.len()..])
}

/// Parses the payload suffix as JSON.
pub fn parse_payload(payload: &str) -> Result<EmbeddedStatusPayload, serde_json::Error> {
    serde_json::from_str(payload)
}

/// Runs every configured extractor, in declaration order, over the parsed
/// payload, collecting results into an [`InstanceInfo`]. The first
/// extractor that errors aborts the whole extraction (SPEC_FULL.md §4.2).
pub fn run_extractors(
    extractors: &[std::sync::Arc<dyn Extractor>],
    payload: &EmbeddedStatusPayload,
) -> Result<InstanceInfo, MonitorError> {
    let mut info = InstanceInfo::new();
    for extractor in extractors {
        let value = extractor.extract(payload)?;
        info.insert(extractor.name(), value);
    }
    Ok(info)
}
