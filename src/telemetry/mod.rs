//! Telemetry - per-cycle reports to the broker
//!
//! Topics:
//! - `sif/{client_id}/data`  every monitored cycle
//! - `sif/{client_id}/alert` additionally, when the cycle alerted
//! - `sif/{client_id}/status` once a baseline fingerprint is captured
//!
//! Payloads are flat JSON objects. A non-finite SDI (the "cannot compare"
//! sentinel) is sent as a string since JSON has no infinity.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::info;

use crate::types::AlertState;

/// Alert label carried in every alert payload.
pub const ALERT_LABEL: &str = "Vibration Anomaly";

/// Status reported after a successful calibration.
pub const CALIBRATED_STATUS: &str = "Calibrated";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub fn data_topic(client_id: &str) -> String {
    format!("sif/{client_id}/data")
}

pub fn alert_topic(client_id: &str) -> String {
    format!("sif/{client_id}/alert")
}

pub fn status_topic(client_id: &str) -> String {
    format!("sif/{client_id}/status")
}

/// Outcome of one monitored cycle, as reported upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub timestamp: DateTime<Utc>,
    pub client_id: String,
    pub sdi: f64,
    pub alert_state: AlertState,
}

fn sdi_value(sdi: f64) -> Value {
    if sdi.is_finite() {
        json!(sdi)
    } else {
        Value::String(sdi.to_string())
    }
}

impl TelemetryRecord {
    /// `{timestamp, client_id, sdi, alert_state}`
    pub fn data_payload(&self) -> Value {
        let mut m = Map::new();
        m.insert("timestamp".into(), Value::String(self.timestamp.to_rfc3339()));
        m.insert("client_id".into(), Value::String(self.client_id.clone()));
        m.insert("sdi".into(), sdi_value(self.sdi));
        m.insert("alert_state".into(), Value::String(self.alert_state.to_string()));
        Value::Object(m)
    }

    /// `{timestamp, client_id, alert, sdi}`
    pub fn alert_payload(&self) -> Value {
        let mut m = Map::new();
        m.insert("timestamp".into(), Value::String(self.timestamp.to_rfc3339()));
        m.insert("client_id".into(), Value::String(self.client_id.clone()));
        m.insert("alert".into(), Value::String(ALERT_LABEL.to_string()));
        m.insert("sdi".into(), sdi_value(self.sdi));
        Value::Object(m)
    }

    /// `(topic, payload)` pairs this record should be published as.
    pub fn messages(&self) -> Vec<(String, Value)> {
        let mut out = vec![(data_topic(&self.client_id), self.data_payload())];
        if self.alert_state.is_alert() {
            out.push((alert_topic(&self.client_id), self.alert_payload()));
        }
        out
    }
}

/// Node lifecycle event, published outside the monitoring reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub timestamp: DateTime<Utc>,
    pub client_id: String,
    pub status: String,
}

impl StatusRecord {
    pub fn calibrated(timestamp: DateTime<Utc>, client_id: &str) -> Self {
        Self {
            timestamp,
            client_id: client_id.to_string(),
            status: CALIBRATED_STATUS.to_string(),
        }
    }

    /// `(topic, {timestamp, client_id, status})`
    pub fn message(&self) -> (String, Value) {
        let mut m = Map::new();
        m.insert("timestamp".into(), Value::String(self.timestamp.to_rfc3339()));
        m.insert("client_id".into(), Value::String(self.client_id.clone()));
        m.insert("status".into(), Value::String(self.status.clone()));
        (status_topic(&self.client_id), Value::Object(m))
    }
}

/// Message transport (MQTT on the device).
#[async_trait]
pub trait TelemetryPublisher: Send {
    async fn publish(&mut self, topic: &str, payload: &Value) -> Result<(), TelemetryError>;
}

/// Logs every message instead of sending it.
#[derive(Debug, Clone)]
pub struct TracingPublisher {
    broker: String,
}

impl TracingPublisher {
    pub fn new(broker: impl Into<String>) -> Self {
        Self { broker: broker.into() }
    }
}

#[async_trait]
impl TelemetryPublisher for TracingPublisher {
    async fn publish(&mut self, topic: &str, payload: &Value) -> Result<(), TelemetryError> {
        let body = serde_json::to_string(payload)?;
        info!(broker = %self.broker, topic, payload = %body, "[Telemetry] Published");
        Ok(())
    }
}

/// Collects messages in memory; clones share the log.
#[derive(Debug, Clone, Default)]
pub struct MemoryPublisher {
    messages: Arc<Mutex<Vec<(String, Value)>>>,
    fail: bool,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publisher whose every publish fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<(String, Value)> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn on_topic(&self, topic: &str) -> Vec<Value> {
        self.messages()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, v)| v)
            .collect()
    }
}

#[async_trait]
impl TelemetryPublisher for MemoryPublisher {
    async fn publish(&mut self, topic: &str, payload: &Value) -> Result<(), TelemetryError> {
        if self.fail {
            return Err(TelemetryError::Transport("broker unreachable".to_string()));
        }
        self.messages
            .lock()
            .map_err(|_| TelemetryError::Transport("message log poisoned".to_string()))?
            .push((topic.to_string(), payload.clone()));
        Ok(())
    }
}
