// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{cfg::enums::SignalType, error::GatewayError};

/// `(host, rack, slot)` — uniquely identifies a PLC session (§3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    pub host: String,
    pub rack: u16,
    pub slot: u16,
}

impl EndpointKey {
    pub fn new(host: impl Into<String>, rack: u16, slot: u16) -> Self {
        Self { host: host.into(), rack, slot }
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.host, self.rack, self.slot)
    }
}

fn default_slot() -> u16 {
    1
}

/// Owned by the external config store; read-only to the core (§3).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MachineDescriptor {
    pub machine_name: String,
    pub host: String,
    #[serde(default)]
    pub rack: u16,
    #[serde(default = "default_slot")]
    pub slot: u16,
    pub signals_configuration: SignalsConfig,
}

impl MachineDescriptor {
    pub fn endpoint(&self) -> EndpointKey {
        EndpointKey::new(self.host.clone(), self.rack, self.slot)
    }
}

/// Required/conditional fields for one addressable signal (§3).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignalDescriptor {
    pub db_number: u16,
    pub offset: u16,
    #[serde(rename = "type")]
    pub type_: SignalType,
    #[serde(default)]
    pub bit_pos: Option<u8>,
    #[serde(default)]
    pub max_length: Option<u16>,
}

impl SignalDescriptor {
    /// Declared string capacity, defaulting to 254 per §3.
    pub fn max_length(&self) -> u16 {
        self.max_length.unwrap_or(254)
    }

    /// Byte size on the wire (§4.1's size table).
    pub fn size(&self) -> u16 {
        match self.type_ {
            SignalType::Bool => 1,
            SignalType::Int => 2,
            SignalType::Dint => 4,
            SignalType::Real => 4,
            SignalType::String => self.max_length() + 2,
        }
    }

    /// Checks the conditional-field invariants from §3.
    pub fn validate(&self, signal_name: &str) -> Result<(), GatewayError> {
        if self.type_ == SignalType::Bool {
            let bit = self.bit_pos.ok_or_else(|| GatewayError::InvalidDescriptor {
                signal: signal_name.to_string(),
                reason: "bit_pos is required for type=bool".to_string(),
            })?;
            if bit > 7 {
                return Err(GatewayError::InvalidDescriptor {
                    signal: signal_name.to_string(),
                    reason: format!("bit_pos {bit} out of range 0..7"),
                });
            }
        }
        if let Some(max_len) = self.max_length
            && !(1..=254).contains(&max_len)
        {
            return Err(GatewayError::InvalidDescriptor {
                signal: signal_name.to_string(),
                reason: format!("max_length {max_len} out of range 1..254"),
            });
        }
        Ok(())
    }
}

/// Either a literal scalar or the sentinel `"same"` (§3's monitor plan).
#[derive(Debug, Clone, Serialize)]
pub enum AckValue {
    Same,
    Scalar(serde_json::Value),
}

impl<'de> Deserialize<'de> for AckValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where D: Deserializer<'de> {
        let value = serde_json::Value::deserialize(deserializer)?;
        if let serde_json::Value::String(s) = &value
            && s.eq_ignore_ascii_case("same")
        {
            return Ok(AckValue::Same);
        }
        Ok(AckValue::Scalar(value))
    }
}

/// One `on_change`/`continuous` entry (§3).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct MonitorEntry {
    #[serde(default)]
    pub ack: bool,
    #[serde(default)]
    pub ack_signal: Option<String>,
    #[serde(default)]
    pub ack_value: Option<AckValue>,
}

/// The `monitor_signals` reserved key's shape (§3).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct MonitorPlan {
    #[serde(default)]
    pub on_change: std::collections::HashMap<String, MonitorEntry>,
    #[serde(default)]
    pub continuous: std::collections::HashMap<String, MonitorEntry>,
}

const MONITOR_SIGNALS_KEY: &str = "monitor_signals";

/// Mapping from signal_name to signal descriptor, plus the reserved
/// `monitor_signals` key. Kept as a raw JSON map (rather than a typed
/// `HashMap<String, SignalDescriptor>`) because the reserved key's value has
/// a different shape than every other entry — descriptors are parsed lazily
/// on lookup, mirroring how the source reads `signals_config.get(name)` on
/// demand instead of eagerly validating the whole map up front.
#[derive(Debug, Clone, Default)]
pub struct SignalsConfig(serde_json::Map<String, serde_json::Value>);

impl SignalsConfig {
    pub fn descriptor(&self, name: &str) -> Result<SignalDescriptor, GatewayError> {
        let raw = self
            .0
            .get(name)
            .ok_or_else(|| GatewayError::UnknownSignal(name.to_string()))?;
        let descriptor: SignalDescriptor = serde_json::from_value(raw.clone())
            .map_err(|e| GatewayError::InvalidDescriptor {
                signal: name.to_string(),
                reason: e.to_string(),
            })?;
        descriptor.validate(name)?;
        Ok(descriptor)
    }

    pub fn monitor_plan(&self) -> Result<MonitorPlan, GatewayError> {
        match self.0.get(MONITOR_SIGNALS_KEY) {
            None => Ok(MonitorPlan::default()),
            Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| {
                GatewayError::InvalidDescriptor {
                    signal: MONITOR_SIGNALS_KEY.to_string(),
                    reason: e.to_string(),
                }
            }),
        }
    }
}

impl<'de> Deserialize<'de> for SignalsConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where D: Deserializer<'de> {
        Ok(SignalsConfig(serde_json::Map::deserialize(deserializer)?))
    }
}

impl Serialize for SignalsConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where S: Serializer {
        self.0.serialize(serializer)
    }
}

/// Environment/port plumbing (§6), grounded on the source's `app.py`
/// env-var reads. All fields have documented defaults so the gateway can
/// boot without any environment configured at all.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub env: String,
    pub port: u16,
    pub redis_host: String,
    pub redis_port: u16,
    pub log_level: String,
    pub log_file_path: String,
}

impl GatewaySettings {
    pub fn from_env() -> Self {
        let env = std::env::var("ENV").unwrap_or_else(|_| "dev".to_string());
        let default_port: u16 = if env == "dev" || env == "LOCAL" { 1030 } else { 1029 };
        let port = std::env::var("S7COMM_MACHINE_MODULE_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default_port);

        Self {
            env,
            port,
            redis_host: std::env::var("REDIS_HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
            redis_port: std::env::var("REDIS_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(6379),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            log_file_path: std::env::var("LOG_FILE_PATH")
                .unwrap_or_else(|_| "./system.log".to_string()),
        }
    }
}
