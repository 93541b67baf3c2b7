// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Transport-agnostic RPC dispatch surface (§6), grounded on
//! `original_source/call_functions.py`'s `execute`/`execute_monitor`/
//! `disable_monitor` entry points and `connection/config.py`'s
//! add/delete/get machine handlers. `GatewayService` is the core's single
//! entry point; `src/main.rs` drives it over a newline-delimited-JSON demo
//! transport, but any transport can call [`RpcHandler::dispatch`] directly.

use std::{future::Future, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    cfg::config::MachineDescriptor,
    monitor::{MonitorMode, MonitorSupervisor},
    registry::SessionRegistry,
    signals::SignalOperations,
    sinks::{ErrorSink, EventSink},
    store::ConfigStore,
};

/// One inbound call, already parsed off the wire (§6's procedure table).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RpcRequest {
    Execute { function_name: String, kargs_json: JsonValue, uid: String },
    ExecuteMonitor { name: String, uid: String },
    DisableMonitor { name: String, uid: String },
    AddMachine { uid: String, name: String, config_json: JsonValue },
    DeleteMachine { uid: String },
    GetMachine { uid: String },
    Ping { uid: String },
}

/// `{name: "<op>_response", response: {...}, uid}` (§6).
#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub name: String,
    pub response: JsonValue,
    pub uid: String,
}

impl RpcResponse {
    fn new(op: &str, uid: impl Into<String>, response: JsonValue) -> Self {
        Self { name: format!("{op}_response"), response, uid: uid.into() }
    }
}

/// Implemented by whatever the real transport layer is; exists so tests and
/// `main.rs`'s demo loop can both call into the core uniformly.
pub trait RpcHandler {
    fn dispatch(&self, request: RpcRequest) -> impl Future<Output = RpcResponse> + Send;
}

/// Binds a [`ConfigStore`], [`SessionRegistry`] and sink pair into the one
/// object the RPC layer talks to.
pub struct GatewayService<S: ConfigStore, Ev: EventSink, Er: ErrorSink> {
    store: Arc<S>,
    signals: SignalOperations<S>,
    monitors: Arc<MonitorSupervisor<S, Ev, Er>>,
}

impl<S, Ev, Er> GatewayService<S, Ev, Er>
where
    S: ConfigStore + 'static,
    Ev: EventSink + 'static,
    Er: ErrorSink + 'static,
{
    pub fn new(store: Arc<S>, registry: Arc<SessionRegistry>, events: Arc<Ev>, errors: Arc<Er>) -> Self {
        let signals = SignalOperations::new(Arc::clone(&store), Arc::clone(&registry));
        let monitors = Arc::new(MonitorSupervisor::new(Arc::clone(&store), registry, events, errors));
        Self { store, signals, monitors }
    }

    async fn execute(&self, function_name: &str, kargs: &JsonValue, uid: &str) -> JsonValue {
        match function_name {
            "send_signal" => {
                let Some(signal) = kargs.get("signal").and_then(JsonValue::as_str) else {
                    return serde_json::json!({"success": false, "error": "missing 'signal'"});
                };
                let value = kargs.get("value").cloned().unwrap_or(JsonValue::Null);
                let result = self.signals.write_signal(uid, signal, &value).await;
                serde_json::json!({"success": result.success, "error": result.error})
            }
            "read_signal" => {
                let Some(signal) = kargs.get("signal").and_then(JsonValue::as_str) else {
                    return serde_json::json!({"signal": JsonValue::Null, "error": "missing 'signal'"});
                };
                let result = self.signals.read_signal(uid, signal).await;
                serde_json::json!({"signal": result.signal, "value": result.value, "error": result.error})
            }
            "send_multiple_signals" => {
                let signals = json_string_array(kargs, "signals");
                let values = kargs.get("values").and_then(JsonValue::as_array).cloned().unwrap_or_default();
                match self.signals.write_many(uid, &signals, &values).await {
                    Ok(result) => serde_json::json!({"success": result.success, "results": result.results}),
                    Err(e) => serde_json::json!({"success": false, "error": e.to_string()}),
                }
            }
            "read_multiple_signals" => {
                let signals = json_string_array(kargs, "signals");
                let results = self.signals.read_many(uid, &signals).await;
                serde_json::json!({ "results": results })
            }
            other => serde_json::json!({"success": false, "error": format!("unknown function: {other}")}),
        }
    }

    async fn execute_monitor(&self, name: &str, uid: &str) -> JsonValue {
        let mode = match name {
            "monitor_on_change" => MonitorMode::OnChange,
            "monitor_continuously" => MonitorMode::Continuous,
            other => return serde_json::json!({"success": false, "error": format!("unknown monitor mode: {other}")}),
        };
        let started = self.monitors.start(uid, mode);
        serde_json::json!({"success": true, "already_running": !started})
    }

    fn disable_monitor(&self, name: &str, uid: &str) -> JsonValue {
        let mode = match name {
            "monitor_on_change" => MonitorMode::OnChange,
            "monitor_continuously" => MonitorMode::Continuous,
            other => return serde_json::json!({"success": false, "error": format!("unknown monitor mode: {other}")}),
        };
        let stopped = self.monitors.stop(uid, mode);
        serde_json::json!({"success": true, "was_running": stopped})
    }

    async fn add_machine(&self, uid: &str, name: &str, config_json: &JsonValue) -> JsonValue {
        let mut config = config_json.clone();
        if let JsonValue::Object(obj) = &mut config {
            obj.entry("machine_name").or_insert_with(|| JsonValue::String(name.to_string()));
        }
        match serde_json::from_value::<MachineDescriptor>(config) {
            Ok(descriptor) => match self.store.add_machine(uid, descriptor).await {
                Ok(()) => {
                    self.monitors.reconnect(uid);
                    serde_json::json!({"success": true})
                }
                Err(e) => serde_json::json!({"success": false, "error": e.to_string()}),
            },
            Err(e) => serde_json::json!({"success": false, "error": format!("invalid machine config: {e}")}),
        }
    }

    async fn delete_machine(&self, uid: &str) -> JsonValue {
        match self.store.delete_machine(uid).await {
            Ok(removed) => serde_json::json!({"success": removed.is_some()}),
            Err(e) => serde_json::json!({"success": false, "error": e.to_string()}),
        }
    }

    async fn get_machine(&self, uid: &str) -> JsonValue {
        match self.store.get_machine(uid).await {
            Ok(Some(machine)) => serde_json::to_value(machine).unwrap_or(JsonValue::Null),
            Ok(None) => JsonValue::Null,
            Err(e) => serde_json::json!({"error": e.to_string()}),
        }
    }

    async fn ping(&self, uid: &str) -> JsonValue {
        let known = matches!(self.store.get_machine(uid).await, Ok(Some(_)));
        serde_json::json!({"alive": known})
    }
}

fn json_string_array(kargs: &JsonValue, field: &str) -> Vec<String> {
    kargs
        .get(field)
        .and_then(JsonValue::as_array)
        .map(|items| items.iter().filter_map(JsonValue::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

impl<S, Ev, Er> RpcHandler for GatewayService<S, Ev, Er>
where
    S: ConfigStore + 'static,
    Ev: EventSink + 'static,
    Er: ErrorSink + 'static,
{
    async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        match request {
            RpcRequest::Execute { function_name, kargs_json, uid } => {
                let response = self.execute(&function_name, &kargs_json, &uid).await;
                RpcResponse::new("execute", uid, response)
            }
            RpcRequest::ExecuteMonitor { name, uid } => {
                let response = self.execute_monitor(&name, &uid).await;
                RpcResponse::new("execute_monitor", uid, response)
            }
            RpcRequest::DisableMonitor { name, uid } => {
                let response = self.disable_monitor(&name, &uid);
                RpcResponse::new("disable_monitor", uid, response)
            }
            RpcRequest::AddMachine { uid, name, config_json } => {
                let response = self.add_machine(&uid, &name, &config_json).await;
                RpcResponse::new("add_machine", uid, response)
            }
            RpcRequest::DeleteMachine { uid } => {
                let response = self.delete_machine(&uid).await;
                RpcResponse::new("delete_machine", uid, response)
            }
            RpcRequest::GetMachine { uid } => {
                let response = self.get_machine(&uid).await;
                RpcResponse::new("get_machine", uid, response)
            }
            RpcRequest::Ping { uid } => {
                let response = self.ping(&uid).await;
                RpcResponse::new("ping", uid, response)
            }
        }
    }
}
