// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Single-signal and bulk read/write operations, grounded on
//! `original_source/call_functions.py`'s four handlers
//! (`send_signal`/`read_signal`/`send_multiple_signals`/`read_multiple_signals`).
//! Resolution order mirrors the source: machine lookup, signal descriptor
//! lookup, then codec + session dispatch (§4.2).

use std::{collections::HashMap, sync::Arc};

use serde_json::Value as JsonValue;

use crate::{
    cfg::config::SignalDescriptor,
    codec::{self, SignalValue},
    error::GatewayError,
    registry::SessionRegistry,
    session::PlcSession,
    store::ConfigStore,
};

#[derive(Debug, Clone)]
pub struct ReadSignalResult {
    pub signal: String,
    pub value: Option<SignalValue>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WriteSignalResult {
    pub signal: String,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WriteManyResult {
    pub success: bool,
    pub results: HashMap<String, bool>,
}

/// Dispatches signal reads/writes against a [`ConfigStore`] + [`SessionRegistry`]
/// pair, degrading per-signal failures to structured fields instead of
/// propagating them across the RPC boundary (§7's propagation policy).
pub struct SignalOperations<S: ConfigStore> {
    store: Arc<S>,
    registry: Arc<SessionRegistry>,
}

impl<S: ConfigStore> SignalOperations<S> {
    pub fn new(store: Arc<S>, registry: Arc<SessionRegistry>) -> Self {
        Self { store, registry }
    }

    async fn resolve(
        &self,
        machine_id: &str,
        signal: &str,
    ) -> Result<(Arc<PlcSession>, SignalDescriptor), GatewayError> {
        let machine = self
            .store
            .get_machine(machine_id)
            .await
            .map_err(|e| GatewayError::UnknownMachine(format!("{machine_id}: {e}")))?
            .ok_or_else(|| GatewayError::UnknownMachine(machine_id.to_string()))?;

        let descriptor = machine.signals_configuration.descriptor(signal)?;
        let session = self.registry.get_or_create(machine.endpoint());
        Ok((session, descriptor))
    }

    pub async fn read_signal(&self, machine_id: &str, signal: &str) -> ReadSignalResult {
        match self.resolve(machine_id, signal).await {
            Ok((session, descriptor)) => match session.read_signal(&descriptor).await {
                Ok(value) => ReadSignalResult { signal: signal.to_string(), value: Some(value), error: None },
                Err(e) => {
                    tracing::warn!(machine_id, signal, error = %e, "read_signal failed");
                    ReadSignalResult { signal: signal.to_string(), value: None, error: Some(e.to_string()) }
                }
            },
            Err(e) => ReadSignalResult { signal: signal.to_string(), value: None, error: Some(e.to_string()) },
        }
    }

    pub async fn write_signal(&self, machine_id: &str, signal: &str, raw_value: &JsonValue) -> WriteSignalResult {
        let (session, descriptor) = match self.resolve(machine_id, signal).await {
            Ok(pair) => pair,
            Err(e) => return WriteSignalResult { signal: signal.to_string(), success: false, error: Some(e.to_string()) },
        };

        let value = match codec::coerce(&descriptor, signal, raw_value) {
            Ok(v) => v,
            Err(e) => return WriteSignalResult { signal: signal.to_string(), success: false, error: Some(e.to_string()) },
        };

        match session.write_signal(&descriptor, &value).await {
            Ok(()) => WriteSignalResult { signal: signal.to_string(), success: true, error: None },
            Err(e) => {
                tracing::warn!(machine_id, signal, error = %e, "write_signal failed");
                WriteSignalResult { signal: signal.to_string(), success: false, error: Some(e.to_string()) }
            }
        }
    }

    /// Reads each signal independently; a failing signal becomes `None` in
    /// the map without aborting the rest of the batch.
    pub async fn read_many(&self, machine_id: &str, signals: &[String]) -> HashMap<String, Option<SignalValue>> {
        let mut results = HashMap::with_capacity(signals.len());
        for signal in signals {
            let outcome = self.read_signal(machine_id, signal).await;
            results.insert(signal.clone(), outcome.value);
        }
        results
    }

    /// Writes each `(signal, value)` pair independently; arity mismatch is
    /// the one failure mode that aborts the whole call (§8 scenario 6).
    pub async fn write_many(
        &self,
        machine_id: &str,
        signals: &[String],
        values: &[JsonValue],
    ) -> Result<WriteManyResult, GatewayError> {
        if signals.len() != values.len() {
            return Err(GatewayError::Arity { signals: signals.len(), values: values.len() });
        }

        let mut results = HashMap::with_capacity(signals.len());
        for (signal, value) in signals.iter().zip(values.iter()) {
            let outcome = self.write_signal(machine_id, signal, value).await;
            results.insert(signal.clone(), outcome.success);
        }
        let success = results.values().all(|ok| *ok);
        Ok(WriteManyResult { success, results })
    }
}
