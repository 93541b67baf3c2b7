// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Background change-detection workers, grounded on
//! `original_source/monitor_functions.py`'s `StoppableThread` registry and
//! its two sampling loops. `tokio::spawn` tasks replace Python threads;
//! `Arc<AtomicBool>` flags replace `threading.Event`, the same translation
//! the teacher applies to its own counters (`itt_gen`, `cmd_sn` in
//! `pool_sessions.rs`).

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use dashmap::DashMap;
use tokio::time::Duration;

use crate::{
    cfg::config::{AckValue, MachineDescriptor, MonitorEntry},
    codec::{self, SignalValue},
    error::GatewayError,
    registry::SessionRegistry,
    session::PlcSession,
    sinks::{ErrorSink, EventSink, GatewayErrorReport, GatewayEvent},
    store::ConfigStore,
};

/// Deviates from the literal source (plain inequality) per §9's own
/// recommendation: an epsilon-aware comparison for `real` signals, matching
/// the session cache's debounce epsilon rather than introducing a second,
/// stricter constant.
const ON_CHANGE_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorMode {
    OnChange,
    Continuous,
}

impl MonitorMode {
    fn event_name(self) -> &'static str {
        match self {
            MonitorMode::OnChange => "monitor_on_change_response",
            MonitorMode::Continuous => "monitor_continuously_response",
        }
    }

    fn period(self) -> Duration {
        match self {
            MonitorMode::OnChange => Duration::from_secs(2),
            MonitorMode::Continuous => Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MonitorKey {
    machine_id: String,
    mode: MonitorMode,
}

#[derive(Default)]
struct MonitorFlags {
    stop: AtomicBool,
    refresh: AtomicBool,
}

struct MonitorHandle {
    flags: Arc<MonitorFlags>,
}

/// Process-wide `machine_id ++ mode -> task` registry (§4.5). Start/stop are
/// synchronous and idempotent; the sampling loop itself runs as a detached
/// `tokio::spawn`ed task.
pub struct MonitorSupervisor<S, Ev, Er> {
    tasks: DashMap<MonitorKey, MonitorHandle>,
    store: Arc<S>,
    registry: Arc<SessionRegistry>,
    events: Arc<Ev>,
    errors: Arc<Er>,
}

impl<S, Ev, Er> MonitorSupervisor<S, Ev, Er>
where
    S: ConfigStore + 'static,
    Ev: EventSink + 'static,
    Er: ErrorSink + 'static,
{
    pub fn new(store: Arc<S>, registry: Arc<SessionRegistry>, events: Arc<Ev>, errors: Arc<Er>) -> Self {
        Self { tasks: DashMap::new(), store, registry, events, errors }
    }

    /// Starts a task for `(machine_id, mode)`, or — if one is already
    /// running — triggers `reconnect` and reports *already running*
    /// (I7).
    pub fn start(self: &Arc<Self>, machine_id: &str, mode: MonitorMode) -> bool {
        let key = MonitorKey { machine_id: machine_id.to_string(), mode };
        if self.tasks.contains_key(&key) {
            self.reconnect(machine_id);
            return false;
        }

        let flags = Arc::new(MonitorFlags::default());
        self.tasks.insert(key.clone(), MonitorHandle { flags: flags.clone() });

        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            supervisor.run_loop(key, flags).await;
        });
        true
    }

    /// Sets `stop` and deregisters the task. Idempotent (I8).
    pub fn stop(&self, machine_id: &str, mode: MonitorMode) -> bool {
        let key = MonitorKey { machine_id: machine_id.to_string(), mode };
        match self.tasks.remove(&key) {
            Some((_, handle)) => {
                handle.flags.stop.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Stops every task registered for `machine_id`, returning how many
    /// were stopped.
    pub fn stop_all(&self, machine_id: &str) -> usize {
        let keys: Vec<MonitorKey> = self
            .tasks
            .iter()
            .filter(|e| e.key().machine_id == machine_id)
            .map(|e| e.key().clone())
            .collect();

        keys.into_iter().filter(|key| self.stop(&key.machine_id, key.mode)).count()
    }

    /// Sets `refresh` on every registered task, not only those belonging to
    /// `machine_id` — preserved from the source (`StoppableThread.reconnect`
    /// iterates every thread unconditionally); see DESIGN.md.
    pub fn reconnect(&self, _machine_id: &str) {
        for entry in self.tasks.iter() {
            entry.value().flags.refresh.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_running(&self, machine_id: &str, mode: MonitorMode) -> bool {
        self.tasks.contains_key(&MonitorKey { machine_id: machine_id.to_string(), mode })
    }

    async fn run_loop(self: Arc<Self>, key: MonitorKey, flags: Arc<MonitorFlags>) {
        let mut prev_values: HashMap<String, SignalValue> = HashMap::new();

        while !flags.stop.load(Ordering::SeqCst) {
            if flags.refresh.swap(false, Ordering::SeqCst) {
                self.refresh_session(&key.machine_id).await;
            }

            if let Err(e) = self.sample_once(&key, &mut prev_values).await {
                tracing::warn!(machine_id = %key.machine_id, mode = ?key.mode, error = %e, "monitor sample failed");
                self.errors.publish_error(GatewayErrorReport::from_error(key.machine_id.clone(), &e)).await;
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            tokio::time::sleep(key.mode.period()).await;
        }
    }

    async fn refresh_session(&self, machine_id: &str) {
        if let Ok(Some(machine)) = self.store.get_machine(machine_id).await {
            let session = self.registry.get_or_create(machine.endpoint());
            session.force_reconnect().await;
        }
    }

    async fn sample_once(&self, key: &MonitorKey, prev_values: &mut HashMap<String, SignalValue>) -> Result<(), GatewayError> {
        let machine = self
            .store
            .get_machine(&key.machine_id)
            .await
            .map_err(|e| GatewayError::UnknownMachine(format!("{}: {e}", key.machine_id)))?
            .ok_or_else(|| GatewayError::UnknownMachine(key.machine_id.clone()))?;

        let plan = machine.signals_configuration.monitor_plan()?;
        let section = match key.mode {
            MonitorMode::OnChange => &plan.on_change,
            MonitorMode::Continuous => &plan.continuous,
        };
        if section.is_empty() {
            return Ok(());
        }

        let session = self.registry.get_or_create(machine.endpoint());
        let mut emitted = serde_json::Map::new();

        for (signal_name, entry) in section {
            let descriptor = machine.signals_configuration.descriptor(signal_name)?;
            let value = session.read_signal(&descriptor).await?;

            let changed = match key.mode {
                MonitorMode::OnChange => prev_values
                    .get(signal_name)
                    .map(|prev| prev.differs_with_epsilon(&value, ON_CHANGE_EPSILON))
                    .unwrap_or(true),
                MonitorMode::Continuous => true,
            };

            if changed {
                prev_values.insert(signal_name.clone(), value.clone());
                emitted.insert(
                    signal_name.clone(),
                    serde_json::to_value(&value).expect("SignalValue always serializes"),
                );
                self.apply_ack(&machine, &session, entry, &value).await;
            }
        }

        if !emitted.is_empty() {
            self.events
                .publish_event(GatewayEvent {
                    event_name: key.mode.event_name().to_string(),
                    event_data: serde_json::Value::Object(emitted),
                    machine_id: key.machine_id.clone(),
                })
                .await;
        }

        Ok(())
    }

    async fn apply_ack(&self, machine: &MachineDescriptor, session: &Arc<PlcSession>, entry: &MonitorEntry, observed: &SignalValue) {
        if !entry.ack {
            return;
        }
        let Some(ack_signal) = &entry.ack_signal else { return };
        let Ok(ack_descriptor) = machine.signals_configuration.descriptor(ack_signal) else {
            tracing::warn!(ack_signal, "ack_signal has no descriptor");
            return;
        };

        let ack_value = match &entry.ack_value {
            None | Some(AckValue::Same) => observed.clone(),
            Some(AckValue::Scalar(raw)) => match codec::coerce(&ack_descriptor, ack_signal, raw) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(ack_signal, error = %e, "ack value coercion failed");
                    return;
                }
            },
        };

        if let Err(e) = session.write_signal(&ack_descriptor, &ack_value).await {
            tracing::warn!(ack_signal, error = %e, "ack write failed");
        }
    }
}
