// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, sync::Arc, time::Duration};

use s7gateway::{
    cfg::config::MachineDescriptor,
    monitor::{MonitorMode, MonitorSupervisor},
    registry::SessionRegistry,
    session::SessionParams,
    sinks::BroadcastSink,
    store::ConfigStore,
};
use serial_test::serial;
use tokio::sync::Mutex;

use crate::integration_tests::common::FakePlc;

struct InMemoryStore(Mutex<HashMap<String, MachineDescriptor>>);

impl ConfigStore for InMemoryStore {
    async fn get_machine(&self, uid: &str) -> anyhow::Result<Option<MachineDescriptor>> {
        Ok(self.0.lock().await.get(uid).cloned())
    }
    async fn add_machine(&self, uid: &str, descriptor: MachineDescriptor) -> anyhow::Result<()> {
        self.0.lock().await.insert(uid.to_string(), descriptor);
        Ok(())
    }
    async fn delete_machine(&self, uid: &str) -> anyhow::Result<Option<MachineDescriptor>> {
        Ok(self.0.lock().await.remove(uid))
    }
    async fn list_machines(&self) -> anyhow::Result<Vec<(String, MachineDescriptor)>> {
        Ok(self.0.lock().await.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

fn machine() -> MachineDescriptor {
    MachineDescriptor {
        machine_name: "press-1".to_string(),
        host: "127.0.0.1".to_string(),
        rack: 0,
        slot: 1,
        signals_configuration: serde_json::from_value(serde_json::json!({
            "temp": {"db_number": 1, "offset": 0, "type": "real"},
            "temp_ack": {"db_number": 1, "offset": 4, "type": "real"},
            "monitor_signals": {
                "on_change": {
                    "temp": {"ack": true, "ack_signal": "temp_ack", "ack_value": "same"}
                }
            }
        }))
        .expect("valid signals config"),
    }
}

/// End-to-end scenario 5: temperature transitions 70 -> 71; the supervisor
/// emits `monitor_on_change_response {temp: 71}` and writes 71 back to
/// `temp_ack` (the `ack_value: "same"` sentinel).
#[tokio::test]
#[serial]
async fn monitor_on_change_emits_event_and_writes_ack() {
    let memory = Arc::new(Mutex::new(HashMap::new()));
    {
        let mut mem = memory.lock().await;
        let mut db1 = vec![0u8; 16];
        db1[0..4].copy_from_slice(&70.0f32.to_be_bytes());
        mem.insert(1, db1);
    }
    let _plc = FakePlc::spawn(memory.clone()).await;

    let store = Arc::new(InMemoryStore(Mutex::new(HashMap::new())));
    store.add_machine("m1", machine()).await.expect("add machine");

    let registry = Arc::new(SessionRegistry::new(SessionParams::default()));
    let events = Arc::new(BroadcastSink::default());
    let errors = Arc::new(BroadcastSink::default());
    let mut event_rx = events.subscribe_events();

    let supervisor = Arc::new(MonitorSupervisor::new(store, registry, events, errors));
    supervisor.start("m1", MonitorMode::OnChange);

    let first = tokio::time::timeout(Duration::from_secs(3), event_rx.recv())
        .await
        .expect("first tick")
        .expect("event delivered");
    assert!(first.contains("70"));

    {
        let mut mem = memory.lock().await;
        let db1 = mem.get_mut(&1).expect("db1 present");
        db1[0..4].copy_from_slice(&71.0f32.to_be_bytes());
    }

    let second = tokio::time::timeout(Duration::from_secs(3), event_rx.recv())
        .await
        .expect("second tick")
        .expect("event delivered");
    assert!(second.contains("71"));

    supervisor.stop("m1", MonitorMode::OnChange);

    let mem = memory.lock().await;
    let db1 = mem.get(&1).expect("db1 present");
    assert_eq!(&db1[4..8], &71.0f32.to_be_bytes());
}
