// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, sync::Arc};

use s7gateway::{
    cfg::config::MachineDescriptor,
    registry::SessionRegistry,
    session::SessionParams,
    signals::SignalOperations,
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

/// End-to-end scenario 6: signals `[a, b, c]` with `b` unknown. The overall
/// response is `{success:false, results:{a:true, b:false, c:true}}` — `a`
/// and `c` still write successfully around the flagged failure.
#[tokio::test]
#[serial]
async fn write_many_degrades_the_unknown_signal_without_aborting_the_batch() {
    let memory = Arc::new(Mutex::new(HashMap::new()));
    let _plc = FakePlc::spawn(memory).await;

    let machine = MachineDescriptor {
        machine_name: "press-1".to_string(),
        host: "127.0.0.1".to_string(),
        rack: 0,
        slot: 1,
        signals_configuration: serde_json::from_value(serde_json::json!({
            "a": {"db_number": 1, "offset": 0, "type": "int"},
            "c": {"db_number": 1, "offset": 2, "type": "int"}
        }))
        .expect("valid signals config"),
    };

    let store = Arc::new(InMemoryStore(Mutex::new(HashMap::new())));
    store.add_machine("m1", machine).await.expect("add machine");

    let registry = Arc::new(SessionRegistry::new(SessionParams::default()));
    let ops = SignalOperations::new(store, registry);

    let signals = ["a".to_string(), "b".to_string(), "c".to_string()];
    let values = [serde_json::json!(1), serde_json::json!(2), serde_json::json!(3)];

    let result = ops.write_many("m1", &signals, &values).await.expect("arity matches");
    assert!(!result.success);
    assert_eq!(result.results.get("a"), Some(&true));
    assert_eq!(result.results.get("b"), Some(&false));
    assert_eq!(result.results.get("c"), Some(&true));
}
