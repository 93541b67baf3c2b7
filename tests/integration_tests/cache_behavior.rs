// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, sync::Arc, time::Duration};

use s7gateway::{
    cfg::config::{EndpointKey, SignalDescriptor},
    cfg::enums::SignalType,
    session::{PlcSession, SessionParams},
};
use serial_test::serial;
use tokio::sync::Mutex;

use crate::integration_tests::common::FakePlc;

fn descriptor() -> SignalDescriptor {
    SignalDescriptor { db_number: 1, offset: 0, type_: SignalType::Dint, bit_pos: None, max_length: None }
}

/// I5: two reads of the same location within `cache_time` make exactly one
/// wire call.
#[tokio::test]
#[serial]
async fn repeated_read_within_cache_time_hits_wire_once() {
    let memory = Arc::new(Mutex::new(HashMap::new()));
    let plc = FakePlc::spawn(memory).await;

    let session = PlcSession::new(
        EndpointKey::new("127.0.0.1", 0, 1),
        SessionParams { cache_time: Duration::from_millis(200), ..SessionParams::default() },
    );

    session.read_signal(&descriptor()).await.expect("first read");
    session.read_signal(&descriptor()).await.expect("second read");

    assert_eq!(plc.read_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

/// I6: a successful write invalidates the cache entry, so the next read
/// performs a fresh wire read instead of returning a stale cached value.
#[tokio::test]
#[serial]
async fn write_invalidates_cache_entry() {
    let memory = Arc::new(Mutex::new(HashMap::new()));
    let plc = FakePlc::spawn(memory).await;

    let session = PlcSession::new(
        EndpointKey::new("127.0.0.1", 0, 1),
        SessionParams { cache_time: Duration::from_millis(200), ..SessionParams::default() },
    );

    session.read_signal(&descriptor()).await.expect("first read");
    session.write_signal(&descriptor(), &s7gateway::codec::SignalValue::Dint(42)).await.expect("write");
    session.read_signal(&descriptor()).await.expect("read after write");

    assert_eq!(plc.read_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
}
