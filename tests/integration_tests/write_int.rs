// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, sync::Arc};

use s7gateway::{
    cfg::config::{EndpointKey, SignalDescriptor},
    cfg::enums::SignalType,
    codec::SignalValue,
    session::{PlcSession, SessionParams},
};
use serial_test::serial;
use tokio::sync::Mutex;

use crate::integration_tests::common::FakePlc;

/// End-to-end scenario 3: descriptor `{db:20, offset:4, type:int}`, value
/// `-17` lands on the wire as `0xFF 0xEF` at DB20:4.
#[tokio::test]
#[serial]
async fn write_negative_int_is_twos_complement_on_the_wire() {
    let memory = Arc::new(Mutex::new(HashMap::new()));
    let memory_handle = memory.clone();
    let _plc = FakePlc::spawn(memory).await;

    let session = PlcSession::new(EndpointKey::new("127.0.0.1", 0, 1), SessionParams::default());
    let descriptor = SignalDescriptor { db_number: 20, offset: 4, type_: SignalType::Int, bit_pos: None, max_length: None };

    session.write_signal(&descriptor, &SignalValue::Int(-17)).await.expect("write");

    let mem = memory_handle.lock().await;
    let buf = mem.get(&20).expect("db20 written");
    assert_eq!(&buf[4..6], &[0xFF, 0xEF]);
}
