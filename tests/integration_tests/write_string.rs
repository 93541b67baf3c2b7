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

/// End-to-end scenario 4: descriptor `{db:5, offset:0, type:string,
/// max_length:10}`, value `"HELLO"` lands as `[10, 5, 'H','E','L','L','O']`.
#[tokio::test]
#[serial]
async fn write_string_emits_max_length_and_current_length_header() {
    let memory = Arc::new(Mutex::new(HashMap::new()));
    let memory_handle = memory.clone();
    let _plc = FakePlc::spawn(memory).await;

    let session = PlcSession::new(EndpointKey::new("127.0.0.1", 0, 1), SessionParams::default());
    let descriptor = SignalDescriptor { db_number: 5, offset: 0, type_: SignalType::String, bit_pos: None, max_length: Some(10) };

    session.write_signal(&descriptor, &SignalValue::String("HELLO".to_string())).await.expect("write");

    let mem = memory_handle.lock().await;
    let buf = mem.get(&5).expect("db5 written");
    assert_eq!(&buf[0..7], &[10, 5, b'H', b'E', b'L', b'L', b'O']);
}
