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

/// End-to-end scenario 1: descriptor `{db:10, offset:0, type:bool, bit_pos:3}`,
/// wire byte at DB10:0 = `0x08` decodes to `true`.
#[tokio::test]
#[serial]
async fn read_bool_decodes_bit_three() {
    let memory = Arc::new(Mutex::new(HashMap::from([(10u16, vec![0x08u8; 4096])])));
    let _plc = FakePlc::spawn(memory).await;

    let session = PlcSession::new(EndpointKey::new("127.0.0.1", 0, 1), SessionParams::default());
    let descriptor = SignalDescriptor { db_number: 10, offset: 0, type_: SignalType::Bool, bit_pos: Some(3), max_length: None };

    let value = session.read_signal(&descriptor).await.expect("read");
    assert_eq!(value, SignalValue::Bool(true));
}
