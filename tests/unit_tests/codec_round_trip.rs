// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use s7gateway::{
    cfg::{config::SignalDescriptor, enums::SignalType},
    codec::{self, SignalValue},
};

fn descriptor(type_: SignalType, bit_pos: Option<u8>, max_length: Option<u16>) -> SignalDescriptor {
    SignalDescriptor { db_number: 1, offset: 0, type_, bit_pos, max_length }
}

/// I3: `decode(T, encode(T, v)) == v` across the representable range.
#[test]
fn int_round_trips_across_its_range() {
    let d = descriptor(SignalType::Int, None, None);
    for v in [i16::MIN, -1, 0, 1, i16::MAX] {
        let bytes = codec::encode(&d, &SignalValue::Int(v), None).expect("encode");
        assert_eq!(codec::decode(&d, &bytes).expect("decode"), SignalValue::Int(v));
    }
}

#[test]
fn dint_round_trips_across_its_range() {
    let d = descriptor(SignalType::Dint, None, None);
    for v in [i32::MIN, -1, 0, 1, i32::MAX] {
        let bytes = codec::encode(&d, &SignalValue::Dint(v), None).expect("encode");
        assert_eq!(codec::decode(&d, &bytes).expect("decode"), SignalValue::Dint(v));
    }
}

#[test]
fn real_round_trips_within_one_ulp() {
    let d = descriptor(SignalType::Real, None, None);
    for v in [-1e6f32, -1.5, 0.0, 1.5, 1e6] {
        let bytes = codec::encode(&d, &SignalValue::Real(v), None).expect("encode");
        let SignalValue::Real(decoded) = codec::decode(&d, &bytes).expect("decode") else {
            panic!("expected real");
        };
        assert!((decoded - v).abs() <= f32::EPSILON, "{decoded} vs {v}");
    }
}

#[test]
fn bool_round_trips_every_bit_position_without_disturbing_siblings() {
    for bit in 0..=7u8 {
        let d = descriptor(SignalType::Bool, Some(bit), None);
        let current_byte = 0b1010_1010u8;
        let bytes = codec::encode(&d, &SignalValue::Bool(true), Some(current_byte)).expect("encode");
        assert_eq!(codec::decode(&d, &bytes).expect("decode"), SignalValue::Bool(true));

        for other_bit in 0..=7u8 {
            if other_bit == bit {
                continue;
            }
            let expected = (current_byte >> other_bit) & 1 == 1;
            assert_eq!((bytes[0] >> other_bit) & 1 == 1, expected, "bit {other_bit} disturbed");
        }
    }
}

#[test]
fn string_round_trips_within_max_length() {
    let d = descriptor(SignalType::String, None, Some(10));
    let bytes = codec::encode(&d, &SignalValue::String("hello".to_string()), None).expect("encode");
    assert_eq!(codec::decode(&d, &bytes).expect("decode"), SignalValue::String("hello".to_string()));
}

#[test]
fn string_longer_than_max_length_truncates_on_encode() {
    let d = descriptor(SignalType::String, None, Some(3));
    let bytes = codec::encode(&d, &SignalValue::String("HELLO".to_string()), None).expect("encode");
    assert_eq!(bytes, vec![3, 3, b'H', b'E', b'L']);
}
