// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Stateless translation between a [`SignalDescriptor`] + raw S7 wire bytes
//! and a typed [`SignalValue`]. Encoding/decoding never touches the network;
//! [`crate::session`] is responsible for getting the right bytes to and from
//! the right DB offset.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    cfg::{config::SignalDescriptor, enums::SignalType},
    error::GatewayError,
};

/// A decoded signal value, independent of its wire representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    Bool(bool),
    Int(i16),
    Dint(i32),
    Real(f32),
    String(String),
}

impl SignalValue {
    /// True if `other` differs from `self` under the comparison rule for
    /// this variant: exact equality for bool/int/dint/string, epsilon-aware
    /// for real (matching the session cache's debounce comparison, not the
    /// monitor loop's plain inequality — see `monitor.rs`).
    pub fn differs_with_epsilon(&self, other: &SignalValue, epsilon: f32) -> bool {
        match (self, other) {
            (SignalValue::Real(a), SignalValue::Real(b)) => (a - b).abs() > epsilon,
            _ => self != other,
        }
    }
}

/// Coerces a loosely-typed input (as received over the RPC surface) into the
/// [`SignalValue`] a descriptor's type demands.
pub fn coerce(descriptor: &SignalDescriptor, signal: &str, raw: &JsonValue) -> Result<SignalValue, GatewayError> {
    match descriptor.type_ {
        SignalType::Bool => coerce_bool(signal, raw),
        SignalType::Int => coerce_int(descriptor, signal, raw),
        SignalType::Dint => coerce_dint(descriptor, signal, raw),
        SignalType::Real => coerce_real(signal, raw),
        SignalType::String => coerce_string(signal, raw),
    }
}

fn out_of_range(signal: &str, type_name: &'static str, value: &JsonValue) -> GatewayError {
    GatewayError::ValueOutOfRange {
        signal: signal.to_string(),
        type_name,
        value: value.to_string(),
    }
}

fn coerce_bool(signal: &str, raw: &JsonValue) -> Result<SignalValue, GatewayError> {
    match raw {
        JsonValue::Bool(b) => Ok(SignalValue::Bool(*b)),
        JsonValue::String(s) if s.eq_ignore_ascii_case("true") => Ok(SignalValue::Bool(true)),
        JsonValue::String(s) if s.eq_ignore_ascii_case("false") => Ok(SignalValue::Bool(false)),
        _ => Err(out_of_range(signal, "bool", raw)),
    }
}

fn coerce_int(descriptor: &SignalDescriptor, signal: &str, raw: &JsonValue) -> Result<SignalValue, GatewayError> {
    let n = raw
        .as_i64()
        .ok_or_else(|| out_of_range(signal, descriptor.type_.type_name(), raw))?;
    let v = i16::try_from(n).map_err(|_| out_of_range(signal, descriptor.type_.type_name(), raw))?;
    Ok(SignalValue::Int(v))
}

fn coerce_dint(descriptor: &SignalDescriptor, signal: &str, raw: &JsonValue) -> Result<SignalValue, GatewayError> {
    let n = raw
        .as_i64()
        .ok_or_else(|| out_of_range(signal, descriptor.type_.type_name(), raw))?;
    let v = i32::try_from(n).map_err(|_| out_of_range(signal, descriptor.type_.type_name(), raw))?;
    Ok(SignalValue::Dint(v))
}

fn coerce_real(signal: &str, raw: &JsonValue) -> Result<SignalValue, GatewayError> {
    let n = raw
        .as_f64()
        .ok_or_else(|| out_of_range(signal, "f32", raw))?;
    Ok(SignalValue::Real(n as f32))
}

fn coerce_string(signal: &str, raw: &JsonValue) -> Result<SignalValue, GatewayError> {
    let s = raw
        .as_str()
        .ok_or_else(|| out_of_range(signal, "string", raw))?;
    Ok(SignalValue::String(s.to_string()))
}

/// Encodes `value` into the bytes that belong at `(descriptor.db_number,
/// descriptor.offset)`, consulting the current byte for bool read-modify-write.
///
/// `current_byte` is the existing value of the single byte a bool signal is
/// packed into; callers must supply it for bool descriptors (obtained via a
/// preceding read) and may pass `None` otherwise.
pub fn encode(
    descriptor: &SignalDescriptor,
    value: &SignalValue,
    current_byte: Option<u8>,
) -> Result<Vec<u8>, GatewayError> {
    match (descriptor.type_, value) {
        (SignalType::Bool, SignalValue::Bool(b)) => {
            let bit = descriptor.bit_pos.unwrap_or(0);
            let mut byte = current_byte.unwrap_or(0);
            if *b {
                byte |= 1 << bit;
            } else {
                byte &= !(1 << bit);
            }
            Ok(vec![byte])
        }
        (SignalType::Int, SignalValue::Int(v)) => Ok(v.to_be_bytes().to_vec()),
        (SignalType::Dint, SignalValue::Dint(v)) => Ok(v.to_be_bytes().to_vec()),
        (SignalType::Real, SignalValue::Real(v)) => Ok(v.to_be_bytes().to_vec()),
        (SignalType::String, SignalValue::String(s)) => {
            let max_len = descriptor.max_length();
            let bytes = s.as_bytes();
            let current_len = bytes.len().min(max_len as usize);
            let mut out = Vec::with_capacity(2 + max_len as usize);
            out.push(max_len.min(u8::MAX as u16) as u8);
            out.push(current_len as u8);
            out.extend_from_slice(&bytes[..current_len]);
            Ok(out)
        }
        _ => Err(GatewayError::TypeUnsupported(descriptor.type_.to_string())),
    }
}

/// Decodes `bytes` (exactly `descriptor.size()` long for non-bool types; any
/// length ≥ 1 for bool) into a [`SignalValue`].
pub fn decode(descriptor: &SignalDescriptor, bytes: &[u8]) -> Result<SignalValue, GatewayError> {
    match descriptor.type_ {
        SignalType::Bool => {
            let byte = *bytes
                .first()
                .ok_or_else(|| GatewayError::CodecError("empty buffer for bool signal".to_string()))?;
            let bit = descriptor.bit_pos.unwrap_or(0);
            Ok(SignalValue::Bool(byte & (1 << bit) != 0))
        }
        SignalType::Int => {
            let arr: [u8; 2] = bytes
                .get(..2)
                .and_then(|s| s.try_into().ok())
                .ok_or_else(|| GatewayError::CodecError("short buffer for int signal".to_string()))?;
            Ok(SignalValue::Int(i16::from_be_bytes(arr)))
        }
        SignalType::Dint => {
            let arr: [u8; 4] = bytes
                .get(..4)
                .and_then(|s| s.try_into().ok())
                .ok_or_else(|| GatewayError::CodecError("short buffer for dint signal".to_string()))?;
            Ok(SignalValue::Dint(i32::from_be_bytes(arr)))
        }
        SignalType::Real => {
            let arr: [u8; 4] = bytes
                .get(..4)
                .and_then(|s| s.try_into().ok())
                .ok_or_else(|| GatewayError::CodecError("short buffer for real signal".to_string()))?;
            Ok(SignalValue::Real(f32::from_be_bytes(arr)))
        }
        SignalType::String => {
            if bytes.len() < 2 {
                return Err(GatewayError::CodecError("short buffer for string header".to_string()));
            }
            let current_len = bytes[1] as usize;
            let max_len = descriptor.max_length() as usize;
            let take = current_len.min(max_len).min(bytes.len() - 2);
            let content = &bytes[2..2 + take];
            let s = String::from_utf8_lossy(content).into_owned();
            Ok(SignalValue::String(s))
        }
    }
}
