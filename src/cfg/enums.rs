// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use serde::{Deserialize, Serialize};

/// S7 primitive signal type enumeration.
///
/// Drives both codec dispatch (§4.1) and the byte size table used to derive
/// cache keys and buffer lengths.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Bool,
    Int,
    Dint,
    Real,
    String,
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignalType::Bool => "bool",
            SignalType::Int => "int",
            SignalType::Dint => "dint",
            SignalType::Real => "real",
            SignalType::String => "string",
        })
    }
}

impl SignalType {
    /// Rust type name used in `ValueOutOfRange` error messages.
    pub fn type_name(self) -> &'static str {
        match self {
            SignalType::Bool => "bool",
            SignalType::Int => "i16",
            SignalType::Dint => "i32",
            SignalType::Real => "f32",
            SignalType::String => "string",
        }
    }
}
