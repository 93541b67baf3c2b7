// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Error taxonomy for the gateway core.
//!
//! Raised exceptions used for control flow in the reference implementation
//! become tagged variants here, enumerated once and matched explicitly at
//! every propagation boundary (see `signals.rs` and `monitor.rs` for where
//! these degrade into structured response fields instead of crossing the RPC
//! boundary as errors).

use thiserror::Error;

use crate::wire::S7WireError;

/// Every fault the core can report, independent of how a caller surfaces it.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Could not establish or reestablish the session socket within the
    /// retry budget.
    #[error("connection to {endpoint} failed after {attempts} attempt(s): {cause}")]
    ConnectionFailed {
        endpoint: String,
        attempts: u32,
        cause: S7WireError,
    },

    /// An S7 read/write failed after all retries.
    #[error("{op} failed after {attempts} attempt(s): {cause}")]
    OperationFailed {
        op: &'static str,
        attempts: u32,
        cause: S7WireError,
    },

    /// Lock acquisition timed out.
    #[error("session busy (lock acquisition timed out)")]
    Busy,

    /// The requested machine id has no configuration entry.
    #[error("unknown machine: {0}")]
    UnknownMachine(String),

    /// The requested signal name has no descriptor in the machine's signal
    /// map.
    #[error("unknown signal: {0}")]
    UnknownSignal(String),

    /// The signal descriptor itself is malformed (missing/contradictory
    /// fields).
    #[error("invalid signal descriptor for {signal}: {reason}")]
    InvalidDescriptor { signal: String, reason: String },

    /// `signals` and `values` arrays in a bulk write differed in length.
    #[error("arity mismatch: {signals} signal(s), {values} value(s)")]
    Arity { signals: usize, values: usize },

    /// The descriptor names a type the codec does not implement.
    #[error("unsupported signal type: {0}")]
    TypeUnsupported(String),

    /// A value could not be represented in the signal's declared width.
    #[error("value out of range for {signal} ({type_name}): {value}")]
    ValueOutOfRange {
        signal: String,
        type_name: &'static str,
        value: String,
    },

    /// Malformed wire bytes, e.g. a STRING whose declared length exceeds the
    /// buffer that was read.
    #[error("codec error: {0}")]
    CodecError(String),
}

impl GatewayError {
    /// Dotted `major.minor.patch` error code used when publishing to the
    /// error channel (§7). Unknown kinds fall back to a generic code.
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::ConnectionFailed { .. } => "1.1.1",
            GatewayError::OperationFailed { .. } => "1.1.2",
            GatewayError::Busy => "1.1.3",
            GatewayError::UnknownMachine(_) => "1.2.1",
            GatewayError::UnknownSignal(_) => "1.2.2",
            GatewayError::InvalidDescriptor { .. } => "1.2.3",
            GatewayError::Arity { .. } => "1.2.4",
            GatewayError::TypeUnsupported(_) => "1.2.5",
            GatewayError::ValueOutOfRange { .. } => "1.2.6",
            GatewayError::CodecError(_) => "1.1.4",
        }
    }

    /// Short machine-stable name, used as `error_name` on the error channel.
    pub fn error_name(&self) -> &'static str {
        match self {
            GatewayError::ConnectionFailed { .. } => "connection_failed",
            GatewayError::OperationFailed { .. } => "operation_failed",
            GatewayError::Busy => "busy",
            GatewayError::UnknownMachine(_) => "unknown_machine",
            GatewayError::UnknownSignal(_) => "unknown_signal",
            GatewayError::InvalidDescriptor { .. } => "invalid_descriptor",
            GatewayError::Arity { .. } => "arity",
            GatewayError::TypeUnsupported(_) => "type_unsupported",
            GatewayError::ValueOutOfRange { .. } => "value_out_of_range",
            GatewayError::CodecError(_) => "error_executing_function_call",
        }
    }
}

/// Default error code used when a kind is missing from the metadata table
/// (§7, "unknown codes fall back to a default").
pub const DEFAULT_ERROR_CODE: &str = "1.0.0";
