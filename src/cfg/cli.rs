// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use clap::Parser;

/// Command-line surface for the `s7gatewayd` demo binary.
#[derive(Debug, Parser)]
#[command(name = "s7gatewayd", about = "S7 PLC field-gateway daemon")]
pub struct GatewayArgs {
    /// Path to the machine-configuration JSON document.
    #[arg(long, default_value = "config.json")]
    pub config: String,
}
