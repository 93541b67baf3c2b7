// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use s7gateway::{
    cfg::{cli::GatewayArgs, config::GatewaySettings, logger::init_logger},
    registry::SessionRegistry,
    rpc::{GatewayService, RpcHandler, RpcRequest},
    session::SessionParams,
    sinks::BroadcastSink,
    store::JsonFileConfigStore,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};

/// Minimal newline-delimited-JSON demo transport over stdin/stdout. A real
/// deployment swaps this for JSON-RPC-over-TCP, HTTP, or whatever the
/// operator's fleet already speaks; `GatewayService` itself is transport-
/// agnostic (§6).
#[tokio::main]
async fn main() -> Result<()> {
    let args = GatewayArgs::parse();
    let settings = GatewaySettings::from_env();
    let _log_guard = init_logger(&settings).context("failed to initialize logger")?;

    info!(env = %settings.env, port = settings.port, "starting s7gatewayd");

    let store = Arc::new(JsonFileConfigStore::new(args.config.as_str()));
    let registry = Arc::new(SessionRegistry::new(SessionParams::default()));
    let events = Arc::new(BroadcastSink::default());
    let errors = Arc::new(BroadcastSink::default());
    let service = GatewayService::new(store, registry, events, errors);

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await.context("failed to read request line")? {
        if line.trim().is_empty() {
            continue;
        }

        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                error!(error = %e, line, "failed to parse RPC request");
                continue;
            }
        };

        let response = service.dispatch(request).await;
        let mut payload = serde_json::to_vec(&response).context("failed to serialize RPC response")?;
        payload.push(b'\n');
        stdout.write_all(&payload).await.context("failed to write RPC response")?;
        stdout.flush().await.context("failed to flush stdout")?;
    }

    Ok(())
}
