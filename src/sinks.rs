// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Publish-only event/error channels, grounded on
//! `original_source/events.py` + `errors.py` + `redis_driver.py`. The core
//! never subscribes to these channels itself — it only needs to publish, so
//! the trait surface is publish-only, matching `RedisDriver.publish`.

use std::future::Future;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::{DEFAULT_ERROR_CODE, GatewayError};

/// Pub/sub channel names, mirroring the string literals `'event_queue'` /
/// `'error_queue'` in the source.
pub const EVENT_QUEUE: &str = "event_queue";
pub const ERROR_QUEUE: &str = "error_queue";

/// Wire shape of one published event (`events.py::send_event`'s payload).
#[derive(Debug, Clone, Serialize)]
pub struct GatewayEvent {
    pub event_name: String,
    pub event_data: serde_json::Value,
    pub machine_id: String,
}

/// Wire shape of one published error (`errors.py::send_error`'s payload).
#[derive(Debug, Clone, Serialize)]
pub struct GatewayErrorReport {
    pub error_name: String,
    pub error_code: String,
    pub error_message: String,
    pub machine_id: String,
}

impl GatewayErrorReport {
    pub fn from_error(machine_id: impl Into<String>, error: &GatewayError) -> Self {
        Self {
            error_name: error.error_name().to_string(),
            error_code: error.error_code().to_string(),
            error_message: error.to_string(),
            machine_id: machine_id.into(),
        }
    }
}

/// A small fallback table for error names that don't originate from
/// [`GatewayError`] itself (its own codes come straight from
/// `error_code()`). Unknown names fall back to [`DEFAULT_ERROR_CODE`], per
/// §7's "unknown codes fall back to a default".
const ERROR_CODE_TABLE: &[(&str, &str)] = &[("error_executing_function_call", "1.1.4")];

pub fn error_code_for(error_name: &str) -> &'static str {
    ERROR_CODE_TABLE
        .iter()
        .find(|(name, _)| *name == error_name)
        .map(|(_, code)| *code)
        .unwrap_or(DEFAULT_ERROR_CODE)
}

pub trait EventSink: Send + Sync {
    fn publish_event(&self, event: GatewayEvent) -> impl Future<Output = ()> + Send;
}

pub trait ErrorSink: Send + Sync {
    fn publish_error(&self, error: GatewayErrorReport) -> impl Future<Output = ()> + Send;
}

/// Default in-process sink built on `tokio::sync::broadcast`, usable
/// without any external Redis. Subscribers (tests, a demo RPC transport)
/// receive the same JSON string payload a Redis subscriber would.
pub struct BroadcastSink {
    events: broadcast::Sender<String>,
    errors: broadcast::Sender<String>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        let (errors, _) = broadcast::channel(capacity);
        Self { events, errors }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<String> {
        self.events.subscribe()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<String> {
        self.errors.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for BroadcastSink {
    async fn publish_event(&self, event: GatewayEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => {
                // No active subscriber is not an error; the event is simply dropped,
                // matching a fire-and-forget Redis PUBLISH with no listeners.
                let _ = self.events.send(payload);
            }
            Err(e) => tracing::error!(error = %e, "failed to serialize event"),
        }
    }
}

impl ErrorSink for BroadcastSink {
    async fn publish_error(&self, error: GatewayErrorReport) {
        match serde_json::to_string(&error) {
            Ok(payload) => {
                let _ = self.errors.send(payload);
            }
            Err(e) => tracing::error!(error = %e, "failed to serialize error report"),
        }
    }
}

#[cfg(feature = "redis-sink")]
pub mod redis_sink {
    //! Redis-backed sink for parity with `original_source/redis_driver.py`.
    //! Kept behind a cargo feature since most deployments of this crate in
    //! tests/demos run entirely in-process via [`super::BroadcastSink`].

    use redis::AsyncCommands;

    use super::{ERROR_QUEUE, EVENT_QUEUE, ErrorSink, EventSink, GatewayErrorReport, GatewayEvent};

    pub struct RedisSink {
        client: redis::Client,
    }

    impl RedisSink {
        pub fn new(redis_url: &str) -> redis::RedisResult<Self> {
            Ok(Self { client: redis::Client::open(redis_url)? })
        }

        async fn publish(&self, channel: &str, payload: String) {
            match self.client.get_multiplexed_async_connection().await {
                Ok(mut conn) => {
                    if let Err(e) = conn.publish::<_, _, ()>(channel, payload).await {
                        tracing::error!(channel, error = %e, "redis publish failed");
                    }
                }
                Err(e) => tracing::error!(channel, error = %e, "redis connection failed"),
            }
        }
    }

    impl EventSink for RedisSink {
        async fn publish_event(&self, event: GatewayEvent) {
            if let Ok(payload) = serde_json::to_string(&event) {
                self.publish(EVENT_QUEUE, payload).await;
            }
        }
    }

    impl ErrorSink for RedisSink {
        async fn publish_error(&self, error: GatewayErrorReport) {
            if let Ok(payload) = serde_json::to_string(&error) {
                self.publish(ERROR_QUEUE, payload).await;
            }
        }
    }
}
