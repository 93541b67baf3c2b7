// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A single PLC endpoint's connection, debounce cache, and retry policy.
//!
//! Mirrors the teacher's `ClientConnection`: one socket behind a
//! lock-serialized half, reconnected lazily on demand rather than kept alive
//! by a background read loop (S7's DB read/write job telegrams are strict
//! request/response, so there is no unsolicited-NOP-style traffic to drain).

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::warn;

use crate::{
    cfg::config::{EndpointKey, SignalDescriptor},
    cfg::enums::SignalType,
    codec::{self, SignalValue},
    error::GatewayError,
    wire::{ConnectionType, S7Transport, S7WireError},
};

/// Tunables that used to be constructor kwargs in the reference
/// implementation; defaults match it exactly.
#[derive(Debug, Clone, Copy)]
pub struct SessionParams {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub cache_time: Duration,
    pub consecutive_reads: u32,
    pub max_cache_entries: usize,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            cache_time: Duration::from_millis(50),
            consecutive_reads: 3,
            max_cache_entries: 1000,
        }
    }
}

/// Identifies one addressable wire location, independent of signal name (a
/// descriptor's byte range, not its logical name, is what debounce state is
/// keyed on).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    db: u16,
    start: u16,
    size: u16,
    bit: Option<u8>,
}

impl CacheKey {
    fn for_descriptor(d: &SignalDescriptor) -> Self {
        CacheKey {
            db: d.db_number,
            start: d.offset,
            size: d.size(),
            bit: d.bit_pos,
        }
    }
}

/// Two-slot debounce state: `reported_value` is what callers see;
/// `candidate` accumulates consecutive matching raw reads of a *new* value
/// before it is promoted. A single-slot cache (one value + one counter)
/// cannot let a new value accumulate matches once it has diverged from what
/// was last reported — see DESIGN.md.
#[derive(Debug, Clone)]
struct CacheEntry {
    last_observed_at: Instant,
    reported_value: SignalValue,
    candidate: Option<(SignalValue, u32)>,
}

const REAL_EPSILON: f32 = 1e-6;

struct SessionInner {
    transport: Option<S7Transport>,
}

/// One PLC endpoint's session: connection lifecycle, I/O serialization, and
/// the debounce cache. Obtained through [`crate::registry::SessionRegistry`],
/// never constructed directly by callers other than the registry (I1).
pub struct PlcSession {
    endpoint: EndpointKey,
    conn_type: ConnectionType,
    params: SessionParams,
    inner: Mutex<SessionInner>,
    cache: DashMap<CacheKey, CacheEntry>,
}

impl PlcSession {
    pub fn new(endpoint: EndpointKey, params: SessionParams) -> Self {
        Self {
            endpoint,
            conn_type: ConnectionType::Pg,
            params,
            inner: Mutex::new(SessionInner { transport: None }),
            cache: DashMap::new(),
        }
    }

    pub fn endpoint(&self) -> &EndpointKey {
        &self.endpoint
    }

    /// Forces the next I/O on this session to reopen the wire connection
    /// (used by the monitor supervisor's `reconnect`, §4.5).
    pub async fn force_reconnect(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(mut transport) = inner.transport.take() {
            transport.disconnect().await;
        }
    }

    /// Acquires the connection lock, translating a timeout into `Busy` (I2).
    async fn acquire(&self) -> Result<tokio::sync::MutexGuard<'_, SessionInner>, GatewayError> {
        tokio::time::timeout(Duration::from_secs(5), self.inner.lock())
            .await
            .map_err(|_| GatewayError::Busy)
    }

    async fn connect_once(&self) -> Result<S7Transport, S7WireError> {
        S7Transport::connect(&self.endpoint.host, self.endpoint.rack, self.endpoint.slot, self.conn_type).await
    }

    /// Raw DB read with reconnect-on-failure retries. No caching, no
    /// debounce — used both directly (bool read-modify-write) and as the
    /// refill path behind [`Self::read_signal`].
    pub async fn raw_read(&self, db: u16, start: u16, size: u16) -> Result<Vec<u8>, GatewayError> {
        let mut inner = self.acquire().await?;
        let mut buffer = vec![0u8; size as usize];
        let attempts = self.params.max_retries.max(1);
        let mut last_cause = S7WireError::NotConnected;

        for attempt in 1..=attempts {
            if inner.transport.is_none() {
                match self.connect_once().await {
                    Ok(t) => inner.transport = Some(t),
                    Err(e) => {
                        warn!(endpoint = %self.endpoint, attempt, error = %e, "PLC connect failed");
                        last_cause = e;
                        if attempt < attempts {
                            tokio::time::sleep(self.params.retry_delay).await;
                        }
                        continue;
                    }
                }
            }

            let transport = inner.transport.as_mut().expect("set above");
            match transport.read_db(db, start, &mut buffer).await {
                Ok(()) => return Ok(buffer),
                Err(e) => {
                    warn!(endpoint = %self.endpoint, attempt, error = %e, "PLC read_db failed");
                    inner.transport = None;
                    last_cause = e;
                    if attempt < attempts {
                        tokio::time::sleep(self.params.retry_delay).await;
                    }
                }
            }
        }

        Err(GatewayError::OperationFailed {
            op: "read_db",
            attempts,
            cause: last_cause,
        })
    }

    /// Raw DB write with the same retry policy as [`Self::raw_read`].
    pub async fn raw_write(&self, db: u16, start: u16, bytes: &[u8]) -> Result<(), GatewayError> {
        let mut inner = self.acquire().await?;
        let attempts = self.params.max_retries.max(1);
        let mut last_cause = S7WireError::NotConnected;

        for attempt in 1..=attempts {
            if inner.transport.is_none() {
                match self.connect_once().await {
                    Ok(t) => inner.transport = Some(t),
                    Err(e) => {
                        warn!(endpoint = %self.endpoint, attempt, error = %e, "PLC connect failed");
                        last_cause = e;
                        if attempt < attempts {
                            tokio::time::sleep(self.params.retry_delay).await;
                        }
                        continue;
                    }
                }
            }

            let transport = inner.transport.as_mut().expect("set above");
            match transport.write_db(db, start, bytes).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(endpoint = %self.endpoint, attempt, error = %e, "PLC write_db failed");
                    inner.transport = None;
                    last_cause = e;
                    if attempt < attempts {
                        tokio::time::sleep(self.params.retry_delay).await;
                    }
                }
            }
        }

        Err(GatewayError::OperationFailed {
            op: "write_db",
            attempts,
            cause: last_cause,
        })
    }

    /// Reads through the debounce cache (I4, I5): a read within
    /// `cache_time` of the last observation never touches the wire.
    pub async fn read_signal(&self, descriptor: &SignalDescriptor) -> Result<SignalValue, GatewayError> {
        let key = CacheKey::for_descriptor(descriptor);
        let now = Instant::now();

        if let Some(entry) = self.cache.get(&key)
            && now.duration_since(entry.last_observed_at) < self.params.cache_time
        {
            return Ok(entry.reported_value.clone());
        }

        let raw_bytes = self.raw_read(descriptor.db_number, descriptor.offset, descriptor.size()).await?;
        let raw_value = codec::decode(descriptor, &raw_bytes)?;
        let reported = self.apply_debounce(key, raw_value, now);
        self.evict_stale(now);
        Ok(reported)
    }

    /// Writes a signal and invalidates its cache entry (I6).
    pub async fn write_signal(&self, descriptor: &SignalDescriptor, value: &SignalValue) -> Result<(), GatewayError> {
        let key = CacheKey::for_descriptor(descriptor);
        let bytes = if descriptor.type_ == SignalType::Bool {
            let current = self.raw_read(descriptor.db_number, descriptor.offset, 1).await?;
            codec::encode(descriptor, value, current.first().copied())?
        } else {
            codec::encode(descriptor, value, None)?
        };
        self.raw_write(descriptor.db_number, descriptor.offset, &bytes).await?;
        self.cache.remove(&key);
        Ok(())
    }

    fn apply_debounce(&self, key: CacheKey, raw: SignalValue, now: Instant) -> SignalValue {
        let previous = self.cache.get(&key).map(|e| e.value().clone());

        let (reported, candidate) = match previous {
            None => (raw, None),
            Some(entry) => {
                if !entry.reported_value.differs_with_epsilon(&raw, REAL_EPSILON) {
                    (entry.reported_value, None)
                } else {
                    match entry.candidate {
                        Some((candidate_value, count))
                            if !candidate_value.differs_with_epsilon(&raw, REAL_EPSILON) =>
                        {
                            let count = count + 1;
                            if count >= self.params.consecutive_reads {
                                (raw, None)
                            } else {
                                (entry.reported_value, Some((candidate_value, count)))
                            }
                        }
                        _ => (entry.reported_value, Some((raw, 1))),
                    }
                }
            }
        };

        self.cache.insert(key, CacheEntry {
            last_observed_at: now,
            reported_value: reported.clone(),
            candidate,
        });
        reported
    }

    /// Drops entries older than `10 * cache_time` and trims to
    /// `max_cache_entries` by oldest-first eviction, matching the source's
    /// cleanup policy.
    fn evict_stale(&self, now: Instant) {
        let cutoff = self.params.cache_time * 10;
        self.cache.retain(|_, entry| now.duration_since(entry.last_observed_at) < cutoff);

        if self.cache.len() > self.params.max_cache_entries {
            let mut by_age: Vec<(CacheKey, Instant)> = self
                .cache
                .iter()
                .map(|e| (e.key().clone(), e.value().last_observed_at))
                .collect();
            by_age.sort_unstable_by_key(|(_, t)| *t);
            let excess = by_age.len() - self.params.max_cache_entries;
            for (key, _) in by_age.into_iter().take(excess) {
                self.cache.remove(&key);
            }
        }
    }
}
