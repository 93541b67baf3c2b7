// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Process-wide map of endpoint to session, grounded directly on the
//! teacher's `Pool` (`DashMap<u16, Arc<Session>>`, `src/client/pool_sessions.rs`):
//! an explicit registry rather than a hidden instance-interning singleton,
//! so lifecycle stays testable (§9).

use std::sync::Arc;

use dashmap::DashMap;

use crate::{
    cfg::config::EndpointKey,
    session::{PlcSession, SessionParams},
};

/// Returns the same [`PlcSession`] for the same [`EndpointKey`] across all
/// callers (I1), creating it on first use.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<EndpointKey, Arc<PlcSession>>,
    params: SessionParams,
}

impl SessionRegistry {
    pub fn new(params: SessionParams) -> Self {
        Self { sessions: DashMap::new(), params }
    }

    /// Returns the registered session for `endpoint`, creating one with the
    /// registry's default params if none exists yet.
    pub fn get_or_create(&self, endpoint: EndpointKey) -> Arc<PlcSession> {
        self.sessions
            .entry(endpoint.clone())
            .or_insert_with(|| Arc::new(PlcSession::new(endpoint, self.params)))
            .clone()
    }

    pub fn get(&self, endpoint: &EndpointKey) -> Option<Arc<PlcSession>> {
        self.sessions.get(endpoint).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
