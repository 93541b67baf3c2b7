// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use s7gateway::{cfg::config::EndpointKey, registry::SessionRegistry, session::SessionParams};

/// I1: concurrent callers requesting the same endpoint key observe the same
/// session, even when the requests race.
#[tokio::test]
async fn concurrent_get_or_create_converges_on_one_session() {
    let registry = std::sync::Arc::new(SessionRegistry::new(SessionParams::default()));
    let endpoint = EndpointKey::new("10.0.0.9", 0, 1);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let registry = registry.clone();
        let endpoint = endpoint.clone();
        handles.push(tokio::spawn(async move { registry.get_or_create(endpoint) }));
    }

    let mut sessions = Vec::new();
    for handle in handles {
        sessions.push(handle.await.expect("task panicked"));
    }

    let first = &sessions[0];
    assert!(sessions.iter().all(|s| std::sync::Arc::ptr_eq(s, first)));
    assert_eq!(registry.len(), 1);
}
