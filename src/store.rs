// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Machine descriptor storage, grounded on
//! `original_source/connection/config.py`'s `config.json` document (a flat
//! `uid -> machine config` map), reimplemented with atomic
//! write-to-temp-then-rename instead of the source's in-place
//! read-modify-write (which can truncate the file on a crash between the two
//! `open()` calls).

use std::{future::Future, io::Write, path::PathBuf};

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::cfg::config::MachineDescriptor;

/// Owns the mapping from machine uid to [`MachineDescriptor`]. Kept as a
/// trait (rather than a single concrete struct) so `signals.rs`/`rpc.rs` can
/// be generic over it and tests can swap in an in-memory store.
pub trait ConfigStore: Send + Sync {
    fn get_machine(&self, uid: &str) -> impl Future<Output = Result<Option<MachineDescriptor>>> + Send;
    fn add_machine(
        &self,
        uid: &str,
        descriptor: MachineDescriptor,
    ) -> impl Future<Output = Result<()>> + Send;
    fn delete_machine(&self, uid: &str) -> impl Future<Output = Result<Option<MachineDescriptor>>> + Send;
    fn list_machines(&self) -> impl Future<Output = Result<Vec<(String, MachineDescriptor)>>> + Send;
}

/// JSON-file-backed [`ConfigStore`]. Reads are plain; writes go through a
/// sibling temp file that gets renamed into place, so a reader never
/// observes a half-written document.
pub struct JsonFileConfigStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    async fn load(&self) -> Result<Map<String, Value>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                serde_json::from_str(&contents).context("config store document is not valid JSON")
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e).context("failed to read config store document"),
        }
    }

    fn persist(&self, data: &Map<String, Value>) -> Result<()> {
        let dir = self.path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).context("failed to create temp file for config store")?;
        tmp.write_all(&serde_json::to_vec_pretty(data)?)
            .context("failed to write config store temp file")?;
        tmp.flush()?;
        tmp.persist(&self.path).context("failed to rename config store temp file into place")?;
        Ok(())
    }
}

impl ConfigStore for JsonFileConfigStore {
    async fn get_machine(&self, uid: &str) -> Result<Option<MachineDescriptor>> {
        let data = self.load().await?;
        match data.get(uid) {
            None => Ok(None),
            Some(raw) => Ok(Some(serde_json::from_value(raw.clone()).context("stored machine descriptor is malformed")?)),
        }
    }

    async fn add_machine(&self, uid: &str, descriptor: MachineDescriptor) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut data = self.load().await?;
        data.insert(uid.to_string(), serde_json::to_value(descriptor)?);
        self.persist(&data)
    }

    async fn delete_machine(&self, uid: &str) -> Result<Option<MachineDescriptor>> {
        let _guard = self.write_lock.lock().await;
        let mut data = self.load().await?;
        let removed = match data.remove(uid) {
            None => None,
            Some(raw) => Some(serde_json::from_value(raw).context("stored machine descriptor is malformed")?),
        };
        if removed.is_some() {
            self.persist(&data)?;
        }
        Ok(removed)
    }

    async fn list_machines(&self) -> Result<Vec<(String, MachineDescriptor)>> {
        let data = self.load().await?;
        data.into_iter()
            .map(|(uid, raw)| {
                let descriptor = serde_json::from_value(raw).context("stored machine descriptor is malformed")?;
                Ok((uid, descriptor))
            })
            .collect()
    }
}
