//! Run-wide cache of setup resources ("just one time" fixtures).
//!
//! Once-only keys are created through a per-key [`OnceCell`], so
//! concurrent scenarios asking for the same key share one creation.
//! A once-only key whose creation failed or was abandoned is poisoned
//! for the rest of the run and is never created again.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// A materialized fixture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceHandle {
    pub id: String,
    /// Body of the creation response.
    pub attributes: Value,
}

#[derive(Default)]
struct OnceEntry {
    started: AtomicBool,
    cell: OnceCell<Result<ResourceHandle, String>>,
}

enum Slot {
    Once(Arc<OnceEntry>),
    Fresh(ResourceHandle),
}

#[derive(Default)]
pub struct FixtureCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl std::fmt::Debug for FixtureCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self
            .slots
            .lock()
            .map(|slots| slots.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("FixtureCache").field("keys", &keys).finish()
    }
}

impl FixtureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Return the fixture for `key`, creating it with `create` when
    /// needed.
    ///
    /// With `once_only`, `create` runs at most once per key for the
    /// lifetime of the cache; concurrent callers wait for that single
    /// creation. A key already holding a fixture is returned unchanged.
    /// Without it, `create` runs on every call and its result replaces
    /// any earlier non-once entry.
    pub async fn get_or_create<F, Fut>(
        &self,
        key: &str,
        once_only: bool,
        create: F,
    ) -> EngineResult<ResourceHandle>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<ResourceHandle>>,
    {
        if !once_only {
            let handle = create().await?;
            let mut slots = self.lock_slots();
            match slots.get(key) {
                Some(Slot::Once(_)) => {
                    debug!(key, "once-only entry kept, fresh fixture not stored");
                }
                _ => {
                    slots.insert(key.to_string(), Slot::Fresh(handle.clone()));
                }
            }
            return Ok(handle);
        }

        let entry = {
            let mut slots = self.lock_slots();
            match slots.get(key) {
                Some(Slot::Once(entry)) => Arc::clone(entry),
                Some(Slot::Fresh(handle)) => {
                    debug!(key, "existing fixture reused for once-only request");
                    return Ok(handle.clone());
                }
                None => {
                    let entry = Arc::new(OnceEntry::default());
                    slots.insert(key.to_string(), Slot::Once(Arc::clone(&entry)));
                    entry
                }
            }
        };

        if let Some(result) = entry.cell.get() {
            debug!(key, "fixture cache hit");
            return Self::settle(key, result);
        }

        let result = entry
            .cell
            .get_or_init(|| async {
                if entry.started.swap(true, Ordering::SeqCst) {
                    warn!(key, "fixture creation was abandoned earlier");
                    return Err("an earlier creation attempt was abandoned".to_string());
                }
                info!(key, "creating once-only fixture");
                create().await.map_err(|e| e.to_string())
            })
            .await;

        Self::settle(key, result)
    }

    pub fn get(&self, key: &str) -> EngineResult<ResourceHandle> {
        let slots = self.lock_slots();
        match slots.get(key) {
            Some(Slot::Fresh(handle)) => Ok(handle.clone()),
            Some(Slot::Once(entry)) => match entry.cell.get() {
                Some(Ok(handle)) => Ok(handle.clone()),
                Some(Err(reason)) => Err(EngineError::FixtureCreation {
                    key: key.to_string(),
                    reason: reason.clone(),
                }),
                None => Err(EngineError::NotFound(key.to_string())),
            },
            None => Err(EngineError::NotFound(key.to_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.lock_slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn settle(
        key: &str,
        result: &Result<ResourceHandle, String>,
    ) -> EngineResult<ResourceHandle> {
        result.clone().map_err(|reason| EngineError::FixtureCreation {
            key: key.to_string(),
            reason,
        })
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        // The map is only touched in short, non-panicking sections.
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}
