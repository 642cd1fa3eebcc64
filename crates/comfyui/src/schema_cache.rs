//! Process-wide cache of the engine's node catalog.
//!
//! The current [`SchemaSnapshot`] sits behind an [`ArcSwap`]. Readers
//! take a full snapshot with a single atomic load; [`SchemaCache::refresh`]
//! builds a complete replacement off to the side and swaps the pointer,
//! so a validation never observes a half-refreshed catalog.

use std::sync::Arc;

use arc_swap::ArcSwap;
use comfyflow_core::schema::{NodeFilter, SchemaEntry, SchemaLookup, SchemaSnapshot};
use tokio::sync::Mutex;

use crate::api::EngineApi;
use crate::compat;
use crate::error::{ComfyError, ComfyResult};
use crate::events::{emit, detached_sender, EventSender, ExecutionEvent};

/// Versioned node catalog shared by concurrent runs.
pub struct SchemaCache {
    current: ArcSwap<SchemaSnapshot>,
    /// Serializes refreshes so versions stay strictly increasing.
    refresh_lock: Mutex<()>,
    events: EventSender,
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new(detached_sender())
    }
}

impl SchemaCache {
    /// An empty (never fetched) cache publishing refreshes on `events`.
    pub fn new(events: EventSender) -> Self {
        Self {
            current: ArcSwap::from_pointee(SchemaSnapshot::empty()),
            refresh_lock: Mutex::new(()),
            events,
        }
    }

    /// The snapshot validations should run against.
    pub fn snapshot(&self) -> Arc<SchemaSnapshot> {
        self.current.load_full()
    }

    pub fn version(&self) -> u64 {
        self.current.load().version()
    }

    pub fn is_populated(&self) -> bool {
        self.current.load().is_populated()
    }

    pub fn get(&self, class_type: &str) -> SchemaLookup {
        self.current.load().lookup(class_type)
    }

    /// Fetch `/object_info` and swap in a new snapshot.
    pub async fn refresh<A: EngineApi>(&self, api: &A) -> ComfyResult<Arc<SchemaSnapshot>> {
        let _guard = self.refresh_lock.lock().await;

        let raw = api.get_object_info().await?;
        if !raw.is_object() {
            return Err(ComfyError::Decode(
                "object_info response is not a JSON object".into(),
            ));
        }
        let entries = compat::normalize_object_info(&raw);
        let version = self.current.load().version() + 1;
        let snapshot = Arc::new(SchemaSnapshot::new(version, entries));
        self.current.store(Arc::clone(&snapshot));

        tracing::info!(
            version,
            node_count = snapshot.len(),
            "Node schema refreshed",
        );
        emit(
            &self.events,
            ExecutionEvent::SchemaRefreshed {
                version,
                node_count: snapshot.len(),
            },
        );
        Ok(snapshot)
    }

    /// Refresh only if the catalog has never been fetched.
    pub async fn ensure_loaded<A: EngineApi>(&self, api: &A) -> ComfyResult<Arc<SchemaSnapshot>> {
        let current = self.snapshot();
        if current.is_populated() {
            return Ok(current);
        }
        self.refresh(api).await
    }

    /// Case-insensitive search over the current snapshot.
    pub fn search(&self, query: &str) -> Vec<SchemaEntry> {
        self.current
            .load()
            .search(query)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn list(&self, filter: &NodeFilter) -> Vec<SchemaEntry> {
        self.current
            .load()
            .list(filter)
            .into_iter()
            .cloned()
            .collect()
    }
}
