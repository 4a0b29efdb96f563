//! Durable state store: key layout and typed access helpers.
//!
//! The store is a flat key→JSON map with exactly one writer role (the
//! engine); page agents and the CLI only read. The full key set is
//! enumerated here so "clear run state" is a single well-defined
//! operation instead of scattered removals.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use anyhow::Result;
use cirun_common::StateStore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

/// Version stamped into the store at run start. A mismatch on load is
/// treated as "no run": older layouts are purged, never migrated in
/// place.
pub const STATE_VERSION: u32 = 1;

/// The fixed key layout. Every persisted value lives under one of these.
pub mod keys {
    /// Lifecycle flag; present and `true` only between start and stop.
    pub const IS_RUNNING: &str = "is_running";
    /// Opaque run identity; stamped on all derived state.
    pub const RUN_ID: &str = "run_id";
    /// Layout version tag, written at run start.
    pub const STATE_VERSION: &str = "state_version";
    /// [`cirun_common::RunBase`] for a multi-item run.
    pub const BASE: &str = "base";
    /// [`cirun_common::Queue`].
    pub const QUEUE: &str = "queue";
    /// [`cirun_common::ItemData`] the page agents consume.
    pub const CURRENT_ITEM: &str = "current_item";
    /// [`cirun_common::RunPhase`] when two-pass mode is active.
    pub const PHASE: &str = "phase";
    /// [`cirun_common::RetryState`].
    pub const RETRY: &str = "retry";
    /// [`cirun_common::ClosingState`] while the closure detour runs.
    pub const CLOSING: &str = "closing";
    /// [`cirun_common::PendingAdvance`] while a delayed advance is armed.
    pub const PENDING_ADVANCE: &str = "pending_advance";
    /// [`cirun_common::Origin`] of the initiating context.
    pub const ORIGIN: &str = "origin";

    /// Keys derived from a single run. Purged before a new run starts and
    /// when any run ends, so leftovers can never bleed into the next run.
    pub const RUN_SCOPED: &[&str] = &[
        STATE_VERSION,
        BASE,
        QUEUE,
        CURRENT_ITEM,
        PHASE,
        RETRY,
        CLOSING,
        PENDING_ADVANCE,
        ORIGIN,
    ];

    /// Every key the engine ever writes.
    pub const ALL: &[&str] = &[
        IS_RUNNING,
        RUN_ID,
        STATE_VERSION,
        BASE,
        QUEUE,
        CURRENT_ITEM,
        PHASE,
        RETRY,
        CLOSING,
        PENDING_ADVANCE,
        ORIGIN,
    ];
}

/// Read and deserialize one key. A value that no longer deserializes
/// (older layout, partial write) is reported as absent rather than
/// failing the handler that asked.
pub async fn get_typed<T: DeserializeOwned>(store: &dyn StateStore, key: &str) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(value) => match serde_json::from_value(value) {
            Ok(typed) => Ok(Some(typed)),
            Err(err) => {
                warn!(key, %err, "discarding undeserializable stored value");
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

/// Serialize and write one key.
pub async fn put_typed<T: Serialize>(store: &dyn StateStore, key: &str, value: &T) -> Result<()> {
    store.put(key, serde_json::to_value(value)?).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use cirun_common::Queue;

    #[tokio::test]
    async fn typed_roundtrip() {
        let store = MemoryStore::default();
        let q = Queue {
            items: vec!["CI-1".into()],
            index: 0,
            run_id: "r1".into(),
        };
        put_typed(&store, keys::QUEUE, &q).await.unwrap();
        let back: Option<Queue> = get_typed(&store, keys::QUEUE).await.unwrap();
        assert_eq!(back, Some(q));
    }

    #[tokio::test]
    async fn undeserializable_value_reads_as_absent() {
        let store = MemoryStore::default();
        store
            .put(keys::QUEUE, serde_json::json!("not a queue"))
            .await
            .unwrap();
        let back: Option<Queue> = get_typed(&store, keys::QUEUE).await.unwrap();
        assert_eq!(back, None);
    }

    #[test]
    fn run_scoped_keys_are_a_subset_of_all() {
        for key in keys::RUN_SCOPED {
            assert!(keys::ALL.contains(key), "{key} missing from ALL");
        }
    }
}
