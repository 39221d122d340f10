mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::errors::{KalmaError, KalmaResult};

/// Trait for document storage backends.
///
/// Documents are JSON objects addressed by `/`-separated paths where
/// collection and document segments alternate (`users/{id}/connections/gmail`).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document, `None` if it does not exist.
    async fn get(&self, path: &str) -> KalmaResult<Option<Value>>;

    /// Replace a document wholesale.
    async fn set(&self, path: &str, value: Value) -> KalmaResult<()>;

    /// Deep-merge `patch` into a document, creating it when absent.
    async fn update(&self, path: &str, patch: Value) -> KalmaResult<()>;

    /// Documents directly under a collection, ordered by id.
    async fn list(&self, collection: &str) -> KalmaResult<Vec<(String, Value)>>;
}

/// Open the backend named in config.
pub fn open_store(config: &StoreConfig) -> KalmaResult<Arc<dyn DocumentStore>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "sqlite" => {
            let path = crate::utils::expand_home(&config.path);
            Ok(Arc::new(SqliteStore::open(Path::new(&path))?))
        }
        other => Err(KalmaError::Config(format!(
            "store.backend must be \"sqlite\" or \"memory\", got \"{other}\""
        ))),
    }
}

/// Split a document path into (parent collection, document id).
pub(crate) fn split_document_path(path: &str) -> KalmaResult<(&str, &str)> {
    let segments = validate_segments(path)?;
    if segments % 2 != 0 {
        return Err(KalmaError::Persistence(format!(
            "not a document path: {path}"
        )));
    }
    // validate_segments guarantees at least one '/'
    let (parent, id) = path
        .rsplit_once('/')
        .ok_or_else(|| KalmaError::Persistence(format!("not a document path: {path}")))?;
    Ok((parent, id))
}

pub(crate) fn validate_collection_path(path: &str) -> KalmaResult<()> {
    if validate_segments(path)? % 2 == 0 {
        return Err(KalmaError::Persistence(format!(
            "not a collection path: {path}"
        )));
    }
    Ok(())
}

fn validate_segments(path: &str) -> KalmaResult<usize> {
    let mut count = 0;
    for segment in path.split('/') {
        if segment.is_empty() {
            return Err(KalmaError::Persistence(format!(
                "empty segment in path: {path:?}"
            )));
        }
        count += 1;
    }
    Ok(count)
}

/// Merge `patch` into `target`. Objects merge key by key, everything else replaces.
pub(crate) fn deep_merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match target_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target_map.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}
