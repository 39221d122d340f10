use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{DocumentStore, deep_merge, split_document_path, validate_collection_path};
use crate::errors::KalmaResult;

/// Process-local store. Used by tests and by `store.backend = "memory"`.
#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.docs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &str) -> KalmaResult<Option<Value>> {
        split_document_path(path)?;
        let docs = self
            .docs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(docs.get(path).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> KalmaResult<()> {
        split_document_path(path)?;
        let mut docs = self
            .docs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        docs.insert(path.to_string(), value);
        Ok(())
    }

    async fn update(&self, path: &str, patch: Value) -> KalmaResult<()> {
        split_document_path(path)?;
        let mut docs = self
            .docs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = docs
            .entry(path.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        deep_merge(entry, patch);
        Ok(())
    }

    async fn list(&self, collection: &str) -> KalmaResult<Vec<(String, Value)>> {
        validate_collection_path(collection)?;
        let prefix = format!("{collection}/");
        let docs = self
            .docs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(docs
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, v)| {
                let rest = &k[prefix.len()..];
                (!rest.contains('/')).then(|| (rest.to_string(), v.clone()))
            })
            .collect())
    }
}
