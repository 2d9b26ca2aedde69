//! Process-wide dictionary cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::dictionary::model::{Dictionary, DictionaryError};
use crate::dictionary::source::DictionarySource;

/// Shared, reference-counted dictionary.
pub type DictionaryHandle = Arc<Dictionary>;

/// One live dictionary per namespace.
///
/// The cache only holds weak references: a dictionary is freed as soon as
/// the last handle (normally owned by a virtual server) is dropped, and the
/// next `ensure` for that namespace loads it again.
pub struct DictionaryCache {
    source: Box<dyn DictionarySource>,
    loaded: Mutex<HashMap<String, Weak<Dictionary>>>,
}

impl DictionaryCache {
    pub fn new(source: impl DictionarySource + 'static) -> Self {
        Self {
            source: Box::new(source),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Return the live dictionary for `namespace`, loading it if needed.
    pub fn ensure(&self, namespace: &str) -> Result<DictionaryHandle, DictionaryError> {
        if namespace.is_empty() {
            return Err(DictionaryError::EmptyNamespace);
        }

        let mut loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(dict) = loaded.get(namespace).and_then(Weak::upgrade) {
            return Ok(dict);
        }

        let dict = Arc::new(self.source.load(namespace)?);
        tracing::debug!(namespace = %namespace, "Loaded protocol dictionary");
        loaded.insert(namespace.to_string(), Arc::downgrade(&dict));
        Ok(dict)
    }

    /// Live dictionary for `namespace`, without loading.
    pub fn get(&self, namespace: &str) -> Option<DictionaryHandle> {
        let loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        loaded.get(namespace).and_then(Weak::upgrade)
    }

    /// Namespaces with at least one live handle, sorted.
    pub fn live_namespaces(&self) -> Vec<String> {
        let mut loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        loaded.retain(|_, dict| dict.strong_count() > 0);
        let mut names: Vec<String> = loaded.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for DictionaryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DictionaryCache")
            .field("live", &self.live_namespaces())
            .finish()
    }
}
