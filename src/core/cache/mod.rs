use crate::error::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Values computed at most once per key, e.g. imported models by model path.
///
/// The lock is held while a missing value is computed, so concurrent callers
/// asking for the same key wait for the first one instead of repeating it.
pub struct ModelCache<T> {
    entries: Mutex<HashMap<String, Arc<T>>>,
}

impl<T> ModelCache<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        self.entries.lock().get(key).cloned()
    }

    /// Returns the cached value for `key`, computing and caching it first if
    /// absent. A failed computation caches nothing.
    pub fn get_or_try_insert_with<F>(&self, key: &str, compute: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Result<T>,
    {
        let mut entries = self.entries.lock();
        if let Some(value) = entries.get(key) {
            return Ok(Arc::clone(value));
        }
        let value = Arc::new(compute()?);
        entries.insert(key.to_string(), Arc::clone(&value));
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl<T> Default for ModelCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
