use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

use crate::defs::PrefService;

/// Process-local preference store. Nothing is persisted; a fresh instance
/// behaves like a brand new profile.
#[derive(Default)]
pub struct InMemoryPrefService {
    values: Mutex<HashMap<String, Value>>,
}

impl InMemoryPrefService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(defaults: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            values: Mutex::new(defaults.into_iter().collect()),
        }
    }
}

impl PrefService for InMemoryPrefService {
    fn get(&self, key: &str) -> Option<Value> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_owned(), value);
    }

    fn clear(&self, key: &str) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.remove(key);
    }
}
