//! Key-value persistence for per-session state.
//!
//! The shell only ever reads a key once (at session creation) and writes
//! whole values back, so the interface is a plain get/put over JSON.

use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;

pub trait Store {
    fn get(&self, key: &str) -> Option<Value>;
    fn put(&self, key: &str, value: Value);
}

pub fn history_key(session: &str) -> String {
    format!("history@{}", session)
}

pub fn vars_key(session: &str) -> String {
    format!("vars@{}", session)
}

/// In-memory store, used by tests and embedders without durable storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RefCell<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.borrow().get(key).cloned()
    }

    fn put(&self, key: &str, value: Value) {
        self.entries.borrow_mut().insert(key.to_string(), value);
    }
}

/// Store backed by a single JSON object on disk.
///
/// The whole document is rewritten on every `put`.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: RefCell<serde_json::Map<String, Value>>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(map)) => map,
                Ok(_) | Err(_) => {
                    tracing::warn!(path = %path.display(), "ignoring malformed store file");
                    serde_json::Map::new()
                }
            },
            Err(_) => serde_json::Map::new(),
        };
        Self {
            path,
            entries: RefCell::new(entries),
        }
    }
}

impl Store for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.borrow().get(key).cloned()
    }

    fn put(&self, key: &str, value: Value) {
        self.entries.borrow_mut().insert(key.to_string(), value);
        let doc = Value::Object(self.entries.borrow().clone());
        let text = match serde_json::to_string_pretty(&doc) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize store");
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, text) {
            tracing::error!(path = %self.path.display(), error = %e, "failed to write store");
        }
    }
}
