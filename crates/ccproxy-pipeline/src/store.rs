//! Process-wide request metadata store.
//!
//! Bridges metadata written during pre-call hooks to callbacks the host
//! framework invokes without our custom fields. Keyed by
//! `litellm_call_id`; entries expire after 60 seconds, evicted
//! opportunistically on every write.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};

const ENTRY_TTL: Duration = Duration::from_secs(60);

#[derive(Default)]
pub struct RequestMetadataStore {
    entries: Mutex<HashMap<String, (Map<String, Value>, Instant)>>,
}

impl RequestMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, call_id: &str, metadata: Map<String, Value>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        entries.retain(|_, (_, at)| now.duration_since(*at) <= ENTRY_TTL);
        entries.insert(call_id.to_string(), (metadata, now));
    }

    /// Last stored value, or empty when unknown or expired-and-evicted.
    pub fn get(&self, call_id: &str) -> Map<String, Value> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(call_id)
            .map(|(metadata, _)| metadata.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
