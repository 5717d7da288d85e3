use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tsync_core::{HubError, ValueHub};

/// Key-value hub fake with a lookup counter, so tests can assert which
/// credential strategies were actually consulted.
#[derive(Default)]
pub struct InMemoryHub {
    values: Mutex<HashMap<(String, String), String>>,
    lookups: AtomicUsize,
}

impl InMemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: &str, key: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert((user.to_string(), key.to_string()), value.to_string());
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ValueHub for InMemoryHub {
    async fn fetch_value(&self, user: &str, key: &str) -> Result<String, HubError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.values
            .lock()
            .unwrap()
            .get(&(user.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| HubError::Missing {
                user: user.to_string(),
                key: key.to_string(),
            })
    }
}
