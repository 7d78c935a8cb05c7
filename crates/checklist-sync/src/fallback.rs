use std::sync::Arc;

use crate::kv::KvStore;
use crate::record::{ClientId, Fields};

/// Local backup of each client's fields. Failures are logged and swallowed.
#[derive(Clone)]
pub struct LocalFallbackStore {
    kv: Arc<dyn KvStore>,
}

impl LocalFallbackStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn key(client_id: &ClientId) -> String {
        format!("avances_{client_id}")
    }

    pub fn read(&self, client_id: &ClientId) -> Fields {
        let raw = match self.kv.get(&Self::key(client_id)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Fields::new(),
            Err(e) => {
                tracing::warn!(client = %client_id, error = %e, "local fallback read failed");
                return Fields::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(client = %client_id, error = %e, "local fallback entry is not valid JSON");
            Fields::new()
        })
    }

    pub fn write(&self, client_id: &ClientId, fields: &Fields) {
        let body = match serde_json::to_string(fields) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(client = %client_id, error = %e, "failed to encode local fallback");
                return;
            }
        };
        if let Err(e) = self.kv.set(&Self::key(client_id), &body) {
            tracing::warn!(client = %client_id, error = %e, "local fallback write failed");
        }
    }
}
