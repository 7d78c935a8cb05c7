use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::debounce::Debounce;
use crate::error::Error;
use crate::record::{ClientId, ClientRecord, Fields};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Uninitialized,
    Loading,
    Clean,
    Dirty,
    Saving,
    /// Edits are only in the local fallback; the last remote write failed.
    DirtyWithError,
}

impl SyncState {
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Clean | Self::Dirty | Self::DirtyWithError)
    }

    pub fn is_dirty(self) -> bool {
        matches!(self, Self::Dirty | Self::DirtyWithError)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Loading => "loading",
            Self::Clean => "ready (synced)",
            Self::Dirty => "ready (unsynced changes)",
            Self::Saving => "saving",
            Self::DirtyWithError => "ready (last save failed)",
        })
    }
}

/// Edit state for the active client. Owned by one reconciler.
#[derive(Debug, Clone)]
pub struct Session {
    pub(crate) client_id: ClientId,
    pub(crate) fields: Fields,
    pub(crate) revision: Option<String>,
    pub(crate) state: SyncState,
    pub(crate) last_error: Option<Error>,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) debounce: Debounce,
}

impl Session {
    pub(crate) fn new(client_id: ClientId, debounce_window: Duration) -> Self {
        Self {
            client_id,
            fields: Fields::new(),
            revision: None,
            state: SyncState::Uninitialized,
            last_error: None,
            updated_at: Utc::now(),
            debounce: Debounce::new(debounce_window),
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn field(&self, key: &str) -> &str {
        self.fields.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    pub fn has_pending_sync(&self) -> bool {
        self.debounce.is_armed()
    }

    pub fn record(&self) -> ClientRecord {
        ClientRecord {
            client_id: self.client_id.clone(),
            fields: self.fields.clone(),
            revision: self.revision.clone(),
            updated_at: self.updated_at,
        }
    }
}
