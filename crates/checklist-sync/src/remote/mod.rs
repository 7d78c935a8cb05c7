//! Remote record storage: one JSON document per client, guarded by a revision token.

mod github;
mod memory;

pub use github::GitHubStore;
pub use memory::{MemoryStore, SaveCall};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{Error, Result};
use crate::record::{ClientId, Fields, RemotePayload};

/// Outcome of probing the remote store for a client's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Present,
    /// The store answered and confirmed there is no record.
    Absent,
    /// The store could not be asked (transport failure, auth, unexpected status).
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRecord {
    pub fields: Fields,
    pub revision: String,
}

pub trait RecordStore: Send + Sync {
    fn probe(&self, client_id: &ClientId) -> Presence;

    /// Any failure to ask counts as "does not exist".
    fn exists(&self, client_id: &ClientId) -> bool {
        self.probe(client_id) == Presence::Present
    }

    fn load(&self, client_id: &ClientId) -> Result<RemoteRecord>;

    /// Writes `fields`, sending `revision` so a concurrent modification is
    /// rejected with `Error::Conflict`. Returns the new revision.
    fn save(&self, client_id: &ClientId, fields: &Fields, revision: Option<&str>) -> Result<String>;

    /// Revision of the stored record without decoding its content, so an
    /// unreadable record can still be overwritten. `None` when there is no record.
    fn current_revision(&self, client_id: &ClientId) -> Result<Option<String>> {
        match self.load(client_id) {
            Ok(rec) => Ok(Some(rec.revision)),
            Err(Error::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn check_connectivity(&self) -> bool;
}

pub(crate) fn encode_content(payload: &RemotePayload) -> Result<String> {
    let json = serde_json::to_string_pretty(payload)
        .map_err(|e| Error::msg(format!("failed to encode record payload: {e}")))?;
    Ok(STANDARD.encode(json.as_bytes()))
}

/// Decodes base64 record content. Line breaks inside the base64 text are ignored.
pub(crate) fn decode_content(content: &str) -> Result<RemotePayload> {
    let compact = content
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect::<String>();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| Error::Decode(format!("content is not base64: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::Decode(format!("content is not a record: {e}")))
}
