use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use sha2::{Digest, Sha256};

use super::{Presence, RecordStore, RemoteRecord, decode_content, encode_content};
use crate::error::{Error, Result};
use crate::record::{ClientId, Fields, RemotePayload};

#[derive(Debug, Clone)]
struct Entry {
    content: String,
    sha: String,
}

/// One `save` request as received by a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveCall {
    pub client_id: ClientId,
    pub fields: Fields,
    pub revision: Option<String>,
}

/// In-process record store with the same revision rules as the remote API.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<ClientId, Entry>>,
    saves: Mutex<Vec<SaveCall>>,
    injected: Mutex<VecDeque<Error>>,
    unreachable: AtomicBool,
    generation: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_sha(&self, content: &str) -> String {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let mut h = Sha256::new();
        h.update(generation.to_le_bytes());
        h.update(content.as_bytes());
        hex::encode(&h.finalize()[..20])
    }

    /// Simulates a write made by someone else, making any held revision stale.
    pub fn put_external(&self, client_id: &ClientId, fields: &Fields) -> String {
        let content = encode_content(&RemotePayload::new(client_id, fields)).unwrap_or_default();
        self.put_raw(client_id, content)
    }

    /// Stores arbitrary content, e.g. a corrupt payload.
    pub fn put_raw(&self, client_id: &ClientId, content: String) -> String {
        let sha = self.next_sha(&content);
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                client_id.clone(),
                Entry {
                    content,
                    sha: sha.clone(),
                },
            );
        }
        sha
    }

    pub fn revision(&self, client_id: &ClientId) -> Option<String> {
        self.entries
            .lock()
            .ok()
            .and_then(|e| e.get(client_id).map(|entry| entry.sha.clone()))
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::Relaxed);
    }

    /// The next `load` or `save` fails with `err` instead of running.
    pub fn fail_next(&self, err: Error) {
        if let Ok(mut q) = self.injected.lock() {
            q.push_back(err);
        }
    }

    pub fn saves(&self) -> Vec<SaveCall> {
        self.saves.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::Relaxed) {
            return Err(Error::remote(0, "connection refused"));
        }
        if let Some(err) = self.injected.lock().ok().and_then(|mut q| q.pop_front()) {
            return Err(err);
        }
        Ok(())
    }

    fn lock_entries(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<ClientId, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| Error::msg("memory store lock poisoned"))
    }
}

impl RecordStore for MemoryStore {
    fn probe(&self, client_id: &ClientId) -> Presence {
        if self.unreachable.load(Ordering::Relaxed) {
            return Presence::Unknown;
        }
        match self.entries.lock() {
            Ok(e) if e.contains_key(client_id) => Presence::Present,
            Ok(_) => Presence::Absent,
            Err(_) => Presence::Unknown,
        }
    }

    fn load(&self, client_id: &ClientId) -> Result<RemoteRecord> {
        self.check_reachable()?;
        let entry = self
            .lock_entries()?
            .get(client_id)
            .cloned()
            .ok_or(Error::NotFound)?;
        let payload = decode_content(&entry.content)?;
        Ok(RemoteRecord {
            fields: payload.avances,
            revision: entry.sha,
        })
    }

    fn save(&self, client_id: &ClientId, fields: &Fields, revision: Option<&str>) -> Result<String> {
        if let Ok(mut saves) = self.saves.lock() {
            saves.push(SaveCall {
                client_id: client_id.clone(),
                fields: fields.clone(),
                revision: revision.map(str::to_string),
            });
        }
        self.check_reachable()?;

        let mut entries = self.lock_entries()?;
        if let Some(current) = entries.get(client_id) {
            match revision {
                None => {
                    return Err(Error::Conflict {
                        message: "\"sha\" wasn't supplied.".into(),
                    });
                }
                Some(sha) if sha != current.sha => {
                    return Err(Error::Conflict {
                        message: format!("avances/{client_id}.json does not match {sha}"),
                    });
                }
                Some(_) => {}
            }
        }
        let content = encode_content(&RemotePayload::new(client_id, fields))?;
        let sha = self.next_sha(&content);
        entries.insert(
            client_id.clone(),
            Entry {
                content,
                sha: sha.clone(),
            },
        );
        Ok(sha)
    }

    fn current_revision(&self, client_id: &ClientId) -> Result<Option<String>> {
        self.check_reachable()?;
        Ok(self.lock_entries()?.get(client_id).map(|e| e.sha.clone()))
    }

    fn check_connectivity(&self) -> bool {
        !self.unreachable.load(Ordering::Relaxed)
    }
}
