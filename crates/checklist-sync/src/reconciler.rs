//! Keeps the active session, the local fallback and the remote store in step.
//!
//! Every mutation goes through an explicit operation: `start`, `on_field_edit`,
//! `on_page_change`, `on_explicit_save`, `poll`. Remote failures never leave the
//! session unusable; the local fallback always holds the latest committed edit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::backup::{self, Backup};
use crate::checklist::{self, ChecklistItem, DEFAULT_ITEMS_PER_PAGE, ITEMS, Pager, Validation};
use crate::debounce::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::fallback::LocalFallbackStore;
use crate::record::{ClientId, FieldKey, Fields};
use crate::remote::{Presence, RecordStore};
use crate::session::{Session, SyncState};
use crate::status::{StatusLevel, StatusSink, emit};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(2000);

fn ready(session: &mut Option<Session>) -> Result<&mut Session> {
    match session.as_mut() {
        Some(s) if s.state.is_ready() => Ok(s),
        Some(s) => Err(Error::msg(format!(
            "client {} is not ready for edits ({})",
            s.client_id, s.state
        ))),
        None => Err(Error::msg("no client session is active")),
    }
}

pub struct Reconciler {
    store: Arc<dyn RecordStore>,
    fallback: LocalFallbackStore,
    sink: Arc<dyn StatusSink>,
    clock: Arc<dyn Clock>,
    debounce_window: Duration,
    pager: Pager,
    page: usize,
    session: Option<Session>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        fallback: LocalFallbackStore,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            store,
            fallback,
            sink,
            clock: Arc::new(SystemClock),
            debounce_window: DEFAULT_DEBOUNCE,
            pager: Pager::new(DEFAULT_ITEMS_PER_PAGE, ITEMS.len()),
            page: 1,
            session: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    pub fn with_items_per_page(mut self, items_per_page: usize) -> Self {
        self.pager = Pager::new(items_per_page, ITEMS.len());
        self
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn total_pages(&self) -> usize {
        self.pager.total_pages()
    }

    pub fn visible_items(&self) -> &'static [ChecklistItem] {
        checklist::page_items(&self.pager, self.page)
    }

    /// Opens a session for `client_id`, loading its record from the remote
    /// store or the local fallback. Any previous session is closed first.
    pub fn start(&mut self, client_id: ClientId) -> &Session {
        self.close();
        self.page = 1;

        let sink = self.sink.as_ref();
        let mut session = Session::new(client_id.clone(), self.debounce_window);
        session.state = SyncState::Loading;
        emit(
            sink,
            StatusLevel::Info,
            format!("Checking remote record for client {client_id}..."),
        );

        match self.store.probe(&client_id) {
            Presence::Present => {
                emit(sink, StatusLevel::Info, "Loading existing record...");
                match self.store.load(&client_id) {
                    Ok(rec) => {
                        session.fields = rec.fields;
                        session.revision = Some(rec.revision);
                        emit(
                            sink,
                            StatusLevel::Success,
                            format!("Loaded record for client {client_id} from the remote store"),
                        );
                    }
                    Err(Error::Decode(msg)) => {
                        tracing::error!(client = %client_id, error = %msg, "remote record is corrupt");
                        emit(
                            sink,
                            StatusLevel::Error,
                            format!("Remote record for client {client_id} is unreadable: {msg}"),
                        );
                        session.last_error = Some(Error::Decode(msg));
                    }
                    Err(e) => {
                        tracing::warn!(client = %client_id, error = %e, "remote load failed, using local fallback");
                        session.fields = self.fallback.read(&client_id);
                        emit(
                            sink,
                            StatusLevel::Warning,
                            format!("Remote load failed: {e}. Working locally."),
                        );
                        session.last_error = Some(e);
                    }
                }
            }
            Presence::Absent => {
                emit(
                    sink,
                    StatusLevel::Success,
                    format!("New client {client_id}. You can start the checklist."),
                );
            }
            Presence::Unknown => {
                session.fields = self.fallback.read(&client_id);
                emit(
                    sink,
                    StatusLevel::Warning,
                    format!(
                        "Remote store unavailable; working locally for client {client_id} ({} saved answers)",
                        session.fields.len()
                    ),
                );
            }
        }

        session.state = SyncState::Clean;
        tracing::info!(
            client = %client_id,
            fields = session.fields.len(),
            has_revision = session.revision.is_some(),
            "session ready"
        );
        self.session.insert(session)
    }

    /// Same as `start`; named for the UI action of changing client.
    pub fn switch_client(&mut self, client_id: ClientId) -> &Session {
        self.start(client_id)
    }

    /// Drops the active session. A pending debounced sync is cancelled, not run.
    pub fn close(&mut self) -> Option<Session> {
        let mut session = self.session.take()?;
        if session.debounce.cancel() {
            tracing::info!(
                client = %session.client_id,
                "cancelled pending remote sync; edits remain in the local fallback"
            );
        }
        Some(session)
    }

    /// Commits one field value: memory and local fallback now, remote after the debounce window.
    pub fn on_field_edit(&mut self, key: FieldKey, value: impl Into<String>) -> Result<()> {
        let now = self.clock.now();
        let session = ready(&mut self.session)?;
        session.fields.insert(key.to_string(), value.into());
        session.updated_at = Utc::now();
        if session.state != SyncState::DirtyWithError {
            session.state = SyncState::Dirty;
        }
        session.debounce.arm(now);
        self.fallback.write(&session.client_id, &session.fields);
        Ok(())
    }

    /// Flushes the values currently shown, then moves to `target` (clamped).
    pub fn on_page_change(
        &mut self,
        visible: &[(FieldKey, String)],
        target: usize,
    ) -> Result<usize> {
        for (key, value) in visible {
            self.on_field_edit(*key, value.clone())?;
        }
        self.page = self.pager.clamp(target);
        Ok(self.page)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.session.as_ref().and_then(|s| s.debounce.deadline())
    }

    /// Runs the debounced sync if its deadline has passed.
    pub fn poll(&mut self) -> Option<Result<()>> {
        let now = self.clock.now();
        let due = self
            .session
            .as_mut()
            .is_some_and(|s| s.debounce.take_due(now));
        due.then(|| self.sync(false))
    }

    /// Saves now, replacing any pending debounced sync.
    pub fn on_explicit_save(&mut self) -> Result<()> {
        if let Some(s) = self.session.as_mut() {
            s.debounce.cancel();
        }
        self.sync(true)
    }

    fn sync(&mut self, explicit: bool) -> Result<()> {
        let sink = self.sink.as_ref();
        let store = self.store.as_ref();
        let session = match self.session.as_mut() {
            Some(s) => s,
            None => {
                emit(sink, StatusLevel::Error, "No client number is set");
                return Err(Error::msg("no client session is active"));
            }
        };

        // `&mut self` serializes syncs, so a session is never `Saving` here.
        if !session.state.is_ready() {
            return Err(Error::msg(format!(
                "client {} is not ready to save ({})",
                session.client_id, session.state
            )));
        }
        if !explicit && !session.state.is_dirty() {
            return Ok(());
        }

        session.state = SyncState::Saving;
        emit(sink, StatusLevel::Info, "Saving to the remote store...");

        let mut revision = Ok(session.revision.clone());
        if explicit && session.last_error.as_ref().is_some_and(Error::is_conflict) {
            // Retrying after a conflict overwrites whatever is remote now,
            // including a record whose content cannot be decoded.
            revision = store.current_revision(&session.client_id);
        }

        let lookup_failed = revision.is_err();
        let result = match revision {
            Ok(revision) => store.save(&session.client_id, &session.fields, revision.as_deref()),
            Err(e) => {
                tracing::warn!(client = %session.client_id, error = %e, "could not read the remote revision before retrying");
                Err(e)
            }
        };
        self.fallback.write(&session.client_id, &session.fields);
        match result {
            Ok(sha) => {
                tracing::info!(client = %session.client_id, revision = %sha, "remote save succeeded");
                session.revision = Some(sha);
                session.state = SyncState::Clean;
                session.last_error = None;
                emit(sink, StatusLevel::Success, "Saved to the remote store");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(client = %session.client_id, error = %e, "remote save failed");
                session.state = SyncState::DirtyWithError;
                // A failed revision lookup keeps the conflict so the next explicit save reads again.
                if !lookup_failed {
                    session.last_error = Some(e.clone());
                }
                if e.is_conflict() {
                    emit(
                        sink,
                        StatusLevel::Error,
                        format!("{e}. Save again to overwrite the remote copy."),
                    );
                } else {
                    emit(sink, StatusLevel::Error, format!("Remote save failed: {e}"));
                }
                emit(sink, StatusLevel::Warning, "Saved locally as a backup");
                Err(e)
            }
        }
    }

    pub fn export_backup(&self) -> Result<(ClientId, String)> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| Error::msg("no client session is active"))?;
        let blob = backup::encode(&session.client_id, &session.fields)?;
        emit(self.sink.as_ref(), StatusLevel::Success, "Backup exported");
        Ok((session.client_id.clone(), blob))
    }

    /// Replaces the session's fields with a backup, switching client when it differs.
    pub fn import_backup(&mut self, backup: Backup) -> Result<()> {
        let same_client = self
            .session
            .as_ref()
            .is_some_and(|s| s.client_id == backup.client_id);
        if !same_client {
            self.start(backup.client_id.clone());
        }
        let now = self.clock.now();
        let session = ready(&mut self.session)?;
        session.fields = backup.fields;
        session.updated_at = Utc::now();
        if session.state != SyncState::DirtyWithError {
            session.state = SyncState::Dirty;
        }
        session.debounce.arm(now);
        self.fallback.write(&session.client_id, &session.fields);
        let client_id = session.client_id.clone();
        emit(
            self.sink.as_ref(),
            StatusLevel::Success,
            format!("Backup loaded for client {client_id}"),
        );
        Ok(())
    }

    pub fn validate(&self) -> Option<Validation> {
        let session = self.session.as_ref()?;
        let v = checklist::validate(&session.fields);
        let level = if v.is_valid() {
            StatusLevel::Success
        } else {
            StatusLevel::Error
        };
        emit(self.sink.as_ref(), level, v.summary());
        Some(v)
    }

    /// Per-item completeness for navigation.
    pub fn progress(&self) -> Vec<(&'static ChecklistItem, bool)> {
        let empty = Fields::new();
        let fields = self.session.as_ref().map(|s| &s.fields).unwrap_or(&empty);
        ITEMS
            .iter()
            .map(|item| (item, checklist::is_complete(fields, item.id)))
            .collect()
    }
}
