//! Debounced, partial-update writer for one session's durable record.
//!
//! [`SessionPersistence`] never performs I/O itself; it decides *what* to
//! write and *when*, and hands out [`PendingWrite`] jobs that the coach
//! runtime executes on a spawned task:
//!
//! ```text
//! save(update) ──▶ merge into pending ──▶ no write in flight? ──▶ PendingWrite{gen}
//!                                        write in flight?    ──▶ wait
//!
//! complete(gen, Ok)  ──▶ pending non-empty? ──▶ next PendingWrite
//! complete(gen, Err) ──▶ failed update merged *under* pending, kept for the
//!                        next save() (retry on the next transition)
//! ```
//!
//! At most one write is in flight, so stores never see two writes for the
//! same session race each other.

use std::sync::Arc;

use crate::session::record::{SessionRecord, SessionToken, SessionUpdate};
use crate::session::store::{SessionStore, StoreError};

/// A write the runtime must perform, tagged with its generation.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub generation: u64,
    pub update: SessionUpdate,
}

pub struct SessionPersistence {
    store: Arc<dyn SessionStore>,
    module_id: String,
    token: SessionToken,
    pending: SessionUpdate,
    in_flight: Option<PendingWrite>,
    generation: u64,
}

impl SessionPersistence {
    pub fn new(store: Arc<dyn SessionStore>, module_id: &str, token: SessionToken) -> Self {
        Self {
            store,
            module_id: module_id.to_string(),
            token,
            pending: SessionUpdate::default(),
            in_flight: None,
            generation: 0,
        }
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn store(&self) -> Arc<dyn SessionStore> {
        Arc::clone(&self.store)
    }

    /// Read the durable record for this session, if one exists.
    pub async fn load(&self) -> Result<Option<SessionRecord>, StoreError> {
        self.store.get(&self.module_id, &self.token).await
    }

    /// Queue `update`.  Returns a write to start now, or `None` when a
    /// write is already in flight (the update rides on the next one).
    pub fn save(&mut self, update: SessionUpdate) -> Option<PendingWrite> {
        self.pending.merge(update);
        self.next_write()
    }

    /// Record the outcome of write `generation`.
    pub fn complete(
        &mut self,
        generation: u64,
        result: Result<(), StoreError>,
    ) -> Option<PendingWrite> {
        let finished = match self.in_flight.take() {
            Some(write) if write.generation == generation => write,
            other => {
                self.in_flight = other;
                log::debug!("session: ignoring stale write completion #{generation}");
                return None;
            }
        };

        match result {
            Ok(()) => {
                log::debug!("session: write #{generation} stored");
                self.next_write()
            }
            Err(e) => {
                log::warn!("session: write #{generation} failed ({e}); will retry on next change");
                let newer = std::mem::take(&mut self.pending);
                self.pending = finished.update;
                self.pending.merge(newer);
                None
            }
        }
    }

    /// `true` while a write is in flight or updates are queued.
    pub fn is_dirty(&self) -> bool {
        self.in_flight.is_some() || !self.pending.is_empty()
    }

    /// Everything not yet known to be stored, merged oldest-first.  Used on
    /// teardown to write synchronously after in-flight work is abandoned.
    pub fn take_unflushed(&mut self) -> SessionUpdate {
        let mut all = self
            .in_flight
            .take()
            .map(|w| w.update)
            .unwrap_or_default();
        all.merge(std::mem::take(&mut self.pending));
        all
    }

    /// Write `update` directly, bypassing the queue.
    pub async fn write_now(&self, update: &SessionUpdate) -> Result<(), StoreError> {
        self.store.put(&self.module_id, &self.token, update).await
    }

    fn next_write(&mut self) -> Option<PendingWrite> {
        if self.in_flight.is_some() || self.pending.is_empty() {
            return None;
        }
        self.generation += 1;
        let write = PendingWrite {
            generation: self.generation,
            update: std::mem::take(&mut self.pending),
        };
        self.in_flight = Some(write.clone());
        Some(write)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
