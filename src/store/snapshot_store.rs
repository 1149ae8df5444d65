//! Append-only timelines per session plus their asset maps.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::model::{AssetMap, AssetRecord, SessionId, Snapshot, TimelineBundle};

use super::session::{assets_key, insert_first, snapshots_key, Session};
use super::{read_json, write_json, KvStore, StoreError};

pub const DEFAULT_CHECKPOINT_EVERY: usize = 10;

/// What the store holds for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: SessionId,
    pub snapshots: usize,
    pub assets: usize,
    /// Still recording; the persisted copy may lag behind.
    pub live: bool,
}

pub struct SnapshotStore {
    kv: Arc<dyn KvStore>,
    checkpoint_every: usize,
    live: HashMap<SessionId, Session>,
}

impl SnapshotStore {
    pub fn new(kv: Arc<dyn KvStore>, checkpoint_every: usize) -> Self {
        Self {
            kv,
            checkpoint_every: checkpoint_every.max(1),
            live: HashMap::new(),
        }
    }

    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    pub fn is_live(&self, id: &SessionId) -> bool {
        self.live.contains_key(id)
    }

    /// Begin a fresh in-memory session. Any previous state for `id` is
    /// cleared first.
    pub fn create(&mut self, id: SessionId) -> Result<(), StoreError> {
        self.clear(&id)?;
        self.live.insert(id.clone(), Session::create(id));
        Ok(())
    }

    /// Drop memory and persisted keys of a session.
    pub fn clear(&mut self, id: &SessionId) -> Result<(), StoreError> {
        self.live.remove(id);
        Session::destroy(self.kv.as_ref(), id)
    }

    /// Append a snapshot, checkpointing every `checkpoint_every` appends.
    /// A flushed session is reloaded from persistence first; a cleared or
    /// unknown one is [`StoreError::UnknownSession`].
    pub fn append(&mut self, id: &SessionId, snapshot: Snapshot) -> Result<usize, StoreError> {
        let every = self.checkpoint_every;
        let kv = Arc::clone(&self.kv);
        let session = self.live_session(id)?;
        let len = session.append(snapshot);
        if len % every == 0 {
            session.checkpoint(kv.as_ref())?;
        }
        Ok(len)
    }

    /// Record a resolved asset. Returns whether it was stored.
    pub fn put_asset(&mut self, id: &SessionId, record: AssetRecord) -> Result<bool, StoreError> {
        if let Some(session) = self.live.get_mut(id) {
            return Ok(session.insert_asset(record));
        }

        if !Session::is_persisted(self.kv.as_ref(), id)? {
            tracing::debug!(session = %id, asset = %record.id, "discarding asset for unknown session");
            return Ok(false);
        }

        // Late result for a flushed session: merge into what was persisted.
        let key = assets_key(id);
        let mut assets: AssetMap = read_json(self.kv.as_ref(), &key)?.unwrap_or_default();
        if !insert_first(&mut assets, record) {
            return Ok(false);
        }
        write_json(self.kv.as_ref(), &key, &assets)?;
        Ok(true)
    }

    pub fn checkpoint(&self, id: &SessionId) -> Result<(), StoreError> {
        match self.live.get(id) {
            Some(session) => session.checkpoint(self.kv.as_ref()),
            None => Err(StoreError::UnknownSession(id.to_string())),
        }
    }

    /// Persist and release a live session. Returns the persisted length.
    pub fn flush_final(&mut self, id: &SessionId) -> Result<usize, StoreError> {
        match self.live.remove(id) {
            Some(session) => session.flush(self.kv.as_ref()),
            None => {
                tracing::debug!(session = %id, "flush requested for a session that is not live");
                let snapshots: Vec<Snapshot> =
                    read_json(self.kv.as_ref(), &snapshots_key(id))?.unwrap_or_default();
                Ok(snapshots.len())
            }
        }
    }

    /// Remove one snapshot and persist the result.
    pub fn delete(&mut self, id: &SessionId, index: usize) -> Result<Snapshot, StoreError> {
        if let Some(session) = self.live.get_mut(id) {
            let removed = session.remove(index)?;
            session.checkpoint(self.kv.as_ref())?;
            return Ok(removed);
        }

        if !Session::is_persisted(self.kv.as_ref(), id)? {
            return Err(StoreError::UnknownSession(id.to_string()));
        }
        let mut session = Session::restore(self.kv.as_ref(), id.clone())?;
        let removed = session.remove(index)?;
        session.flush(self.kv.as_ref())?;
        Ok(removed)
    }

    /// Store a bundle under a fresh identity. Never merges into an existing
    /// session; a failed asset write rolls the snapshot write back.
    pub fn import_bundle(&mut self, bundle: TimelineBundle) -> Result<SessionId, StoreError> {
        let id = SessionId::imported();
        let snapshots = snapshots_key(&id);
        write_json(self.kv.as_ref(), &snapshots, &bundle.snapshots)?;
        if let Err(err) = write_json(self.kv.as_ref(), &assets_key(&id), &bundle.assets) {
            if let Err(rollback) = self.kv.remove(&[&snapshots]) {
                tracing::error!(session = %id, error = %rollback, "failed to roll back partial import");
            }
            return Err(err);
        }
        tracing::info!(
            session = %id,
            snapshots = bundle.snapshots.len(),
            assets = bundle.assets.len(),
            "imported timeline"
        );
        Ok(id)
    }

    /// Timeline and asset map of a session, live or persisted.
    pub fn load(&self, id: &SessionId) -> Result<TimelineBundle, StoreError> {
        if let Some(session) = self.live.get(id) {
            return Ok(session.to_bundle());
        }
        if !Session::is_persisted(self.kv.as_ref(), id)? {
            return Err(StoreError::UnknownSession(id.to_string()));
        }
        Ok(Session::restore(self.kv.as_ref(), id.clone())?.into_bundle())
    }

    /// Every known session, sorted by id.
    pub fn sessions(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let mut summaries = BTreeMap::new();

        for key in self.kv.keys_with_prefix("snapshots_")? {
            let Some(raw) = key.strip_prefix("snapshots_") else {
                continue;
            };
            let id = SessionId::from(raw);
            if self.live.contains_key(&id) {
                continue;
            }
            let session = Session::restore(self.kv.as_ref(), id.clone())?;
            summaries.insert(
                id.clone(),
                SessionSummary {
                    id,
                    snapshots: session.len(),
                    assets: session.assets().len(),
                    live: false,
                },
            );
        }

        for (id, session) in &self.live {
            summaries.insert(
                id.clone(),
                SessionSummary {
                    id: id.clone(),
                    snapshots: session.len(),
                    assets: session.assets().len(),
                    live: true,
                },
            );
        }

        Ok(summaries.into_values().collect())
    }

    fn live_session(&mut self, id: &SessionId) -> Result<&mut Session, StoreError> {
        if !self.live.contains_key(id) {
            if !Session::is_persisted(self.kv.as_ref(), id)? {
                tracing::debug!(session = %id, "discarding snapshot for unknown session");
                return Err(StoreError::UnknownSession(id.to_string()));
            }
            let session = Session::restore(self.kv.as_ref(), id.clone())?;
            tracing::debug!(session = %id, restored = session.len(), "reopened session for append");
            self.live.insert(id.clone(), session);
        }
        self.live
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownSession(id.to_string()))
    }
}
