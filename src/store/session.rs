//! One session's in-memory timeline and its persisted form.

use crate::model::{AssetMap, AssetRecord, SessionId, Snapshot, TimelineBundle};

use super::{read_json, write_json, KvStore, StoreError};

pub fn snapshots_key(id: &SessionId) -> String {
    format!("snapshots_{id}")
}

pub fn assets_key(id: &SessionId) -> String {
    format!("assets_{id}")
}

/// Live state of a recording session.
///
/// Lifecycle: [`Session::create`] or [`Session::restore`], any number of
/// appends with periodic [`Session::checkpoint`]s, then [`Session::flush`]
/// to persist and release it. [`Session::destroy`] drops the persisted keys.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    snapshots: Vec<Snapshot>,
    assets: AssetMap,
}

impl Session {
    pub fn create(id: SessionId) -> Self {
        Self {
            id,
            snapshots: Vec::new(),
            assets: AssetMap::new(),
        }
    }

    /// Rebuild a session from its persisted keys. Missing keys load as empty.
    pub fn restore(kv: &dyn KvStore, id: SessionId) -> Result<Self, StoreError> {
        let snapshots = read_json(kv, &snapshots_key(&id))?.unwrap_or_default();
        let assets = read_json(kv, &assets_key(&id))?.unwrap_or_default();
        Ok(Self {
            id,
            snapshots,
            assets,
        })
    }

    /// Whether any key of this session exists in `kv`.
    pub fn is_persisted(kv: &dyn KvStore, id: &SessionId) -> Result<bool, StoreError> {
        Ok(kv.get(&snapshots_key(id))?.is_some() || kv.get(&assets_key(id))?.is_some())
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn assets(&self) -> &AssetMap {
        &self.assets
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Append a snapshot and return the new timeline length.
    pub fn append(&mut self, snapshot: Snapshot) -> usize {
        self.snapshots.push(snapshot);
        self.snapshots.len()
    }

    /// Store a resolved asset. The first write for an id wins; records
    /// without data are ignored.
    pub fn insert_asset(&mut self, record: AssetRecord) -> bool {
        insert_first(&mut self.assets, record)
    }

    /// Remove the snapshot at `index`, shifting later entries down.
    pub fn remove(&mut self, index: usize) -> Result<Snapshot, StoreError> {
        if index >= self.snapshots.len() {
            return Err(StoreError::IndexOutOfRange {
                session: self.id.to_string(),
                index,
                len: self.snapshots.len(),
            });
        }
        Ok(self.snapshots.remove(index))
    }

    /// Persist both keys. Two independent writes, not atomic as a pair.
    pub fn checkpoint(&self, kv: &dyn KvStore) -> Result<(), StoreError> {
        write_json(kv, &snapshots_key(&self.id), &self.snapshots)?;
        write_json(kv, &assets_key(&self.id), &self.assets)?;
        tracing::debug!(
            session = %self.id,
            snapshots = self.snapshots.len(),
            assets = self.assets.len(),
            "checkpointed session"
        );
        Ok(())
    }

    /// Final persist; consumes the in-memory state.
    pub fn flush(self, kv: &dyn KvStore) -> Result<usize, StoreError> {
        self.checkpoint(kv)?;
        Ok(self.snapshots.len())
    }

    pub fn destroy(kv: &dyn KvStore, id: &SessionId) -> Result<(), StoreError> {
        kv.remove(&[&snapshots_key(id), &assets_key(id)])
    }

    pub fn to_bundle(&self) -> TimelineBundle {
        TimelineBundle::new(self.snapshots.clone(), self.assets.clone())
    }

    pub fn into_bundle(self) -> TimelineBundle {
        TimelineBundle::new(self.snapshots, self.assets)
    }
}

pub(super) fn insert_first(assets: &mut AssetMap, record: AssetRecord) -> bool {
    let Some(data) = record.data else {
        return false;
    };
    if assets.contains_key(&record.id) {
        return false;
    }
    assets.insert(record.id, data);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AssetId;
    use crate::store::MemoryKvStore;

    fn snapshot(n: u64) -> Snapshot {
        Snapshot {
            time: n,
            html: format!("<html><body>{n}</body></html>"),
            base_url: "http://x/".to_string(),
        }
    }

    #[test]
    fn first_asset_write_wins_and_absent_is_ignored() {
        let mut session = Session::create(SessionId::from("s"));
        let id = AssetId::new("http://x/a.png");
        assert!(!session.insert_asset(AssetRecord::absent(id.clone())));
        assert!(session.insert_asset(AssetRecord::resolved(id.clone(), "data:one".into())));
        assert!(!session.insert_asset(AssetRecord::resolved(id.clone(), "data:two".into())));
        assert_eq!(session.assets()[&id], "data:one");
    }

    #[test]
    fn remove_shifts_later_entries_down() {
        let mut session = Session::create(SessionId::from("s"));
        for n in 0..3 {
            session.append(snapshot(n));
        }
        assert_eq!(session.remove(1).unwrap().time, 1);
        let times: Vec<u64> = session.snapshots().iter().map(|s| s.time).collect();
        assert_eq!(times, vec![0, 2]);
        assert!(matches!(
            session.remove(2),
            Err(StoreError::IndexOutOfRange { index: 2, len: 2, .. })
        ));
    }

    #[test]
    fn flush_then_restore_round_trips() {
        let kv = MemoryKvStore::new();
        let id = SessionId::from("s");
        let mut session = Session::create(id.clone());
        session.append(snapshot(1));
        session.insert_asset(AssetRecord::resolved(AssetId::new("http://x/a"), "data:a".into()));
        assert_eq!(session.flush(&kv).unwrap(), 1);

        assert!(Session::is_persisted(&kv, &id).unwrap());
        let restored = Session::restore(&kv, id.clone()).unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.assets().len(), 1);

        Session::destroy(&kv, &id).unwrap();
        assert!(!Session::is_persisted(&kv, &id).unwrap());
    }
}
