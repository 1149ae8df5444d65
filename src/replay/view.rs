//! Cursor over one session's timeline with delete and export actions.

use std::path::{Path, PathBuf};

use crate::model::{SessionId, TimelineBundle};
use crate::replay::bundle::write_atomic;
use crate::replay::reconstructor::{Reconstructor, RenderedSnapshot};
use crate::store::{SnapshotStore, StoreError};
use crate::util::time::{clock_label, file_stamp};

pub struct TimelineView {
    session_id: SessionId,
    timeline: TimelineBundle,
    cursor: usize,
}

impl TimelineView {
    pub fn new(session_id: SessionId, timeline: TimelineBundle) -> Self {
        Self {
            session_id,
            timeline,
            cursor: 0,
        }
    }

    /// Open a stored session positioned on its first snapshot.
    pub fn open(store: &SnapshotStore, session_id: SessionId) -> Result<Self, StoreError> {
        let timeline = store.load(&session_id)?;
        Ok(Self::new(session_id, timeline))
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn timeline(&self) -> &TimelineBundle {
        &self.timeline
    }

    pub fn len(&self) -> usize {
        self.timeline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timeline.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn jump_to(&mut self, index: i64) -> usize {
        self.cursor = Reconstructor::clamp_index(self.len(), index).unwrap_or(0);
        self.cursor
    }

    pub fn next(&mut self) -> usize {
        self.jump_to(self.cursor as i64 + 1)
    }

    pub fn prev(&mut self) -> usize {
        self.jump_to(self.cursor as i64 - 1)
    }

    pub fn current(&self) -> Option<RenderedSnapshot> {
        Reconstructor::render(&self.timeline, self.cursor as i64)
    }

    /// `Snapshot: i/n - HH:MM:SS`, or `No Data` for an empty timeline.
    pub fn info(&self) -> String {
        match self.timeline.snapshots.get(self.cursor) {
            Some(snapshot) => format!(
                "Snapshot: {}/{} - {}",
                self.cursor + 1,
                self.len(),
                clock_label(snapshot.time)
            ),
            None => "No Data".to_string(),
        }
    }

    /// Delete the snapshot under the cursor from the store and this view,
    /// then re-clamp the cursor. Returns false for an empty timeline.
    pub fn delete_current(&mut self, store: &mut SnapshotStore) -> Result<bool, StoreError> {
        if self.is_empty() {
            return Ok(false);
        }
        store.delete(&self.session_id, self.cursor)?;
        self.timeline.snapshots.remove(self.cursor);
        self.jump_to(self.cursor as i64);
        Ok(true)
    }

    pub fn bundle_file_name(&self) -> String {
        format!("recording-{}.json", self.session_id)
    }

    /// Export file name of the snapshot under the cursor.
    pub fn snapshot_file_name(&self) -> Option<String> {
        let snapshot = self.timeline.snapshots.get(self.cursor)?;
        Some(format!(
            "snapshot-{}-{}-{}.html",
            self.session_id,
            self.cursor + 1,
            file_stamp(snapshot.time)
        ))
    }

    /// Write the whole timeline into `dir`. Returns the written path.
    pub fn export_bundle(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        let path = dir.join(self.bundle_file_name());
        self.timeline.write_to_path(&path)?;
        tracing::info!(session = %self.session_id, path = %path.display(), "exported timeline");
        Ok(path)
    }

    /// Write the rehydrated current snapshot into `dir`; `None` when empty.
    pub fn export_current(&self, dir: &Path) -> anyhow::Result<Option<PathBuf>> {
        let (Some(rendered), Some(name)) = (self.current(), self.snapshot_file_name()) else {
            return Ok(None);
        };
        let path = dir.join(name);
        write_atomic(&path, rendered.html.as_bytes())?;
        tracing::info!(session = %self.session_id, index = rendered.index, path = %path.display(), "exported snapshot");
        Ok(Some(path))
    }
}
