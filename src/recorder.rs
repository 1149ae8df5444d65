//! Background recorder task.
//!
//! Owns the [`SnapshotStore`] and applies [`RecorderMessage`]s sent by
//! capture sessions. Messages are fire-and-forget unless sent through
//! [`RecorderHandle::request`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::capture::{CaptureMode, ContentCommand};
use crate::model::{AssetRecord, SessionId, Snapshot};
use crate::store::{read_json, write_json, SnapshotStore, StoreError};

/// Key holding the per-session recording flags.
pub const RECORDING_STATE_KEY: &str = "recording_state";

/// Messages accepted by the recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum RecorderMessage {
    #[serde(rename_all = "camelCase")]
    StartRecording {
        #[serde(alias = "tabId")]
        session_id: SessionId,
        mode: CaptureMode,
    },
    #[serde(rename_all = "camelCase")]
    StopRecording {
        #[serde(alias = "tabId")]
        session_id: SessionId,
    },
    #[serde(rename_all = "camelCase")]
    SaveSnapshot {
        #[serde(alias = "tabId")]
        session_id: SessionId,
        data: Snapshot,
    },
    #[serde(rename_all = "camelCase")]
    SaveAsset {
        #[serde(alias = "tabId")]
        session_id: SessionId,
        #[serde(flatten)]
        record: AssetRecord,
    },
}

impl RecorderMessage {
    pub fn session_id(&self) -> &SessionId {
        match self {
            RecorderMessage::StartRecording { session_id, .. }
            | RecorderMessage::StopRecording { session_id }
            | RecorderMessage::SaveSnapshot { session_id, .. }
            | RecorderMessage::SaveAsset { session_id, .. } => session_id,
        }
    }
}

/// Successful outcome of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderReply {
    Started,
    /// Number of snapshots persisted for the session.
    Stopped { snapshots: usize },
    /// Timeline length after the append.
    SnapshotSaved { count: usize },
    /// Whether the asset was stored (first write wins).
    AssetSaved { stored: bool },
}

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("recorder task has shut down")]
    Closed,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A message plus an optional reply slot.
#[derive(Debug)]
pub struct Envelope {
    pub message: RecorderMessage,
    pub reply: Option<oneshot::Sender<Result<RecorderReply, StoreError>>>,
}

/// Handle to send messages to the recorder task
#[derive(Clone, Debug)]
pub struct RecorderHandle {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl RecorderHandle {
    /// A handle plus the receiving end, for driving a [`Recorder`] by hand.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Fire-and-forget delivery. Returns false once the recorder is gone.
    pub fn send(&self, message: RecorderMessage) -> bool {
        self.tx
            .send(Envelope {
                message,
                reply: None,
            })
            .is_ok()
    }

    /// Deliver a message and wait for its outcome.
    pub async fn request(&self, message: RecorderMessage) -> Result<RecorderReply, RecorderError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                message,
                reply: Some(reply_tx),
            })
            .map_err(|_| RecorderError::Closed)?;
        let outcome = reply_rx.await.map_err(|_| RecorderError::Closed)?;
        Ok(outcome?)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Per-session sender used by the capture side.
#[derive(Clone, Debug)]
pub struct CaptureSink {
    session_id: SessionId,
    handle: RecorderHandle,
}

impl CaptureSink {
    pub fn new(session_id: SessionId, handle: RecorderHandle) -> Self {
        Self { session_id, handle }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn save_snapshot(&self, snapshot: Snapshot) {
        if !self.handle.send(RecorderMessage::SaveSnapshot {
            session_id: self.session_id.clone(),
            data: snapshot,
        }) {
            tracing::warn!(session = %self.session_id, "recorder closed; snapshot dropped");
        }
    }

    pub fn save_asset(&self, record: AssetRecord) {
        if !self.handle.send(RecorderMessage::SaveAsset {
            session_id: self.session_id.clone(),
            record,
        }) {
            tracing::debug!(session = %self.session_id, "recorder closed; asset dropped");
        }
    }
}

/// Recording flag kept per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingState {
    pub active: bool,
    pub mode: CaptureMode,
}

pub type RecordingStates = BTreeMap<SessionId, RecordingState>;

/// Read the persisted recording flags.
pub fn load_recording_states(store: &SnapshotStore) -> Result<RecordingStates, StoreError> {
    Ok(read_json(store.kv().as_ref(), RECORDING_STATE_KEY)?.unwrap_or_default())
}

pub struct Recorder {
    store: SnapshotStore,
    /// Commands for the capture side, sent on start/stop.
    content_tx: Option<mpsc::UnboundedSender<ContentCommand>>,
}

impl Recorder {
    pub fn new(store: SnapshotStore) -> Self {
        Self {
            store,
            content_tx: None,
        }
    }

    /// Forward `init`/`stop` commands to a capture session on start/stop.
    pub fn with_content_channel(mut self, tx: mpsc::UnboundedSender<ContentCommand>) -> Self {
        self.content_tx = Some(tx);
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Spawn the recorder task. The task ends once every handle is dropped,
    /// flushing any session still live, and yields the store back.
    pub fn spawn(self) -> (RecorderHandle, JoinHandle<SnapshotStore>) {
        let (handle, rx) = RecorderHandle::channel();
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    /// Main loop of the recorder task
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Envelope>) -> SnapshotStore {
        while let Some(Envelope { message, reply }) = rx.recv().await {
            let outcome = self.dispatch(message);
            match reply {
                Some(reply) => {
                    let _ = reply.send(outcome);
                }
                None => match outcome {
                    Ok(_) => {}
                    Err(StoreError::UnknownSession(session)) => {
                        tracing::debug!(session = %session, "dropped message for a session that is not recording");
                    }
                    Err(err) => tracing::error!(error = %err, "recorder message failed"),
                },
            }
        }

        self.flush_live();
        self.store
    }

    /// Apply one message to the store.
    pub fn dispatch(&mut self, message: RecorderMessage) -> Result<RecorderReply, StoreError> {
        match message {
            RecorderMessage::StartRecording { session_id, mode } => {
                self.start_recording(session_id, mode)
            }
            RecorderMessage::StopRecording { session_id } => self.stop_recording(&session_id),
            RecorderMessage::SaveSnapshot { session_id, data } => {
                self.save_snapshot(&session_id, data)
            }
            RecorderMessage::SaveAsset { session_id, record } => {
                self.save_asset(&session_id, record)
            }
        }
    }

    fn start_recording(
        &mut self,
        session_id: SessionId,
        mode: CaptureMode,
    ) -> Result<RecorderReply, StoreError> {
        self.set_recording_state(&session_id, RecordingState { active: true, mode })?;
        self.store.create(session_id.clone())?;
        tracing::info!(session = %session_id, ?mode, "recording started");
        self.notify_content(ContentCommand::Init { mode });
        Ok(RecorderReply::Started)
    }

    fn stop_recording(&mut self, session_id: &SessionId) -> Result<RecorderReply, StoreError> {
        let mut states = load_recording_states(&self.store)?;
        if let Some(state) = states.get_mut(session_id) {
            state.active = false;
            write_json(self.store.kv().as_ref(), RECORDING_STATE_KEY, &states)?;
        }
        let snapshots = self.store.flush_final(session_id)?;
        tracing::info!(session = %session_id, snapshots, "recording stopped");
        self.notify_content(ContentCommand::Stop);
        Ok(RecorderReply::Stopped { snapshots })
    }

    fn save_snapshot(
        &mut self,
        session_id: &SessionId,
        snapshot: Snapshot,
    ) -> Result<RecorderReply, StoreError> {
        let count = self.store.append(session_id, snapshot)?;
        tracing::debug!(session = %session_id, count, "snapshot saved");
        Ok(RecorderReply::SnapshotSaved { count })
    }

    fn save_asset(
        &mut self,
        session_id: &SessionId,
        record: AssetRecord,
    ) -> Result<RecorderReply, StoreError> {
        let stored = self.store.put_asset(session_id, record)?;
        Ok(RecorderReply::AssetSaved { stored })
    }

    fn set_recording_state(
        &self,
        session_id: &SessionId,
        state: RecordingState,
    ) -> Result<(), StoreError> {
        let mut states = load_recording_states(&self.store)?;
        states.insert(session_id.clone(), state);
        write_json(self.store.kv().as_ref(), RECORDING_STATE_KEY, &states)
    }

    fn notify_content(&self, command: ContentCommand) {
        if let Some(tx) = &self.content_tx {
            if tx.send(command).is_err() {
                tracing::debug!("capture side is gone; command not delivered");
            }
        }
    }

    fn flush_live(&mut self) {
        let live: Vec<SessionId> = self
            .store
            .sessions()
            .map(|sessions| {
                sessions
                    .into_iter()
                    .filter(|s| s.live)
                    .map(|s| s.id)
                    .collect()
            })
            .unwrap_or_default();
        for id in live {
            if let Err(err) = self.store.flush_final(&id) {
                tracing::error!(session = %id, error = %err, "failed to flush session on shutdown");
            }
        }
    }
}
