pub mod assets;
pub mod capture;
pub mod cli;
pub mod config;
pub mod dom;
pub mod model;
pub mod recorder;
pub mod replay;
pub mod store;
pub mod util;

pub use assets::{AssetResolver, FetchError, Fetcher, HttpFetcher, StylesheetInliner};
pub use capture::{
    CaptureError, CaptureMode, CaptureScheduler, CaptureTiming, ContentCommand, LivePage,
    PageSource, SchedulerState,
};
pub use config::Config;
pub use model::{AssetId, AssetMap, AssetRecord, SessionId, Snapshot, TimelineBundle};
pub use recorder::{CaptureSink, Recorder, RecorderHandle, RecorderMessage, RecorderReply};
pub use replay::{ImportError, Reconstructor, RenderedSnapshot, TimelineView};
pub use store::{KvStore, MemoryKvStore, SnapshotStore, SqliteKvStore, StoreError};
