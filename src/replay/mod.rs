//! Replay: rebuilding standalone documents from stored snapshots.

pub mod bundle;
pub mod reconstructor;
pub mod view;

pub use bundle::ImportError;
pub use reconstructor::{Reconstructor, RenderedSnapshot};
pub use view::TimelineView;
