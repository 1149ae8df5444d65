//! Capture side: when to snapshot and how one snapshot is taken.

pub mod page;
pub mod pass;
pub mod scheduler;

pub use page::{Diagnostic, HttpPageSource, LivePage, PageError, PageSignal, PageSource, PageState};
pub use pass::{run_one_capture_pass, CaptureContext, CaptureError, PassSummary};
pub use scheduler::{CaptureMode, CaptureScheduler, CaptureTiming, ContentCommand, SchedulerState};
