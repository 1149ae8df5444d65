//! Capture trigger state machine.
//!
//! `Idle` until [`CaptureScheduler::start`], then one trigger loop per mode
//! until [`CaptureScheduler::stop`]. Every pass, whichever loop or caller
//! starts it, runs under a single async guard so passes never overlap.

use std::future::pending;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::assets::Fetcher;
use crate::capture::page::{Diagnostic, PageSignal, PageSource};
use crate::capture::pass::{run_one_capture_pass, CaptureContext, CaptureError, PassSummary};
use crate::recorder::CaptureSink;

/// When snapshots are taken.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum CaptureMode {
    /// After the document has been quiet for the debounce window.
    #[default]
    #[serde(rename = "debounced")]
    #[value(name = "debounced")]
    Debounced,
    /// Once per frame, waiting for each pass before the next frame.
    #[serde(rename = "animation_frame", alias = "animationFrame")]
    #[value(name = "animation_frame", alias = "animation-frame")]
    AnimationSynced,
    /// Once per paint signal, with a watchdog for pages that never paint.
    #[serde(rename = "paint", alias = "mozAfterPaint")]
    #[value(name = "paint")]
    PaintSynced,
}

impl CaptureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureMode::Debounced => "debounced",
            CaptureMode::AnimationSynced => "animation_frame",
            CaptureMode::PaintSynced => "paint",
        }
    }
}

impl std::fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    #[default]
    Idle,
    Active(CaptureMode),
}

/// Commands from the recorder to the capture side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ContentCommand {
    Init { mode: CaptureMode },
    Stop,
}

/// Timing knobs of the trigger loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureTiming {
    pub debounce: Duration,
    pub frame_interval: Duration,
    pub paint_watchdog: Duration,
}

impl Default for CaptureTiming {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(100),
            frame_interval: Duration::from_millis(16),
            paint_watchdog: Duration::from_secs(5),
        }
    }
}

struct ActiveRun {
    mode: CaptureMode,
    context: Arc<CaptureContext>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct CaptureScheduler {
    page: Arc<dyn PageSource>,
    fetcher: Arc<dyn Fetcher>,
    sink: CaptureSink,
    timing: CaptureTiming,
    guard: Arc<Mutex<()>>,
    passes: Arc<AtomicUsize>,
    active: Option<ActiveRun>,
}

impl CaptureScheduler {
    pub fn new(
        page: Arc<dyn PageSource>,
        fetcher: Arc<dyn Fetcher>,
        sink: CaptureSink,
        timing: CaptureTiming,
    ) -> Self {
        Self {
            page,
            fetcher,
            sink,
            timing,
            guard: Arc::new(Mutex::new(())),
            passes: Arc::new(AtomicUsize::new(0)),
            active: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        match &self.active {
            Some(run) => SchedulerState::Active(run.mode),
            None => SchedulerState::Idle,
        }
    }

    /// Passes completed since construction.
    pub fn passes(&self) -> usize {
        self.passes.load(Ordering::SeqCst)
    }

    /// Begin capturing with a fresh session context.
    pub fn start(&mut self, mode: CaptureMode) -> Result<(), CaptureError> {
        if let Some(run) = &self.active {
            return Err(CaptureError::AlreadyActive(run.mode));
        }

        let context = Arc::new(CaptureContext::new(
            Arc::clone(&self.fetcher),
            self.sink.clone(),
        ));
        let cancel = CancellationToken::new();
        let runner = PassRunner {
            page: Arc::clone(&self.page),
            context: Arc::clone(&context),
            guard: Arc::clone(&self.guard),
            passes: Arc::clone(&self.passes),
        };
        let timing = self.timing;
        let loop_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            match mode {
                CaptureMode::Debounced => {
                    debounced_loop(runner, timing.debounce, loop_cancel).await
                }
                CaptureMode::AnimationSynced => {
                    animation_loop(runner, timing.frame_interval, loop_cancel).await
                }
                CaptureMode::PaintSynced => {
                    paint_loop(runner, timing.paint_watchdog, loop_cancel).await
                }
            }
        });

        tracing::info!(session = %self.sink.session_id(), %mode, "capture started");
        self.active = Some(ActiveRun {
            mode,
            context,
            cancel,
            task,
        });
        Ok(())
    }

    /// Stop capturing. Pending deadlines, signal subscriptions, the frame
    /// loop and the watchdog go away; a pass already running settles first.
    /// Returns whether capture was active.
    pub async fn stop(&mut self) -> bool {
        let Some(run) = self.active.take() else {
            return false;
        };
        run.cancel.cancel();
        if let Err(err) = run.task.await {
            tracing::error!(error = %err, "capture loop ended abnormally");
        }
        tracing::info!(session = %self.sink.session_id(), passes = self.passes(), "capture stopped");
        true
    }

    /// Run one pass now, serialized with the trigger loop.
    pub async fn capture_now(&self) -> Result<PassSummary, CaptureError> {
        let context = self
            .active
            .as_ref()
            .map(|run| Arc::clone(&run.context))
            .ok_or(CaptureError::NotActive)?;
        let runner = PassRunner {
            page: Arc::clone(&self.page),
            context,
            guard: Arc::clone(&self.guard),
            passes: Arc::clone(&self.passes),
        };
        runner.run().await
    }

    pub async fn handle(&mut self, command: ContentCommand) -> Result<(), CaptureError> {
        match command {
            ContentCommand::Init { mode } => self.start(mode),
            ContentCommand::Stop => {
                self.stop().await;
                Ok(())
            }
        }
    }

    /// Apply commands until the channel closes, then stop.
    pub async fn run_commands(mut self, mut rx: mpsc::UnboundedReceiver<ContentCommand>) -> Self {
        while let Some(command) = rx.recv().await {
            if let Err(err) = self.handle(command).await {
                tracing::warn!(?command, error = %err, "capture command rejected");
            }
        }
        self.stop().await;
        self
    }
}

#[derive(Clone)]
struct PassRunner {
    page: Arc<dyn PageSource>,
    context: Arc<CaptureContext>,
    guard: Arc<Mutex<()>>,
    passes: Arc<AtomicUsize>,
}

impl PassRunner {
    async fn run(&self) -> Result<PassSummary, CaptureError> {
        let _pass = self.guard.lock().await;
        let summary = run_one_capture_pass(self.page.as_ref(), Some(&self.context)).await?;
        self.passes.fetch_add(1, Ordering::SeqCst);
        Ok(summary)
    }

    /// Run a pass from a trigger loop; failures end only this pass.
    async fn run_logged(&self) {
        if let Err(err) = self.run().await {
            tracing::warn!(session = %self.context.session_id(), error = %err, "capture pass failed");
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn debounced_loop(runner: PassRunner, debounce: Duration, cancel: CancellationToken) {
    let mut signals = runner.page.signals();
    runner.run_logged().await;

    let mut deadline: Option<Instant> = None;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = sleep_until_deadline(deadline) => {
                deadline = None;
                runner.run_logged().await;
            }
            signal = signals.recv() => match signal {
                Ok(PageSignal::Mutation) | Err(RecvError::Lagged(_)) => {
                    deadline = Some(Instant::now() + debounce);
                }
                Ok(PageSignal::Paint) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }
}

async fn animation_loop(runner: PassRunner, frame: Duration, cancel: CancellationToken) {
    let mut frames = tokio::time::interval(frame);
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = frames.tick() => runner.run_logged().await,
        }
    }
}

async fn paint_loop(runner: PassRunner, watchdog: Duration, cancel: CancellationToken) {
    let mut signals = runner.page.signals();
    runner.run_logged().await;

    let mut deadline = Some(Instant::now() + watchdog);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            signal = signals.recv() => match signal {
                Ok(PageSignal::Paint) | Err(RecvError::Lagged(_)) => {
                    runner.run_logged().await;
                    deadline = Some(Instant::now() + watchdog);
                }
                Ok(PageSignal::Mutation) => {}
                Err(RecvError::Closed) => break,
            },
            _ = sleep_until_deadline(deadline) => {
                deadline = None;
                runner
                    .page
                    .show_diagnostic(&Diagnostic::MissingPaintSignal { waited: watchdog });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::resolver::tests::MapFetcher;
    use crate::capture::page::{LivePage, PageError, PageState};
    use crate::dom;
    use crate::model::SessionId;
    use crate::recorder::{Envelope, RecorderHandle};
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use tokio::sync::{broadcast, mpsc::UnboundedReceiver};
    use tokio::time::sleep;
    use url::Url;

    /// Page that logs when it was read and how many reads overlapped.
    struct TimedPage {
        inner: LivePage,
        read_delay: Duration,
        reads: SyncMutex<Vec<Instant>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl TimedPage {
        fn new(read_delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                inner: LivePage::new(
                    Url::parse("http://x/").unwrap(),
                    "<html><head></head><body><p>0</p></body></html>",
                ),
                read_delay,
                reads: SyncMutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            })
        }

        fn reads(&self) -> Vec<Instant> {
            self.reads.lock().clone()
        }
    }

    #[async_trait]
    impl PageSource for TimedPage {
        async fn document(&self) -> Result<PageState, PageError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.reads.lock().push(Instant::now());
            if !self.read_delay.is_zero() {
                sleep(self.read_delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.inner.document().await
        }

        fn signals(&self) -> broadcast::Receiver<PageSignal> {
            self.inner.signals()
        }

        fn show_diagnostic(&self, diagnostic: &Diagnostic) {
            self.inner.show_diagnostic(diagnostic);
        }
    }

    fn scheduler(page: Arc<TimedPage>) -> (CaptureScheduler, UnboundedReceiver<Envelope>) {
        let (handle, rx) = RecorderHandle::channel();
        let sink = CaptureSink::new(SessionId::from("tab"), handle);
        let scheduler = CaptureScheduler::new(
            page,
            Arc::new(MapFetcher::default()),
            sink,
            CaptureTiming::default(),
        );
        (scheduler, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_coalesces_bursts() {
        let page = TimedPage::new(Duration::ZERO);
        let (mut scheduler, _rx) = scheduler(page.clone());
        scheduler.start(CaptureMode::Debounced).unwrap();
        sleep(Duration::from_millis(1)).await;
        assert_eq!(scheduler.passes(), 1);

        let mut last = Instant::now();
        for n in 0..5 {
            page.inner.set_html(format!("<html><body><p>{n}</p></body></html>"));
            last = Instant::now();
            sleep(Duration::from_millis(10)).await;
        }
        sleep(Duration::from_millis(300)).await;

        let reads = page.reads();
        assert_eq!(reads.len(), 2);
        assert!(reads[1] >= last + Duration::from_millis(100));
        assert!(scheduler.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_drops_pending_deadline() {
        let page = TimedPage::new(Duration::ZERO);
        let (mut scheduler, _rx) = scheduler(page.clone());
        scheduler.start(CaptureMode::Debounced).unwrap();
        sleep(Duration::from_millis(1)).await;

        page.inner.set_html("<html><body>late</body></html>");
        sleep(Duration::from_millis(20)).await;
        assert!(scheduler.stop().await);
        sleep(Duration::from_millis(500)).await;

        assert_eq!(page.reads().len(), 1);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(matches!(
            scheduler.capture_now().await,
            Err(CaptureError::NotActive)
        ));
        assert!(!scheduler.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_is_rejected() {
        let page = TimedPage::new(Duration::ZERO);
        let (mut scheduler, _rx) = scheduler(page);
        scheduler.start(CaptureMode::PaintSynced).unwrap();
        assert!(matches!(
            scheduler.start(CaptureMode::Debounced),
            Err(CaptureError::AlreadyActive(CaptureMode::PaintSynced))
        ));
        assert_eq!(
            scheduler.state(),
            SchedulerState::Active(CaptureMode::PaintSynced)
        );
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn animation_passes_never_overlap() {
        let page = TimedPage::new(Duration::from_millis(40));
        let (mut scheduler, _rx) = scheduler(page.clone());
        scheduler.start(CaptureMode::AnimationSynced).unwrap();

        sleep(Duration::from_millis(20)).await;
        // An on-demand pass competes with the frame loop for the guard.
        scheduler.capture_now().await.unwrap();
        sleep(Duration::from_millis(400)).await;
        scheduler.stop().await;

        let passes = scheduler.passes();
        assert!(passes >= 5, "expected several passes, got {passes}");
        assert!(passes <= 12, "passes should be paced by the pass duration, got {passes}");
        assert_eq!(page.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn paint_watchdog_fires_once_per_arming() {
        let page = TimedPage::new(Duration::ZERO);
        let (mut scheduler, _rx) = scheduler(page.clone());
        scheduler.start(CaptureMode::PaintSynced).unwrap();

        sleep(Duration::from_secs(12)).await;
        assert_eq!(scheduler.passes(), 1);
        assert_eq!(page.inner.diagnostics().len(), 1);

        page.inner.paint();
        sleep(Duration::from_secs(1)).await;
        assert_eq!(scheduler.passes(), 2);
        assert_eq!(page.inner.diagnostics().len(), 1);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(page.inner.diagnostics().len(), 2);

        // Mutations alone never trigger a paint-synced pass.
        page.inner.set_html("<html><body>x</body></html>");
        sleep(Duration::from_secs(1)).await;
        assert_eq!(scheduler.passes(), 2);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_paint_capture_shows_no_diagnostic() {
        let page = TimedPage::new(Duration::ZERO);
        let (mut scheduler, _rx) = scheduler(page.clone());
        scheduler.start(CaptureMode::PaintSynced).unwrap();
        sleep(Duration::from_secs(1)).await;
        assert!(scheduler.stop().await);

        sleep(Duration::from_secs(12)).await;
        assert!(page.inner.diagnostics().is_empty());
        assert!(!page.inner.html().contains(dom::DIAGNOSTIC_ELEMENT_ID));

        page.inner.paint();
        sleep(Duration::from_secs(1)).await;
        assert_eq!(scheduler.passes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_animation_capture_runs_no_more_frames() {
        let page = TimedPage::new(Duration::ZERO);
        let (mut scheduler, _rx) = scheduler(page.clone());
        scheduler.start(CaptureMode::AnimationSynced).unwrap();
        sleep(Duration::from_millis(200)).await;
        assert!(scheduler.stop().await);

        let passes = scheduler.passes();
        assert!(passes >= 2, "frame loop should have run, got {passes}");
        let reads = page.reads().len();
        sleep(Duration::from_secs(2)).await;
        assert_eq!(scheduler.passes(), passes);
        assert_eq!(page.reads().len(), reads);
    }

    #[tokio::test(start_paused = true)]
    async fn commands_drive_the_scheduler() {
        let page = TimedPage::new(Duration::ZERO);
        let (scheduler, _rx) = scheduler(page.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(scheduler.run_commands(rx));

        tx.send(ContentCommand::Init {
            mode: CaptureMode::Debounced,
        })
        .unwrap();
        sleep(Duration::from_millis(5)).await;
        tx.send(ContentCommand::Stop).unwrap();
        drop(tx);

        let scheduler = task.await.unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.passes(), 1);
    }

    #[test]
    fn mode_names_round_trip_through_serde() {
        let json = serde_json::to_string(&ContentCommand::Init {
            mode: CaptureMode::AnimationSynced,
        })
        .unwrap();
        assert_eq!(json, r#"{"action":"init","mode":"animation_frame"}"#);
        let parsed: ContentCommand =
            serde_json::from_str(r#"{"action":"init","mode":"animationFrame"}"#).unwrap();
        assert_eq!(
            parsed,
            ContentCommand::Init {
                mode: CaptureMode::AnimationSynced
            }
        );
        assert_eq!(
            serde_json::from_str::<ContentCommand>(r#"{"action":"stop"}"#).unwrap(),
            ContentCommand::Stop
        );
    }
}
