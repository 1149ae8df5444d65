//! The live page seam: current markup, change signals and the in-page
//! diagnostic hook.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::assets::{FetchError, Fetcher};
use crate::dom;

const SIGNAL_CAPACITY: usize = 256;

#[derive(Error, Debug)]
pub enum PageError {
    #[error("failed to read page: {0}")]
    Fetch(#[from] FetchError),
    #[error("page is closed")]
    Closed,
}

/// The document as it is right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageState {
    pub html: String,
    pub url: Url,
}

/// Change notifications raised by a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSignal {
    /// The document tree changed.
    Mutation,
    /// The page was painted.
    Paint,
}

/// Problems the recorder reports inside the page itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// Paint-synced capture saw no paint signal for `waited`.
    MissingPaintSignal { waited: Duration },
}

impl Diagnostic {
    pub fn message(&self) -> String {
        match self {
            Diagnostic::MissingPaintSignal { waited } => format!(
                "No paint events detected for {}s. Paint-synced capture needs the page to report paints; \
                 switch to debounced or animation_frame mode otherwise.",
                waited.as_secs()
            ),
        }
    }
}

#[async_trait]
pub trait PageSource: Send + Sync {
    /// Current markup and document URL.
    async fn document(&self) -> Result<PageState, PageError>;

    /// Subscribe to change signals.
    fn signals(&self) -> broadcast::Receiver<PageSignal>;

    /// Surface a diagnostic to whoever is looking at the page.
    fn show_diagnostic(&self, diagnostic: &Diagnostic) {
        tracing::warn!(diagnostic = ?diagnostic, "{}", diagnostic.message());
    }
}

/// In-memory page mutated programmatically.
pub struct LivePage {
    state: RwLock<PageState>,
    signals: broadcast::Sender<PageSignal>,
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl LivePage {
    pub fn new(url: Url, html: impl Into<String>) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            state: RwLock::new(PageState {
                html: html.into(),
                url,
            }),
            signals,
            diagnostics: Mutex::new(Vec::new()),
        }
    }

    /// Replace the markup and raise a mutation signal.
    pub fn set_html(&self, html: impl Into<String>) {
        self.state.write().html = html.into();
        self.notify(PageSignal::Mutation);
    }

    /// Raise a paint signal.
    pub fn paint(&self) {
        self.notify(PageSignal::Paint);
    }

    pub fn html(&self) -> String {
        self.state.read().html.clone()
    }

    /// Diagnostics shown so far, oldest first.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().clone()
    }

    /// Remove the diagnostic overlay from the markup, like its close button.
    pub fn dismiss_diagnostic(&self) {
        let mut state = self.state.write();
        let doc = dom::parse_document(&state.html);
        dom::strip_diagnostic_overlay(&doc);
        state.html = dom::serialize_document_element(&doc);
    }

    fn notify(&self, signal: PageSignal) {
        // No receivers simply means nobody is recording.
        let _ = self.signals.send(signal);
    }
}

#[async_trait]
impl PageSource for LivePage {
    async fn document(&self) -> Result<PageState, PageError> {
        Ok(self.state.read().clone())
    }

    fn signals(&self) -> broadcast::Receiver<PageSignal> {
        self.signals.subscribe()
    }

    /// Log the diagnostic and inject an overlay into the page, once.
    fn show_diagnostic(&self, diagnostic: &Diagnostic) {
        tracing::warn!(diagnostic = ?diagnostic, "{}", diagnostic.message());
        self.diagnostics.lock().push(diagnostic.clone());

        let mut state = self.state.write();
        let doc = dom::parse_document(&state.html);
        if dom::select_first(&doc, &format!("#{}", dom::DIAGNOSTIC_ELEMENT_ID)).is_some() {
            return;
        }
        let Some(body) = dom::select_first(&doc, "body") else {
            return;
        };
        let overlay_doc = dom::parse_document(&format!(
            "<html><body><div id=\"{id}\" style=\"position:fixed; top:10px; right:10px; background:#333; \
             color:white; border:1px solid #f00; padding:15px; z-index:999999;\">{message} \
             <button>x</button></div></body></html>",
            id = dom::DIAGNOSTIC_ELEMENT_ID,
            message = diagnostic.message(),
        ));
        let overlay_selector = format!("#{}", dom::DIAGNOSTIC_ELEMENT_ID);
        let Some(overlay) = dom::select_first(&overlay_doc, &overlay_selector) else {
            return;
        };
        let overlay = overlay.as_node().clone();
        overlay.detach();
        body.as_node().append(overlay);
        state.html = dom::serialize_document_element(&doc);
    }
}

/// Page read over HTTP. A poller raises mutation and paint signals whenever
/// the fetched body changes.
pub struct HttpPageSource {
    url: Url,
    fetcher: Arc<dyn Fetcher>,
    signals: broadcast::Sender<PageSignal>,
    cancel: CancellationToken,
}

impl HttpPageSource {
    pub fn new(url: Url, fetcher: Arc<dyn Fetcher>) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            url,
            fetcher,
            signals,
            cancel: CancellationToken::new(),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Start polling every `interval` until [`HttpPageSource::shutdown`].
    pub fn spawn_poller(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let page = Arc::clone(self);
        tokio::spawn(async move { page.poll(interval).await })
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn poll(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_hash: Option<Vec<u8>> = None;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let resource = match self.fetcher.fetch(&self.url).await {
                        Ok(resource) => resource,
                        Err(err) => {
                            tracing::debug!(url = %self.url, error = %err, "page poll failed");
                            continue;
                        }
                    };
                    let hash = Sha256::digest(&resource.bytes).to_vec();
                    let changed = last_hash.as_ref().is_some_and(|previous| *previous != hash);
                    last_hash = Some(hash);
                    if changed {
                        tracing::debug!(url = %self.url, "page content changed");
                        let _ = self.signals.send(PageSignal::Mutation);
                        let _ = self.signals.send(PageSignal::Paint);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn document(&self) -> Result<PageState, PageError> {
        if self.cancel.is_cancelled() {
            return Err(PageError::Closed);
        }
        let resource = self.fetcher.fetch(&self.url).await?;
        Ok(PageState {
            html: resource.text(),
            url: self.url.clone(),
        })
    }

    fn signals(&self) -> broadcast::Receiver<PageSignal> {
        self.signals.subscribe()
    }
}
