//! One capture pass: read the page, make the clone self-contained, emit a
//! snapshot.

use std::sync::Arc;

use thiserror::Error;
use url::Url;

use crate::assets::{
    AssetResolver, Fetcher, InlinedSheet, PendingSheet, ResolveReport, StylesheetInliner,
};
use crate::capture::page::{PageError, PageSource};
use crate::capture::CaptureMode;
use crate::dom;
use crate::model::{AssetId, SessionId, Snapshot};
use crate::recorder::CaptureSink;
use crate::util::now_ms;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture is not active")]
    NotActive,
    #[error("capture is already active in {0:?} mode")]
    AlreadyActive(CaptureMode),
    #[error(transparent)]
    Page(#[from] PageError),
}

/// State owned by one capture session: its dedup set and where results go.
pub struct CaptureContext {
    resolver: AssetResolver,
    sink: CaptureSink,
}

impl CaptureContext {
    pub fn new(fetcher: Arc<dyn Fetcher>, sink: CaptureSink) -> Self {
        Self {
            resolver: AssetResolver::new(fetcher, sink.clone()),
            sink,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        self.sink.session_id()
    }

    pub fn resolver(&self) -> &AssetResolver {
        &self.resolver
    }
}

/// What one pass produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub scripts_removed: usize,
    pub images: ResolveReport,
    pub stylesheets: usize,
    pub html_bytes: usize,
}

/// Markup after the synchronous DOM work, ready for network resolution.
struct Prepared {
    html: String,
    base: Url,
    scripts_removed: usize,
    image_ids: Vec<AssetId>,
    sheets: Vec<PendingSheet>,
}

fn prepare(html: &str, url: &Url) -> Prepared {
    let doc = dom::parse_document(html);
    let scripts_removed = dom::strip_scripts(&doc);
    dom::strip_diagnostic_overlay(&doc);
    let base = dom::document_base(&doc, url);
    let image_ids = AssetResolver::rewrite_images(&doc, &base);
    let sheets = StylesheetInliner::mark(&doc, &base);
    Prepared {
        html: dom::serialize_document_element(&doc),
        base,
        scripts_removed,
        image_ids,
        sheets,
    }
}

fn finish(html: &str, sheets: &[InlinedSheet]) -> String {
    let doc = dom::parse_document(html);
    StylesheetInliner::apply(&doc, sheets);
    dom::serialize_document_element(&doc)
}

/// Run one capture pass. `context` is `None` while capture is idle, in which
/// case the pass is refused.
///
/// Asset and stylesheet failures are absorbed; only a failed page read
/// fails the pass.
pub async fn run_one_capture_pass(
    page: &dyn PageSource,
    context: Option<&CaptureContext>,
) -> Result<PassSummary, CaptureError> {
    let context = context.ok_or(CaptureError::NotActive)?;
    let state = page.document().await?;

    let prepared = prepare(&state.html, &state.url);
    let images = context.resolver.resolve_all(&prepared.image_ids).await;
    let stylesheets = prepared.sheets.len();
    let inlined = StylesheetInliner::new(&context.resolver)
        .inline(prepared.sheets)
        .await;

    // Serialization happens only after every resolution above has settled.
    let html = finish(&prepared.html, &inlined);
    let summary = PassSummary {
        scripts_removed: prepared.scripts_removed,
        images,
        stylesheets,
        html_bytes: html.len(),
    };
    context.sink.save_snapshot(Snapshot {
        time: now_ms(),
        html,
        base_url: prepared.base.to_string(),
    });
    tracing::debug!(session = %context.session_id(), ?summary, "capture pass complete");
    Ok(summary)
}
