//! Session-scoped asset resolution with at-most-once fetching.

use std::collections::HashSet;
use std::sync::Arc;

use kuchikiki::NodeRef;
use parking_lot::Mutex;
use url::Url;

use crate::assets::fetch::Fetcher;
use crate::dom;
use crate::model::{AssetId, AssetRecord, CSS_PLACEHOLDER_PREFIX, IMAGE_ASSET_ATTR};
use crate::recorder::CaptureSink;

/// What happened to one asset id during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Resolved,
    Failed,
    /// Already resolved or attempted earlier in this session.
    Deduplicated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveReport {
    pub resolved: usize,
    pub failed: usize,
    pub deduplicated: usize,
}

impl ResolveReport {
    fn record(&mut self, resolution: Resolution) {
        match resolution {
            Resolution::Resolved => self.resolved += 1,
            Resolution::Failed => self.failed += 1,
            Resolution::Deduplicated => self.deduplicated += 1,
        }
    }
}

/// Fetches external resources once per session and forwards the encoded
/// result to the recorder.
pub struct AssetResolver {
    fetcher: Arc<dyn Fetcher>,
    sink: CaptureSink,
    attempted: Mutex<HashSet<AssetId>>,
}

impl AssetResolver {
    pub fn new(fetcher: Arc<dyn Fetcher>, sink: CaptureSink) -> Self {
        Self {
            fetcher,
            sink,
            attempted: Mutex::new(HashSet::new()),
        }
    }

    /// Absolute id for a reference, or `None` when it needs no resolution
    /// (empty, already a `data:` URL, an existing placeholder) or cannot be
    /// parsed.
    pub fn asset_id_for(reference: &str, base: &Url) -> Option<AssetId> {
        let reference = reference.trim();
        if reference.is_empty()
            || is_data_url(reference)
            || reference.starts_with(CSS_PLACEHOLDER_PREFIX)
        {
            return None;
        }
        match base.join(reference) {
            Ok(url) => Some(AssetId::from(url)),
            Err(err) => {
                tracing::debug!(reference, base = %base, error = %err, "unresolvable asset reference");
                None
            }
        }
    }

    /// Replace every external image source in `root` with an asset id side
    /// attribute. Returns the ids in document order.
    pub fn rewrite_images(root: &NodeRef, base: &Url) -> Vec<AssetId> {
        let mut ids = Vec::new();
        for img in dom::select_all(root, "img[src]") {
            let Some(src) = dom::attr(&img, "src") else {
                continue;
            };
            let Some(id) = Self::asset_id_for(&src, base) else {
                continue;
            };
            dom::remove_attr(&img, "src");
            dom::set_attr(&img, IMAGE_ASSET_ATTR, id.as_str());
            ids.push(id);
        }
        ids
    }

    /// Resolve one id unless it was already attempted in this session.
    /// Failures are logged and never returned to the caller.
    pub async fn resolve(&self, id: &AssetId) -> Resolution {
        if !self.claim(id) {
            return Resolution::Deduplicated;
        }

        let url = match Url::parse(id.as_str()) {
            Ok(url) => url,
            Err(err) => {
                tracing::warn!(asset = %id, error = %err, "asset id is not a URL");
                return Resolution::Failed;
            }
        };

        match self.fetcher.fetch(&url).await {
            Ok(resource) => {
                let data = resource.to_data_url(&url);
                self.sink
                    .save_asset(AssetRecord::resolved(id.clone(), data));
                Resolution::Resolved
            }
            Err(err) => {
                tracing::warn!(asset = %id, error = %err, "failed to fetch asset");
                Resolution::Failed
            }
        }
    }

    /// Resolve ids sequentially; every attempt has settled when this returns.
    pub async fn resolve_all(&self, ids: &[AssetId]) -> ResolveReport {
        let mut report = ResolveReport::default();
        for id in ids {
            report.record(self.resolve(id).await);
        }
        report
    }

    /// Number of distinct ids attempted so far in this session.
    pub fn attempted_count(&self) -> usize {
        self.attempted.lock().len()
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    /// Claim an id before any await so concurrent callers never fetch twice.
    fn claim(&self, id: &AssetId) -> bool {
        self.attempted.lock().insert(id.clone())
    }
}

fn is_data_url(reference: &str) -> bool {
    reference
        .get(..5)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("data:"))
}
