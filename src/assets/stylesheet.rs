//! Stylesheet inlining.
//!
//! Linked stylesheets are fetched and replaced by `<style>` elements whose
//! `url(...)` references point at asset placeholders; inline `<style>`
//! blocks get the same reference rewriting. Work is split in three steps so
//! the DOM never lives across an await: [`StylesheetInliner::mark`] on the
//! tree, [`StylesheetInliner::inline`] on owned text, then
//! [`StylesheetInliner::apply`] on the re-parsed tree.

use std::collections::HashMap;

use kuchikiki::NodeRef;
use url::Url;

use crate::assets::css;
use crate::assets::resolver::AssetResolver;
use crate::dom;
use crate::model::{AssetId, CSS_PLACEHOLDER_SUFFIX};

/// Marker attribute tagging a `<link>` awaiting inlining.
pub const LINKED_SHEET_MARKER: &str = "data-domreel-sheet";
/// Marker attribute tagging an inline `<style>` awaiting rewriting.
pub const INLINE_STYLE_MARKER: &str = "data-domreel-style";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetSource {
    /// A `<link rel=stylesheet>` pointing at this URL.
    Linked(Url),
    /// The text of a `<style>` block and the document base it resolves against.
    Inline { text: String, base: Url },
}

/// A stylesheet found in the document, identified by its marker value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSheet {
    pub marker: usize,
    pub source: SheetSource,
}

/// Rewritten stylesheet text; `css` is `None` when a linked sheet could not
/// be fetched and the `<link>` stays as it was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlinedSheet {
    pub marker: usize,
    pub linked: bool,
    pub css: Option<String>,
}

pub struct StylesheetInliner<'a> {
    resolver: &'a AssetResolver,
}

impl<'a> StylesheetInliner<'a> {
    pub fn new(resolver: &'a AssetResolver) -> Self {
        Self { resolver }
    }

    /// Tag every stylesheet in `root` with a marker attribute and return what
    /// needs fetching or rewriting. Inline blocks come first, then links, each
    /// in document order.
    pub fn mark(root: &NodeRef, base: &Url) -> Vec<PendingSheet> {
        let mut pending = Vec::new();

        for style in dom::select_all(root, "style") {
            let marker = pending.len();
            dom::set_attr(&style, INLINE_STYLE_MARKER, marker.to_string());
            pending.push(PendingSheet {
                marker,
                source: SheetSource::Inline {
                    text: style.text_contents(),
                    base: base.clone(),
                },
            });
        }

        for link in dom::select_all(root, "link[rel][href]") {
            let is_stylesheet = dom::attr(&link, "rel").is_some_and(|rel| {
                rel.split_ascii_whitespace()
                    .any(|token| token.eq_ignore_ascii_case("stylesheet"))
            });
            if !is_stylesheet {
                continue;
            }
            let Some(href) = dom::attr(&link, "href") else {
                continue;
            };
            let url = match base.join(href.trim()) {
                Ok(url) => url,
                Err(err) => {
                    tracing::debug!(href, error = %err, "stylesheet href does not resolve");
                    continue;
                }
            };
            let marker = pending.len();
            dom::set_attr(&link, LINKED_SHEET_MARKER, marker.to_string());
            pending.push(PendingSheet {
                marker,
                source: SheetSource::Linked(url),
            });
        }

        pending
    }

    /// Fetch linked sheets, rewrite every sheet's references and resolve the
    /// assets they point at. Failures are logged and never returned.
    pub async fn inline(&self, pending: Vec<PendingSheet>) -> Vec<InlinedSheet> {
        let mut out = Vec::with_capacity(pending.len());
        for sheet in pending {
            let inlined = match sheet.source {
                SheetSource::Inline { text, base } => InlinedSheet {
                    marker: sheet.marker,
                    linked: false,
                    css: Some(self.rewrite_and_resolve(&text, &base).await),
                },
                SheetSource::Linked(url) => InlinedSheet {
                    marker: sheet.marker,
                    linked: true,
                    css: self.fetch_linked(&url).await,
                },
            };
            out.push(inlined);
        }
        out
    }

    async fn fetch_linked(&self, url: &Url) -> Option<String> {
        match self.resolver.fetcher().fetch(url).await {
            // References inside a stylesheet resolve against the sheet's own URL.
            Ok(resource) => Some(self.rewrite_and_resolve(&resource.text(), url).await),
            Err(err) => {
                tracing::warn!(stylesheet = %url, error = %err, "failed to inline stylesheet");
                None
            }
        }
    }

    /// Rewrite references in `text` against `base` and resolve each asset.
    pub async fn rewrite_and_resolve(&self, text: &str, base: &Url) -> String {
        let (css, ids) = Self::rewrite_css(text, base);
        let report = self.resolver.resolve_all(&ids).await;
        tracing::trace!(base = %base, ?report, "stylesheet assets resolved");
        css
    }

    /// Replace every resolvable `url(...)` reference with its placeholder.
    /// Returns the rewritten text and the referenced ids in source order.
    pub fn rewrite_css(text: &str, base: &Url) -> (String, Vec<AssetId>) {
        let mut ids = Vec::new();
        let rewritten = css::rewrite_url_refs(text, |url_ref| {
            let id = css_safe(AssetResolver::asset_id_for(&url_ref.value, base)?);
            if id.as_str().contains(CSS_PLACEHOLDER_SUFFIX) {
                // Cannot be written as a placeholder without ending it early.
                return None;
            }
            let placeholder = id.css_placeholder();
            ids.push(id);
            Some(placeholder)
        });
        (rewritten, ids)
    }

    /// Write the results back into a tree produced from the marked markup and
    /// remove all markers.
    pub fn apply(root: &NodeRef, sheets: &[InlinedSheet]) {
        let by_marker: HashMap<usize, &InlinedSheet> =
            sheets.iter().map(|sheet| (sheet.marker, sheet)).collect();

        for style in dom::select_all(root, &format!("style[{INLINE_STYLE_MARKER}]")) {
            let sheet = marker_of(&style, INLINE_STYLE_MARKER).and_then(|m| by_marker.get(&m));
            if let Some(InlinedSheet { css: Some(css), .. }) = sheet {
                dom::set_text(style.as_node(), css);
            }
            dom::remove_attr(&style, INLINE_STYLE_MARKER);
        }

        for link in dom::select_all(root, &format!("link[{LINKED_SHEET_MARKER}]")) {
            let sheet = marker_of(&link, LINKED_SHEET_MARKER).and_then(|m| by_marker.get(&m));
            dom::remove_attr(&link, LINKED_SHEET_MARKER);
            let Some(InlinedSheet {
                css: Some(css),
                linked: true,
                ..
            }) = sheet
            else {
                continue;
            };
            let Some(style) = dom::create_element("style") else {
                continue;
            };
            dom::set_text(&style, css);
            if let (Some(media), Some(element)) = (dom::attr(&link, "media"), style.as_element()) {
                element.attributes.borrow_mut().insert("media", media);
            }
            link.as_node().insert_before(style);
            link.as_node().detach();
        }
    }
}

/// Percent-encode the characters that would end a quoted or unquoted
/// `url(...)` early. The ids stay valid URLs for the same resource, so both
/// the placeholder and its replay fallback remain well-formed CSS.
fn css_safe(id: AssetId) -> AssetId {
    if !id.as_str().contains(['\'', '"', '(', ')']) {
        return id;
    }
    let mut encoded = String::with_capacity(id.as_str().len() + 6);
    for c in id.as_str().chars() {
        match c {
            '\'' => encoded.push_str("%27"),
            '"' => encoded.push_str("%22"),
            '(' => encoded.push_str("%28"),
            ')' => encoded.push_str("%29"),
            other => encoded.push(other),
        }
    }
    AssetId::new(encoded)
}

fn marker_of(
    element: &kuchikiki::NodeDataRef<kuchikiki::ElementData>,
    name: &str,
) -> Option<usize> {
    dom::attr(element, name)?.parse().ok()
}
