//! Turns a stored snapshot back into a standalone document.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::dom;
use crate::model::{AssetId, AssetMap, Snapshot, TimelineBundle, IMAGE_ASSET_ATTR};

/// One snapshot ready to display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedSnapshot {
    /// Zero-based position after clamping.
    pub index: usize,
    pub total: usize,
    pub time: u64,
    pub html: String,
}

pub struct Reconstructor;

impl Reconstructor {
    /// Clamp a requested position into `[0, len - 1]`.
    pub fn clamp_index(len: usize, index: i64) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let last = (len - 1) as i64;
        Some(index.clamp(0, last) as usize)
    }

    /// Render the snapshot nearest to `index`, or `None` for an empty timeline.
    pub fn render(timeline: &TimelineBundle, index: i64) -> Option<RenderedSnapshot> {
        let index = Self::clamp_index(timeline.snapshots.len(), index)?;
        let snapshot = &timeline.snapshots[index];
        Some(RenderedSnapshot {
            index,
            total: timeline.snapshots.len(),
            time: snapshot.time,
            html: Self::rehydrate(snapshot, &timeline.assets),
        })
    }

    /// Resolve every placeholder through `assets`, falling back to the
    /// placeholder's own URL, and restore the base URL.
    pub fn rehydrate(snapshot: &Snapshot, assets: &AssetMap) -> String {
        let doc = dom::parse_document(&snapshot.html);

        if !snapshot.base_url.is_empty() {
            let head = dom::ensure_head(&doc);
            if let (Some(head), Some(base)) = (head, dom::create_element("base")) {
                if let Some(element) = base.as_element() {
                    element
                        .attributes
                        .borrow_mut()
                        .insert("href", snapshot.base_url.clone());
                }
                head.prepend(base);
            }
        }

        for img in dom::select_all(&doc, &format!("img[{IMAGE_ASSET_ATTR}]")) {
            if let Some(id) = dom::attr(&img, IMAGE_ASSET_ATTR) {
                let src = lookup(assets, &id).to_string();
                dom::set_attr(&img, "src", src);
            }
        }

        for style in dom::select_all(&doc, "style") {
            let css = style.text_contents();
            let replaced = replace_placeholders(&css, assets);
            if replaced != css {
                dom::set_text(style.as_node(), &replaced);
            }
        }

        format!("<!DOCTYPE html>{}", dom::serialize_document_element(&doc))
    }
}

fn lookup<'a>(assets: &'a AssetMap, id: &'a str) -> &'a str {
    assets
        .get(&AssetId::new(id))
        .map(String::as_str)
        .unwrap_or(id)
}

fn placeholder_pattern() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r"\[\[ASSET:(.*?)\]\]").ok())
        .as_ref()
}

/// Replace `[[ASSET:<id>]]` tokens in stylesheet text.
pub fn replace_placeholders(css: &str, assets: &AssetMap) -> String {
    let Some(pattern) = placeholder_pattern() else {
        return css.to_string();
    };
    pattern
        .replace_all(css, |caps: &Captures<'_>| {
            let id = caps.get(1).map_or("", |m| m.as_str());
            lookup(assets, id).to_string()
        })
        .into_owned()
}
