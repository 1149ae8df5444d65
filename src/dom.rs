//! Thin helpers over `kuchikiki` shared by capture and replay.
//!
//! Trees produced here are `!Send`; callers keep them inside synchronous
//! code and hand owned markup across await points.

use kuchikiki::traits::TendrilSink;
use kuchikiki::{ElementData, NodeDataRef, NodeRef};
use url::Url;

/// Id of the diagnostic overlay the recorder may inject into a live page.
pub const DIAGNOSTIC_ELEMENT_ID: &str = "domreel-warning";

/// Parse a full HTML document.
pub fn parse_document(html: &str) -> NodeRef {
    kuchikiki::parse_html().one(html)
}

/// Elements matching `selector`, collected so the tree can be mutated while
/// walking the result.
pub fn select_all(root: &NodeRef, selector: &str) -> Vec<NodeDataRef<ElementData>> {
    match root.select(selector) {
        Ok(matches) => matches.collect(),
        Err(()) => {
            tracing::debug!(selector, "invalid selector");
            Vec::new()
        }
    }
}

pub fn select_first(root: &NodeRef, selector: &str) -> Option<NodeDataRef<ElementData>> {
    root.select_first(selector).ok()
}

/// Create a detached element by letting the parser build it.
pub fn create_element(tag: &str) -> Option<NodeRef> {
    let doc = parse_document(&format!("<{tag}></{tag}>"));
    let element = select_first(&doc, tag)?;
    let node = element.as_node().clone();
    node.detach();
    Some(node)
}

/// Replace all children of `node` with a single text node.
pub fn set_text(node: &NodeRef, text: &str) {
    let children: Vec<NodeRef> = node.children().collect();
    for child in children {
        child.detach();
    }
    node.append(NodeRef::new_text(text));
}

pub fn attr(element: &NodeDataRef<ElementData>, name: &str) -> Option<String> {
    element.attributes.borrow().get(name).map(str::to_string)
}

pub fn set_attr(element: &NodeDataRef<ElementData>, name: &str, value: impl Into<String>) {
    element.attributes.borrow_mut().insert(name, value.into());
}

pub fn remove_attr(element: &NodeDataRef<ElementData>, name: &str) {
    element.attributes.borrow_mut().remove(name);
}

/// Remove every `<script>` element. Returns how many were removed.
pub fn strip_scripts(root: &NodeRef) -> usize {
    let scripts = select_all(root, "script");
    let count = scripts.len();
    for script in scripts {
        script.as_node().detach();
    }
    count
}

/// Remove the recorder's own diagnostic overlay, if present.
pub fn strip_diagnostic_overlay(root: &NodeRef) {
    for overlay in select_all(root, &format!("#{DIAGNOSTIC_ELEMENT_ID}")) {
        overlay.as_node().detach();
    }
}

/// Effective base URI of a document: the first `<base href>` resolved
/// against the document URL, else the document URL itself.
pub fn document_base(root: &NodeRef, document_url: &Url) -> Url {
    select_first(root, "base[href]")
        .and_then(|base| attr(&base, "href"))
        .and_then(|href| document_url.join(href.trim()).ok())
        .unwrap_or_else(|| document_url.clone())
}

/// Serialize the `<html>` element (the equivalent of `outerHTML`).
pub fn serialize_document_element(root: &NodeRef) -> String {
    match select_first(root, "html") {
        Some(html) => html.as_node().to_string(),
        None => root.to_string(),
    }
}

/// Return the `<head>` element, creating one when the markup had none.
pub fn ensure_head(root: &NodeRef) -> Option<NodeRef> {
    if let Some(head) = select_first(root, "head") {
        return Some(head.as_node().clone());
    }
    let html = select_first(root, "html")?;
    let head = create_element("head")?;
    html.as_node().prepend(head.clone());
    Some(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_scripts_removes_all_script_elements() {
        let doc = parse_document(
            "<html><head><script>alert(1)</script></head><body><p>x</p><script src=a.js></script></body></html>",
        );
        assert_eq!(strip_scripts(&doc), 2);
        let html = serialize_document_element(&doc);
        assert!(!html.contains("<script"));
        assert!(html.contains("<p>x</p>"));
    }

    #[test]
    fn document_base_prefers_base_element() {
        let url = Url::parse("http://x/page/index.html").unwrap();
        let doc = parse_document("<html><head><base href=\"/root/\"></head></html>");
        assert_eq!(document_base(&doc, &url).as_str(), "http://x/root/");

        let plain = parse_document("<html><head></head></html>");
        assert_eq!(document_base(&plain, &url), url);
    }

    #[test]
    fn create_element_builds_detached_nodes() {
        let style = create_element("style").unwrap();
        assert!(style.parent().is_none());
        set_text(&style, "a{}");
        assert_eq!(style.to_string(), "<style>a{}</style>");
    }

    #[test]
    fn serialize_document_element_starts_with_html_tag() {
        let doc = parse_document("<!DOCTYPE html><title>t</title>");
        let html = serialize_document_element(&doc);
        assert!(html.starts_with("<html>"));
        assert!(html.ends_with("</html>"));
    }
}
