//! Sample pages and timelines

use std::path::Path;

use domreel::{AssetId, AssetMap, Snapshot, TimelineBundle};

/// 1x1 transparent PNG.
pub const PNG_BYTES: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

pub const STYLE_CSS: &str = "body { background: url('bg.png'); }\n/* url(ignored.png) */\n";

/// A page with a script, an image and a linked stylesheet.
pub fn sample_page(counter: usize) -> String {
    format!(
        r#"<!DOCTYPE html><html><head><title>t</title><link rel="stylesheet" href="/css/style.css"><script>tick()</script></head><body><p id="n">{counter}</p><img src="/pic.png"><img src="/missing.png"></body></html>"#
    )
}

/// A two-snapshot timeline with one resolved asset.
pub fn sample_bundle() -> TimelineBundle {
    let mut assets = AssetMap::new();
    assets.insert(
        AssetId::new("http://x/pic.png"),
        "data:image/png;base64,AA==".to_string(),
    );
    let snapshot = |n: u64| Snapshot {
        time: 1_700_000_000_000 + n,
        html: format!(
            r#"<html><head><style>p{{background:url([[ASSET:http://x/bg.png]])}}</style></head><body><p>{n}</p><img data-asset-id="http://x/pic.png"></body></html>"#
        ),
        base_url: "http://x/".to_string(),
    };
    TimelineBundle::new(vec![snapshot(0), snapshot(1)], assets)
}

pub fn write_bundle(path: &Path, bundle: &TimelineBundle) {
    std::fs::write(path, serde_json::to_vec(bundle).expect("Failed to encode bundle"))
        .expect("Failed to write bundle");
}
