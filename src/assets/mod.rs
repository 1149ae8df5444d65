//! Asset resolution: fetching external resources, deduplicating them per
//! session and rewriting references to placeholders.

pub mod css;
pub mod fetch;
pub mod resolver;
pub mod stylesheet;

pub use fetch::{FetchError, FetchedResource, Fetcher, HttpFetcher};
pub use resolver::{AssetResolver, Resolution, ResolveReport};
pub use stylesheet::{InlinedSheet, PendingSheet, SheetSource, StylesheetInliner};
