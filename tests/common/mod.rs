//! Shared test utilities for domreel
//!
//! - A local asset server that counts requests per path
//! - Sample pages and timeline bundles

pub mod asset_server;
pub mod fixtures;
