//! Integration tests for domreel
//!
//! These tests run capture, storage and replay together against a local
//! HTTP server, and drive the binary end to end.

#[path = "../common/mod.rs"]
pub mod common;

pub mod capture_pipeline;
pub mod cli_roundtrip;
