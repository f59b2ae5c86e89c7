//! HLTB overlay front end: lookups, cache diagnostics, page inspection, and
//! watch mode.

pub mod commands;
pub mod config;
pub mod repl;

pub use config::{resolve_cache_dir, resolve_endpoint, OverlayConfig};
