//! HTTP transport for harbinger
//!
//! Provides [`HttpFetcher`], a reqwest-backed [`harbinger::Fetcher`] that
//! requests pages the way a navigation would, so the server can answer a
//! preload exactly like the real visit.

mod client;
mod config;
mod error;

pub use client::{normalize_url, HttpFetcher};
pub use config::HttpConfig;
pub use error::{HttpError, Result};
