//! Market data models
//!
//! This module contains the data types that flow through the pipeline:
//! - `request` - Normalized token request and the `CacheKey` fingerprint trait
//! - `fetched` - Provider result wrapper carrying source and timestamp
//! - `token` - Token spot price and token metadata payloads

mod fetched;
mod request;
mod token;

pub use fetched::Fetched;
pub use request::{CacheKey, ChainId, TokenRequest};
pub use token::{TokenMetadata, TokenPrice};
