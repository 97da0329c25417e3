//! Provider abstraction and gate composition.
//!
//! This module contains:
//! - The `DataProvider` trait that upstream sources and gates implement
//! - Helpers stacking rate limiting and circuit breaking around a provider
//!
//! # Architecture
//!
//! The provider system is designed to be:
//! - **Provider-agnostic**: The pipeline doesn't know about specific upstream APIs
//! - **Composable**: A gated provider is itself a `DataProvider`
//! - **Resilient**: Rate limiting and circuit breakers protect against provider failures

mod compose;
mod traits;

pub use compose::{circuit_broken, guarded, guarded_with_clock, rate_limited};
pub use traits::{DataProvider, SharedProvider};
