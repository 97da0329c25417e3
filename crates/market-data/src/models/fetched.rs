use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A successful provider result.
///
/// Carries the domain value together with the provider that produced it and
/// when. Values are never modified after construction; the cache hands out
/// clones.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fetched<T> {
    /// The domain value (price, metadata, ...)
    pub data: T,

    /// Name of the provider that produced the value
    pub source: String,

    /// When the value was produced
    pub timestamp: DateTime<Utc>,
}

impl<T> Fetched<T> {
    /// Wrap a value produced now.
    pub fn new(data: T, source: impl Into<String>) -> Self {
        Self::at(data, source, Utc::now())
    }

    /// Wrap a value produced at a known time.
    pub fn at(data: T, source: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            data,
            source: source.into(),
            timestamp,
        }
    }
}
