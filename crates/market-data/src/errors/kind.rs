use serde::{Deserialize, Serialize};

/// Classification of a [`MarketDataError`](super::MarketDataError).
///
/// | Kind | Raised by | Leaves the chain? |
/// |------|-----------|-------------------|
/// | `NotAvailable` | chain, before calling | No |
/// | `ProviderFailure` | wrapped provider | No |
/// | `Timeout` | circuit breaker deadline | No |
/// | `CircuitOpen` | circuit breaker | No |
/// | `Shutdown` | circuit breaker after `shutdown()` | No |
/// | `NoProvidersConfigured` | chain | Yes |
/// | `AllProvidersFailed` | chain | Yes |
/// | `Config` | configuration loading | n/a |
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotAvailable,
    ProviderFailure,
    Timeout,
    CircuitOpen,
    Shutdown,
    NoProvidersConfigured,
    AllProvidersFailed,
    Config,
}

impl ErrorKind {
    /// Whether the error is surfaced to callers of the chain rather than
    /// recovered locally by falling through to the next provider.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::NoProvidersConfigured | Self::AllProvidersFailed)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::NotAvailable => "NotAvailable",
            Self::ProviderFailure => "ProviderFailure",
            Self::Timeout => "Timeout",
            Self::CircuitOpen => "CircuitOpen",
            Self::Shutdown => "Shutdown",
            Self::NoProvidersConfigured => "NoProvidersConfigured",
            Self::AllProvidersFailed => "AllProvidersFailed",
            Self::Config => "Config",
        };
        f.write_str(label)
    }
}
