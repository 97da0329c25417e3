use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Spot price of a token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPrice {
    /// Price of one whole token
    pub price: Decimal,

    /// Quote currency (e.g. "USD")
    pub currency: String,
}

impl TokenPrice {
    pub fn usd(price: Decimal) -> Self {
        Self {
            price,
            currency: "USD".to_string(),
        }
    }
}

/// Descriptive token metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetadata {
    pub symbol: String,
    pub name: String,
    pub decimals: u8,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<String>,
}
