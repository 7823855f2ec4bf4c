use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::Provider;
use crate::constants::DEFAULT_PROVIDER_TIMEOUT;

/// Reference HTTP provider against Coinbase's public spot-price endpoint.
pub struct CoinbaseProvider {
    http: reqwest::Client,
    base_url: String,
}

impl CoinbaseProvider {
    pub fn new() -> Self {
        Self::with_base_url("https://api.coinbase.com/v2/prices".to_string())
    }

    pub fn with_base_url(base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_PROVIDER_TIMEOUT.saturating_add(Duration::from_secs(0)))
            .build()
            .expect("reqwest client builder with static config never fails");
        Self { http, base_url }
    }
}

impl Default for CoinbaseProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct SpotPriceEnvelope {
    data: SpotPriceData,
}

#[derive(Debug, Deserialize)]
struct SpotPriceData {
    amount: String,
}

#[async_trait]
impl Provider for CoinbaseProvider {
    fn id(&self) -> &str {
        "coinbase"
    }

    async fn fetch(&self, symbol: &str) -> anyhow::Result<String> {
        // Coinbase spells pairs as "BTC-USD"; the rest of the system uses "/".
        let pair = symbol.replace('/', "-");
        let url = format!("{}/{pair}/spot", self.base_url);
        let envelope: SpotPriceEnvelope = self.http.get(url).send().await?.error_for_status()?.json().await?;
        Ok(envelope.data.amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_translation_replaces_slash_with_dash() {
        assert_eq!("BTC/USD".replace('/', "-"), "BTC-USD");
    }

    #[tokio::test]
    async fn fetch_parses_spot_price_envelope() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/BTC-USD/spot")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":{"base":"BTC","currency":"USD","amount":"67123.45"}}"#)
            .create_async()
            .await;

        let provider = CoinbaseProvider::with_base_url(server.url());
        let price = provider.fetch("BTC/USD").await.unwrap();
        assert_eq!(price, "67123.45");
    }
}
