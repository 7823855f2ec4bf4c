use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use jsonrpsee::core::client::{ClientT, Subscription, SubscriptionClientT};
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use jsonrpsee::ws_client::{WsClient, WsClientBuilder};
use serde::Deserialize;
use serde_json::Value;

use crate::settings::ChainSettings;
use crate::types::{AccountInfoSnapshot, BroadcastResult, FeeMarketParams, OracleTask, RawEvent, SubscribedQuery};

/// Everything the supervisor/subscription manager/submitter need from the
/// chain. The blockchain's actual state transition logic lives elsewhere
/// (§1) — this is purely a client-side RPC seam, mockable per-method for
/// unit tests via [`MockChainClient`].
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait ChainClient: Send + Sync {
    /// Categories this chain instance currently has oracle reporting enabled
    /// for. Queried once at run startup (§4 step a).
    async fn get_enabled_categories(&self) -> anyhow::Result<Vec<u32>>;

    /// Resolves the full task for a `request_id` surfaced by an event.
    async fn get_oracle_task(&self, category: u32, request_id: u64) -> anyhow::Result<OracleTask>;

    async fn get_account_info(&self, address: &str) -> anyhow::Result<AccountInfoSnapshot>;

    async fn get_fee_market_params(&self) -> anyhow::Result<FeeMarketParams>;

    /// A cheap liveness probe, used by the supervisor's health loop.
    async fn status(&self) -> anyhow::Result<()>;

    async fn broadcast_tx(&self, tx_bytes: Vec<u8>) -> anyhow::Result<BroadcastResult>;

    /// Opens a tendermint-style event subscription for `query` and returns a
    /// stream of decoded events. Each call opens an independent websocket
    /// subscription; the caller is responsible for calling [`unsubscribe`]
    /// with the same query once done with it.
    ///
    /// [`unsubscribe`]: ChainClient::unsubscribe
    async fn subscribe(&self, query: &SubscribedQuery) -> anyhow::Result<BoxStream<'static, RawEvent>>;

    async fn unsubscribe(&self, query: &SubscribedQuery) -> anyhow::Result<()>;
}

/// The real implementation: an HTTP client for request/response RPCs and a
/// long-lived websocket client for event subscriptions.
pub struct RpcChainClient {
    http: HttpClient,
    ws: Arc<WsClient>,
    chain_id: String,
}

impl RpcChainClient {
    pub async fn connect(settings: &ChainSettings) -> anyhow::Result<Self> {
        let endpoint = url::Url::parse(&settings.endpoint)
            .map_err(|e| anyhow::anyhow!("invalid chain endpoint '{}': {e}", settings.endpoint))?;
        let http = HttpClientBuilder::default()
            .request_timeout(Duration::from_secs(10))
            .build(endpoint.as_str())?;
        let ws = WsClientBuilder::default()
            .connection_timeout(Duration::from_secs(10))
            .build(endpoint.as_str())
            .await?;
        Ok(Self { http, ws: Arc::new(ws), chain_id: settings.chain_id.clone() })
    }
}

#[derive(Debug, Deserialize)]
struct EnabledCategoriesResponse {
    categories: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct OracleTaskResponse {
    symbol: String,
    nonce: u64,
}

#[derive(Debug, Deserialize)]
struct AccountInfoResponse {
    account_number: u64,
    sequence: u64,
}

#[derive(Debug, Deserialize)]
struct FeeMarketResponse {
    min_gas_price: String,
}

#[derive(Debug, Deserialize)]
struct BroadcastTxResponse {
    code: u32,
    #[serde(default)]
    txhash: Option<String>,
    #[serde(default)]
    raw_log: String,
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn get_enabled_categories(&self) -> anyhow::Result<Vec<u32>> {
        let response: EnabledCategoriesResponse =
            self.http.request("oracle_enabledCategories", rpc_params![&self.chain_id]).await?;
        Ok(response.categories)
    }

    async fn get_oracle_task(&self, category: u32, request_id: u64) -> anyhow::Result<OracleTask> {
        let response: OracleTaskResponse =
            self.http.request("oracle_task", rpc_params![category, request_id]).await?;
        Ok(OracleTask { request_id, category, symbol: response.symbol, nonce: response.nonce })
    }

    async fn get_account_info(&self, address: &str) -> anyhow::Result<AccountInfoSnapshot> {
        let response: AccountInfoResponse =
            self.http.request("auth_accountInfo", rpc_params![address]).await?;
        Ok(AccountInfoSnapshot { account_number: response.account_number, sequence: response.sequence })
    }

    async fn get_fee_market_params(&self) -> anyhow::Result<FeeMarketParams> {
        let response: FeeMarketResponse = self.http.request("feemarket_params", rpc_params![]).await?;
        Ok(FeeMarketParams { min_gas_price: response.min_gas_price })
    }

    async fn status(&self) -> anyhow::Result<()> {
        let _: Value = self.http.request("status", rpc_params![]).await?;
        Ok(())
    }

    async fn broadcast_tx(&self, tx_bytes: Vec<u8>) -> anyhow::Result<BroadcastResult> {
        let encoded = hex::encode(&tx_bytes);
        let response: BroadcastTxResponse =
            self.http.request("broadcast_tx_sync", rpc_params![encoded]).await?;
        Ok(BroadcastResult { code: response.code, tx_hash: response.txhash, raw_log: response.raw_log })
    }

    async fn subscribe(&self, query: &SubscribedQuery) -> anyhow::Result<BoxStream<'static, RawEvent>> {
        let subscription: Subscription<Value> = self
            .ws
            .subscribe("subscribe", rpc_params![query.query_string()], "unsubscribe")
            .await?;
        Ok(subscription.filter_map(|item| async move { item.ok().map(decode_raw_event) }).boxed())
    }

    async fn unsubscribe(&self, query: &SubscribedQuery) -> anyhow::Result<()> {
        self.http.request("unsubscribe", rpc_params![query.query_string()]).await?;
        Ok(())
    }
}

/// Pulls the `events` multimap out of a tendermint `NewBlock` subscription
/// notification. Unrecognized shapes decode to an event with no attributes
/// rather than failing the stream — a single malformed notification should
/// never tear down the subscription.
fn decode_raw_event(value: Value) -> RawEvent {
    let attributes = value
        .get("events")
        .and_then(Value::as_object)
        .map(|events| {
            events
                .iter()
                .map(|(key, values)| {
                    let values = values
                        .as_array()
                        .map(|array| array.iter().filter_map(Value::as_str).map(str::to_owned).collect())
                        .unwrap_or_default();
                    (key.clone(), values)
                })
                .collect()
        })
        .unwrap_or_default();
    RawEvent { attributes }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_raw_event_extracts_events_map() {
        let value = serde_json::json!({
            "query": "tm.event='NewBlock' AND new_oracle_request.id EXISTS",
            "events": {
                "new_oracle_request.id": ["42"]
            }
        });
        let event = decode_raw_event(value);
        assert_eq!(event.attributes.get("new_oracle_request.id"), Some(&vec!["42".to_string()]));
    }

    #[test]
    fn decode_raw_event_tolerates_missing_events_key() {
        let event = decode_raw_event(serde_json::json!({"query": "x"}));
        assert!(event.attributes.is_empty());
    }
}
