//! Report submission (§4.3, §8).
//!
//! Builds the canonical sign bytes for a selected sample, signs it, and
//! broadcasts it exactly once, reacting to the chain result code the way
//! §4.3 specifies. A report is never re-broadcast for the same
//! `(request_id, nonce)`: §8's at-most-once invariant holds because every
//! code path below either succeeds or returns without looping back to
//! `broadcast_tx`. The next reporting round is what the spec means by
//! "retry" (§7) — not a second broadcast of this report.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::chain::ChainClient;
use crate::constants::{GAS_PRICE_REFRESH_INTERVAL, REPORT_DOMAIN_TAG};
use crate::errors::OracleError;
use crate::keyring::Keyring;
use crate::metrics::Metrics;
use crate::settings::GasSettings;
use crate::types::{AccountState, OracleReport};

/// Result codes the submitter knows how to react to; anything else falls
/// into the `other` arm.
mod result_code {
    pub const OK: u32 = 0;
    pub const ALREADY_CERTIFIED: u32 = 18;
    pub const SEQUENCE_MISMATCH_LOW: u32 = 32;
    pub const SEQUENCE_MISMATCH_HIGH: u32 = 33;
}

pub struct Submitter {
    chain: Arc<dyn ChainClient>,
    keyring: Arc<dyn Keyring>,
    account: Arc<AccountState>,
    gas: GasSettings,
    gas_price: RwLock<String>,
    metrics: Arc<Metrics>,
}

impl Submitter {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        keyring: Arc<dyn Keyring>,
        account: Arc<AccountState>,
        gas: GasSettings,
        initial_gas_price: String,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { chain, keyring, account, gas, gas_price: RwLock::new(initial_gas_price), metrics }
    }

    pub async fn submit_report(&self, mut report: OracleReport) -> Result<(), OracleError> {
        report.provider = self.keyring.address();

        let sequence = self.account.sequence();
        let sign_bytes = canonical_sign_bytes(&report, self.account.account_number, sequence);
        report.signature = self.keyring.sign(&sign_bytes).await.map_err(OracleError::Transient)?;
        report.validate_basic().map_err(OracleError::Malformed)?;

        let gas_price = self.gas_price.read().await.clone();
        let tx_bytes = build_tx_bytes(&report, self.account.account_number, sequence, &self.gas, &gas_price)
            .map_err(|e| OracleError::Malformed(e.to_string()))?;

        match self.chain.broadcast_tx(tx_bytes).await {
            Ok(result) => match result.code {
                result_code::OK => {
                    self.account.advance();
                    self.metrics.cached_sequence.set(self.account.sequence() as i64);
                    self.metrics.broadcasts_by_code.with_label_values(&["0"]).inc();
                    tracing::info!(request_id = report.request_id, tx_hash = ?result.tx_hash, "report broadcast");
                    Ok(())
                }
                result_code::ALREADY_CERTIFIED => {
                    self.metrics.broadcasts_by_code.with_label_values(&["18"]).inc();
                    Err(OracleError::Rejected)
                }
                result_code::SEQUENCE_MISMATCH_LOW | result_code::SEQUENCE_MISMATCH_HIGH => {
                    self.metrics.broadcasts_by_code.with_label_values(&[&result.code.to_string()]).inc();
                    // Requery and replace the cached sequence; do not re-broadcast this
                    // report (§4.3, §8's at-most-once invariant). The next task is the
                    // only retry the spec allows here.
                    let snapshot = self.chain.get_account_info(&report.provider).await.map_err(OracleError::Transient)?;
                    self.account.reconcile(snapshot.sequence);
                    self.metrics.cached_sequence.set(snapshot.sequence as i64);
                    Err(OracleError::StateDivergence)
                }
                other => {
                    self.metrics.broadcasts_by_code.with_label_values(&[&other.to_string()]).inc();
                    Err(OracleError::Malformed(format!("chain rejected report: code {other}: {}", result.raw_log)))
                }
            },
            Err(e) => {
                // Transport failures (dropped connection, timeout) are ambiguous about
                // whether the chain received the broadcast; re-sending here would risk
                // exactly the double-submit §8 forbids, so this report is simply dropped.
                tracing::debug!(error = %e, "broadcast transport error, not retried");
                Err(OracleError::Transient(e))
            }
        }
    }

    pub async fn set_gas_price(&self, gas_price: String) {
        *self.gas_price.write().await = gas_price;
    }

    /// Periodically re-queries fee-market parameters so a broadcast never
    /// signs against a gas price the chain has long since stopped accepting.
    pub fn spawn_gas_price_refresh_loop(self: Arc<Self>, cancellation: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => return,
                    _ = tokio::time::sleep(GAS_PRICE_REFRESH_INTERVAL) => {}
                }
                match self.chain.get_fee_market_params().await {
                    Ok(params) => self.set_gas_price(params.min_gas_price).await,
                    Err(e) => tracing::warn!(error = %e, "gas price refresh failed, keeping last known price"),
                }
            }
        })
    }
}

/// The bytes actually signed: a fixed domain tag followed by the request id,
/// nonce, and length-prefixed raw data and provider address, all in a stable
/// byte order so the chain can recompute the same digest.
fn canonical_sign_bytes(report: &OracleReport, account_number: u64, sequence: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(REPORT_DOMAIN_TAG.len() + 32 + report.raw_data.len() + report.provider.len());
    bytes.extend_from_slice(REPORT_DOMAIN_TAG);
    bytes.extend_from_slice(&report.request_id.to_be_bytes());
    bytes.extend_from_slice(&report.nonce.to_be_bytes());
    bytes.extend_from_slice(&account_number.to_be_bytes());
    bytes.extend_from_slice(&sequence.to_be_bytes());
    bytes.extend_from_slice(&(report.raw_data.len() as u32).to_be_bytes());
    bytes.extend_from_slice(report.raw_data.as_bytes());
    bytes.extend_from_slice(report.provider.as_bytes());
    bytes
}

#[derive(Serialize)]
struct TxEnvelope<'a> {
    request_id: u64,
    raw_data: &'a str,
    nonce: u64,
    provider: &'a str,
    signature: &'a [u8],
    account_number: u64,
    sequence: u64,
    gas_limit: u64,
    gas_adjustment: f64,
    gas_price: &'a str,
    gas_denom: &'a str,
}

fn build_tx_bytes(
    report: &OracleReport,
    account_number: u64,
    sequence: u64,
    gas: &GasSettings,
    gas_price: &str,
) -> Result<Vec<u8>, serde_json::Error> {
    let envelope = TxEnvelope {
        request_id: report.request_id,
        raw_data: &report.raw_data,
        nonce: report.nonce,
        provider: &report.provider,
        signature: &report.signature,
        account_number,
        sequence,
        gas_limit: gas.limit,
        gas_adjustment: gas.adjustment,
        gas_price,
        gas_denom: &gas.denom,
    };
    serde_json::to_vec(&envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;
    use crate::types::BroadcastResult;
    use async_trait::async_trait;

    struct StubKeyring;

    #[async_trait]
    impl Keyring for StubKeyring {
        async fn sign(&self, _bytes: &[u8]) -> anyhow::Result<Vec<u8>> {
            Ok(vec![1, 2, 3, 4])
        }

        fn address(&self) -> String {
            "oracle1stub".to_string()
        }
    }

    fn test_settings() -> GasSettings {
        GasSettings { limit: 200_000, adjustment: 1.2, denom: "uatom".to_string() }
    }

    fn test_report() -> OracleReport {
        OracleReport {
            request_id: 1,
            raw_data: "67123.45".to_string(),
            nonce: 0,
            provider: String::new(),
            signature: Vec::new(),
        }
    }

    #[tokio::test]
    async fn sequence_advances_by_one_on_success() {
        let mut mock = MockChainClient::new();
        mock.expect_broadcast_tx()
            .returning(|_| Ok(BroadcastResult { code: 0, tx_hash: Some("abc".to_string()), raw_log: String::new() }));
        let account = Arc::new(AccountState::new(7, 5));
        let submitter = Submitter::new(
            Arc::new(mock),
            Arc::new(StubKeyring),
            account.clone(),
            test_settings(),
            "0.025uatom".to_string(),
            Arc::new(Metrics::new().unwrap()),
        );
        submitter.submit_report(test_report()).await.unwrap();
        assert_eq!(account.sequence(), 6);
    }

    #[tokio::test]
    async fn sequence_mismatch_reconciles_cache_and_does_not_rebroadcast() {
        let mut mock = MockChainClient::new();
        mock.expect_broadcast_tx()
            .times(1)
            .returning(|_| Ok(BroadcastResult { code: 32, tx_hash: None, raw_log: "account sequence mismatch".to_string() }));
        mock.expect_get_account_info()
            .times(1)
            .returning(|_| Ok(crate::types::AccountInfoSnapshot { account_number: 7, sequence: 9 }));
        let account = Arc::new(AccountState::new(7, 5));
        let submitter = Submitter::new(
            Arc::new(mock),
            Arc::new(StubKeyring),
            account.clone(),
            test_settings(),
            "0.025uatom".to_string(),
            Arc::new(Metrics::new().unwrap()),
        );
        let result = submitter.submit_report(test_report()).await;
        assert!(matches!(result, Err(OracleError::StateDivergence)));
        assert_eq!(account.sequence(), 9);
    }

    #[tokio::test]
    async fn transport_error_is_not_retried() {
        let mut mock = MockChainClient::new();
        mock.expect_broadcast_tx()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("connection reset")));
        let account = Arc::new(AccountState::new(7, 5));
        let submitter = Submitter::new(
            Arc::new(mock),
            Arc::new(StubKeyring),
            account.clone(),
            test_settings(),
            "0.025uatom".to_string(),
            Arc::new(Metrics::new().unwrap()),
        );
        let result = submitter.submit_report(test_report()).await;
        assert!(matches!(result, Err(OracleError::Transient(_))));
        assert_eq!(account.sequence(), 5);
    }

    #[tokio::test]
    async fn already_certified_does_not_advance_sequence() {
        let mut mock = MockChainClient::new();
        mock.expect_broadcast_tx()
            .returning(|_| Ok(BroadcastResult { code: 18, tx_hash: None, raw_log: "already certified".to_string() }));
        let account = Arc::new(AccountState::new(7, 5));
        let submitter = Submitter::new(
            Arc::new(mock),
            Arc::new(StubKeyring),
            account.clone(),
            test_settings(),
            "0.025uatom".to_string(),
            Arc::new(Metrics::new().unwrap()),
        );
        let result = submitter.submit_report(test_report()).await;
        assert!(matches!(result, Err(OracleError::Rejected)));
        assert_eq!(account.sequence(), 5);
    }

    #[tokio::test]
    async fn unrelated_failure_code_does_not_retry_or_advance() {
        let mut mock = MockChainClient::new();
        mock.expect_broadcast_tx()
            .times(1)
            .returning(|_| Ok(BroadcastResult { code: 5, tx_hash: None, raw_log: "out of gas".to_string() }));
        let account = Arc::new(AccountState::new(7, 5));
        let submitter = Submitter::new(
            Arc::new(mock),
            Arc::new(StubKeyring),
            account.clone(),
            test_settings(),
            "0.025uatom".to_string(),
            Arc::new(Metrics::new().unwrap()),
        );
        let result = submitter.submit_report(test_report()).await;
        assert!(matches!(result, Err(OracleError::Malformed(_))));
        assert_eq!(account.sequence(), 5);
    }
}
