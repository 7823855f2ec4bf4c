//! Shared data model (§3).

use bigdecimal::BigDecimal;
use std::sync::atomic::{AtomicU64, Ordering};

/// A work item derived from a chain event plus a subsequent RPC query.
///
/// `(request_id, nonce)` uniquely identifies a reporting round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleTask {
    pub request_id: u64,
    pub category: u32,
    pub symbol: String,
    pub nonce: u64,
}

/// One provider's reply for one task. Lives only inside a single
/// `Aggregator::process_task` invocation.
#[derive(Debug, Clone)]
pub struct ProviderSample {
    pub provider_id: String,
    pub raw: String,
    pub parsed: BigDecimal,
}

/// The artifact sent to the chain.
#[derive(Debug, Clone, Default)]
pub struct OracleReport {
    pub request_id: u64,
    pub raw_data: String,
    pub nonce: u64,
    /// Filled with this daemon's own chain address before signing.
    pub provider: String,
    pub signature: Vec<u8>,
}

impl OracleReport {
    /// `ValidateBasic`: the minimal well-formedness check run before a report
    /// is ever handed to the chain client for broadcast.
    pub fn validate_basic(&self) -> Result<(), String> {
        if self.raw_data.is_empty() {
            return Err("raw_data must not be empty".to_string());
        }
        if self.provider.is_empty() {
            return Err("provider address must not be empty".to_string());
        }
        if self.signature.is_empty() {
            return Err("signature must not be empty".to_string());
        }
        Ok(())
    }
}

/// Cached chain account state, shared by the submitter (writes) and
/// transitively by transaction building (reads). The sequence field is
/// atomic; the account number is immutable once fetched.
#[derive(Debug)]
pub struct AccountState {
    pub account_number: u64,
    sequence: AtomicU64,
}

impl AccountState {
    pub fn new(account_number: u64, sequence: u64) -> Self {
        Self { account_number, sequence: AtomicU64::new(sequence) }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Successful broadcast: advance the cached sequence by exactly one.
    pub fn advance(&self) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
    }

    /// Stale/used-sequence error: replace the cached value with a fresh
    /// query result rather than guessing.
    pub fn reconcile(&self, fresh_sequence: u64) {
        self.sequence.store(fresh_sequence, Ordering::SeqCst);
    }
}

/// Snapshot of an account's chain-side state, as returned by an
/// account-info RPC query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountInfoSnapshot {
    pub account_number: u64,
    pub sequence: u64,
}

/// Fee-market parameters used to derive a gas price string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeMarketParams {
    pub min_gas_price: String,
}

/// Result of a broadcast RPC call (§4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastResult {
    pub code: u32,
    pub tx_hash: Option<String>,
    pub raw_log: String,
}

/// Per-subscription state machine (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Inactive,
    Starting,
    Active,
}

/// One entry of the `tm.event='NewBlock' AND <event-type>.<attribute-key> EXISTS`
/// query family that the subscription manager maintains.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscribedQuery {
    pub event_type: String,
    pub attribute: String,
}

impl SubscribedQuery {
    pub fn new(event_type: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self { event_type: event_type.into(), attribute: attribute.into() }
    }

    /// The key under which the decoded event stores its values:
    /// `<event-type>.<attribute-key>`.
    pub fn attribute_key(&self) -> String {
        format!("{}.{}", self.event_type, self.attribute)
    }

    /// The websocket subscription query string.
    pub fn query_string(&self) -> String {
        format!("tm.event='NewBlock' AND {} EXISTS", self.attribute_key())
    }
}

/// A single decoded event from the chain's event stream: a multimap from
/// `"<event-type>.<attribute-key>"` to a sequence of string values.
#[derive(Debug, Clone, Default)]
pub struct RawEvent {
    pub attributes: std::collections::HashMap<String, Vec<String>>,
}

impl RawEvent {
    /// Extract the first value for `query`'s attribute key and parse it as an
    /// unsigned 64-bit request id. Malformed values are reported as `None`
    /// so the caller can log and drop them without terminating the loop.
    pub fn request_id_for(&self, query: &SubscribedQuery) -> Option<u64> {
        self.attributes
            .get(&query.attribute_key())
            .and_then(|values| values.first())
            .and_then(|first| first.parse::<u64>().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_state_advance_increments_by_one() {
        let account = AccountState::new(42, 7);
        account.advance();
        assert_eq!(account.sequence(), 8);
    }

    #[test]
    fn account_state_reconcile_replaces_value() {
        let account = AccountState::new(42, 7);
        account.reconcile(99);
        assert_eq!(account.sequence(), 99);
    }

    #[test]
    fn query_string_matches_tendermint_convention() {
        let query = SubscribedQuery::new("new_oracle_request", "id");
        assert_eq!(
            query.query_string(),
            "tm.event='NewBlock' AND new_oracle_request.id EXISTS"
        );
    }

    #[test]
    fn request_id_for_parses_first_value() {
        let query = SubscribedQuery::new("new_oracle_request", "id");
        let mut attributes = std::collections::HashMap::new();
        attributes.insert("new_oracle_request.id".to_string(), vec!["42".to_string()]);
        let event = RawEvent { attributes };
        assert_eq!(event.request_id_for(&query), Some(42));
    }

    #[test]
    fn request_id_for_drops_malformed_value() {
        let query = SubscribedQuery::new("new_oracle_request", "id");
        let mut attributes = std::collections::HashMap::new();
        attributes.insert("new_oracle_request.id".to_string(), vec!["not-a-number".to_string()]);
        let event = RawEvent { attributes };
        assert_eq!(event.request_id_for(&query), None);
    }

    #[test]
    fn validate_basic_rejects_empty_raw_data() {
        let report = OracleReport {
            request_id: 1,
            raw_data: String::new(),
            nonce: 1,
            provider: "addr".to_string(),
            signature: vec![1],
        };
        assert!(report.validate_basic().is_err());
    }
}
