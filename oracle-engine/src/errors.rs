//! Error taxonomy for the oracle daemon core.
//!
//! Mirrors the conceptual error kinds of the daemon: transient upstream
//! failures are recovered by the liveness/health loops rather than by
//! propagating an error out of a task; only fatal misconfiguration should
//! ever stop the process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OracleError {
    /// Websocket drop, RPC timeout, HTTP 5xx/429. The caller should drop the
    /// individual task and let the subscription/health loop recover.
    #[error("transient upstream error: {0}")]
    Transient(#[source] anyhow::Error),

    /// Provider returned an empty, non-decimal, or fractional value.
    #[error("malformed provider data: {0}")]
    Malformed(String),

    /// Broadcast result code 32/33 — our cached sequence diverged from chain state.
    #[error("sequence diverged from chain state")]
    StateDivergence,

    /// Broadcast result code 18 — already certified / duplicate report.
    #[error("report already certified on-chain")]
    Rejected,

    /// Missing keyring directory, empty home path, no providers for a
    /// chain-declared category: refuse to start.
    #[error("fatal misconfiguration: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, OracleError>;
