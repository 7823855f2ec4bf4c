//! Chain RPC access (§4, §6).
//!
//! The blockchain state machine itself is out of scope (§1 Non-goals) — this
//! module only speaks the wire protocol a Cosmos-SDK-flavored chain exposes:
//! tendermint websocket event subscriptions plus a handful of query/broadcast
//! RPCs.

mod client;

pub use client::{ChainClient, RpcChainClient};

#[cfg(test)]
pub use client::MockChainClient;
