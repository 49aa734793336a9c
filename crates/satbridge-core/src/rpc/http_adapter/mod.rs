//! Native JSON-RPC client for Bitcoin Core.
//!
//! Implements [`NodeRpc`](super::NodeRpc) over HTTP using `reqwest`, with
//! optional request rate limiting, single and batched calls, basic or cookie
//! auth, wallet-scoped endpoints, and an LRU block-height cache.

mod client;
mod connection;
mod parsing;
mod protocol;

pub use client::{HttpRpcClient, RpcEndpoint};
