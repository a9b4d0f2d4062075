//! chainsync-rpc: JSON-RPC over HTTP for the ChainSync engines.
//!
//! [`HttpChainClient`] implements [`chainsync_core::ChainClient`] against
//! any Ethereum node endpoint (`eth_blockNumber`, `eth_getCode`,
//! `eth_getBlockByNumber`, `eth_getLogs`, `eth_getBalance`,
//! `eth_getTransactionReceipt`).

pub mod http;
pub mod request;

pub use http::{HttpChainClient, HttpClientConfig};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
