//! chainwatch-evm: EVM JSON-RPC support for ChainWatch.
//!
//! [`EvmChainClient`] implements `chainwatch_core::ChainClient` over any
//! [`RpcTransport`]; [`HttpTransport`] is the `reqwest`-backed transport used
//! in production.

pub mod client;
pub mod error;
pub mod http;
pub mod request;
pub mod transport;

pub use client::EvmChainClient;
pub use error::TransportError;
pub use http::HttpTransport;
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use transport::RpcTransport;
