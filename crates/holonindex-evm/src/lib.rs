//! holonindex-evm: EVM adapters for holonindex.
//!
//! - [`fetcher`]: JSON-RPC block and log types, range-chunked log fetching
//! - [`http`]: `reqwest` JSON-RPC transport with retry
//! - [`client`]: `ChainClient` delivering contiguous blocks with candidate logs
//! - [`decoder`]: ABI decoding of the holon factory and holon events
//! - [`builder`]: fluent wiring of a `Pipeline`

pub mod builder;
pub mod client;
pub mod decoder;
pub mod fetcher;
pub mod http;

pub use builder::IndexerBuilder;
pub use client::{EvmChainClient, EvmClientConfig};
pub use decoder::{AbiEventDecoder, EventSchema};
pub use fetcher::{EvmFetcher, EvmRpcClient, RpcBlock, RpcLog};
pub use http::{HttpClientConfig, HttpRpcClient};
