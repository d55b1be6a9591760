//! Blockchain read access.
//!
//! `ChainReader` is the only upstream capability the venue sources need.
//! The production implementation talks JSON-RPC over HTTP through `web3`
//! and bounds in-flight requests with a semaphore; each request holds a
//! lease that is released when the request finishes or is dropped.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Semaphore;
use tracing::trace;
use web3::transports::Http;
use web3::types::{Address, Bytes, CallRequest, U256};
use web3::Web3;

use crate::types::VenueFetchFailure;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// `eth_call` against the latest block.
    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, VenueFetchFailure>;

    async fn block_number(&self) -> Result<u64, VenueFetchFailure>;

    /// Current gas price in wei of the native token.
    async fn gas_price(&self) -> Result<U256, VenueFetchFailure>;
}

pub struct Web3ChainReader {
    web3: Web3<Http>,
    leases: Arc<Semaphore>,
}

impl Web3ChainReader {
    pub fn new(url: &SecretString, max_concurrent_requests: usize) -> Result<Self, web3::Error> {
        let transport = Http::new(url.expose_secret())?;
        Ok(Self {
            web3: Web3::new(transport),
            leases: Arc::new(Semaphore::new(max_concurrent_requests.max(1))),
        })
    }

    async fn lease(&self) -> Result<tokio::sync::SemaphorePermit<'_>, VenueFetchFailure> {
        self.leases
            .acquire()
            .await
            .map_err(|_| VenueFetchFailure::Network("rpc connection pool closed".into()))
    }
}

#[async_trait]
impl ChainReader for Web3ChainReader {
    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, VenueFetchFailure> {
        let _lease = self.lease().await?;
        let request = CallRequest {
            to: Some(to),
            data: Some(Bytes(data)),
            ..Default::default()
        };
        let result = self.web3.eth().call(request, None).await.map_err(classify)?;
        trace!(to = ?to, bytes = result.0.len(), "eth_call");
        Ok(result.0)
    }

    async fn block_number(&self) -> Result<u64, VenueFetchFailure> {
        let _lease = self.lease().await?;
        let block = self.web3.eth().block_number().await.map_err(classify)?;
        Ok(block.as_u64())
    }

    async fn gas_price(&self) -> Result<U256, VenueFetchFailure> {
        let _lease = self.lease().await?;
        self.web3.eth().gas_price().await.map_err(classify)
    }
}

/// Map transport-level errors onto the venue failure taxonomy.
fn classify(err: web3::Error) -> VenueFetchFailure {
    match err {
        web3::Error::Decoder(msg) | web3::Error::InvalidResponse(msg) => {
            VenueFetchFailure::MalformedResponse(msg)
        }
        web3::Error::Rpc(rpc) => VenueFetchFailure::Network(format!("rpc error: {rpc}")),
        other => VenueFetchFailure::Network(other.to_string()),
    }
}
