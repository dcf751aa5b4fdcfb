//! Typed wrappers over contract view methods.
//!
//! A call site always names the height it wants; [`ViewCaller`] decides how
//! that height is expressed for the configured node mode.

mod delegation;
mod distributor;
mod nodes;
mod token;
mod validator;

pub use delegation::DelegationCaller;
pub use distributor::DistributorCaller;
pub use nodes::NodesCaller;
pub use token::TokenCaller;
pub use validator::ValidatorServiceCaller;


use alloy::dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt};
use alloy::json_abi::Function;
use alloy::primitives::Bytes;
use skale_common::{IndexerError, Result};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::registry::ContractBinding;
use crate::transport::{CallOpts, ChainTransport};

pub const DEFAULT_VIEW_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeMode {
    #[default]
    Archive,
    Recent,
}

impl FromStr for NodeMode {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "archive" => Ok(NodeMode::Archive),
            "recent" => Ok(NodeMode::Recent),
            other => Err(IndexerError::Config(format!("unknown node mode {}", other))),
        }
    }
}

pub struct ViewCaller {
    transport: Arc<dyn ChainTransport>,
    mode: NodeMode,
    timeout: Duration,
}

impl ViewCaller {
    pub fn new(transport: Arc<dyn ChainTransport>, mode: NodeMode, timeout: Duration) -> Self {
        Self {
            transport,
            mode,
            timeout,
        }
    }

    pub fn transport(&self) -> &Arc<dyn ChainTransport> {
        &self.transport
    }

    pub fn mode(&self) -> NodeMode {
        self.mode
    }

    /// Call options reading state at `height`. Height zero means "whatever
    /// the node considers current". A recent-state node only answers for the
    /// head, so any lower height is refused.
    pub async fn call_opts(&self, height: u64) -> Result<CallOpts> {
        match self.mode {
            NodeMode::Archive if height == 0 => Ok(CallOpts::pending()),
            NodeMode::Archive => Ok(CallOpts::at(height)),
            NodeMode::Recent if height == 0 => Ok(CallOpts::latest()),
            NodeMode::Recent => {
                let head = self.fetch_head().await?;
                if height < head {
                    return Err(IndexerError::NotSupported(format!(
                        "state at block {} needs an archive node (head is {})",
                        height, head
                    )));
                }
                Ok(CallOpts::latest())
            }
        }
    }

    async fn fetch_head(&self) -> Result<u64> {
        let head = tokio::time::timeout(self.timeout, self.transport.get_current_block_height())
            .await
            .map_err(|_| IndexerError::Timeout("eth_blockNumber".to_string()))??;
        Ok(head)
    }

    pub fn bind(self: &Arc<Self>, binding: Arc<ContractBinding>) -> BoundContract {
        BoundContract {
            view: Arc::clone(self),
            binding,
        }
    }
}

/// A contract binding paired with the caller that executes its views
#[derive(Clone)]
pub struct BoundContract {
    view: Arc<ViewCaller>,
    binding: Arc<ContractBinding>,
}

impl BoundContract {
    pub fn binding(&self) -> &Arc<ContractBinding> {
        &self.binding
    }

    fn function(&self, method: &str) -> Result<&Function> {
        self.binding
            .abi
            .function(method)
            .and_then(|overloads| overloads.first())
            .ok_or_else(|| {
                IndexerError::NotFound(format!(
                    "method {} not in {} {} ABI",
                    method, self.binding.name, self.binding.version
                ))
            })
    }

    /// `eth_call` with explicit options, returning the undecoded output.
    pub async fn raw_call(&self, opts: CallOpts, method: &str, args: &[DynSolValue]) -> Result<Bytes> {
        let function = self.function(method)?;
        let input = function
            .abi_encode_input(args)
            .map_err(|e| IndexerError::InvalidParameter(format!("{}: {}", method, e)))?;

        let output = tokio::time::timeout(
            self.view.timeout,
            self.view.transport.call(opts, self.binding.address, Bytes::from(input)),
        )
        .await
        .map_err(|_| IndexerError::Timeout(format!("{}.{}", self.binding.name, method)))??;

        if output.is_empty() {
            return Err(IndexerError::EmptyResponse);
        }
        Ok(output)
    }

    /// Call `method` against state at `height` and decode its outputs.
    pub async fn call(&self, height: u64, method: &str, args: &[DynSolValue]) -> Result<Vec<DynSolValue>> {
        let opts = self.view.call_opts(height).await?;
        let output = self.raw_call(opts, method, args).await?;
        let values = self
            .function(method)?
            .abi_decode_output(&output)
            .map_err(|e| IndexerError::Decode(format!("{} output: {}", method, e)))?;
        if values.is_empty() {
            return Err(IndexerError::EmptyResponse);
        }
        Ok(values)
    }
}
