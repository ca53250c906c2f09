//! Per-operation context: which operation is running and its cancellation
//! signal. Every platform call of an operation goes through [`OperationContext::call`].

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{Operation, PlatformError, ProviderError};

#[derive(Debug, Clone)]
pub struct OperationContext {
    operation: Operation,
    cancel: CancellationToken,
}

impl OperationContext {
    pub fn new(operation: Operation, cancel: &CancellationToken) -> Self {
        Self {
            operation,
            cancel: cancel.clone(),
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> ProviderError {
        ProviderError::Cancelled {
            operation: self.operation,
        }
    }

    /// Runs a platform call, aborting it as soon as the token fires.
    pub async fn call<T, F>(&self, fut: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, PlatformError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.cancelled()),
            res = fut => res.map_err(|e| ProviderError::from_platform(self.operation, e)),
        }
    }
}
