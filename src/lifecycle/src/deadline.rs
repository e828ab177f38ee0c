use std::future::Future;
use std::time::Duration;

use common::store::{StoreError, StoreResult};

/// Upper bound on a single index store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    timeout: Duration,
}

impl Deadline {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Await `call`, failing with [`StoreError::DeadlineExceeded`] once the timeout elapses.
    ///
    /// The call is dropped on expiry; it is never retried.
    pub async fn run<T, F>(&self, operation: &'static str, target: &str, call: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    operation,
                    target = %target,
                    timeout = ?self.timeout,
                    "Index store call exceeded its deadline"
                );
                Err(StoreError::DeadlineExceeded {
                    operation,
                    target: target.to_string(),
                    timeout: self.timeout,
                })
            }
        }
    }
}
