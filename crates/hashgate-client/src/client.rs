//! Public client API: `hash` and `compare`.

use std::time::Duration;

use hashgate_common::{HashgateError, Payload, Result};

use crate::pool::{ConnectionPool, PoolConfig};

/// Client for the remote hashing service.
///
/// Holds nothing but a reference to the pool; clones share it, and any
/// number of tasks may call it concurrently. A call suspends until its
/// completion slot is resolved by the pool (or the optional caller-supplied
/// timeout elapses).
#[derive(Clone)]
pub struct HashClient {
    pool: ConnectionPool,
}

impl HashClient {
    /// Creates a client with its own pool.
    pub fn new(config: PoolConfig) -> Result<Self> {
        Ok(Self {
            pool: ConnectionPool::new(config)?,
        })
    }

    /// Creates a client over an existing pool.
    pub fn with_pool(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Hashes a secret, returning the digest produced by the backend.
    pub async fn hash(&self, secret: &str) -> Result<String> {
        self.hash_inner(secret, None).await
    }

    /// [`hash`](Self::hash) with a caller-supplied deadline.
    pub async fn hash_with_timeout(&self, secret: &str, timeout: Duration) -> Result<String> {
        self.hash_inner(secret, Some(timeout)).await
    }

    /// Compares a secret against a digest.
    pub async fn compare(&self, secret: &str, digest: &str) -> Result<bool> {
        self.compare_inner(secret, digest, None).await
    }

    /// [`compare`](Self::compare) with a caller-supplied deadline.
    pub async fn compare_with_timeout(
        &self,
        secret: &str,
        digest: &str,
        timeout: Duration,
    ) -> Result<bool> {
        self.compare_inner(secret, digest, Some(timeout)).await
    }

    /// Shuts the underlying pool down.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    async fn hash_inner(&self, secret: &str, timeout: Option<Duration>) -> Result<String> {
        if secret.is_empty() {
            return Err(HashgateError::Validation(
                "secret must not be empty".to_string(),
            ));
        }

        let value = self
            .call(
                Payload::Hash {
                    secret: secret.to_string(),
                },
                timeout,
            )
            .await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| HashgateError::Protocol("hash result was not a string".to_string()))
    }

    async fn compare_inner(
        &self,
        secret: &str,
        digest: &str,
        timeout: Option<Duration>,
    ) -> Result<bool> {
        if secret.is_empty() || digest.is_empty() {
            return Err(HashgateError::Validation(
                "secret and digest must not be empty".to_string(),
            ));
        }

        let value = self
            .call(
                Payload::Compare {
                    secret: secret.to_string(),
                    digest: digest.to_string(),
                },
                timeout,
            )
            .await?;
        value
            .as_bool()
            .ok_or_else(|| HashgateError::Protocol("compare result was not a boolean".to_string()))
    }

    /// Submits to the pool and suspends on the completion slot.
    ///
    /// On timeout the call is cancelled out of the queue / pending map so a
    /// late response cannot resolve a slot no one awaits.
    async fn call(
        &self,
        payload: Payload,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value> {
        let handle = self.pool.submit(payload)?;
        match timeout {
            None => handle.rx.await.map_err(|_| HashgateError::Shutdown)?,
            Some(timeout) => match tokio::time::timeout(timeout, handle.rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(HashgateError::Shutdown),
                Err(_) => {
                    self.pool.cancel(handle.id);
                    Err(HashgateError::Timeout(timeout.as_millis() as u64))
                }
            },
        }
    }
}
