//! KV probe client over an established stream.

use std::time::Duration;

use tarpc::context;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::debug;

use crosswire_wire_protocol::{KvHealth, KvServiceClient, PostcardFormat};

use crate::error::{ClientError, Result};

/// Typed client for the KV probe service with a per-call timeout.
#[derive(Clone, Debug)]
pub struct KvClient {
    client: KvServiceClient,
    call_timeout: Duration,
}

impl KvClient {
    /// Build a client over any established duplex stream (plain or TLS).
    pub fn from_stream<S>(stream: S, call_timeout: Duration) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let framed = Framed::new(stream, LengthDelimitedCodec::new());
        let transport = tarpc::serde_transport::new(framed, PostcardFormat);
        let client = KvServiceClient::new(tarpc::client::Config::default(), transport).spawn();
        Self {
            client,
            call_timeout,
        }
    }

    async fn call<T>(
        &self,
        fut: impl std::future::Future<Output = std::result::Result<T, tarpc::client::RpcError>>,
    ) -> Result<T> {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| ClientError::CallTimeout(self.call_timeout))?
            .map_err(ClientError::from)
    }

    /// Readiness ping; also reports entry count and enrichment state.
    pub async fn health_check(&self) -> Result<KvHealth> {
        let health = self.call(self.client.health_check(context::current())).await??;
        debug!(status = %health.status, entries = health.entries, "health check");
        Ok(health)
    }

    pub async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.call(self.client.put(context::current(), key.to_string(), value))
            .await??;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .call(self.client.get(context::current(), key.to_string()))
            .await??)
    }

    /// Like [`get`](Self::get), but a miss is an error.
    pub async fn get_required(&self, key: &str) -> Result<Vec<u8>> {
        self.get(key).await?.ok_or_else(|| ClientError::NotFound {
            key: key.to_string(),
        })
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.call(self.client.delete(context::current(), key.to_string()))
            .await??;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<String>> {
        Ok(self.call(self.client.list(context::current())).await??)
    }
}
