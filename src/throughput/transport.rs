//! HTTP transport used by the transfer workers.
//!
//! Workers only see the [`Transport`] trait: the production implementation is
//! [`HttpTransport`] over `reqwest`, tests substitute their own.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client, StatusCode};
use thiserror::Error;

use super::payload::InstrumentedPayload;

/// Failure of a single transfer attempt. Ends the worker, never the session.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: StatusCode },

    #[error("body stream failed: {0}")]
    Body(#[from] std::io::Error),
}

/// Stream of response body chunks of arbitrary size.
pub type ChunkStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a GET stream to `url`.
    async fn open_download(&self, url: &str) -> Result<ChunkStream, TransferError>;

    /// Send `payload` to `url` and wait for the response to complete.
    async fn upload(&self, url: &str, payload: InstrumentedPayload) -> Result<(), TransferError>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration, user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }

    fn check_status(url: &str, response: reqwest::Response) -> Result<reqwest::Response, TransferError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(TransferError::Status {
                url: url.to_string(),
                status,
            })
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open_download(&self, url: &str) -> Result<ChunkStream, TransferError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| TransferError::Request {
                url: url.to_string(),
                source,
            })?;
        let response = Self::check_status(url, response)?;

        Ok(response
            .bytes_stream()
            .map_err(std::io::Error::other)
            .boxed())
    }

    async fn upload(&self, url: &str, payload: InstrumentedPayload) -> Result<(), TransferError> {
        let len = payload.len();
        let response = self
            .client
            .post(url)
            .header(CONTENT_LENGTH, len)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(Body::wrap_stream(payload))
            .send()
            .await
            .map_err(|source| TransferError::Request {
                url: url.to_string(),
                source,
            })?;
        let response = Self::check_status(url, response)?;

        // Drain the reply so the connection can be reused.
        response.bytes().await.map_err(|source| TransferError::Request {
            url: url.to_string(),
            source,
        })?;
        Ok(())
    }
}
