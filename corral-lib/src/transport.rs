//! The seam between the dispatcher and the network.
//!
//! A [`Transport`] performs exactly one `GET` per call and reports the raw
//! outcome. Status interpretation and JSON decoding happen in the
//! dispatcher, so alternative transports (test doubles, other HTTP stacks)
//! only need to move bytes.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use log::trace;
use url::Url;

use crate::{ErrorKind, RawResponse, RequestOptions, Result};

/// Performs a single network call
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Issue a `GET` request for `url`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Transport`] if no response could be obtained.
    /// Any response, whatever its status, is returned as `Ok`.
    async fn send(&self, url: &Url, options: &RequestOptions) -> Result<RawResponse>;
}

#[async_trait]
impl<T> Transport for Arc<T>
where
    T: Transport + ?Sized,
{
    async fn send(&self, url: &Url, options: &RequestOptions) -> Result<RawResponse> {
        (**self).send(url, options).await
    }
}

/// The default [`Transport`], backed by a [`reqwest::Client`]
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Use an existing `reqwest` client, e.g. one with a custom proxy setup
    #[must_use]
    pub const fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl From<reqwest::Client> for ReqwestTransport {
    fn from(client: reqwest::Client) -> Self {
        Self::new(client)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, url: &Url, options: &RequestOptions) -> Result<RawResponse> {
        trace!("GET {url}");
        let response = self
            .client
            .get(url.clone())
            .headers(options.headers.clone())
            .send()
            .await
            .map_err(|e| ErrorKind::transport(url.as_str(), e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ErrorKind::transport(url.as_str(), e))?;

        Ok(RawResponse::new(status, text))
    }
}
