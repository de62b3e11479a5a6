//! This client fetches the index and the calendars from the upstream.

use std::{future::Future, sync::Arc};

use reqwest::Url;
use tracing::debug;
use url::Position;

use crate::{
    config::{Config, Credentials},
    error::{Error, Result},
    metrics::Metrics,
};

/// Something calendars can be fetched from.
///
/// Implemented by [`Fetcher`] for the real upstream.
pub trait Source: Send + Sync + 'static {
    /// Get the raw body behind `url`.
    fn fetch(&self, url: Url) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// Authenticated HTTP client for the upstream.
pub struct Fetcher {
    client: reqwest::Client,
    credentials: Credentials,
    metrics: Arc<dyn Metrics>,
}

impl Fetcher {
    pub fn new(config: &Config, metrics: Arc<dyn Metrics>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.fetch_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(Error::Client)?;
        Ok(Self {
            client,
            credentials: config.credentials.clone(),
            metrics,
        })
    }

    /// Get the body of a `GET` request to `url`.
    ///
    /// Any status outside of `2xx` is an error.
    pub async fn get(&self, url: Url) -> Result<Vec<u8>> {
        self.metrics.outbound_request();
        debug!(%url, "fetching");
        let response = self
            .client
            .get(url.clone())
            .basic_auth(&self.credentials.user, Some(&self.credentials.pass))
            .send()
            .await
            .map_err(|source| Error::Request {
                url: url.clone(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status { url, status });
        }
        let body = response
            .bytes()
            .await
            .map_err(|source| Error::Body { url, source })?;
        Ok(body.to_vec())
    }
}

impl Source for Fetcher {
    fn fetch(&self, url: Url) -> impl Future<Output = Result<Vec<u8>>> + Send {
        self.get(url)
    }
}

/// Build the URL of a locator listed in the index at `base`.
///
/// Scheme, host and port are taken from `base`, the path is the locator.
/// Credentials, query and fragment of `base` are not carried over.
pub fn resolve(base: &Url, locator: &str) -> Result<Url> {
    if locator.is_empty() {
        return Err(Error::EmptyLocator);
    }
    let authority = &base[Position::BeforeHost..Position::AfterPort];
    let mut url = Url::parse(&format!("{}://{}", base.scheme(), authority)).map_err(|source| {
        Error::Locator {
            locator: locator.to_owned(),
            source,
        }
    })?;
    url.set_path(locator);
    Ok(url)
}
