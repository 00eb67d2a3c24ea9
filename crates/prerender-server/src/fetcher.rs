//! Package fetching over HTTP.
//!
//! The fetcher issues GETs for JavaScript packages through one process-wide
//! reqwest client, which doubles as the keep-alive connection pool. Failed
//! attempts are retried on a fixed schedule: transport errors, timeouts and
//! non-2xx statuses (a CDN 404 is frequently transient during a deploy) all
//! retry until the attempt limit is exhausted. Malformed URLs never reach
//! this layer; they are input errors.
//!
//! The [`PackageSource`] trait is the seam between the cache and the
//! network, so cache behavior is testable with scripted sources.

use bytes::Bytes;
use futures::future::BoxFuture;
use prerender_common::protocol::FetchFailure;
use url::Url;

use crate::config::FetcherConfig;

/// Where package bytes come from.
///
/// The production implementation is [`HttpFetcher`]; tests substitute
/// counting or failing sources.
pub trait PackageSource: Send + Sync {
    fn fetch(&self, url: Url) -> BoxFuture<'static, Result<Bytes, FetchFailure>>;
}

/// HTTP package fetcher with fixed-schedule retry.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    config: FetcherConfig,
}

impl HttpFetcher {
    /// Creates a fetcher over a shared HTTP client.
    ///
    /// The client should be shared process-wide: reqwest pools keep-alive
    /// connections per client, not per request.
    pub fn new(client: reqwest::Client, config: FetcherConfig) -> Self {
        Self { client, config }
    }

    async fn fetch_with_retry(
        client: reqwest::Client,
        config: FetcherConfig,
        url: Url,
    ) -> Result<Bytes, FetchFailure> {
        let mut last_failure = None;

        for attempt in 1..=config.attempts {
            if attempt > 1 {
                tracing::info!(
                    url = %url,
                    attempt,
                    max_attempts = config.attempts,
                    "retrying package fetch"
                );
                tokio::time::sleep(config.retry_delay).await;
            }

            match Self::try_fetch(&client, &config, &url).await {
                Ok(bytes) => return Ok(bytes),
                Err(failure) => {
                    tracing::debug!(url = %url, attempt, cause = %failure.cause, "package fetch attempt failed");
                    last_failure = Some(failure);
                }
            }
        }

        Err(last_failure.unwrap_or_else(|| FetchFailure {
            url: url.to_string(),
            last_status: None,
            cause: "no fetch attempts were made".to_string(),
        }))
    }

    async fn try_fetch(
        client: &reqwest::Client,
        config: &FetcherConfig,
        url: &Url,
    ) -> Result<Bytes, FetchFailure> {
        let response = client
            .get(url.clone())
            .timeout(config.attempt_timeout)
            .send()
            .await
            .map_err(|e| FetchFailure {
                url: url.to_string(),
                last_status: None,
                cause: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure {
                url: url.to_string(),
                last_status: Some(status.as_u16()),
                cause: format!("status {}", status.as_u16()),
            });
        }

        response.bytes().await.map_err(|e| FetchFailure {
            url: url.to_string(),
            last_status: Some(status.as_u16()),
            cause: format!("failed to read response body: {}", e),
        })
    }
}

impl PackageSource for HttpFetcher {
    fn fetch(&self, url: Url) -> BoxFuture<'static, Result<Bytes, FetchFailure>> {
        let client = self.client.clone();
        let config = self.config.clone();
        Box::pin(Self::fetch_with_retry(client, config, url))
    }
}
