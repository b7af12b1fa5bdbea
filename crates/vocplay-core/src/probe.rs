//! Media reachability probe
//!
//! Checks whether a media URL answers again before playback is retried.
//! The check is a HEAD request with a cache-busting query parameter, bounded
//! by a short timeout.

use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Reachability check used by the recovery loop
#[async_trait]
pub trait MediaProbe: Send + Sync {
    /// `Ok(())` if the media at `url` is available
    async fn probe(&self, url: &Url) -> Result<()>;
}

/// HEAD-request based probe
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Append a `t=<unix millis>` parameter so intermediary caches are bypassed
pub fn cache_busting_url(url: &Url) -> Url {
    let mut busted = url.clone();
    let stamp = chrono::Utc::now().timestamp_millis().to_string();
    busted.query_pairs_mut().append_pair("t", &stamp);
    busted
}

#[async_trait]
impl MediaProbe for HttpProbe {
    #[instrument(skip(self), fields(url = %url))]
    async fn probe(&self, url: &Url) -> Result<()> {
        let target = cache_busting_url(url);

        let request = self.client.head(target).send();
        let response = match tokio::time::timeout(self.timeout, request).await {
            Err(_) => {
                return Err(Error::ProbeTimeout {
                    url: url.to_string(),
                })
            }
            Ok(Err(e)) if e.is_timeout() => {
                return Err(Error::ProbeTimeout {
                    url: url.to_string(),
                })
            }
            Ok(Err(e)) => {
                return Err(Error::ProbeRequest {
                    url: url.to_string(),
                    source: e,
                })
            }
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        debug!(status = status.as_u16(), "Media probe answered");

        if status.is_success() {
            Ok(())
        } else {
            Err(Error::ProbeStatus {
                url: url.to_string(),
                status: status.as_u16(),
            })
        }
    }
}
