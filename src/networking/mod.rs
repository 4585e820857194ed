use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, warn};
use reqwest::Client;
use reqwest::header::ACCEPT;

use crate::error::{ManagerError, Result};
use crate::util::{cancel_requested, format_speed, progress_percent};

const USER_AGENT: &str = concat!("nuphillion-manager/", env!("CARGO_PKG_VERSION"));
const GITHUB_API_HOST: &str = "api.github.com";
/// Upper bound on the buffer reserved from a server-reported `Content-Length`.
const MAX_PREALLOCATION: u64 = 64 << 20;

/// Receives `(downloaded, total)` after every chunk.
pub type ChunkCallback<'a> = &'a mut (dyn FnMut(u64, Option<u64>) + Send);

/// Outcome of a fetch that did not fail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fetched {
    Complete(Vec<u8>),
    Cancelled,
}

/// Byte source for everything the manager pulls from the network.
///
/// The production implementation is [`HttpFetcher`]; tests and embedders can inject their
/// own. Implementations must poll `cancel` between chunks and return
/// [`Fetched::Cancelled`] instead of partial content once it is raised.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        cancel: &AtomicBool,
        on_chunk: ChunkCallback<'_>,
    ) -> Result<Fetched>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(10 * 60))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|err| {
                warn!("network client: falling back to default HTTP client configuration ({err})");
                Client::new()
            });
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        cancel: &AtomicBool,
        on_chunk: ChunkCallback<'_>,
    ) -> Result<Fetched> {
        if cancel_requested(cancel) {
            return Ok(Fetched::Cancelled);
        }
        let mut request = self.client.get(url);
        if url.contains(GITHUB_API_HOST) {
            request = request.header(ACCEPT, "application/vnd.github+json");
        }
        let response = request
            .send()
            .await
            .map_err(|e| ManagerError::Network(format!("request to {url} failed: {e}")))?
            .error_for_status()?;

        let total = response.content_length();
        let mut stream = response.bytes_stream();
        let mut body = Vec::with_capacity(initial_capacity(total));
        let mut last_tick = Instant::now();
        let mut last_bytes = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ManagerError::Network(format!("stream error: {e}")))?;
            body.extend_from_slice(&chunk);
            let downloaded = body.len() as u64;
            on_chunk(downloaded, total);

            if cancel_requested(cancel) {
                debug!("fetch: cancelled after {downloaded} bytes of {url}");
                return Ok(Fetched::Cancelled);
            }

            let elapsed = last_tick.elapsed().as_secs_f32();
            if elapsed > 0.5 {
                debug!(
                    "fetch: {} {:.1}% at {}",
                    url,
                    progress_percent(downloaded, total),
                    format_speed((downloaded - last_bytes) as f32 / elapsed)
                );
                last_tick = Instant::now();
                last_bytes = downloaded;
            }
        }

        if let Some(total) = total
            && (body.len() as u64) < total
        {
            return Err(ManagerError::Network(format!(
                "download incomplete: received {} of {} bytes",
                body.len(),
                total
            )));
        }

        Ok(Fetched::Complete(body))
    }
}

fn initial_capacity(total: Option<u64>) -> usize {
    total.unwrap_or(0).min(MAX_PREALLOCATION) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn reported_length_caps_the_reservation() {
        assert_eq!(initial_capacity(None), 0);
        assert_eq!(initial_capacity(Some(1_024)), 1_024);
        assert_eq!(initial_capacity(Some(u64::MAX)), MAX_PREALLOCATION as usize);
    }

    #[tokio::test]
    async fn raised_flag_short_circuits_before_request() {
        let fetcher = HttpFetcher::with_timeout(Duration::from_secs(1));
        let cancel = AtomicBool::new(true);
        let mut calls = 0;
        let outcome = fetcher
            .fetch("http://127.0.0.1:9/never", &cancel, &mut |_, _| calls += 1)
            .await
            .unwrap();
        assert_eq!(outcome, Fetched::Cancelled);
        assert_eq!(calls, 0);
        assert!(cancel.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_network_error() {
        let fetcher = HttpFetcher::with_timeout(Duration::from_secs(2));
        let cancel = AtomicBool::new(false);
        let err = fetcher
            .fetch("http://127.0.0.1:9/never", &cancel, &mut |_, _| {})
            .await
            .unwrap_err();
        assert!(err.is_network());
    }
}
