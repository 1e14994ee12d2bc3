use crate::config::FetchConfig;
use crate::traits::{ApiRequest, ApiResponse};
use crate::types::{NewsError, Result};
use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::{Client, Method, Response};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};
use url::Url;

/// reqwest-backed [`ApiRequest`] with bounded timeouts and retries.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self { client, config })
    }

    fn backoff(&self) -> ExponentialBackoff<backoff::SystemClock> {
        let delay = Duration::from_millis(self.config.retry_delay_millis);
        ExponentialBackoff {
            current_interval: delay,
            initial_interval: delay,
            max_interval: delay * 32,
            multiplier: 2.0,
            max_elapsed_time: Some(delay * 60),
            ..Default::default()
        }
    }

    async fn request(&self, method: Method, url: &Url) -> ApiResponse {
        let start_time = Instant::now();
        let mut backoff = self.backoff();
        let mut last_error = None;

        debug!("{} {}", method, url);

        for attempt in 0..=self.config.max_retries {
            match self.send(method.clone(), url).await {
                Ok(response) => {
                    let status = response.status();

                    // Only server errors are worth another attempt.
                    if status.is_server_error() && attempt < self.config.max_retries {
                        if let Some(delay) = backoff.next_backoff() {
                            warn!(
                                "Attempt {} for {} returned {}, retrying in {:?}",
                                attempt + 1,
                                url,
                                status,
                                delay
                            );
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    }

                    return self.read_response(method == Method::HEAD, response, start_time).await;
                }
                Err(e) => {
                    last_error = Some(e);

                    if attempt < self.config.max_retries {
                        if let Some(delay) = backoff.next_backoff() {
                            warn!("Attempt {} failed for {}, retrying in {:?}", attempt + 1, url, delay);
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    }
                    break;
                }
            }
        }

        let error_msg = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string());
        error!(
            "Request failed after {} attempts: {} ({})",
            self.config.max_retries + 1,
            url,
            error_msg
        );

        ApiResponse {
            response_time_ms: start_time.elapsed().as_millis() as u64,
            ..ApiResponse::failed(error_msg)
        }
    }

    async fn send(&self, method: Method, url: &Url) -> Result<Response> {
        let response = self.client.request(method, url.clone()).send().await?;
        Ok(response)
    }

    async fn read_response(&self, head_only: bool, response: Response, start_time: Instant) -> ApiResponse {
        let status = response.status();
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let mut result = ApiResponse {
            http_status: Some(status.as_u16()),
            etag,
            ..Default::default()
        };

        if !status.is_success() {
            result.error = Some(format!(
                "HTTP {}: {}",
                status,
                status.canonical_reason().unwrap_or("Unknown")
            ));
        } else if !head_only {
            if let Some(content_length) = response.content_length() {
                let size_mb = content_length as usize / (1024 * 1024);
                if size_mb > self.config.max_body_size_mb {
                    result.error = Some(format!("Response too large: {}MB", size_mb));
                    result.response_time_ms = start_time.elapsed().as_millis() as u64;
                    return result;
                }
            }

            match response.text().await {
                Ok(content) => {
                    debug!("Received {} bytes", content.len());
                    result.content = Some(content);
                }
                Err(e) => result.error = Some(NewsError::Http(e).to_string()),
            }
        }

        result.response_time_ms = start_time.elapsed().as_millis() as u64;
        result
    }
}

#[async_trait]
impl ApiRequest for Fetcher {
    async fn get(&self, url: &Url) -> ApiResponse {
        self.request(Method::GET, url).await
    }

    async fn head(&self, url: &Url) -> ApiResponse {
        self.request(Method::HEAD, url).await
    }
}
