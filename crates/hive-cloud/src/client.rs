//! DigitalOcean API client.
//!
//! Every call goes through one request loop:
//!
//! - network failure or malformed JSON → random backoff, retry
//! - 429 → sleep until the `ratelimit-reset` epoch, then backoff and retry
//! - any other non-2xx → `CloudError::Api`, no retry
//!
//! Retries are unbounded under the default policy.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::future::try_join_all;
use hive_core::{CloudConfig, RetryPolicy};
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::droplet::Droplet;
use crate::error::{CloudError, CloudResult};
use crate::provisioner::Provisioner;
use crate::types::*;

pub const API_URL: &str = "https://api.digitalocean.com/v2";

/// Largest batch `POST /droplets` accepts.
pub const MAX_DROPLETS: usize = 10;

const RATE_LIMIT_RESET: &str = "ratelimit-reset";

/// Client for the DigitalOcean v2 API.
#[derive(Debug, Clone)]
pub struct DigitalOcean {
    http: reqwest::Client,
    base_url: String,
    token: String,
    retry: RetryPolicy,
    poll: RetryPolicy,
}

impl DigitalOcean {
    pub fn new(token: impl Into<String>) -> CloudResult<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(CloudError::MissingToken);
        }

        let http = reqwest::Client::builder()
            .user_agent("hive-proxy/0.1")
            .build()
            .map_err(|e| CloudError::Client(e.to_string()))?;

        Ok(Self {
            http,
            base_url: API_URL.to_string(),
            token,
            retry: RetryPolicy::api(),
            poll: RetryPolicy::droplet_poll(),
        })
    }

    /// Build a client from the `[cloud]` config section.
    pub fn from_config(config: &CloudConfig) -> CloudResult<Self> {
        let token = config.resolve_token().ok_or(CloudError::MissingToken)?;
        let mut client = Self::new(token)?;
        if let Some(url) = &config.api_url {
            client = client.with_base_url(url);
        }
        Ok(client.with_poll(RetryPolicy::droplet_poll().with_max_attempts(config.poll_attempts)))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Backoff between retried API calls.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Delay between droplet status polls.
    pub fn with_poll(mut self, poll: RetryPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Create one batch of at most `MAX_DROPLETS` and wait for all of them.
    async fn create_batch(&self, names: &[String], config: &DropletConfig) -> CloudResult<Vec<Droplet>> {
        let body = CreateDropletsRequest {
            image: &config.image,
            names,
            region: &config.region,
            size: &config.size,
            ssh_keys: &config.ssh_keys,
            tags: &config.tags,
        };
        let body = serde_json::to_value(&body).map_err(|e| CloudError::Client(e.to_string()))?;

        let created: CreateDropletsResponse =
            self.request_json(Method::POST, "/droplets", &[], Some(&body)).await?;

        if created.droplets.len() < names.len() {
            return Err(CloudError::ShortBatch {
                requested: names.len(),
                created: created.droplets.len(),
            });
        }
        info!(count = created.droplets.len(), "droplets created, waiting for activation");

        try_join_all(
            created
                .droplets
                .into_iter()
                .map(|droplet| Droplet::activate(self, droplet, &self.poll)),
        )
        .await
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&serde_json::Value>,
    ) -> CloudResult<T> {
        let mut attempts = 0;
        loop {
            let res = self.execute(method.clone(), path, query, body).await?;
            attempts += 1;

            match res.json::<T>().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    debug!(%method, path, error = %e, "malformed response body");
                    self.backoff(path, attempts).await?;
                }
            }
        }
    }

    async fn request_empty(&self, method: Method, path: &str, query: &[(&str, &str)]) -> CloudResult<()> {
        self.execute(method, path, query, None).await.map(drop)
    }

    /// Send until a 2xx response arrives or a permanent error occurs.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&serde_json::Value>,
    ) -> CloudResult<Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempts = 0;

        loop {
            attempts += 1;
            debug!(%method, path, ?query, has_body = body.is_some(), "requesting");

            let mut req = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&self.token)
                .header(CONTENT_TYPE, "application/json");
            if !query.is_empty() {
                req = req.query(query);
            }
            if let Some(body) = body {
                req = req.json(body);
            }

            let res = match req.send().await {
                Ok(res) => res,
                Err(e) => {
                    debug!(%method, path, error = %e, "request failed");
                    self.backoff(path, attempts).await?;
                    continue;
                }
            };

            let status = res.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                let wait = rate_limit_wait(res.headers(), SystemTime::now());
                warn!(path, wait_ms = wait.as_millis() as u64, "rate limited");
                tokio::time::sleep(wait).await;
                self.backoff(path, attempts).await?;
                continue;
            }

            if !status.is_success() {
                let body = res
                    .text()
                    .await
                    .unwrap_or_else(|_| "<not available>".to_string());
                return Err(CloudError::Api {
                    status: status.as_u16(),
                    body,
                });
            }

            return Ok(res);
        }
    }

    async fn backoff(&self, path: &str, attempts: u32) -> CloudResult<()> {
        if !self.retry.allows(attempts) {
            return Err(CloudError::RetriesExhausted {
                what: format!("request to {path}"),
                attempts,
            });
        }
        self.retry.sleep().await;
        Ok(())
    }
}

impl Provisioner for DigitalOcean {
    /// Batches larger than `MAX_DROPLETS` are split and created
    /// concurrently; results keep the order of `names`.
    async fn create_droplets(&self, names: &[String], config: &DropletConfig) -> CloudResult<Vec<Droplet>> {
        if names.len() <= MAX_DROPLETS {
            return self.create_batch(names, config).await;
        }

        let nested = try_join_all(
            names
                .chunks(MAX_DROPLETS)
                .map(|chunk| self.create_batch(chunk, config)),
        )
        .await?;

        Ok(nested.into_iter().flatten().collect())
    }

    async fn retrieve_droplet(&self, id: u64) -> CloudResult<DropletResponse> {
        let res: RetrieveDropletResponse = self
            .request_json(Method::GET, &format!("/droplets/{id}"), &[], None)
            .await?;
        Ok(res.droplet)
    }

    async fn delete_droplet(&self, id: u64) -> CloudResult<()> {
        self.request_empty(Method::DELETE, &format!("/droplets/{id}"), &[])
            .await
    }

    async fn delete_droplets_by_tag(&self, tag: &str) -> CloudResult<()> {
        self.request_empty(Method::DELETE, "/droplets", &[("tag_name", tag)])
            .await
    }

    async fn list_ssh_keys(&self) -> CloudResult<Vec<SshKey>> {
        let res: SshKeysResponse = self
            .request_json(Method::GET, "/account/keys", &[], None)
            .await?;
        Ok(res.ssh_keys)
    }

    async fn list_user_images(&self) -> CloudResult<Vec<Image>> {
        let res: ImagesResponse = self
            .request_json(Method::GET, "/images", &[("private", "true")], None)
            .await?;
        Ok(res.images)
    }
}

/// Time left until the `ratelimit-reset` epoch (seconds). Zero if the
/// header is missing, malformed, or already in the past.
fn rate_limit_wait(headers: &HeaderMap, now: SystemTime) -> Duration {
    let reset = headers
        .get(RATE_LIMIT_RESET)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0);

    (UNIX_EPOCH + Duration::from_secs(reset))
        .duration_since(now)
        .unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers_with_reset(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(RATE_LIMIT_RESET, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn rate_limit_wait_until_reset() {
        let now = UNIX_EPOCH + Duration::from_millis(1_000_000_500);
        let wait = rate_limit_wait(&headers_with_reset("1000002"), now);
        assert_eq!(wait, Duration::from_millis(1_500));
    }

    #[test]
    fn rate_limit_wait_past_reset_is_zero() {
        let now = UNIX_EPOCH + Duration::from_secs(2_000_000);
        assert_eq!(rate_limit_wait(&headers_with_reset("1000000"), now), Duration::ZERO);
    }

    #[test]
    fn rate_limit_wait_missing_header_is_zero() {
        assert_eq!(rate_limit_wait(&HeaderMap::new(), SystemTime::now()), Duration::ZERO);
        assert_eq!(
            rate_limit_wait(&headers_with_reset("soon"), SystemTime::now()),
            Duration::ZERO
        );
    }

    #[test]
    fn empty_token_rejected() {
        assert_eq!(DigitalOcean::new("").unwrap_err(), CloudError::MissingToken);
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let client = DigitalOcean::new("t")
            .unwrap()
            .with_base_url("http://127.0.0.1:1234/v2/");
        assert_eq!(client.base_url(), "http://127.0.0.1:1234/v2");
    }
}
