//! HTTP liveness probe.
//!
//! A drone counts as up once its HTTP server answers at all; the status
//! code only distinguishes `Healthy` from `Unhealthy` for logging.

use std::future::Future;
use std::time::Duration;

use http::Method;
use tracing::debug;

/// Result of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The endpoint returned 2xx.
    Healthy,
    /// The endpoint answered with a non-2xx status.
    Unhealthy,
    /// No HTTP response (connection error or timeout).
    Failed,
}

impl ProbeResult {
    /// Whether an HTTP server answered.
    pub fn is_responsive(self) -> bool {
        !matches!(self, ProbeResult::Failed)
    }
}

/// Checks whether a drone at `address` (`ip:port`) is serving.
pub trait ReadinessProbe: Send + Sync + 'static {
    fn probe(&self, address: &str) -> impl Future<Output = ProbeResult> + Send;
}

/// `HEAD /` over HTTP/1.1.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    path: String,
    timeout: Option<Duration>,
}

impl HttpProbe {
    pub fn new() -> Self {
        Self {
            path: "/".to_string(),
            timeout: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessProbe for HttpProbe {
    async fn probe(&self, address: &str) -> ProbeResult {
        http_probe(address, &self.path, Method::HEAD, self.timeout).await
    }
}

/// Perform one HTTP request against `address` and classify the outcome.
///
/// Without a timeout the probe waits as long as the OS keeps the
/// connection attempt alive.
pub async fn http_probe(
    address: &str,
    path: &str,
    method: Method,
    timeout: Option<Duration>,
) -> ProbeResult {
    let attempt = send_probe(address, path, method);
    match timeout {
        None => attempt.await,
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(result) => result,
            Err(_) => {
                debug!(%address, path, "probe timed out");
                ProbeResult::Failed
            }
        },
    }
}

async fn send_probe(address: &str, path: &str, method: Method) -> ProbeResult {
    let uri = format!("http://{address}{path}");

    let stream = match tokio::net::TcpStream::connect(address).await {
        Ok(s) => s,
        Err(e) => {
            debug!(error = %e, %uri, "probe connection failed");
            return ProbeResult::Failed;
        }
    };

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
        Ok(pair) => pair,
        Err(e) => {
            debug!(error = %e, %uri, "probe handshake failed");
            return ProbeResult::Failed;
        }
    };

    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = match http::Request::builder()
        .method(method)
        .uri(&uri)
        .header("host", address)
        .header("user-agent", "hive-drone/0.1")
        .body(http_body_util::Empty::<bytes::Bytes>::new())
    {
        Ok(req) => req,
        Err(e) => {
            debug!(error = %e, %uri, "invalid probe request");
            return ProbeResult::Failed;
        }
    };

    match sender.send_request(req).await {
        Ok(resp) if resp.status().is_success() => ProbeResult::Healthy,
        Ok(resp) => {
            debug!(status = %resp.status(), %uri, "probe non-2xx");
            ProbeResult::Unhealthy
        }
        Err(e) => {
            debug!(error = %e, %uri, "probe request failed");
            ProbeResult::Failed
        }
    }
}
