//! Request and response helpers for the forwarding path.

use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::{HeaderValue, Response, StatusCode, Uri};
use http_body_util::{BodyExt, Full};

use crate::server::ProxyBody;

/// Routing key for a request: its path and query, `/` if absent.
pub fn routing_key(uri: &Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string())
}

/// Join a drone base URL and the inbound request's path and query.
pub fn target_uri(base: &str, uri: &Uri) -> anyhow::Result<Uri> {
    let target = format!("{}{}", base.trim_end_matches('/'), routing_key(uri));
    target
        .parse()
        .with_context(|| format!("invalid target URI {target:?}"))
}

/// `Authorization` value for `user:password` credentials.
pub fn basic_auth(credentials: &str) -> anyhow::Result<HeaderValue> {
    let value = format!("Basic {}", STANDARD.encode(credentials));
    HeaderValue::from_str(&value).context("invalid basic auth credentials")
}

/// Plain-text 500 carrying the failure message.
pub fn error_response(err: &anyhow::Error) -> Response<ProxyBody> {
    let body = Full::new(Bytes::from(format!("Got error: {err:#}")))
        .map_err(|never| match never {})
        .boxed();
    let mut resp = Response::new(body);
    *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    resp.headers_mut()
        .insert(http::header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    resp
}
