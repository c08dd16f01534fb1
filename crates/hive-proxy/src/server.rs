//! Proxy server.
//!
//! `ProxyServer` accepts HTTP/1.1 connections, asks a `TargetResolver`
//! which drone serves each request and relays the request there.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use http::HeaderValue;
use http::header::AUTHORIZATION;
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use hive_pool::TargetResolver;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::convert::{basic_auth, error_response, routing_key, target_uri};

/// Response body: either the streamed drone response or a local error page.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

struct Shared<T> {
    resolver: Arc<T>,
    client: Client<HttpConnector, Incoming>,
    auth: Option<HeaderValue>,
}

/// HTTP front end bound to a local address.
pub struct ProxyServer<T> {
    listener: TcpListener,
    shared: Arc<Shared<T>>,
}

impl<T: TargetResolver> ProxyServer<T> {
    /// Bind `addr`. `auth` is `user:password` added as basic auth to
    /// every forwarded request.
    pub async fn bind(addr: SocketAddr, resolver: Arc<T>, auth: Option<&str>) -> anyhow::Result<Self> {
        let auth = auth.map(basic_auth).transpose()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind proxy on {addr}"))?;
        let client = Client::builder(TokioExecutor::new()).build_http();

        Ok(Self {
            listener,
            shared: Arc::new(Shared {
                resolver,
                client,
                auth,
            }),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("failed to read proxy address")
    }

    /// Serve until `shutdown` changes. Spawns a task per connection.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(addr = %self.local_addr()?, "proxy listening");

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    let (stream, peer_addr) = accept_result.context("accept failed")?;
                    let shared = self.shared.clone();

                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let svc = service_fn(move |req: Request<Incoming>| {
                            let shared = shared.clone();
                            async move {
                                match forward(&shared, req).await {
                                    Ok(resp) => Ok::<_, hyper::Error>(resp),
                                    Err(e) => {
                                        error!(%peer_addr, error = %format!("{e:#}"), "proxy request failed");
                                        Ok(error_response(&e))
                                    }
                                }
                            }
                        });

                        if let Err(e) = http1::Builder::new()
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(%peer_addr, error = %e, "connection error");
                        }
                    });
                }
                _ = shutdown.changed() => {
                    info!("proxy shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

async fn forward<T: TargetResolver>(
    shared: &Shared<T>,
    req: Request<Incoming>,
) -> anyhow::Result<Response<ProxyBody>> {
    let key = routing_key(req.uri());
    let base = shared.resolver.resolve_target(&key).await?;
    let uri = target_uri(&base, req.uri())?;
    debug!(%key, target = %uri, "proxying request");

    let (mut parts, body) = req.into_parts();
    parts.uri = uri.clone();
    if let Some(auth) = &shared.auth {
        parts.headers.insert(AUTHORIZATION, auth.clone());
    }

    let resp = shared
        .client
        .request(Request::from_parts(parts, body))
        .await
        .with_context(|| format!("forwarding to {uri}"))?;

    Ok(resp.map(BodyExt::boxed))
}
