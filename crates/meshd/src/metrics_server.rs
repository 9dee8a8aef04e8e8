//! `/metrics` endpoint.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::Result;

const CONTENT_TYPE_OPENMETRICS: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Binds the metrics listener.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    Ok(TcpListener::bind(addr).await?)
}

/// Serves the registry in text exposition format until cancelled.
pub async fn serve(listener: TcpListener, registry: Arc<Registry>, cancel: CancellationToken) {
    match listener.local_addr() {
        Ok(addr) => info!(addr = %addr, "metrics endpoint listening"),
        Err(e) => warn!(error = %e, "metrics endpoint listening on unknown address"),
    }

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("metrics endpoint shutting down");
                break;
            }
            accept = listener.accept() => {
                match accept {
                    Ok((stream, peer)) => {
                        let registry = Arc::clone(&registry);
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let svc = service_fn(move |req| {
                                let registry = Arc::clone(&registry);
                                async move { handle(&req, &registry) }
                            });
                            if let Err(e) = http1::Builder::new().serve_connection(io, svc).await {
                                if !e.is_incomplete_message() {
                                    warn!(peer = %peer, error = %e, "metrics connection error");
                                }
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "accept failed"),
                }
            }
        }
    }
}

fn handle(req: &Request<Incoming>, registry: &Registry) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    if req.method() != Method::GET || req.uri().path() != "/metrics" {
        return Ok(status(StatusCode::NOT_FOUND));
    }

    let mut body = String::new();
    if let Err(e) = encode(&mut body, registry) {
        error!(error = %e, "failed to encode metrics");
        return Ok(status(StatusCode::INTERNAL_SERVER_ERROR));
    }

    let mut response = Response::new(Full::new(Bytes::from(body)));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_OPENMETRICS));
    Ok(response)
}

fn status(code: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = code;
    response
}
