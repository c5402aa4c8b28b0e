//! The pass-through reverse proxy.
//!
//! Every inbound request lands in [`forward`]. It is replayed against the
//! upstream with hop-by-hop headers removed and `X-Forwarded-*` added. The
//! upstream response is streamed back untouched unless a route matched and
//! the rewriter wants it, in which case it is buffered and rewritten first.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};

use axum::body::{Body, HttpBody};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{CONTENT_TYPE, HOST};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use vl_core::Error;

use crate::context::AppContext;
use crate::rewrite::ProxiedResponse;
use crate::upstream::CallerContext;

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
static X_FORWARDED_PROTOCOL: HeaderName = HeaderName::from_static("x-forwarded-protocol");
static X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// Inbound body stream handed to the upstream request.
///
/// The outgoing body must be `Sync`; the inbound one is only `Send`. It is
/// only ever polled through `&mut`, so the mutex is never contended.
struct InboundBody<S>(Mutex<S>);

impl<S: Stream + Unpin> Stream for InboundBody<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let inner = self
            .get_mut()
            .0
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Pin::new(inner).poll_next(cx)
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named in `Connection` are hop-by-hop too.
    let named: Vec<HeaderName> = headers
        .get_all("connection")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn add_forwarded_headers(headers: &mut HeaderMap, peer: Option<SocketAddr>) {
    if let Some(peer) = peer {
        let ip = peer.ip().to_string();
        let chain = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(prior) if !prior.is_empty() => format!("{prior}, {ip}"),
            _ => ip.clone(),
        };
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert(X_FORWARDED_FOR.clone(), value);
        }
        if let Ok(value) = HeaderValue::from_str(&ip) {
            headers.insert(X_REAL_IP.clone(), value);
        }
    }
    headers.insert(X_FORWARDED_PROTO.clone(), HeaderValue::from_static("http"));
    headers.insert(X_FORWARDED_PROTOCOL.clone(), HeaderValue::from_static("http"));
}

fn error_response(err: &Error) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(CONTENT_TYPE, "application/json")],
        serde_json::json!({ "error": err.to_string() }).to_string(),
    )
        .into_response()
}

/// Fallback handler: proxy the request upstream.
pub async fn forward(State(ctx): State<AppContext>, request: Request) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| path.clone());

    let rewrite = ctx.routes.dispatch(&path).and_then(|route| {
        let caller = CallerContext::new(
            route.user_id().unwrap_or_default(),
            parts.uri.query(),
            &parts.headers,
        );
        ctx.rewriter.wants(&route, &caller).then_some((route, caller))
    });

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    headers.remove(HOST);
    add_forwarded_headers(&mut headers, peer);

    let url = ctx.upstream_url(&path_and_query);
    let mut outbound = ctx
        .forward_client
        .request(parts.method.clone(), &url)
        .headers(headers);
    if body.size_hint().exact() != Some(0) {
        outbound = outbound.body(reqwest::Body::wrap_stream(InboundBody(Mutex::new(
            body.into_data_stream(),
        ))));
    }
    let upstream = outbound.send().await;

    let upstream = match upstream {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(method = %parts.method, path = %path, error = %e, "Upstream unreachable");
            return error_response(&Error::transport(format!("request failed: {e}")));
        }
    };

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    strip_hop_by_hop(&mut response_headers);

    let Some((route, caller)) = rewrite else {
        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        return response;
    };

    let body = match upstream.bytes().await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "Failed to read upstream body");
            return error_response(&Error::transport(format!("body read failed: {e}")));
        }
    };

    tracing::debug!(route = ?route, "Rewriting upstream response");
    let rewritten = ctx
        .rewriter
        .rewrite(
            &route,
            &caller,
            ProxiedResponse {
                status,
                headers: response_headers,
                body,
            },
        )
        .await;

    let mut response = Response::new(Body::from(rewritten.body));
    *response.status_mut() = rewritten.status;
    *response.headers_mut() = rewritten.headers;
    response
}
