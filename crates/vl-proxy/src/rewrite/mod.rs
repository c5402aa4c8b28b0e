//! Response rewriting for matched routes.
//!
//! [`Rewriter::wants`] decides, before the upstream body is read, whether a
//! matched response concerns a virtual library at all; everything else is
//! streamed through untouched. For the rest, the body is buffered, decoded,
//! rewritten by the route's handler and re-encoded under the upstream's
//! `Content-Encoding`. A failing handler never fails the request: the
//! original response goes back to the client as it arrived.

mod artwork;
mod detail;
mod items;
mod latest;
pub mod template;
mod views;

use axum::http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use vl_codec::ContentEncoding;
use vl_core::config::HarvestConfig;
use vl_core::{Error, HidePolicy, IdentityRegistry, Result};

use crate::harvest::Harvester;
use crate::resolver::CollectionResolver;
use crate::routes::Route;
use crate::upstream::CallerContext;

pub use artwork::{sniff_content_type, BUNDLED_PLACEHOLDER};

/// A fully buffered upstream response.
#[derive(Debug, Clone)]
pub struct ProxiedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A new body for a rewritten response, before encoding.
#[derive(Debug)]
struct Replacement {
    body: Vec<u8>,
    content_type: &'static str,
}

impl Replacement {
    fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)
            .map_err(|e| Error::Internal(format!("failed to serialize rewritten body: {e}")))?;
        Ok(Self {
            body,
            content_type: "application/json",
        })
    }

    /// Swap the body into `response` under `encoding`, forcing `200 OK`.
    fn apply(self, encoding: ContentEncoding, response: &ProxiedResponse) -> Result<ProxiedResponse> {
        let body = encoding.encode(&self.body)?;

        let mut headers = response.headers.clone();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(self.content_type));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        match encoding.header_value() {
            Some(value) => {
                headers.insert(CONTENT_ENCODING, HeaderValue::from_static(value));
            }
            None => {
                headers.remove(CONTENT_ENCODING);
            }
        }

        Ok(ProxiedResponse {
            status: StatusCode::OK,
            headers,
            body: Bytes::from(body),
        })
    }
}

fn decode_json<T: DeserializeOwned>(encoding: ContentEncoding, body: &[u8]) -> Result<T> {
    let raw = encoding.decode(body)?;
    serde_json::from_slice(&raw).map_err(|e| Error::decode(format!("upstream body: {e}")))
}

/// Everything the route handlers need, shared across requests.
#[derive(Clone)]
pub struct Rewriter {
    registry: IdentityRegistry,
    resolver: CollectionResolver,
    hide: HidePolicy,
    harvest: HarvestConfig,
    placeholder: Bytes,
    harvester: Harvester,
}

impl Rewriter {
    pub fn new(
        registry: IdentityRegistry,
        resolver: CollectionResolver,
        hide: HidePolicy,
        harvest: HarvestConfig,
        placeholder: Bytes,
        harvester: Harvester,
    ) -> Self {
        Self {
            registry,
            resolver,
            hide,
            harvest,
            placeholder,
            harvester,
        }
    }

    /// Whether the response to this request has to be buffered and rewritten.
    pub fn wants(&self, route: &Route, caller: &CallerContext) -> bool {
        match route {
            Route::Views { .. } => true,
            Route::LatestItems { .. } | Route::ItemListing { .. } => caller
                .query_param("ParentId")
                .is_some_and(|id| self.registry.is_managed(id)),
            Route::ItemDetail { item_id, .. } => self.registry.is_managed(item_id),
            Route::PrimaryImage { .. } => artwork::managed_tag(caller)
                .is_some_and(|tag| self.registry.is_managed(tag)),
        }
    }

    /// Rewrite a buffered response. Never fails; on error the response is
    /// returned unchanged.
    pub async fn rewrite(
        &self,
        route: &Route,
        caller: &CallerContext,
        response: ProxiedResponse,
    ) -> ProxiedResponse {
        let declared = response
            .headers
            .get(CONTENT_ENCODING)
            .map(|v| v.to_str().unwrap_or("invalid"));
        let encoding = match ContentEncoding::from_header(declared) {
            Ok(encoding) => encoding,
            Err(e) => {
                tracing::warn!(route = route.name(), error = %e, "Cannot rewrite response");
                return response;
            }
        };

        let outcome = match route {
            Route::Views { .. } => views::rewrite(self, &response, encoding),
            Route::LatestItems { .. } => latest::rewrite(self, caller).await,
            Route::ItemListing { .. } => items::rewrite(self, caller, &response, encoding).await,
            Route::ItemDetail { item_id, .. } => detail::rewrite(self, item_id),
            Route::PrimaryImage { .. } => artwork::rewrite(self, caller).await,
        };

        let replacement = match outcome {
            Ok(Some(replacement)) => replacement,
            Ok(None) => return response,
            Err(e) => {
                tracing::warn!(route = route.name(), error = %e, "Rewrite failed, passing response through");
                return response;
            }
        };

        match replacement.apply(encoding, &response) {
            Ok(rewritten) => {
                tracing::debug!(
                    route = route.name(),
                    encoding = %encoding,
                    bytes = rewritten.body.len(),
                    "Rewrote response"
                );
                if matches!(route, Route::Views { .. }) {
                    self.trigger_harvests();
                }
                rewritten
            }
            Err(e) => {
                tracing::warn!(route = route.name(), error = %e, "Re-encoding failed, passing response through");
                response
            }
        }
    }

    fn trigger_harvests(&self) {
        for library in self.registry.libraries() {
            self.harvester.spawn(library.clone());
        }
    }
}
