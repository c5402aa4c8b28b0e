//! Read-only calls to the upstream media server API.
//!
//! Two flavours exist. Caller-scoped calls replay the session of the request
//! being rewritten, so the upstream applies that user's permissions. Privileged
//! calls use the configured API key and are reserved for the harvester.

use std::time::Duration;

use axum::http::HeaderMap;
use bytes::Bytes;
use reqwest::Client;
use serde_json::Value;
use vl_core::config::UpstreamConfig;
use vl_core::{Error, Result};

/// Session parameters replayed on caller-scoped calls.
pub const SESSION_PARAMS: [&str; 6] = [
    "X-Emby-Client",
    "X-Emby-Device-Name",
    "X-Emby-Device-Id",
    "X-Emby-Client-Version",
    "X-Emby-Token",
    "X-Emby-Language",
];

/// Inbound headers copied onto caller-scoped calls. Nothing else is forwarded.
pub const FORWARDED_HEADERS: [&str; 4] = [
    "accept-language",
    "user-agent",
    "x-emby-authorization",
    "cookie",
];

/// What the proxy knows about the client whose response is being rewritten.
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    pub user_id: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
}

impl CallerContext {
    pub fn new(user_id: impl Into<String>, raw_query: Option<&str>, headers: &HeaderMap) -> Self {
        let query = raw_query
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();

        Self {
            user_id: user_id.into(),
            query,
            headers: headers.clone(),
        }
    }

    /// First non-empty value of a query parameter, compared case-insensitively.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, v)| k.eq_ignore_ascii_case(key) && !v.is_empty())
            .map(|(_, v)| v.as_str())
    }

    /// Non-empty value of an inbound header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
    }

    /// Session parameters to add to `query`.
    ///
    /// A key already present in `query` wins, then the original request's
    /// query string, then its headers.
    fn session_params(&self, query: &[(String, String)]) -> Vec<(String, String)> {
        SESSION_PARAMS
            .iter()
            .filter(|key| {
                !query
                    .iter()
                    .any(|(k, v)| k.eq_ignore_ascii_case(key) && !v.is_empty())
            })
            .filter_map(|key| {
                self.query_param(key)
                    .or_else(|| self.header(key))
                    .map(|v| (key.to_string(), v.to_string()))
            })
            .collect()
    }
}

/// HTTP client for the upstream API.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: Client,
    base_url: String,
    path_prefix: String,
    api_key: Option<String>,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build upstream HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url().to_string(),
            path_prefix: config.path_prefix.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
        })
    }

    /// Whether privileged calls are possible.
    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    /// Absolute URL for an API path such as `/Users/1/Views`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, self.path_prefix, path)
    }

    /// GET `path` on behalf of `caller` and decode the JSON body.
    pub async fn fetch_json(
        &self,
        path: &str,
        query: &[(String, String)],
        caller: &CallerContext,
    ) -> Result<Value> {
        let mut params = query.to_vec();
        params.extend(caller.session_params(query));

        let mut request = self
            .client
            .get(self.url(path))
            .query(&params)
            .header("Accept", "application/json");
        for name in FORWARDED_HEADERS {
            if let Some(value) = caller.header(name) {
                request = request.header(name, value);
            }
        }

        let body = self.send(request, path).await?;
        serde_json::from_slice(&body).map_err(|e| Error::decode(format!("{path}: {e}")))
    }

    /// GET `path` with the configured API key and decode the JSON body.
    pub async fn fetch_json_privileged(&self, path: &str, query: &[(String, String)]) -> Result<Value> {
        let body = self.fetch_bytes_privileged(path, query).await?;
        serde_json::from_slice(&body).map_err(|e| Error::decode(format!("{path}: {e}")))
    }

    /// GET `path` with the configured API key and return the raw body.
    pub async fn fetch_bytes_privileged(&self, path: &str, query: &[(String, String)]) -> Result<Bytes> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| Error::transport("no upstream API key configured"))?;

        let request = self
            .client
            .get(self.url(path))
            .query(query)
            .header("X-Emby-Token", api_key);

        self.send(request, path).await
    }

    async fn send(&self, request: reqwest::RequestBuilder, path: &str) -> Result<Bytes> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::transport(format!("{path}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(path, status = %status, "Upstream call returned non-success status");
            return Err(Error::transport(format!("{path} returned {status}")));
        }

        response
            .bytes()
            .await
            .map_err(|e| Error::transport(format!("{path}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn upstream(url: &str, api_key: Option<&str>) -> UpstreamClient {
        UpstreamClient::new(&UpstreamConfig {
            url: url.to_string(),
            api_key: api_key.map(String::from),
            ..UpstreamConfig::default()
        })
        .unwrap()
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn session_params_priority() {
        let caller = CallerContext::new(
            "u1",
            Some("X-Emby-Token=from-query&X-Emby-Client="),
            &headers(&[
                ("x-emby-token", "from-header"),
                ("x-emby-client", "Infuse"),
                ("x-emby-device-id", "dev-1"),
            ]),
        );

        let explicit = vec![("X-Emby-Device-Id".to_string(), "override".to_string())];
        let params = caller.session_params(&explicit);

        assert!(params.contains(&("X-Emby-Token".into(), "from-query".into())));
        // Empty query value falls through to the header.
        assert!(params.contains(&("X-Emby-Client".into(), "Infuse".into())));
        // Already supplied by the call itself.
        assert!(!params.iter().any(|(k, _)| k == "X-Emby-Device-Id"));
        assert!(!params.iter().any(|(k, _)| k == "X-Emby-Language"));
    }

    #[test]
    fn query_param_lookup_is_case_insensitive() {
        let caller = CallerContext::new("u1", Some("parentId=42&Limit=5"), &HeaderMap::new());
        assert_eq!(caller.query_param("ParentId"), Some("42"));
        assert_eq!(caller.query_param("limit"), Some("5"));
        assert_eq!(caller.query_param("SortBy"), None);
    }

    #[tokio::test]
    async fn fetch_json_forwards_allow_listed_headers_only() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/emby/Users/u1/Views"))
            .and(query_param("X-Emby-Token", "tok"))
            .and(header("accept", "application/json"))
            .and(header("user-agent", "Infuse/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"Items": []})))
            .expect(1)
            .mount(&server)
            .await;

        let caller = CallerContext::new(
            "u1",
            Some("X-Emby-Token=tok"),
            &headers(&[("user-agent", "Infuse/7"), ("x-secret", "nope")]),
        );
        let value = upstream(&server.uri(), None)
            .fetch_json("/Users/u1/Views", &[], &caller)
            .await
            .unwrap();
        assert_eq!(value["Items"], serde_json::json!([]));

        let received = server.received_requests().await.unwrap();
        assert!(received[0].headers.get("x-secret").is_none());
    }

    #[tokio::test]
    async fn non_success_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = upstream(&server.uri(), None)
            .fetch_json("/Users/u1/Views", &[], &CallerContext::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Upstream { kind: vl_core::UpstreamErrorKind::Transport, .. }
        ));
    }

    #[tokio::test]
    async fn malformed_json_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = upstream(&server.uri(), None)
            .fetch_json("/Users/u1/Views", &[], &CallerContext::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Upstream { kind: vl_core::UpstreamErrorKind::Decode, .. }
        ));
    }

    #[tokio::test]
    async fn privileged_calls_use_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/emby/Items"))
            .and(header("x-emby-token", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"Items": []})))
            .expect(1)
            .mount(&server)
            .await;

        let client = upstream(&server.uri(), Some("secret"));
        assert!(client.has_credentials());
        client.fetch_json_privileged("/Items", &[]).await.unwrap();

        let anonymous = upstream(&server.uri(), None);
        assert!(anonymous.fetch_bytes_privileged("/Items", &[]).await.is_err());
    }
}
