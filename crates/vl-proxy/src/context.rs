//! Shared application state.
//!
//! [`AppContext`] is built once from an immutable configuration snapshot and
//! cloned into every request. All fields are cheap to clone.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use vl_core::{Config, Error, IdentityRegistry, Result};
use vl_db::pool::DbPool;

use crate::harvest::{CommandRenderer, Harvester};
use crate::resolver::CollectionResolver;
use crate::rewrite::{Rewriter, BUNDLED_PLACEHOLDER};
use crate::routes::RouteTable;
use crate::upstream::UpstreamClient;

const FORWARD_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub registry: IdentityRegistry,
    pub routes: Arc<RouteTable>,
    pub rewriter: Rewriter,
    /// Client for the raw pass-through. Never follows redirects and never
    /// decompresses, so the upstream response reaches the client as sent.
    pub forward_client: reqwest::Client,
}

impl AppContext {
    /// Build the context. Harvesting runs only when enabled in config and a
    /// store is supplied.
    pub fn new(config: Config, store: Option<DbPool>) -> Result<Self> {
        let config = Arc::new(config);
        let upstream = UpstreamClient::new(&config.upstream)?;
        let registry = IdentityRegistry::new(config.libraries.clone());

        let harvester = match store {
            Some(store) if config.harvest.enabled => Harvester::new(
                config.harvest.clone(),
                upstream.clone(),
                store,
                Arc::new(CommandRenderer::from_config(&config.harvest)?),
            ),
            _ => Harvester::disabled(),
        };

        let rewriter = Rewriter::new(
            registry.clone(),
            CollectionResolver::new(upstream),
            config.hide.clone(),
            config.harvest.clone(),
            load_placeholder(&config),
            harvester,
        );

        let forward_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(FORWARD_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build forwarding HTTP client: {e}")))?;

        Ok(Self {
            registry,
            routes: Arc::new(RouteTable::new()?),
            rewriter,
            forward_client,
            config,
        })
    }

    /// Upstream URL for an inbound path and query.
    pub fn upstream_url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.config.upstream.base_url(), path_and_query)
    }
}

fn load_placeholder(config: &Config) -> Bytes {
    if let Some(ref path) = config.harvest.placeholder {
        match std::fs::read(path) {
            Ok(bytes) if !bytes.is_empty() => return Bytes::from(bytes),
            Ok(_) => tracing::warn!(path = %path.display(), "Placeholder override is empty, using bundled image"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Placeholder override unreadable, using bundled image"),
        }
    }
    Bytes::from_static(BUNDLED_PLACEHOLDER)
}
