//! Shared test harness for integration tests.
//!
//! [`TestProxy`] starts a wiremock upstream, builds an [`AppContext`] pointed
//! at it and serves the proxy on a random local port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;

use tempfile::TempDir;
use vl_core::config::{HarvestConfig, UpstreamConfig};
use vl_core::{Config, Library, ResourceRef, ResourceType};
use vl_db::pool::DbPool;
use vl_proxy::context::AppContext;
use wiremock::MockServer;

pub const USER_ID: &str = "e2b4c0ffee";

pub fn library(name: &str, kind: ResourceType, id: &str) -> Library {
    Library {
        name: name.into(),
        resource: ResourceRef {
            kind,
            id: id.into(),
        },
        image: None,
        collection_type: None,
    }
}

/// Two libraries (a tag filter and a collection) with harvesting off.
pub fn base_config(upstream: &MockServer, dir: &Path) -> Config {
    Config {
        upstream: UpstreamConfig {
            url: upstream.uri(),
            ..UpstreamConfig::default()
        },
        harvest: HarvestConfig {
            enabled: false,
            images_dir: dir.join("images"),
            store_path: dir.join("virtlib.db"),
            legacy_done_log: None,
            cover_workdir: Some(dir.to_path_buf()),
            ..HarvestConfig::default()
        },
        libraries: vec![
            library("Anime", ResourceType::Tag, "1234"),
            library("Marvel", ResourceType::Collection, "5678"),
        ],
        ..Config::default()
    }
}

/// A running proxy in front of a mock upstream.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub upstream: MockServer,
    pub dir: TempDir,
    pub client: reqwest::Client,
}

impl TestProxy {
    /// Start with [`base_config`].
    pub async fn start() -> Self {
        Self::start_with(|_| {}, |_| None).await
    }

    /// Start with a customised config. `store` may open a harvest store
    /// against the final config.
    pub async fn start_with(
        customise: impl FnOnce(&mut Config),
        store: impl FnOnce(&Config) -> Option<DbPool>,
    ) -> Self {
        let upstream = MockServer::start().await;
        let dir = tempfile::tempdir().expect("failed to create tempdir");

        let mut config = base_config(&upstream, dir.path());
        customise(&mut config);
        let store = store(&config);

        let ctx = AppContext::new(config, store).expect("failed to build context");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            vl_proxy::serve(listener, ctx, std::future::pending()).await.ok();
        });

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("failed to build client");

        Self {
            addr,
            upstream,
            dir,
            client,
        }
    }

    pub fn url(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.addr, path_and_query)
    }
}
