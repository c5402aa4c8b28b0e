//! Background cover harvesting.
//!
//! After a views list is served, every virtual library gets a harvest task.
//! A run samples primary images from the library's items, hands them to the
//! external cover generator and records completion in the idempotency store.
//! The record is written last, so a crash at any earlier point leaves the
//! library eligible for the next trigger.

mod command;

pub use command::{CommandRenderer, CoverRenderer};

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use vl_core::config::HarvestConfig;
use vl_core::{Error, Library, Result};
use vl_db::models::MarkSource;
use vl_db::pool::{get_conn, DbPool};
use vl_db::queries::harvests;

use crate::resolver::CollectionResolver;
use crate::upstream::UpstreamClient;

/// Why a run stopped without generating a cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    InProgress,
    CustomImage,
    AlreadyDone,
    NoCredentials,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarvestOutcome {
    Completed { samples: usize },
    Skipped(SkipReason),
}

/// An item eligible for sampling.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ImageSource {
    item_id: String,
    tag: String,
}

impl ImageSource {
    fn from_item(item: &Value) -> Option<Self> {
        Some(Self {
            item_id: item.get("Id")?.as_str()?.to_string(),
            tag: item.get("ImageTags")?.get("Primary")?.as_str()?.to_string(),
        })
    }
}

/// Pick `size` distinct candidates uniformly, or all of them when there are
/// not more than `size`.
pub fn choose_sample<T: Clone, R: Rng + ?Sized>(rng: &mut R, candidates: &[T], size: usize) -> Vec<T> {
    if candidates.len() <= size {
        return candidates.to_vec();
    }
    candidates.choose_multiple(rng, size).cloned().collect()
}

struct Inner {
    config: HarvestConfig,
    upstream: UpstreamClient,
    resolver: CollectionResolver,
    store: DbPool,
    renderer: Arc<dyn CoverRenderer>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Cheaply cloneable handle to the harvest worker.
#[derive(Clone)]
pub struct Harvester {
    inner: Option<Arc<Inner>>,
}

impl Harvester {
    pub fn new(
        config: HarvestConfig,
        upstream: UpstreamClient,
        store: DbPool,
        renderer: Arc<dyn CoverRenderer>,
    ) -> Self {
        Self {
            inner: Some(Arc::new(Inner {
                config,
                resolver: CollectionResolver::new(upstream.clone()),
                upstream,
                store,
                renderer,
                locks: DashMap::new(),
            })),
        }
    }

    /// A harvester that never does anything.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Run a harvest for `library` in the background. Outcomes are logged.
    pub fn spawn(&self, library: Library) -> Option<JoinHandle<()>> {
        if !self.is_enabled() {
            return None;
        }

        let harvester = self.clone();
        Some(tokio::spawn(async move {
            match harvester.run(&library).await {
                Ok(HarvestOutcome::Completed { samples }) => {
                    tracing::info!(library = %library.name, samples, "Cover generated");
                }
                Ok(HarvestOutcome::Skipped(reason)) => {
                    tracing::trace!(library = %library.name, ?reason, "Harvest skipped");
                }
                Err(e) => {
                    tracing::warn!(library = %library.name, error = %e, "Harvest failed");
                }
            }
        }))
    }

    /// Harvest `library` now.
    pub async fn run(&self, library: &Library) -> Result<HarvestOutcome> {
        let Some(inner) = self.inner.as_deref() else {
            return Ok(HarvestOutcome::Skipped(SkipReason::Disabled));
        };

        let lock = inner.locks.entry(library.name.clone()).or_default().clone();
        let Ok(_guard) = lock.try_lock() else {
            return Ok(HarvestOutcome::Skipped(SkipReason::InProgress));
        };

        if library.image.is_some() {
            return Ok(HarvestOutcome::Skipped(SkipReason::CustomImage));
        }
        if !library.has_plain_name() {
            return Err(Error::harvest(
                "download",
                format!("library name '{}' is not a plain file name", library.name),
            ));
        }

        let cover = inner.config.cover_path(&library.name);
        if inner.is_done(&library.name).await? && artifact_present(&cover).await {
            return Ok(HarvestOutcome::Skipped(SkipReason::AlreadyDone));
        }

        if !inner.upstream.has_credentials() {
            return Ok(HarvestOutcome::Skipped(SkipReason::NoCredentials));
        }

        let resolved = inner
            .resolver
            .resolve_privileged(library)
            .await
            .map_err(|e| Error::harvest("resolve", e))?;
        let candidates: Vec<ImageSource> = resolved.items.iter().filter_map(ImageSource::from_item).collect();
        if candidates.is_empty() {
            tracing::debug!(library = %library.name, "No items with a primary image");
            return Ok(HarvestOutcome::Skipped(SkipReason::Empty));
        }

        let sample = {
            let mut rng = rand::thread_rng();
            choose_sample(&mut rng, &candidates, inner.config.sample_size)
        };

        tracing::info!(
            library = %library.name,
            candidates = candidates.len(),
            samples = sample.len(),
            "Harvesting cover samples"
        );
        inner.download(&library.name, &sample).await?;
        inner.renderer.render(&library.name).await?;
        inner.mark_done(&library.name).await?;

        Ok(HarvestOutcome::Completed {
            samples: sample.len(),
        })
    }
}

impl Inner {
    async fn download(&self, library_name: &str, sample: &[ImageSource]) -> Result<()> {
        let dir = self.config.sample_dir(library_name);
        if dir.parent() != Some(self.config.images_dir.as_path())
            || dir.file_name() != Some(OsStr::new(library_name))
        {
            return Err(Error::harvest(
                "download",
                format!("refusing to clear {} outside {}", dir.display(), self.config.images_dir.display()),
            ));
        }
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::harvest("download", format!("clearing {}: {e}", dir.display()))),
        }
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::harvest("download", format!("creating {}: {e}", dir.display())))?;

        for (n, source) in sample.iter().enumerate() {
            let query = [
                ("maxHeight".to_string(), "600".to_string()),
                ("maxWidth".to_string(), "400".to_string()),
                ("tag".to_string(), source.tag.clone()),
                ("quality".to_string(), "90".to_string()),
            ];
            let bytes = self
                .upstream
                .fetch_bytes_privileged(&format!("/Items/{}/Images/Primary", source.item_id), &query)
                .await
                .map_err(|e| Error::harvest("download", e))?;

            let path = dir.join(format!("{}.jpg", n + 1));
            tokio::fs::write(&path, &bytes)
                .await
                .map_err(|e| Error::harvest("download", format!("writing {}: {e}", path.display())))?;
        }
        Ok(())
    }

    async fn is_done(&self, library_name: &str) -> Result<bool> {
        let pool = self.store.clone();
        let name = library_name.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = get_conn(&pool)?;
            harvests::is_done(&conn, &name)
        })
        .await
        .map_err(|e| Error::Internal(format!("store task failed: {e}")))?
    }

    async fn mark_done(&self, library_name: &str) -> Result<()> {
        let pool = self.store.clone();
        let name = library_name.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = get_conn(&pool)?;
            harvests::mark_done(&conn, &name, MarkSource::Harvest).map(|_| ())
        })
        .await
        .map_err(|e| Error::Internal(format!("store task failed: {e}")))?
        .map_err(|e| Error::harvest("record", e))
    }
}

async fn artifact_present(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file() && meta.len() > 0)
}
