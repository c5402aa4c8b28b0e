//! Turns a virtual library into the upstream items it stands for.

use serde_json::Value;
use vl_core::{Library, Result};

use crate::upstream::{CallerContext, UpstreamClient};

/// Caller parameters copied verbatim onto the item listing.
pub const COPIED_PARAMS: [&str; 10] = [
    "StartIndex",
    "Limit",
    "Fields",
    "ImageTypeLimit",
    "EnableImageTypes",
    "EnableImages",
    "EnableUserData",
    "EnableTotalRecordCount",
    "SortBy",
    "SortOrder",
];

/// Replaces the caller's `SortBy`, `SortOrder` and `Limit` wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortOverride {
    pub sort_by: String,
    pub sort_order: String,
    pub limit: Option<String>,
}

/// Items backing a virtual library.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedItems {
    pub items: Vec<Value>,
    pub total: u64,
}

impl ResolvedItems {
    fn from_envelope(mut envelope: Value) -> Self {
        let items = match envelope.get_mut("Items").map(Value::take) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        let total = envelope
            .get("TotalRecordCount")
            .and_then(Value::as_u64)
            .unwrap_or(items.len() as u64);
        Self { items, total }
    }
}

#[derive(Debug, Clone)]
pub struct CollectionResolver {
    upstream: UpstreamClient,
}

impl CollectionResolver {
    pub fn new(upstream: UpstreamClient) -> Self {
        Self { upstream }
    }

    /// List the library's items as `caller` would see them.
    ///
    /// A container-scoped library whose container the caller cannot see
    /// resolves to an empty result rather than an error.
    pub async fn resolve_items(
        &self,
        library: &Library,
        caller: &CallerContext,
        sort: Option<&SortOverride>,
    ) -> Result<ResolvedItems> {
        if library.is_container_scoped() && !self.container_visible(&library.resource.id, caller).await? {
            tracing::debug!(
                library = %library.name,
                container = %library.resource.id,
                "Container not visible to caller, resolving empty"
            );
            return Ok(ResolvedItems::default());
        }

        let mut query = scope_params(library);
        for key in COPIED_PARAMS {
            let overridden = sort.is_some() && matches!(key, "SortBy" | "SortOrder" | "Limit");
            if overridden {
                continue;
            }
            if let Some(value) = caller.query_param(key) {
                query.push((key.to_string(), value.to_string()));
            }
        }
        if let Some(sort) = sort {
            query.push(("SortBy".into(), sort.sort_by.clone()));
            query.push(("SortOrder".into(), sort.sort_order.clone()));
            if let Some(ref limit) = sort.limit {
                query.push(("Limit".into(), limit.clone()));
            }
        }

        let path = format!("/Users/{}/Items", caller.user_id);
        let envelope = self.upstream.fetch_json(&path, &query, caller).await?;
        let resolved = ResolvedItems::from_envelope(envelope);
        tracing::debug!(library = %library.name, count = resolved.items.len(), "Resolved library items");
        Ok(resolved)
    }

    /// List the library's items with the API key, skipping visibility checks.
    pub async fn resolve_privileged(&self, library: &Library) -> Result<ResolvedItems> {
        let mut query = scope_params(library);
        query.push(("EnableImageTypes".into(), "Primary".into()));
        let envelope = self.upstream.fetch_json_privileged("/Items", &query).await?;
        Ok(ResolvedItems::from_envelope(envelope))
    }

    /// Whether `container_id` is a child of the caller's first boxsets view.
    async fn container_visible(&self, container_id: &str, caller: &CallerContext) -> Result<bool> {
        let views = self
            .upstream
            .fetch_json(&format!("/Users/{}/Views", caller.user_id), &[], caller)
            .await?;

        let boxsets_id = views
            .get("Items")
            .and_then(Value::as_array)
            .and_then(|items| {
                items
                    .iter()
                    .find(|v| v.get("CollectionType").and_then(Value::as_str) == Some("boxsets"))
            })
            .and_then(|v| v.get("Id"))
            .and_then(Value::as_str);

        let Some(boxsets_id) = boxsets_id else {
            return Ok(false);
        };

        let children = self
            .upstream
            .fetch_json(
                &format!("/Users/{}/Items", caller.user_id),
                &[("ParentId".to_string(), boxsets_id.to_string())],
                caller,
            )
            .await?;

        Ok(children
            .get("Items")
            .and_then(Value::as_array)
            .is_some_and(|items| {
                items
                    .iter()
                    .any(|v| v.get("Id").and_then(Value::as_str) == Some(container_id))
            }))
    }
}

fn scope_params(library: &Library) -> Vec<(String, String)> {
    let mut query = vec![(
        library.resource.kind.query_param().to_string(),
        library.resource.id.clone(),
    )];
    if library.recursive() {
        query.push(("Recursive".into(), "true".into()));
    }
    query
}
