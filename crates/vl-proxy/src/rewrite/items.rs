//! Item listing for a virtual library.

use vl_codec::ContentEncoding;
use vl_core::Result;

use super::template::ItemsEnvelope;
use super::{decode_json, ProxiedResponse, Replacement, Rewriter};
use crate::upstream::CallerContext;

/// Replace `Items` and `TotalRecordCount` with the library's contents.
///
/// The upstream usually rejects the synthetic `ParentId`; when its body is
/// not an envelope a fresh one is built instead.
pub(super) async fn rewrite(
    rw: &Rewriter,
    caller: &CallerContext,
    response: &ProxiedResponse,
    encoding: ContentEncoding,
) -> Result<Option<Replacement>> {
    let Some(library) = caller
        .query_param("ParentId")
        .and_then(|id| rw.registry.resolve(id))
    else {
        return Ok(None);
    };

    let mut envelope = if response.status.is_success() {
        decode_json::<ItemsEnvelope>(encoding, &response.body).unwrap_or_default()
    } else {
        ItemsEnvelope::default()
    };

    let resolved = match rw.resolver.resolve_items(library, caller, None).await {
        Ok(resolved) => resolved,
        Err(e) => {
            tracing::warn!(library = %library.name, error = %e, "Library items unavailable, returning empty listing");
            Default::default()
        }
    };

    envelope.items = resolved.items;
    envelope.total_record_count = Some(resolved.total);

    Replacement::json(&envelope).map(Some)
}
