//! Latest items for a virtual library.

use vl_core::Result;

use super::{Replacement, Rewriter};
use crate::resolver::SortOverride;
use crate::upstream::CallerContext;

const LATEST_SORT_BY: &str = "DateCreated,SortName";
const LATEST_SORT_ORDER: &str = "Descending";

/// Replace the body with the library's newest items as a bare JSON array.
pub(super) async fn rewrite(rw: &Rewriter, caller: &CallerContext) -> Result<Option<Replacement>> {
    let Some(library) = caller
        .query_param("ParentId")
        .and_then(|id| rw.registry.resolve(id))
    else {
        return Ok(None);
    };

    let sort = match caller.query_param("SortBy") {
        Some(_) => None,
        None => Some(SortOverride {
            sort_by: LATEST_SORT_BY.into(),
            sort_order: LATEST_SORT_ORDER.into(),
            limit: caller.query_param("Limit").map(String::from),
        }),
    };

    let items = match rw.resolver.resolve_items(library, caller, sort.as_ref()).await {
        Ok(resolved) => resolved.items,
        Err(e) => {
            tracing::warn!(library = %library.name, error = %e, "Latest items unavailable, returning empty list");
            Vec::new()
        }
    };

    Replacement::json(&items).map(Some)
}
