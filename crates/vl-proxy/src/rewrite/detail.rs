//! Single-item lookup of a virtual library.

use vl_core::Result;

use super::template::LibraryView;
use super::{Replacement, Rewriter};

pub(super) fn rewrite(rw: &Rewriter, item_id: &str) -> Result<Option<Replacement>> {
    match rw.registry.resolve(item_id) {
        Some(library) => Replacement::json(&LibraryView::detail(library)).map(Some),
        None => Ok(None),
    }
}
