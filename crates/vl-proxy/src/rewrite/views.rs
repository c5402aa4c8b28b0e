//! Library-list injection.

use serde_json::Value;
use vl_codec::ContentEncoding;
use vl_core::{Error, Result};

use super::template::{ItemsEnvelope, LibraryView};
use super::{decode_json, ProxiedResponse, Replacement, Rewriter};

/// Prepend one synthetic entry per configured library and drop the genuine
/// entries the hide policy suppresses.
pub(super) fn rewrite(
    rw: &Rewriter,
    response: &ProxiedResponse,
    encoding: ContentEncoding,
) -> Result<Option<Replacement>> {
    if !response.status.is_success() {
        return Ok(None);
    }

    let mut envelope: ItemsEnvelope = decode_json(encoding, &response.body)?;

    let server_id = envelope
        .items
        .first()
        .and_then(|item| item.get("ServerId"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut items = rw
        .registry
        .libraries()
        .iter()
        .map(|library| serde_json::to_value(LibraryView::view(library, &server_id)))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Internal(format!("failed to build library view: {e}")))?;
    let injected = items.len();

    let before = envelope.items.len();
    items.extend(envelope.items.into_iter().filter(|item| {
        !rw.hide
            .suppresses(item.get("CollectionType").and_then(Value::as_str))
    }));

    tracing::debug!(
        injected,
        hidden = before - (items.len() - injected),
        "Injected virtual libraries into views"
    );

    if envelope.total_record_count.is_some() {
        envelope.total_record_count = Some(items.len() as u64);
    }
    envelope.items = items;

    Replacement::json(&envelope).map(Some)
}
