//! Primary image substitution.
//!
//! Artwork precedence: the operator's custom image, then the harvested cover,
//! then the placeholder.

use std::path::Path;

use bytes::Bytes;
use vl_core::{Library, Result};

use super::{Replacement, Rewriter};
use crate::upstream::CallerContext;

/// Placeholder artwork compiled into the binary.
pub static BUNDLED_PLACEHOLDER: &[u8] = include_bytes!("../../../../assets/placeholder.png");

/// The image tag the client asked for.
pub(super) fn managed_tag(caller: &CallerContext) -> Option<&str> {
    caller.query_param("tag")
}

pub(super) async fn rewrite(rw: &Rewriter, caller: &CallerContext) -> Result<Option<Replacement>> {
    let Some(library) = managed_tag(caller).and_then(|tag| rw.registry.resolve(tag)) else {
        return Ok(None);
    };

    let body = artwork(rw, library).await;
    let content_type = sniff_content_type(&body);
    tracing::debug!(library = %library.name, content_type, "Serving virtual library artwork");

    Ok(Some(Replacement {
        body: body.to_vec(),
        content_type,
    }))
}

async fn artwork(rw: &Rewriter, library: &Library) -> Bytes {
    if let Some(ref custom) = library.image {
        if let Some(bytes) = read_non_empty(custom).await {
            return bytes;
        }
        tracing::warn!(
            library = %library.name,
            path = %custom.display(),
            "Custom image unreadable, falling back"
        );
    }

    if let Some(bytes) = read_non_empty(&rw.harvest.cover_path(&library.name)).await {
        return bytes;
    }

    rw.placeholder.clone()
}

async fn read_non_empty(path: &Path) -> Option<Bytes> {
    match tokio::fs::read(path).await {
        Ok(bytes) if !bytes.is_empty() => Some(Bytes::from(bytes)),
        _ => None,
    }
}

/// MIME type from the image's magic bytes.
pub fn sniff_content_type(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_placeholder_is_png() {
        assert_eq!(sniff_content_type(BUNDLED_PLACEHOLDER), "image/png");
    }

    #[test]
    fn sniffs_jpeg_and_unknown() {
        assert_eq!(sniff_content_type(&[0xff, 0xd8, 0xff, 0xe0, 0, 0]), "image/jpeg");
        assert_eq!(sniff_content_type(b"plain text"), "application/octet-stream");
    }
}
