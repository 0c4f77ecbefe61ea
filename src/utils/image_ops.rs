use base64::{engine::general_purpose, Engine};
use std::path::Path;

use crate::core::errors::{ItemError, ItemResult};

/// Turn an item's image path into something the provider can fetch.
///
/// Remote URLs and `data:` URIs are passed through untouched. Local files are
/// read, checked to actually be an image, and inlined as a base64 data URI.
pub async fn resolve_image_ref(image_path: &str) -> ItemResult<String> {
    if is_remote(image_path) {
        return Ok(image_path.to_string());
    }

    let bytes = tokio::fs::read(image_path)
        .await
        .map_err(|e| unreadable(image_path, e.to_string()))?;

    if bytes.is_empty() {
        return Err(unreadable(image_path, "file is empty"));
    }

    let mime = sniff_image_mime(&bytes, Path::new(image_path))
        .ok_or_else(|| unreadable(image_path, "not a recognised image format"))?;

    encode_data_uri_async(bytes, mime).await
}

/// Base64-encode on the blocking pool; large photos take noticeable CPU time
pub async fn encode_data_uri_async(bytes: Vec<u8>, mime: &'static str) -> ItemResult<String> {
    tokio::task::spawn_blocking(move || encode_data_uri(&bytes, mime))
        .await
        .map_err(|e| ItemError::Unreadable {
            path: "<in-memory>".to_string(),
            reason: format!("encoding task failed: {}", e),
        })
}

pub fn encode_data_uri(bytes: &[u8], mime: &str) -> String {
    format!("data:{};base64,{}", mime, general_purpose::STANDARD.encode(bytes))
}

fn is_remote(image_path: &str) -> bool {
    let lower = image_path.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("data:")
}

/// Content sniffing first; the extension only decides when the magic bytes
/// are inconclusive
fn sniff_image_mime(bytes: &[u8], path: &Path) -> Option<&'static str> {
    if let Some(kind) = infer::get(bytes) {
        return if kind.matcher_type() == infer::MatcherType::Image {
            Some(kind.mime_type())
        } else {
            None
        };
    }

    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

fn unreadable(path: &str, reason: impl Into<String>) -> ItemError {
    ItemError::Unreadable {
        path: path.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    #[tokio::test]
    async fn test_remote_urls_pass_through() {
        let url = "https://cdn.example.com/p/1.jpg";
        assert_eq!(resolve_image_ref(url).await.unwrap(), url);

        let data = "data:image/png;base64,AAAA";
        assert_eq!(resolve_image_ref(data).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_local_png_is_inlined() {
        let mut file = tempfile::Builder::new().suffix(".bin").tempfile().unwrap();
        file.write_all(PNG_MAGIC).unwrap();

        let uri = resolve_image_ref(file.path().to_str().unwrap()).await.unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn test_missing_file_is_unreadable() {
        let err = resolve_image_ref("/definitely/not/here.jpg").await.unwrap_err();
        assert_eq!(err.kind(), "item_unreadable");
    }

    #[tokio::test]
    async fn test_non_image_content_is_unreadable() {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        file.write_all(b"just some notes").unwrap();

        let err = resolve_image_ref(file.path().to_str().unwrap()).await.unwrap_err();
        assert!(matches!(err, ItemError::Unreadable { .. }));
    }

    #[test]
    fn test_extension_fallback() {
        assert_eq!(
            sniff_image_mime(b"zzzz unknown", Path::new("photo.JPG")),
            Some("image/jpeg")
        );
        assert_eq!(sniff_image_mime(b"zzzz unknown", Path::new("notes.md")), None);
    }
}
