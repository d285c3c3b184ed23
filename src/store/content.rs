//! Content-addressed storage for document bytes on disk.

use std::path::{Path, PathBuf};

use crate::models::Document;

/// Map MIME type to file extension.
pub fn mime_to_extension(mime: &str) -> &'static str {
    match mime {
        "application/pdf" => "pdf",
        "text/html" => "html",
        "text/plain" => "txt",
        "text/csv" => "csv",
        "application/json" => "json",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/tiff" => "tif",
        "image/gif" => "gif",
        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "message/rfc822" => "eml",
        _ => "bin",
    }
}

/// Replace filesystem-hostile characters in a display name.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    cleaned.trim_matches('_').to_string()
}

/// Construct the storage path for document content.
///
/// Uses a two-level directory structure based on hash prefix for filesystem
/// efficiency: `{documents_dir}/{hash[0..2]}/{basename}-{hash[0..8]}.{ext}`
pub fn content_storage_path(
    documents_dir: &Path,
    content_hash: &str,
    basename: &str,
    extension: &str,
) -> PathBuf {
    let filename = format!(
        "{}-{}.{}",
        sanitize_filename(basename),
        &content_hash[..8],
        extension
    );
    documents_dir.join(&content_hash[..2]).join(filename)
}

/// Save document content to its content-addressed path.
///
/// Returns the path where the bytes were written.
pub fn save_content(
    documents_dir: &Path,
    name: &str,
    mime_type: &str,
    content: &[u8],
) -> std::io::Result<PathBuf> {
    let hash = Document::compute_hash(content);
    let basename = name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name);
    let path = content_storage_path(documents_dir, &hash, basename, mime_to_extension(mime_type));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, content)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_storage_path() {
        let path = content_storage_path(
            Path::new("/docs"),
            "abcdef1234567890",
            "appraisal",
            "pdf",
        );
        assert_eq!(path, PathBuf::from("/docs/ab/appraisal-abcdef12.pdf"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("My Report (2024)"), "My_Report__2024");
        assert_eq!(sanitize_filename("clean-name_1.pdf"), "clean-name_1.pdf");
    }

    #[test]
    fn test_mime_to_extension() {
        assert_eq!(mime_to_extension("application/pdf"), "pdf");
        assert_eq!(mime_to_extension("message/rfc822"), "eml");
        assert_eq!(mime_to_extension("some/random"), "bin");
    }

    #[test]
    fn test_save_content_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let content = b"policy document content";
        let path = save_content(dir.path(), "policy.pdf", "application/pdf", content).unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::read(&path).unwrap(), content);
        // Two-char hash prefix directory.
        let parent = path.parent().unwrap().file_name().unwrap();
        assert_eq!(parent.to_str().unwrap().len(), 2);
    }
}
