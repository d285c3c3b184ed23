//! Text extraction from loan documents.
//!
//! Normalizes every ingested file to plain text:
//! - native text formats are read directly
//! - PDFs go through pdftotext (Poppler), with OCR for sparse pages
//! - images go to the OCR delegate
//! - office documents are exported to a text intermediate first
//!
//! Total failure degrades to an empty string so a single unreadable file
//! never fails a batch; downstream classification treats empty text as
//! filename-only.

mod ocr;

pub use ocr::{OcrDelegate, OcrError, TesseractOcr};

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tempfile::TempDir;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::retry::BackoffPolicy;

/// Errors that can occur during text extraction.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("external tool not found: {0}")]
    ToolNotFound(String),

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("OCR failed: {0}")]
    Ocr(#[from] OcrError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle command output, extracting stdout on success.
fn handle_cmd_output(
    result: std::io::Result<std::process::Output>,
    tool_name: &str,
    error_prefix: &str,
) -> Result<String, ExtractionError> {
    match result {
        Ok(output) => {
            if output.status.success() {
                Ok(String::from_utf8_lossy(&output.stdout).to_string())
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(ExtractionError::ExtractionFailed(format!(
                    "{}: {}",
                    error_prefix, stderr
                )))
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ExtractionError::ToolNotFound(tool_name.to_string()))
        }
        Err(e) => Err(ExtractionError::Io(e)),
    }
}

/// Office formats that need an export step before text extraction.
fn is_office_mime(mime: &str) -> bool {
    matches!(
        mime,
        "application/msword"
            | "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            | "application/vnd.ms-excel"
            | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            | "application/rtf"
    )
}

/// Image formats handed to the OCR delegate.
fn is_image_mime(mime: &str) -> bool {
    matches!(
        mime,
        "image/png" | "image/jpeg" | "image/tiff" | "image/gif" | "image/bmp" | "image/webp"
    )
}

/// Text extractor for loan documents.
pub struct ContentExtractor {
    ocr: Arc<dyn OcrDelegate>,
    backoff: BackoffPolicy,
    /// Minimum non-whitespace characters before OCR is tried on a PDF.
    min_chars: usize,
}

impl ContentExtractor {
    pub fn new(ocr: Arc<dyn OcrDelegate>, backoff: BackoffPolicy) -> Self {
        Self {
            ocr,
            backoff,
            min_chars: 100,
        }
    }

    pub fn with_min_chars(mut self, min_chars: usize) -> Self {
        self.min_chars = min_chars;
        self
    }

    /// Extract plain text from a file, degrading to empty on total failure.
    pub async fn extract(&self, file_path: &Path, mime_type: &str) -> String {
        match self.try_extract(file_path, mime_type).await {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    "extraction failed for {} ({}): {}, treating as empty",
                    file_path.display(),
                    mime_type,
                    e
                );
                String::new()
            }
        }
    }

    /// Fallible extraction; callers wanting the error use this directly.
    pub async fn try_extract(
        &self,
        file_path: &Path,
        mime_type: &str,
    ) -> Result<String, ExtractionError> {
        match mime_type {
            "text/plain" | "text/html" | "text/csv" | "application/json" => {
                Ok(tokio::fs::read_to_string(file_path).await?)
            }
            "application/pdf" => self.extract_pdf(file_path).await,
            m if is_image_mime(m) => self.run_ocr(file_path).await,
            m if is_office_mime(m) => self.extract_office(file_path).await,
            other => Err(ExtractionError::UnsupportedFileType(other.to_string())),
        }
    }

    /// Extract text from a PDF, falling back to OCR when the text layer is
    /// sparse (scanned documents).
    async fn extract_pdf(&self, file_path: &Path) -> Result<String, ExtractionError> {
        let pdf_text = self.run_pdftotext(file_path).await.unwrap_or_default();
        let pdf_chars = pdf_text.chars().filter(|c| !c.is_whitespace()).count();

        if pdf_chars >= self.min_chars {
            return Ok(pdf_text);
        }

        debug!(
            "sparse text layer ({} chars) in {}, trying OCR",
            pdf_chars,
            file_path.display()
        );
        match self.ocr_pdf(file_path).await {
            Ok(ocr_text) => {
                let ocr_chars = ocr_text.chars().filter(|c| !c.is_whitespace()).count();
                if ocr_chars > pdf_chars {
                    Ok(ocr_text)
                } else {
                    Ok(pdf_text)
                }
            }
            Err(e) => {
                debug!("OCR fallback failed: {}, using pdftotext result", e);
                Ok(pdf_text)
            }
        }
    }

    /// Run pdftotext on a PDF file.
    async fn run_pdftotext(&self, file_path: &Path) -> Result<String, ExtractionError> {
        let output = Command::new("pdftotext")
            .args(["-layout", "-enc", "UTF-8"])
            .arg(file_path)
            .arg("-")
            .stdin(Stdio::null())
            .output()
            .await;

        handle_cmd_output(output, "pdftotext (install poppler-utils)", "pdftotext failed")
    }

    /// OCR a PDF by rasterizing pages and running the delegate on each.
    async fn ocr_pdf(&self, file_path: &Path) -> Result<String, ExtractionError> {
        let temp_dir = TempDir::new()?;
        let temp_path = temp_dir.path();

        let status = Command::new("pdftoppm")
            .args(["-png", "-r", "300"])
            .arg(file_path)
            .arg(temp_path.join("page"))
            .stdin(Stdio::null())
            .status()
            .await;

        match status {
            Ok(s) if s.success() => {}
            Ok(_) => {
                return Err(ExtractionError::ExtractionFailed(
                    "pdftoppm failed to convert PDF".to_string(),
                ))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ExtractionError::ToolNotFound(
                    "pdftoppm (install poppler-utils)".to_string(),
                ))
            }
            Err(e) => return Err(ExtractionError::Io(e)),
        }

        let mut images: Vec<PathBuf> = std::fs::read_dir(temp_path)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|ext| ext == "png").unwrap_or(false))
            .collect();
        images.sort();

        if images.is_empty() {
            return Err(ExtractionError::ExtractionFailed(
                "no images generated from PDF".to_string(),
            ));
        }

        let mut all_text = String::new();
        for (i, image_path) in images.iter().enumerate() {
            match self.run_ocr(image_path).await {
                Ok(text) => {
                    if !all_text.is_empty() {
                        all_text.push_str("\n\n");
                    }
                    all_text.push_str(&text);
                }
                Err(e) => warn!("OCR failed for page {}: {}", i + 1, e),
            }
        }

        Ok(all_text)
    }

    /// Run the OCR delegate under the shared backoff policy.
    async fn run_ocr(&self, image_path: &Path) -> Result<String, ExtractionError> {
        let text = self
            .backoff
            .run(
                |e: &OcrError| e.is_rate_limit(),
                |retry, delay| debug!("OCR backoff {:?} (retry {})", delay, retry + 1),
                || self.ocr.transcribe(image_path),
            )
            .await?;
        Ok(text)
    }

    /// Export an office document to plain text and read the result.
    async fn extract_office(&self, file_path: &Path) -> Result<String, ExtractionError> {
        let temp_dir = TempDir::new()?;

        let output = Command::new("soffice")
            .args(["--headless", "--convert-to", "txt:Text", "--outdir"])
            .arg(temp_dir.path())
            .arg(file_path)
            .stdin(Stdio::null())
            .output()
            .await;

        handle_cmd_output(
            output,
            "soffice (install libreoffice)",
            "document export failed",
        )?;

        let stem = file_path
            .file_stem()
            .ok_or_else(|| ExtractionError::ExtractionFailed("missing file stem".to_string()))?;
        let exported = temp_dir.path().join(stem).with_extension("txt");
        Ok(tokio::fs::read_to_string(&exported).await?)
    }

    /// Check which external tools are available.
    pub async fn check_tools() -> Vec<(String, bool)> {
        let mut results = Vec::new();
        for tool in ["pdftotext", "pdftoppm", "tesseract", "soffice"] {
            let available = Command::new("which")
                .arg(tool)
                .stdin(Stdio::null())
                .output()
                .await
                .map(|o| o.status.success())
                .unwrap_or(false);
            results.push((tool.to_string(), available));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn extractor() -> ContentExtractor {
        ContentExtractor::new(Arc::new(TesseractOcr::new()), BackoffPolicy::default())
    }

    #[tokio::test]
    async fn test_native_text_read_directly() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "loan payoff statement for 123 Main St").unwrap();
        let text = extractor().extract(file.path(), "text/plain").await;
        assert!(text.contains("payoff statement"));
    }

    #[tokio::test]
    async fn test_unsupported_type_degrades_to_empty() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let text = extractor().extract(file.path(), "application/zip").await;
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_degrades_to_empty() {
        let text = extractor()
            .extract(Path::new("/nonexistent/file.txt"), "text/plain")
            .await;
        assert!(text.is_empty());
    }

    #[test]
    fn test_mime_dispatch_tables() {
        assert!(is_image_mime("image/png"));
        assert!(!is_image_mime("application/pdf"));
        assert!(is_office_mime(
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        ));
        assert!(!is_office_mime("text/plain"));
    }
}
