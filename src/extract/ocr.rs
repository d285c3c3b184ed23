//! OCR delegate boundary and the default Tesseract backend.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

/// Errors from an OCR backend.
#[derive(Debug, Error)]
pub enum OcrError {
    /// Backend signalled rate limiting; retryable under the backoff policy.
    #[error("rate limited by OCR backend")]
    RateLimited,
    #[error("external tool not found: {0}")]
    ToolNotFound(String),
    #[error("OCR failed: {0}")]
    Failed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OcrError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, OcrError::RateLimited)
    }
}

/// Transcription backend for images and scanned pages.
///
/// Local backends never rate-limit; hosted ones may, and the extractor runs
/// every call through the shared backoff policy either way.
#[async_trait]
pub trait OcrDelegate: Send + Sync {
    async fn transcribe(&self, image_path: &Path) -> Result<String, OcrError>;
}

/// Tesseract OCR via the system binary.
pub struct TesseractOcr {
    lang: String,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self {
            lang: "eng".to_string(),
        }
    }
}

impl TesseractOcr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_language(mut self, lang: &str) -> Self {
        self.lang = lang.to_string();
        self
    }
}

#[async_trait]
impl OcrDelegate for TesseractOcr {
    async fn transcribe(&self, image_path: &Path) -> Result<String, OcrError> {
        let output = Command::new("tesseract")
            .arg(image_path)
            .arg("stdout")
            .args(["-l", &self.lang])
            .stdin(Stdio::null())
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => {
                Ok(String::from_utf8_lossy(&out.stdout).to_string())
            }
            Ok(out) => Err(OcrError::Failed(
                String::from_utf8_lossy(&out.stderr).to_string(),
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(OcrError::ToolNotFound(
                "tesseract (install tesseract-ocr)".to_string(),
            )),
            Err(e) => Err(OcrError::Io(e)),
        }
    }
}
