//! Screenshot artifacts for journeys.
//!
//! Failed required steps and explicit `screenshot` steps write a PNG into the
//! artifact directory. The dashboard lists them through `/api/screenshots`.

use crate::browser::PageDriver;
use crate::error::{BrowserError, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// A saved screenshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotArtifact {
    /// File name inside the artifact directory
    pub name: String,

    pub path: String,

    pub size_bytes: usize,

    /// SHA-256 of the PNG bytes
    pub hash: String,

    /// RFC 3339 modification time
    pub captured_at: String,

    /// `data:image/png;base64,...` when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_uri: Option<String>,
}

/// Capture the current page and store it as `<journey>_<step>_<label>.png`
pub async fn capture_screenshot(
    page: &dyn PageDriver,
    dir: &Path,
    journey: &str,
    step: usize,
    label: &str,
) -> Result<ScreenshotArtifact> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| BrowserError::Other(format!("Failed to create artifact directory: {}", e)))?;

    let bytes = page.screenshot().await?;
    let name = format!("{}_{:03}_{}.png", slug(journey), step, slug(label));
    let path = dir.join(&name);

    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| BrowserError::Other(format!("Failed to write screenshot: {}", e)))?;

    log::info!("Saved screenshot {} ({} KB)", path.display(), bytes.len() / 1024);

    Ok(ScreenshotArtifact {
        name,
        path: path.to_string_lossy().to_string(),
        size_bytes: bytes.len(),
        hash: compute_hash(&bytes),
        captured_at: chrono::Utc::now().to_rfc3339(),
        data_uri: None,
    })
}

/// List PNG artifacts, newest first, optionally inlining their bytes
pub async fn list_screenshots(dir: &Path, inline: bool) -> std::io::Result<Vec<ScreenshotArtifact>> {
    let mut artifacts = Vec::new();

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(artifacts),
        Err(e) => return Err(e),
    };

    while let Some(entry) = entries.next_entry().await? {
        let path: PathBuf = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("png") {
            continue;
        }

        let bytes = tokio::fs::read(&path).await?;
        let modified = entry.metadata().await?.modified()?;
        let captured_at: chrono::DateTime<chrono::Utc> = modified.into();

        artifacts.push(ScreenshotArtifact {
            name: entry.file_name().to_string_lossy().to_string(),
            path: path.to_string_lossy().to_string(),
            size_bytes: bytes.len(),
            hash: compute_hash(&bytes),
            captured_at: captured_at.to_rfc3339(),
            data_uri: inline.then(|| {
                format!(
                    "data:image/png;base64,{}",
                    base64::engine::general_purpose::STANDARD.encode(&bytes)
                )
            }),
        });
    }

    artifacts.sort_by(|a, b| b.captured_at.cmp(&a.captured_at).then(a.name.cmp(&b.name)));
    Ok(artifacts)
}

fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn slug(value: &str) -> String {
    let slug: String = value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let slug = slug
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        "step".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug() {
        assert_eq!(slug("Coupon Testing"), "coupon-testing");
        assert_eq!(slug("  Add to cart!! "), "add-to-cart");
        assert_eq!(slug("***"), "step");
    }

    #[test]
    fn test_compute_hash() {
        let a = compute_hash(b"hello world");
        assert_eq!(a, compute_hash(b"hello world"));
        assert_ne!(a, compute_hash(b"different"));
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() {
        let dir = std::env::temp_dir().join("storefront-e2e-no-such-artifacts");
        let listed = list_screenshots(&dir, false).await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn test_list_inlines_png_only() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("home_001_failure.png"), b"\x89PNG fake")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), b"ignored").await.unwrap();

        let listed = list_screenshots(dir.path(), true).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "home_001_failure.png");
        assert!(listed[0]
            .data_uri
            .as_deref()
            .unwrap()
            .starts_with("data:image/png;base64,"));
    }
}
