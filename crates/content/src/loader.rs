//! Loading benchmark and tailoring content.
//!
//! Content files are produced by a separate extraction step that may still be
//! running when collection starts, so loading waits for the file to exist and
//! be non-empty before parsing it.

use crate::document::ContentDocument;
use apicollect_common::{Error, Result};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// How long to wait for a content file to show up.
pub const CONTENT_FILE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Delay between checks for a content file.
pub const CONTENT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Loads content documents, waiting for them to be written first.
#[derive(Debug, Clone)]
pub struct ContentLoader {
    timeout: Duration,
    poll_interval: Duration,
}

impl ContentLoader {
    pub fn new() -> Self {
        Self {
            timeout: CONTENT_FILE_TIMEOUT,
            poll_interval: CONTENT_POLL_INTERVAL,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Load the benchmark data stream.
    pub async fn load_source(&self, path: &Path) -> Result<ContentDocument> {
        self.load(path).await
    }

    /// Load a tailoring document.
    pub async fn load_tailoring(&self, path: &Path) -> Result<ContentDocument> {
        self.load(path).await
    }

    async fn load(&self, path: &Path) -> Result<ContentDocument> {
        let bytes = wait_for_content(path, self.timeout, self.poll_interval).await?;
        let doc = ContentDocument::from_bytes(&bytes, path)?;
        debug!("Parsed content from {}", path.display());
        Ok(doc)
    }
}

impl Default for ContentLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait until `path` exists and is non-empty, then return its contents.
///
/// Fails with [`Error::ContentTimeout`] once `timeout` elapses. Errors other
/// than the file not existing yet fail immediately. Dropping the returned
/// future stops the wait.
pub async fn wait_for_content(
    path: &Path,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<Vec<u8>> {
    match tokio::time::timeout(timeout, poll_until_ready(path, poll_interval)).await {
        Ok(result) => {
            if result.is_ok() {
                info!("File '{}' found, using.", path.display());
            }
            result
        }
        Err(_) => Err(Error::ContentTimeout {
            path: path.to_path_buf(),
            waited_secs: timeout.as_secs(),
        }),
    }
}

async fn poll_until_ready(path: &Path, poll_interval: Duration) -> Result<Vec<u8>> {
    loop {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.len() > 0 => {
                let bytes = tokio::fs::read(path).await?;
                if !bytes.is_empty() {
                    return Ok(bytes);
                }
            }
            Ok(_) => debug!("Content file {} is still empty", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }
        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const CONTENT: &str =
        r#"<Benchmark xmlns="http://checklists.nist.gov/xccdf/1.2" id="b"/>"#;

    fn quick_loader() -> ContentLoader {
        ContentLoader::new()
            .with_timeout(Duration::from_millis(300))
            .with_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_load_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ds.xml");
        std::fs::write(&path, CONTENT).unwrap();

        let doc = quick_loader().load_source(&path).await.unwrap();
        assert_eq!(doc.root().attr("id"), Some("b"));
    }

    #[tokio::test]
    async fn test_waits_for_file_to_appear() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("late.xml");

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tokio::fs::write(&writer_path, CONTENT).await.unwrap();
        });

        let loader = ContentLoader::new()
            .with_timeout(Duration::from_secs(5))
            .with_poll_interval(Duration::from_millis(10));
        let doc = loader.load_tailoring(&path).await.unwrap();
        writer.await.unwrap();
        assert_eq!(doc.root().name(), "Benchmark");
    }

    #[tokio::test]
    async fn test_empty_file_times_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.xml");
        std::fs::write(&path, "").unwrap();

        let err = quick_loader().load_source(&path).await.unwrap_err();
        assert!(err.is_timeout(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_missing_file_times_out() {
        let dir = tempdir().unwrap();
        let err = quick_loader()
            .load_source(&dir.path().join("never.xml"))
            .await
            .unwrap_err();
        match err {
            Error::ContentTimeout { path, .. } => assert!(path.ends_with("never.xml")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_content_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.xml");
        std::fs::write(&path, "<Benchmark>").unwrap();

        let err = quick_loader().load_source(&path).await.unwrap_err();
        assert!(matches!(err, Error::ContentParse { .. }));
    }
}
