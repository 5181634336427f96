use crate::error::{ActivityError, ErrorKind};
use crate::models::StagedFile;
use reqwest::Client;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use url::Url;
use uuid::Uuid;

pub struct FetchActivity {
    client: Client,
    staging_dir: PathBuf,
}

impl FetchActivity {
    pub fn new(client: Client, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            staging_dir: staging_dir.into(),
        }
    }

    /// Downloads the document to a collision-safe staging path. The staged
    /// file is owned by the orchestrator from here on.
    pub async fn run(&self, source_url: &str, document_id: &str) -> Result<StagedFile, ActivityError> {
        let url = Url::parse(source_url).map_err(|error| {
            ActivityError::new(
                ErrorKind::Configuration,
                format!("source url is not valid: {error}"),
            )
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ActivityError::new(
                ErrorKind::Configuration,
                format!("source url scheme must be http(s), got {}", url.scheme()),
            ));
        }

        // Repeated document_ids are expected; the suffix keeps paths unique.
        let suffix = Uuid::new_v4().simple().to_string();
        let filename = format!("{}_{}.pdf", sanitize_id(document_id), &suffix[..6]);
        let local_path = self.staging_dir.join(filename);

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ActivityError::new(
                ErrorKind::Remote,
                format!("download of {source_url} returned {status}"),
            ));
        }

        // Stream to disk; documents can be far larger than we want in memory.
        let mut file = tokio::fs::File::create(&local_path)
            .await
            .map_err(|error| classify_write(&local_path, error))?;
        let mut size_bytes = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(classify_transport)? {
            file.write_all(&chunk)
                .await
                .map_err(|error| classify_write(&local_path, error))?;
            size_bytes += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|error| classify_write(&local_path, error))?;

        Ok(StagedFile {
            local_path,
            size_bytes,
        })
    }
}

/// Caller-supplied ids go into a filename; anything outside a conservative
/// charset is replaced so an id cannot carry path separators. Uniqueness
/// comes from the random suffix, not the id.
fn sanitize_id(document_id: &str) -> String {
    document_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn classify_transport(error: reqwest::Error) -> ActivityError {
    ActivityError::new(ErrorKind::Network, format!("download failed: {error}"))
}

fn classify_write(path: &std::path::Path, error: std::io::Error) -> ActivityError {
    ActivityError::new(
        ErrorKind::LocalStorage,
        format!("cannot write staged file {}: {error}", path.display()),
    )
}

#[cfg(test)]
mod tests {
    use super::FetchActivity;
    use crate::error::ErrorKind;
    use httpmock::prelude::*;
    use reqwest::Client;
    use tempfile::tempdir;

    #[tokio::test]
    async fn downloads_to_a_staged_file() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/sample.pdf");
                then.status(200).body(b"%PDF-1.4 fake body");
            })
            .await;

        let dir = tempdir().expect("tempdir");
        let activity = FetchActivity::new(Client::new(), dir.path());

        let staged = activity
            .run(&server.url("/sample.pdf"), "doc-1")
            .await
            .expect("fetch should succeed");

        assert_eq!(staged.size_bytes, 18);
        let written = std::fs::read(&staged.local_path).expect("staged file exists");
        assert_eq!(written, b"%PDF-1.4 fake body");
    }

    #[tokio::test]
    async fn repeated_document_ids_stage_to_distinct_paths() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/sample.pdf");
                then.status(200).body(b"x");
            })
            .await;

        let dir = tempdir().expect("tempdir");
        let activity = FetchActivity::new(Client::new(), dir.path());

        let first = activity
            .run(&server.url("/sample.pdf"), "doc-1")
            .await
            .expect("first fetch");
        let second = activity
            .run(&server.url("/sample.pdf"), "doc-1")
            .await
            .expect("second fetch");

        assert_ne!(first.local_path, second.local_path);
    }

    #[tokio::test]
    async fn non_success_status_is_a_remote_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/missing.pdf");
                then.status(404);
            })
            .await;

        let dir = tempdir().expect("tempdir");
        let activity = FetchActivity::new(Client::new(), dir.path());

        let error = activity
            .run(&server.url("/missing.pdf"), "doc-1")
            .await
            .expect_err("404 must fail");
        assert_eq!(error.kind, ErrorKind::Remote);
    }

    #[tokio::test]
    async fn malformed_url_is_a_configuration_error() {
        let dir = tempdir().expect("tempdir");
        let activity = FetchActivity::new(Client::new(), dir.path());

        let error = activity
            .run("not a url", "doc-1")
            .await
            .expect_err("bad url must fail");
        assert_eq!(error.kind, ErrorKind::Configuration);

        let error = activity
            .run("ftp://example.com/a.pdf", "doc-1")
            .await
            .expect_err("non-http scheme must fail");
        assert_eq!(error.kind, ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn hostile_document_ids_cannot_escape_the_staging_dir() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/sample.pdf");
                then.status(200).body(b"x");
            })
            .await;

        let dir = tempdir().expect("tempdir");
        let activity = FetchActivity::new(Client::new(), dir.path());

        let staged = activity
            .run(&server.url("/sample.pdf"), "../../etc/passwd")
            .await
            .expect("fetch");

        assert!(staged.local_path.starts_with(dir.path()));
        assert!(staged.local_path.exists());
    }

    #[tokio::test]
    async fn unwritable_staging_dir_is_a_local_storage_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/sample.pdf");
                then.status(200).body(b"x");
            })
            .await;

        let dir = tempdir().expect("tempdir");
        let missing = dir.path().join("does-not-exist");
        let activity = FetchActivity::new(Client::new(), missing);

        let error = activity
            .run(&server.url("/sample.pdf"), "doc-1")
            .await
            .expect_err("write must fail");
        assert_eq!(error.kind, ErrorKind::LocalStorage);
    }
}
