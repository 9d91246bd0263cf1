//! Fetch capability: retrieve a remote resource into a local file.
//!
//! [`HttpFetcher`] downloads `http://` and `https://` URLs with `reqwest` and
//! reads `file://` URLs or bare paths from disk. Gzip payloads are detected
//! by their magic bytes and decompressed, so `genome.fa.gz` lands on disk as
//! plain FASTA.

use async_trait::async_trait;
use flate2::read::MultiGzDecoder;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Errors raised while fetching.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The URL scheme is not supported.
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// The HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("GET {url} returned status {status}")]
    Status { url: String, status: u16 },

    /// Reading, writing or decompressing failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Retrieves a resource to a destination file.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url` into `destination`, returning the number of bytes written.
    async fn fetch(&self, url: &str, destination: &Path) -> Result<u64, FetchError>;
}

/// Fetcher backed by `reqwest` and the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client (proxies, timeouts, TLS roots).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn download(&self, url: &str, destination: &Path) -> Result<(), FetchError> {
        let mut response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(destination).await?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<u64, FetchError> {
        let staging = staging_path(destination);
        let result = self.fetch_via(url, &staging, destination).await;

        remove_if_present(&staging).await;
        if result.is_err() {
            remove_if_present(destination).await;
        }
        result
    }
}

impl HttpFetcher {
    async fn fetch_via(
        &self,
        url: &str,
        staging: &Path,
        destination: &Path,
    ) -> Result<u64, FetchError> {
        let source = match url.split_once("://") {
            Some(("http" | "https", _)) => {
                debug!(url = %url, "downloading");
                self.download(url, staging).await?;
                staging.to_path_buf()
            }
            Some(("file", path)) => PathBuf::from(path),
            Some((scheme, _)) => return Err(FetchError::UnsupportedScheme(scheme.to_string())),
            None => PathBuf::from(url),
        };

        let destination = destination.to_path_buf();
        tokio::task::spawn_blocking(move || decode_into(&source, &destination))
            .await
            .map_err(|e| FetchError::Io(std::io::Error::other(e)))?
    }
}

async fn remove_if_present(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to remove partial download");
    }
}

fn staging_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

/// Copy `source` to `destination`, gunzipping when the source is gzip.
fn decode_into(source: &Path, destination: &Path) -> Result<u64, FetchError> {
    use std::io::Read;

    let mut magic = [0u8; 2];
    let is_gzip = {
        let mut file = std::fs::File::open(source)?;
        file.read(&mut magic)? == 2 && magic == GZIP_MAGIC
    };

    let input = std::fs::File::open(source)?;
    let mut output = std::fs::File::create(destination)?;
    let written = if is_gzip {
        std::io::copy(&mut MultiGzDecoder::new(input), &mut output)?
    } else {
        std::io::copy(&mut std::io::BufReader::new(input), &mut output)?
    };
    Ok(written)
}
