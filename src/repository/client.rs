// src/repository/client.rs

//! HTTP transport for remote repositories
//!
//! Transport failures are retried with a linear back-off; HTTP status
//! handling is left to the caller.

use crate::error::{Error, Result};
use crate::sources::Credentials;
use reqwest::blocking::{Client, Response};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum attempts for a request that fails in transport
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds, multiplied by the attempt number
const RETRY_DELAY_MS: u64 = 1000;

/// HTTP client wrapper with retry support
#[derive(Debug, Clone)]
pub struct RepositoryClient {
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl RepositoryClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("stowage/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_retries: MAX_RETRIES,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        })
    }

    pub fn with_retry(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// GET `url`, retrying transport errors
    pub fn get(&self, url: &str, credentials: Option<&Credentials>) -> Result<Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut request = self.client.get(url);
            if let Some(credentials) = credentials {
                request = request.basic_auth(&credentials.user_name, Some(&credentials.password));
            }

            match request.send() {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::DownloadError(format!(
                            "Request to {} failed after {} attempts: {}",
                            url, attempt, e
                        )));
                    }
                    warn!("Request attempt {} to {} failed: {}, retrying...", attempt, url, e);
                    std::thread::sleep(self.retry_delay * attempt);
                }
            }
        }
    }

    /// Stream a successful response body to `dest_path`
    ///
    /// The body lands in a temporary file in the destination directory and is
    /// renamed into place once complete.
    pub fn save_response(&self, mut response: Response, dest_path: &Path) -> Result<()> {
        let parent = dest_path
            .parent()
            .ok_or_else(|| Error::DownloadError(format!("Invalid destination {}", dest_path.display())))?;
        fs::create_dir_all(parent)?;

        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        io::copy(&mut response, temp.as_file_mut())
            .map_err(|e| Error::DownloadError(format!("Failed to write downloaded data: {}", e)))?;

        temp.persist(dest_path).map_err(|e| e.error)?;

        info!("Downloaded {}", dest_path.display());
        Ok(())
    }
}

/// Verify file checksum matches expected value
pub fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
    debug!("Verifying checksum for {}", path.display());

    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;

    let actual = format!("{:x}", hasher.finalize());

    if !actual.eq_ignore_ascii_case(expected) {
        return Err(Error::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }

    debug!("Checksum verified: {}", expected);
    Ok(())
}
