//! Client for the remote text-to-speech file API.
//!
//! `GET {base}/api/files` lists the generated audio files,
//! `GET {base}/api/files/{name}` serves one of them.

use std::future::Future;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use speech_proto::config::ApiConfig;
use speech_proto::protocol::{FileListing, Item};
use speech_proto::retry::{retry_with_backoff, RetryError, RetryPolicy};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{ApiError, Result};

/// Anything the poller can list files from.
pub trait FileSource: Send + Sync + 'static {
    fn list_files(&self) -> impl Future<Output = Result<Vec<Item>>> + Send;
}

#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("keospeech/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Playback URL of one file.  The name is percent-encoded as a single
    /// path segment.
    pub fn file_url(&self, name: &str) -> String {
        format!("{}/api/files/{}", self.base_url, urlencoding::encode(name))
    }

    /// Fetch the current listing.  Records without a filename come back as
    /// malformed items; unparseable timestamps fall back to the epoch.
    pub async fn fetch_listing(&self) -> Result<Vec<Item>> {
        let url = format!("{}/api/files", self.base_url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ApiError::Status(response.status()));
        }
        let listing: FileListing = response.json().await?;
        if !listing.success {
            return Err(ApiError::Rejected);
        }
        let items = listing.into_items();
        debug!("api: listing returned {} file(s)", items.len());
        Ok(items)
    }

    /// Stream one file to `dest`, returning the number of bytes written.
    pub async fn download_to(&self, name: &str, dest: &Path) -> Result<u64> {
        let response = self.client.get(self.file_url(name)).send().await?;
        if !response.status().is_success() {
            return Err(ApiError::Status(response.status()));
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }

    /// Download with bounded retries.  A partial file from a failed attempt
    /// is removed before giving up.
    pub async fn prefetch(
        &self,
        name: &str,
        dest: PathBuf,
        policy: &RetryPolicy,
    ) -> std::result::Result<PathBuf, RetryError<ApiError>> {
        let label = format!("prefetch {}", name);
        let result = retry_with_backoff(policy, &label, |_| self.download_to(name, &dest)).await;
        match result {
            Ok(bytes) => {
                info!("api: prefetched {} ({} bytes)", name, bytes);
                Ok(dest)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&dest).await;
                Err(e)
            }
        }
    }
}

impl FileSource for ApiClient {
    fn list_files(&self) -> impl Future<Output = Result<Vec<Item>>> + Send {
        self.fetch_listing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(&ApiConfig {
            base_url: base.to_string(),
            request_timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_file_url_encodes_name() {
        let api = client("https://tts.example.com/");
        assert_eq!(api.base_url(), "https://tts.example.com");
        assert_eq!(
            api.file_url("speech 01.mp3"),
            "https://tts.example.com/api/files/speech%2001.mp3"
        );
        assert_eq!(
            api.file_url("a/b?.mp3"),
            "https://tts.example.com/api/files/a%2Fb%3F.mp3"
        );
    }

    #[tokio::test]
    async fn test_listing_against_unreachable_host_is_http_error() {
        // Port 9 (discard) on loopback is closed on any sane test box.
        let api = client("http://127.0.0.1:9");
        match api.fetch_listing().await {
            Err(ApiError::Http(_)) | Err(ApiError::Timeout) => {}
            other => panic!("unexpected result: {:?}", other.map(|v| v.len())),
        }
    }
}
