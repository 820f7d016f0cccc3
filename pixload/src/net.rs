//! Fetching remote images

use std::io::Read;
use std::time::Duration;

use anyhow::{bail, ensure, Context, Result};

/// Retrieves the bytes behind a URL, refusing bodies over `max_bytes`.
pub trait Downloader: Send + Sync {
    fn fetch(&self, url: &str, max_bytes: u64) -> Result<Vec<u8>>;
}

pub fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

pub struct HttpDownloader {
    client: reqwest::blocking::Client,
}

impl HttpDownloader {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(30))
            .build()
            .context("building HTTP client")?;
        Ok(Self { client })
    }
}

impl Downloader for HttpDownloader {
    fn fetch(&self, url: &str, max_bytes: u64) -> Result<Vec<u8>> {
        log::debug!("Fetching from network: {url}");

        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("requesting {url}"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("{url} answered {status}");
        }

        if let Some(length) = response.content_length() {
            ensure!(
                length <= max_bytes,
                "{url} is {length} bytes, over the {max_bytes} byte limit"
            );
        }

        // Content-Length may be absent or wrong, so count as well
        let mut body = Vec::new();
        response
            .take(max_bytes + 1)
            .read_to_end(&mut body)
            .with_context(|| format!("reading body of {url}"))?;
        ensure!(
            body.len() as u64 <= max_bytes,
            "{url} exceeds the {max_bytes} byte limit"
        );

        log::debug!("Fetched {} bytes from {url}", body.len());
        Ok(body)
    }
}

#[test]
fn remote_locations() {
    assert!(is_remote("http://example.com/a.png"));
    assert!(is_remote("https://example.com/a.png"));
    assert!(!is_remote("/tmp/a.png"));
    assert!(!is_remote("file:///tmp/a.png"));
    assert!(!is_remote("HTTP://example.com/a.png"));
}
