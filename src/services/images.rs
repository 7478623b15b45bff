//! Relocation of images whose source URLs expire.
//!
//! The content store hands out signed, short-lived URLs for uploaded images.
//! Those are downloaded once, stored under a name derived from the URL, and
//! the markdown is rewritten to point at the stable local copy.

use regex::Regex;
use reqwest::blocking::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::services::translation_store::write_atomic;

pub const DEFAULT_TRANSIENT_PATTERN: &str =
    r"^https://(prod-files-secure\.s3\.[a-z0-9-]+\.amazonaws\.com|s3\.[a-z0-9-]+\.amazonaws\.com/secure\.notion-static\.com|file\.notion\.so)/";

const DEFAULT_EXTENSION: &str = "png";

pub trait ImageFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct HttpImageFetcher {
    client: Client,
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self { client })
    }
}

impl ImageFetcher for HttpImageFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self.client.get(url).send()?.error_for_status()?;
        let bytes = resp.bytes()?;
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Clone)]
pub struct RelocationConfig {
    pub dir: PathBuf,
    pub url_prefix: String,
    pub transient: Regex,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RelocationReport {
    pub downloaded: usize,
    pub reused: usize,
    pub failed: usize,
}

pub struct ImageRelocator<'a> {
    cfg: &'a RelocationConfig,
    fetcher: &'a dyn ImageFetcher,
}

fn image_pattern() -> &'static Regex {
    static IMAGE: OnceLock<Regex> = OnceLock::new();
    IMAGE.get_or_init(|| Regex::new(r"!\[(?P<alt>[^\]]*)\]\((?P<url>[^)\s]+)\)").unwrap())
}

impl<'a> ImageRelocator<'a> {
    pub fn new(cfg: &'a RelocationConfig, fetcher: &'a dyn ImageFetcher) -> Self {
        Self { cfg, fetcher }
    }

    /// Returns the rewritten markdown. A failed download keeps the original
    /// URL in place.
    pub fn relocate(&self, markdown: &str) -> (String, RelocationReport) {
        let mut report = RelocationReport::default();

        let rewritten = image_pattern()
            .replace_all(markdown, |c: &regex::Captures| {
                let url = &c["url"];
                if !self.cfg.transient.is_match(url) {
                    return c[0].to_string();
                }

                match self.localize(url, &mut report) {
                    Ok(local) => format!("![{}]({})", &c["alt"], local),
                    Err(e) => {
                        warn!(url = %redact(url), "image download failed, keeping original URL: {e}");
                        report.failed += 1;
                        c[0].to_string()
                    }
                }
            })
            .into_owned();

        if report.downloaded + report.failed > 0 {
            info!(
                downloaded = report.downloaded,
                reused = report.reused,
                failed = report.failed,
                "relocated images"
            );
        }

        (rewritten, report)
    }

    fn localize(&self, url: &str, report: &mut RelocationReport) -> Result<String> {
        let file_name = local_file_name(url);
        let path = self.cfg.dir.join(&file_name);

        if path.exists() {
            debug!(file = %file_name, "image already downloaded");
            report.reused += 1;
        } else {
            let bytes = self.fetcher.fetch(url)?;
            write_atomic(&path, &bytes)?;
            report.downloaded += 1;
        }

        Ok(format!("{}/{}", self.cfg.url_prefix.trim_end_matches('/'), file_name))
    }
}

/// `<first 16 hex chars of sha256(url)>.<ext>`
pub fn local_file_name(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let hash = hex::encode(digest);
    format!("{}.{}", &hash[..16], extension_of(url))
}

fn extension_of(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or(path);

    Path::new(last)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

// Signed URLs carry credentials in the query string.
fn redact(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct FakeFetcher {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    impl FakeFetcher {
        fn new(fail: bool) -> Self {
            Self { calls: Mutex::new(Vec::new()), fail }
        }
    }

    impl ImageFetcher for FakeFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            self.calls.lock().unwrap().push(url.to_string());
            if self.fail {
                return Err(Error::Network("unreachable".into()));
            }
            Ok(vec![0x89, b'P', b'N', b'G'])
        }
    }

    fn config(dir: &Path) -> RelocationConfig {
        RelocationConfig {
            dir: dir.to_path_buf(),
            url_prefix: "/images/posts/".into(),
            transient: Regex::new(DEFAULT_TRANSIENT_PATTERN).unwrap(),
        }
    }

    const SIGNED: &str = "https://prod-files-secure.s3.us-west-2.amazonaws.com/abc/def/photo.JPG?X-Amz-Signature=xyz";

    #[test]
    fn transient_images_are_downloaded_once() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(tmp.path());
        let fetcher = FakeFetcher::new(false);
        let relocator = ImageRelocator::new(&cfg, &fetcher);

        let md = format!("![사진]({SIGNED})\n\n![외부](https://example.com/a.png)");
        let (out, report) = relocator.relocate(&md);

        let name = local_file_name(SIGNED);
        assert!(name.ends_with(".jpg"));
        assert!(out.contains(&format!("![사진](/images/posts/{name})")));
        assert!(out.contains("![외부](https://example.com/a.png)"));
        assert!(tmp.path().join(&name).exists());
        assert_eq!(report.downloaded, 1);

        let (again, report) = relocator.relocate(&md);
        assert_eq!(again, out);
        assert_eq!(report.reused, 1);
        assert_eq!(fetcher.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn failed_download_keeps_original_url() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(tmp.path());
        let fetcher = FakeFetcher::new(true);

        let md = format!("![사진]({SIGNED})");
        let (out, report) = ImageRelocator::new(&cfg, &fetcher).relocate(&md);
        assert_eq!(out, md);
        assert_eq!(report.failed, 1);
    }

    #[test]
    fn extension_defaults_when_missing() {
        assert_eq!(extension_of("https://x/y/z"), "png");
        assert_eq!(extension_of("https://x/y/z.webp?sig=1"), "webp");
    }
}
