//! Attachment download and the URL-to-text entry point used by the tool layer.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{header, redirect, Client};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::extract::RawDocument;

pub const USER_AGENT: &str = concat!("nara-extract/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_DOWNLOAD_MB: u64 = 100;
const MAX_REDIRECTS: usize = 10;

static EXTENDED_FILENAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)filename\*=(?:UTF-8''|utf-8'')(.+?)(?:;|$)").expect("valid filename* pattern")
});

static PLAIN_FILENAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"filename="?([^";\n]+)"?"#).expect("valid filename pattern"));

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP {0}")]
    Status(u16),

    #[error("request timed out")]
    Timeout,

    #[error("response body exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("{0}")]
    Request(#[from] reqwest::Error),
}

impl DownloadError {
    fn classify(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DownloadError::Timeout
        } else {
            DownloadError::Request(err)
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub timeout: Duration,
    pub max_bytes: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_bytes: DEFAULT_MAX_DOWNLOAD_MB * 1024 * 1024,
        }
    }
}

/// A fetched attachment. `filename` is whatever the server or the URL said,
/// possibly empty.
#[derive(Debug)]
pub struct Download {
    pub bytes: Vec<u8>,
    pub filename: String,
}

#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    max_bytes: u64,
}

impl Downloader {
    pub fn new(config: &DownloadConfig) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            max_bytes: config.max_bytes,
        })
    }

    pub async fn download(&self, url: &str) -> Result<Download, DownloadError> {
        info!(target: "fetch", url = %url, "Starting download");

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(DownloadError::classify)?;

        let status = response.status();
        if !status.is_success() {
            warn!(target: "fetch", url = %url, status = status.as_u16(), "HTTP non-success status");
            return Err(DownloadError::Status(status.as_u16()));
        }

        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                warn!(target: "fetch", url = %url, length, "Declared body length over limit");
                return Err(DownloadError::TooLarge {
                    limit: self.max_bytes,
                });
            }
        }

        let filename = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|value| filename_from_disposition(value.as_bytes()))
            .unwrap_or_else(|| filename_from_url(response.url().as_str()));

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(DownloadError::classify)? {
            if (bytes.len() + chunk.len()) as u64 > self.max_bytes {
                warn!(target: "fetch", url = %url, "Body grew past the size limit");
                return Err(DownloadError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        info!(target: "fetch", url = %url, size = bytes.len(), filename = %filename, "Download completed");
        Ok(Download { bytes, filename })
    }
}

/// Filename announced by a `Content-Disposition` header, RFC 5987 form first.
pub fn filename_from_disposition(raw: &[u8]) -> Option<String> {
    let value = decode_header_bytes(raw);

    if let Some(caps) = EXTENDED_FILENAME.captures(&value) {
        let name = percent_decode(caps[1].trim());
        if !name.is_empty() {
            return Some(name);
        }
    }

    let caps = PLAIN_FILENAME.captures(&value)?;
    let name = caps[1].trim();
    let name = if name.contains('%') {
        percent_decode(name)
    } else {
        name.to_string()
    };
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Last path segment of the URL, percent-decoded. Empty when the path ends
/// in `/` or the URL does not parse.
pub fn filename_from_url(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(percent_decode))
        })
        .unwrap_or_default()
}

fn percent_decode(value: &str) -> String {
    decode_header_bytes(&urlencoding::decode_binary(value.as_bytes()))
}

/// Header bytes as text. Korean servers often send raw EUC-KR here, so
/// anything that is not UTF-8 goes through charset detection.
fn decode_header_bytes(raw: &[u8]) -> String {
    if let Ok(text) = std::str::from_utf8(raw) {
        return text.to_string();
    }
    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(raw, true);
    let encoding = detector.guess(Some(b"kr"), true);
    debug!(target: "fetch", encoding = encoding.name(), "Decoding non-UTF-8 header value");
    let (decoded, _, _) = encoding.decode(raw);
    decoded.into_owned()
}

/// Downloads `url` and extracts its text. Never fails: download problems are
/// rendered as notices carrying the manual link. A non-empty `filename` wins
/// over the one the server announced.
pub async fn extract_text_from_url(downloader: &Downloader, url: &str, filename: &str) -> String {
    let download = match downloader.download(url).await {
        Ok(download) => download,
        Err(DownloadError::Status(code)) => {
            return format!("Download failed (HTTP {}). Manual link: {}", code, url)
        }
        Err(DownloadError::Timeout) => return format!("Download timed out. Manual link: {}", url),
        Err(e) => return format!("Text extraction unavailable: {}. Manual link: {}", e, url),
    };

    let filename = if filename.is_empty() {
        download.filename
    } else {
        filename.to_string()
    };
    if filename.is_empty() {
        return format!(
            "Text extraction unavailable: Could not determine file type. Manual link: {}",
            url
        );
    }

    let document = RawDocument::new(download.bytes, filename, url);
    match tokio::task::spawn_blocking(move || document.extract()).await {
        Ok(text) => text,
        Err(e) => {
            warn!(target: "fetch", url = %url, "Extraction task failed: {}", e);
            format!("Text extraction unavailable: {}. Manual link: {}", e, url)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn extended_filename_wins_and_is_decoded() {
        let header = "attachment; filename=\"fallback.pdf\"; filename*=UTF-8''%EC%A0%9C%EC%95%88%EC%9A%94%EC%B2%AD%EC%84%9C.hwp";
        assert_eq!(
            filename_from_disposition(header.as_bytes()).as_deref(),
            Some("제안요청서.hwp")
        );
    }

    #[test]
    fn plain_filename_with_or_without_quotes() {
        assert_eq!(
            filename_from_disposition(b"attachment; filename=\"spec v2.docx\"").as_deref(),
            Some("spec v2.docx")
        );
        assert_eq!(
            filename_from_disposition(b"attachment; filename=data.xlsx; size=10").as_deref(),
            Some("data.xlsx")
        );
        assert_eq!(
            filename_from_disposition(b"attachment; filename=\"%EA%B3%B5%EA%B3%A0.pdf\"").as_deref(),
            Some("공고.pdf")
        );
        assert_eq!(filename_from_disposition(b"inline"), None);
    }

    #[test]
    fn raw_euc_kr_header_is_detected() {
        let (raw, _, _) = encoding_rs::EUC_KR.encode("attachment; filename=\"과업지시서.hwp\"");
        assert_eq!(
            filename_from_disposition(&raw).as_deref(),
            Some("과업지시서.hwp")
        );
    }

    #[test]
    fn url_fallback_uses_last_segment() {
        assert_eq!(
            filename_from_url("https://example.org/files/%EA%B3%B5%EA%B3%A0.hwpx?id=3"),
            "공고.hwpx"
        );
        assert_eq!(filename_from_url("https://example.org/download/"), "");
        assert_eq!(filename_from_url("not a url"), "");
    }

    /// Serves one canned HTTP response and returns the base URL.
    async fn serve_once(response: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(&response).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{}", addr)
    }

    fn http_response(status: &str, headers: &[&str], body: &[u8]) -> Vec<u8> {
        let mut out = format!("HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n", status, body.len());
        for h in headers {
            out.push_str(h);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        let mut out = out.into_bytes();
        out.extend_from_slice(body);
        out
    }

    fn downloader() -> Downloader {
        Downloader::new(&DownloadConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn http_error_is_reported_with_manual_link() {
        let base = serve_once(http_response("404 Not Found", &[], b"")).await;
        let url = format!("{}/missing.hwp", base);
        assert_eq!(
            extract_text_from_url(&downloader(), &url, "missing.hwp").await,
            format!("Download failed (HTTP 404). Manual link: {}", url)
        );
    }

    #[tokio::test]
    async fn announced_filename_drives_dispatch() {
        let base = serve_once(http_response(
            "200 OK",
            &["Content-Disposition: attachment; filename*=UTF-8''%EA%B3%B5%EA%B3%A0.txt"],
            b"plain text",
        ))
        .await;
        let url = format!("{}/download?id=7", base);
        assert_eq!(
            extract_text_from_url(&downloader(), &url, "").await,
            format!("Unsupported file format: .txt. Please check the manual link: {}", url)
        );
    }

    #[tokio::test]
    async fn unknown_name_is_reported() {
        let base = serve_once(http_response("200 OK", &[], b"data")).await;
        let url = format!("{}/", base);
        assert_eq!(
            extract_text_from_url(&downloader(), &url, "").await,
            format!(
                "Text extraction unavailable: Could not determine file type. Manual link: {}",
                url
            )
        );
    }

    #[tokio::test]
    async fn oversized_body_is_refused() {
        let base = serve_once(http_response("200 OK", &[], &[b'x'; 64])).await;
        let config = DownloadConfig {
            max_bytes: 16,
            ..DownloadConfig::default()
        };
        let small = Downloader::new(&config).unwrap();
        let url = format!("{}/big.pdf", base);
        assert_eq!(
            extract_text_from_url(&small, &url, "big.pdf").await,
            format!(
                "Text extraction unavailable: response body exceeds 16 bytes. Manual link: {}",
                url
            )
        );
    }

    #[tokio::test]
    async fn stalled_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let config = DownloadConfig {
            timeout: Duration::from_millis(200),
            ..DownloadConfig::default()
        };
        let url = format!("http://{}/slow.hwp", addr);
        assert_eq!(
            extract_text_from_url(&Downloader::new(&config).unwrap(), &url, "slow.hwp").await,
            format!("Download timed out. Manual link: {}", url)
        );
    }
}
