//! Plain HTTP downloads with `If-Modified-Since` revalidation.

use crate::artifact::write_atomic;
use crate::config::HttpConfig;
use crate::error::FetchError;
use crate::pipeline::freshness::{mtime, set_mtime};
use crate::pipeline::types::{Refresh, RuleOutcome};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{IF_MODIFIED_SINCE, LAST_MODIFIED};
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

/// HTTP client shared by every download rule.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| FetchError::Request {
                url: String::new(),
                message: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Download `url` to `dest`.
    ///
    /// With [`Refresh::Conditional`] and an existing `dest`, the file's mtime
    /// is sent as `If-Modified-Since` and a 304 leaves it untouched. New
    /// content replaces `dest` atomically and takes the server's
    /// `Last-Modified` time.
    pub async fn conditional_download(
        &self,
        url: &str,
        dest: &Path,
        refresh: &Refresh,
    ) -> Result<RuleOutcome, FetchError> {
        let request_error = |e: reqwest::Error| FetchError::Request {
            url: url.to_string(),
            message: e.to_string(),
        };

        let mut request = self.client.get(url);
        if *refresh == Refresh::Conditional
            && let Some(cached) = mtime(dest)
        {
            let since = http_date(cached);
            debug!(url, since = %since, "Conditional request");
            request = request.header(IF_MODIFIED_SINCE, since);
        }

        let response = request.send().await.map_err(request_error)?;
        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            info!(url, "Not modified");
            return Ok(RuleOutcome::Unchanged);
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date);
        let body = response.bytes().await.map_err(request_error)?;
        let io_error = |e: std::io::Error| FetchError::Request {
            url: url.to_string(),
            message: format!("writing {}: {e}", dest.display()),
        };
        write_atomic(dest, &body).await.map_err(io_error)?;
        if let Some(modified) = last_modified {
            set_mtime(dest, modified).map_err(io_error)?;
        }
        info!(url, bytes = body.len(), dest = %dest.display(), "Downloaded");
        Ok(RuleOutcome::Built)
    }
}

/// Format a time as an RFC 7231 HTTP date.
pub fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Parse an HTTP date header.
pub fn parse_http_date(value: &str) -> Option<SystemTime> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| SystemTime::from(dt.with_timezone(&Utc)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve a single canned response and capture the request head.
    async fn serve_once(response: &'static str) -> (String, Arc<Mutex<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(String::new()));
        let captured = seen.clone();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let n = socket.read(&mut buf).await.unwrap();
            *captured.lock().unwrap() = String::from_utf8_lossy(&buf[..n]).into_owned();
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        (format!("http://{addr}/rfc-index.xml"), seen)
    }

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(&HttpConfig::default()).unwrap()
    }

    #[test]
    fn test_http_date_roundtrip() {
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(1_445_412_480);
        let s = http_date(t);
        assert_eq!(s, "Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(parse_http_date(&s), Some(t));
        assert_eq!(parse_http_date("yesterday"), None);
    }

    #[tokio::test]
    async fn test_download_sets_last_modified() {
        let (url, _) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 7\r\nLast-Modified: Wed, 21 Oct 2015 07:28:00 GMT\r\nConnection: close\r\n\r\n<index>",
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("rfc-index.xml");
        let outcome = fetcher()
            .conditional_download(&url, &dest, &Refresh::Conditional)
            .await
            .unwrap();
        assert_eq!(outcome, RuleOutcome::Built);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "<index>");
        assert_eq!(
            mtime(&dest),
            Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1_445_412_480))
        );
    }

    #[tokio::test]
    async fn test_not_modified_keeps_file() {
        let (url, seen) =
            serve_once("HTTP/1.1 304 Not Modified\r\nConnection: close\r\n\r\n").await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("rfc-index.xml");
        std::fs::write(&dest, "cached").unwrap();
        let outcome = fetcher()
            .conditional_download(&url, &dest, &Refresh::Conditional)
            .await
            .unwrap();
        assert_eq!(outcome, RuleOutcome::Unchanged);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "cached");
        assert!(seen.lock().unwrap().to_lowercase().contains("if-modified-since:"));
    }

    #[tokio::test]
    async fn test_error_status() {
        let (url, _) = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("rfc-index.xml");
        let err = fetcher()
            .conditional_download(&url, &dest, &Refresh::Missing)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 503, .. }));
        assert!(!dest.exists());
    }
}
