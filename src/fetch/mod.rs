//! Origin fetching.
//!
//! Everything that touches the network goes through [`OriginFetcher`]:
//! it owns the shared HTTP client, the process-wide request gate, the
//! per-URL circuit breaker and the failed-URL memory. Components above it
//! (discovery, extraction, the orchestrator) never construct clients of
//! their own.

mod circuit;
mod gate;

pub use circuit::{CircuitBreaker, FailedUrlSet, FailureKind};
pub use gate::RequestGate;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::StatusCode;
use url::Url;

use crate::config::Config;
use crate::error::FeedError;
use crate::util::validate_public;

/// Response bodies are capped to keep a hostile origin from exhausting
/// memory.
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;
/// Total attempts per fetch (first try + retries).
const MAX_ATTEMPTS: u32 = 3;
/// Backoff base: 1000 · 2^(n-1) ms, capped below.
const BACKOFF_BASE_MS: u64 = 1000;
const BACKOFF_CAP_MS: u64 = 5000;
/// Discovery probes use a tighter deadline than page fetches.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);
/// How far into the body `<meta charset>` sniffing looks.
const CHARSET_SNIFF_WINDOW: usize = 4096;

/// Statuses that never retry: the origin has answered definitively.
const PERMANENT_STATUSES: &[u16] = &[400, 401, 403, 404, 405, 406, 410, 451];

/// Which spacing/deadline profile a fetch runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchProfile {
    /// Page and feed fetches on the request path.
    Standard,
    /// Discovery probes: double spacing, 5-second deadline.
    Discovery,
}

/// What the caller can observe about a response besides its body.
#[derive(Debug, Clone)]
pub struct FetchReport {
    pub status: u16,
    /// Effective URL after redirects.
    pub final_url: String,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub last_modified: Option<String>,
    /// From the Content-Type header, or `<meta charset>` in the first 4 KiB.
    pub charset: Option<String>,
}

/// A fetched body plus its report.
#[derive(Debug)]
pub struct FetchedBody {
    pub bytes: Vec<u8>,
    pub report: FetchReport,
}

impl FetchedBody {
    /// Body decoded as text. Origins overwhelmingly serve UTF-8; anything
    /// else is decoded lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Result of a ranged fetch.
#[derive(Debug)]
pub enum RangeBody {
    /// The origin honored the range; `bytes` holds the requested prefix.
    Partial(FetchedBody),
    /// The origin ignored the range; `bytes` holds at most the requested
    /// prefix of the full response.
    NotSupported(FetchedBody),
}

/// Retry classification for one attempt.
enum AttemptError {
    Permanent(FeedError),
    Retryable(FeedError),
}

/// Rate-shaped, retrying, circuit-broken HTTP access to origins.
pub struct OriginFetcher {
    client: reqwest::Client,
    gate: RequestGate,
    circuit: CircuitBreaker,
    failed: Arc<FailedUrlSet>,
    request_timeout: Duration,
    min_gap: Duration,
    allow_private_hosts: bool,
}

impl OriginFetcher {
    /// Builds the fetcher and its shared HTTP client.
    ///
    /// The client carries a desktop-browser identity: realistic
    /// User-Agent, Accept headers and client hints. Compression and
    /// redirect limits are set once here.
    ///
    /// # Errors
    ///
    /// [`FeedError::Internal`] if the client cannot be constructed.
    pub fn new(config: &Config, failed: Arc<FailedUrlSet>) -> Result<Self, FeedError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9"),
        );
        headers.insert(
            header::UPGRADE_INSECURE_REQUESTS,
            HeaderValue::from_static("1"),
        );
        headers.insert(
            "sec-ch-ua",
            HeaderValue::from_static("\"Chromium\";v=\"124\", \"Google Chrome\";v=\"124\""),
        );
        headers.insert("sec-ch-ua-mobile", HeaderValue::from_static("?0"));
        headers.insert("sec-ch-ua-platform", HeaderValue::from_static("\"Windows\""));

        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| FeedError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            gate: RequestGate::new(),
            circuit: CircuitBreaker::new(),
            failed,
            request_timeout: config.request_timeout,
            min_gap: config.min_fetch_gap,
            allow_private_hosts: config.allow_private_hosts,
        })
    }

    /// The shared failed-URL set (also consulted by discovery).
    pub fn failed_urls(&self) -> &Arc<FailedUrlSet> {
        &self.failed
    }

    /// Fetches a URL's body with retries, honoring the gate, the circuit
    /// breaker and the failed-URL memory.
    ///
    /// # Errors
    ///
    /// - [`FeedError::InvalidInput`] for private hosts (before any I/O)
    /// - [`FeedError::OriginClient`] for permanent 4xx — including cached
    ///   ones served without a network call
    /// - [`FeedError::OriginBlocked`] while the circuit is open
    /// - [`FeedError::OriginTimeout`] / [`FeedError::OriginUnreachable`] /
    ///   [`FeedError::OriginServer`] after retries are exhausted
    pub async fn get_body(
        &self,
        url: &Url,
        profile: FetchProfile,
    ) -> Result<FetchedBody, FeedError> {
        self.preflight(url).await?;

        let result = self.attempt_loop(url, profile).await;
        match &result {
            Ok(_) => self.circuit.record_success(url.as_str()).await,
            Err(_) => self.circuit.record_failure(url.as_str()).await,
        }
        result
    }

    /// Issues a HEAD request (single attempt, no retries).
    ///
    /// # Errors
    ///
    /// Same preflight errors as [`get_body`](Self::get_body); a non-2xx
    /// status maps to the matching origin error.
    pub async fn head(&self, url: &Url) -> Result<FetchReport, FeedError> {
        self.preflight(url).await?;
        self.gate.wait(self.min_gap).await;

        let response = tokio::time::timeout(
            self.request_timeout,
            self.client.head(url.clone()).send(),
        )
        .await
        .map_err(|_| FeedError::OriginTimeout)?
        .map_err(|e| classify_send_error(&e))?;

        let status = response.status();
        let report = build_report(&response, None);
        if status.is_success() {
            self.circuit.record_success(url.as_str()).await;
            Ok(report)
        } else {
            self.circuit.record_failure(url.as_str()).await;
            Err(status_error(status.as_u16()))
        }
    }

    /// Fetches at most the first `first_bytes` bytes of a URL.
    ///
    /// Uses a `Range` header; origins that ignore it get their body
    /// truncated client-side and reported as [`RangeBody::NotSupported`].
    ///
    /// # Errors
    ///
    /// Same as [`head`](Self::head).
    pub async fn get_range(
        &self,
        url: &Url,
        first_bytes: usize,
    ) -> Result<RangeBody, FeedError> {
        self.preflight(url).await?;
        self.gate.wait(self.min_gap).await;

        let range = format!("bytes=0-{}", first_bytes.saturating_sub(1));
        let response = tokio::time::timeout(
            self.request_timeout,
            self.client
                .get(url.clone())
                .header(header::RANGE, range)
                .send(),
        )
        .await
        .map_err(|_| FeedError::OriginTimeout)?
        .map_err(|e| classify_send_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            self.circuit.record_failure(url.as_str()).await;
            return Err(status_error(status.as_u16()));
        }
        self.circuit.record_success(url.as_str()).await;

        let ranged = status == StatusCode::PARTIAL_CONTENT;
        let mut report = build_report(&response, None);
        let bytes = read_prefix(response, first_bytes).await?;
        if report.charset.is_none() {
            report.charset = sniff_charset(&bytes);
        }
        let body = FetchedBody { bytes, report };

        Ok(if ranged {
            RangeBody::Partial(body)
        } else {
            RangeBody::NotSupported(body)
        })
    }

    /// Host policy, failed-URL memory and circuit state — all checked
    /// before any network I/O.
    async fn preflight(&self, url: &Url) -> Result<(), FeedError> {
        if !self.allow_private_hosts {
            validate_public(url)?;
        }
        if let Some(status) = self.failed.permanent_status(url.as_str()).await {
            tracing::debug!(url = %url, status = status, "Serving remembered permanent failure");
            return Err(FeedError::OriginClient { status });
        }
        self.circuit.check(url.as_str()).await
    }

    async fn attempt_loop(
        &self,
        url: &Url,
        profile: FetchProfile,
    ) -> Result<FetchedBody, FeedError> {
        let (gap, timeout) = match profile {
            FetchProfile::Standard => (self.min_gap, self.request_timeout),
            FetchProfile::Discovery => (self.min_gap * 2, DISCOVERY_TIMEOUT),
        };

        let mut attempt = 1;
        loop {
            self.gate.wait(gap).await;

            match self.try_once(url, timeout).await {
                Ok(body) => return Ok(body),
                Err(AttemptError::Permanent(e)) => return Err(e),
                Err(AttemptError::Retryable(e)) => {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(e);
                    }
                    let delay =
                        (BACKOFF_BASE_MS << (attempt - 1)).min(BACKOFF_CAP_MS);
                    tracing::debug!(
                        url = %url,
                        attempt = attempt,
                        delay_ms = delay,
                        error = %e,
                        "Retrying after transient failure"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn try_once(
        &self,
        url: &Url,
        timeout: Duration,
    ) -> Result<FetchedBody, AttemptError> {
        let response =
            match tokio::time::timeout(timeout, self.client.get(url.clone()).send()).await {
                Err(_) => return Err(AttemptError::Retryable(FeedError::OriginTimeout)),
                Ok(Err(e)) => return Err(AttemptError::Retryable(classify_send_error(&e))),
                Ok(Ok(response)) => response,
            };

        let status = response.status();
        let code = status.as_u16();

        if status.is_success() {
            let mut report = build_report(&response, None);
            let bytes = match read_limited(response, MAX_BODY_SIZE).await {
                Ok(bytes) => bytes,
                Err(FeedError::OriginUnreachable(msg)) => {
                    return Err(AttemptError::Retryable(FeedError::OriginUnreachable(msg)))
                }
                Err(e) => return Err(AttemptError::Permanent(e)),
            };
            if report.charset.is_none() {
                report.charset = sniff_charset(&bytes);
            }
            return Ok(FetchedBody { bytes, report });
        }

        if PERMANENT_STATUSES.contains(&code) {
            self.failed.record_status(url.as_str(), code).await;
            return Err(AttemptError::Permanent(FeedError::OriginClient {
                status: code,
            }));
        }

        // 5xx and unusual 4xx (429, 408, ...) retry with backoff
        Err(AttemptError::Retryable(status_error(code)))
    }
}

fn classify_send_error(err: &reqwest::Error) -> FeedError {
    if err.is_timeout() {
        FeedError::OriginTimeout
    } else {
        FeedError::OriginUnreachable(err.to_string())
    }
}

fn status_error(code: u16) -> FeedError {
    if (500..600).contains(&code) {
        FeedError::OriginServer { status: code }
    } else {
        FeedError::OriginClient { status: code }
    }
}

fn build_report(response: &reqwest::Response, charset: Option<String>) -> FetchReport {
    let header_str = |name: header::HeaderName| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    };

    let content_type = header_str(header::CONTENT_TYPE);
    let charset = charset.or_else(|| {
        content_type
            .as_deref()
            .and_then(|ct| charset_from_content_type(ct))
    });

    FetchReport {
        status: response.status().as_u16(),
        final_url: response.url().to_string(),
        content_type,
        content_length: response.content_length(),
        last_modified: header_str(header::LAST_MODIFIED),
        charset,
    }
}

/// Streams a body with a hard size cap, checking both the Content-Length
/// header and the bytes actually received so a lying origin cannot blow
/// the cap.
async fn read_limited(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, FeedError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FeedError::PageParse(format!(
                "response body of {len} bytes exceeds the {limit}-byte cap"
            )));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| FeedError::OriginUnreachable(e.to_string()))?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FeedError::PageParse(format!(
                "response body exceeds the {limit}-byte cap"
            )));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

/// Streams at most `limit` bytes, silently dropping the rest. Used by
/// ranged fetches against origins that ignore the Range header.
async fn read_prefix(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, FeedError> {
    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| FeedError::OriginUnreachable(e.to_string()))?;
        let remaining = limit.saturating_sub(bytes.len());
        if remaining == 0 {
            break;
        }
        bytes.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
    }

    Ok(bytes)
}

fn charset_from_content_type(content_type: &str) -> Option<String> {
    let lower = content_type.to_lowercase();
    let idx = lower.find("charset=")?;
    let rest = &lower[idx + "charset=".len()..];
    let end = rest
        .find([';', ' ', '"'])
        .unwrap_or(rest.len());
    let charset = rest[..end].trim_matches('"').trim();
    (!charset.is_empty()).then(|| charset.to_owned())
}

/// Looks for `<meta charset=...>` or the http-equiv form inside the first
/// [`CHARSET_SNIFF_WINDOW`] bytes.
fn sniff_charset(bytes: &[u8]) -> Option<String> {
    let window = &bytes[..bytes.len().min(CHARSET_SNIFF_WINDOW)];
    let text = String::from_utf8_lossy(window).to_lowercase();

    let idx = text.find("charset=")?;
    let rest = &text[idx + "charset=".len()..];
    let rest = rest.trim_start_matches(['"', '\'']);
    let end = rest
        .find(['"', '\'', ' ', '>', ';', '/'])
        .unwrap_or(rest.len());
    let charset = rest[..end].trim();
    (!charset.is_empty()).then(|| charset.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_fetcher() -> OriginFetcher {
        let config = Config {
            allow_private_hosts: true,
            min_fetch_gap: Duration::from_millis(0),
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        OriginFetcher::new(&config, Arc::new(FailedUrlSet::new())).unwrap()
    }

    #[tokio::test]
    async fn test_get_body_success_reports_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(
                        "<html><body>hello</body></html>",
                        "text/html; charset=utf-8",
                    )
                    .insert_header("Last-Modified", "Wed, 01 Jan 2025 00:00:00 GMT"),
            )
            .mount(&server)
            .await;

        let fetcher = test_fetcher();
        let url = Url::parse(&format!("{}/page", server.uri())).unwrap();
        let body = fetcher.get_body(&url, FetchProfile::Standard).await.unwrap();

        assert_eq!(body.report.status, 200);
        assert_eq!(body.report.charset.as_deref(), Some("utf-8"));
        assert_eq!(
            body.report.last_modified.as_deref(),
            Some("Wed, 01 Jan 2025 00:00:00 GMT")
        );
        assert!(body.text().contains("hello"));
    }

    #[tokio::test]
    async fn test_permanent_406_fails_after_one_call_and_is_remembered() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(406))
            .expect(1) // exactly one network call across both requests
            .mount(&server)
            .await;

        let fetcher = test_fetcher();
        let url = Url::parse(&format!("{}/nope", server.uri())).unwrap();

        let first = fetcher.get_body(&url, FetchProfile::Standard).await;
        assert!(matches!(
            first,
            Err(FeedError::OriginClient { status: 406 })
        ));

        // Second call is served from the failed-URL memory
        let second = fetcher.get_body(&url, FetchProfile::Standard).await;
        assert!(matches!(
            second,
            Err(FeedError::OriginClient { status: 406 })
        ));
    }

    #[tokio::test]
    async fn test_server_error_retries_three_times() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let fetcher = test_fetcher();
        let url = Url::parse(&format!("{}/flaky", server.uri())).unwrap();

        let result = fetcher.get_body(&url, FetchProfile::Standard).await;
        assert!(matches!(
            result,
            Err(FeedError::OriginServer { status: 500 })
        ));
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        use wiremock::matchers::any;

        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let fetcher = test_fetcher();
        let url = Url::parse(&format!("{}/eventually", server.uri())).unwrap();

        let body = fetcher.get_body(&url, FetchProfile::Standard).await.unwrap();
        assert_eq!(body.text(), "ok");
    }

    #[tokio::test]
    async fn test_circuit_opens_after_three_failed_calls() {
        let server = MockServer::start().await;
        // 3 calls x 3 attempts each = 9 requests, then the circuit opens
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(9)
            .mount(&server)
            .await;

        let fetcher = test_fetcher();
        let url = Url::parse(&format!("{}/down", server.uri())).unwrap();

        for _ in 0..3 {
            let result = fetcher.get_body(&url, FetchProfile::Standard).await;
            assert!(result.is_err());
        }

        // Fourth call fails fast without touching the network
        let blocked = fetcher.get_body(&url, FetchProfile::Standard).await;
        assert!(matches!(blocked, Err(FeedError::OriginBlocked { .. })));
    }

    #[tokio::test]
    async fn test_private_host_rejected_without_config_override() {
        let config = Config::default();
        let fetcher = OriginFetcher::new(&config, Arc::new(FailedUrlSet::new())).unwrap();
        let url = Url::parse("http://127.0.0.1:9/feed").unwrap();

        let result = fetcher.get_body(&url, FetchProfile::Standard).await;
        assert!(matches!(result, Err(FeedError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_head_reports_without_body() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("Content-Type", "application/rss+xml"),
            )
            .mount(&server)
            .await;

        let fetcher = test_fetcher();
        let url = Url::parse(&format!("{}/feed.xml", server.uri())).unwrap();
        let report = fetcher.head(&url).await.unwrap();

        assert_eq!(report.status, 200);
        assert_eq!(
            report.content_type.as_deref(),
            Some("application/rss+xml")
        );
    }

    #[test]
    fn test_charset_from_content_type() {
        assert_eq!(
            charset_from_content_type("text/html; charset=UTF-8").as_deref(),
            Some("utf-8")
        );
        assert_eq!(
            charset_from_content_type("text/html; charset=\"iso-8859-1\"").as_deref(),
            Some("iso-8859-1")
        );
        assert_eq!(charset_from_content_type("text/html"), None);
    }

    #[test]
    fn test_sniff_charset_from_meta() {
        let html = br#"<html><head><meta charset="windows-1252"></head><body></body></html>"#;
        assert_eq!(sniff_charset(html).as_deref(), Some("windows-1252"));

        let http_equiv = br#"<meta http-equiv="Content-Type" content="text/html; charset=utf-8">"#;
        assert_eq!(sniff_charset(http_equiv).as_deref(), Some("utf-8"));

        assert_eq!(sniff_charset(b"<html><body>plain</body></html>"), None);
    }

    #[test]
    fn test_sniff_charset_only_scans_window() {
        let mut html = vec![b' '; CHARSET_SNIFF_WINDOW];
        html.extend_from_slice(br#"<meta charset="utf-8">"#);
        assert_eq!(sniff_charset(&html), None);
    }
}
