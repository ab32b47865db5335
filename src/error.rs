//! Error taxonomy for a region run.
//!
//! Errors fall into three groups that the pipeline treats differently:
//! transport failures (retried, then the page or entry is skipped),
//! document/markup failures (local to one record) and environment failures
//! (filesystem, configuration) which abort the run.

use thiserror::Error;

/// Errors produced while fetching, extracting, downloading or exporting.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Transport-level failure reported by the HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A request or page load exceeded its deadline.
    #[error("timed out after {secs}s: {url}")]
    Timeout { url: String, secs: u64 },

    /// The server answered with a non-success status code.
    #[error("unexpected status {status} for {url}")]
    Status { status: u16, url: String },

    /// The downloaded payload is not a PDF document.
    #[error("not a PDF document ({content_type}): {url}")]
    NotPdf { url: String, content_type: String },

    /// A CSS selector in the region configuration failed to compile.
    #[error("invalid selector `{selector}`: {reason}")]
    Selector { selector: String, reason: String },

    /// The region configuration is semantically invalid.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Headless browser failure (launch, navigation, printing).
    #[error("browser error: {0}")]
    Browser(String),

    /// The fetcher cannot perform the requested operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Every listing page of a portal failed to load.
    #[error("portal unreachable: {region} ({failed} listing page(s) failed)")]
    PortalUnreachable { region: String, failed: usize },
}

impl ScrapeError {
    /// Whether a retry of the same request has a chance of succeeding.
    ///
    /// Timeouts, connection failures, `429 Too Many Requests` and 5xx
    /// answers are transient. Everything else (4xx, wrong content, bad
    /// configuration, local I/O) is returned to the caller immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScrapeError::Timeout { .. } => true,
            ScrapeError::Status { status, .. } => *status == 429 || *status >= 500,
            ScrapeError::Http(e) => {
                if let Some(status) = e.status() {
                    status.as_u16() == 429 || status.is_server_error()
                } else {
                    e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
                }
            }
            ScrapeError::Browser(_) => true,
            _ => false,
        }
    }

    /// Whether the error comes from the local environment rather than the portal.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScrapeError::Io(_)
                | ScrapeError::Csv(_)
                | ScrapeError::Json(_)
                | ScrapeError::Config(_)
                | ScrapeError::Yaml(_)
                | ScrapeError::Selector { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let busy = ScrapeError::Status {
            status: 503,
            url: "https://example.it".into(),
        };
        let throttled = ScrapeError::Status {
            status: 429,
            url: "https://example.it".into(),
        };
        let gone = ScrapeError::Status {
            status: 404,
            url: "https://example.it".into(),
        };
        assert!(busy.is_retryable());
        assert!(throttled.is_retryable());
        assert!(!gone.is_retryable());
    }

    #[test]
    fn test_timeout_is_retryable() {
        let e = ScrapeError::Timeout {
            url: "https://example.it".into(),
            secs: 30,
        };
        assert!(e.is_retryable());
        assert!(!e.is_fatal());
    }

    #[test]
    fn test_local_failures_are_fatal_and_not_retried() {
        let io = ScrapeError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        assert!(io.is_fatal());
        assert!(!io.is_retryable());

        let not_pdf = ScrapeError::NotPdf {
            url: "https://example.it/a".into(),
            content_type: "text/html".into(),
        };
        assert!(!not_pdf.is_fatal());
        assert!(!not_pdf.is_retryable());
    }
}
