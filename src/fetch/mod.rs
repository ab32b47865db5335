//! Page and document retrieval.
//!
//! The pipeline only needs three capabilities from a portal, captured by
//! the [`Fetcher`] trait:
//!
//! | Operation | Used for |
//! |-----------|----------|
//! | `fetch_html` | listing pages and detail pages |
//! | `fetch_document` | binary PDFs |
//! | `render_pdf` | portals that publish acts only as HTML |
//!
//! # Implementations
//!
//! - [`http::HttpFetcher`]: plain `reqwest` client
//! - [`browser::BrowserFetcher`]: headless Chromium (feature `browser`)
//! - [`retry::Retrying`]: decorator adding bounded retries to any fetcher

#[cfg(feature = "browser")]
pub mod browser;
pub mod http;
pub mod retry;

use crate::error::ScrapeError;

/// Desktop browser User-Agent sent to every portal; several of them reject
/// the default client string.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// A binary document as served by the portal.
#[derive(Debug, Clone)]
pub struct Document {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    /// Raw `Content-Disposition` header, which some portals use to carry
    /// the act's date in the suggested file name.
    pub disposition: Option<String>,
    /// URL after redirects.
    pub final_url: String,
}

impl Document {
    /// Whether the payload is a PDF file (`%PDF` magic, leading whitespace
    /// tolerated). The declared content type is not trusted: some portals
    /// serve PDFs as `application/octet-stream` and error pages as PDFs.
    pub fn is_pdf(&self) -> bool {
        let start = self
            .bytes
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(self.bytes.len());
        self.bytes[start..].starts_with(b"%PDF")
    }
}

/// Retrieval capabilities the pipeline needs from a portal.
pub trait Fetcher {
    /// Fetch a page and return its HTML.
    async fn fetch_html(&self, url: &str) -> Result<String, ScrapeError>;

    /// Fetch a binary document.
    async fn fetch_document(&self, url: &str) -> Result<Document, ScrapeError>;

    /// Render a page to PDF. Only browser-backed fetchers support this.
    async fn render_pdf(&self, url: &str) -> Result<Vec<u8>, ScrapeError> {
        Err(ScrapeError::Unsupported(format!(
            "rendering {url} to PDF needs a browser fetcher"
        )))
    }
}

impl<F: Fetcher> Fetcher for &F {
    async fn fetch_html(&self, url: &str) -> Result<String, ScrapeError> {
        (**self).fetch_html(url).await
    }

    async fn fetch_document(&self, url: &str) -> Result<Document, ScrapeError> {
        (**self).fetch_document(url).await
    }

    async fn render_pdf(&self, url: &str) -> Result<Vec<u8>, ScrapeError> {
        (**self).render_pdf(url).await
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn doc(bytes: &[u8]) -> Document {
        Document {
            bytes: bytes.to_vec(),
            content_type: None,
            disposition: None,
            final_url: "https://example.it/a.pdf".into(),
        }
    }

    #[test]
    fn test_pdf_magic_detection() {
        assert!(doc(b"%PDF-1.7 ...").is_pdf());
        assert!(doc(b"\r\n  %PDF-1.4").is_pdf());
        assert!(!doc(b"<!DOCTYPE html><html>").is_pdf());
        assert!(!doc(b"").is_pdf());
    }

    #[tokio::test]
    async fn test_stub_unknown_url_is_404() {
        let stub = stub::StubFetcher::new().html("https://example.it/", "<p>ok</p>");
        assert_eq!(stub.fetch_html("https://example.it/").await.unwrap(), "<p>ok</p>");
        let err = stub.fetch_html("https://example.it/missing").await.unwrap_err();
        assert!(matches!(err, ScrapeError::Status { status: 404, .. }));
        assert_eq!(stub.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_render_pdf_unsupported_by_default() {
        let stub = stub::StubFetcher::new().html("https://example.it/", "<p>ok</p>");
        assert!(matches!(
            stub.render_pdf("https://example.it/").await,
            Err(ScrapeError::Unsupported(_))
        ));
    }
}
