//! Headless Chromium fetcher for JavaScript-rendered portals.
//!
//! Pages are loaded in a fresh tab, read back as the rendered DOM and the
//! tab is closed again, also when loading fails or times out.
//! Binary documents bypass the browser and go through the inner
//! [`HttpFetcher`]. Portals that never publish a PDF are printed to A4.

use super::http::HttpFetcher;
use super::{Document, Fetcher};
use crate::error::ScrapeError;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// Environment variable pointing at a Chromium/Chrome binary.
pub const CHROMIUM_PATH_ENV: &str = "BUR_CHROMIUM_PATH";

/// A4 in inches, as used by the print dialog.
const A4_WIDTH_IN: f64 = 8.27;
const A4_HEIGHT_IN: f64 = 11.69;

pub struct BrowserFetcher {
    browser: Browser,
    handler: JoinHandle<()>,
    http: HttpFetcher,
    timeout: Duration,
}

impl BrowserFetcher {
    /// Launch a headless browser. `BUR_CHROMIUM_PATH` overrides the
    /// executable lookup.
    #[instrument(level = "info", skip_all)]
    pub async fn launch(http: HttpFetcher, page_timeout: Duration) -> Result<Self, ScrapeError> {
        let mut builder = BrowserConfig::builder()
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .window_size(1400, 900);
        if let Ok(path) = std::env::var(CHROMIUM_PATH_ENV) {
            builder = builder.chrome_executable(PathBuf::from(path));
        }
        let config = builder.build().map_err(ScrapeError::Browser)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ScrapeError::Browser(format!("failed to launch Chromium: {e}")))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "Browser handler event error");
                }
            }
        });

        info!("Headless browser launched");
        Ok(Self {
            browser,
            handler,
            http,
            timeout: page_timeout,
        })
    }

    /// Close the browser and stop its event loop.
    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "Failed to close browser cleanly");
        }
        let _ = self.browser.wait().await;
        self.handler.abort();
    }

    /// A fresh tab on `about:blank`. Callers own it and must hand it back
    /// to [`BrowserFetcher::release`] whatever the outcome.
    async fn blank_tab(&self) -> Result<Page, ScrapeError> {
        self.browser
            .new_page("about:blank")
            .await
            .map_err(|e| ScrapeError::Browser(format!("failed to open a tab: {e}")))
    }

    /// Navigate `page` to `url` and wait for the load, within the page timeout.
    async fn navigate(&self, page: &Page, url: &str) -> Result<(), ScrapeError> {
        let load = async {
            page.goto(url)
                .await
                .map_err(|e| ScrapeError::Browser(format!("navigation to {url} failed: {e}")))?;
            page.wait_for_navigation()
                .await
                .map_err(|e| ScrapeError::Browser(format!("{url} did not finish loading: {e}")))?;
            Ok::<_, ScrapeError>(())
        };
        match timeout(self.timeout, load).await {
            Ok(result) => result,
            Err(_) => Err(ScrapeError::Timeout {
                url: url.to_string(),
                secs: self.timeout.as_secs(),
            }),
        }
    }

    async fn release(page: Page) {
        if let Err(e) = page.close().await {
            debug!(error = %e, "Failed to close tab");
        }
    }

    #[cfg(test)]
    async fn open_tabs(&self) -> usize {
        self.browser.pages().await.map(|p| p.len()).unwrap_or(0)
    }
}

impl Fetcher for BrowserFetcher {
    #[instrument(level = "debug", skip(self))]
    async fn fetch_html(&self, url: &str) -> Result<String, ScrapeError> {
        let page = self.blank_tab().await?;
        let html = match self.navigate(&page, url).await {
            Ok(()) => page
                .content()
                .await
                .map_err(|e| ScrapeError::Browser(format!("reading DOM of {url}: {e}"))),
            Err(e) => Err(e),
        };
        Self::release(page).await;
        html
    }

    async fn fetch_document(&self, url: &str) -> Result<Document, ScrapeError> {
        self.http.fetch_document(url).await
    }

    #[instrument(level = "debug", skip(self))]
    async fn render_pdf(&self, url: &str) -> Result<Vec<u8>, ScrapeError> {
        let page = self.blank_tab().await?;
        let pdf = match self.navigate(&page, url).await {
            Ok(()) => {
                let params = PrintToPdfParams::builder()
                    .print_background(true)
                    .paper_width(A4_WIDTH_IN)
                    .paper_height(A4_HEIGHT_IN)
                    .build();
                page.pdf(params)
                    .await
                    .map_err(|e| ScrapeError::Browser(format!("printing {url}: {e}")))
            }
            Err(e) => Err(e),
        };
        Self::release(page).await;
        pdf
    }
}
