//! Browser infrastructure: the page-driver seam and its Chrome backend
//!
//! The engine only talks to [`PageDriver`] and [`DriverFactory`]. The
//! chromiumoxide-backed [`ChromeDriver`] is the production implementation;
//! tests substitute scripted drivers.

mod chrome;
mod scripts;
mod wrapper;

pub use chrome::{ChromeDriver, ChromeDriverFactory};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("Failed to create page: {0}")]
    PageCreationFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Navigation timed out after {}ms", .0.as_millis())]
    NavigationTimeout(Duration),

    #[error("Script evaluation failed: {0}")]
    Script(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Browser not available: {0}")]
    Unavailable(String),
}

pub type BrowserResult<T> = Result<T, BrowserError>;

/// Document load state as reported by the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Readiness {
    pub ready_state: String,
    pub visible_text_len: usize,
}

impl Readiness {
    pub fn is_ready(&self, min_visible_text: usize) -> bool {
        self.ready_state == "complete" && self.visible_text_len > min_visible_text
    }
}

/// A selector whose visible presence indicates a real product page
///
/// Written in config as `{ css: ".panel" }` or `{ xpath: "//button" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SignalEntry", into = "SignalEntry")]
pub enum ProductSignal {
    Css(String),
    Xpath(String),
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SignalEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    css: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    xpath: Option<String>,
}

impl TryFrom<SignalEntry> for ProductSignal {
    type Error = String;

    fn try_from(entry: SignalEntry) -> Result<Self, Self::Error> {
        match (entry.css, entry.xpath) {
            (Some(css), None) => Ok(ProductSignal::Css(css)),
            (None, Some(xpath)) => Ok(ProductSignal::Xpath(xpath)),
            _ => Err("a product signal needs exactly one of `css` or `xpath`".to_string()),
        }
    }
}

impl From<ProductSignal> for SignalEntry {
    fn from(signal: ProductSignal) -> Self {
        match signal {
            ProductSignal::Css(css) => SignalEntry {
                css: Some(css),
                xpath: None,
            },
            ProductSignal::Xpath(xpath) => SignalEntry {
                css: None,
                xpath: Some(xpath),
            },
        }
    }
}

/// Page-level primitives a worker session and task executors drive
///
/// One driver is owned by exactly one worker session. `Sync` is required so
/// that a session borrowed across an await stays `Send`.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Load `url`. Implementations return [`BrowserError::NavigationTimeout`]
    /// when their own transport gives up waiting.
    async fn goto(&mut self, url: &str) -> BrowserResult<()>;

    /// Abort any in-flight load, keeping whatever DOM has rendered
    async fn stop_loading(&mut self) -> BrowserResult<()>;

    async fn readiness(&mut self) -> BrowserResult<Readiness>;

    /// True if at least one element matching `signal` is displayed
    async fn has_visible(&mut self, signal: &ProductSignal) -> BrowserResult<bool>;

    /// Write a PNG of the current viewport to `path`
    async fn screenshot(&mut self, path: &Path) -> BrowserResult<()>;

    /// Click the first element matching `css`; false if none matched
    async fn click_first(&mut self, css: &str) -> BrowserResult<bool>;

    /// Trimmed inner text of the first element matching `css`
    async fn inner_text(&mut self, css: &str) -> BrowserResult<Option<String>>;

    /// Click the first element under `css` whose text matches `text`
    ///
    /// `exact` compares trimmed text for equality; otherwise a
    /// case-insensitive substring match is used. Returns the clicked
    /// element's text.
    async fn click_matching(
        &mut self,
        css: &str,
        text: &str,
        exact: bool,
    ) -> BrowserResult<Option<String>>;

    async fn evaluate(&mut self, script: &str) -> BrowserResult<serde_json::Value>;

    /// Tear down the underlying browser context
    async fn close(&mut self) -> BrowserResult<()>;
}

/// Creates a fresh driver (browser context) for a worker
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn launch(&self, worker_id: &str) -> BrowserResult<Box<dyn PageDriver>>;
}
