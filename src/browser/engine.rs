//! Browsing capability the grader depends on.
//!
//! The pipeline only ever talks to these traits; [`crate::browser::session`]
//! backs them with a WebDriver server. Every context is its own browser
//! session, so cookies and storage never leak between tasks.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the browsing capability
#[derive(Debug, Error)]
pub enum BrowserError {
    /// The engine itself cannot be reached or started
    #[error("browser engine unavailable: {0}")]
    EngineUnavailable(String),

    /// A new isolated context could not be opened
    #[error("failed to open browsing context: {0}")]
    Context(String),

    #[error("navigation to {url} timed out after {timeout:?}")]
    NavigationTimeout { url: String, timeout: Duration },

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    /// Any command against an already loaded page
    #[error("page command failed: {0}")]
    Command(String),
}

impl BrowserError {
    /// Engine-level failures end the whole batch instead of one task
    pub fn is_environmental(&self) -> bool {
        matches!(self, BrowserError::EngineUnavailable(_))
    }
}

/// Shared browser engine handing out isolated contexts
#[async_trait]
pub trait BrowsingEngine: Send + Sync {
    /// Check the engine is reachable before any work is scheduled
    async fn launch(&self) -> Result<(), BrowserError>;

    /// Open a fresh context with its own cookie and storage sandbox
    async fn open_context(&self) -> Result<Box<dyn BrowsingContext>, BrowserError>;
}

/// An isolated browsing context holding a single page
#[async_trait]
pub trait BrowsingContext: Page {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), BrowserError>;

    /// Release the context; errors are logged, never returned
    async fn close(self: Box<Self>);
}

/// Read and interact with the currently loaded page
#[async_trait]
pub trait Page: Send + Sync {
    /// Rendered DOM snapshot
    async fn content(&self) -> Result<String, BrowserError>;

    async fn title(&self) -> Result<String, BrowserError>;

    /// First visible element matching a CSS selector
    async fn find(&self, selector: &str) -> Result<Option<Box<dyn PageElement>>, BrowserError>;

    /// Let the page settle
    async fn wait(&self, duration: Duration);
}

/// An element located on a page
#[async_trait]
pub trait PageElement: Send + Sync {
    /// Click the element
    async fn activate(&self) -> Result<(), BrowserError>;

    /// Replace the element's text with `text`
    async fn fill(&self, text: &str) -> Result<(), BrowserError>;

    /// PNG capture of the element
    async fn capture(&self) -> Result<Vec<u8>, BrowserError>;
}

/// Try `selectors` in order and return the first element found
pub async fn find_first<P: Page + ?Sized>(
    page: &P,
    selectors: &[&str],
) -> Result<Option<Box<dyn PageElement>>, BrowserError> {
    for selector in selectors {
        if let Some(element) = page.find(selector).await? {
            return Ok(Some(element));
        }
    }
    Ok(None)
}
