//! Session driver abstraction over one browser session.
//!
//! Defines the `PageDriver` trait the navigator, detail extractor, and
//! orchestrator are written against (currently implemented by Chromium via
//! chromiumoxide). Every interactive primitive accepts an ordered list of
//! candidate selectors or a bounded timeout, and returns a typed failure
//! (`NotFound`/`TimedOut`) instead of throwing past the caller; no primitive
//! retries more than once internally, so wall-clock growth stays bounded
//! over many entities.

pub mod chromium;

use crate::record::SelectorOption;
use async_trait::async_trait;
use std::time::Duration;

/// Typed failure of a single driver primitive.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// No candidate selector located an element.
    #[error("no candidate selector matched: {0}")]
    NotFound(String),

    /// The operation did not complete within its bound.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// The browser session itself failed.
    #[error(transparent)]
    Browser(#[from] anyhow::Error),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Handle to one browsing view (tab) owned by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewHandle {
    index: usize,
    /// Whether this is the main listing view.
    pub is_main: bool,
}

impl ViewHandle {
    pub fn new(index: usize, is_main: bool) -> Self {
        Self { index, is_main }
    }

    /// Position within the most recent `views` snapshot.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// One browser session: a main view plus any secondary views an entity
/// click may have opened.
///
/// Side effects are confined to the browser session. Implementations try a
/// direct action first and fall back to scripted DOM manipulation once per
/// call.
#[async_trait]
pub trait PageDriver: Send {
    /// Navigate the main view to a URL.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> DriverResult<()>;

    /// Click the first element matched by any of the candidate selectors,
    /// tried in order.
    async fn click_first(&mut self, selectors: &[&str], timeout: Duration) -> DriverResult<()>;

    /// Select an option by value on a `<select>` and dispatch its change
    /// event.
    async fn select_option(
        &mut self,
        select: &str,
        value: &str,
        timeout: Duration,
    ) -> DriverResult<()>;

    /// Resolve the display-name/value pairs of a `<select>` on the live page.
    async fn select_options(&mut self, select: &str) -> DriverResult<Vec<SelectorOption>>;

    /// Poll a JS boolean expression until it is true or the timeout elapses.
    async fn wait_for(&mut self, condition: &str, timeout: Duration) -> DriverResult<()>;

    /// Evaluate a JS expression in the main view and return its JSON value.
    async fn run_script(&mut self, expr: &str) -> DriverResult<serde_json::Value>;

    /// Full markup of the main view.
    async fn page_html(&mut self) -> DriverResult<String>;

    /// Current URL of the main view.
    async fn current_url(&mut self) -> DriverResult<String>;

    /// Snapshot the currently open views. Handle indices are valid until the
    /// next `views` call.
    async fn views(&mut self) -> DriverResult<Vec<ViewHandle>>;

    /// Full markup of one open view.
    async fn view_html(&mut self, view: ViewHandle) -> DriverResult<String>;

    /// Close a secondary view. Closing the main view is a no-op.
    async fn close_view(&mut self, view: ViewHandle) -> DriverResult<()>;

    /// Bring the main view back to front focus.
    async fn focus_main(&mut self) -> DriverResult<()>;

    /// Fixed settle delay, layered on top of event-based waits because the
    /// target page gives no reliable completion signal.
    async fn settle(&mut self, delay: Duration);
}
