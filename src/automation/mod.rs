//! Browser automation capability.
//!
//! The worker drives the browsing session exclusively through
//! [`BrowserAutomation`]; platform selectors, DOM structure, and the browser
//! itself stay behind this seam. Exactly one task calls into an
//! implementation at a time.

pub mod chromium;

use async_trait::async_trait;

use crate::error::ArchiveError;
use crate::model::{ChannelTarget, ItemId, MessageItem};
use crate::session::Session;

pub use chromium::ChromiumAutomation;

/// What the automation capability currently observes on the rendered page.
///
/// `markers` is a lowercase set of notable tokens (challenge containers,
/// login prompts, message lists) extracted from the DOM. The captcha
/// monitor inspects these without any browser knowledge of its own.
#[derive(Debug, Clone, Default)]
pub struct PageSnapshot {
    pub url: String,
    pub markers: Vec<String>,
}

impl PageSnapshot {
    #[must_use]
    pub fn has_marker(&self, marker: &str) -> bool {
        self.markers.iter().any(|m| m == marker)
    }
}

/// Outcome of restoring a persisted session into the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionProbe {
    /// The restored session is authenticated and usable.
    Valid,
    /// The session restored but the platform reports it logged out.
    LoggedOut,
}

/// The capability interface the worker consumes.
///
/// Implementations are not required to be safe for concurrent callers; the
/// worker is the single driver.
#[async_trait]
pub trait BrowserAutomation: Send + Sync {
    /// Apply a persisted session to the browsing context and probe whether
    /// it is still authenticated.
    ///
    /// # Errors
    ///
    /// Returns `Transient` for navigation failures during the probe.
    async fn restore(&self, session: &Session) -> Result<SessionProbe, ArchiveError>;

    /// Navigate to a channel and report what the page shows.
    ///
    /// # Errors
    ///
    /// Returns `Transient` for navigation/timeout failures.
    async fn observe(&self, target: &ChannelTarget) -> Result<PageSnapshot, ArchiveError>;

    /// Read items with id greater than `after` from the channel currently
    /// in view, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `Transient` for read failures, `LoginRequired` if the page
    /// turns out to be logged out mid-read.
    async fn read_items_since(
        &self,
        target: &ChannelTarget,
        after: Option<ItemId>,
    ) -> Result<Vec<MessageItem>, ArchiveError>;

    /// Export the live browsing session for persistence (called after a
    /// human completes login).
    ///
    /// # Errors
    ///
    /// Returns `Transient` if the session state cannot be read.
    async fn export_session(&self) -> Result<Session, ArchiveError>;
}
