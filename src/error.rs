use thiserror::Error;

/// Failure taxonomy for archiving operations.
///
/// Session-scoped errors (`LoginRequired`, `ChallengeDetected`) affect the
/// whole worker; everything else is contained within the channel being
/// processed when it occurred.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The browsing session is absent or logged out. Recovered by waiting
    /// for a human to complete login.
    #[error("login required")]
    LoginRequired,

    /// An anti-bot challenge was observed in the rendered page. Recovered by
    /// pausing the whole worker until a human signals resolution.
    #[error("anti-bot challenge detected: {marker}")]
    ChallengeDetected { marker: String },

    /// A retryable navigation/read/upload failure (timeouts, temporary
    /// service errors).
    #[error("transient failure: {0}")]
    Transient(String),

    /// The retry budget for an operation was exhausted. The affected channel
    /// is marked degraded for the rest of the cycle.
    #[error("retry budget exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl ArchiveError {
    /// Whether the error is worth retrying with backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
