//! Challenge detection over page snapshots.
//!
//! Pure inspection only: detection never clears a pause. Resolution is
//! signaled exclusively by the external control plane, because the system
//! cannot safely determine on its own that a captcha was solved.

use crate::automation::PageSnapshot;

/// Marker tokens that indicate an anti-bot challenge is blocking the
/// session. Matched as substrings against snapshot markers, lowercase.
const CHALLENGE_MARKERS: &[&str] = &["hcaptcha", "recaptcha", "captcha-container", "challenge"];

/// Marker tokens and URL fragments that indicate a logged-out page.
const LOGIN_MARKERS: &[&str] = &["qr-code-login", "login-form"];

/// Result of inspecting a page snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inspection {
    Clear,
    ChallengeDetected { marker: String },
}

/// Inspects automation snapshots for challenge markers.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptchaMonitor;

impl CaptchaMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Check a snapshot for a challenge marker.
    #[must_use]
    pub fn inspect(&self, snapshot: &PageSnapshot) -> Inspection {
        for marker in &snapshot.markers {
            let lower = marker.to_lowercase();
            if CHALLENGE_MARKERS.iter().any(|known| lower.contains(known)) {
                return Inspection::ChallengeDetected {
                    marker: marker.clone(),
                };
            }
        }
        Inspection::Clear
    }

    /// Check whether the snapshot shows a logged-out page rather than the
    /// requested channel.
    #[must_use]
    pub fn is_logged_out(&self, snapshot: &PageSnapshot) -> bool {
        if snapshot.url.contains("/login") {
            return true;
        }
        snapshot.markers.iter().any(|marker| {
            let lower = marker.to_lowercase();
            LOGIN_MARKERS.iter().any(|known| lower.contains(known))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(url: &str, markers: &[&str]) -> PageSnapshot {
        PageSnapshot {
            url: url.to_string(),
            markers: markers.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn test_clear_page() {
        let monitor = CaptchaMonitor::new();
        let snap = snapshot("https://chat.example.com/channels/1", &["message-list"]);
        assert_eq!(monitor.inspect(&snap), Inspection::Clear);
        assert!(!monitor.is_logged_out(&snap));
    }

    #[test]
    fn test_detects_challenge_marker() {
        let monitor = CaptchaMonitor::new();
        let snap = snapshot(
            "https://chat.example.com/channels/1",
            &["message-list", "hcaptcha-frame"],
        );
        assert_eq!(
            monitor.inspect(&snap),
            Inspection::ChallengeDetected {
                marker: "hcaptcha-frame".to_string()
            }
        );
    }

    #[test]
    fn test_detection_is_case_insensitive() {
        let monitor = CaptchaMonitor::new();
        let snap = snapshot("https://chat.example.com/channels/1", &["HCaptcha-Widget"]);
        assert!(matches!(
            monitor.inspect(&snap),
            Inspection::ChallengeDetected { .. }
        ));
    }

    #[test]
    fn test_login_url_is_logged_out() {
        let monitor = CaptchaMonitor::new();
        let snap = snapshot("https://chat.example.com/login", &[]);
        assert!(monitor.is_logged_out(&snap));
    }

    #[test]
    fn test_login_marker_is_logged_out() {
        let monitor = CaptchaMonitor::new();
        let snap = snapshot("https://chat.example.com/channels/1", &["qr-code-login"]);
        assert!(monitor.is_logged_out(&snap));
    }
}
