//! The narrow surface between the worker and the external control plane.
//!
//! The worker is the sole writer of state and progress; the control plane
//! reads immutable snapshots and posts signals. Snapshots ride on `watch`
//! channels (atomic reads, no locks), signals on an unbounded mpsc that the
//! worker drains at well-defined checkpoints, and shutdown is a cooperative
//! cancellation token that stays observable even while the worker is parked.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::model::ItemId;

/// Lifecycle state of the archiver worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArchiverState {
    Starting,
    AwaitingLogin,
    Scraping,
    PausedCaptcha,
    Degraded,
    Stopping,
}

/// Immutable view of the worker state.
///
/// `seq` increases by one per transition, so a reader comparing two
/// snapshots can always tell which is fresher.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state: ArchiverState,
    pub seq: u64,
    pub changed_at: DateTime<Utc>,
}

/// Signals the control plane sends to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// A human completed login in the live browser session.
    LoginCompleted,
    /// A human confirmed the captcha has been solved.
    CaptchaResolved,
}

/// Per-channel progress: channel id to last archived item id.
pub type ProgressSnapshot = BTreeMap<String, Option<ItemId>>;

/// Control-plane handle: snapshot reads plus signal delivery.
#[derive(Clone)]
pub struct ControlPlaneBridge {
    state_rx: watch::Receiver<StateSnapshot>,
    progress_rx: watch::Receiver<ProgressSnapshot>,
    signal_tx: mpsc::UnboundedSender<ControlSignal>,
    cancel: CancellationToken,
}

impl ControlPlaneBridge {
    /// Current worker state.
    #[must_use]
    pub fn current_state(&self) -> StateSnapshot {
        self.state_rx.borrow().clone()
    }

    /// Current per-channel progress.
    #[must_use]
    pub fn current_progress(&self) -> ProgressSnapshot {
        self.progress_rx.borrow().clone()
    }

    /// Signal that a human completed login.
    pub fn on_login_completed(&self) {
        // Send failure means the worker is gone; nothing left to signal.
        let _ = self.signal_tx.send(ControlSignal::LoginCompleted);
    }

    /// Signal that a human confirmed the captcha is solved.
    pub fn on_captcha_resolved(&self) {
        let _ = self.signal_tx.send(ControlSignal::CaptchaResolved);
    }

    /// Request cooperative shutdown. The worker finishes its in-flight
    /// flush and persists cursors before exiting.
    pub fn request_shutdown(&self) {
        self.cancel.cancel();
    }
}

/// The worker-side ends of the bridge.
pub struct WorkerLink {
    pub(crate) state_tx: watch::Sender<StateSnapshot>,
    pub(crate) progress_tx: watch::Sender<ProgressSnapshot>,
    pub(crate) signals: mpsc::UnboundedReceiver<ControlSignal>,
    pub(crate) cancel: CancellationToken,
}

/// Create a connected bridge/link pair.
#[must_use]
pub fn bridge() -> (ControlPlaneBridge, WorkerLink) {
    let (state_tx, state_rx) = watch::channel(StateSnapshot {
        state: ArchiverState::Starting,
        seq: 0,
        changed_at: Utc::now(),
    });
    let (progress_tx, progress_rx) = watch::channel(ProgressSnapshot::new());
    let (signal_tx, signals) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    (
        ControlPlaneBridge {
            state_rx,
            progress_rx,
            signal_tx,
            cancel: cancel.clone(),
        },
        WorkerLink {
            state_tx,
            progress_tx,
            signals,
            cancel,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_snapshot() {
        let (bridge, _link) = bridge();
        let snapshot = bridge.current_state();
        assert_eq!(snapshot.state, ArchiverState::Starting);
        assert_eq!(snapshot.seq, 0);
        assert!(bridge.current_progress().is_empty());
    }

    #[tokio::test]
    async fn test_signals_reach_worker_side() {
        let (bridge, mut link) = bridge();
        bridge.on_login_completed();
        bridge.on_captcha_resolved();

        assert_eq!(link.signals.recv().await, Some(ControlSignal::LoginCompleted));
        assert_eq!(link.signals.recv().await, Some(ControlSignal::CaptchaResolved));
    }

    #[test]
    fn test_shutdown_cancels_token() {
        let (bridge, link) = bridge();
        assert!(!link.cancel.is_cancelled());
        bridge.request_shutdown();
        assert!(link.cancel.is_cancelled());
    }

    #[test]
    fn test_state_updates_visible_to_bridge() {
        let (bridge, link) = bridge();
        link.state_tx
            .send(StateSnapshot {
                state: ArchiverState::Scraping,
                seq: 1,
                changed_at: Utc::now(),
            })
            .unwrap();
        let snapshot = bridge.current_state();
        assert_eq!(snapshot.state, ArchiverState::Scraping);
        assert_eq!(snapshot.seq, 1);
    }
}
