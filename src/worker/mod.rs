//! The archiver worker: state machine and main control loop.
//!
//! One task owns the automation capability, the cursor table, and the state
//! snapshot. Control-plane signals are applied only at checkpoints (start of
//! a sweep, or while parked waiting for a human); shutdown is cooperative
//! and never aborts an in-flight flush.

pub mod backoff;

pub use backoff::BackoffPolicy;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::alert::AlertDispatcher;
use crate::automation::{BrowserAutomation, SessionProbe};
use crate::captcha::{CaptchaMonitor, Inspection};
use crate::config::Config;
use crate::control::{ArchiverState, ControlSignal, StateSnapshot, WorkerLink};
use crate::cursor::CursorTable;
use crate::error::ArchiveError;
use crate::model::{Batch, ChannelTarget};
use crate::session::SessionStore;
use crate::storage::ObjectStore;
use crate::upload::UploadPipeline;

/// The session-and-archival engine.
pub struct ArchiverWorker {
    config: Config,
    automation: Arc<dyn BrowserAutomation>,
    monitor: CaptchaMonitor,
    pipeline: UploadPipeline,
    alerts: Arc<dyn AlertDispatcher>,
    sessions: SessionStore,
    cursors: CursorTable,
    link: WorkerLink,
    state: ArchiverState,
    seq: u64,
    /// One alert per pause episode; cleared on the transition back to
    /// scraping.
    episode_alerted: bool,
    /// Flushed-but-unacknowledged batches, keyed by channel id. Retried at
    /// the start of the channel's next cycle; the covering cursor has not
    /// advanced.
    retained: HashMap<String, Batch>,
}

impl ArchiverWorker {
    pub fn new(
        config: Config,
        automation: Arc<dyn BrowserAutomation>,
        store: Arc<dyn ObjectStore>,
        alerts: Arc<dyn AlertDispatcher>,
        sessions: SessionStore,
        cursors: CursorTable,
        link: WorkerLink,
    ) -> Self {
        let pipeline = UploadPipeline::new(store, &config.storage_prefix, config.backoff());
        Self {
            config,
            automation,
            monitor: CaptchaMonitor::new(),
            pipeline,
            alerts,
            sessions,
            cursors,
            link,
            state: ArchiverState::Starting,
            seq: 0,
            episode_alerted: false,
            retained: HashMap::new(),
        }
    }

    /// Run the worker until shutdown is requested.
    pub async fn run(mut self) {
        self.publish_progress();
        self.restore_session().await;

        loop {
            match self.state {
                ArchiverState::AwaitingLogin => self.await_login().await,
                ArchiverState::PausedCaptcha => self.await_captcha_resolution().await,
                ArchiverState::Scraping => self.scrape_once().await,
                ArchiverState::Stopping => break,
                // Starting only exists before the restore above; Degraded is
                // always followed by a transition back to Scraping within a
                // sweep.
                ArchiverState::Starting | ArchiverState::Degraded => {
                    self.transition(ArchiverState::Scraping);
                }
            }
        }

        self.finish().await;
    }

    // --- state transitions ---

    fn transition(&mut self, state: ArchiverState) {
        if self.state == state {
            return;
        }
        self.seq += 1;
        self.state = state;
        debug!(state = ?state, seq = self.seq, "State transition");
        let _ = self.link.state_tx.send(StateSnapshot {
            state,
            seq: self.seq,
            changed_at: Utc::now(),
        });
    }

    fn publish_progress(&self) {
        let _ = self.link.progress_tx.send(self.cursors.progress());
    }

    // --- startup ---

    async fn restore_session(&mut self) {
        let session = match self.sessions.load().await {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to read session store: {e:#}");
                None
            }
        };

        match session {
            Some(session) if session.valid => match self.automation.restore(&session).await {
                Ok(SessionProbe::Valid) => {
                    info!("Session restored, starting channel sweeps");
                    self.transition(ArchiverState::Scraping);
                }
                Ok(SessionProbe::LoggedOut) => {
                    info!("Restored session is logged out");
                    self.invalidate_session().await;
                    self.enter_awaiting_login("Restored session is no longer authenticated")
                        .await;
                }
                Err(e) => {
                    warn!("Session probe failed, requiring manual login: {e}");
                    self.enter_awaiting_login("Session could not be validated").await;
                }
            },
            Some(_) => {
                info!("Persisted session was marked invalid");
                self.enter_awaiting_login("Persisted session is invalid").await;
            }
            None => {
                info!("No persisted session found");
                self.enter_awaiting_login("No persisted session; manual login needed")
                    .await;
            }
        }
    }

    // --- parked states ---

    async fn enter_awaiting_login(&mut self, reason: &str) {
        self.transition(ArchiverState::AwaitingLogin);
        self.alert_once(
            "Login required",
            &format!("{reason}. Complete login through the control plane to resume archiving."),
        )
        .await;
    }

    /// Park until a human completes login (or shutdown).
    async fn await_login(&mut self) {
        loop {
            tokio::select! {
                () = self.link.cancel.cancelled() => {
                    self.transition(ArchiverState::Stopping);
                    return;
                }
                signal = self.link.signals.recv() => match signal {
                    Some(ControlSignal::LoginCompleted) => {
                        match self.automation.export_session().await {
                            Ok(session) => {
                                if let Err(e) = self.sessions.save(&session).await {
                                    error!("Failed to persist fresh session: {e:#}");
                                }
                                info!("Login completed, session persisted");
                                self.episode_alerted = false;
                                self.transition(ArchiverState::Scraping);
                                return;
                            }
                            Err(e) => {
                                warn!("Login signaled but session export failed, still waiting: {e}");
                            }
                        }
                    }
                    Some(other) => debug!(signal = ?other, "Ignoring signal while awaiting login"),
                    None => {
                        // All control-plane handles dropped; nothing can
                        // ever resume us.
                        self.transition(ArchiverState::Stopping);
                        return;
                    }
                },
            }
        }
    }

    async fn pause_for_captcha(&mut self, marker: &str) {
        warn!(marker = %marker, "Challenge detected, pausing all channels");
        self.transition(ArchiverState::PausedCaptcha);
        self.alert_once(
            "Captcha detected",
            &format!(
                "An anti-bot challenge ({marker}) is blocking the session. \
                 Solve it through the control plane, then signal resolution."
            ),
        )
        .await;
    }

    /// Park until a human confirms the captcha is solved (or shutdown).
    async fn await_captcha_resolution(&mut self) {
        loop {
            tokio::select! {
                () = self.link.cancel.cancelled() => {
                    self.transition(ArchiverState::Stopping);
                    return;
                }
                signal = self.link.signals.recv() => match signal {
                    Some(ControlSignal::CaptchaResolved) => {
                        info!("Captcha resolution signaled, resuming");
                        self.episode_alerted = false;
                        self.transition(ArchiverState::Scraping);
                        return;
                    }
                    Some(other) => debug!(signal = ?other, "Ignoring signal while paused for captcha"),
                    None => {
                        self.transition(ArchiverState::Stopping);
                        return;
                    }
                },
            }
        }
    }

    async fn alert_once(&mut self, subject: &str, body: &str) {
        if self.episode_alerted {
            return;
        }
        self.episode_alerted = true;
        if let Err(e) = self.alerts.dispatch(subject, body).await {
            error!(subject = %subject, "Failed to dispatch alert: {e:#}");
        }
    }

    // --- scraping ---

    /// One full sweep over all configured channels, then the poll sleep.
    async fn scrape_once(&mut self) {
        self.drain_stale_signals();

        let channels = self.config.channels.clone();
        for target in &channels {
            if self.state != ArchiverState::Scraping {
                return;
            }
            if self.link.cancel.is_cancelled() {
                self.transition(ArchiverState::Stopping);
                return;
            }
            self.process_channel(target).await;
        }

        if self.state != ArchiverState::Scraping {
            return;
        }
        tokio::select! {
            () = self.link.cancel.cancelled() => {
                self.transition(ArchiverState::Stopping);
            }
            () = tokio::time::sleep(self.config.poll_interval) => {}
        }
    }

    /// Signals are applied only while parked; anything queued up during
    /// scraping is stale.
    fn drain_stale_signals(&mut self) {
        while let Ok(signal) = self.link.signals.try_recv() {
            debug!(signal = ?signal, "Discarding signal received outside a pause");
        }
    }

    async fn process_channel(&mut self, target: &ChannelTarget) {
        let channel_id = target.channel_id().to_string();

        // An unacknowledged batch from a previous cycle blocks new progress
        // on this channel until it lands.
        if let Some(batch) = self.retained.remove(&channel_id) {
            info!(
                channel_id = %channel_id,
                batch_seq = batch.batch_seq(),
                "Retrying retained batch"
            );
            if !self.flush_and_advance(batch).await {
                return;
            }
        }

        let automation = Arc::clone(&self.automation);
        let observe_target = target.clone();
        let snapshot = match self
            .channel_op("navigate", &channel_id, move || {
                let automation = Arc::clone(&automation);
                let target = observe_target.clone();
                async move { automation.observe(&target).await }
            })
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => return self.handle_channel_error(&channel_id, e).await,
        };

        // A challenge compromises the shared browsing session, so it pauses
        // every channel, not just this one.
        if let Inspection::ChallengeDetected { marker } = self.monitor.inspect(&snapshot) {
            self.pause_for_captcha(&marker).await;
            return;
        }
        if self.monitor.is_logged_out(&snapshot) {
            self.handle_logged_out().await;
            return;
        }

        let cursor = self.cursors.get(&channel_id);
        let automation = Arc::clone(&self.automation);
        let read_target = target.clone();
        let after = cursor.last_item_id;
        let items = match self
            .channel_op("read items", &channel_id, move || {
                let automation = Arc::clone(&automation);
                let target = read_target.clone();
                async move { automation.read_items_since(&target, after).await }
            })
            .await
        {
            Ok(items) => items,
            Err(e) => return self.handle_channel_error(&channel_id, e).await,
        };

        if items.is_empty() {
            debug!(channel_id = %channel_id, "No new items");
            return;
        }
        info!(channel_id = %channel_id, count = items.len(), "Found new items");

        // Batch oldest-first; flush at the threshold, and flush the partial
        // remainder at end of pass so no items are held across channels.
        let mut batch = Batch::new(&channel_id, self.cursors.get(&channel_id).batch_seq);
        for item in items {
            batch.push(item);
            if batch.len() >= self.config.batch_size {
                if !self.flush_and_advance(batch).await {
                    return;
                }
                batch = Batch::new(&channel_id, self.cursors.get(&channel_id).batch_seq);
            }
        }
        if !batch.is_empty() {
            self.flush_and_advance(batch).await;
        }
    }

    /// Flush a batch and, only on a confirmed write, advance the channel
    /// cursor. On failure the batch is retained for the next cycle and the
    /// channel is degraded; the cursor never moves.
    async fn flush_and_advance(&mut self, batch: Batch) -> bool {
        let channel_id = batch.channel_id().to_string();
        match self.pipeline.flush(&batch).await {
            Ok(()) => {
                if let Some(last_item_id) = batch.last_item_id() {
                    if let Err(e) = self.cursors.advance(&channel_id, last_item_id).await {
                        // The in-memory watermark did advance; a stale file
                        // only causes re-delivery after a restart.
                        error!(channel_id = %channel_id, "Failed to persist cursor: {e:#}");
                    }
                    self.publish_progress();
                }
                true
            }
            Err(e) => {
                warn!(
                    channel_id = %channel_id,
                    batch_seq = batch.batch_seq(),
                    items = batch.len(),
                    "Flush failed, retaining batch for next cycle: {e}"
                );
                self.retained.insert(channel_id.clone(), batch);
                self.mark_degraded(&channel_id, &e);
                false
            }
        }
    }

    async fn handle_channel_error(&mut self, channel_id: &str, error: ArchiveError) {
        if self.link.cancel.is_cancelled() {
            self.transition(ArchiverState::Stopping);
            return;
        }
        match error {
            ArchiveError::ChallengeDetected { marker } => {
                self.pause_for_captcha(&marker).await;
            }
            ArchiveError::LoginRequired => {
                self.handle_logged_out().await;
            }
            other => self.mark_degraded(channel_id, &other),
        }
    }

    /// One channel exhausted its budget: expose the degraded transition,
    /// skip the channel for this cycle, and keep sweeping.
    fn mark_degraded(&mut self, channel_id: &str, error: &ArchiveError) {
        error!(channel_id = %channel_id, "Channel degraded for this cycle: {error}");
        self.transition(ArchiverState::Degraded);
        self.transition(ArchiverState::Scraping);
    }

    async fn handle_logged_out(&mut self) {
        warn!("Session is logged out, suspending all channels");
        self.invalidate_session().await;
        self.enter_awaiting_login("The browsing session was logged out").await;
    }

    async fn invalidate_session(&mut self) {
        match self.sessions.load().await {
            Ok(Some(mut session)) if session.valid => {
                session.valid = false;
                if let Err(e) = self.sessions.save(&session).await {
                    error!("Failed to mark session invalid: {e:#}");
                }
            }
            Ok(_) => {}
            Err(e) => error!("Failed to read session store: {e:#}"),
        }
    }

    /// Retry a channel-scoped operation with exponential backoff. Only
    /// transient failures are retried; shutdown interrupts the wait.
    async fn channel_op<T, F, Fut>(
        &self,
        what: &str,
        channel_id: &str,
        mut op: F,
    ) -> Result<T, ArchiveError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ArchiveError>>,
    {
        let backoff = self.config.backoff();
        let mut attempts = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(ArchiveError::Transient(msg)) => {
                    attempts += 1;
                    if !backoff.should_retry(attempts) {
                        return Err(ArchiveError::RetriesExhausted {
                            attempts,
                            last_error: msg,
                        });
                    }
                    let delay = backoff.delay(attempts);
                    warn!(
                        channel_id = %channel_id,
                        what = %what,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Channel operation failed, retrying: {msg}"
                    );
                    tokio::select! {
                        () = self.link.cancel.cancelled() => {
                            return Err(ArchiveError::Transient(
                                "shutdown requested during retry".to_string(),
                            ));
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(other) => return Err(other),
            }
        }
    }

    // --- shutdown ---

    /// Final flush of retained batches before exit. Each attempt is bounded
    /// by the retry budget; anything still unacknowledged is re-scraped
    /// after restart because its cursor never advanced.
    async fn finish(&mut self) {
        let retained: Vec<Batch> = self.retained.drain().map(|(_, batch)| batch).collect();
        for batch in retained {
            let channel_id = batch.channel_id().to_string();
            match self.pipeline.flush(&batch).await {
                Ok(()) => {
                    if let Some(last_item_id) = batch.last_item_id() {
                        if let Err(e) = self.cursors.advance(&channel_id, last_item_id).await {
                            error!(channel_id = %channel_id, "Failed to persist cursor during shutdown: {e:#}");
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        channel_id = %channel_id,
                        batch_seq = batch.batch_seq(),
                        "Retained batch not flushed at shutdown, will be re-scraped: {e}"
                    );
                }
            }
        }
        self.publish_progress();
        info!("Archiver worker stopped");
    }
}
