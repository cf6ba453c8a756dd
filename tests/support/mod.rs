//! Scripted capability implementations for worker integration tests.

// Not every test binary exercises every helper.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use chat_channel_archiver::alert::AlertDispatcher;
use chat_channel_archiver::automation::{BrowserAutomation, PageSnapshot, SessionProbe};
use chat_channel_archiver::control::{ArchiverState, ControlPlaneBridge};
use chat_channel_archiver::error::ArchiveError;
use chat_channel_archiver::model::{ChannelTarget, ItemId, MessageItem};
use chat_channel_archiver::session::Session;
use chat_channel_archiver::storage::ObjectStore;

pub fn item(channel_id: &str, id: ItemId) -> MessageItem {
    MessageItem {
        channel_id: channel_id.to_string(),
        item_id: id,
        author: "alice".to_string(),
        content: format!("message {id}"),
        attachments: Vec::new(),
        observed_at: Utc::now(),
    }
}

/// Poll the bridge until the worker reaches `state`.
pub async fn wait_for_state(bridge: &ControlPlaneBridge, state: ArchiverState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let current = bridge.current_state().state;
        if current == state {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {state:?}, worker is in {current:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll until `check` passes.
pub async fn wait_until<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if check() {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting until {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Browser automation driven by a script instead of a browser.
///
/// Each channel has a full message log; `read_items_since` filters it by the
/// watermark like a real scrape would. Snapshots pop from a per-channel
/// queue, falling back to a clear channel page when the queue is empty.
pub struct ScriptedAutomation {
    probe: Mutex<SessionProbe>,
    messages: Mutex<HashMap<String, Vec<MessageItem>>>,
    snapshots: Mutex<HashMap<String, VecDeque<PageSnapshot>>>,
    observe_failures: Mutex<HashMap<String, u32>>,
    export_count: Mutex<u32>,
}

impl Default for ScriptedAutomation {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedAutomation {
    pub fn new() -> Self {
        Self {
            probe: Mutex::new(SessionProbe::Valid),
            messages: Mutex::new(HashMap::new()),
            snapshots: Mutex::new(HashMap::new()),
            observe_failures: Mutex::new(HashMap::new()),
            export_count: Mutex::new(0),
        }
    }

    pub fn set_probe(&self, probe: SessionProbe) {
        *self.probe.lock().unwrap() = probe;
    }

    pub fn set_messages(&self, channel_id: &str, items: Vec<MessageItem>) {
        self.messages
            .lock()
            .unwrap()
            .insert(channel_id.to_string(), items);
    }

    pub fn queue_snapshot(&self, channel_id: &str, markers: &[&str]) {
        self.snapshots
            .lock()
            .unwrap()
            .entry(channel_id.to_string())
            .or_default()
            .push_back(PageSnapshot {
                url: format!("https://chat.example.com/channels/{channel_id}"),
                markers: markers.iter().map(ToString::to_string).collect(),
            });
    }

    /// Make the next `count` observes of a channel fail transiently.
    pub fn fail_observes(&self, channel_id: &str, count: u32) {
        self.observe_failures
            .lock()
            .unwrap()
            .insert(channel_id.to_string(), count);
    }

    pub fn export_count(&self) -> u32 {
        *self.export_count.lock().unwrap()
    }
}

#[async_trait]
impl BrowserAutomation for ScriptedAutomation {
    async fn restore(&self, _session: &Session) -> Result<SessionProbe, ArchiveError> {
        Ok(*self.probe.lock().unwrap())
    }

    async fn observe(&self, target: &ChannelTarget) -> Result<PageSnapshot, ArchiveError> {
        let channel_id = target.channel_id();
        {
            let mut failures = self.observe_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(channel_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ArchiveError::Transient("scripted navigation failure".into()));
                }
            }
        }

        let queued = self
            .snapshots
            .lock()
            .unwrap()
            .get_mut(channel_id)
            .and_then(VecDeque::pop_front);
        Ok(queued.unwrap_or_else(|| PageSnapshot {
            url: target.url().to_string(),
            markers: vec!["message-list".to_string()],
        }))
    }

    async fn read_items_since(
        &self,
        target: &ChannelTarget,
        after: Option<ItemId>,
    ) -> Result<Vec<MessageItem>, ArchiveError> {
        let messages = self.messages.lock().unwrap();
        let all = messages.get(target.channel_id()).cloned().unwrap_or_default();
        Ok(all
            .into_iter()
            .filter(|item| after.is_none_or(|watermark| item.item_id > watermark))
            .collect())
    }

    async fn export_session(&self) -> Result<Session, ArchiveError> {
        *self.export_count.lock().unwrap() += 1;
        Ok(Session::new(json!({"cookies": [{"name": "token", "value": "fresh"}]})))
    }
}

/// In-memory object store with injectable transient failures.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    put_log: Mutex<Vec<String>>,
    failures_remaining: Mutex<u32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` puts fail transiently.
    pub fn fail_next_puts(&self, count: u32) {
        *self.failures_remaining.lock().unwrap() = count;
    }

    pub fn object_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// Every put attempt, including the failed ones.
    pub fn put_attempts(&self) -> usize {
        self.put_log.lock().unwrap().len()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<(), ArchiveError> {
        self.put_log.lock().unwrap().push(key.to_string());
        {
            let mut remaining = self.failures_remaining.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ArchiveError::Transient("scripted storage failure".into()));
            }
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// Records alerts instead of delivering them.
#[derive(Default)]
pub struct CountingAlerter {
    alerts: Mutex<Vec<(String, String)>>,
}

impl CountingAlerter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.alerts
            .lock()
            .unwrap()
            .iter()
            .map(|(subject, _)| subject.clone())
            .collect()
    }
}

#[async_trait]
impl AlertDispatcher for CountingAlerter {
    async fn dispatch(&self, subject: &str, body: &str) -> anyhow::Result<()> {
        self.alerts
            .lock()
            .unwrap()
            .push((subject.to_string(), body.to_string()));
        Ok(())
    }
}
