//! Restart behavior: cursors and sessions survive a process boundary.

mod support;

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use chat_channel_archiver::config::Config;
use chat_channel_archiver::control::{self, ArchiverState};
use chat_channel_archiver::cursor::CursorTable;
use chat_channel_archiver::session::{Session, SessionStore};
use chat_channel_archiver::worker::ArchiverWorker;

use support::{item, wait_for_state, wait_until, CountingAlerter, MemoryStore, ScriptedAutomation};

#[tokio::test]
async fn test_restart_resumes_from_persisted_cursor() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());

    let sessions = SessionStore::new(dir.path());
    sessions
        .save(&Session::new(json!({"cookies": []})))
        .await
        .unwrap();

    // First run archives items 1..=5 as one batch.
    {
        let automation = Arc::new(ScriptedAutomation::new());
        automation.set_messages("100", (1..=5).map(|id| item("100", id)).collect());

        let cursors = CursorTable::load(dir.path()).await.unwrap();
        let (bridge, link) = control::bridge();
        let worker = ArchiverWorker::new(
            Config::for_testing(),
            automation.clone(),
            store.clone(),
            Arc::new(CountingAlerter::new()),
            sessions.clone(),
            cursors,
            link,
        );
        let handle = tokio::spawn(worker.run());

        wait_until("first batch lands", || store.object_keys().len() == 1).await;
        bridge.request_shutdown();
        handle.await.unwrap();
    }

    // Second run sees the full message log but only archives the new items,
    // under the next sequence number.
    {
        let automation = Arc::new(ScriptedAutomation::new());
        automation.set_messages("100", (1..=8).map(|id| item("100", id)).collect());

        let cursors = CursorTable::load(dir.path()).await.unwrap();
        let (bridge, link) = control::bridge();
        let worker = ArchiverWorker::new(
            Config::for_testing(),
            automation.clone(),
            store.clone(),
            Arc::new(CountingAlerter::new()),
            sessions.clone(),
            cursors,
            link,
        );
        let handle = tokio::spawn(worker.run());

        wait_for_state(&bridge, ArchiverState::Scraping).await;
        wait_until("second batch lands", || store.object_keys().len() == 2).await;
        bridge.request_shutdown();
        handle.await.unwrap();
    }

    assert_eq!(
        store.object_keys(),
        vec![
            "channels/100/batch-00000000.json".to_string(),
            "channels/100/batch-00000001.json".to_string(),
        ]
    );

    let second: serde_json::Value =
        serde_json::from_slice(&store.object("channels/100/batch-00000001.json").unwrap()).unwrap();
    assert_eq!(second["item_count"], 3);
    assert_eq!(second["items"][0]["item_id"], 6);
    assert_eq!(second["items"][2]["item_id"], 8);

    let reloaded = CursorTable::load(dir.path()).await.unwrap();
    assert_eq!(reloaded.get("100").last_item_id, Some(8));
    assert_eq!(reloaded.get("100").batch_seq, 2);
}
