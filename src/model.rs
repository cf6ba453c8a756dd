use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Identifier of a single message within a channel.
///
/// Ids are assigned by the remote platform and increase monotonically within
/// a channel, so they double as the cursor watermark.
pub type ItemId = u64;

/// A channel to archive, derived from configuration at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTarget {
    origin: Url,
    channel_id: String,
}

impl ChannelTarget {
    /// Parse a channel target from a configured URL.
    ///
    /// The last path segment is the channel id, e.g.
    /// `https://chat.example.com/channels/123456` has channel id `123456`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not an absolute http(s) URL or has
    /// no channel id path segment.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let url = Url::parse(raw).map_err(|e| format!("invalid channel URL '{raw}': {e}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!("channel URL must be http(s): {raw}"));
        }
        let channel_id = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| format!("channel URL has no channel id segment: {raw}"))?
            .to_string();
        Ok(Self {
            origin: url,
            channel_id,
        })
    }

    /// The full URL the automation capability navigates to.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.origin
    }

    #[must_use]
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }
}

/// A media attachment observed on a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
}

/// A single scraped message. Transient: exists only in memory between
/// scrape and upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageItem {
    pub channel_id: String,
    pub item_id: ItemId,
    pub author: String,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub observed_at: DateTime<Utc>,
}

/// An ordered, bounded collection of messages flushed together under one
/// idempotency key. Immutable once handed to the upload pipeline.
#[derive(Debug, Clone)]
pub struct Batch {
    channel_id: String,
    batch_seq: u64,
    created_at: DateTime<Utc>,
    items: Vec<MessageItem>,
}

impl Batch {
    #[must_use]
    pub fn new(channel_id: &str, batch_seq: u64) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            batch_seq,
            created_at: Utc::now(),
            items: Vec::new(),
        }
    }

    pub fn push(&mut self, item: MessageItem) {
        self.items.push(item);
    }

    #[must_use]
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    #[must_use]
    pub fn batch_seq(&self) -> u64 {
        self.batch_seq
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn items(&self) -> &[MessageItem] {
        &self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Highest item id covered by this batch. Items are appended oldest
    /// first, so this is the id of the last item.
    #[must_use]
    pub fn last_item_id(&self) -> Option<ItemId> {
        self.items.last().map(|item| item.item_id)
    }
}
