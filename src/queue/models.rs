//! Queue data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message payload kind. Maps one-to-one onto the gateway envelope shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Document,
    Video,
    Audio,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Document => "document",
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }

    /// Total mapping from stored text. Unknown kinds degrade to plain text.
    pub fn from_db(value: &str) -> Self {
        match value {
            "image" => Self::Image,
            "document" => Self::Document,
            "video" => Self::Video,
            "audio" => Self::Audio,
            _ => Self::Text,
        }
    }
}

impl Default for MessageKind {
    fn default() -> Self {
        Self::Text
    }
}

/// Lifecycle state of a queued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageStatus {
    Pending,
    Processing,
    Sent,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "SENT" => Some(Self::Sent),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A message in the outbound queue.
///
/// Once SENT, or FAILED with attempts exhausted, the row is an immutable
/// audit record.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedMessage {
    /// Unique message ID
    pub id: Uuid,
    /// Owning tenant (credit pools are keyed by this)
    pub tenant_id: String,
    /// Device/instance whose session carries the send
    pub device: String,
    /// Recipient address as submitted; normalized at dispatch time
    pub destination: String,
    /// Payload kind
    pub kind: MessageKind,
    /// Body text (caption for media kinds)
    pub body: String,
    /// Attachment URL for media kinds
    pub attachment_url: Option<String>,
    /// Filename for document kinds
    pub filename: Option<String>,
    /// Backend server resolved for this message, if any
    pub server_id: Option<Uuid>,
    /// Higher is claimed sooner
    pub priority: i32,
    /// Not eligible before this instant; `None` means immediately eligible
    pub not_before: Option<DateTime<Utc>>,
    /// Lifecycle state
    pub status: MessageStatus,
    /// Delivery attempts so far
    pub attempts: u32,
    /// Last failure reason, classified by source
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set on terminal success
    pub processed_at: Option<DateTime<Utc>>,
}

/// Fields a producer supplies when enqueueing.
#[derive(Debug, Clone, Deserialize)]
pub struct NewMessage {
    pub tenant_id: String,
    pub device: String,
    pub destination: String,
    #[serde(default)]
    pub kind: MessageKind,
    pub body: String,
    #[serde(default)]
    pub attachment_url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
}

/// Message counts by status.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub processing: usize,
    pub sent: usize,
    pub failed: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.sent + self.failed
    }
}

/// Aggregate queue statistics for the inspection API.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub counts: QueueCounts,
    pub total: usize,
    /// Messages per minute at the current batch size and interval
    pub estimated_throughput_per_min: f64,
    /// pending / batch_size * cycle interval
    pub estimated_drain_seconds: u64,
}

/// Immutable record of a confirmed delivery.
#[derive(Debug, Clone, Serialize)]
pub struct SentLogEntry {
    pub message_id: Uuid,
    pub tenant_id: String,
    pub device: String,
    pub destination: String,
    pub sent_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip_and_unknown_default() {
        assert_eq!(MessageKind::from_db("image"), MessageKind::Image);
        assert_eq!(MessageKind::from_db("sticker"), MessageKind::Text);
        assert_eq!(MessageKind::Audio.as_str(), "audio");
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            MessageStatus::Pending,
            MessageStatus::Processing,
            MessageStatus::Sent,
            MessageStatus::Failed,
        ] {
            assert_eq!(MessageStatus::from_db(status.as_str()), Some(status));
        }
        assert_eq!(MessageStatus::from_db("bogus"), None);
    }
}
