//! Gateway payload shaping.
//!
//! Maps a message kind onto the gateway's envelope shape. Pure and total:
//! every kind produces a valid envelope, and anything unrecognized upstream
//! has already degraded to plain text.

use serde_json::{json, Value};

use crate::queue::{MessageKind, QueuedMessage};

/// Build the `message` envelope for the gateway send endpoint.
pub fn shape_payload(message: &QueuedMessage) -> Value {
    let url = message.attachment_url.as_deref().unwrap_or("");

    match message.kind {
        MessageKind::Text => json!({ "text": message.body }),
        MessageKind::Image => {
            let mut envelope = json!({ "image": { "url": url } });
            if !message.body.is_empty() {
                envelope["caption"] = json!(message.body);
            }
            envelope
        }
        MessageKind::Document => {
            let mut envelope = json!({ "document": { "url": url } });
            if let Some(filename) = message.filename.as_deref().filter(|f| !f.is_empty()) {
                envelope["document"]["filename"] = json!(filename);
            }
            if !message.body.is_empty() {
                envelope["caption"] = json!(message.body);
            }
            envelope
        }
        MessageKind::Video => {
            let mut envelope = json!({ "video": { "url": url } });
            if !message.body.is_empty() {
                envelope["caption"] = json!(message.body);
            }
            envelope
        }
        MessageKind::Audio => json!({ "audio": { "url": url } }),
    }
}
