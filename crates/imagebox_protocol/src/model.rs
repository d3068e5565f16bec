//! Domain rows for boxes, outbox, and inbox.

use serde::{Deserialize, Serialize};

use crate::ids::{BoxId, ImageId, TransactionId};

/// Transfer mode of a peer box relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoxMode {
    /// This node actively pushes queued images to the peer.
    Push,
    /// The peer polls this node and pulls queued images itself.
    Poll,
}

/// A registered peer box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerBox {
    /// Store-assigned identifier.
    pub id: BoxId,
    /// Operator-chosen display name.
    pub name: String,
    /// Credential embedded in the box URL; authenticates the peer's calls.
    pub token: String,
    /// Peer base URL, ending in the token segment.
    pub base_url: String,
    /// How images queued for this peer leave this node.
    pub mode: BoxMode,
    /// Last known reachability of the peer. Advisory only.
    pub online: bool,
}

/// One queued image awaiting transfer to a peer.
///
/// Rows are created in bulk when a send is requested and deleted exactly
/// when their image has been transferred and acknowledged. The row id is
/// assigned in enqueue order and doubles as the delivery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    /// Store-assigned row ID.
    pub id: u64,
    /// Destination box.
    pub remote_box_id: BoxId,
    /// Transaction this image belongs to.
    pub transaction_id: TransactionId,
    /// Position of this image within the transaction, 1-based.
    pub sequence_number: u32,
    /// Total number of images in the transaction.
    pub total_image_count: u32,
    /// Image to transfer.
    pub image_id: ImageId,
    /// Set when the transaction hard-failed; skipped until reset.
    pub failed: bool,
}

impl OutboxEntry {
    /// Returns true if this entry is the last image of its transaction.
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.sequence_number == self.total_image_count
    }
}

/// Receive progress for one incoming transaction.
///
/// Upserted with the latest reported sequence number and retained after
/// completion as transfer history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxEntry {
    /// Sending box.
    pub remote_box_id: BoxId,
    /// Transaction being received.
    pub transaction_id: TransactionId,
    /// Latest reported sequence number.
    pub received_image_count: u32,
    /// Total number of images in the transaction.
    pub total_image_count: u32,
}

impl InboxEntry {
    /// Returns true once every image of the transaction has been reported.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.received_image_count >= self.total_image_count
    }
}

/// A single tag override applied during anonymization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagValue {
    /// Tag identifier, group and element packed into one word.
    pub tag: u32,
    /// Replacement value.
    pub value: String,
}

impl TagValue {
    /// Creates a new tag override.
    pub fn new(tag: u32, value: impl Into<String>) -> Self {
        Self {
            tag,
            value: value.into(),
        }
    }
}

/// An image selected for transfer together with its tag overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageTagValues {
    /// Image to send.
    pub image_id: ImageId,
    /// Overrides applied before the image leaves this node.
    pub tag_values: Vec<TagValue>,
}

impl ImageTagValues {
    /// Creates an entry with no overrides.
    #[must_use]
    pub fn new(image_id: ImageId) -> Self {
        Self {
            image_id,
            tag_values: Vec::new(),
        }
    }

    /// Adds a tag override.
    #[must_use]
    pub fn with_tag(mut self, tag: u32, value: impl Into<String>) -> Self {
        self.tag_values.push(TagValue::new(tag, value));
        self
    }
}

/// Derived delivery status of a transaction still in the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Entries are pending normal delivery.
    Waiting,
    /// The transaction hard-failed and waits for operator action.
    Failed,
}
