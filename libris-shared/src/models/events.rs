use serde::{Deserialize, Serialize};

use super::ids::{BookId, SlotId, UserId};
use super::status::SlotStatus;

/// Coarse "something changed, re-fetch" notifications. Payloads are hints
/// only; clients must read current state from the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LibraryEvent {
    Slot(SlotUpdate),
    Inventory(InventoryUpdate),
}

impl LibraryEvent {
    /// Channel name used on the wire (SSE `event:` field).
    pub fn name(&self) -> &'static str {
        match self {
            LibraryEvent::Slot(_) => "slot_update",
            LibraryEvent::Inventory(_) => "inventory_update",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SlotUpdate {
    /// A single slot was booked or freed by a request.
    Changed {
        slot_id: SlotId,
        status: SlotStatus,
        user_id: Option<UserId>,
    },
    /// One aggregate notice per sweep that freed at least one slot.
    Expired { expired: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InventoryStatus {
    Available,
    Borrowed,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryUpdate {
    pub book_id: BookId,
    pub status: InventoryStatus,
}

impl From<SlotUpdate> for LibraryEvent {
    fn from(update: SlotUpdate) -> Self {
        LibraryEvent::Slot(update)
    }
}

impl From<InventoryUpdate> for LibraryEvent {
    fn from(update: InventoryUpdate) -> Self {
        LibraryEvent::Inventory(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_update_payload_shape() {
        let event = LibraryEvent::from(SlotUpdate::Changed {
            slot_id: SlotId(3),
            status: SlotStatus::Free,
            user_id: None,
        });

        assert_eq!(event.name(), "slot_update");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({ "slot_id": 3, "status": "free", "user_id": null })
        );
    }

    #[test]
    fn test_inventory_update_payload_shape() {
        let event = LibraryEvent::from(InventoryUpdate {
            book_id: BookId(7),
            status: InventoryStatus::Deleted,
        });

        assert_eq!(event.name(), "inventory_update");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({ "book_id": 7, "status": "deleted" })
        );
    }
}
