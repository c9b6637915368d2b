use std::sync::Arc;

use chrono::{DateTime, Utc};
use libris_core::model::Slot;
use libris_core::repository::{ClaimOutcome, SlotRepository};
use libris_core::{Entity, EventBus, LibraryError, LibraryResult};
use libris_shared::{SlotId, SlotStatus, SlotUpdate, UserId};
use tracing::{info, warn};

use crate::sweeper::ExpirySweeper;

/// Owns every slot transition between free and booked.
///
/// A user may hold one slot at a time across all zones. Each transition is a
/// conditional write in the store, so two racing requests for the same free
/// slot cannot both win.
#[derive(Clone)]
pub struct BookingLedger {
    slots: Arc<dyn SlotRepository>,
    sweeper: ExpirySweeper,
    events: EventBus,
}

impl BookingLedger {
    pub fn new(slots: Arc<dyn SlotRepository>, sweeper: ExpirySweeper, events: EventBus) -> Self {
        Self { slots, sweeper, events }
    }

    pub fn sweeper(&self) -> &ExpirySweeper {
        &self.sweeper
    }

    pub async fn book(&self, slot_id: SlotId, user_id: UserId, now: DateTime<Utc>) -> LibraryResult<Slot> {
        // One active booking per user, checked before availability.
        if let Some(held) = self.slots.active_slot_for(user_id).await? {
            info!("User {} already holds slot {}, refusing slot {}", user_id, held, slot_id);
            return Err(LibraryError::AlreadyBooked);
        }

        match self.slots.claim(slot_id, user_id, now).await? {
            ClaimOutcome::Claimed(slot) => {
                info!("Slot {} booked by user {}", slot_id, user_id);
                self.events.publish(SlotUpdate::Changed {
                    slot_id,
                    status: SlotStatus::Booked,
                    user_id: Some(user_id),
                });
                Ok(slot)
            }
            ClaimOutcome::Missing => Err(LibraryError::NotFound(Entity::Slot)),
            ClaimOutcome::Occupied => Err(LibraryError::SlotUnavailable),
            ClaimOutcome::UserBusy => Err(LibraryError::AlreadyBooked),
        }
    }

    pub async fn end_session(&self, slot_id: SlotId, user_id: UserId) -> LibraryResult<()> {
        if !self.slots.release_held_by(slot_id, user_id).await? {
            return Err(LibraryError::NotOwnedOrFree);
        }

        info!("Session on slot {} ended by user {}", slot_id, user_id);
        self.publish_freed(slot_id);
        Ok(())
    }

    /// Frees a slot regardless of who holds it (operator action or a
    /// simulated departure).
    pub async fn force_release(&self, slot_id: SlotId) -> LibraryResult<()> {
        if !self.slots.release(slot_id).await? {
            return Err(LibraryError::NotFound(Entity::Slot));
        }

        info!("Slot {} force-released", slot_id);
        self.publish_freed(slot_id);
        Ok(())
    }

    /// All slots by (zone, name), after an opportunistic expiry sweep.
    /// A failed sweep is logged and does not block the listing.
    pub async fn list_all(&self, now: DateTime<Utc>) -> LibraryResult<Vec<Slot>> {
        if let Err(e) = self.sweeper.sweep(now).await {
            warn!("Auto-expiry error: {}", e);
        }

        self.slots.list_ordered().await
    }

    fn publish_freed(&self, slot_id: SlotId) {
        self.events.publish(SlotUpdate::Changed {
            slot_id,
            status: SlotStatus::Free,
            user_id: None,
        });
    }
}
