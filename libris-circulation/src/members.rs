use std::sync::Arc;

use libris_core::model::User;
use libris_core::repository::{UserRemovalOutcome, UserRepository};
use libris_core::{Entity, EventBus, LibraryError, LibraryResult};
use libris_shared::{SlotStatus, SlotUpdate, UserId};
use tracing::info;

/// Administrative view over registered accounts.
#[derive(Clone)]
pub struct MemberRoster {
    repo: Arc<dyn UserRepository>,
    events: EventBus,
}

impl MemberRoster {
    pub fn new(repo: Arc<dyn UserRepository>, events: EventBus) -> Self {
        Self { repo, events }
    }

    /// Every account, newest first.
    pub async fn list(&self) -> LibraryResult<Vec<User>> {
        self.repo.list_users().await
    }

    /// Deletes `target` on behalf of `acting`. Accounts still holding a book
    /// stay; a held slot is freed and announced.
    pub async fn remove(&self, acting: UserId, target: UserId) -> LibraryResult<()> {
        if acting == target {
            return Err(LibraryError::SelfRemoval);
        }

        match self.repo.remove_user(target).await? {
            UserRemovalOutcome::Removed { released } => {
                info!("User {} deleted by user {}", target, acting);
                if let Some(slot_id) = released {
                    info!("Slot {} freed with the account of user {}", slot_id, target);
                    self.events.publish(SlotUpdate::Changed {
                        slot_id,
                        status: SlotStatus::Free,
                        user_id: None,
                    });
                }
                Ok(())
            }
            UserRemovalOutcome::Missing => Err(LibraryError::NotFound(Entity::User)),
            UserRemovalOutcome::HasOpenLoans => Err(LibraryError::UserHasLoans),
        }
    }
}
