use std::sync::Arc;

use libris_core::model::{Book, BookListing, NewBook};
use libris_core::repository::{CirculationRepository, RemovalOutcome};
use libris_core::{Entity, EventBus, LibraryError, LibraryResult};
use libris_shared::{BookId, InventoryStatus, InventoryUpdate};
use tracing::info;

/// Catalogue search and maintenance.
#[derive(Clone)]
pub struct Catalogue {
    repo: Arc<dyn CirculationRepository>,
    events: EventBus,
}

impl Catalogue {
    pub fn new(repo: Arc<dyn CirculationRepository>, events: EventBus) -> Self {
        Self { repo, events }
    }

    pub async fn search(&self, query: &str) -> LibraryResult<Vec<BookListing>> {
        self.repo.search_books(query.trim()).await
    }

    pub async fn add_book(&self, book: NewBook) -> LibraryResult<Book> {
        book.validate()?;
        let added = self.repo.add_book(&book).await?;

        info!("Book {} added: {}", added.id, added.title);
        self.events.publish(InventoryUpdate {
            book_id: added.id,
            status: InventoryStatus::Available,
        });
        Ok(added)
    }

    /// Removes a book from the catalogue. Books out on loan stay.
    pub async fn delete_book(&self, book_id: BookId) -> LibraryResult<()> {
        match self.repo.remove_book(book_id).await? {
            RemovalOutcome::Removed => {
                info!("Book {} deleted", book_id);
                self.events.publish(InventoryUpdate {
                    book_id,
                    status: InventoryStatus::Deleted,
                });
                Ok(())
            }
            RemovalOutcome::Missing => Err(LibraryError::NotFound(Entity::Book)),
            RemovalOutcome::OnLoan => Err(LibraryError::BookOnLoan),
        }
    }
}
