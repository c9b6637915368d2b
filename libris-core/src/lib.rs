pub mod fine;
pub mod model;
pub mod notify;
pub mod repository;
pub mod rules;

pub use fine::{Fine, FinePolicy};
pub use notify::EventBus;
pub use rules::LibraryRules;

use std::fmt;

/// Things a request can name that may not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Slot,
    Book,
    User,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Slot => "Slot",
            Entity::Book => "Book",
            Entity::User => "User",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("{0} not found")]
    NotFound(Entity),
    #[error("You already have an active seat booking. Please end your current session first.")]
    AlreadyBooked,
    #[error("Slot already booked")]
    SlotUnavailable,
    #[error("Slot not booked by you or already free")]
    NotOwnedOrFree,
    #[error("Book already borrowed")]
    AlreadyBorrowed,
    #[error("No active borrow record found")]
    NoActiveBorrow,
    #[error("Cannot delete a borrowed book")]
    BookOnLoan,
    #[error("You cannot delete your own account")]
    SelfRemoval,
    #[error("Cannot delete user with active book borrowings. Ask them to return books first.")]
    UserHasLoans,
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Storage failure: {0}")]
    Storage(String),
}

impl LibraryError {
    pub fn storage(err: impl fmt::Display) -> Self {
        LibraryError::Storage(err.to_string())
    }
}

pub type LibraryResult<T> = Result<T, LibraryError>;
