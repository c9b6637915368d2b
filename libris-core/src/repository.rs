use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libris_shared::{BookId, LoanId, SlotId, UserId};

use crate::model::{Book, BookListing, Loan, LoanRecord, NewBook, Slot, User};
use crate::LibraryResult;

/// Result of a conditional "free -> booked" write.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed(Slot),
    /// No slot with that id.
    Missing,
    /// The slot was not free when the write was applied.
    Occupied,
    /// The store refused because the user already holds another slot.
    UserBusy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutOutcome {
    Issued(Loan),
    Missing,
    OnLoan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    Removed,
    Missing,
    OnLoan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserRemovalOutcome {
    /// Gone, along with its closed loans. `released` names the slot it held, if any.
    Removed { released: Option<SlotId> },
    Missing,
    HasOpenLoans,
}

/// Storage port for slot state. Every mutating method is a single atomic
/// conditional write; callers branch on the reported outcome instead of
/// reading first.
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait SlotRepository: Send + Sync {
    async fn active_slot_for(&self, user_id: UserId) -> LibraryResult<Option<SlotId>>;

    async fn claim(&self, slot_id: SlotId, user_id: UserId, now: DateTime<Utc>) -> LibraryResult<ClaimOutcome>;

    /// Frees the slot only if `user_id` currently holds it.
    async fn release_held_by(&self, slot_id: SlotId, user_id: UserId) -> LibraryResult<bool>;

    /// Frees the slot whoever holds it. `false` when the slot does not exist.
    async fn release(&self, slot_id: SlotId) -> LibraryResult<bool>;

    /// Frees every booked slot whose booking started at or before `cutoff`
    /// and returns how many were freed.
    async fn expire_started_before(&self, cutoff: DateTime<Utc>) -> LibraryResult<u64>;

    /// All slots ordered by (zone, name).
    async fn list_ordered(&self) -> LibraryResult<Vec<Slot>>;
}

/// Storage port for books and their borrow records.
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait CirculationRepository: Send + Sync {
    /// Marks an available book borrowed and opens a loan, atomically.
    async fn checkout(
        &self,
        book_id: BookId,
        user_id: UserId,
        issue_date: DateTime<Utc>,
        due_date: DateTime<Utc>,
    ) -> LibraryResult<CheckoutOutcome>;

    async fn open_loan(&self, user_id: UserId, book_id: BookId) -> LibraryResult<Option<Loan>>;

    /// Closes an open loan and makes its book available again, atomically.
    /// `false` when the loan was already closed.
    async fn close_loan(&self, loan_id: LoanId, return_date: DateTime<Utc>, fine: i64) -> LibraryResult<bool>;

    async fn find_book(&self, book_id: BookId) -> LibraryResult<Option<Book>>;

    /// Case-insensitive substring match on title or author.
    async fn search_books(&self, query: &str) -> LibraryResult<Vec<BookListing>>;

    async fn add_book(&self, book: &NewBook) -> LibraryResult<Book>;

    async fn remove_book(&self, book_id: BookId) -> LibraryResult<RemovalOutcome>;

    /// The user's loans, newest first.
    async fn loans_for_user(&self, user_id: UserId) -> LibraryResult<Vec<LoanRecord>>;

    /// Every loan with its borrower, newest first.
    async fn all_loans(&self) -> LibraryResult<Vec<LoanRecord>>;
}

/// Storage port for account administration.
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Every account, newest first.
    async fn list_users(&self) -> LibraryResult<Vec<User>>;

    /// Deletes an account that has no open loans, freeing any slot it holds,
    /// in one atomic step.
    async fn remove_user(&self, user_id: UserId) -> LibraryResult<UserRemovalOutcome>;
}
