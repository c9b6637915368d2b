use std::sync::Arc;

use chrono::{DateTime, Utc};
use libris_core::model::Loan;
use libris_core::repository::{CheckoutOutcome, CirculationRepository};
use libris_core::{Entity, EventBus, Fine, LibraryError, LibraryResult, LibraryRules};
use libris_shared::{BookId, InventoryStatus, InventoryUpdate, UserId};
use serde::Serialize;
use tracing::info;

use crate::statement::LoanStatement;

/// Outcome of a successful return, ready to show to the borrower.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReturnReceipt {
    pub book_id: BookId,
    pub fine: Fine,
    pub message: String,
}

impl ReturnReceipt {
    fn new(book_id: BookId, fine: Fine) -> Self {
        let message = if fine.is_charged() {
            format!(
                "Book returned. Fine charged: {} ({} days overdue)",
                fine.amount, fine.days_overdue
            )
        } else {
            "Book returned successfully".to_string()
        };

        Self { book_id, fine, message }
    }
}

/// Borrow/return state machine over books and their loans.
#[derive(Clone)]
pub struct CirculationDesk {
    repo: Arc<dyn CirculationRepository>,
    events: EventBus,
    rules: LibraryRules,
}

impl CirculationDesk {
    pub fn new(repo: Arc<dyn CirculationRepository>, events: EventBus, rules: LibraryRules) -> Self {
        Self { repo, events, rules }
    }

    /// Lends an available book for the loan period starting at `now`.
    pub async fn borrow(&self, book_id: BookId, user_id: UserId, now: DateTime<Utc>) -> LibraryResult<Loan> {
        let due_date = now + self.rules.loan_period;

        match self.repo.checkout(book_id, user_id, now, due_date).await? {
            CheckoutOutcome::Issued(loan) => {
                info!("Book {} borrowed by user {}, due {}", book_id, user_id, due_date);
                self.events.publish(InventoryUpdate {
                    book_id,
                    status: InventoryStatus::Borrowed,
                });
                Ok(loan)
            }
            CheckoutOutcome::Missing => Err(LibraryError::NotFound(Entity::Book)),
            CheckoutOutcome::OnLoan => Err(LibraryError::AlreadyBorrowed),
        }
    }

    /// Closes the caller's own open loan on `book_id`, settling any fine.
    pub async fn return_book(&self, book_id: BookId, user_id: UserId, now: DateTime<Utc>) -> LibraryResult<ReturnReceipt> {
        let loan = self
            .repo
            .open_loan(user_id, book_id)
            .await?
            .ok_or(LibraryError::NoActiveBorrow)?;

        let fine = self.rules.fines.assess(loan.due_date, now);

        // A concurrent return of the same loan got there first.
        if !self.repo.close_loan(loan.id, now, fine.amount).await? {
            return Err(LibraryError::NoActiveBorrow);
        }

        info!(
            "Book {} returned by user {} (loan {}, fine {})",
            book_id, user_id, loan.id, fine.amount
        );
        self.events.publish(InventoryUpdate {
            book_id,
            status: InventoryStatus::Available,
        });

        Ok(ReturnReceipt::new(book_id, fine))
    }

    /// The user's borrowing history, newest first, with live fines on open loans.
    pub async fn history(&self, user_id: UserId, now: DateTime<Utc>) -> LibraryResult<Vec<LoanStatement>> {
        let records = self.repo.loans_for_user(user_id).await?;
        Ok(records
            .into_iter()
            .map(|record| LoanStatement::at(record, now, &self.rules.fines))
            .collect())
    }

    /// Every loan in the system, newest first.
    pub async fn all_loans(&self, now: DateTime<Utc>) -> LibraryResult<Vec<LoanStatement>> {
        let records = self.repo.all_loans().await?;
        Ok(records
            .into_iter()
            .map(|record| LoanStatement::at(record, now, &self.rules.fines))
            .collect())
    }
}
