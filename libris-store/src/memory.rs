use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libris_core::model::{default_layout, Book, BookListing, Booking, Loan, LoanRecord, NewBook, Slot, User};
use libris_core::repository::{
    CheckoutOutcome, CirculationRepository, ClaimOutcome, RemovalOutcome, SlotRepository, UserRemovalOutcome,
    UserRepository,
};
use libris_core::{Entity, LibraryError, LibraryResult};
use libris_shared::{BookId, BookStatus, LoanId, LoanStatus, Role, SlotId, UserId};
use tokio::sync::Mutex;

#[derive(Default)]
struct Tables {
    slots: BTreeMap<SlotId, Slot>,
    books: BTreeMap<BookId, Book>,
    loans: BTreeMap<LoanId, Loan>,
    users: BTreeMap<UserId, User>,
    next_book: i64,
    next_loan: i64,
}

impl Tables {
    fn record(&self, loan: &Loan, with_borrower: bool) -> Option<LoanRecord> {
        let book = self.books.get(&loan.book_id)?;
        let borrower = if with_borrower {
            Some(self.users.get(&loan.user_id)?.borrower())
        } else {
            None
        };

        Some(LoanRecord {
            loan: loan.clone(),
            title: book.title.clone(),
            author: book.author.clone(),
            borrower,
        })
    }
}

/// Newest first, ties broken by id.
fn newest_first(records: &mut [LoanRecord]) {
    records.sort_by(|a, b| {
        b.loan
            .issue_date
            .cmp(&a.loan.issue_date)
            .then(b.loan.id.get().cmp(&a.loan.id.get()))
    });
}

/// Process-local storage backend.
///
/// Each operation runs under a single lock, which gives it the same
/// all-or-nothing behaviour as the conditional writes of the Postgres
/// repositories. Claims and checkouts by unregistered users fail with
/// `NotFound(User)`, as the foreign keys make them fail there.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// An empty store: no slots, books or users.
    pub fn new() -> Self {
        Self::default()
    }

    /// Slots `1..=46` in the default layout, all free.
    pub fn with_default_layout() -> Self {
        let mut tables = Tables::default();
        for (id, (zone, name)) in (1..).zip(default_layout()) {
            tables.slots.insert(SlotId(id), Slot::free(SlotId(id), zone, name));
        }
        Self { tables: Mutex::new(tables) }
    }

    /// The default layout plus the demo users and books shipped with the
    /// Postgres seed migration.
    pub async fn seeded() -> LibraryResult<Self> {
        let store = Self::with_default_layout();

        store.add_user(UserId(1), "admin", Role::Admin).await;
        for n in 1..=5 {
            store.add_user(UserId(1 + n), &format!("student{}", n), Role::Student).await;
        }
        for n in 1..=3 {
            store.add_user(UserId(6 + n), &format!("faculty{}", n), Role::Faculty).await;
        }

        for (title, author, floor, shelf) in [
            ("The Great Gatsby", "F. Scott Fitzgerald", 1, "A1"),
            ("1984", "George Orwell", 1, "A2"),
            ("Clean Code", "Robert C. Martin", 2, "B1"),
        ] {
            store
                .add_book(&NewBook {
                    title: title.into(),
                    author: author.into(),
                    floor: Some(floor),
                    shelf: Some(shelf.into()),
                })
                .await?;
        }

        Ok(store)
    }

    pub async fn add_user(&self, user_id: UserId, username: &str, role: Role) {
        self.tables.lock().await.users.insert(
            user_id,
            User {
                id: user_id,
                username: username.to_string(),
                role,
                created_at: Utc::now(),
            },
        );
    }
}

#[async_trait]
impl SlotRepository for MemoryStore {
    async fn active_slot_for(&self, user_id: UserId) -> LibraryResult<Option<SlotId>> {
        let tables = self.tables.lock().await;
        Ok(tables.slots.values().find(|s| s.is_held_by(user_id)).map(|s| s.id))
    }

    async fn claim(&self, slot_id: SlotId, user_id: UserId, now: DateTime<Utc>) -> LibraryResult<ClaimOutcome> {
        let mut tables = self.tables.lock().await;

        match tables.slots.get(&slot_id) {
            None => return Ok(ClaimOutcome::Missing),
            Some(slot) if slot.booking.is_some() => return Ok(ClaimOutcome::Occupied),
            Some(_) => {}
        }
        if !tables.users.contains_key(&user_id) {
            return Err(LibraryError::NotFound(Entity::User));
        }
        if tables.slots.values().any(|s| s.is_held_by(user_id)) {
            return Ok(ClaimOutcome::UserBusy);
        }

        let Some(slot) = tables.slots.get_mut(&slot_id) else {
            return Ok(ClaimOutcome::Missing);
        };
        slot.booking = Some(Booking { user_id, started_at: now });
        Ok(ClaimOutcome::Claimed(slot.clone()))
    }

    async fn release_held_by(&self, slot_id: SlotId, user_id: UserId) -> LibraryResult<bool> {
        let mut tables = self.tables.lock().await;
        match tables.slots.get_mut(&slot_id) {
            Some(slot) if slot.is_held_by(user_id) => {
                slot.booking = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, slot_id: SlotId) -> LibraryResult<bool> {
        let mut tables = self.tables.lock().await;
        match tables.slots.get_mut(&slot_id) {
            Some(slot) => {
                slot.booking = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn expire_started_before(&self, cutoff: DateTime<Utc>) -> LibraryResult<u64> {
        let mut tables = self.tables.lock().await;
        let mut expired = 0;
        for slot in tables.slots.values_mut() {
            if slot.booking.is_some_and(|b| b.started_at <= cutoff) {
                slot.booking = None;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn list_ordered(&self) -> LibraryResult<Vec<Slot>> {
        let tables = self.tables.lock().await;
        let mut slots: Vec<Slot> = tables.slots.values().cloned().collect();
        slots.sort_by(|a, b| a.layout_key().cmp(&b.layout_key()));
        Ok(slots)
    }
}

#[async_trait]
impl CirculationRepository for MemoryStore {
    async fn checkout(
        &self,
        book_id: BookId,
        user_id: UserId,
        issue_date: DateTime<Utc>,
        due_date: DateTime<Utc>,
    ) -> LibraryResult<CheckoutOutcome> {
        let mut tables = self.tables.lock().await;

        match tables.books.get(&book_id) {
            None => return Ok(CheckoutOutcome::Missing),
            Some(book) if book.status != BookStatus::Available => return Ok(CheckoutOutcome::OnLoan),
            Some(_) => {}
        }
        if !tables.users.contains_key(&user_id) {
            return Err(LibraryError::NotFound(Entity::User));
        }
        let Some(book) = tables.books.get_mut(&book_id) else {
            return Ok(CheckoutOutcome::Missing);
        };
        book.status = BookStatus::Borrowed;

        tables.next_loan += 1;
        let loan = Loan {
            id: LoanId(tables.next_loan),
            user_id,
            book_id,
            issue_date,
            due_date,
            return_date: None,
            fine: 0,
            status: LoanStatus::Borrowed,
        };
        tables.loans.insert(loan.id, loan.clone());
        Ok(CheckoutOutcome::Issued(loan))
    }

    async fn open_loan(&self, user_id: UserId, book_id: BookId) -> LibraryResult<Option<Loan>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .loans
            .values()
            .find(|l| l.is_open() && l.user_id == user_id && l.book_id == book_id)
            .cloned())
    }

    async fn close_loan(&self, loan_id: LoanId, return_date: DateTime<Utc>, fine: i64) -> LibraryResult<bool> {
        let mut tables = self.tables.lock().await;

        let book_id = match tables.loans.get_mut(&loan_id) {
            Some(loan) if loan.is_open() => {
                loan.status = LoanStatus::Returned;
                loan.return_date = Some(return_date);
                loan.fine = fine;
                loan.book_id
            }
            _ => return Ok(false),
        };

        if let Some(book) = tables.books.get_mut(&book_id) {
            book.status = BookStatus::Available;
        }
        Ok(true)
    }

    async fn find_book(&self, book_id: BookId) -> LibraryResult<Option<Book>> {
        Ok(self.tables.lock().await.books.get(&book_id).cloned())
    }

    async fn search_books(&self, query: &str) -> LibraryResult<Vec<BookListing>> {
        let needle = query.to_lowercase();
        let tables = self.tables.lock().await;

        Ok(tables
            .books
            .values()
            .filter(|b| b.title.to_lowercase().contains(&needle) || b.author.to_lowercase().contains(&needle))
            .map(|book| BookListing {
                book: book.clone(),
                borrowed_by: tables
                    .loans
                    .values()
                    .find(|l| l.is_open() && l.book_id == book.id)
                    .map(|l| l.user_id),
            })
            .collect())
    }

    async fn add_book(&self, book: &NewBook) -> LibraryResult<Book> {
        let mut tables = self.tables.lock().await;
        tables.next_book += 1;

        let added = Book {
            id: BookId(tables.next_book),
            title: book.title.trim().to_string(),
            author: book.author.trim().to_string(),
            location: book.location(),
            status: BookStatus::Available,
        };
        tables.books.insert(added.id, added.clone());
        Ok(added)
    }

    async fn remove_book(&self, book_id: BookId) -> LibraryResult<RemovalOutcome> {
        let mut tables = self.tables.lock().await;

        match tables.books.get(&book_id) {
            None => return Ok(RemovalOutcome::Missing),
            Some(book) if book.status != BookStatus::Available => return Ok(RemovalOutcome::OnLoan),
            Some(_) => {}
        }

        tables.books.remove(&book_id);
        tables.loans.retain(|_, l| l.book_id != book_id);
        Ok(RemovalOutcome::Removed)
    }

    async fn loans_for_user(&self, user_id: UserId) -> LibraryResult<Vec<LoanRecord>> {
        let tables = self.tables.lock().await;
        let mut records: Vec<LoanRecord> = tables
            .loans
            .values()
            .filter(|l| l.user_id == user_id)
            .filter_map(|l| tables.record(l, false))
            .collect();
        newest_first(&mut records);
        Ok(records)
    }

    async fn all_loans(&self) -> LibraryResult<Vec<LoanRecord>> {
        let tables = self.tables.lock().await;
        let mut records: Vec<LoanRecord> = tables
            .loans
            .values()
            .filter_map(|l| tables.record(l, true))
            .collect();
        newest_first(&mut records);
        Ok(records)
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn list_users(&self) -> LibraryResult<Vec<User>> {
        let tables = self.tables.lock().await;
        let mut users: Vec<User> = tables.users.values().cloned().collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(users)
    }

    async fn remove_user(&self, user_id: UserId) -> LibraryResult<UserRemovalOutcome> {
        let mut tables = self.tables.lock().await;

        if !tables.users.contains_key(&user_id) {
            return Ok(UserRemovalOutcome::Missing);
        }
        if tables.loans.values().any(|l| l.is_open() && l.user_id == user_id) {
            return Ok(UserRemovalOutcome::HasOpenLoans);
        }

        let mut released = None;
        for slot in tables.slots.values_mut() {
            if slot.is_held_by(user_id) {
                slot.booking = None;
                released = Some(slot.id);
            }
        }
        tables.loans.retain(|_, l| l.user_id != user_id);
        tables.users.remove(&user_id);

        Ok(UserRemovalOutcome::Removed { released })
    }
}
