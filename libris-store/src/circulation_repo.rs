use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libris_core::model::{Book, BookListing, Borrower, Loan, LoanRecord, Location, NewBook};
use libris_core::repository::{CheckoutOutcome, CirculationRepository, RemovalOutcome};
use libris_core::{Entity, LibraryError, LibraryResult};
use libris_shared::{BookId, LoanId, UserId};
use sqlx::PgPool;

use crate::database::contains_pattern;

pub struct PgCirculationRepository {
    pool: PgPool,
}

impl PgCirculationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct BookRow {
    id: i64,
    title: String,
    author: String,
    location_floor: Option<i32>,
    location_shelf: Option<String>,
    status: String,
}

impl TryFrom<BookRow> for Book {
    type Error = LibraryError;

    fn try_from(row: BookRow) -> Result<Self, Self::Error> {
        Ok(Book {
            id: BookId(row.id),
            title: row.title,
            author: row.author,
            location: Location {
                floor: row.location_floor,
                shelf: row.location_shelf,
            },
            status: row.status.parse().map_err(LibraryError::storage)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ListingRow {
    #[sqlx(flatten)]
    book: BookRow,
    borrowed_by: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct LoanRow {
    id: i64,
    user_id: i64,
    book_id: i64,
    issue_date: DateTime<Utc>,
    due_date: DateTime<Utc>,
    return_date: Option<DateTime<Utc>>,
    fine: i64,
    status: String,
}

impl TryFrom<LoanRow> for Loan {
    type Error = LibraryError;

    fn try_from(row: LoanRow) -> Result<Self, Self::Error> {
        Ok(Loan {
            id: LoanId(row.id),
            user_id: UserId(row.user_id),
            book_id: BookId(row.book_id),
            issue_date: row.issue_date,
            due_date: row.due_date,
            return_date: row.return_date,
            fine: row.fine,
            status: row.status.parse().map_err(LibraryError::storage)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    #[sqlx(flatten)]
    loan: LoanRow,
    title: String,
    author: String,
    username: Option<String>,
    role: Option<String>,
}

impl TryFrom<RecordRow> for LoanRecord {
    type Error = LibraryError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let borrower = match (row.username, row.role) {
            (Some(username), Some(role)) => Some(Borrower {
                username,
                role: role.parse().map_err(LibraryError::storage)?,
            }),
            _ => None,
        };

        Ok(LoanRecord {
            loan: row.loan.try_into()?,
            title: row.title,
            author: row.author,
            borrower,
        })
    }
}

const BOOK_COLUMNS: &str = "id, title, author, location_floor, location_shelf, status";
const LOAN_COLUMNS: &str = "id, user_id, book_id, issue_date, due_date, return_date, fine, status";

async fn book_exists(pool: &PgPool, book_id: BookId) -> LibraryResult<bool> {
    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM books WHERE id = $1)")
        .bind(book_id.get())
        .fetch_one(pool)
        .await
        .map_err(LibraryError::storage)
}

#[async_trait]
impl CirculationRepository for PgCirculationRepository {
    async fn checkout(
        &self,
        book_id: BookId,
        user_id: UserId,
        issue_date: DateTime<Utc>,
        due_date: DateTime<Utc>,
    ) -> LibraryResult<CheckoutOutcome> {
        let mut tx = self.pool.begin().await.map_err(LibraryError::storage)?;

        let flipped = sqlx::query("UPDATE books SET status = 'borrowed' WHERE id = $1 AND status = 'available'")
            .bind(book_id.get())
            .execute(&mut *tx)
            .await
            .map_err(LibraryError::storage)?;

        if flipped.rows_affected() == 0 {
            tx.rollback().await.map_err(LibraryError::storage)?;
            return Ok(if book_exists(&self.pool, book_id).await? {
                CheckoutOutcome::OnLoan
            } else {
                CheckoutOutcome::Missing
            });
        }

        let inserted = sqlx::query_as::<_, LoanRow>(&format!(
            r#"
            INSERT INTO transactions (user_id, book_id, issue_date, due_date, status)
            VALUES ($1, $2, $3, $4, 'borrowed')
            RETURNING {LOAN_COLUMNS}
            "#
        ))
        .bind(user_id.get())
        .bind(book_id.get())
        .bind(issue_date)
        .bind(due_date)
        .fetch_one(&mut *tx)
        .await;

        let row = match inserted {
            Ok(row) => row,
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                return Err(LibraryError::NotFound(Entity::User));
            }
            Err(e) => return Err(LibraryError::storage(e)),
        };

        tx.commit().await.map_err(LibraryError::storage)?;
        Ok(CheckoutOutcome::Issued(row.try_into()?))
    }

    async fn open_loan(&self, user_id: UserId, book_id: BookId) -> LibraryResult<Option<Loan>> {
        let row = sqlx::query_as::<_, LoanRow>(&format!(
            "SELECT {LOAN_COLUMNS} FROM transactions WHERE user_id = $1 AND book_id = $2 AND status = 'borrowed'"
        ))
        .bind(user_id.get())
        .bind(book_id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(LibraryError::storage)?;

        row.map(Loan::try_from).transpose()
    }

    async fn close_loan(&self, loan_id: LoanId, return_date: DateTime<Utc>, fine: i64) -> LibraryResult<bool> {
        let mut tx = self.pool.begin().await.map_err(LibraryError::storage)?;

        let book_id: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE transactions
            SET status = 'returned', return_date = $2, fine = $3
            WHERE id = $1 AND status = 'borrowed'
            RETURNING book_id
            "#,
        )
        .bind(loan_id.get())
        .bind(return_date)
        .bind(fine)
        .fetch_optional(&mut *tx)
        .await
        .map_err(LibraryError::storage)?;

        let Some(book_id) = book_id else {
            tx.rollback().await.map_err(LibraryError::storage)?;
            return Ok(false);
        };

        sqlx::query("UPDATE books SET status = 'available' WHERE id = $1")
            .bind(book_id)
            .execute(&mut *tx)
            .await
            .map_err(LibraryError::storage)?;

        tx.commit().await.map_err(LibraryError::storage)?;
        Ok(true)
    }

    async fn find_book(&self, book_id: BookId) -> LibraryResult<Option<Book>> {
        let row = sqlx::query_as::<_, BookRow>(&format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = $1"))
            .bind(book_id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(LibraryError::storage)?;

        row.map(Book::try_from).transpose()
    }

    async fn search_books(&self, query: &str) -> LibraryResult<Vec<BookListing>> {
        let rows = sqlx::query_as::<_, ListingRow>(
            r#"
            SELECT b.id, b.title, b.author, b.location_floor, b.location_shelf, b.status,
                   t.user_id AS borrowed_by
            FROM books b
            LEFT JOIN transactions t ON t.book_id = b.id AND t.status = 'borrowed'
            WHERE b.title ILIKE $1 OR b.author ILIKE $1
            ORDER BY b.id
            "#,
        )
        .bind(contains_pattern(query))
        .fetch_all(&self.pool)
        .await
        .map_err(LibraryError::storage)?;

        rows.into_iter()
            .map(|row| {
                Ok(BookListing {
                    book: row.book.try_into()?,
                    borrowed_by: row.borrowed_by.map(UserId),
                })
            })
            .collect()
    }

    async fn add_book(&self, book: &NewBook) -> LibraryResult<Book> {
        let row = sqlx::query_as::<_, BookRow>(&format!(
            r#"
            INSERT INTO books (title, author, location_floor, location_shelf, status)
            VALUES ($1, $2, $3, $4, 'available')
            RETURNING {BOOK_COLUMNS}
            "#
        ))
        .bind(book.title.trim())
        .bind(book.author.trim())
        .bind(book.floor)
        .bind(book.shelf.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(LibraryError::storage)?;

        row.try_into()
    }

    async fn remove_book(&self, book_id: BookId) -> LibraryResult<RemovalOutcome> {
        let deleted = sqlx::query("DELETE FROM books WHERE id = $1 AND status = 'available'")
            .bind(book_id.get())
            .execute(&self.pool)
            .await
            .map_err(LibraryError::storage)?;

        if deleted.rows_affected() > 0 {
            return Ok(RemovalOutcome::Removed);
        }

        Ok(if book_exists(&self.pool, book_id).await? {
            RemovalOutcome::OnLoan
        } else {
            RemovalOutcome::Missing
        })
    }

    async fn loans_for_user(&self, user_id: UserId) -> LibraryResult<Vec<LoanRecord>> {
        let rows = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT t.id, t.user_id, t.book_id, t.issue_date, t.due_date, t.return_date, t.fine, t.status,
                   b.title, b.author, NULL::text AS username, NULL::text AS role
            FROM transactions t
            JOIN books b ON b.id = t.book_id
            WHERE t.user_id = $1
            ORDER BY t.issue_date DESC, t.id DESC
            "#,
        )
        .bind(user_id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(LibraryError::storage)?;

        rows.into_iter().map(LoanRecord::try_from).collect()
    }

    async fn all_loans(&self) -> LibraryResult<Vec<LoanRecord>> {
        let rows = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT t.id, t.user_id, t.book_id, t.issue_date, t.due_date, t.return_date, t.fine, t.status,
                   b.title, b.author, u.username, u.role
            FROM transactions t
            JOIN books b ON b.id = t.book_id
            JOIN users u ON u.id = t.user_id
            ORDER BY t.issue_date DESC, t.id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(LibraryError::storage)?;

        rows.into_iter().map(LoanRecord::try_from).collect()
    }
}
