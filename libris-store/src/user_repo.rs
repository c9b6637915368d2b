use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libris_core::model::User;
use libris_core::repository::{UserRemovalOutcome, UserRepository};
use libris_core::{LibraryError, LibraryResult};
use libris_shared::{SlotId, UserId};
use sqlx::PgPool;

pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    role: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = LibraryError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: UserId(row.id),
            username: row.username,
            role: row.role.parse().map_err(LibraryError::storage)?,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn list_users(&self) -> LibraryResult<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, role, created_at FROM users ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(LibraryError::storage)?;

        rows.into_iter().map(User::try_from).collect()
    }

    /// Locks the user row first so a concurrent checkout or claim either
    /// lands before the check (and is seen) or fails on the foreign key.
    async fn remove_user(&self, user_id: UserId) -> LibraryResult<UserRemovalOutcome> {
        let mut tx = self.pool.begin().await.map_err(LibraryError::storage)?;

        let locked: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id.get())
            .fetch_optional(&mut *tx)
            .await
            .map_err(LibraryError::storage)?;

        if locked.is_none() {
            tx.rollback().await.map_err(LibraryError::storage)?;
            return Ok(UserRemovalOutcome::Missing);
        }

        let has_open_loans: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM transactions WHERE user_id = $1 AND status = 'borrowed')",
        )
        .bind(user_id.get())
        .fetch_one(&mut *tx)
        .await
        .map_err(LibraryError::storage)?;

        if has_open_loans {
            tx.rollback().await.map_err(LibraryError::storage)?;
            return Ok(UserRemovalOutcome::HasOpenLoans);
        }

        let released: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE slots
            SET status = 'free', booking_start_time = NULL, booked_by_user_id = NULL
            WHERE booked_by_user_id = $1 AND status = 'booked'
            RETURNING id
            "#,
        )
        .bind(user_id.get())
        .fetch_optional(&mut *tx)
        .await
        .map_err(LibraryError::storage)?;

        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id.get())
            .execute(&mut *tx)
            .await
            .map_err(LibraryError::storage)?;

        tx.commit().await.map_err(LibraryError::storage)?;
        Ok(UserRemovalOutcome::Removed {
            released: released.map(SlotId),
        })
    }
}
