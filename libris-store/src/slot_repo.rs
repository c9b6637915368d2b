use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libris_core::model::Slot;
use libris_core::repository::{ClaimOutcome, SlotRepository};
use libris_core::{Entity, LibraryError, LibraryResult};
use libris_shared::{SlotId, UserId};
use sqlx::PgPool;

pub struct PgSlotRepository {
    pool: PgPool,
}

impl PgSlotRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SlotRow {
    id: i64,
    zone: String,
    name: String,
    status: String,
    booking_start_time: Option<DateTime<Utc>>,
    booked_by_user_id: Option<i64>,
}

impl TryFrom<SlotRow> for Slot {
    type Error = LibraryError;

    fn try_from(row: SlotRow) -> Result<Self, Self::Error> {
        let status = row.status.parse().map_err(LibraryError::storage)?;
        Slot::from_columns(
            SlotId(row.id),
            row.zone,
            row.name,
            status,
            row.booking_start_time,
            row.booked_by_user_id.map(UserId),
        )
    }
}

const SLOT_COLUMNS: &str = "id, zone, name, status, booking_start_time, booked_by_user_id";

#[async_trait]
impl SlotRepository for PgSlotRepository {
    async fn active_slot_for(&self, user_id: UserId) -> LibraryResult<Option<SlotId>> {
        let id: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM slots WHERE booked_by_user_id = $1 AND status = 'booked'",
        )
        .bind(user_id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(LibraryError::storage)?;

        Ok(id.map(SlotId))
    }

    async fn claim(&self, slot_id: SlotId, user_id: UserId, now: DateTime<Utc>) -> LibraryResult<ClaimOutcome> {
        let claimed = sqlx::query_as::<_, SlotRow>(&format!(
            r#"
            UPDATE slots
            SET status = 'booked', booking_start_time = $2, booked_by_user_id = $3
            WHERE id = $1 AND status = 'free'
            RETURNING {SLOT_COLUMNS}
            "#
        ))
        .bind(slot_id.get())
        .bind(now)
        .bind(user_id.get())
        .fetch_optional(&self.pool)
        .await;

        let row = match claimed {
            Ok(row) => row,
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Ok(ClaimOutcome::UserBusy);
            }
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                return Err(LibraryError::NotFound(Entity::User));
            }
            Err(e) => return Err(LibraryError::storage(e)),
        };

        if let Some(row) = row {
            return Ok(ClaimOutcome::Claimed(row.try_into()?));
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM slots WHERE id = $1)")
            .bind(slot_id.get())
            .fetch_one(&self.pool)
            .await
            .map_err(LibraryError::storage)?;

        Ok(if exists { ClaimOutcome::Occupied } else { ClaimOutcome::Missing })
    }

    async fn release_held_by(&self, slot_id: SlotId, user_id: UserId) -> LibraryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE slots
            SET status = 'free', booked_by_user_id = NULL, booking_start_time = NULL
            WHERE id = $1 AND booked_by_user_id = $2 AND status = 'booked'
            "#,
        )
        .bind(slot_id.get())
        .bind(user_id.get())
        .execute(&self.pool)
        .await
        .map_err(LibraryError::storage)?;

        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, slot_id: SlotId) -> LibraryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE slots
            SET status = 'free', booked_by_user_id = NULL, booking_start_time = NULL
            WHERE id = $1
            "#,
        )
        .bind(slot_id.get())
        .execute(&self.pool)
        .await
        .map_err(LibraryError::storage)?;

        Ok(result.rows_affected() > 0)
    }

    async fn expire_started_before(&self, cutoff: DateTime<Utc>) -> LibraryResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE slots
            SET status = 'free', booking_start_time = NULL, booked_by_user_id = NULL
            WHERE status = 'booked' AND booking_start_time <= $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(LibraryError::storage)?;

        Ok(result.rows_affected())
    }

    async fn list_ordered(&self) -> LibraryResult<Vec<Slot>> {
        let rows = sqlx::query_as::<_, SlotRow>(&format!(
            "SELECT {SLOT_COLUMNS} FROM slots ORDER BY zone COLLATE \"C\", name COLLATE \"C\""
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(LibraryError::storage)?;

        rows.into_iter().map(Slot::try_from).collect()
    }
}
