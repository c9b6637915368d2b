use chrono::{DateTime, Utc};
use libris_shared::{BookId, BookStatus, LoanId, LoanStatus, Role, SlotId, SlotStatus, UserId};
use serde::{Deserialize, Serialize};

use crate::{LibraryError, LibraryResult};

// ============================================================================
// Slots
// ============================================================================

/// A bookable study seat or room. Provisioned once, never deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub id: SlotId,
    pub zone: String,
    pub name: String,
    pub booking: Option<Booking>,
}

/// Who holds a slot and since when. Present exactly when the slot is booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Booking {
    pub user_id: UserId,
    pub started_at: DateTime<Utc>,
}

impl Slot {
    pub fn free(id: SlotId, zone: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            zone: zone.into(),
            name: name.into(),
            booking: None,
        }
    }

    /// Rebuilds a slot from its stored columns, rejecting rows where status
    /// and the booking columns disagree.
    pub fn from_columns(
        id: SlotId,
        zone: String,
        name: String,
        status: SlotStatus,
        booking_start_time: Option<DateTime<Utc>>,
        booked_by: Option<UserId>,
    ) -> LibraryResult<Self> {
        let booking = match (status, booking_start_time, booked_by) {
            (SlotStatus::Booked, Some(started_at), Some(user_id)) => Some(Booking { user_id, started_at }),
            (SlotStatus::Free, None, None) => None,
            _ => {
                return Err(LibraryError::Storage(format!(
                    "slot {} has inconsistent booking columns",
                    id
                )))
            }
        };

        Ok(Self { id, zone, name, booking })
    }

    pub fn status(&self) -> SlotStatus {
        if self.booking.is_some() {
            SlotStatus::Booked
        } else {
            SlotStatus::Free
        }
    }

    pub fn is_held_by(&self, user_id: UserId) -> bool {
        self.booking.map_or(false, |b| b.user_id == user_id)
    }

    /// The slot's layout position: zone first, then name.
    pub fn layout_key(&self) -> (&str, &str) {
        (&self.zone, &self.name)
    }
}

/// Default provisioning: four floors of ten seats plus six discussion rooms.
pub fn default_layout() -> Vec<(String, String)> {
    let mut layout = Vec::with_capacity(46);
    for floor in 1..=4 {
        for seat in 1..=10 {
            layout.push((format!("Floor {}", floor), format!("Seat {}", seat)));
        }
    }
    for room in 1..=6 {
        layout.push(("Discussion Area".to_string(), format!("Room {}", room)));
    }
    layout
}

// ============================================================================
// Users
// ============================================================================

/// A registered account as listed to administrators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn borrower(&self) -> Borrower {
        Borrower {
            username: self.username.clone(),
            role: self.role,
        }
    }
}

// ============================================================================
// Books & Loans
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub floor: Option<i32>,
    pub shelf: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub author: String,
    pub location: Location,
    pub status: BookStatus,
}

/// A catalogue search hit; `borrowed_by` names the holder of the open loan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookListing {
    #[serde(flatten)]
    pub book: Book,
    pub borrowed_by: Option<UserId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewBook {
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub floor: Option<i32>,
    #[serde(default)]
    pub shelf: Option<String>,
}

impl NewBook {
    pub fn validate(&self) -> LibraryResult<()> {
        if self.title.trim().is_empty() {
            return Err(LibraryError::Validation("title is required".into()));
        }
        if self.author.trim().is_empty() {
            return Err(LibraryError::Validation("author is required".into()));
        }
        Ok(())
    }

    pub fn location(&self) -> Location {
        Location {
            floor: self.floor,
            shelf: self.shelf.clone(),
        }
    }
}

/// A borrow record. Once `Returned`, its fields are final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Loan {
    pub id: LoanId,
    pub user_id: UserId,
    pub book_id: BookId,
    pub issue_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub return_date: Option<DateTime<Utc>>,
    pub fine: i64,
    pub status: LoanStatus,
}

impl Loan {
    pub fn is_open(&self) -> bool {
        self.status == LoanStatus::Borrowed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Borrower {
    pub username: String,
    pub role: Role,
}

/// A loan joined with the book it covers and, for staff listings, the borrower.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanRecord {
    pub loan: Loan,
    pub title: String,
    pub author: String,
    pub borrower: Option<Borrower>,
}
