pub mod models;

pub use models::events::{InventoryStatus, InventoryUpdate, LibraryEvent, SlotUpdate};
pub use models::ids::{BookId, LoanId, SlotId, UserId};
pub use models::status::{BookStatus, LoanStatus, Role, SlotStatus};
