pub mod ledger;
pub mod sweeper;

pub use ledger::BookingLedger;
pub use sweeper::{ExpirySweeper, SweeperHandle};
