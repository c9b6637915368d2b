pub mod catalogue;
pub mod desk;
pub mod members;
pub mod statement;

pub use catalogue::Catalogue;
pub use desk::{CirculationDesk, ReturnReceipt};
pub use members::MemberRoster;
pub use statement::LoanStatement;
