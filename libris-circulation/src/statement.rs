use chrono::{DateTime, Utc};
use libris_core::model::LoanRecord;
use libris_core::FinePolicy;

/// A loan as shown in history listings.
///
/// For an open loan `fine` is what would be charged if it were returned at
/// the time of the listing; for a closed loan it is the settled amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanStatement {
    pub record: LoanRecord,
    pub fine: i64,
    pub accruing: bool,
}

impl LoanStatement {
    pub fn at(record: LoanRecord, now: DateTime<Utc>, fines: &FinePolicy) -> Self {
        if record.loan.is_open() {
            let fine = fines.assess(record.loan.due_date, now).amount;
            Self { record, fine, accruing: true }
        } else {
            let fine = record.loan.fine;
            Self { record, fine, accruing: false }
        }
    }
}
