use chrono::Duration;

use crate::fine::FinePolicy;

/// Lending and seating policy shared by the services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibraryRules {
    pub loan_period: Duration,
    pub session_length: Duration,
    pub fines: FinePolicy,
}

impl Default for LibraryRules {
    fn default() -> Self {
        Self {
            loan_period: Duration::days(7),
            session_length: Duration::hours(4),
            fines: FinePolicy::default(),
        }
    }
}
