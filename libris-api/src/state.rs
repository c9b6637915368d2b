use std::sync::Arc;

use libris_circulation::{Catalogue, CirculationDesk, MemberRoster};
use libris_core::repository::{CirculationRepository, SlotRepository, UserRepository};
use libris_core::{EventBus, LibraryRules};
use libris_seating::{BookingLedger, ExpirySweeper};
use mockable::Clock;
use tokio::sync::watch;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

/// Process-wide stop flag. Long-lived responses end once it is triggered,
/// so graceful shutdown is not held open by subscribers.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`trigger`](Self::trigger) has been called, including
    /// when that happened before the wait began.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while waiting.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

#[derive(Clone)]
pub struct AppState {
    pub ledger: BookingLedger,
    pub desk: CirculationDesk,
    pub catalogue: Catalogue,
    pub roster: MemberRoster,
    pub events: EventBus,
    pub clock: Arc<dyn Clock + Send + Sync>,
    pub auth: AuthConfig,
    pub shutdown: Shutdown,
}

impl AppState {
    /// Wires the services over the repositories, sharing a single event bus.
    pub fn new(
        slots: Arc<dyn SlotRepository>,
        circulation: Arc<dyn CirculationRepository>,
        users: Arc<dyn UserRepository>,
        rules: LibraryRules,
        clock: Arc<dyn Clock + Send + Sync>,
        auth: AuthConfig,
    ) -> Self {
        let events = EventBus::default();
        let sweeper = ExpirySweeper::new(slots.clone(), events.clone(), rules.session_length);

        Self {
            ledger: BookingLedger::new(slots, sweeper, events.clone()),
            desk: CirculationDesk::new(circulation.clone(), events.clone(), rules),
            catalogue: Catalogue::new(circulation, events.clone()),
            roster: MemberRoster::new(users, events.clone()),
            events,
            clock,
            auth,
            shutdown: Shutdown::new(),
        }
    }
}
