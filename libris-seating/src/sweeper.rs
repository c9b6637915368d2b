use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use libris_core::repository::SlotRepository;
use libris_core::{EventBus, LibraryResult};
use libris_shared::SlotUpdate;
use mockable::Clock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Shortest period the background sweeper will tick at.
pub const MIN_PERIOD: StdDuration = StdDuration::from_secs(1);

/// Returns slots whose session has run its full length to the free pool.
///
/// A sweep is one bulk conditional write, so concurrent sweeps (inline and
/// periodic) never free the same booking twice.
#[derive(Clone)]
pub struct ExpirySweeper {
    slots: Arc<dyn SlotRepository>,
    events: EventBus,
    session_length: Duration,
}

impl ExpirySweeper {
    pub fn new(slots: Arc<dyn SlotRepository>, events: EventBus, session_length: Duration) -> Self {
        Self { slots, events, session_length }
    }

    /// Frees every booking started at least `session_length` before `now`.
    /// Publishes one aggregate `slot_update` when anything was freed.
    pub async fn sweep(&self, now: DateTime<Utc>) -> LibraryResult<u64> {
        let cutoff = now - self.session_length;
        let expired = self.slots.expire_started_before(cutoff).await?;

        if expired > 0 {
            info!("Auto-expired {} slots", expired);
            self.events.publish(SlotUpdate::Expired { expired });
        }

        Ok(expired)
    }

    /// Runs [`sweep`](Self::sweep) every `period` until the returned handle
    /// is stopped. The first sweep happens one full period after start. A
    /// zero period is raised to [`MIN_PERIOD`].
    pub fn spawn(self, clock: Arc<dyn Clock + Send + Sync>, period: StdDuration) -> SweeperHandle {
        let period = if period.is_zero() {
            warn!("Expiry sweeper period of zero raised to {:?}", MIN_PERIOD);
            MIN_PERIOD
        } else {
            period
        };
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            info!("Expiry sweeper started, every {:?}", period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // Storage failures are retried on the next tick.
                        if let Err(e) = self.sweep(clock.utc()).await {
                            error!("Auto-expiry check error: {}", e);
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Expiry sweeper stopped");
        });

        SweeperHandle { shutdown: shutdown_tx, task }
    }
}

/// Owner of a running periodic sweeper.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn stop(self) {
        if self.shutdown.send(true).is_err() {
            warn!("Expiry sweeper already gone");
        }
        if let Err(e) = self.task.await {
            warn!("Expiry sweeper task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use libris_core::repository::MockSlotRepository;
    use libris_core::LibraryError;
    use libris_shared::{LibraryEvent, Role, SlotId, UserId};
    use libris_store::MemoryStore;

    struct FixtureClock(DateTime<Utc>);

    impl Clock for FixtureClock {
        fn local(&self) -> DateTime<Local> {
            self.0.with_timezone(&Local)
        }

        fn utc(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap()
    }

    async fn store_with_booking(at: DateTime<Utc>) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::with_default_layout());
        for id in 10..=12 {
            store.add_user(UserId(id), &format!("student{id}"), Role::Student).await;
        }
        store.claim(SlotId(1), UserId(10), at).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_expires_after_four_hours() {
        let store = store_with_booking(t0()).await;
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let sweeper = ExpirySweeper::new(store.clone(), events, Duration::hours(4));

        let freed = sweeper.sweep(t0() + Duration::hours(4) + Duration::milliseconds(1)).await.unwrap();

        assert_eq!(freed, 1);
        assert_eq!(rx.try_recv().unwrap(), LibraryEvent::Slot(SlotUpdate::Expired { expired: 1 }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_session_boundary_is_inclusive() {
        let store = store_with_booking(t0()).await;
        let sweeper = ExpirySweeper::new(store, EventBus::default(), Duration::hours(4));

        assert_eq!(sweeper.sweep(t0() + Duration::hours(4)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fresh_booking_survives() {
        let store = store_with_booking(t0()).await;
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let sweeper = ExpirySweeper::new(store.clone(), events, Duration::hours(4));

        let freed = sweeper.sweep(t0() + Duration::hours(3) + Duration::minutes(59)).await.unwrap();

        assert_eq!(freed, 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(store.active_slot_for(UserId(10)).await.unwrap(), Some(SlotId(1)));
    }

    #[tokio::test]
    async fn test_second_sweep_is_silent() {
        let store = store_with_booking(t0()).await;
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let sweeper = ExpirySweeper::new(store, events, Duration::hours(4));
        let later = t0() + Duration::hours(5);

        assert_eq!(sweeper.sweep(later).await.unwrap(), 1);
        assert!(rx.try_recv().is_ok());

        assert_eq!(sweeper.sweep(later).await.unwrap(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_one_event_for_many_expiries() {
        let store = store_with_booking(t0()).await;
        store.claim(SlotId(2), UserId(11), t0()).await.unwrap();
        store.claim(SlotId(3), UserId(12), t0()).await.unwrap();
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let sweeper = ExpirySweeper::new(store, events, Duration::hours(4));

        assert_eq!(sweeper.sweep(t0() + Duration::hours(6)).await.unwrap(), 3);
        assert_eq!(rx.try_recv().unwrap(), LibraryEvent::Slot(SlotUpdate::Expired { expired: 3 }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sweeper_frees_and_stops() {
        let store = store_with_booking(t0()).await;
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let sweeper = ExpirySweeper::new(store.clone(), events, Duration::hours(4));
        let clock = Arc::new(FixtureClock(t0() + Duration::hours(5)));

        let handle = sweeper.spawn(clock, StdDuration::from_secs(60));

        let event = rx.recv().await.unwrap();
        assert_eq!(event, LibraryEvent::Slot(SlotUpdate::Expired { expired: 1 }));
        assert_eq!(store.active_slot_for(UserId(10)).await.unwrap(), None);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sweeper_survives_storage_failure() {
        let mut slots = MockSlotRepository::new();
        slots
            .expect_expire_started_before()
            .times(1)
            .returning(|_| Err(LibraryError::Storage("connection refused".into())));
        slots
            .expect_expire_started_before()
            .returning(|_| Ok(2));

        let events = EventBus::default();
        let mut rx = events.subscribe();
        let sweeper = ExpirySweeper::new(Arc::new(slots), events, Duration::hours(4));

        let handle = sweeper.spawn(Arc::new(FixtureClock(t0())), StdDuration::from_secs(60));

        let event = rx.recv().await.unwrap();
        assert_eq!(event, LibraryEvent::Slot(SlotUpdate::Expired { expired: 2 }));

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_is_raised_to_minimum() {
        let store = store_with_booking(t0()).await;
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let sweeper = ExpirySweeper::new(store.clone(), events, Duration::hours(4));
        let clock = Arc::new(FixtureClock(t0() + Duration::hours(5)));

        let started = tokio::time::Instant::now();
        let handle = sweeper.spawn(clock, StdDuration::ZERO);

        let event = rx.recv().await.unwrap();
        assert_eq!(event, LibraryEvent::Slot(SlotUpdate::Expired { expired: 1 }));
        assert!(started.elapsed() >= MIN_PERIOD);
        assert!(started.elapsed() < StdDuration::from_secs(60));

        handle.stop().await;
    }
}
