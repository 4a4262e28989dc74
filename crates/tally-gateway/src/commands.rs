use anyhow::Result;
use tracing::{debug, error, info};
use uuid::Uuid;

use tally_types::models::{Timer, TimerView};

use crate::projection;
use crate::sync::SyncEngine;

/// Timer mutations. Each successful mutation is followed by a full
/// `all_timers` push to the owner; the push outcome never affects the
/// command's result.
#[derive(Clone)]
pub struct TimerCommands {
    sync: SyncEngine,
}

impl TimerCommands {
    pub fn new(sync: SyncEngine) -> Self {
        Self { sync }
    }

    /// Starts a new timer for `user_id` and returns its id.
    pub async fn start_timer(&self, user_id: Uuid, description: String) -> Result<Uuid> {
        let timer = Timer::started(user_id, description, self.sync.clock().now());
        let timer_id = timer.id;

        let store = self.sync.store().clone();
        tokio::task::spawn_blocking(move || store.insert_timer(&timer))
            .await
            .inspect_err(|e| error!("spawn_blocking join error: {}", e))??;

        info!("{} started timer {}", user_id, timer_id);
        let outcome = self.sync.push_all(user_id).await;
        debug!("Post-start push for {}: {:?}", user_id, outcome);

        Ok(timer_id)
    }

    /// Stops `timer_id` if `user_id` owns it and it is still running.
    ///
    /// Returns false for an unknown id, someone else's timer, or a timer that
    /// was already stopped; nothing is pushed in that case.
    pub async fn stop_timer(&self, user_id: Uuid, timer_id: Uuid) -> Result<bool> {
        let at = self.sync.clock().now();

        let store = self.sync.store().clone();
        let stopped = tokio::task::spawn_blocking(move || store.stop_timer(user_id, timer_id, at))
            .await
            .inspect_err(|e| error!("spawn_blocking join error: {}", e))??;

        if !stopped {
            debug!("{} could not stop timer {}", user_id, timer_id);
            return Ok(false);
        }

        info!("{} stopped timer {}", user_id, timer_id);
        let outcome = self.sync.push_all(user_id).await;
        debug!("Post-stop push for {}: {:?}", user_id, outcome);

        Ok(true)
    }

    /// All of `user_id`'s timers, projected at the current time.
    pub async fn list_timers(&self, user_id: Uuid) -> Result<Vec<TimerView>> {
        let store = self.sync.store().clone();
        let timers = tokio::task::spawn_blocking(move || store.timers_for_user(user_id))
            .await
            .inspect_err(|e| error!("spawn_blocking join error: {}", e))??;

        let now = self.sync.clock().now();
        Ok(timers.iter().map(|t| projection::project(t, now)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{DateTime, Duration};
    use tally_db::Database;
    use tally_types::events::PushEvent;
    use tokio::sync::mpsc;

    use crate::clock::ManualClock;
    use crate::registry::{ChannelHandle, InMemoryRegistry};

    struct Fixture {
        commands: TimerCommands,
        sync: SyncEngine,
        db: Arc<Database>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        ));
        let sync = SyncEngine::new(Arc::new(InMemoryRegistry::new()), db.clone(), clock.clone());
        Fixture {
            commands: TimerCommands::new(sync.clone()),
            sync,
            db,
            clock,
        }
    }

    impl Fixture {
        fn user(&self, name: &str) -> Uuid {
            let id = Uuid::new_v4();
            self.db.create_user(&id.to_string(), name, "hash").unwrap();
            id
        }

        fn connect(&self, user_id: Uuid) -> mpsc::UnboundedReceiver<PushEvent> {
            let (handle, rx) = ChannelHandle::open();
            self.sync.registry().register(user_id, handle);
            rx
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<PushEvent>) -> Vec<PushEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn start_pushes_active_snapshot() {
        let f = fixture();
        let alice = f.user("alice");
        let mut rx = f.connect(alice);

        let id = f.commands.start_timer(alice, "write report".into()).await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        let PushEvent::AllTimers { timers } = &events[0] else {
            panic!("expected all_timers");
        };
        assert_eq!(timers.len(), 1);
        assert_eq!(timers[0].id, id);
        assert_eq!(timers[0].description, "write report");
        assert!(timers[0].is_active);
        assert_eq!(timers[0].progress, Some(0));
    }

    #[tokio::test]
    async fn start_succeeds_without_a_channel() {
        let f = fixture();
        let alice = f.user("alice");

        let id = f.commands.start_timer(alice, "offline".into()).await.unwrap();
        let listed = f.commands.list_timers(alice).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
    }

    #[tokio::test]
    async fn stop_twice_reports_true_then_false_and_pushes_once() {
        let f = fixture();
        let alice = f.user("alice");
        let id = f.commands.start_timer(alice, "write report".into()).await.unwrap();
        let mut rx = f.connect(alice);

        f.clock.advance(Duration::milliseconds(5000));
        assert!(f.commands.stop_timer(alice, id).await.unwrap());

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        let view = &events[0].timers()[0];
        assert_eq!(events[0].kind(), "all_timers");
        assert!(!view.is_active);
        assert_eq!(view.duration, Some(5000));
        assert_eq!(view.progress, None);

        f.clock.advance(Duration::milliseconds(1000));
        assert!(!f.commands.stop_timer(alice, id).await.unwrap());
        assert!(drain(&mut rx).is_empty());

        let listed = f.commands.list_timers(alice).await.unwrap();
        assert_eq!(listed[0].duration, Some(5000));
    }

    #[tokio::test]
    async fn stopping_someone_elses_timer_looks_like_not_found() {
        let f = fixture();
        let alice = f.user("alice");
        let bob = f.user("bob");
        let id = f.commands.start_timer(alice, "mine".into()).await.unwrap();
        let mut alice_rx = f.connect(alice);
        let mut bob_rx = f.connect(bob);

        assert!(!f.commands.stop_timer(bob, id).await.unwrap());
        assert!(!f.commands.stop_timer(bob, Uuid::new_v4()).await.unwrap());

        assert!(drain(&mut alice_rx).is_empty());
        assert!(drain(&mut bob_rx).is_empty());
        assert!(f.commands.list_timers(alice).await.unwrap()[0].is_active);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_starts_push_once_each() {
        let f = fixture();
        let alice = f.user("alice");
        let mut rx = f.connect(alice);

        const N: usize = 12;
        let tasks: Vec<_> = (0..N)
            .map(|i| {
                let commands = f.commands.clone();
                tokio::spawn(async move { commands.start_timer(alice, format!("job {i}")).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let events = drain(&mut rx);
        assert_eq!(events.len(), N);
        assert!(events.iter().all(|e| e.kind() == "all_timers"));
        // Snapshots may arrive in any order, but the last one written has seen
        // at least one timer and no snapshot can see more than N.
        assert!(events.iter().all(|e| (1..=N).contains(&e.timers().len())));
        assert_eq!(f.sync.registry().user_ids(), vec![alice]);
        assert_eq!(f.commands.list_timers(alice).await.unwrap().len(), N);
    }
}
