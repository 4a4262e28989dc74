use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use tally_types::events::PushEvent;
use tally_types::models::Timer;

use crate::clock::Clock;
use crate::projection;
use crate::registry::ChannelRegistry;
use crate::store::TimerStore;

/// Result of one push attempt. Only informative: callers on the command
/// path ignore it, since a mutation's success never depends on delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Snapshot queued on the user's channel.
    Sent,
    /// The user has no registered channel.
    NoChannel,
    /// The channel went away between lookup and send.
    ChannelClosed,
    /// Loading timers failed; logged and skipped.
    StoreFailed,
}

#[derive(Debug, Clone, Copy)]
enum Scope {
    All,
    Active,
}

/// Pushes projected timer snapshots to users' channels.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<SyncInner>,
}

struct SyncInner {
    registry: Arc<dyn ChannelRegistry>,
    store: Arc<dyn TimerStore>,
    clock: Arc<dyn Clock>,
}

impl SyncEngine {
    pub fn new(
        registry: Arc<dyn ChannelRegistry>,
        store: Arc<dyn TimerStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                registry,
                store,
                clock,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<dyn ChannelRegistry> {
        &self.inner.registry
    }

    pub fn store(&self) -> &Arc<dyn TimerStore> {
        &self.inner.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    /// Sends `all_timers` with every timer `user_id` owns.
    pub async fn push_all(&self, user_id: Uuid) -> PushOutcome {
        self.push(user_id, Scope::All).await
    }

    /// Sends `active_timers` with only the running timers of `user_id`.
    pub async fn push_active(&self, user_id: Uuid) -> PushOutcome {
        self.push(user_id, Scope::Active).await
    }

    /// One tick: `push_active` to every user registered right now.
    /// Returns how many snapshots were queued.
    pub async fn tick(&self) -> usize {
        let users = self.inner.registry.user_ids();
        let outcomes = join_all(users.into_iter().map(|user_id| self.push_active(user_id))).await;
        outcomes
            .into_iter()
            .filter(|outcome| *outcome == PushOutcome::Sent)
            .count()
    }

    async fn push(&self, user_id: Uuid, scope: Scope) -> PushOutcome {
        let Some(channel) = self.inner.registry.get(user_id) else {
            trace!("No channel for {}, skipping {:?} push", user_id, scope);
            return PushOutcome::NoChannel;
        };

        let timers = match self.load(user_id, scope).await {
            Ok(timers) => timers,
            Err(e) => {
                warn!("Skipping {:?} push for {}: {:#}", scope, user_id, e);
                return PushOutcome::StoreFailed;
            }
        };

        let now = self.inner.clock.now();
        let timers = timers.iter().map(|t| projection::project(t, now)).collect();
        let event = match scope {
            Scope::All => PushEvent::AllTimers { timers },
            Scope::Active => PushEvent::ActiveTimers { timers },
        };

        if channel.send(event) {
            PushOutcome::Sent
        } else {
            debug!("Channel {} for {} closed before push", channel.conn_id(), user_id);
            PushOutcome::ChannelClosed
        }
    }

    // Store calls are blocking; run them off the async runtime.
    async fn load(&self, user_id: Uuid, scope: Scope) -> anyhow::Result<Vec<Timer>> {
        let store = self.inner.store.clone();
        tokio::task::spawn_blocking(move || match scope {
            Scope::All => store.timers_for_user(user_id),
            Scope::Active => store.active_timers_for_user(user_id),
        })
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            anyhow::Error::from(e)
        })?
    }
}

/// Background task that fires [`SyncEngine::tick`] every `period`.
///
/// Each tick runs in its own task, so a slow tick never delays the next one.
/// Overlapping ticks for the same user are harmless: every push is a full
/// snapshot.
pub async fn run_tick_loop(engine: SyncEngine, period: Duration) {
    let mut interval = tokio::time::interval(period);

    loop {
        interval.tick().await;

        let engine = engine.clone();
        tokio::spawn(async move {
            let sent = engine.tick().await;
            trace!("Tick pushed {} snapshots", sent);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::registry::{ChannelHandle, InMemoryRegistry};
    use chrono::{DateTime, Utc};
    use tally_db::Database;

    struct Fixture {
        engine: SyncEngine,
        db: Arc<Database>,
        clock: Arc<ManualClock>,
        user: Uuid,
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let user = Uuid::new_v4();
        db.create_user(&user.to_string(), "alice", "hash").unwrap();

        let clock = Arc::new(ManualClock::new(t0()));
        let engine = SyncEngine::new(Arc::new(InMemoryRegistry::new()), db.clone(), clock.clone());
        Fixture {
            engine,
            db,
            clock,
            user,
        }
    }

    fn add_timer(f: &Fixture, description: &str, end_after_ms: Option<i64>) -> Timer {
        let mut timer = Timer::started(f.user, description, f.clock.now());
        TimerStore::insert_timer(f.db.as_ref(), &timer).unwrap();
        if let Some(ms) = end_after_ms {
            let end = f.clock.now() + chrono::Duration::milliseconds(ms);
            TimerStore::stop_timer(f.db.as_ref(), f.user, timer.id, end).unwrap();
            timer.end = Some(end);
        }
        timer
    }

    #[tokio::test]
    async fn push_all_with_no_timers_sends_empty_snapshot() {
        let f = fixture();
        let (handle, mut rx) = ChannelHandle::open();
        f.engine.registry().register(f.user, handle);

        assert_eq!(f.engine.push_all(f.user).await, PushOutcome::Sent);
        assert_eq!(rx.try_recv().unwrap(), PushEvent::AllTimers { timers: vec![] });
    }

    #[tokio::test]
    async fn push_without_channel_is_skipped() {
        let f = fixture();
        add_timer(&f, "orphan", None);

        assert_eq!(f.engine.push_all(f.user).await, PushOutcome::NoChannel);
        assert_eq!(f.engine.push_active(Uuid::new_v4()).await, PushOutcome::NoChannel);
    }

    #[tokio::test]
    async fn push_to_closed_channel_is_not_an_error() {
        let f = fixture();
        let (handle, rx) = ChannelHandle::open();
        f.engine.registry().register(f.user, handle);
        drop(rx);

        assert_eq!(f.engine.push_all(f.user).await, PushOutcome::ChannelClosed);
    }

    #[tokio::test]
    async fn push_all_includes_finished_timers_push_active_does_not() {
        let f = fixture();
        let done = add_timer(&f, "done", Some(2000));
        f.clock.advance(chrono::Duration::milliseconds(10));
        let running = add_timer(&f, "running", None);
        f.clock.advance(chrono::Duration::milliseconds(990));

        let (handle, mut rx) = ChannelHandle::open();
        f.engine.registry().register(f.user, handle);

        f.engine.push_all(f.user).await;
        let PushEvent::AllTimers { timers } = rx.try_recv().unwrap() else {
            panic!("expected all_timers");
        };
        assert_eq!(timers.len(), 2);
        assert_eq!(timers[0].id, running.id);
        assert_eq!(timers[0].progress, Some(990));
        assert_eq!(timers[1].id, done.id);
        assert_eq!(timers[1].duration, Some(2000));

        f.engine.push_active(f.user).await;
        let PushEvent::ActiveTimers { timers } = rx.try_recv().unwrap() else {
            panic!("expected active_timers");
        };
        assert_eq!(timers.len(), 1);
        assert_eq!(timers[0].id, running.id);
        assert!(timers[0].is_active);
    }

    #[tokio::test]
    async fn tick_reaches_every_registered_user() {
        let f = fixture();
        let bob = Uuid::new_v4();
        f.db.create_user(&bob.to_string(), "bob", "hash").unwrap();
        add_timer(&f, "alice's", None);

        let (alice_ch, mut alice_rx) = ChannelHandle::open();
        let (bob_ch, mut bob_rx) = ChannelHandle::open();
        f.engine.registry().register(f.user, alice_ch);
        f.engine.registry().register(bob, bob_ch);

        f.clock.advance(chrono::Duration::seconds(1));
        assert_eq!(f.engine.tick().await, 2);

        let alice_event = alice_rx.try_recv().unwrap();
        assert_eq!(alice_event.kind(), "active_timers");
        assert_eq!(alice_event.timers()[0].progress, Some(1000));

        assert_eq!(bob_rx.try_recv().unwrap(), PushEvent::ActiveTimers { timers: vec![] });
    }

    #[tokio::test]
    async fn tick_with_no_users_does_nothing() {
        let f = fixture();
        assert_eq!(f.engine.tick().await, 0);
    }

    #[tokio::test]
    async fn tick_loop_fires_on_period() {
        let f = fixture();
        let (handle, mut rx) = ChannelHandle::open();
        f.engine.registry().register(f.user, handle);

        let task = tokio::spawn(run_tick_loop(f.engine.clone(), Duration::from_millis(20)));

        for _ in 0..3 {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("tick did not fire")
                .unwrap();
            assert_eq!(event.kind(), "active_timers");
        }
        task.abort();
    }
}
