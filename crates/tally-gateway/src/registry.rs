use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tokio::sync::mpsc;
use uuid::Uuid;

use tally_types::events::PushEvent;

/// Sending half of one open channel. Cloning it does not open a new channel;
/// every clone addresses the same connection, identified by `conn_id`.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<PushEvent>,
}

impl ChannelHandle {
    /// Opens a new channel. The receiver is drained by the connection task.
    pub fn open() -> (Self, mpsc::UnboundedReceiver<PushEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            conn_id: Uuid::new_v4(),
            tx,
        };
        (handle, rx)
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Queues an event. Returns false once the connection has gone away.
    pub fn send(&self, event: PushEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Who to push to: at most one live channel per user.
///
/// Every method must be atomic with respect to the others, since they are
/// called from connection tasks, request handlers and the tick loop at once.
pub trait ChannelRegistry: Send + Sync {
    /// Stores `channel` for `user_id`, returning the channel it replaced.
    /// The replaced channel is no longer addressable.
    fn register(&self, user_id: Uuid, channel: ChannelHandle) -> Option<ChannelHandle>;

    /// Removes whatever channel is registered for `user_id`. Unregistering
    /// a user with no channel is a no-op.
    fn unregister(&self, user_id: Uuid) -> Option<ChannelHandle>;

    /// Removes the entry for `user_id` only if it is still `conn_id`.
    /// Used by closing connections so a superseded connection cannot evict
    /// the one that replaced it.
    fn unregister_conn(&self, user_id: Uuid, conn_id: Uuid) -> bool;

    fn get(&self, user_id: Uuid) -> Option<ChannelHandle>;

    /// Consistent snapshot of the registered user ids.
    fn user_ids(&self) -> Vec<Uuid>;

    /// Walks a snapshot of the registered ids; the registry is not locked
    /// while `f` runs.
    fn for_each_user_id(&self, f: &mut dyn FnMut(Uuid)) {
        for user_id in self.user_ids() {
            f(user_id);
        }
    }
}

/// Process-local registry behind a single lock.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    channels: RwLock<HashMap<Uuid, ChannelHandle>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, ChannelHandle>> {
        self.channels.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, ChannelHandle>> {
        self.channels.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChannelRegistry for InMemoryRegistry {
    fn register(&self, user_id: Uuid, channel: ChannelHandle) -> Option<ChannelHandle> {
        self.write().insert(user_id, channel)
    }

    fn unregister(&self, user_id: Uuid) -> Option<ChannelHandle> {
        self.write().remove(&user_id)
    }

    fn unregister_conn(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        let mut channels = self.write();
        match channels.get(&user_id) {
            Some(current) if current.conn_id == conn_id => {
                channels.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    fn get(&self, user_id: Uuid) -> Option<ChannelHandle> {
        self.read().get(&user_id).cloned()
    }

    fn user_ids(&self) -> Vec<Uuid> {
        self.read().keys().copied().collect()
    }
}
