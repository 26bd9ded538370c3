//! Exclusive playback across players.
//!
//! A [`PlaybackCoordinator`] is shared by every player in one scope (a page,
//! a process, a test).  It allocates player ids and fans `announce_play` out
//! to every subscriber synchronously.  It keeps no record of who is playing:
//! each subscriber pauses itself when someone else announces.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

pub type PlayerId = u64;

type Handler = Arc<dyn Fn(PlayerId) + Send + Sync>;

struct Subscriber {
    key: u64,
    owner: PlayerId,
    handler: Handler,
}

pub struct PlaybackCoordinator {
    next_player_id: AtomicU64,
    next_key: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl PlaybackCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_player_id: AtomicU64::new(1),
            next_key: AtomicU64::new(1),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Next unique player id.  Ids are never reused within this coordinator.
    pub fn allocate_id(&self) -> PlayerId {
        self.next_player_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register `handler` for announcements on behalf of `owner`.  The
    /// handler stays registered until the returned guard is dropped.
    pub fn subscribe<F>(self: &Arc<Self>, owner: PlayerId, handler: F) -> Subscription
    where
        F: Fn(PlayerId) + Send + Sync + 'static,
    {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push(Subscriber {
            key,
            owner,
            handler: Arc::new(handler),
        });
        debug!("coordinator: player {} subscribed", owner);
        Subscription {
            coordinator: Arc::downgrade(self),
            key,
        }
    }

    /// Tell every subscriber that `id` now holds playback.  All handlers have
    /// run by the time this returns.
    pub fn announce_play(&self, id: PlayerId) {
        // Handlers run outside the lock so they may subscribe or unsubscribe.
        let handlers: Vec<Handler> = self
            .subscribers
            .lock()
            .iter()
            .map(|s| Arc::clone(&s.handler))
            .collect();
        debug!("coordinator: player {} announced play to {}", id, handlers.len());
        for handler in handlers {
            handler(id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn unsubscribe(&self, key: u64) {
        let mut subscribers = self.subscribers.lock();
        if let Some(pos) = subscribers.iter().position(|s| s.key == key) {
            let removed = subscribers.remove(pos);
            debug!("coordinator: player {} unsubscribed", removed.owner);
        }
    }
}

/// Registration guard returned by [`PlaybackCoordinator::subscribe`].
pub struct Subscription {
    coordinator: Weak<PlaybackCoordinator>,
    key: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(coordinator) = self.coordinator.upgrade() {
            coordinator.unsubscribe(self.key);
        }
    }
}
