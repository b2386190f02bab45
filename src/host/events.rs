// src/host/events.rs
use log::debug;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::host::master::MasterUpdateStatus;
use crate::models::{Player, Server};
use crate::protocol::GameId;

/// Domain events raised by a host.
///
/// Borrowed data lives in the host's locked state and is only valid for the
/// duration of the callback.
#[derive(Debug)]
pub enum Event<'a> {
    MasterUpdate(&'a MasterUpdateStatus),
    ServerAdded(&'a Server),
    ServerRemoved(&'a Server),
    ServerRestarted {
        server: &'a Server,
        previous_uptime: i32,
        uptime: i32,
    },
    ServerUpdated(&'a Server),
    PlayerConnected {
        server: &'a Server,
        player: &'a Player,
    },
    PlayerDisconnected {
        server: &'a Server,
        player: &'a Player,
    },
    /// Raised before `player` takes the new name.
    PlayerRenamed {
        server: &'a Server,
        player: &'a Player,
        new_name: &'a str,
    },
}

impl Event<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::MasterUpdate(_) => "master_update",
            Event::ServerAdded(_) => "server_added",
            Event::ServerRemoved(_) => "server_removed",
            Event::ServerRestarted { .. } => "server_restarted",
            Event::ServerUpdated(_) => "server_updated",
            Event::PlayerConnected { .. } => "player_connected",
            Event::PlayerDisconnected { .. } => "player_disconnected",
            Event::PlayerRenamed { .. } => "player_renamed",
        }
    }
}

/// Receives host events synchronously. Must not block or call back into the
/// host that raised the event.
pub trait Subscriber: Send + Sync {
    fn on_event(&self, game: GameId, event: &Event<'_>);
}

impl<F> Subscriber for F
where
    F: Fn(GameId, &Event<'_>) + Send + Sync,
{
    fn on_event(&self, game: GameId, event: &Event<'_>) {
        self(game, event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

pub struct EventBus {
    game: GameId,
    subscribers: RwLock<Vec<(SubscriberId, Arc<dyn Subscriber>)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new(game: GameId) -> Self {
        Self {
            game,
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push((id, subscriber));
        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn publish(&self, event: Event<'_>) {
        debug!("{}: event {}", self.game, event.kind());
        for (_, subscriber) in self.subscribers.read().iter() {
            subscriber.on_event(self.game, &event);
        }
    }
}
