//! Queue event schema.
//!
//! Every [`Queue`](super::queue::Queue) publishes its state transitions on a
//! shared broadcast channel, tagged with the guild they belong to. Events are
//! sent in the order the transitions happen, so a `StreamableStart` always
//! follows the `StreamableEnd` of the previous track of the same guild.

use serenity::model::id::{GuildId, UserId};
use tokio::sync::broadcast;
use tracing::trace;

use crate::media::{Playable, Streamable};

/// Capacidad por defecto del canal de eventos
pub const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    PlayableAdd { playables: Vec<Playable> },
    PlayableRemoved { playable: Playable },
    PlayableEnd { playable: Playable },
    StreamableStart { streamable: Streamable },
    StreamableEnd { streamable: Streamable },
    QueueStart,
    QueueEnd,
    QueuePause,
    QueueUnpause,
    AutoplayStart { requester: UserId },
    AutoplayEnd,
    QueueDestroy,
    Error { message: String },
}

impl QueueEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PlayableAdd { .. } => "playableAdd",
            Self::PlayableRemoved { .. } => "playableRemoved",
            Self::PlayableEnd { .. } => "playableEnd",
            Self::StreamableStart { .. } => "streamableStart",
            Self::StreamableEnd { .. } => "streamableEnd",
            Self::QueueStart => "queueStart",
            Self::QueueEnd => "queueEnd",
            Self::QueuePause => "queuePause",
            Self::QueueUnpause => "queueUnpause",
            Self::AutoplayStart { .. } => "autoplayStart",
            Self::AutoplayEnd => "autoplayEnd",
            Self::QueueDestroy => "queueDestroy",
            Self::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuildEvent {
    pub guild_id: GuildId,
    pub event: QueueEvent,
}

/// Canal publish/subscribe de eventos de cola
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<GuildEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GuildEvent> {
        self.sender.subscribe()
    }

    /// Publica un evento; sin suscriptores el evento se descarta
    pub fn publish(&self, guild_id: GuildId, event: QueueEvent) {
        trace!("📣 {} en guild {}", event.name(), guild_id);
        let _ = self.sender.send(GuildEvent { guild_id, event });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_receive_events_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let guild = GuildId::new(1);

        bus.publish(guild, QueueEvent::QueueStart);
        bus.publish(guild, QueueEvent::QueueEnd);

        assert_eq!(rx.try_recv().unwrap().event, QueueEvent::QueueStart);
        assert_eq!(rx.try_recv().unwrap().event, QueueEvent::QueueEnd);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let bus = EventBus::default();
        bus.publish(GuildId::new(1), QueueEvent::AutoplayEnd);
        assert_eq!(QueueEvent::AutoplayEnd.name(), "autoplayEnd");
    }
}
