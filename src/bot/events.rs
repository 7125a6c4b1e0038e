use dashmap::DashMap;
use serenity::{
    http::Http,
    model::id::{ChannelId, GuildId},
};
use std::sync::Arc;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    audio::{GuildEvent, QueueEvent},
    bot::handlers::format_duration,
};

/// Texto a anunciar para un evento, `None` si no se anuncia
pub fn describe(event: &QueueEvent) -> Option<String> {
    match event {
        QueueEvent::StreamableStart { streamable } => Some(format!(
            "🎵 Reproduciendo: **{}** de {} ({})",
            streamable.name,
            streamable.artist.name,
            format_duration(streamable.duration)
        )),
        QueueEvent::AutoplayStart { requester } => {
            Some(format!("🎯 Autoplay activado por <@{}>", requester))
        }
        QueueEvent::AutoplayEnd => Some("🎯 Autoplay desactivado".to_string()),
        QueueEvent::QueueEnd => Some("⏹️ La cola terminó".to_string()),
        QueueEvent::Error { message } => Some(format!("⚠️ {}", message)),
        _ => None,
    }
}

/// Publica los eventos de cada cola en el canal de texto donde se usó el bot
pub fn spawn_announcer(
    http: Arc<Http>,
    mut events: broadcast::Receiver<GuildEvent>,
    channels: Arc<DashMap<GuildId, ChannelId>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let GuildEvent { guild_id, event } = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("📣 Anunciador atrasado, {} eventos descartados", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            if matches!(event, QueueEvent::QueueDestroy) {
                channels.remove(&guild_id);
                continue;
            }

            let Some(text) = describe(&event) else {
                continue;
            };
            let Some(channel_id) = channels.get(&guild_id).map(|c| *c) else {
                debug!("Sin canal de anuncios para guild {}", guild_id);
                continue;
            };

            if let Err(e) = channel_id.say(&*http, text).await {
                warn!("Error al anunciar {} en guild {}: {:?}", event.name(), guild_id, e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{ArtistRef, Streamable, StreamableSource};
    use serenity::model::id::UserId;
    use std::time::Duration;

    #[test]
    fn only_user_visible_events_are_announced() {
        let streamable = Streamable::new(
            StreamableSource::Spotify,
            "t",
            "One More Time",
            ArtistRef::new("a", "Daft Punk"),
            "https://open.spotify.com/track/t",
            Duration::from_secs(320),
        );

        assert_eq!(
            describe(&QueueEvent::StreamableStart { streamable }).as_deref(),
            Some("🎵 Reproduciendo: **One More Time** de Daft Punk (5:20)")
        );
        assert_eq!(
            describe(&QueueEvent::AutoplayStart { requester: UserId::new(9) }).as_deref(),
            Some("🎯 Autoplay activado por <@9>")
        );
        assert!(describe(&QueueEvent::QueuePause).is_none());
        assert!(describe(&QueueEvent::PlayableAdd { playables: vec![] }).is_none());
    }
}
