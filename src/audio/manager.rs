use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::{future::Future, sync::Arc};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::{
    audio::{
        events::EventBus,
        queue::{Queue, QueueSettings},
        voice_stream::{StreamEvent, VoiceStream},
    },
    error::{QueueError, VoiceError},
    recommendation::Recommender,
};

pub type SharedQueue = Arc<Mutex<Queue>>;

/// Un stream recién conectado y sus eventos
pub type Connection = (Arc<dyn VoiceStream>, mpsc::UnboundedReceiver<StreamEvent>);

/// Registro de colas por guild.
///
/// Cada cola tiene su propia tarea que aplica los eventos del stream con el
/// lock de la cola tomado; un `End` y un comando nunca se intercalan.
pub struct QueueManager {
    queues: Arc<DashMap<GuildId, SharedQueue>>,
    creating: Mutex<()>,
    recommender: Arc<Recommender>,
    events: EventBus,
    settings: QueueSettings,
}

impl QueueManager {
    pub fn new(recommender: Arc<Recommender>, events: EventBus, settings: QueueSettings) -> Self {
        Self {
            queues: Arc::new(DashMap::new()),
            creating: Mutex::new(()),
            recommender,
            events,
            settings,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn recommender(&self) -> &Arc<Recommender> {
        &self.recommender
    }

    pub fn get(&self, guild_id: GuildId) -> Option<SharedQueue> {
        self.queues.get(&guild_id).map(|q| q.clone())
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Devuelve la cola del guild o la crea con `connect`.
    ///
    /// La creación va serializada: dos comandos simultáneos no entran dos
    /// veces al canal de voz.
    pub async fn get_or_create<F, Fut>(
        &self,
        guild_id: GuildId,
        connect: F,
    ) -> Result<SharedQueue, QueueError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Connection, VoiceError>>,
    {
        if let Some(queue) = self.get(guild_id) {
            return Ok(queue);
        }

        let _guard = self.creating.lock().await;
        if let Some(queue) = self.get(guild_id) {
            return Ok(queue);
        }

        let (stream, stream_events) = connect().await?;
        Ok(self.insert(guild_id, stream, stream_events))
    }

    fn insert(
        &self,
        guild_id: GuildId,
        stream: Arc<dyn VoiceStream>,
        stream_events: mpsc::UnboundedReceiver<StreamEvent>,
    ) -> SharedQueue {
        let queue = Arc::new(Mutex::new(Queue::new(
            guild_id,
            stream,
            self.recommender.clone(),
            self.events.clone(),
            self.settings,
        )));
        self.queues.insert(guild_id, queue.clone());
        self.spawn_pump(guild_id, queue.clone(), stream_events);

        info!("🆕 Cola creada para guild {}", guild_id);
        queue
    }

    fn spawn_pump(
        &self,
        guild_id: GuildId,
        queue: SharedQueue,
        mut stream_events: mpsc::UnboundedReceiver<StreamEvent>,
    ) {
        let queues = self.queues.clone();

        tokio::spawn(async move {
            while let Some(event) = stream_events.recv().await {
                let mut locked = queue.lock().await;
                locked.handle_stream_event(event).await;
                if locked.is_destroyed() {
                    break;
                }
            }

            // Solo quitar la entrada si sigue siendo esta cola
            queues.remove_if(&guild_id, |_, current| Arc::ptr_eq(current, &queue));
            debug!("Bomba de eventos terminada para guild {}", guild_id);
        });
    }

    /// Destruye la cola del guild y la quita del registro
    pub async fn destroy(&self, guild_id: GuildId) -> bool {
        let Some((_, queue)) = self.queues.remove(&guild_id) else {
            return false;
        };
        queue.lock().await.destroy().await;
        true
    }

    /// Destruye todas las colas (apagado)
    pub async fn destroy_all(&self) {
        let guilds: Vec<GuildId> = self.queues.iter().map(|entry| *entry.key()).collect();
        for guild_id in guilds {
            self.destroy(guild_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        media::{ArtistRef, Streamable, StreamableSource},
        sources::MockMetadataProvider,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use serenity::model::id::UserId;
    use std::time::Duration;

    #[derive(Default)]
    struct SilentStream {
        played: SyncMutex<Vec<String>>,
        disconnected: SyncMutex<bool>,
    }

    #[async_trait]
    impl VoiceStream for SilentStream {
        async fn play_streamable(&self, streamable: &Streamable) -> Result<(), VoiceError> {
            self.played.lock().push(streamable.id.clone());
            Ok(())
        }
        async fn pause(&self) -> bool {
            true
        }
        async fn unpause(&self) -> bool {
            true
        }
        async fn stop(&self) {}
        async fn disconnect(&self) {
            *self.disconnected.lock() = true;
        }
        fn elapsed(&self) -> Option<Duration> {
            None
        }
        fn current_duration_ms(&self) -> u64 {
            0
        }
        fn volume(&self) -> f32 {
            -1.0
        }
        async fn set_volume(&self, _volume: f32) -> bool {
            false
        }
        async fn listeners(&self) -> Vec<UserId> {
            Vec::new()
        }
    }

    fn manager() -> QueueManager {
        let recommender = Arc::new(Recommender::new(
            Arc::new(MockMetadataProvider::new()),
            None,
            0.9,
            100,
        ));
        QueueManager::new(recommender, EventBus::default(), QueueSettings::default())
    }

    fn track(id: &str) -> crate::media::Playable {
        Streamable::new(
            StreamableSource::YouTube,
            id,
            id,
            ArtistRef::new("c", "Channel"),
            format!("https://youtu.be/{id}"),
            Duration::from_secs(60),
        )
        .to_playable()
    }

    #[tokio::test]
    async fn creates_once_and_pumps_stream_events() {
        let manager = manager();
        let guild = GuildId::new(7);
        let stream = Arc::new(SilentStream::default());
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = stream.clone();
        let queue = manager
            .get_or_create(guild, || async move { Ok((handle as Arc<dyn VoiceStream>, rx)) })
            .await
            .unwrap();

        let again = manager
            .get_or_create(guild, || async { Err(VoiceError::Timeout) })
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&queue, &again));

        queue
            .lock()
            .await
            .play(vec![track("a"), track("b")], UserId::new(1), None)
            .await
            .unwrap();

        tx.send(StreamEvent::End).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*stream.played.lock(), vec!["a", "b"]);

        tx.send(StreamEvent::Disconnect).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(manager.get(guild).is_none());
        assert!(*stream.disconnected.lock());
    }

    #[tokio::test]
    async fn failed_connection_registers_nothing() {
        let manager = manager();
        let err = manager
            .get_or_create(GuildId::new(1), || async { Err(VoiceError::Timeout) })
            .await
            .err();
        assert!(matches!(err, Some(QueueError::Voice(VoiceError::Timeout))));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn destroy_removes_the_queue() {
        let manager = manager();
        let guild = GuildId::new(3);
        let (_tx, rx) = mpsc::unbounded_channel();
        let stream: Arc<dyn VoiceStream> = Arc::new(SilentStream::default());
        manager
            .get_or_create(guild, || async move { Ok((stream, rx)) })
            .await
            .unwrap();

        assert!(manager.destroy(guild).await);
        assert!(!manager.destroy(guild).await);
        assert_eq!(manager.len(), 0);
    }
}
