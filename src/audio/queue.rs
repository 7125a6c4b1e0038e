use rand::{seq::SliceRandom, Rng};
use serde_json::Value;
use serenity::model::id::{GuildId, UserId};
use std::{collections::HashSet, sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        events::{EventBus, QueueEvent},
        voice_stream::{StreamEvent, VoiceStream},
    },
    config::Config,
    error::{QueueError, VoiceError},
    media::{Playable, Streamable},
    recommendation::{Recommender, Seed},
    storage::InteractionType,
};

#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    /// Streamables pendientes por debajo de los cuales el autoplay rellena
    pub low_water: usize,
    /// Recomendaciones pedidas por cada relleno
    pub batch: usize,
}

impl QueueSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            low_water: config.autoplay_low_water,
            batch: config.autoplay_batch,
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self { low_water: 3, batch: 3 }
    }
}

/// Estado del autoplay de una cola
#[derive(Debug, Clone)]
pub struct AutoplayState {
    pub seed: Seed,
    pub requester: UserId,
    pub data: Option<Value>,
    /// `(track_id, delta)` de las valoraciones hechas con el autoplay activo
    pub ratings: Vec<(String, i64)>,
}

/// Cola de reproducción de un guild.
///
/// `playables[0]` es siempre el playable que alimenta el stream de voz. Los
/// playables agotados pasan a `history` y no vuelven a sonar. Todo método que
/// muta pide acceso exclusivo (`&mut self`); el
/// [`QueueManager`](super::manager::QueueManager) guarda cada cola tras un
/// mutex para aplicar eventos del stream y comandos de a uno.
pub struct Queue {
    guild_id: GuildId,
    playables: Vec<Playable>,
    history: Vec<Playable>,
    now_playing: Option<Streamable>,
    playing: bool,
    paused: bool,
    destroyed: bool,
    autoplay: Option<AutoplayState>,

    stream: Arc<dyn VoiceStream>,
    recommender: Arc<Recommender>,
    events: EventBus,
    settings: QueueSettings,
}

impl Queue {
    pub fn new(
        guild_id: GuildId,
        stream: Arc<dyn VoiceStream>,
        recommender: Arc<Recommender>,
        events: EventBus,
        settings: QueueSettings,
    ) -> Self {
        Self {
            guild_id,
            playables: Vec::new(),
            history: Vec::new(),
            now_playing: None,
            playing: false,
            paused: false,
            destroyed: false,
            autoplay: None,
            stream,
            recommender,
            events,
            settings,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn playables(&self) -> &[Playable] {
        &self.playables
    }

    pub fn history(&self) -> &[Playable] {
        &self.history
    }

    pub fn now_playing(&self) -> Option<&Streamable> {
        self.now_playing.as_ref()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn autoplay(&self) -> Option<&AutoplayState> {
        self.autoplay.as_ref()
    }

    pub fn stream(&self) -> &Arc<dyn VoiceStream> {
        &self.stream
    }

    /// Streamables pendientes que todavía no empezaron
    pub fn remaining_streamables(&self) -> usize {
        self.playables.iter().map(|p| p.remaining().len()).sum()
    }

    fn emit(&self, event: QueueEvent) {
        self.events.publish(self.guild_id, event);
    }

    fn ensure_alive(&self) -> Result<(), QueueError> {
        if self.destroyed {
            error!("❌ Operación sobre una cola destruida en guild {}", self.guild_id);
            return Err(QueueError::Destroyed);
        }
        Ok(())
    }

    fn seen_track_ids(&self) -> HashSet<String> {
        self.history
            .iter()
            .chain(self.playables.iter())
            .flat_map(|p| p.track_ids())
            .map(str::to_string)
            .collect()
    }

    /// Semilla formada por lo pendiente y luego el historial, lo más reciente primero
    fn queue_seed(&self) -> Option<Seed> {
        let streamables: Vec<Streamable> = self
            .playables
            .iter()
            .chain(self.history.iter().rev())
            .flat_map(|p| p.streamables.iter().cloned())
            .collect();
        (!streamables.is_empty()).then_some(Seed::Queue(streamables))
    }

    async fn record_play(&self, requester: UserId, playables: &[Playable]) {
        let Some(database) = self.recommender.database() else {
            return;
        };
        let streamables: Vec<Streamable> = playables
            .iter()
            .flat_map(|p| p.streamables.iter().cloned())
            .collect();
        if let Err(e) = database
            .record_interaction(requester, InteractionType::Play, &streamables)
            .await
        {
            warn!("⚠️ No se pudo registrar la reproducción de {}: {:?}", requester, e);
        }
    }

    /// Encola playables atribuidos a `requester`.
    ///
    /// Solo arranca la reproducción si la cola estaba vacía antes de la llamada.
    pub async fn play(
        &mut self,
        playables: Vec<Playable>,
        requester: UserId,
        data: Option<Value>,
    ) -> Result<Vec<Playable>, QueueError> {
        self.ensure_alive()?;

        if self.paused {
            self.unpause().await?;
        }

        let was_empty = self.playables.is_empty();
        let added: Vec<Playable> = playables
            .into_iter()
            .map(|p| p.attribute(requester, data.clone()))
            .collect();

        info!(
            "➕ {} elemento(s) agregados a la cola de guild {}",
            added.len(),
            self.guild_id
        );
        self.playables.extend(added.iter().cloned());
        self.record_play(requester, &added).await;
        self.emit(QueueEvent::PlayableAdd {
            playables: added.clone(),
        });

        if was_empty {
            self.play_next().await;
        }

        Ok(added)
    }

    /// Avanza al siguiente streamable.
    ///
    /// Los playables agotados pasan al historial de a uno hasta que alguno
    /// entregue un streamable. Con autoplay activo se rellena como mucho una
    /// vez por llamada si quedan menos de `low_water` streamables.
    pub async fn play_next(&mut self) {
        if self.destroyed {
            error!("❌ play_next sobre una cola destruida en guild {}", self.guild_id);
            return;
        }

        let mut backfilled = false;
        loop {
            if !backfilled
                && self.autoplay.is_some()
                && self.remaining_streamables() < self.settings.low_water
            {
                backfilled = true;
                self.backfill().await;
            }

            let Some(head) = self.playables.first_mut() else {
                self.playing = false;
                self.now_playing = None;
                info!("⏹️ Cola vacía en guild {}", self.guild_id);
                self.emit(QueueEvent::QueueEnd);
                return;
            };

            let Some(next) = head.advance().cloned() else {
                let finished = self.playables.remove(0);
                debug!("✅ Playable terminado: {}", finished);
                self.emit(QueueEvent::PlayableEnd {
                    playable: finished.clone(),
                });
                self.history.push(finished);
                continue;
            };

            if !self.playing {
                self.playing = true;
                self.emit(QueueEvent::QueueStart);
            }

            match self.stream.play_streamable(&next).await {
                Ok(()) => {
                    info!("🎵 Reproduciendo {} en guild {}", next, self.guild_id);
                    self.now_playing = Some(next.clone());
                    self.emit(QueueEvent::StreamableStart { streamable: next });
                    return;
                }
                Err(VoiceError::Gone) => {
                    warn!("🔌 El stream de voz ya no existe en guild {}", self.guild_id);
                    self.playing = false;
                    self.now_playing = None;
                    return;
                }
                Err(e) => {
                    error!("❌ No se pudo reproducir {}: {}", next, e);
                    self.emit(QueueEvent::Error {
                        message: format!("No se pudo reproducir {}: {}", next, e),
                    });
                }
            }
        }
    }

    /// Rellena la cola con recomendaciones que no estén en ella ni en el historial
    async fn backfill(&mut self) {
        let Some(autoplay) = &self.autoplay else {
            return;
        };
        let requester = autoplay.requester;
        let data = autoplay.data.clone();
        let seed = self.queue_seed().unwrap_or_else(|| autoplay.seed.clone());

        let listeners = self.stream.listeners().await;
        let seen = self.seen_track_ids();

        match self
            .recommender
            .backfill(&seed, &listeners, self.settings.batch, &seen)
            .await
        {
            Ok(found) => {
                let added: Vec<Playable> = found
                    .into_iter()
                    .map(|p| p.attribute(requester, data.clone()))
                    .collect();
                info!(
                    "🎯 Autoplay agregó {} recomendación(es) en guild {}",
                    added.len(),
                    self.guild_id
                );
                self.playables.extend(added.iter().cloned());
                self.emit(QueueEvent::PlayableAdd { playables: added });
            }
            Err(e) if e.is_user_facing() => {
                warn!("🎯 Autoplay sin recomendaciones en guild {}: {}", self.guild_id, e);
                self.emit(QueueEvent::Error {
                    message: e.to_string(),
                });
            }
            Err(e) => {
                error!("❌ Error del autoplay en guild {}: {:?}", self.guild_id, e);
                self.emit(QueueEvent::Error {
                    message: "Error al obtener recomendaciones".to_string(),
                });
            }
        }
    }

    /// Aplica un evento del stream de voz. Un `End` produce exactamente un avance.
    pub async fn handle_stream_event(&mut self, event: StreamEvent) {
        if self.destroyed {
            debug!("Evento {:?} ignorado, cola destruida en guild {}", event, self.guild_id);
            return;
        }

        match event {
            StreamEvent::Start => debug!("▶️ Stream iniciado en guild {}", self.guild_id),
            StreamEvent::End => {
                if let Some(streamable) = self.now_playing.take() {
                    self.emit(QueueEvent::StreamableEnd { streamable });
                }
                self.play_next().await;
            }
            StreamEvent::Error(message) => {
                if let Some(streamable) = self.now_playing.take() {
                    self.emit(QueueEvent::StreamableEnd { streamable });
                }
                self.emit(QueueEvent::Error { message });
                self.play_next().await;
            }
            StreamEvent::Disconnect => {
                info!("🔌 Stream desconectado, destruyendo cola de guild {}", self.guild_id);
                self.destroy().await;
            }
        }
    }

    pub async fn pause(&mut self) -> Result<bool, QueueError> {
        self.ensure_alive()?;
        if !self.playing || self.paused {
            return Ok(false);
        }

        self.stream.pause().await;
        self.paused = true;
        info!("⏸️ Reproducción pausada en guild {}", self.guild_id);
        self.emit(QueueEvent::QueuePause);
        Ok(true)
    }

    pub async fn unpause(&mut self) -> Result<bool, QueueError> {
        self.ensure_alive()?;
        if !self.paused {
            return Ok(false);
        }

        self.stream.unpause().await;
        self.paused = false;
        info!("▶️ Reproducción reanudada en guild {}", self.guild_id);
        self.emit(QueueEvent::QueueUnpause);
        Ok(true)
    }

    /// Termina el streamable actual; el avance llega con el `End` del stream
    pub async fn skip(&mut self) -> Result<bool, QueueError> {
        self.ensure_alive()?;
        if self.now_playing.is_none() {
            return Ok(false);
        }

        self.paused = false;
        self.stream.stop().await;
        info!("⏭️ Skip en guild {}", self.guild_id);
        Ok(true)
    }

    /// Vacía la cola (incluido el actual) y apaga el autoplay
    pub async fn stop(&mut self) -> Result<(), QueueError> {
        self.ensure_alive()?;

        self.stop_autoplay();
        for playable in std::mem::take(&mut self.playables) {
            self.emit(QueueEvent::PlayableRemoved {
                playable: playable.clone(),
            });
            self.history.push(playable);
        }

        if self.now_playing.is_some() {
            self.paused = false;
            self.stream.stop().await;
        } else if self.playing {
            self.playing = false;
            self.emit(QueueEvent::QueueEnd);
        }

        info!("⏹️ Cola detenida en guild {}", self.guild_id);
        Ok(())
    }

    /// Quita todo lo pendiente menos el playable actual
    pub fn clear(&mut self) -> Result<usize, QueueError> {
        self.ensure_alive()?;
        if self.playables.len() <= 1 {
            return Ok(0);
        }

        let removed: Vec<Playable> = self.playables.drain(1..).collect();
        let count = removed.len();
        for playable in removed {
            self.emit(QueueEvent::PlayableRemoved {
                playable: playable.clone(),
            });
            self.history.push(playable);
        }

        info!("🗑️ {} elemento(s) quitados de la cola de guild {}", count, self.guild_id);
        Ok(count)
    }

    pub fn shuffle(&mut self) -> Result<(), QueueError> {
        self.shuffle_with(&mut rand::thread_rng())
    }

    /// Mezcla lo pendiente sin mover `playables[0]`, y dentro de cada playable
    /// solo los streamables que aún no sonaron
    pub fn shuffle_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(), QueueError> {
        self.ensure_alive()?;

        if self.playables.len() > 2 {
            self.playables[1..].shuffle(rng);
        }
        for playable in &mut self.playables {
            playable.shuffle_remaining(rng);
        }

        info!("🔀 Cola mezclada en guild {}", self.guild_id);
        Ok(())
    }

    /// Quita el playable en `index` y lo pasa al historial.
    ///
    /// El índice 0 es el playable que está sonando; quien no deba tocarlo lo
    /// rechaza antes de llamar.
    pub fn remove_playable_at(&mut self, index: usize) -> Result<Playable, QueueError> {
        self.ensure_alive()?;
        if index >= self.playables.len() {
            return Err(QueueError::IndexOutOfRange {
                index,
                len: self.playables.len(),
            });
        }

        let playable = self.playables.remove(index);
        info!("➖ Quitado de la cola: {}", playable);
        self.emit(QueueEvent::PlayableRemoved {
            playable: playable.clone(),
        });
        self.history.push(playable.clone());
        Ok(playable)
    }

    /// Activa el autoplay con un primer lote de recomendaciones.
    ///
    /// Si la semilla no da recomendaciones la cola queda igual.
    pub async fn start_autoplay(
        &mut self,
        seed: Seed,
        requester: UserId,
        data: Option<Value>,
    ) -> Result<Vec<Playable>, QueueError> {
        self.ensure_alive()?;

        let listeners = self.stream.listeners().await;
        let seen = self.seen_track_ids();
        let found = self
            .recommender
            .backfill(&seed, &listeners, self.settings.batch, &seen)
            .await?;
        if found.is_empty() {
            return Err(QueueError::NothingRecommended);
        }

        info!("🎯 Autoplay activado en guild {} ({})", self.guild_id, seed.kind());
        self.autoplay = Some(AutoplayState {
            seed,
            requester,
            data: data.clone(),
            ratings: Vec::new(),
        });
        self.emit(QueueEvent::AutoplayStart { requester });

        let was_empty = self.playables.is_empty();
        let added: Vec<Playable> = found
            .into_iter()
            .map(|p| p.attribute(requester, data.clone()))
            .collect();
        self.playables.extend(added.iter().cloned());
        self.record_play(requester, &added).await;
        self.emit(QueueEvent::PlayableAdd {
            playables: added.clone(),
        });

        if was_empty {
            self.play_next().await;
        }

        Ok(added)
    }

    /// Apaga el autoplay; lo ya encolado se queda
    pub fn stop_autoplay(&mut self) -> bool {
        if self.autoplay.take().is_none() {
            return false;
        }
        info!("🎯 Autoplay desactivado en guild {}", self.guild_id);
        self.emit(QueueEvent::AutoplayEnd);
        true
    }

    /// Registra una valoración sobre el track actual
    pub async fn rate_current(
        &mut self,
        user: UserId,
        interaction: InteractionType,
    ) -> Result<Option<Streamable>, QueueError> {
        self.ensure_alive()?;
        let Some(current) = self.now_playing.clone() else {
            return Ok(None);
        };

        if let Some(database) = self.recommender.database() {
            if let Err(e) = database
                .record_interaction(user, interaction, std::slice::from_ref(&current))
                .await
            {
                warn!("⚠️ No se pudo registrar la valoración de {}: {:?}", user, e);
            }
        }

        if let Some(autoplay) = &mut self.autoplay {
            autoplay
                .ratings
                .push((current.id.clone(), interaction.rating_delta()));
        }

        debug!("⭐ {} valoró {} como {:?}", user, current, interaction);
        Ok(Some(current))
    }

    /// Estado terminal: corta el stream y descarta lo pendiente
    pub async fn destroy(&mut self) {
        if self.destroyed {
            return;
        }

        self.stop_autoplay();
        self.destroyed = true;
        self.playing = false;
        self.paused = false;
        self.now_playing = None;
        self.history.append(&mut self.playables);

        self.stream.disconnect().await;
        info!("💥 Cola destruida en guild {}", self.guild_id);
        self.emit(QueueEvent::QueueDestroy);
    }

    pub fn info(&self) -> QueueInfo {
        let total_duration = self
            .playables
            .iter()
            .flat_map(|p| p.remaining().iter())
            .map(|s| s.duration)
            .sum();

        QueueInfo {
            now_playing: self.now_playing.clone(),
            playables: self.playables.clone(),
            total_duration,
            autoplay: self.autoplay.is_some(),
            paused: self.paused,
        }
    }
}

/// Foto de la cola para mostrar
#[derive(Debug, Clone)]
pub struct QueueInfo {
    pub now_playing: Option<Streamable>,
    pub playables: Vec<Playable>,
    pub total_duration: Duration,
    pub autoplay: bool,
    pub paused: bool,
}

impl QueueInfo {
    /// Obtiene una página de la cola, empezando en 1
    pub fn page(&self, page: usize, per_page: usize) -> QueuePage<'_> {
        let per_page = per_page.max(1);
        let total_pages = self.playables.len().div_ceil(per_page).max(1);
        let current_page = page.clamp(1, total_pages);
        let start = (current_page - 1) * per_page;
        let end = (start + per_page).min(self.playables.len());

        QueuePage {
            items: self.playables.get(start..end).unwrap_or_default(),
            first_index: start,
            current_page,
            total_pages,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuePage<'a> {
    pub items: &'a [Playable],
    pub first_index: usize,
    pub current_page: usize,
    pub total_pages: usize,
}
