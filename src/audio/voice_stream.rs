//! Voice Stream Adapter.
//!
//! [`VoiceStream`] is what the queue drives: transport controls plus a few read
//! accessors. [`SongbirdVoiceStream`] implements it on top of a songbird
//! `Call` and reports track lifecycle as [`StreamEvent`]s on an mpsc channel.
//!
//! Only events of the track that is currently loaded are forwarded, so a track
//! that gets replaced never produces a stray `End`. While paused, `End` is
//! suppressed.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::{
    cache::Cache,
    model::id::{ChannelId, GuildId, UserId},
};
use songbird::{
    events::context_data::DisconnectReason, model::CloseCode, tracks::TrackHandle, Call,
    CoreEvent, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc, LazyLock, Weak,
    },
    time::{Duration, Instant},
};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};

use crate::{config::Config, error::VoiceError, media::Streamable, sources::YouTubeResolver};

/// Exponente entre el volumen logarítmico y la ganancia lineal
const VOLUME_LOG_EXPONENT: f32 = 1.660964;

/// Espera tras un cierre 4014 antes de intentar volver a entrar
const CLOSE_REENTRY_WAIT: Duration = Duration::from_secs(5);

/// Stream dueño de la conexión de voz de cada guild
static VOICE_OWNERS: LazyLock<ConnectionOwners> = LazyLock::new(ConnectionOwners::default);

/// Generaciones de conexión por guild; songbird reutiliza el mismo `Call`
/// cuando un stream nuevo entra al guild, así que solo la última generación
/// puede cerrarlo.
#[derive(Default)]
struct ConnectionOwners {
    next: AtomicU64,
    owners: DashMap<GuildId, u64>,
}

impl ConnectionOwners {
    fn claim(&self, guild_id: GuildId) -> u64 {
        let generation = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        self.owners.insert(guild_id, generation);
        generation
    }

    fn is_owner(&self, guild_id: GuildId, generation: u64) -> bool {
        self.owners
            .get(&guild_id)
            .is_some_and(|owner| *owner == generation)
    }

    /// `false` si otro stream ya tomó el guild
    fn release(&self, guild_id: GuildId, generation: u64) -> bool {
        self.owners
            .remove_if(&guild_id, |_, owner| *owner == generation)
            .is_some()
    }
}

/// `true` si el `Call` registrado en el manager es el nuestro
fn is_same_call<T>(registered: Option<Arc<T>>, mine: &Arc<T>) -> bool {
    registered.is_some_and(|call| Arc::ptr_eq(&call, mine))
}

/// Eventos de ciclo de vida del stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Start,
    End,
    Disconnect,
    Error(String),
}

/// Controles de transporte que usa la cola
#[async_trait]
pub trait VoiceStream: Send + Sync {
    /// Resuelve el audio del streamable y reemplaza el recurso actual
    async fn play_streamable(&self, streamable: &Streamable) -> Result<(), VoiceError>;

    /// `false` si no había nada cargado
    async fn pause(&self) -> bool;

    async fn unpause(&self) -> bool;

    /// Termina el recurso actual; el `End` resultante avanza la cola
    async fn stop(&self);

    /// Idempotente
    async fn disconnect(&self);

    fn elapsed(&self) -> Option<Duration>;

    fn current_duration_ms(&self) -> u64;

    /// Volumen logarítmico, -1 si no hay recurso
    fn volume(&self) -> f32;

    async fn set_volume(&self, volume: f32) -> bool;

    /// Miembros del canal de voz, sin contar al bot
    async fn listeners(&self) -> Vec<UserId>;
}

pub fn log_to_linear(volume: f32) -> f32 {
    volume.max(0.0).powf(VOLUME_LOG_EXPONENT)
}

pub fn linear_to_log(gain: f32) -> f32 {
    gain.max(0.0).powf(1.0 / VOLUME_LOG_EXPONENT)
}

/// Errores que ocurren normalmente al cortar un stream entre tracks
pub fn is_benign_error(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("premature") || message.contains("broken pipe")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Wait(Duration),
    GiveUp,
}

/// Política de reconexión tras una caída del driver de voz
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub step: Duration,
}

impl ReconnectPolicy {
    /// `attempt` empieza en 0.
    ///
    /// Un cierre 4014 significa que movieron o expulsaron al bot: una sola
    /// espera corta antes de volver a entrar. Cualquier otro cierre espera
    /// `(attempt + 1) * step` hasta llegar a `max_attempts`.
    pub fn decide(&self, attempt: u32, closed_by_discord: bool) -> ReconnectDecision {
        if closed_by_discord {
            return if attempt == 0 {
                ReconnectDecision::Wait(CLOSE_REENTRY_WAIT)
            } else {
                ReconnectDecision::GiveUp
            };
        }
        if attempt >= self.max_attempts {
            return ReconnectDecision::GiveUp;
        }
        ReconnectDecision::Wait(self.step * (attempt + 1))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    pub ready_timeout: Duration,
    pub default_volume: f32,
    pub reconnect: ReconnectPolicy,
}

impl StreamOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ready_timeout: config.voice_ready_timeout,
            default_volume: config.default_volume,
            reconnect: ReconnectPolicy {
                max_attempts: config.voice_reconnect_attempts,
                step: config.voice_reconnect_step,
            },
        }
    }
}

struct ActiveTrack {
    handle: TrackHandle,
    started: Instant,
    duration: Duration,
    announced: bool,
}

struct StreamInner {
    guild_id: GuildId,
    channel_id: ChannelId,
    bot_id: UserId,
    manager: Arc<Songbird>,
    call: Arc<AsyncMutex<Call>>,
    generation: u64,
    cache: Arc<Cache>,
    resolver: Arc<YouTubeResolver>,
    events: mpsc::UnboundedSender<StreamEvent>,
    options: StreamOptions,

    current: Mutex<Option<ActiveTrack>>,
    volume: Mutex<f32>,
    paused: AtomicBool,
    destroyed: AtomicBool,
    recovering: AtomicBool,
    attempts: AtomicU32,
}

impl StreamInner {
    fn emit(&self, event: StreamEvent) {
        if self.events.send(event).is_err() {
            debug!("Nadie escucha eventos de voz en guild {}", self.guild_id);
        }
    }

    fn is_current(&self, handle: &TrackHandle) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|active| active.handle.uuid() == handle.uuid())
    }

    async fn shutdown(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(active) = self.current.lock().take() {
            let _ = active.handle.stop();
        }

        let owner = VOICE_OWNERS.release(self.guild_id, self.generation);
        if owner && is_same_call(self.manager.get(self.guild_id), &self.call) {
            self.call.lock().await.stop();
            // La conexión puede haber desaparecido ya
            if let Err(e) = self.manager.remove(self.guild_id).await {
                debug!("Conexión de voz ya cerrada en guild {}: {:?}", self.guild_id, e);
            }
        } else {
            debug!(
                "🔁 La conexión de guild {} pertenece a otro stream, se deja abierta",
                self.guild_id
            );
        }

        info!("👋 Stream de voz cerrado en guild {}", self.guild_id);
        self.emit(StreamEvent::Disconnect);
    }

    async fn recover(self: Arc<Self>, closed_by_discord: bool) {
        loop {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            match self.options.reconnect.decide(attempt, closed_by_discord) {
                ReconnectDecision::GiveUp => {
                    warn!(
                        "🔌 Sin reconexión tras {} intentos en guild {}",
                        attempt, self.guild_id
                    );
                    self.shutdown().await;
                    break;
                }
                ReconnectDecision::Wait(delay) => {
                    info!(
                        "🔄 Reintento {} de conexión en guild {} en {:?}",
                        attempt + 1,
                        self.guild_id,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }

            if self.destroyed.load(Ordering::SeqCst)
                || !VOICE_OWNERS.is_owner(self.guild_id, self.generation)
            {
                break;
            }

            let rejoin = tokio::time::timeout(
                self.options.ready_timeout,
                self.manager.join(self.guild_id, self.channel_id),
            )
            .await;

            match rejoin {
                Ok(Ok(_)) => {
                    info!("✅ Reconectado al canal de voz en guild {}", self.guild_id);
                    self.attempts.store(0, Ordering::SeqCst);
                    break;
                }
                Ok(Err(e)) => warn!("Reconexión fallida en guild {}: {:?}", self.guild_id, e),
                Err(_) => warn!("Reconexión sin respuesta en guild {}", self.guild_id),
            }
        }

        self.recovering.store(false, Ordering::SeqCst);
    }
}

/// Stream de voz respaldado por songbird
pub struct SongbirdVoiceStream {
    inner: Arc<StreamInner>,
}

impl SongbirdVoiceStream {
    /// Se une al canal y espera a que la conexión esté lista.
    ///
    /// Si vence el timeout o falla, se quita la conexión a medio abrir antes
    /// de devolver el error.
    pub async fn connect(
        manager: Arc<Songbird>,
        cache: Arc<Cache>,
        resolver: Arc<YouTubeResolver>,
        guild_id: GuildId,
        channel_id: ChannelId,
        options: StreamOptions,
    ) -> Result<(Self, mpsc::UnboundedReceiver<StreamEvent>), VoiceError> {
        info!("🔊 Conectando a canal {} en guild {}", channel_id, guild_id);

        let joined = tokio::time::timeout(options.ready_timeout, manager.join(guild_id, channel_id)).await;
        let call = match joined {
            Ok(Ok(call)) => call,
            Ok(Err(e)) => {
                error!("❌ Error al unirse al canal de voz en guild {}: {:?}", guild_id, e);
                let _ = manager.remove(guild_id).await;
                return Err(VoiceError::Join(e.to_string()));
            }
            Err(_) => {
                error!("⏰ La conexión de voz no estuvo lista a tiempo en guild {}", guild_id);
                let _ = manager.remove(guild_id).await;
                return Err(VoiceError::Timeout);
            }
        };

        let bot_id = cache.current_user().id;
        let (events, receiver) = mpsc::unbounded_channel();
        let inner = Arc::new(StreamInner {
            guild_id,
            channel_id,
            bot_id,
            manager,
            call: call.clone(),
            generation: VOICE_OWNERS.claim(guild_id),
            cache,
            resolver,
            events,
            options,
            current: Mutex::new(None),
            volume: Mutex::new(options.default_volume),
            paused: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            recovering: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
        });

        {
            let mut call = call.lock().await;
            let weak = Arc::downgrade(&inner);
            call.remove_all_global_events();
            for kind in [TrackEvent::Play, TrackEvent::End, TrackEvent::Error] {
                call.add_global_event(
                    Event::Track(kind),
                    TrackEventForwarder {
                        inner: weak.clone(),
                        kind,
                    },
                );
            }
            call.add_global_event(
                Event::Core(CoreEvent::DriverDisconnect),
                DisconnectWatcher { inner: weak },
            );
        }

        info!("✅ Conectado al canal de voz en guild {}", guild_id);
        Ok((Self { inner }, receiver))
    }
}

#[async_trait]
impl VoiceStream for SongbirdVoiceStream {
    async fn play_streamable(&self, streamable: &Streamable) -> Result<(), VoiceError> {
        let inner = &self.inner;
        if inner.destroyed.load(Ordering::SeqCst) {
            return Err(VoiceError::Gone);
        }

        let url = inner
            .resolver
            .resolve(streamable)
            .await
            .map_err(VoiceError::Resolve)?;
        let input = inner.resolver.create_input(&url);

        // Soltar el track anterior antes de reemplazarlo para ignorar su End
        if let Some(previous) = inner.current.lock().take() {
            let _ = previous.handle.stop();
        }

        let handle = inner.call.lock().await.play_only_input(input);
        let _ = handle.set_volume(log_to_linear(*inner.volume.lock()));

        inner.paused.store(false, Ordering::SeqCst);
        *inner.current.lock() = Some(ActiveTrack {
            handle,
            started: Instant::now(),
            duration: streamable.duration,
            announced: false,
        });

        debug!("▶️ {} en guild {}", streamable, inner.guild_id);
        Ok(())
    }

    async fn pause(&self) -> bool {
        let current = self.inner.current.lock();
        let Some(active) = current.as_ref() else {
            return false;
        };
        self.inner.paused.store(true, Ordering::SeqCst);
        active.handle.pause().is_ok()
    }

    async fn unpause(&self) -> bool {
        let current = self.inner.current.lock();
        let Some(active) = current.as_ref() else {
            return false;
        };
        self.inner.paused.store(false, Ordering::SeqCst);
        active.handle.play().is_ok()
    }

    async fn stop(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        if let Some(active) = self.inner.current.lock().as_ref() {
            let _ = active.handle.stop();
        }
    }

    async fn disconnect(&self) {
        self.inner.shutdown().await;
    }

    fn elapsed(&self) -> Option<Duration> {
        self.inner.current.lock().as_ref().map(|active| active.started.elapsed())
    }

    fn current_duration_ms(&self) -> u64 {
        self.inner
            .current
            .lock()
            .as_ref()
            .map_or(0, |active| u64::try_from(active.duration.as_millis()).unwrap_or(u64::MAX))
    }

    fn volume(&self) -> f32 {
        if self.inner.current.lock().is_none() {
            return -1.0;
        }
        *self.inner.volume.lock()
    }

    async fn set_volume(&self, volume: f32) -> bool {
        *self.inner.volume.lock() = volume.max(0.0);
        match self.inner.current.lock().as_ref() {
            Some(active) => active.handle.set_volume(log_to_linear(volume)).is_ok(),
            None => false,
        }
    }

    async fn listeners(&self) -> Vec<UserId> {
        let inner = &self.inner;
        let Some(guild) = inner.cache.guild(inner.guild_id) else {
            return Vec::new();
        };
        guild
            .voice_states
            .values()
            .filter(|state| state.channel_id == Some(inner.channel_id))
            .map(|state| state.user_id)
            .filter(|user| *user != inner.bot_id)
            .collect()
    }
}

/// Reenvía eventos del track actual como `StreamEvent`
struct TrackEventForwarder {
    inner: Weak<StreamInner>,
    kind: TrackEvent,
}

#[async_trait]
impl VoiceEventHandler for TrackEventForwarder {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let EventContext::Track(tracks) = ctx else {
            return None;
        };
        let inner = self.inner.upgrade()?;

        for (state, handle) in tracks.iter() {
            if !inner.is_current(handle) {
                continue;
            }

            match self.kind {
                TrackEvent::Play => {
                    let first = inner
                        .current
                        .lock()
                        .as_mut()
                        .is_some_and(|active| !std::mem::replace(&mut active.announced, true));
                    if first {
                        inner.emit(StreamEvent::Start);
                    }
                }
                TrackEvent::End => {
                    if inner.paused.load(Ordering::SeqCst) {
                        debug!("End ignorado durante la pausa en guild {}", inner.guild_id);
                        continue;
                    }
                    inner.current.lock().take();
                    inner.emit(StreamEvent::End);
                }
                TrackEvent::Error => {
                    inner.current.lock().take();
                    let message = format!("{:?}", state.playing);
                    if is_benign_error(&message) {
                        debug!("Error benigno de stream en guild {}: {}", inner.guild_id, message);
                        inner.emit(StreamEvent::End);
                    } else {
                        error!("❌ Error en track para guild {}: {}", inner.guild_id, message);
                        inner.emit(StreamEvent::Error(message));
                    }
                }
                _ => {}
            }
        }

        None
    }
}

/// Maneja caídas del driver de voz
struct DisconnectWatcher {
    inner: Weak<StreamInner>,
}

#[async_trait]
impl VoiceEventHandler for DisconnectWatcher {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let EventContext::DriverDisconnect(data) = ctx else {
            return None;
        };
        let inner = self.inner.upgrade()?;
        if inner.destroyed.load(Ordering::SeqCst) {
            return None;
        }

        let closed_by_discord = matches!(
            data.reason,
            Some(DisconnectReason::WsClosed(Some(CloseCode::Disconnected)))
        );
        warn!(
            "🔌 Driver de voz desconectado en guild {} ({:?})",
            inner.guild_id, data.reason
        );

        if !inner.recovering.swap(true, Ordering::SeqCst) {
            tokio::spawn(inner.recover(closed_by_discord));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: 5,
            step: Duration::from_secs(5),
        }
    }

    #[test]
    fn backoff_grows_linearly_until_cap() {
        let policy = policy();
        assert_eq!(policy.decide(0, false), ReconnectDecision::Wait(Duration::from_secs(5)));
        assert_eq!(policy.decide(3, false), ReconnectDecision::Wait(Duration::from_secs(20)));
        assert_eq!(policy.decide(4, false), ReconnectDecision::Wait(Duration::from_secs(25)));
        assert_eq!(policy.decide(5, false), ReconnectDecision::GiveUp);
    }

    #[test]
    fn discord_close_gets_one_short_wait() {
        let policy = policy();
        assert_eq!(policy.decide(0, true), ReconnectDecision::Wait(CLOSE_REENTRY_WAIT));
        assert_eq!(policy.decide(1, true), ReconnectDecision::GiveUp);
    }

    #[test]
    fn volume_scale_round_trips() {
        for volume in [0.0_f32, 0.25, 0.5, 1.0, 1.5] {
            assert!((linear_to_log(log_to_linear(volume)) - volume).abs() < 1e-4);
        }
        assert_eq!(log_to_linear(-1.0), 0.0);
        assert!(log_to_linear(0.5) < 0.5);
    }

    #[test]
    fn premature_close_is_benign() {
        assert!(is_benign_error("Errored(Premature close)"));
        assert!(is_benign_error("Broken pipe (os error 32)"));
        assert!(!is_benign_error("Errored(Parse(Unsupported codec))"));
    }

    #[test]
    fn only_latest_stream_releases_the_guild() {
        let owners = ConnectionOwners::default();
        let guild = GuildId::new(7);

        let old = owners.claim(guild);
        let new = owners.claim(guild);
        assert!(!owners.is_owner(guild, old));

        // El stream viejo se cierra tarde: no debe soltar la conexión nueva
        assert!(!owners.release(guild, old));
        assert!(owners.is_owner(guild, new));

        assert!(owners.release(guild, new));
        assert!(!owners.release(guild, new));
        assert!(!owners.is_owner(guild, new));
    }

    #[test]
    fn guilds_are_owned_independently() {
        let owners = ConnectionOwners::default();
        let first = owners.claim(GuildId::new(1));
        let second = owners.claim(GuildId::new(2));

        assert!(owners.release(GuildId::new(1), first));
        assert!(owners.is_owner(GuildId::new(2), second));
    }

    #[test]
    fn foreign_call_is_not_ours() {
        let mine = Arc::new(AsyncMutex::new(0u8));
        let other = Arc::new(AsyncMutex::new(0u8));

        assert!(is_same_call(Some(mine.clone()), &mine));
        assert!(!is_same_call(Some(other), &mine));
        assert!(!is_same_call(None, &mine));
    }
}
