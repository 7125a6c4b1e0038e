//! # Bot Module
//!
//! Discord front-end of Ein Music.
//!
//! This module contains:
//! - Slash command registration ([`commands`])
//! - Command handling on top of the per-guild queues ([`handlers`])
//! - Announcement of queue events in the text channel that started playback ([`events`])
//!
//! ## Architecture
//!
//! [`MusicBot`] implements Serenity's [`EventHandler`]. It owns the
//! [`QueueManager`], the metadata provider used by `/play` and `/autoplay`,
//! and the optional music database. Voice connections live inside each queue's
//! [`VoiceStream`](crate::audio::VoiceStream).

use anyhow::Result;
use dashmap::DashMap;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{error, info, warn};

pub mod commands;
pub mod events;
pub mod handlers;

use crate::{
    audio::QueueManager,
    config::Config,
    sources::{MetadataProvider, YouTubeResolver},
    storage::{JsonDatabase, MusicDatabase},
};

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);

/// Handler principal del bot
pub struct MusicBot {
    config: Arc<Config>,
    pub queues: Arc<QueueManager>,
    pub provider: Arc<dyn MetadataProvider>,
    pub database: Option<Arc<dyn MusicDatabase>>,
    pub resolver: Arc<YouTubeResolver>,
    /// Canal de texto donde se anuncian los eventos de cada guild
    pub announce_channels: Arc<DashMap<GuildId, ChannelId>>,
    /// Solo para estadísticas en mantenimiento
    library: Option<Arc<JsonDatabase>>,
    started: AtomicBool,
}

impl MusicBot {
    pub fn new(
        config: Arc<Config>,
        queues: Arc<QueueManager>,
        provider: Arc<dyn MetadataProvider>,
        library: Option<Arc<JsonDatabase>>,
        resolver: Arc<YouTubeResolver>,
    ) -> Self {
        Self {
            config,
            queues,
            provider,
            database: library.clone().map(|db| db as Arc<dyn MusicDatabase>),
            resolver,
            announce_channels: Arc::new(DashMap::new()),
            library,
            started: AtomicBool::new(false),
        }
    }

    /// Registra los comandos slash, por guild en desarrollo o globales
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id).await.map_err(|e| {
                    error!("❌ Error registrando comandos de guild: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica el permiso 'applications.commands'.")
                })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica el permiso 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }

        // `ready` se repite en cada reconexión del gateway
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        events::spawn_announcer(
            ctx.http.clone(),
            self.queues.events().subscribe(),
            self.announce_channels.clone(),
        );

        let resolver = self.resolver.clone();
        let library = self.library.clone();
        tokio::spawn(async move {
            maintenance_tasks(resolver, library).await;
        });
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        // Detectar si el bot fue desconectado
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || new.channel_id.is_some() || old.is_none() {
            return;
        }

        if let Some(guild_id) = new.guild_id {
            info!("🔌 Bot desconectado en guild {}", guild_id);
            self.queues.destroy(guild_id).await;
        }
    }
}

/// Limpieza periódica del caché de resolución y estadísticas de la biblioteca
async fn maintenance_tasks(resolver: Arc<YouTubeResolver>, library: Option<Arc<JsonDatabase>>) {
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
    // El primer tick es inmediato
    interval.tick().await;

    loop {
        interval.tick().await;

        resolver.cache().cleanup_old_entries();

        if let Some(library) = &library {
            info!("{}", library.stats().await);
        }

        info!("🧹 Tareas de mantenimiento completadas");
    }
}
