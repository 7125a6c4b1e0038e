use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::SerenityInit;
use std::sync::Arc;
use tracing::{error, info, warn};

mod audio;
mod bot;
mod cache;
mod config;
mod error;
mod media;
mod recommendation;
mod sources;
mod storage;

use crate::audio::{EventBus, QueueManager, QueueSettings};
use crate::bot::MusicBot;
use crate::cache::ResolveCache;
use crate::config::Config;
use crate::recommendation::Recommender;
use crate::sources::{MetadataProvider, SourceManager, SpotifyClient, YouTubeResolver};
use crate::storage::{JsonDatabase, MusicDatabase};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ein_music=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Ein Music v{}", env!("CARGO_PKG_VERSION"));

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    // Biblioteca local
    let library = if config.db_enable {
        Some(Arc::new(JsonDatabase::open(config.data_dir.clone()).await?))
    } else {
        info!("🗄️ Base de datos deshabilitada: sin historial, playlists ni autoplay por usuario");
        None
    };
    let database = library.clone().map(|db| db as Arc<dyn MusicDatabase>);

    // Fuentes de música
    let resolver = Arc::new(YouTubeResolver::new(ResolveCache::new(
        config.resolve_cache_size,
        config.resolve_cache_ttl,
    ))?);
    let spotify = if config.spotify_enabled() {
        Some(SpotifyClient::new(
            config.spotify_client_id.clone(),
            config.spotify_client_secret.clone(),
            config.spotify_market.clone(),
            database.clone(),
        )?)
    } else {
        None
    };
    let provider: Arc<dyn MetadataProvider> =
        Arc::new(SourceManager::new(spotify, resolver.clone()));

    let recommender = Arc::new(Recommender::new(
        provider.clone(),
        database,
        config.rating_decay,
        config.autoplay_max_request,
    ));
    let queues = Arc::new(QueueManager::new(
        recommender,
        EventBus::default(),
        QueueSettings::from_config(&config),
    ));

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let handler = MusicBot::new(config.clone(), queues.clone(), provider, library, resolver);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird()
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        queues.destroy_all().await;
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start_autosharded().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check() -> Result<()> {
    // Verificar dependencias críticas
    let mut missing = Vec::new();
    for (binary, arg) in [("yt-dlp", "--version"), ("ffmpeg", "-version")] {
        match YouTubeResolver::check_binary(binary, arg).await {
            Ok(version) => println!("✅ {}: {}", binary, version),
            Err(e) => {
                warn!("❌ {}: {:?}", binary, e);
                missing.push(binary);
            }
        }
    }

    if missing.is_empty() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes: {}", missing.join(", "));
    }
}
