use anyhow::Result;
use serde_json::json;
use serenity::{
    builder::{CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse},
    model::{
        application::{CommandDataOption, CommandDataOptionValue, CommandInteraction},
        channel::ChannelType,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};

use crate::{
    audio::{queue::QueueInfo, SharedQueue, SongbirdVoiceStream, StreamOptions, VoiceStream},
    bot::MusicBot,
    error::{QueueError, SeedError, VoiceError},
    media::{Playable, Streamable},
    recommendation::{Seed, SeedItem, TextSeed},
    sources::{spotify::SpotifyKind, split_queries, SearchResponse, SpotifyUri},
    storage::InteractionType,
};

const QUEUE_PAGE_SIZE: usize = 10;

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &MusicBot) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, bot, guild_id).await,
        "pause" => handle_pause(ctx, &command, bot, guild_id).await,
        "resume" => handle_resume(ctx, &command, bot, guild_id).await,
        "skip" => handle_skip(ctx, &command, bot, guild_id).await,
        "stop" => handle_stop(ctx, &command, bot, guild_id).await,
        "queue" => handle_queue(ctx, &command, bot, guild_id).await,
        "nowplaying" => handle_nowplaying(ctx, &command, bot, guild_id).await,
        "shuffle" => handle_shuffle(ctx, &command, bot, guild_id).await,
        "remove" => handle_remove(ctx, &command, bot, guild_id).await,
        "clear" => handle_clear(ctx, &command, bot, guild_id).await,
        "volume" => handle_volume(ctx, &command, bot, guild_id).await,
        "autoplay" => handle_autoplay(ctx, &command, bot, guild_id).await,
        "rate" => handle_rate(ctx, &command, bot, guild_id).await,
        "playlist" => handle_playlist(ctx, &command, bot, guild_id).await,
        "leave" => handle_leave(ctx, &command, bot, guild_id).await,
        _ => reply(ctx, &command, "❌ Comando no reconocido").await,
    }
}

// Respuestas

async fn reply(ctx: &Context, command: &CommandInteraction, content: impl Into<String>) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().content(content),
            ),
        )
        .await?;
    Ok(())
}

async fn defer(ctx: &Context, command: &CommandInteraction) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;
    Ok(())
}

async fn follow_up(ctx: &Context, command: &CommandInteraction, content: impl Into<String>) -> Result<()> {
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
        .await?;
    Ok(())
}

// Opciones

fn string_option<'a>(options: &'a [CommandDataOption], name: &str) -> Option<&'a str> {
    options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn integer_option(options: &[CommandDataOption], name: &str) -> Option<i64> {
    options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_i64())
}

fn user_option(options: &[CommandDataOption], name: &str) -> Option<UserId> {
    options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_user_id())
}

/// Mensaje para el usuario; los fallos internos no se muestran en detalle
pub fn user_message(error: &QueueError) -> String {
    match error {
        QueueError::Seed(seed) if !seed.is_user_facing() => {
            "❌ Error interno al buscar recomendaciones".to_string()
        }
        QueueError::Voice(VoiceError::Timeout) | QueueError::Voice(VoiceError::Join(_)) => {
            "❌ No pude conectarme a tu canal de voz".to_string()
        }
        other => format!("❌ {}", other),
    }
}

pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

/// Canal de voz estándar en el que está el usuario
fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Result<ChannelId, QueueError> {
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .ok_or(QueueError::NoVoiceChannel)?;

    let channel_id = guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or(QueueError::NoVoiceChannel)?;

    match guild.channels.get(&channel_id).map(|channel| channel.kind) {
        Some(ChannelType::Voice) => Ok(channel_id),
        _ => Err(QueueError::NotStandardVoice),
    }
}

/// Cola del guild; si no existe se crea uniéndose al canal del usuario
async fn queue_for_member(
    ctx: &Context,
    bot: &MusicBot,
    guild_id: GuildId,
    user_id: UserId,
) -> Result<SharedQueue, QueueError> {
    if let Some(queue) = bot.queues.get(guild_id) {
        return Ok(queue);
    }

    let channel_id = user_voice_channel(ctx, guild_id, user_id)?;
    let manager = songbird::get(ctx)
        .await
        .ok_or_else(|| VoiceError::Join("Songbird no inicializado".to_string()))?;
    let cache = ctx.cache.clone();
    let resolver = bot.resolver.clone();
    let options = StreamOptions::from_config(&bot.config);

    bot.queues
        .get_or_create(guild_id, || async move {
            let (stream, events) =
                SongbirdVoiceStream::connect(manager, cache, resolver, guild_id, channel_id, options)
                    .await?;
            Ok((Arc::new(stream) as Arc<dyn VoiceStream>, events))
        })
        .await
}

/// Separa resultados encontrados de consultas fallidas
pub fn split_responses(responses: Vec<SearchResponse>) -> (Vec<Playable>, Vec<String>) {
    let mut found = Vec::new();
    let mut failed = Vec::new();
    for response in responses {
        let success = response.is_success();
        match response.playable {
            Some(playable) if success => found.push(playable),
            _ => failed.push(match response.details {
                Some(details) => format!("`{}`: {}", response.query, details),
                None => format!("`{}`", response.query),
            }),
        }
    }
    (found, failed)
}

pub fn summary_added(added: &[Playable], failed: &[String]) -> String {
    let mut lines: Vec<String> = added
        .iter()
        .map(|p| match p.streamables.len() {
            1 => format!("➕ Agregado: **{}** de {}", p.name, p.artist.name),
            n => format!("➕ Agregado: **{}** ({} canciones)", p.name, n),
        })
        .collect();
    if !failed.is_empty() {
        lines.push(format!("⚠️ Sin resultados para: {}", failed.join(", ")));
    }
    lines.join("\n")
}

pub fn format_queue(info: &QueueInfo, page: usize) -> String {
    let mut lines = Vec::new();
    match &info.now_playing {
        Some(current) => lines.push(format!(
            "{} Sonando: **{}** de {}",
            if info.paused { "⏸️" } else { "🎵" },
            current.name,
            current.artist.name
        )),
        None => lines.push("🔇 No hay nada sonando".to_string()),
    }

    let page = info.page(page, QUEUE_PAGE_SIZE);
    for (offset, playable) in page.items.iter().enumerate() {
        let position = page.first_index + offset + 1;
        let left = playable.remaining().len();
        lines.push(format!(
            "`{}.` **{}** ({} restante{}, {})",
            position,
            playable.name,
            left,
            if left == 1 { "" } else { "s" },
            format_duration(playable.duration)
        ));
    }

    lines.push(format!(
        "Página {}/{} · {} en cola · {} por sonar{}",
        page.current_page,
        page.total_pages,
        info.playables.len(),
        format_duration(info.total_duration),
        if info.autoplay { " · 🎯 autoplay" } else { "" }
    ));
    lines.join("\n")
}

/// Posición de /remove (empieza en 1) a índice de la cola.
///
/// La posición 1 es el track actual y se rechaza.
pub fn parse_remove_position(position: i64, len: usize) -> Result<usize, String> {
    if position <= 1 {
        return Err("❌ No se puede quitar la canción actual, usa /skip".to_string());
    }
    let index = usize::try_from(position - 1).map_err(|_| "❌ Posición inválida".to_string())?;
    if index >= len {
        return Err(format!("❌ La cola solo tiene {} elementos", len));
    }
    Ok(index)
}

pub fn parse_rating(value: &str) -> Option<InteractionType> {
    match value {
        "like" => Some(InteractionType::Like),
        "love" => Some(InteractionType::Love),
        "dislike" => Some(InteractionType::Dislike),
        "hate" => Some(InteractionType::Hate),
        _ => None,
    }
}

/// Qué pidió el usuario como semilla de /autoplay
#[derive(Debug, Clone, PartialEq)]
pub enum SeedRequest {
    User(UserId),
    Playlist(String),
    Urls(Vec<String>),
    Text(TextSeed),
    Queue,
}

impl SeedRequest {
    pub fn from_options(
        tracks: Option<&str>,
        artists: Option<&str>,
        genres: Option<&str>,
        user: Option<UserId>,
        playlist: Option<&str>,
    ) -> Self {
        if let Some(user) = user {
            return Self::User(user);
        }
        if let Some(name) = playlist {
            return Self::Playlist(name.to_string());
        }

        let entries: Vec<String> = [tracks, artists]
            .into_iter()
            .flatten()
            .flat_map(split_queries)
            .collect();
        if genres.is_none()
            && !entries.is_empty()
            && entries.iter().all(|e| e.starts_with("http") || e.starts_with("spotify:"))
        {
            return Self::Urls(entries);
        }

        let text = TextSeed::from_lists(tracks, artists, genres);
        if text.is_empty() {
            Self::Queue
        } else {
            Self::Text(text)
        }
    }
}

/// Convierte el pedido en una semilla concreta
async fn build_seed(
    bot: &MusicBot,
    request: SeedRequest,
    invoker: UserId,
    queue_streamables: Vec<Streamable>,
) -> Result<Seed, String> {
    match request {
        SeedRequest::User(user) => Ok(Seed::User(user)),
        SeedRequest::Text(text) => Ok(Seed::Text(text)),
        SeedRequest::Queue if queue_streamables.is_empty() => Ok(Seed::User(invoker)),
        SeedRequest::Queue => Ok(Seed::Queue(queue_streamables)),
        SeedRequest::Playlist(name) => {
            let database = bot
                .database
                .as_ref()
                .ok_or_else(|| format!("❌ {}", SeedError::DatabaseDisabled))?;
            match database.playlist_by_name(&name).await {
                Ok(Some(playlist)) => Ok(Seed::Playlist(playlist)),
                Ok(None) => Err(format!("❌ No existe la playlist `{}`", name)),
                Err(e) => {
                    error!("Error al leer playlist {}: {:?}", name, e);
                    Err("❌ Error al leer la playlist".to_string())
                }
            }
        }
        SeedRequest::Urls(urls) => {
            if let ([url], Some(database)) = (urls.as_slice(), bot.database.as_ref()) {
                let stored = match SpotifyUri::parse(url) {
                    Some(SpotifyUri { kind: SpotifyKind::Artist, id }) => {
                        database.artist(&id).await.ok().flatten().map(Seed::Artist)
                    }
                    Some(SpotifyUri { kind: SpotifyKind::Album, id }) => {
                        database.album(&id).await.ok().flatten().map(Seed::Album)
                    }
                    _ => None,
                };
                if let Some(seed) = stored {
                    return Ok(seed);
                }
            }

            let responses = bot.provider.search(&urls.join(",")).await.map_err(|e| {
                warn!("Búsqueda de semillas fallida: {:?}", e);
                "❌ Error al buscar las semillas".to_string()
            })?;
            let (mut found, _) = split_responses(responses);
            match found.len() {
                0 => Err(format!("❌ {}", SeedError::NoMatches)),
                1 => Ok(Seed::Playable(found.remove(0))),
                _ => Ok(Seed::Items(found.into_iter().map(SeedItem::Playable).collect())),
            }
        }
    }
}

// Handlers específicos para cada comando

async fn handle_play(ctx: &Context, command: &CommandInteraction, bot: &MusicBot, guild_id: GuildId) -> Result<()> {
    let query = string_option(&command.data.options, "query")
        .ok_or_else(|| anyhow::anyhow!("Query no proporcionado"))?
        .to_string();

    // Defer la respuesta ya que puede tomar tiempo
    defer(ctx, command).await?;

    let queue = match queue_for_member(ctx, bot, guild_id, command.user.id).await {
        Ok(queue) => queue,
        Err(e) => return follow_up(ctx, command, user_message(&e)).await,
    };
    bot.announce_channels.insert(guild_id, command.channel_id);

    let responses = match bot.provider.search(&query).await {
        Ok(responses) => responses,
        Err(e) => {
            error!("Error de búsqueda para '{}': {:?}", query, e);
            return follow_up(ctx, command, "❌ Error al buscar").await;
        }
    };

    let (found, failed) = split_responses(responses);
    if found.is_empty() {
        return follow_up(ctx, command, format!("❌ Sin resultados para: {}", failed.join(", "))).await;
    }

    let data = json!({ "channel_id": command.channel_id.get() });
    let result = queue.lock().await.play(found, command.user.id, Some(data)).await;
    match result {
        Ok(added) => follow_up(ctx, command, summary_added(&added, &failed)).await,
        Err(e) => follow_up(ctx, command, user_message(&e)).await,
    }
}

async fn handle_pause(ctx: &Context, command: &CommandInteraction, bot: &MusicBot, guild_id: GuildId) -> Result<()> {
    let Some(queue) = bot.queues.get(guild_id) else {
        return reply(ctx, command, "❌ No hay nada reproduciéndose").await;
    };
    let message = match queue.lock().await.pause().await {
        Ok(true) => "⏸️ Reproducción pausada".to_string(),
        Ok(false) => "❌ No hay nada que pausar".to_string(),
        Err(e) => user_message(&e),
    };
    reply(ctx, command, message).await
}

async fn handle_resume(ctx: &Context, command: &CommandInteraction, bot: &MusicBot, guild_id: GuildId) -> Result<()> {
    let Some(queue) = bot.queues.get(guild_id) else {
        return reply(ctx, command, "❌ No hay nada reproduciéndose").await;
    };
    let message = match queue.lock().await.unpause().await {
        Ok(true) => "▶️ Reproducción reanudada".to_string(),
        Ok(false) => "❌ La reproducción no está pausada".to_string(),
        Err(e) => user_message(&e),
    };
    reply(ctx, command, message).await
}

async fn handle_skip(ctx: &Context, command: &CommandInteraction, bot: &MusicBot, guild_id: GuildId) -> Result<()> {
    let Some(queue) = bot.queues.get(guild_id) else {
        return reply(ctx, command, "❌ No hay nada reproduciéndose").await;
    };
    let mut queue = queue.lock().await;
    let title = queue.now_playing().map(|s| s.name.clone());
    let message = match queue.skip().await {
        Ok(true) => format!("⏭️ Saltado: **{}**", title.unwrap_or_default()),
        Ok(false) => "❌ No hay nada que saltar".to_string(),
        Err(e) => user_message(&e),
    };
    reply(ctx, command, message).await
}

async fn handle_stop(ctx: &Context, command: &CommandInteraction, bot: &MusicBot, guild_id: GuildId) -> Result<()> {
    let Some(queue) = bot.queues.get(guild_id) else {
        return reply(ctx, command, "❌ No hay nada reproduciéndose").await;
    };
    let message = match queue.lock().await.stop().await {
        Ok(()) => "⏹️ Reproducción detenida y cola limpiada".to_string(),
        Err(e) => user_message(&e),
    };
    reply(ctx, command, message).await
}

async fn handle_queue(ctx: &Context, command: &CommandInteraction, bot: &MusicBot, guild_id: GuildId) -> Result<()> {
    let Some(queue) = bot.queues.get(guild_id) else {
        return reply(ctx, command, "📭 La cola está vacía").await;
    };
    let page = integer_option(&command.data.options, "page")
        .and_then(|p| usize::try_from(p).ok())
        .unwrap_or(1);
    let info = queue.lock().await.info();
    reply(ctx, command, format_queue(&info, page)).await
}

async fn handle_nowplaying(ctx: &Context, command: &CommandInteraction, bot: &MusicBot, guild_id: GuildId) -> Result<()> {
    let Some(queue) = bot.queues.get(guild_id) else {
        return reply(ctx, command, "🔇 No hay nada sonando").await;
    };
    let queue = queue.lock().await;
    let Some(current) = queue.now_playing() else {
        return reply(ctx, command, "🔇 No hay nada sonando").await;
    };

    let elapsed = queue.stream().elapsed().unwrap_or_default();
    let total = Duration::from_millis(queue.stream().current_duration_ms());
    let message = format!(
        "{} **{}** de {} [{} / {}]{}",
        if queue.is_paused() { "⏸️" } else { "▶️" },
        current.name,
        current.artist.name,
        format_duration(elapsed.min(total)),
        format_duration(total),
        current
            .requested_by
            .map(|user| format!("\nPedido por <@{}>", user))
            .unwrap_or_default()
    );
    reply(ctx, command, message).await
}

async fn handle_shuffle(ctx: &Context, command: &CommandInteraction, bot: &MusicBot, guild_id: GuildId) -> Result<()> {
    let Some(queue) = bot.queues.get(guild_id) else {
        return reply(ctx, command, "❌ No hay nada reproduciéndose").await;
    };
    let message = match queue.lock().await.shuffle() {
        Ok(()) => "🔀 Cola mezclada".to_string(),
        Err(e) => user_message(&e),
    };
    reply(ctx, command, message).await
}

async fn handle_remove(ctx: &Context, command: &CommandInteraction, bot: &MusicBot, guild_id: GuildId) -> Result<()> {
    let Some(queue) = bot.queues.get(guild_id) else {
        return reply(ctx, command, "📭 La cola está vacía").await;
    };
    let position = integer_option(&command.data.options, "position").unwrap_or(0);

    let mut queue = queue.lock().await;
    let message = match parse_remove_position(position, queue.playables().len()) {
        Ok(index) => match queue.remove_playable_at(index) {
            Ok(removed) => format!("➖ Quitado: **{}**", removed.name),
            Err(e) => user_message(&e),
        },
        Err(message) => message,
    };
    reply(ctx, command, message).await
}

async fn handle_clear(ctx: &Context, command: &CommandInteraction, bot: &MusicBot, guild_id: GuildId) -> Result<()> {
    let Some(queue) = bot.queues.get(guild_id) else {
        return reply(ctx, command, "📭 La cola está vacía").await;
    };
    let message = match queue.lock().await.clear() {
        Ok(0) => "📭 No había nada pendiente".to_string(),
        Ok(count) => format!("🗑️ {} elemento(s) quitados de la cola", count),
        Err(e) => user_message(&e),
    };
    reply(ctx, command, message).await
}

async fn handle_volume(ctx: &Context, command: &CommandInteraction, bot: &MusicBot, guild_id: GuildId) -> Result<()> {
    let Some(queue) = bot.queues.get(guild_id) else {
        return reply(ctx, command, "🔇 No hay nada sonando").await;
    };
    let stream = queue.lock().await.stream().clone();

    let message = match integer_option(&command.data.options, "level") {
        Some(level) => {
            let level = level.clamp(0, 200);
            if stream.set_volume(level as f32 / 100.0).await {
                format!("🔊 Volumen ajustado a {}%", level)
            } else {
                "🔊 Volumen guardado para la próxima canción".to_string()
            }
        }
        None => match stream.volume() {
            v if v < 0.0 => "🔇 No hay nada sonando".to_string(),
            v => format!("🔊 Volumen actual: {}%", (v * 100.0).round() as i64),
        },
    };
    reply(ctx, command, message).await
}

async fn handle_leave(ctx: &Context, command: &CommandInteraction, bot: &MusicBot, guild_id: GuildId) -> Result<()> {
    if bot.queues.destroy(guild_id).await {
        return reply(ctx, command, "👋 Desconectado del canal de voz").await;
    }

    let manager = songbird::get(ctx)
        .await
        .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;
    let message = match manager.remove(guild_id).await {
        Ok(()) => "👋 Desconectado del canal de voz",
        Err(_) => "❌ No estoy en un canal de voz",
    };
    reply(ctx, command, message).await
}

async fn handle_autoplay(ctx: &Context, command: &CommandInteraction, bot: &MusicBot, guild_id: GuildId) -> Result<()> {
    let options = &command.data.options;
    let request = SeedRequest::from_options(
        string_option(options, "tracks"),
        string_option(options, "artists"),
        string_option(options, "genres"),
        user_option(options, "user"),
        string_option(options, "playlist"),
    );

    defer(ctx, command).await?;

    let queue = match queue_for_member(ctx, bot, guild_id, command.user.id).await {
        Ok(queue) => queue,
        Err(e) => return follow_up(ctx, command, user_message(&e)).await,
    };
    bot.announce_channels.insert(guild_id, command.channel_id);

    // Sin opciones el comando alterna
    let queue_streamables = {
        let mut locked = queue.lock().await;
        if request == SeedRequest::Queue && locked.stop_autoplay() {
            return follow_up(ctx, command, "🎯 Autoplay desactivado").await;
        }
        locked
            .playables()
            .iter()
            .chain(locked.history().iter().rev())
            .flat_map(|p| p.streamables.iter().cloned())
            .collect::<Vec<_>>()
    };

    let seed = match build_seed(bot, request, command.user.id, queue_streamables).await {
        Ok(seed) => seed,
        Err(message) => return follow_up(ctx, command, message).await,
    };

    let data = json!({ "channel_id": command.channel_id.get(), "autoplay": true });
    let result = queue
        .lock()
        .await
        .start_autoplay(seed, command.user.id, Some(data))
        .await;
    match result {
        Ok(added) => {
            follow_up(
                ctx,
                command,
                format!("🎯 Autoplay activado\n{}", summary_added(&added, &[])),
            )
            .await
        }
        Err(e) => {
            warn!("Autoplay no iniciado en guild {}: {}", guild_id, e);
            follow_up(ctx, command, user_message(&e)).await
        }
    }
}

async fn handle_rate(ctx: &Context, command: &CommandInteraction, bot: &MusicBot, guild_id: GuildId) -> Result<()> {
    let Some(interaction) = string_option(&command.data.options, "rating").and_then(parse_rating) else {
        return reply(ctx, command, "❌ Valoración inválida").await;
    };
    let Some(queue) = bot.queues.get(guild_id) else {
        return reply(ctx, command, "🔇 No hay nada sonando").await;
    };

    let result = queue.lock().await.rate_current(command.user.id, interaction).await;
    let message = match result {
        Ok(Some(track)) if bot.database.is_some() => format!("⭐ Valoraste **{}**", track.name),
        Ok(Some(track)) => format!(
            "⭐ Valoración de **{}** anotada para el autoplay (la base de datos está deshabilitada)",
            track.name
        ),
        Ok(None) => "🔇 No hay nada sonando".to_string(),
        Err(e) => user_message(&e),
    };
    reply(ctx, command, message).await
}

async fn handle_playlist(ctx: &Context, command: &CommandInteraction, bot: &MusicBot, guild_id: GuildId) -> Result<()> {
    let Some(database) = bot.database.clone() else {
        return reply(ctx, command, format!("❌ {}", SeedError::DatabaseDisabled)).await;
    };
    let Some(subcommand) = command.data.options.first() else {
        return reply(ctx, command, "❌ Subcomando no proporcionado").await;
    };
    let args: &[CommandDataOption] = match &subcommand.value {
        CommandDataOptionValue::SubCommand(args) => args.as_slice(),
        _ => &[],
    };
    let name = string_option(args, "name").map(str::to_string);
    let owner = command.user.id;

    match (subcommand.name.as_str(), name) {
        ("save", Some(name)) => {
            let Some(queue) = bot.queues.get(guild_id) else {
                return reply(ctx, command, "📭 La cola está vacía").await;
            };
            let streamables: Vec<Streamable> = queue
                .lock()
                .await
                .playables()
                .iter()
                .flat_map(|p| p.streamables.iter().cloned())
                .collect();
            if streamables.is_empty() {
                return reply(ctx, command, "📭 La cola está vacía").await;
            }

            let message = match database.playlist_by_name(&name).await? {
                Some(existing) if existing.owner_id != owner => {
                    format!("❌ La playlist `{}` pertenece a otro usuario", name)
                }
                Some(_) => {
                    let added = database.add_to_playlist(&name, &streamables).await?;
                    format!("💾 {} canción(es) nuevas en `{}`", added, name)
                }
                None => {
                    let playlist = database.create_playlist(owner, &name, &streamables).await?;
                    format!("💾 Playlist `{}` creada con {} canciones", name, playlist.track_ids.len())
                }
            };
            reply(ctx, command, message).await
        }
        ("play", Some(name)) => {
            defer(ctx, command).await?;
            let Some(playlist) = database.playlist_by_name(&name).await? else {
                return follow_up(ctx, command, format!("❌ No existe la playlist `{}`", name)).await;
            };
            let queue = match queue_for_member(ctx, bot, guild_id, owner).await {
                Ok(queue) => queue,
                Err(e) => return follow_up(ctx, command, user_message(&e)).await,
            };
            bot.announce_channels.insert(guild_id, command.channel_id);

            let uris: Vec<String> = playlist
                .track_ids
                .iter()
                .map(|id| format!("spotify:track:{}", id))
                .collect();
            let (found, failed) = split_responses(bot.provider.search(&uris.join(",")).await?);
            if found.is_empty() {
                return follow_up(ctx, command, format!("❌ No se pudo cargar `{}`", name)).await;
            }

            let data = json!({ "channel_id": command.channel_id.get(), "playlist": name });
            let result = queue.lock().await.play(found, owner, Some(data)).await;
            match result {
                Ok(added) => {
                    let skipped = if failed.is_empty() {
                        String::new()
                    } else {
                        format!(" ({} no disponibles)", failed.len())
                    };
                    follow_up(
                        ctx,
                        command,
                        format!("📜 `{}`: {} canciones en cola{}", name, added.len(), skipped),
                    )
                    .await
                }
                Err(e) => follow_up(ctx, command, user_message(&e)).await,
            }
        }
        ("delete", Some(name)) => {
            let message = match database.playlist_by_name(&name).await? {
                Some(playlist) if playlist.owner_id == owner => {
                    database.delete_playlist(&name).await?;
                    format!("🗑️ Playlist `{}` borrada", name)
                }
                Some(_) => format!("❌ La playlist `{}` pertenece a otro usuario", name),
                None => format!("❌ No existe la playlist `{}`", name),
            };
            reply(ctx, command, message).await
        }
        ("list", _) => {
            let playlists = database.user_playlists(owner).await?;
            let message = if playlists.is_empty() {
                "📭 No tienes playlists guardadas".to_string()
            } else {
                playlists
                    .iter()
                    .map(|p| format!("📜 `{}` ({} canciones)", p.name, p.track_ids.len()))
                    .collect::<Vec<_>>()
                    .join("\n")
            };
            reply(ctx, command, message).await
        }
        _ => reply(ctx, command, "❌ Falta el nombre de la playlist").await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        media::{ArtistRef, PlayableKind, StreamableSource},
        sources::SearchCode,
    };
    use pretty_assertions::assert_eq;

    fn track(id: &str, secs: u64) -> Playable {
        Streamable::new(
            StreamableSource::Spotify,
            id,
            format!("Song {id}"),
            ArtistRef::new("a", "Artist"),
            format!("https://open.spotify.com/track/{id}"),
            Duration::from_secs(secs),
        )
        .to_playable()
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(Duration::from_secs(59)), "0:59");
        assert_eq!(format_duration(Duration::from_secs(320)), "5:20");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1:02:03");
    }

    #[test]
    fn remove_rejects_the_current_track() {
        assert!(parse_remove_position(1, 5).is_err());
        assert!(parse_remove_position(0, 5).is_err());
        assert!(parse_remove_position(6, 5).is_err());
        assert_eq!(parse_remove_position(2, 5), Ok(1));
        assert_eq!(parse_remove_position(5, 5), Ok(4));
    }

    #[test]
    fn ratings() {
        assert_eq!(parse_rating("love"), Some(InteractionType::Love));
        assert_eq!(parse_rating("hate"), Some(InteractionType::Hate));
        assert_eq!(parse_rating("skip"), None);
    }

    #[test]
    fn seed_requests_from_options() {
        assert_eq!(SeedRequest::from_options(None, None, None, None, None), SeedRequest::Queue);
        assert_eq!(
            SeedRequest::from_options(Some("a"), None, None, Some(UserId::new(5)), Some("p")),
            SeedRequest::User(UserId::new(5))
        );
        assert_eq!(
            SeedRequest::from_options(None, None, None, None, Some("chill")),
            SeedRequest::Playlist("chill".into())
        );
        assert_eq!(
            SeedRequest::from_options(
                Some("https://open.spotify.com/track/abc, spotify:artist:xyz"),
                None,
                None,
                None,
                None
            ),
            SeedRequest::Urls(vec![
                "https://open.spotify.com/track/abc".into(),
                "spotify:artist:xyz".into()
            ])
        );
        match SeedRequest::from_options(Some("one more time"), Some("daft punk"), Some("house"), None, None) {
            SeedRequest::Text(text) => {
                assert_eq!(text.track_names, vec!["one more time"]);
                assert_eq!(text.artist_names, vec!["daft punk"]);
                assert_eq!(text.genres, vec!["house"]);
            }
            other => panic!("esperaba texto, llegó {:?}", other),
        }
    }

    #[test]
    fn search_results_are_split_and_summarised() {
        let album = Playable::new(
            PlayableKind::Album,
            "al",
            "Discovery",
            ArtistRef::new("a", "Daft Punk"),
            "https://open.spotify.com/album/al",
            vec![track("1", 100).streamables.remove(0), track("2", 100).streamables.remove(0)],
        );
        let (found, failed) = split_responses(vec![
            SearchResponse::success("discovery", album),
            SearchResponse::success("one", track("1", 100)),
            SearchResponse::failure("zzz", SearchCode::NoMatches, "Sin resultados"),
        ]);

        assert_eq!(found.len(), 2);
        assert_eq!(failed, vec!["`zzz`: Sin resultados"]);
        assert_eq!(
            summary_added(&found, &failed),
            "➕ Agregado: **Discovery** (2 canciones)\n➕ Agregado: **Song 1** de Artist\n⚠️ Sin resultados para: `zzz`: Sin resultados"
        );
    }

    #[test]
    fn queue_listing() {
        let info = QueueInfo {
            now_playing: track("0", 60).streamables.first().cloned(),
            playables: vec![track("0", 60), track("1", 125)],
            total_duration: Duration::from_secs(125),
            autoplay: true,
            paused: false,
        };

        let text = format_queue(&info, 1);
        assert!(text.starts_with("🎵 Sonando: **Song 0** de Artist"));
        assert!(text.contains("`2.` **Song 1** (1 restante, 2:05)"));
        assert!(text.ends_with("Página 1/1 · 2 en cola · 2:05 por sonar · 🎯 autoplay"));
    }

    #[test]
    fn internal_errors_are_not_shown_verbatim() {
        let hidden = user_message(&QueueError::Seed(SeedError::Provider(anyhow::anyhow!("503"))));
        assert!(!hidden.contains("503"));

        let shown = user_message(&QueueError::Seed(SeedError::InsufficientHistory));
        assert!(shown.contains("suficientes"));
    }
}
