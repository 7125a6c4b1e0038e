use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        pause_command(),
        resume_command(),
        skip_command(),
        stop_command(),
        queue_command(),
        nowplaying_command(),
        shuffle_command(),
        remove_command(),
        clear_command(),
        volume_command(),
        autoplay_command(),
        rate_command(),
        playlist_command(),
        leave_command(),
    ]
}

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

// Comandos de reproducción

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Reproduce canciones, álbumes o playlists")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "query",
                "URL o búsqueda; varias separadas por comas",
            )
            .required(true),
        )
}

fn autoplay_command() -> CreateCommand {
    CreateCommand::new("autoplay")
        .description("Activa/desactiva el autoplay (sin opciones usa la cola actual)")
        .add_option(CreateCommandOption::new(
            CommandOptionType::String,
            "tracks",
            "Canciones semilla separadas por comas",
        ))
        .add_option(CreateCommandOption::new(
            CommandOptionType::String,
            "artists",
            "Artistas semilla separados por comas",
        ))
        .add_option(CreateCommandOption::new(
            CommandOptionType::String,
            "genres",
            "Géneros semilla separados por comas",
        ))
        .add_option(CreateCommandOption::new(
            CommandOptionType::User,
            "user",
            "Usar el historial de un usuario",
        ))
        .add_option(CreateCommandOption::new(
            CommandOptionType::String,
            "playlist",
            "Usar una playlist guardada",
        ))
}

// Comandos de control

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause").description("Pausa la reproducción actual")
}

fn resume_command() -> CreateCommand {
    CreateCommand::new("resume").description("Reanuda la reproducción pausada")
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Salta a la siguiente canción")
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Detiene la reproducción, limpia la cola y apaga el autoplay")
}

// Comandos de cola

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue")
        .description("Muestra la cola de reproducción")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "page", "Número de página")
                .min_int_value(1),
        )
}

fn nowplaying_command() -> CreateCommand {
    CreateCommand::new("nowplaying").description("Muestra información de la canción actual")
}

fn shuffle_command() -> CreateCommand {
    CreateCommand::new("shuffle").description("Mezcla la cola (la canción actual no se mueve)")
}

fn remove_command() -> CreateCommand {
    CreateCommand::new("remove")
        .description("Quita un elemento de la cola")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "position",
                "Posición en /queue (la 1 es la actual)",
            )
            .min_int_value(2)
            .required(true),
        )
}

fn clear_command() -> CreateCommand {
    CreateCommand::new("clear").description("Quita todo lo pendiente menos la canción actual")
}

// Comandos de audio

fn volume_command() -> CreateCommand {
    CreateCommand::new("volume")
        .description("Ajusta el volumen de reproducción")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "level",
                "Nivel de volumen (0-200)",
            )
            .min_int_value(0)
            .max_int_value(200),
        )
}

// Comandos de biblioteca

fn rate_command() -> CreateCommand {
    CreateCommand::new("rate")
        .description("Valora la canción actual")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "rating", "Valoración")
                .add_string_choice("👍 Me gusta", "like")
                .add_string_choice("❤️ Me encanta", "love")
                .add_string_choice("👎 No me gusta", "dislike")
                .add_string_choice("💀 La odio", "hate")
                .required(true),
        )
}

fn playlist_command() -> CreateCommand {
    let name = || {
        CreateCommandOption::new(CommandOptionType::String, "name", "Nombre de la playlist")
            .required(true)
    };

    CreateCommand::new("playlist")
        .description("Playlists guardadas")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::SubCommand,
                "save",
                "Guarda la cola actual en una playlist",
            )
            .add_sub_option(name()),
        )
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::SubCommand,
                "play",
                "Encola una playlist guardada",
            )
            .add_sub_option(name()),
        )
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::SubCommand,
                "delete",
                "Borra una playlist propia",
            )
            .add_sub_option(name()),
        )
        .add_option(CreateCommandOption::new(
            CommandOptionType::SubCommand,
            "list",
            "Lista tus playlists",
        ))
}

// Comandos de conexión

fn leave_command() -> CreateCommand {
    CreateCommand::new("leave").description("Desconecta el bot del canal de voz")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_command_is_registered_once() {
        let commands = all_commands();
        assert_eq!(commands.len(), 15);

        let names: std::collections::HashSet<String> = commands
            .iter()
            .map(|c| {
                serde_json::to_value(c).unwrap()["name"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect();
        assert_eq!(names.len(), commands.len());
        assert!(names.contains("autoplay"));
        assert!(names.contains("playlist"));
    }
}
