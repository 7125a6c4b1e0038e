use thiserror::Error;

/// Por qué una semilla no se pudo convertir en solicitud de recomendaciones.
///
/// Salvo [`SeedError::Database`] y [`SeedError::Provider`], todas son casos
/// esperables de "sin datos" y su mensaje se muestra tal cual al usuario.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("El autoplay por usuario requiere que la base de datos esté habilitada")]
    DatabaseDisabled,

    #[error("El usuario no tiene tracks valorados")]
    UnknownUser,

    #[error("El usuario no tiene suficientes tracks o artistas que le gusten")]
    InsufficientHistory,

    #[error("No se puede iniciar autoplay con una lista vacía")]
    EmptySeed,

    #[error("La búsqueda no encontró ningún track ni artista")]
    NoMatches,

    #[error("La semilla no produjo ningún track, artista o género")]
    NoSeeds,

    #[error("No se encontraron recomendaciones nuevas (se pidieron {requested})")]
    Exhausted { requested: usize },

    #[error("error de base de datos: {0}")]
    Database(#[source] anyhow::Error),

    #[error("error del proveedor de metadata: {0}")]
    Provider(#[source] anyhow::Error),
}

impl SeedError {
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, Self::Database(_) | Self::Provider(_))
    }
}

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("la conexión de voz no estuvo lista a tiempo")]
    Timeout,

    #[error("no se pudo unir al canal de voz: {0}")]
    Join(String),

    #[error("no se pudo resolver el audio: {0}")]
    Resolve(#[source] anyhow::Error),

    #[error("la conexión de voz ya no existe")]
    Gone,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("la cola fue destruida")]
    Destroyed,

    #[error("No estás en un canal de voz")]
    NoVoiceChannel,

    #[error("El canal no es un canal de voz estándar")]
    NotStandardVoice,

    #[error("Índice fuera de rango: {index} (la cola tiene {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("No se pudo iniciar el autoplay: no hubo recomendaciones")]
    NothingRecommended,

    #[error(transparent)]
    Seed(#[from] SeedError),

    #[error(transparent)]
    Voice(#[from] VoiceError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_collaborator_failures_are_hidden_from_users() {
        assert!(SeedError::InsufficientHistory.is_user_facing());
        assert!(SeedError::Exhausted { requested: 101 }.is_user_facing());
        assert!(!SeedError::Database(anyhow::anyhow!("io")).is_user_facing());
        assert!(!SeedError::Provider(anyhow::anyhow!("503")).is_user_facing());
    }
}
