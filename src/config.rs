use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Base de datos
    pub db_enable: bool,
    pub data_dir: PathBuf,

    // Spotify
    pub spotify_client_id: String,
    pub spotify_client_secret: String,
    pub spotify_market: String,

    // Voz
    pub default_volume: f32,
    pub voice_ready_timeout: Duration,
    pub voice_reconnect_attempts: u32,
    pub voice_reconnect_step: Duration,

    // Autoplay
    pub autoplay_low_water: usize,
    pub autoplay_batch: usize,
    pub autoplay_max_request: usize,
    pub rating_decay: f64,

    // Cache de resolución Spotify -> YouTube
    pub resolve_cache_size: usize,
    pub resolve_cache_ttl: Duration,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_duration(key: &str, default: &str) -> Result<Duration> {
    let raw = env_or(key, default);
    humantime::parse_duration(raw.trim())
        .map_err(|e| anyhow::anyhow!("{} inválido ({}): {}", key, raw, e))
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            application_id: std::env::var("APPLICATION_ID")?.parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            db_enable: env_or("DB_ENABLE", "false").parse()?,
            data_dir: env_or("DATA_DIR", "./data").into(),

            spotify_client_id: env_or("SPOTIFY_CLIENT_ID", ""),
            spotify_client_secret: env_or("SPOTIFY_CLIENT_SECRET", ""),
            spotify_market: env_or("SPOTIFY_MARKET", "US"),

            default_volume: env_or("DEFAULT_VOLUME", "0.5").parse()?,
            voice_ready_timeout: env_duration("VOICE_READY_TIMEOUT", "15s")?,
            voice_reconnect_attempts: env_or("VOICE_RECONNECT_ATTEMPTS", "5").parse()?,
            voice_reconnect_step: env_duration("VOICE_RECONNECT_STEP", "5s")?,

            autoplay_low_water: env_or("AUTOPLAY_LOW_WATER", "3").parse()?,
            autoplay_batch: env_or("AUTOPLAY_BATCH", "3").parse()?,
            autoplay_max_request: env_or("AUTOPLAY_MAX_REQUEST", "100").parse()?,
            rating_decay: env_or("RATING_DECAY", "0.9").parse()?,

            resolve_cache_size: env_or("RESOLVE_CACHE_SIZE", "500").parse()?,
            resolve_cache_ttl: env_duration("RESOLVE_CACHE_TTL", "6h")?,
        };

        if config.db_enable {
            std::fs::create_dir_all(&config.data_dir)?;
        }

        config.validate()?;

        Ok(config)
    }

    pub fn spotify_enabled(&self) -> bool {
        !self.spotify_client_id.is_empty() && !self.spotify_client_secret.is_empty()
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Volume must be between 0.0 and 2.0
    /// - Autoplay low-water mark and batch size must be greater than 0
    /// - Rating decay must be in (0, 1]
    /// - Max recommendation request must be at least the batch size
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.default_volume) {
            anyhow::bail!("Default volume must be between 0.0 and 2.0, got: {}", self.default_volume);
        }

        if self.autoplay_low_water == 0 {
            anyhow::bail!("Autoplay low-water mark must be greater than 0");
        }

        if self.autoplay_batch == 0 {
            anyhow::bail!("Autoplay batch size must be greater than 0");
        }

        if !(self.rating_decay > 0.0 && self.rating_decay <= 1.0) {
            anyhow::bail!("Rating decay must be in (0, 1], got: {}", self.rating_decay);
        }

        if self.autoplay_max_request < self.autoplay_batch {
            anyhow::bail!(
                "Autoplay max request ({}) cannot be smaller than the batch size ({})",
                self.autoplay_max_request,
                self.autoplay_batch
            );
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Secrets are left out.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Database: {} ({})\n  \
            Spotify: {} (market {})\n  \
            Voice: {}% vol, ready timeout {}, {} reconnects every {}\n  \
            Autoplay: low-water {}, batch {}, max request {}, decay {}\n  \
            Resolve cache: {} entries, TTL {}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            if self.db_enable { "enabled" } else { "disabled" },
            self.data_dir.display(),
            if self.spotify_enabled() { "enabled" } else { "disabled" },
            self.spotify_market,
            (self.default_volume * 100.0) as u32,
            humantime::format_duration(self.voice_ready_timeout),
            self.voice_reconnect_attempts,
            humantime::format_duration(self.voice_reconnect_step),
            self.autoplay_low_water,
            self.autoplay_batch,
            self.autoplay_max_request,
            self.rating_decay,
            self.resolve_cache_size,
            humantime::format_duration(self.resolve_cache_ttl),
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            db_enable: false,
            data_dir: "./data".into(),

            spotify_client_id: String::new(),
            spotify_client_secret: String::new(),
            spotify_market: "US".to_string(),

            default_volume: 0.5,
            voice_ready_timeout: Duration::from_secs(15),
            voice_reconnect_attempts: 5,
            voice_reconnect_step: Duration::from_secs(5),

            autoplay_low_water: 3,
            autoplay_batch: 3,
            autoplay_max_request: 100,
            rating_decay: 0.9,

            resolve_cache_size: 500,
            resolve_cache_ttl: Duration::from_secs(6 * 60 * 60),
        }
    }
}
