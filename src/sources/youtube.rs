use anyhow::{Context, Result};
use async_process::Command;
use regex::Regex;
use serde::Deserialize;
use songbird::input::{Input, YoutubeDl};
use std::{sync::LazyLock, time::Duration};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::{
    cache::{ResolveCache, ResolvedTrack},
    media::{ArtistRef, Streamable, StreamableSource},
};

static YOUTUBE_URL: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(
        r"^(https?://)?((www|m|music)\.)?(youtube\.com/(watch\?v=|embed/|v/|shorts/)|youtu\.be/)[\w-]+",
    )
});

/// Información extraída de yt-dlp
#[derive(Debug, Clone, Deserialize)]
struct YtDlpInfo {
    id: String,
    title: String,
    duration: Option<f64>,
    uploader: Option<String>,
    channel_id: Option<String>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
    url: Option<String>,
}

impl YtDlpInfo {
    fn page_url(&self) -> String {
        self.webpage_url
            .clone()
            .or_else(|| self.url.clone())
            .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", self.id))
    }
}

/// Resuelve tracks a URLs de YouTube usando yt-dlp
pub struct YouTubeResolver {
    http: reqwest::Client,
    cache: ResolveCache,
    // Limitar procesos de yt-dlp concurrentes
    rate_limiter: Semaphore,
}

impl YouTubeResolver {
    pub fn new(cache: ResolveCache) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            cache,
            rate_limiter: Semaphore::new(3),
        })
    }

    pub fn cache(&self) -> &ResolveCache {
        &self.cache
    }

    /// Verifica si una URL es válida para YouTube
    pub fn is_youtube_url(url: &str) -> bool {
        YOUTUBE_URL.as_ref().is_ok_and(|re| re.is_match(url.trim()))
    }

    async fn run_ytdlp(&self, args: &[&str]) -> Result<String> {
        let _permit = self.rate_limiter.acquire().await?;

        let output = Command::new("yt-dlp")
            .args(args)
            .output()
            .await
            .context("Error al ejecutar yt-dlp")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp error: {}", error.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Busca videos en YouTube
    async fn search_info(&self, query: &str, limit: usize) -> Result<Vec<YtDlpInfo>> {
        info!("🔍 Buscando en YouTube: {}", query);

        let search_query = format!("ytsearch{}:{}", limit, query);
        let stdout = self
            .run_ytdlp(&[
                "--no-playlist",
                "--dump-json",
                "--flat-playlist",
                "--skip-download",
                "--no-warnings",
                &search_query,
            ])
            .await?;

        Ok(stdout
            .lines()
            .filter_map(|line| serde_json::from_str::<YtDlpInfo>(line).ok())
            .collect())
    }

    /// Obtiene información de una URL específica
    async fn video_info(&self, url: &str) -> Result<YtDlpInfo> {
        debug!("📊 Obteniendo info de: {}", url);

        let stdout = self
            .run_ytdlp(&["--no-playlist", "--dump-json", "--skip-download", "--no-warnings", url])
            .await?;

        serde_json::from_str(stdout.trim()).context("Error al parsear respuesta de yt-dlp")
    }

    pub async fn search(&self, query: &str) -> Result<Option<Streamable>> {
        Ok(self
            .search_info(query, 1)
            .await?
            .into_iter()
            .next()
            .map(info_to_streamable))
    }

    pub async fn streamable_from_url(&self, url: &str) -> Result<Streamable> {
        self.video_info(url).await.map(info_to_streamable)
    }

    /// URL de audio para un streamable.
    ///
    /// URLs de YouTube y URLs arbitrarias se reproducen tal cual. Los tracks
    /// con solo metadatos se buscan como `<artist> - <name>` y el resultado
    /// se cachea por track.
    pub async fn resolve(&self, streamable: &Streamable) -> Result<String> {
        if let Some(url) = &streamable.youtube_url {
            return Ok(url.clone());
        }
        if matches!(streamable.source, StreamableSource::YouTube | StreamableSource::Arbitrary) {
            return Ok(streamable.url.clone());
        }

        let source = streamable.source.to_string();
        if let Some(hit) = self.cache.get(&source, &streamable.id) {
            debug!("⚡ Resolución en cache para: {}", streamable);
            return Ok(hit.url);
        }

        let query = format!("{} - {}", streamable.artist.name, streamable.name);
        let found = self
            .search_info(&query, 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Sin resultados en YouTube para '{}'", query))?;

        let resolved = ResolvedTrack {
            url: found.page_url(),
            title: found.title.clone(),
            duration: found.duration.map(Duration::from_secs_f64),
        };
        info!("🔗 {} -> {}", streamable, resolved.url);
        self.cache.put(&source, &streamable.id, resolved.clone());

        Ok(resolved.url)
    }

    /// Crea un Input de Songbird para reproducción
    pub fn create_input(&self, url: &str) -> Input {
        YoutubeDl::new(self.http.clone(), url.to_string()).into()
    }

    /// Verifica que un binario externo esté disponible
    pub async fn check_binary(name: &str, version_arg: &str) -> Result<String> {
        let output = Command::new(name)
            .arg(version_arg)
            .output()
            .await
            .with_context(|| format!("{} no está instalado o no está en PATH", name))?;

        if !output.status.success() {
            warn!("❌ {} devolvió un error", name);
            anyhow::bail!("{} no puede ejecutarse correctamente", name);
        }

        let version = String::from_utf8_lossy(&output.stdout);
        Ok(version.lines().next().unwrap_or_default().trim().to_string())
    }
}

fn info_to_streamable(info: YtDlpInfo) -> Streamable {
    let url = info.page_url();
    let artist = ArtistRef::new(
        info.channel_id.clone().unwrap_or_default(),
        info.uploader.clone().unwrap_or_else(|| "YouTube".to_string()),
    );
    let mut streamable = Streamable::new(
        StreamableSource::YouTube,
        info.id,
        info.title,
        artist,
        url.clone(),
        info.duration.map(Duration::from_secs_f64).unwrap_or_default(),
    )
    .with_youtube_url(url);
    if let Some(thumbnail) = info.thumbnail {
        streamable = streamable.with_thumbnail(thumbnail);
    }
    streamable
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_youtube_url_detection() {
        assert!(YouTubeResolver::is_youtube_url(
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        ));
        assert!(YouTubeResolver::is_youtube_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(YouTubeResolver::is_youtube_url(
            "https://music.youtube.com/watch?v=test"
        ));
        assert!(!YouTubeResolver::is_youtube_url("https://example.com/video"));
        assert!(!YouTubeResolver::is_youtube_url(
            "https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC"
        ));
    }

    #[test]
    fn flat_search_result_becomes_youtube_streamable() {
        let info: YtDlpInfo = serde_json::from_str(
            r#"{"id":"dQw4w9WgXcQ","title":"Never Gonna Give You Up","duration":213.0,
                "uploader":"Rick Astley","url":"https://www.youtube.com/watch?v=dQw4w9WgXcQ"}"#,
        )
        .unwrap();

        let streamable = info_to_streamable(info);
        assert_eq!(streamable.source, StreamableSource::YouTube);
        assert_eq!(streamable.artist.name, "Rick Astley");
        assert_eq!(streamable.duration, Duration::from_secs(213));
        assert_eq!(
            streamable.youtube_url.as_deref(),
            Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
        );
    }

    #[tokio::test]
    async fn cached_and_direct_urls_skip_ytdlp() {
        let resolver = YouTubeResolver::new(ResolveCache::new(10, Duration::from_secs(60))).unwrap();

        let spotify = Streamable::new(
            StreamableSource::Spotify,
            "t1",
            "Song",
            ArtistRef::new("a", "Artist"),
            "https://open.spotify.com/track/t1",
            Duration::from_secs(100),
        );
        resolver.cache().put(
            "spotify",
            "t1",
            ResolvedTrack {
                url: "https://www.youtube.com/watch?v=cached".into(),
                title: "Song".into(),
                duration: None,
            },
        );
        assert_eq!(
            resolver.resolve(&spotify).await.unwrap(),
            "https://www.youtube.com/watch?v=cached"
        );

        let mut direct = spotify.clone();
        direct.source = StreamableSource::Arbitrary;
        direct.id = "x".into();
        direct.url = "https://cdn.example.com/a.mp3".into();
        assert_eq!(resolver.resolve(&direct).await.unwrap(), "https://cdn.example.com/a.mp3");
    }
}
