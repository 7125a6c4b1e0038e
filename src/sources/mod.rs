//! Metadata and search providers.
//!
//! [`MetadataProvider`] is the contract the queue and the recommender use.
//! [`SourceManager`] implements it on top of the Spotify Web API and yt-dlp.

pub mod spotify;
pub mod youtube;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use spotify::{SpotifyClient, SpotifyUri};
pub use youtube::YouTubeResolver;

use crate::{media::Playable, recommendation::RecommendationRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchCode {
    Success,
    NoMatches,
    InvalidQuery,
    InvalidURL,
    InternalDatabaseError,
}

/// Resultado de buscar una sola consulta
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResponse {
    pub query: String,
    pub code: SearchCode,
    pub details: Option<String>,
    pub playable: Option<Playable>,
}

impl SearchResponse {
    pub fn success(query: impl Into<String>, playable: Playable) -> Self {
        Self {
            query: query.into(),
            code: SearchCode::Success,
            details: None,
            playable: Some(playable),
        }
    }

    pub fn failure(query: impl Into<String>, code: SearchCode, details: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            code,
            details: Some(details.into()),
            playable: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == SearchCode::Success && self.playable.is_some()
    }
}

/// Contrato del proveedor de metadata/búsqueda
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Busca una consulta; varias consultas se separan con comas
    async fn search(&self, query: &str) -> Result<Vec<SearchResponse>>;

    async fn search_tracks(&self, names: &[String]) -> Result<Vec<SearchResponse>>;

    async fn search_artists(&self, names: &[String]) -> Result<Vec<SearchResponse>>;

    async fn recommend(&self, request: &RecommendationRequest) -> Result<Vec<Playable>>;
}

/// Qué tipo de consulta escribió el usuario
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
    Spotify(SpotifyUri),
    YouTube,
    UnsupportedUrl,
    Text,
}

impl QueryKind {
    pub fn classify(query: &str) -> Self {
        let lower = query.trim().to_lowercase();
        if let Some(uri) = SpotifyUri::parse(query) {
            return Self::Spotify(uri);
        }
        if YouTubeResolver::is_youtube_url(query) {
            return Self::YouTube;
        }
        if lower.starts_with("http") || lower.contains(".com/") {
            return Self::UnsupportedUrl;
        }
        Self::Text
    }
}

/// Divide la entrada del usuario en consultas individuales
pub fn split_queries(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_string)
        .collect()
}

/// Manager para todas las fuentes de música
pub struct SourceManager {
    spotify: Option<SpotifyClient>,
    youtube: Arc<YouTubeResolver>,
}

impl SourceManager {
    pub fn new(spotify: Option<SpotifyClient>, youtube: Arc<YouTubeResolver>) -> Self {
        if spotify.is_none() {
            warn!("⚠️ Spotify no configurado: búsqueda solo por YouTube y sin autoplay");
        }
        Self { spotify, youtube }
    }

    fn spotify(&self) -> Result<&SpotifyClient> {
        self.spotify
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Spotify no está configurado"))
    }

    async fn search_one(&self, query: String) -> SearchResponse {
        let result = match QueryKind::classify(&query) {
            QueryKind::Spotify(uri) => match &self.spotify {
                Some(spotify) => spotify.lookup(&uri).await.map(Some),
                None => {
                    return SearchResponse::failure(
                        query,
                        SearchCode::InvalidURL,
                        "Spotify no está configurado",
                    )
                }
            },
            QueryKind::YouTube => self
                .youtube
                .streamable_from_url(&query)
                .await
                .map(|s| Some(s.to_playable())),
            QueryKind::UnsupportedUrl => {
                return SearchResponse::failure(query, SearchCode::InvalidURL, "Fuente no soportada")
            }
            QueryKind::Text => match &self.spotify {
                Some(spotify) => spotify.search_text(&query).await,
                None => self
                    .youtube
                    .search(&query)
                    .await
                    .map(|s| s.map(|s| s.to_playable())),
            },
        };

        match result {
            Ok(Some(playable)) => SearchResponse::success(query, playable),
            Ok(None) => SearchResponse::failure(query, SearchCode::NoMatches, "Sin resultados"),
            Err(e) => {
                warn!("❌ Búsqueda fallida para '{}': {}", query, e);
                SearchResponse::failure(query, SearchCode::InvalidQuery, e.to_string())
            }
        }
    }
}

#[async_trait]
impl MetadataProvider for SourceManager {
    async fn search(&self, query: &str) -> Result<Vec<SearchResponse>> {
        let queries = split_queries(query);
        if queries.is_empty() {
            return Ok(vec![SearchResponse::failure(
                query,
                SearchCode::InvalidQuery,
                "Consulta vacía",
            )]);
        }

        let responses = join_all(queries.into_iter().map(|q| self.search_one(q))).await;
        info!(
            "🔍 Búsqueda completa: {}/{} con resultados",
            responses.iter().filter(|r| r.is_success()).count(),
            responses.len()
        );
        Ok(responses)
    }

    async fn search_tracks(&self, names: &[String]) -> Result<Vec<SearchResponse>> {
        let spotify = self.spotify()?;
        let mut responses = Vec::with_capacity(names.len());
        for name in names {
            let response = match spotify.search_track(name).await? {
                Some(playable) => SearchResponse::success(name.clone(), playable),
                None => SearchResponse::failure(name.clone(), SearchCode::NoMatches, "Sin resultados"),
            };
            responses.push(response);
        }
        Ok(responses)
    }

    async fn search_artists(&self, names: &[String]) -> Result<Vec<SearchResponse>> {
        let spotify = self.spotify()?;
        let mut responses = Vec::with_capacity(names.len());
        for name in names {
            let response = match spotify.search_artist(name).await? {
                Some(playable) => SearchResponse::success(name.clone(), playable),
                None => SearchResponse::failure(name.clone(), SearchCode::NoMatches, "Sin resultados"),
            };
            responses.push(response);
        }
        Ok(responses)
    }

    async fn recommend(&self, request: &RecommendationRequest) -> Result<Vec<Playable>> {
        debug!(
            "🎯 Recomendaciones: {} tracks, {} artistas, {} géneros (limit {})",
            request.seed_tracks.len(),
            request.seed_artists.len(),
            request.seed_genres.len(),
            request.limit
        );
        self.spotify()?.recommendations(request).await
    }
}
