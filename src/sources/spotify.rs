use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use regex::Regex;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{de::DeserializeOwned, Deserialize};
use std::{
    collections::HashMap,
    sync::{Arc, LazyLock},
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    media::{AlbumRef, ArtistRef, AudioFeatures, Playable, PlayableKind, Streamable, StreamableSource},
    recommendation::RecommendationRequest,
    storage::MusicDatabase,
};

const ACCOUNTS_URL: &str = "https://accounts.spotify.com/api/token";
const API_URL: &str = "https://api.spotify.com/v1";

static SPOTIFY_URL: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^https?://(?:embed\.|open\.)spotify\.com/(?:intl-[a-z]{2}/)?(?:embed/)?(track|album|playlist|artist)/([0-9a-z]+)",
    )
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpotifyKind {
    Track,
    Album,
    Playlist,
    Artist,
}

impl SpotifyKind {
    fn from_str(kind: &str) -> Option<Self> {
        match kind.to_ascii_lowercase().as_str() {
            "track" => Some(Self::Track),
            "album" => Some(Self::Album),
            "playlist" => Some(Self::Playlist),
            "artist" => Some(Self::Artist),
            _ => None,
        }
    }
}

/// Referencia a un objeto de Spotify extraída de una URL o URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpotifyUri {
    pub kind: SpotifyKind,
    pub id: String,
}

impl SpotifyUri {
    /// Acepta `https://open.spotify.com/<tipo>/<id>` y `spotify:<tipo>:<id>`
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();

        if let Some(rest) = input.strip_prefix("spotify:") {
            let (kind, id) = rest.split_once(':')?;
            return Some(Self {
                kind: SpotifyKind::from_str(kind)?,
                id: id.to_string(),
            });
        }

        let captures = SPOTIFY_URL.as_ref().ok()?.captures(input)?;
        Some(Self {
            kind: SpotifyKind::from_str(captures.get(1)?.as_str())?,
            id: captures.get(2)?.as_str().to_string(),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct ExternalUrls {
    #[serde(default)]
    spotify: String,
}

#[derive(Debug, Deserialize)]
struct Image {
    url: String,
}

#[derive(Debug, Deserialize)]
struct Paging<T> {
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct SimpleArtist {
    id: Option<String>,
    name: String,
}

#[derive(Debug, Deserialize)]
struct SimpleAlbum {
    id: Option<String>,
    name: String,
    #[serde(default)]
    images: Vec<Image>,
    release_date: Option<String>,
    #[serde(default)]
    external_urls: ExternalUrls,
}

#[derive(Debug, Deserialize)]
struct TrackObject {
    id: Option<String>,
    name: String,
    duration_ms: u64,
    popularity: Option<u8>,
    explicit: Option<bool>,
    #[serde(default)]
    artists: Vec<SimpleArtist>,
    album: Option<SimpleAlbum>,
    #[serde(default)]
    external_urls: ExternalUrls,
}

#[derive(Debug, Deserialize)]
struct FullArtist {
    id: String,
    name: String,
    #[serde(default)]
    genres: Vec<String>,
    popularity: Option<u8>,
    #[serde(default)]
    images: Vec<Image>,
    #[serde(default)]
    external_urls: ExternalUrls,
}

#[derive(Debug, Deserialize)]
struct SimpleTrack {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FullAlbum {
    id: String,
    name: String,
    #[serde(default)]
    genres: Vec<String>,
    #[serde(default)]
    images: Vec<Image>,
    release_date: Option<String>,
    #[serde(default)]
    external_urls: ExternalUrls,
    #[serde(default)]
    artists: Vec<SimpleArtist>,
    tracks: Option<Paging<SimpleTrack>>,
}

#[derive(Debug, Deserialize)]
struct PlaylistOwner {
    id: String,
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    track: Option<TrackObject>,
}

#[derive(Debug, Deserialize)]
struct FullPlaylist {
    id: String,
    name: String,
    description: Option<String>,
    #[serde(default)]
    images: Vec<Image>,
    #[serde(default)]
    external_urls: ExternalUrls,
    owner: PlaylistOwner,
    tracks: Paging<PlaylistItem>,
}

#[derive(Debug, Deserialize)]
struct SimplePlaylist {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AudioFeaturesObject {
    id: String,
    acousticness: Option<f64>,
    danceability: Option<f64>,
    energy: Option<f64>,
    instrumentalness: Option<f64>,
    key: Option<i32>,
    liveness: Option<f64>,
    loudness: Option<f64>,
    mode: Option<i32>,
    speechiness: Option<f64>,
    tempo: Option<f64>,
    time_signature: Option<i32>,
    valence: Option<f64>,
}

impl From<&AudioFeaturesObject> for AudioFeatures {
    fn from(f: &AudioFeaturesObject) -> Self {
        Self {
            exists: true,
            acousticness: f.acousticness,
            danceability: f.danceability,
            energy: f.energy,
            instrumentalness: f.instrumentalness,
            key: f.key,
            liveness: f.liveness,
            loudness: f.loudness,
            mode: f.mode,
            speechiness: f.speechiness,
            tempo: f.tempo,
            time_signature: f.time_signature,
            valence: f.valence,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    tracks: Option<Paging<TrackObject>>,
    albums: Option<Paging<SimpleAlbum>>,
    artists: Option<Paging<FullArtist>>,
    playlists: Option<Paging<Option<SimplePlaylist>>>,
}

#[derive(Debug, Deserialize)]
struct TracksResponse {
    tracks: Vec<Option<TrackObject>>,
}

#[derive(Debug, Deserialize)]
struct ArtistsResponse {
    artists: Vec<Option<FullArtist>>,
}

#[derive(Debug, Deserialize)]
struct AlbumsResponse {
    albums: Vec<Option<FullAlbum>>,
}

#[derive(Debug, Deserialize)]
struct AudioFeaturesResponse {
    audio_features: Vec<Option<AudioFeaturesObject>>,
}

#[derive(Debug, Deserialize)]
struct TopTracksResponse {
    tracks: Vec<TrackObject>,
}

#[derive(Debug, Deserialize)]
struct RecommendationsResponse {
    tracks: Vec<TrackObject>,
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

/// Cliente de la Spotify Web API (flujo client-credentials)
pub struct SpotifyClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    market: String,
    token: Mutex<Option<AccessToken>>,
    database: Option<Arc<dyn MusicDatabase>>,
}

impl SpotifyClient {
    pub fn new(
        client_id: String,
        client_secret: String,
        market: String,
        database: Option<Arc<dyn MusicDatabase>>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            http,
            client_id,
            client_secret,
            market,
            token: Mutex::new(None),
            database,
        })
    }

    async fn access_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        if let Some(current) = token.as_ref() {
            if current.expires_at > Instant::now() + Duration::from_secs(30) {
                return Ok(current.value.clone());
            }
        }

        debug!("🔑 Solicitando token de Spotify");
        let credentials = STANDARD.encode(format!("{}:{}", self.client_id, self.client_secret));
        let response: TokenResponse = self
            .http
            .post(ACCOUNTS_URL)
            .header(AUTHORIZATION, format!("Basic {}", credentials))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
            .send()
            .await?
            .error_for_status()
            .context("Spotify rechazó las credenciales")?
            .json()
            .await?;

        let value = response.access_token.clone();
        *token = Some(AccessToken {
            value: response.access_token,
            expires_at: Instant::now() + Duration::from_secs(response.expires_in),
        });
        Ok(value)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(format!("{}{}", API_URL, path))
            .bearer_auth(token)
            .query(query)
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("Spotify GET {}", path))?;

        Ok(response.json().await?)
    }

    /// Búsqueda de texto libre; prioriza track, álbum, artista y playlist en ese orden
    pub async fn search_text(&self, query: &str) -> Result<Option<Playable>> {
        let result: SearchResult = self
            .get(
                "/search",
                &[
                    ("q", query.to_string()),
                    ("type", "track,album,artist,playlist".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;

        if let Some(track) = result.tracks.and_then(|p| p.items.into_iter().next()) {
            return Ok(self.tracks_to_playables(vec![track]).await?.into_iter().next());
        }
        if let Some(id) = result.albums.and_then(|p| p.items.into_iter().next()).and_then(|a| a.id) {
            return self.album(&id).await.map(Some);
        }
        if let Some(artist) = result.artists.and_then(|p| p.items.into_iter().next()) {
            return self.artist(&artist.id).await.map(Some);
        }
        if let Some(playlist) = result
            .playlists
            .and_then(|p| p.items.into_iter().flatten().next())
        {
            return self.playlist(&playlist.id).await.map(Some);
        }

        Ok(None)
    }

    /// Busca el primer track que coincida con `query`
    pub async fn search_track(&self, query: &str) -> Result<Option<Playable>> {
        let result: SearchResult = self
            .get(
                "/search",
                &[
                    ("q", query.to_string()),
                    ("type", "track".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;

        match result.tracks.and_then(|p| p.items.into_iter().next()) {
            Some(track) => Ok(self.tracks_to_playables(vec![track]).await?.into_iter().next()),
            None => Ok(None),
        }
    }

    /// Busca el primer artista que coincida con `query`
    pub async fn search_artist(&self, query: &str) -> Result<Option<Playable>> {
        let result: SearchResult = self
            .get(
                "/search",
                &[
                    ("q", query.to_string()),
                    ("type", "artist".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;

        match result.artists.and_then(|p| p.items.into_iter().next()) {
            Some(artist) => self.artist(&artist.id).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn lookup(&self, uri: &SpotifyUri) -> Result<Playable> {
        match uri.kind {
            SpotifyKind::Track => {
                let track: TrackObject = self.get(&format!("/tracks/{}", uri.id), &[]).await?;
                self.tracks_to_playables(vec![track])
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("Track sin id: {}", uri.id))
            }
            SpotifyKind::Album => self.album(&uri.id).await,
            SpotifyKind::Artist => self.artist(&uri.id).await,
            SpotifyKind::Playlist => self.playlist(&uri.id).await,
        }
    }

    async fn album(&self, id: &str) -> Result<Playable> {
        let album: FullAlbum = self.get(&format!("/albums/{}", id), &[]).await?;
        let track_ids: Vec<String> = album
            .tracks
            .iter()
            .flat_map(|p| p.items.iter())
            .filter_map(|t| t.id.clone())
            .collect();
        let tracks = self.full_tracks(&track_ids).await?;
        let streamables = self.to_streamables(tracks).await?;

        let artist = match album.artists.first().and_then(|a| a.id.clone()) {
            Some(artist_id) => {
                let full: FullArtist = self.get(&format!("/artists/{}", artist_id), &[]).await?;
                artist_ref(&full)
            }
            None => ArtistRef::default(),
        };

        let mut playable = Playable::new(
            PlayableKind::Album,
            album.id,
            album.name,
            artist,
            album.external_urls.spotify,
            streamables,
        );
        if let Some(image) = album.images.into_iter().next() {
            playable = playable.with_thumbnail(image.url);
        }
        info!("💿 Álbum resuelto: {} ({} tracks)", playable.name, playable.streamables.len());
        Ok(playable)
    }

    async fn artist(&self, id: &str) -> Result<Playable> {
        let artist: FullArtist = self.get(&format!("/artists/{}", id), &[]).await?;
        let top: TopTracksResponse = self
            .get(
                &format!("/artists/{}/top-tracks", id),
                &[("market", self.market.clone())],
            )
            .await?;
        let streamables = self.to_streamables(top.tracks).await?;

        let mut playable = Playable::new(
            PlayableKind::Artist,
            artist.id.clone(),
            artist.name.clone(),
            artist_ref(&artist),
            artist.external_urls.spotify.clone(),
            streamables,
        );
        if let Some(image) = artist.images.first() {
            playable = playable.with_thumbnail(image.url.clone());
        }
        Ok(playable)
    }

    async fn playlist(&self, id: &str) -> Result<Playable> {
        let playlist: FullPlaylist = self.get(&format!("/playlists/{}", id), &[]).await?;
        let tracks = playlist
            .tracks
            .items
            .into_iter()
            .filter_map(|item| item.track)
            .collect();
        let streamables = self.to_streamables(tracks).await?;

        let owner = ArtistRef::new(
            playlist.owner.id.clone(),
            playlist.owner.display_name.unwrap_or(playlist.owner.id),
        );
        let mut playable = Playable::new(
            PlayableKind::Playlist,
            playlist.id,
            playlist.name,
            owner,
            playlist.external_urls.spotify,
            streamables,
        );
        playable.description = playlist.description;
        if let Some(image) = playlist.images.into_iter().next() {
            playable = playable.with_thumbnail(image.url);
        }
        Ok(playable)
    }

    async fn full_tracks(&self, ids: &[String]) -> Result<Vec<TrackObject>> {
        let mut tracks = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(50) {
            let response: TracksResponse = self
                .get("/tracks", &[("ids", chunk.join(","))])
                .await?;
            tracks.extend(response.tracks.into_iter().flatten());
        }
        Ok(tracks)
    }

    async fn tracks_to_playables(&self, tracks: Vec<TrackObject>) -> Result<Vec<Playable>> {
        Ok(self
            .to_streamables(tracks)
            .await?
            .iter()
            .map(Streamable::to_playable)
            .collect())
    }

    /// Enriquece tracks con artista, álbum y audio features.
    ///
    /// Las audio features son opcionales: algunas aplicaciones no tienen
    /// acceso al endpoint y los streamables se arman sin ellas.
    async fn to_streamables(&self, tracks: Vec<TrackObject>) -> Result<Vec<Streamable>> {
        let tracks: Vec<TrackObject> = tracks.into_iter().filter(|t| t.id.is_some()).collect();
        if tracks.is_empty() {
            return Ok(Vec::new());
        }

        let track_ids: Vec<String> = tracks.iter().filter_map(|t| t.id.clone()).collect();
        let artist_ids = unique(tracks.iter().filter_map(|t| t.artists.first()?.id.clone()));
        let album_ids = unique(tracks.iter().filter_map(|t| t.album.as_ref()?.id.clone()));

        let mut features = HashMap::new();
        for chunk in track_ids.chunks(100) {
            match self
                .get::<AudioFeaturesResponse>("/audio-features", &[("ids", chunk.join(","))])
                .await
            {
                Ok(response) => features.extend(
                    response
                        .audio_features
                        .into_iter()
                        .flatten()
                        .map(|f| (f.id.clone(), f)),
                ),
                Err(e) => {
                    warn!("⚠️ Audio features no disponibles: {}", e);
                    break;
                }
            }
        }

        let mut artists = HashMap::new();
        for chunk in artist_ids.chunks(50) {
            let response: ArtistsResponse = self.get("/artists", &[("ids", chunk.join(","))]).await?;
            artists.extend(response.artists.into_iter().flatten().map(|a| (a.id.clone(), a)));
        }

        let mut albums = HashMap::new();
        for chunk in album_ids.chunks(20) {
            let response: AlbumsResponse = self.get("/albums", &[("ids", chunk.join(","))]).await?;
            albums.extend(response.albums.into_iter().flatten().map(|a| (a.id.clone(), a)));
        }

        let streamables: Vec<Streamable> = tracks
            .iter()
            .filter_map(|track| {
                let artist = track
                    .artists
                    .first()
                    .and_then(|a| a.id.as_ref())
                    .and_then(|id| artists.get(id));
                let album = track
                    .album
                    .as_ref()
                    .and_then(|a| a.id.as_ref())
                    .and_then(|id| albums.get(id));
                let features = track.id.as_ref().and_then(|id| features.get(id));
                streamable_from(track, artist, album, features)
            })
            .collect();

        if let Some(database) = &self.database {
            if let Err(e) = database.get_or_add_tracks(&streamables).await {
                warn!("⚠️ No se pudieron guardar tracks en la biblioteca: {}", e);
            }
        }

        Ok(streamables)
    }

    /// Pide recomendaciones; sin tracks ni artistas semilla no hay nada que pedir
    pub async fn recommendations(&self, request: &RecommendationRequest) -> Result<Vec<Playable>> {
        if !request.has_entity_seeds() {
            debug!("Solicitud de recomendaciones sin tracks ni artistas, se omite");
            return Ok(Vec::new());
        }

        let query = recommendation_query(request, &self.market);
        let response: RecommendationsResponse = self.get("/recommendations", &query).await?;
        debug!("🎯 Spotify devolvió {} recomendaciones", response.tracks.len());

        self.tracks_to_playables(response.tracks).await
    }
}

fn unique(ids: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = Vec::new();
    for id in ids {
        if !seen.contains(&id) {
            seen.push(id);
        }
    }
    seen
}

fn artist_ref(artist: &FullArtist) -> ArtistRef {
    ArtistRef {
        id: artist.id.clone(),
        name: artist.name.clone(),
        url: Some(artist.external_urls.spotify.clone()),
        genres: artist.genres.clone(),
        popularity: artist.popularity,
    }
}

fn streamable_from(
    track: &TrackObject,
    artist: Option<&FullArtist>,
    album: Option<&FullAlbum>,
    features: Option<&AudioFeaturesObject>,
) -> Option<Streamable> {
    let id = track.id.clone()?;

    let artist = match artist {
        Some(full) => artist_ref(full),
        None => track
            .artists
            .first()
            .map(|a| ArtistRef::new(a.id.clone().unwrap_or_default(), a.name.clone()))
            .unwrap_or_default(),
    };

    let album_ref = match (album, track.album.as_ref()) {
        (Some(full), _) => Some(AlbumRef {
            id: full.id.clone(),
            name: full.name.clone(),
            url: Some(full.external_urls.spotify.clone()),
            thumbnail: full.images.first().map(|i| i.url.clone()),
            genres: full.genres.clone(),
            release_date: full.release_date.clone(),
        }),
        (None, Some(simple)) => Some(AlbumRef {
            id: simple.id.clone().unwrap_or_default(),
            name: simple.name.clone(),
            url: Some(simple.external_urls.spotify.clone()),
            thumbnail: simple.images.first().map(|i| i.url.clone()),
            genres: Vec::new(),
            release_date: simple.release_date.clone(),
        }),
        (None, None) => None,
    };

    let mut streamable = Streamable::new(
        StreamableSource::Spotify,
        id,
        track.name.clone(),
        artist,
        track.external_urls.spotify.clone(),
        Duration::from_millis(track.duration_ms),
    );
    streamable.explicit = track.explicit;
    if let Some(popularity) = track.popularity {
        streamable = streamable.with_popularity(popularity);
    }
    if let Some(thumbnail) = album_ref.as_ref().and_then(|a| a.thumbnail.clone()) {
        streamable = streamable.with_thumbnail(thumbnail);
    }
    if let Some(album_ref) = album_ref {
        streamable = streamable.with_album(album_ref);
    }
    if let Some(features) = features {
        streamable = streamable.with_audio_features(AudioFeatures::from(features));
    }

    Some(streamable)
}

fn recommendation_query(request: &RecommendationRequest, market: &str) -> Vec<(&'static str, String)> {
    let (tracks, artists, genres) = request.fit_seed_budget();
    let mut query = vec![
        ("limit", request.limit.clamp(1, 100).to_string()),
        ("market", market.to_string()),
    ];
    if !tracks.is_empty() {
        query.push(("seed_tracks", tracks.join(",")));
    }
    if !artists.is_empty() {
        query.push(("seed_artists", artists.join(",")));
    }
    if !genres.is_empty() {
        query.push(("seed_genres", genres.join(",")));
    }
    if let Some(targets) = &request.targets {
        query.extend(targets.params().into_iter().map(|(k, v)| (k, v.to_string())));
    }
    query
}
