//! Persistence collaborator.
//!
//! The core only talks to [`MusicDatabase`]. The bundled implementation keeps
//! the whole library in a single JSON document under `DATA_DIR`, loaded at
//! startup and rewritten after every mutation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use std::{collections::HashMap, path::PathBuf};
use tokio::{fs, sync::RwLock};
use tracing::{debug, info};

use crate::media::{AudioFeatures, Streamable, StreamableSource};

/// Reacción de un usuario sobre un track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InteractionType {
    Play,
    Skip,
    Like,
    Love,
    Dislike,
    Hate,
}

impl InteractionType {
    pub fn play_delta(self) -> i64 {
        match self {
            Self::Play => 1,
            Self::Skip => -1,
            _ => 0,
        }
    }

    pub fn rating_delta(self) -> i64 {
        match self {
            Self::Like => 1,
            Self::Love => 2,
            Self::Dislike => -1,
            Self::Hate => -2,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub play_count: i64,
    pub rating: i64,
    pub last_interaction: DateTime<Utc>,
}

impl Interaction {
    pub fn new(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            play_count: 0,
            rating: 0,
            last_interaction: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Track,
    Album,
    Artist,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub id: String,
    pub name: String,
    pub artist_id: String,
    pub album_id: Option<String>,
    pub duration_secs: f64,
    pub popularity: Option<f64>,
    pub features: AudioFeatures,
}

impl TrackRecord {
    pub fn features_exist(&self) -> bool {
        self.features.exists
    }
}

impl From<&Streamable> for TrackRecord {
    fn from(streamable: &Streamable) -> Self {
        Self {
            id: streamable.id.clone(),
            name: streamable.name.clone(),
            artist_id: streamable.artist.id.clone(),
            album_id: streamable.album.as_ref().map(|a| a.id.clone()),
            duration_secs: streamable.duration.as_secs_f64(),
            popularity: streamable.popularity.map(f64::from),
            features: streamable.audio_features.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtistRecord {
    pub id: String,
    pub name: String,
    pub genres: Vec<String>,
    pub track_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlbumRecord {
    pub id: String,
    pub name: String,
    pub artist_id: Option<String>,
    pub genres: Vec<String>,
    pub track_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    #[serde(default)]
    pub track_ratings: Vec<Interaction>,
    #[serde(default)]
    pub album_ratings: Vec<Interaction>,
    #[serde(default)]
    pub artist_ratings: Vec<Interaction>,
}

impl UserRecord {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            track_ratings: Vec::new(),
            album_ratings: Vec::new(),
            artist_ratings: Vec::new(),
        }
    }

    pub fn interact(&mut self, kind: EntityKind, id: &str, interaction: InteractionType, now: DateTime<Utc>) {
        let ratings = match kind {
            EntityKind::Track => &mut self.track_ratings,
            EntityKind::Album => &mut self.album_ratings,
            EntityKind::Artist => &mut self.artist_ratings,
        };

        let entry = match ratings.iter().position(|r| r.id == id) {
            Some(index) => &mut ratings[index],
            None => {
                ratings.push(Interaction::new(id, now));
                let last = ratings.len() - 1;
                &mut ratings[last]
            }
        };

        entry.play_count += interaction.play_delta();
        entry.rating += interaction.rating_delta();
        entry.last_interaction = now;
    }

    /// Valoraciones de tracks, de mayor a menor
    pub fn sorted_track_ratings(&self) -> Vec<Interaction> {
        sorted_by_rating(&self.track_ratings)
    }

    pub fn sorted_artist_ratings(&self) -> Vec<Interaction> {
        sorted_by_rating(&self.artist_ratings)
    }
}

fn sorted_by_rating(ratings: &[Interaction]) -> Vec<Interaction> {
    let mut sorted = ratings.to_vec();
    sorted.sort_by(|a, b| b.rating.cmp(&a.rating));
    sorted
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistRecord {
    pub name: String,
    pub owner_id: UserId,
    pub track_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Contrato de persistencia que usa el núcleo.
///
/// Cada implementación garantiza que get-or-add sea atómico; ni la cola ni el
/// recomendador escriben filas directamente.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MusicDatabase: Send + Sync {
    async fn user(&self, id: UserId) -> Result<Option<UserRecord>>;

    async fn users(&self, ids: &[UserId]) -> Result<Vec<UserRecord>>;

    async fn tracks(&self, ids: &[String]) -> Result<Vec<TrackRecord>>;

    async fn artist(&self, id: &str) -> Result<Option<ArtistRecord>>;

    async fn album(&self, id: &str) -> Result<Option<AlbumRecord>>;

    async fn get_or_add_tracks(&self, streamables: &[Streamable]) -> Result<Vec<TrackRecord>>;

    async fn record_interaction(
        &self,
        user: UserId,
        interaction: InteractionType,
        streamables: &[Streamable],
    ) -> Result<()>;

    async fn playlist_by_name(&self, name: &str) -> Result<Option<PlaylistRecord>>;

    async fn user_playlists(&self, owner: UserId) -> Result<Vec<PlaylistRecord>>;

    async fn create_playlist(
        &self,
        owner: UserId,
        name: &str,
        streamables: &[Streamable],
    ) -> Result<PlaylistRecord>;

    /// Agrega tracks sin duplicar; devuelve cuántos se agregaron
    async fn add_to_playlist(&self, name: &str, streamables: &[Streamable]) -> Result<usize>;

    async fn delete_playlist(&self, name: &str) -> Result<bool>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Library {
    #[serde(default)]
    tracks: HashMap<String, TrackRecord>,
    #[serde(default)]
    artists: HashMap<String, ArtistRecord>,
    #[serde(default)]
    albums: HashMap<String, AlbumRecord>,
    #[serde(default)]
    users: HashMap<u64, UserRecord>,
    #[serde(default)]
    playlists: Vec<PlaylistRecord>,
}

impl Library {
    fn get_or_add_tracks(&mut self, streamables: &[Streamable]) -> (Vec<TrackRecord>, usize) {
        let mut added = 0;
        let mut records = Vec::with_capacity(streamables.len());

        for streamable in streamables {
            if let Some(existing) = self.tracks.get(&streamable.id) {
                if !records.iter().any(|r: &TrackRecord| r.id == existing.id) {
                    records.push(existing.clone());
                }
                continue;
            }

            let record = TrackRecord::from(streamable);
            added += 1;

            let artist = self
                .artists
                .entry(streamable.artist.id.clone())
                .or_insert_with(|| ArtistRecord {
                    id: streamable.artist.id.clone(),
                    name: streamable.artist.name.clone(),
                    genres: streamable.artist.genres.clone(),
                    track_ids: Vec::new(),
                });
            artist.track_ids.push(record.id.clone());

            if let Some(album_ref) = &streamable.album {
                let album = self
                    .albums
                    .entry(album_ref.id.clone())
                    .or_insert_with(|| AlbumRecord {
                        id: album_ref.id.clone(),
                        name: album_ref.name.clone(),
                        artist_id: Some(streamable.artist.id.clone()),
                        genres: album_ref.genres.clone(),
                        track_ids: Vec::new(),
                    });
                album.track_ids.push(record.id.clone());
            }

            self.tracks.insert(record.id.clone(), record.clone());
            records.push(record);
        }

        (records, added)
    }
}

/// Base de datos basada en un archivo JSON
pub struct JsonDatabase {
    path: PathBuf,
    library: RwLock<Library>,
}

impl JsonDatabase {
    pub async fn open(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&data_dir).await?;
        let path = data_dir.join("library.json");

        let library = match fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("library corrupta en {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Library::default(),
            Err(e) => return Err(e.into()),
        };

        info!("📁 Biblioteca cargada desde: {}", path.display());

        Ok(Self {
            path,
            library: RwLock::new(library),
        })
    }

    pub async fn stats(&self) -> StorageStats {
        let library = self.library.read().await;
        StorageStats {
            tracks: library.tracks.len(),
            artists: library.artists.len(),
            albums: library.albums.len(),
            users: library.users.len(),
            playlists: library.playlists.len(),
            path: self.path.clone(),
        }
    }

    async fn save(&self, library: &Library) -> Result<()> {
        let content = serde_json::to_string_pretty(library)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.path).await?;
        debug!("💾 Biblioteca guardada en {}", self.path.display());
        Ok(())
    }
}

#[async_trait]
impl MusicDatabase for JsonDatabase {
    async fn user(&self, id: UserId) -> Result<Option<UserRecord>> {
        Ok(self.library.read().await.users.get(&id.get()).cloned())
    }

    async fn users(&self, ids: &[UserId]) -> Result<Vec<UserRecord>> {
        let library = self.library.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| library.users.get(&id.get()).cloned())
            .collect())
    }

    async fn tracks(&self, ids: &[String]) -> Result<Vec<TrackRecord>> {
        let library = self.library.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| library.tracks.get(id).cloned())
            .collect())
    }

    async fn artist(&self, id: &str) -> Result<Option<ArtistRecord>> {
        Ok(self.library.read().await.artists.get(id).cloned())
    }

    async fn album(&self, id: &str) -> Result<Option<AlbumRecord>> {
        Ok(self.library.read().await.albums.get(id).cloned())
    }

    async fn get_or_add_tracks(&self, streamables: &[Streamable]) -> Result<Vec<TrackRecord>> {
        let mut library = self.library.write().await;
        let (records, added) = library.get_or_add_tracks(streamables);
        if added > 0 {
            info!("➕ {} tracks nuevos en la biblioteca", added);
            self.save(&library).await?;
        }
        Ok(records)
    }

    async fn record_interaction(
        &self,
        user: UserId,
        interaction: InteractionType,
        streamables: &[Streamable],
    ) -> Result<()> {
        let eligible: Vec<Streamable> = streamables
            .iter()
            .filter(|s| s.has_audio_features() && s.source != StreamableSource::YouTube)
            .cloned()
            .collect();
        if eligible.is_empty() {
            return Ok(());
        }

        let mut library = self.library.write().await;
        let (tracks, _) = library.get_or_add_tracks(&eligible);
        let now = Utc::now();

        let record = library
            .users
            .entry(user.get())
            .or_insert_with(|| UserRecord::new(user));
        for track in &tracks {
            record.interact(EntityKind::Track, &track.id, interaction, now);
            record.interact(EntityKind::Artist, &track.artist_id, interaction, now);
            if let Some(album_id) = &track.album_id {
                record.interact(EntityKind::Album, album_id, interaction, now);
            }
        }

        debug!(
            "📝 {:?} registrado para {} en {} tracks",
            interaction,
            user,
            tracks.len()
        );
        self.save(&library).await
    }

    async fn playlist_by_name(&self, name: &str) -> Result<Option<PlaylistRecord>> {
        let library = self.library.read().await;
        Ok(library.playlists.iter().find(|p| p.name == name).cloned())
    }

    async fn user_playlists(&self, owner: UserId) -> Result<Vec<PlaylistRecord>> {
        let library = self.library.read().await;
        Ok(library
            .playlists
            .iter()
            .filter(|p| p.owner_id == owner)
            .cloned()
            .collect())
    }

    async fn create_playlist(
        &self,
        owner: UserId,
        name: &str,
        streamables: &[Streamable],
    ) -> Result<PlaylistRecord> {
        let mut library = self.library.write().await;
        if library.playlists.iter().any(|p| p.name == name) {
            anyhow::bail!("Ya existe una playlist llamada '{}'", name);
        }

        library.users.entry(owner.get()).or_insert_with(|| UserRecord::new(owner));
        let (tracks, _) = library.get_or_add_tracks(streamables);
        let playlist = PlaylistRecord {
            name: name.to_string(),
            owner_id: owner,
            track_ids: tracks.into_iter().map(|t| t.id).collect(),
            created_at: Utc::now(),
        };
        library.playlists.push(playlist.clone());
        self.save(&library).await?;

        info!("📋 Playlist '{}' creada con {} tracks", name, playlist.track_ids.len());
        Ok(playlist)
    }

    async fn add_to_playlist(&self, name: &str, streamables: &[Streamable]) -> Result<usize> {
        let mut library = self.library.write().await;
        let (tracks, _) = library.get_or_add_tracks(streamables);

        let playlist = library
            .playlists
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| anyhow::anyhow!("No existe la playlist '{}'", name))?;

        let before = playlist.track_ids.len();
        for track in tracks {
            if !playlist.track_ids.contains(&track.id) {
                playlist.track_ids.push(track.id);
            }
        }
        let added = playlist.track_ids.len() - before;

        if added > 0 {
            self.save(&library).await?;
        }
        Ok(added)
    }

    async fn delete_playlist(&self, name: &str) -> Result<bool> {
        let mut library = self.library.write().await;
        let before = library.playlists.len();
        library.playlists.retain(|p| p.name != name);
        let removed = library.playlists.len() != before;
        if removed {
            self.save(&library).await?;
            info!("🗑️ Playlist '{}' eliminada", name);
        }
        Ok(removed)
    }
}

/// Estadísticas de almacenamiento
#[derive(Debug)]
pub struct StorageStats {
    pub tracks: usize,
    pub artists: usize,
    pub albums: usize,
    pub users: usize,
    pub playlists: usize,
    pub path: PathBuf,
}

impl std::fmt::Display for StorageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "📊 Library Stats:\n\
             📁 File: {}\n\
             🎵 Tracks: {} ({} artists, {} albums)\n\
             👤 Users: {}\n\
             📋 Playlists: {}",
            self.path.display(),
            self.tracks,
            self.artists,
            self.albums,
            self.users,
            self.playlists
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{AlbumRef, ArtistRef};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn featured(id: &str) -> Streamable {
        Streamable::new(
            StreamableSource::Spotify,
            id,
            format!("Track {id}"),
            ArtistRef::new("artist-1", "Artist"),
            format!("https://open.spotify.com/track/{id}"),
            Duration::from_secs(200),
        )
        .with_album(AlbumRef {
            id: "album-1".into(),
            name: "Album".into(),
            genres: vec!["rock".into()],
            ..Default::default()
        })
        .with_audio_features(AudioFeatures {
            exists: true,
            energy: Some(0.7),
            ..Default::default()
        })
    }

    #[test]
    fn interaction_deltas() {
        let now = Utc::now();
        let mut user = UserRecord::new(UserId::new(1));
        user.interact(EntityKind::Track, "t", InteractionType::Play, now);
        user.interact(EntityKind::Track, "t", InteractionType::Play, now);
        user.interact(EntityKind::Track, "t", InteractionType::Skip, now);
        user.interact(EntityKind::Track, "t", InteractionType::Love, now);
        user.interact(EntityKind::Track, "t", InteractionType::Dislike, now);
        user.interact(EntityKind::Artist, "a", InteractionType::Hate, now);

        assert_eq!(user.track_ratings.len(), 1);
        assert_eq!(user.track_ratings[0].play_count, 1);
        assert_eq!(user.track_ratings[0].rating, 1);
        assert_eq!(user.artist_ratings[0].rating, -2);
        assert!(user.album_ratings.is_empty());
    }

    #[test]
    fn sorted_ratings_are_descending() {
        let now = Utc::now();
        let mut user = UserRecord::new(UserId::new(1));
        user.interact(EntityKind::Track, "low", InteractionType::Dislike, now);
        user.interact(EntityKind::Track, "high", InteractionType::Love, now);
        user.interact(EntityKind::Track, "mid", InteractionType::Like, now);

        let ids: Vec<_> = user.sorted_track_ratings().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn record_interaction_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let user = UserId::new(77);
        {
            let db = JsonDatabase::open(dir.path().to_path_buf()).await.unwrap();
            db.record_interaction(user, InteractionType::Like, &[featured("a"), featured("b")])
                .await
                .unwrap();
        }

        let db = JsonDatabase::open(dir.path().to_path_buf()).await.unwrap();
        let record = db.user(user).await.unwrap().expect("user stored");
        assert_eq!(record.track_ratings.len(), 2);
        assert_eq!(record.artist_ratings.len(), 1);
        assert_eq!(record.artist_ratings[0].rating, 2);
        assert_eq!(record.album_ratings[0].id, "album-1");

        let artist = db.artist("artist-1").await.unwrap().unwrap();
        assert_eq!(artist.track_ids, vec!["a", "b"]);
        let album = db.album("album-1").await.unwrap().unwrap();
        assert_eq!(album.genres, vec!["rock"]);
    }

    #[tokio::test]
    async fn youtube_and_featureless_tracks_are_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let db = JsonDatabase::open(dir.path().to_path_buf()).await.unwrap();
        let mut youtube = featured("yt");
        youtube.source = StreamableSource::YouTube;
        let mut bare = featured("bare");
        bare.audio_features = None;

        db.record_interaction(UserId::new(1), InteractionType::Play, &[youtube, bare])
            .await
            .unwrap();

        assert!(db.user(UserId::new(1)).await.unwrap().is_none());
        assert_eq!(db.stats().await.tracks, 0);
    }

    #[tokio::test]
    async fn playlists_do_not_duplicate_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let db = JsonDatabase::open(dir.path().to_path_buf()).await.unwrap();
        let owner = UserId::new(5);

        db.create_playlist(owner, "mix", &[featured("a")]).await.unwrap();
        assert!(db.create_playlist(owner, "mix", &[]).await.is_err());

        let added = db
            .add_to_playlist("mix", &[featured("a"), featured("b")])
            .await
            .unwrap();
        assert_eq!(added, 1);

        let playlist = db.playlist_by_name("mix").await.unwrap().unwrap();
        assert_eq!(playlist.track_ids, vec!["a", "b"]);
        assert_eq!(db.user_playlists(owner).await.unwrap().len(), 1);

        assert!(db.delete_playlist("mix").await.unwrap());
        assert!(!db.delete_playlist("mix").await.unwrap());
    }
}
