use chrono::Utc;
use serenity::model::id::UserId;
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, info, warn};

use super::{
    features::{channel_average, personal_interactions, sort_by_channel_rating, target_features},
    request::RecommendationRequest,
    seed::{Seed, SeedItem, TextSeed},
};
use crate::{
    error::SeedError,
    media::{Playable, PlayableKind, Streamable, StreamableSource},
    sources::MetadataProvider,
    storage::{MusicDatabase, UserRecord},
};

/// Mínimo de artistas + tracks con rating positivo para sembrar desde un perfil
const MIN_LIKED_ENTITIES: usize = 3;

pub struct Recommender {
    provider: Arc<dyn MetadataProvider>,
    database: Option<Arc<dyn MusicDatabase>>,
    decay: f64,
    max_request: usize,
}

impl Recommender {
    /// `database` es `None` cuando la base de datos está deshabilitada
    pub fn new(
        provider: Arc<dyn MetadataProvider>,
        database: Option<Arc<dyn MusicDatabase>>,
        decay: f64,
        max_request: usize,
    ) -> Self {
        Self {
            provider,
            database,
            decay,
            max_request,
        }
    }

    pub fn database(&self) -> Option<&Arc<dyn MusicDatabase>> {
        self.database.as_ref()
    }

    /// Normaliza una semilla en una solicitud de recomendaciones.
    ///
    /// `listeners` son los miembros del canal de voz; sus ratings guardados
    /// ordenan los tracks semilla y ponderan las features objetivo.
    pub async fn resolve(
        &self,
        seed: &Seed,
        listeners: &[UserId],
        limit: usize,
    ) -> Result<RecommendationRequest, SeedError> {
        debug!("🌱 Resolviendo semilla de tipo {}", seed.kind());

        let request = match seed {
            Seed::User(user) => {
                let database = self.database.as_ref().ok_or(SeedError::DatabaseDisabled)?;
                let profile = database
                    .user(*user)
                    .await
                    .map_err(SeedError::Database)?
                    .filter(|p| !p.track_ratings.is_empty() || !p.artist_ratings.is_empty())
                    .ok_or(SeedError::UnknownUser)?;
                self.resolve_profile(&profile, limit).await?
            }
            Seed::Profile(profile) => self.resolve_profile(profile, limit).await?,
            Seed::Queue(streamables) => {
                let tracks = spotify_track_ids(streamables);
                self.finish(limit, tracks, Vec::new(), Vec::new(), listeners)
                    .await?
            }
            Seed::Playlist(playlist) => {
                self.finish(limit, playlist.track_ids.clone(), Vec::new(), Vec::new(), listeners)
                    .await?
            }
            Seed::Artist(artist) => {
                self.finish(
                    limit,
                    artist.track_ids.clone(),
                    vec![artist.id.clone()],
                    Vec::new(),
                    listeners,
                )
                .await?
            }
            Seed::Album(album) => {
                self.finish(
                    limit,
                    album.track_ids.clone(),
                    album.artist_id.iter().cloned().collect(),
                    album.genres.clone(),
                    listeners,
                )
                .await?
            }
            Seed::Playable(playable) => {
                let (artists, genres) = harvest(playable);
                let tracks = spotify_track_ids(&playable.streamables);
                self.finish(limit, tracks, artists, genres, listeners).await?
            }
            Seed::Items(items) => {
                if items.is_empty() {
                    return Err(SeedError::EmptySeed);
                }
                let mut streamables: Vec<&Streamable> = Vec::new();
                let mut artists = Vec::new();
                let mut genres = Vec::new();
                for item in items {
                    match item {
                        SeedItem::Playable(playable) => {
                            let (a, g) = harvest(playable);
                            artists.extend(a);
                            genres.extend(g);
                            streamables.extend(playable.streamables.iter());
                        }
                        SeedItem::Streamable(streamable) => streamables.push(streamable),
                    }
                }
                let tracks = spotify_track_ids(streamables);
                self.finish(limit, tracks, artists, genres, listeners).await?
            }
            Seed::Text(text) => self.resolve_text(text, listeners, limit).await?,
        };

        if request.seed_count() == 0 {
            return Err(SeedError::NoSeeds);
        }

        Ok(request)
    }

    async fn resolve_profile(
        &self,
        profile: &UserRecord,
        limit: usize,
    ) -> Result<RecommendationRequest, SeedError> {
        let tracks = profile.sorted_track_ratings();
        let artists = profile.sorted_artist_ratings();

        let liked = tracks.iter().filter(|r| r.rating > 0).count()
            + artists.iter().filter(|r| r.rating > 0).count();
        if liked < MIN_LIKED_ENTITIES {
            info!(
                "🚫 Perfil de {} con {} entidades valoradas, se requieren {}",
                profile.id, liked, MIN_LIKED_ENTITIES
            );
            return Err(SeedError::InsufficientHistory);
        }

        let track_ids: Vec<String> = tracks.into_iter().map(|r| r.id).collect();
        let artist_ids: Vec<String> = artists.into_iter().map(|r| r.id).collect();

        let targets = match &self.database {
            Some(database) => {
                let records = database.tracks(&track_ids).await.map_err(SeedError::Database)?;
                target_features(&records, &personal_interactions(profile), self.decay, Utc::now())
            }
            None => None,
        };

        Ok(RecommendationRequest::new(limit, track_ids, artist_ids, Vec::new(), targets))
    }

    async fn resolve_text(
        &self,
        text: &TextSeed,
        listeners: &[UserId],
        limit: usize,
    ) -> Result<RecommendationRequest, SeedError> {
        if text.track_names.is_empty() && text.artist_names.is_empty() {
            return Err(SeedError::NoSeeds);
        }

        let mut responses = Vec::new();
        if !text.track_names.is_empty() {
            responses.extend(
                self.provider
                    .search_tracks(&text.track_names)
                    .await
                    .map_err(SeedError::Provider)?,
            );
        }
        if !text.artist_names.is_empty() {
            responses.extend(
                self.provider
                    .search_artists(&text.artist_names)
                    .await
                    .map_err(SeedError::Provider)?,
            );
        }

        let mut tracks = Vec::new();
        let mut artists = Vec::new();
        for playable in responses.iter().filter(|r| r.is_success()).filter_map(|r| r.playable.as_ref()) {
            match playable.kind {
                PlayableKind::Track => tracks.push(playable.id.clone()),
                PlayableKind::Artist => artists.push(playable.id.clone()),
                _ => {}
            }
        }

        if tracks.is_empty() && artists.is_empty() && text.genres.is_empty() {
            return Err(SeedError::NoMatches);
        }

        self.finish(limit, tracks, artists, text.genres.clone(), listeners)
            .await
    }

    /// Post-proceso común: features objetivo, orden por rating del canal y truncado
    async fn finish(
        &self,
        limit: usize,
        tracks: Vec<String>,
        artists: Vec<String>,
        genres: Vec<String>,
        listeners: &[UserId],
    ) -> Result<RecommendationRequest, SeedError> {
        let mut tracks = dedup(tracks);
        let artists = dedup(artists);
        let genres = dedup(genres);

        let Some(database) = &self.database else {
            return Ok(RecommendationRequest::new(limit, tracks, artists, genres, None));
        };

        let records = database.tracks(&tracks).await.map_err(SeedError::Database)?;
        let users = if listeners.is_empty() {
            Vec::new()
        } else {
            database.users(listeners).await.map_err(SeedError::Database)?
        };

        let channel = channel_average(&users);
        let targets = target_features(&records, &channel, self.decay, Utc::now());
        sort_by_channel_rating(&mut tracks, &channel);

        Ok(RecommendationRequest::new(limit, tracks, artists, genres, targets))
    }

    /// Resuelve la semilla y pide `limit` recomendaciones al proveedor
    pub async fn recommend(
        &self,
        seed: &Seed,
        listeners: &[UserId],
        limit: usize,
    ) -> Result<Vec<Playable>, SeedError> {
        let request = self.resolve(seed, listeners, limit).await?;
        self.provider
            .recommend(&request)
            .await
            .map_err(SeedError::Provider)
    }

    /// Pide hasta `batch` recomendaciones cuyos tracks no estén en `seen`.
    ///
    /// Cada ronda que solo trae tracks ya vistos pide `batch` más que la
    /// anterior; pasado `max_request` se rinde con [`SeedError::Exhausted`].
    pub async fn backfill(
        &self,
        seed: &Seed,
        listeners: &[UserId],
        batch: usize,
        seen: &HashSet<String>,
    ) -> Result<Vec<Playable>, SeedError> {
        let batch = batch.max(1);
        let mut requested = batch;

        loop {
            let candidates = self.recommend(seed, listeners, requested).await?;
            if candidates.is_empty() {
                warn!("🎯 El proveedor no devolvió recomendaciones (se pidieron {})", requested);
                return Err(SeedError::Exhausted { requested });
            }

            let mut accepted: HashSet<String> = HashSet::new();
            let mut fresh = Vec::new();
            for playable in candidates {
                let unseen = playable
                    .track_ids()
                    .all(|id| !seen.contains(id) && !accepted.contains(id));
                if unseen && !playable.streamables.is_empty() {
                    accepted.extend(playable.track_ids().map(str::to_string));
                    fresh.push(playable);
                    if fresh.len() == batch {
                        break;
                    }
                }
            }

            if !fresh.is_empty() {
                debug!("🎯 Backfill: {} nuevas de {} pedidas", fresh.len(), requested);
                return Ok(fresh);
            }

            requested += batch;
            if requested > self.max_request {
                warn!("🎯 Backfill agotado tras pedir {} recomendaciones", requested - batch);
                return Err(SeedError::Exhausted { requested });
            }
            debug!("🔁 Todas las recomendaciones ya estaban en la cola, pidiendo {}", requested);
        }
    }
}

/// Artistas y géneros implícitos en un playable de tipo artista o álbum
fn harvest(playable: &Playable) -> (Vec<String>, Vec<String>) {
    match playable.kind {
        PlayableKind::Artist => (vec![playable.id.clone()], Vec::new()),
        PlayableKind::Album => {
            let genres = playable
                .streamables
                .first()
                .and_then(|s| s.album.as_ref())
                .map(|a| a.genres.clone())
                .unwrap_or_default();
            (Vec::new(), genres)
        }
        _ => (Vec::new(), Vec::new()),
    }
}

/// Ids de Spotify; el motor de recomendaciones no entiende ids de YouTube
fn spotify_track_ids<'a>(streamables: impl IntoIterator<Item = &'a Streamable>) -> Vec<String> {
    streamables
        .into_iter()
        .filter(|s| s.source == StreamableSource::Spotify)
        .map(|s| s.id.clone())
        .collect()
}

fn dedup(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        media::{AlbumRef, ArtistRef, AudioFeatures},
        sources::{MockMetadataProvider, SearchCode, SearchResponse},
        storage::{AlbumRecord, Interaction, MockMusicDatabase, TrackRecord},
    };
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn streamable(id: &str) -> Streamable {
        Streamable::new(
            StreamableSource::Spotify,
            id,
            format!("Track {id}"),
            ArtistRef::new("artist", "Artist"),
            format!("https://open.spotify.com/track/{id}"),
            Duration::from_secs(200),
        )
    }

    fn track_playable(id: &str) -> Playable {
        streamable(id).to_playable()
    }

    fn rated(id: &str, rating: i64) -> Interaction {
        Interaction {
            id: id.into(),
            play_count: 1,
            rating,
            last_interaction: Utc::now(),
        }
    }

    fn record(id: &str) -> TrackRecord {
        TrackRecord {
            id: id.into(),
            name: id.into(),
            artist_id: "artist".into(),
            album_id: None,
            duration_secs: 200.0,
            popularity: Some(50.0),
            features: AudioFeatures {
                exists: true,
                energy: Some(0.5),
                ..Default::default()
            },
        }
    }

    fn recommender(provider: MockMetadataProvider, database: Option<MockMusicDatabase>) -> Recommender {
        Recommender::new(
            Arc::new(provider),
            database.map(|db| Arc::new(db) as Arc<dyn MusicDatabase>),
            0.9,
            12,
        )
    }

    #[tokio::test]
    async fn user_seed_requires_database() {
        let recommender = recommender(MockMetadataProvider::new(), None);
        let err = recommender
            .resolve(&Seed::User(UserId::new(1)), &[], 3)
            .await
            .unwrap_err();
        assert!(matches!(err, SeedError::DatabaseDisabled));
        assert!(err.is_user_facing());
    }

    #[tokio::test]
    async fn unknown_user_is_reported() {
        let mut db = MockMusicDatabase::new();
        db.expect_user().returning(|_| Ok(None));
        let recommender = recommender(MockMetadataProvider::new(), Some(db));

        let err = recommender
            .resolve(&Seed::User(UserId::new(1)), &[], 3)
            .await
            .unwrap_err();
        assert!(matches!(err, SeedError::UnknownUser));
    }

    #[tokio::test]
    async fn profile_with_little_history_never_reaches_provider() {
        let mut provider = MockMetadataProvider::new();
        provider.expect_recommend().never();
        let recommender = recommender(provider, None);

        let mut profile = UserRecord::new(UserId::new(1));
        profile.track_ratings = vec![rated("a", 1), rated("b", 0), rated("c", -2)];
        profile.artist_ratings = vec![rated("x", 2)];

        let err = recommender
            .recommend(&Seed::Profile(profile), &[], 3)
            .await
            .unwrap_err();
        assert!(matches!(err, SeedError::InsufficientHistory));
    }

    #[tokio::test]
    async fn profile_seeds_are_sorted_and_capped() {
        let mut db = MockMusicDatabase::new();
        db.expect_tracks()
            .returning(|ids| Ok(ids.iter().map(|id| record(id)).collect()));
        let recommender = recommender(MockMetadataProvider::new(), Some(db));

        let mut profile = UserRecord::new(UserId::new(1));
        profile.track_ratings = (0..8).map(|i| rated(&format!("t{i}"), i)).collect();
        profile.artist_ratings = vec![rated("low", -1), rated("high", 3)];

        let request = recommender
            .resolve(&Seed::Profile(profile), &[], 3)
            .await
            .unwrap();
        assert_eq!(request.seed_tracks, vec!["t7", "t6", "t5", "t4", "t3"]);
        assert_eq!(request.seed_artists, vec!["high", "low"]);
        assert!(request.targets.is_some());
    }

    #[tokio::test]
    async fn queue_seed_without_database_keeps_order() {
        let recommender = recommender(MockMetadataProvider::new(), None);
        let streamables: Vec<_> = ["a", "b", "a", "c", "d", "e", "f"].iter().map(|id| streamable(id)).collect();

        let request = recommender
            .resolve(&Seed::Queue(streamables), &[UserId::new(1)], 3)
            .await
            .unwrap();
        assert_eq!(request.seed_tracks, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(request.limit, 3);
        assert!(request.targets.is_none());
    }

    fn youtube(id: &str) -> Streamable {
        Streamable::new(
            StreamableSource::YouTube,
            id,
            format!("Video {id}"),
            ArtistRef::new("channel", "Channel"),
            format!("https://youtu.be/{id}"),
            Duration::from_secs(200),
        )
    }

    #[tokio::test]
    async fn youtube_ids_never_become_seed_tracks() {
        let mut provider = MockMetadataProvider::new();
        provider.expect_recommend().never();
        let recommender = recommender(provider, None);

        let mixed = vec![
            youtube("dQw4w9WgXcQ"),
            streamable("s0"),
            streamable("s1"),
            youtube("9bZkp7q19f0"),
            streamable("s2"),
            streamable("s3"),
            streamable("s4"),
        ];
        let request = recommender
            .resolve(&Seed::Queue(mixed), &[], 3)
            .await
            .unwrap();
        assert_eq!(request.seed_tracks, vec!["s0", "s1", "s2", "s3", "s4"]);

        let playable = youtube("dQw4w9WgXcQ").to_playable();
        let err = recommender
            .resolve(&Seed::Playable(playable.clone()), &[], 3)
            .await
            .unwrap_err();
        assert!(matches!(err, SeedError::NoSeeds));

        let err = recommender
            .resolve(&Seed::Items(vec![SeedItem::Playable(playable)]), &[], 3)
            .await
            .unwrap_err();
        assert!(matches!(err, SeedError::NoSeeds));
    }

    #[tokio::test]
    async fn album_seed_contributes_artist_and_genres() {
        let recommender = recommender(MockMetadataProvider::new(), None);
        let album = AlbumRecord {
            id: "al".into(),
            name: "Album".into(),
            artist_id: Some("ar".into()),
            genres: (0..7).map(|i| format!("g{i}")).collect(),
            track_ids: vec!["t1".into()],
        };

        let request = recommender.resolve(&Seed::Album(album), &[], 3).await.unwrap();
        assert_eq!(request.seed_artists, vec!["ar"]);
        assert_eq!(request.seed_genres.len(), 5);
        assert_eq!(request.seed_tracks, vec!["t1"]);
    }

    #[tokio::test]
    async fn item_seeds_harvest_artists_and_genres() {
        let recommender = recommender(MockMetadataProvider::new(), None);

        let err = recommender.resolve(&Seed::Items(vec![]), &[], 3).await.unwrap_err();
        assert!(matches!(err, SeedError::EmptySeed));

        let artist = Playable::new(
            PlayableKind::Artist,
            "artist-id",
            "Artist",
            ArtistRef::new("artist-id", "Artist"),
            "https://open.spotify.com/artist/artist-id",
            vec![streamable("top1")],
        );
        let album = Playable::new(
            PlayableKind::Album,
            "album-id",
            "Album",
            ArtistRef::new("artist-id", "Artist"),
            "https://open.spotify.com/album/album-id",
            vec![streamable("al1").with_album(AlbumRef {
                id: "album-id".into(),
                genres: vec!["house".into()],
                ..Default::default()
            })],
        );

        let request = recommender
            .resolve(
                &Seed::Items(vec![
                    SeedItem::Playable(artist),
                    SeedItem::Playable(album),
                    SeedItem::Streamable(streamable("loose")),
                ]),
                &[],
                3,
            )
            .await
            .unwrap();
        assert_eq!(request.seed_artists, vec!["artist-id"]);
        assert_eq!(request.seed_genres, vec!["house"]);
        assert_eq!(request.seed_tracks, vec!["top1", "al1", "loose"]);
    }

    #[tokio::test]
    async fn text_seed_keeps_only_matches() {
        let mut provider = MockMetadataProvider::new();
        provider.expect_search_tracks().returning(|names| {
            Ok(names
                .iter()
                .map(|n| {
                    if n == "known" {
                        SearchResponse::success(n.clone(), track_playable("known-id"))
                    } else {
                        SearchResponse::failure(n.clone(), SearchCode::NoMatches, "none")
                    }
                })
                .collect())
        });
        provider.expect_search_artists().never();
        let recommender = recommender(provider, None);

        let seed = TextSeed::from_lists(Some("known, unknown"), None, None);
        let request = recommender.resolve(&Seed::Text(seed), &[], 3).await.unwrap();
        assert_eq!(request.seed_tracks, vec!["known-id"]);
        assert!(request.seed_artists.is_empty());
    }

    #[tokio::test]
    async fn text_seed_without_names_or_matches() {
        let mut provider = MockMetadataProvider::new();
        provider.expect_search_artists().returning(|names| {
            Ok(names
                .iter()
                .map(|n| SearchResponse::failure(n.clone(), SearchCode::NoMatches, "none"))
                .collect())
        });
        let recommender = recommender(provider, None);

        let genres_only = TextSeed::from_lists(None, None, Some("rock"));
        assert!(matches!(
            recommender.resolve(&Seed::Text(genres_only), &[], 3).await,
            Err(SeedError::NoSeeds)
        ));

        let unmatched = TextSeed::from_lists(None, Some("nobody"), None);
        assert!(matches!(
            recommender.resolve(&Seed::Text(unmatched), &[], 3).await,
            Err(SeedError::NoMatches)
        ));
    }

    #[tokio::test]
    async fn channel_ratings_order_seed_tracks() {
        let mut db = MockMusicDatabase::new();
        db.expect_tracks()
            .returning(|ids| Ok(ids.iter().map(|id| record(id)).collect()));
        db.expect_users().returning(|ids| {
            Ok(ids
                .iter()
                .map(|id| {
                    let mut user = UserRecord::new(*id);
                    user.track_ratings = vec![rated("e", 4), rated("c", 1)];
                    user
                })
                .collect())
        });
        let recommender = recommender(MockMetadataProvider::new(), Some(db));

        let streamables: Vec<_> = ["a", "b", "c", "d", "e", "f"].iter().map(|id| streamable(id)).collect();
        let request = recommender
            .resolve(&Seed::Queue(streamables), &[UserId::new(1), UserId::new(2)], 3)
            .await
            .unwrap();
        assert_eq!(request.seed_tracks, vec!["e", "c", "a", "b", "d"]);
        let targets = request.targets.unwrap();
        assert!((targets.energy.unwrap() - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn backfill_grows_request_until_new_tracks_appear() {
        let mut provider = MockMetadataProvider::new();
        provider.expect_recommend().returning(|request| {
            if request.limit < 6 {
                Ok(vec![track_playable("seen-1"), track_playable("seen-2")])
            } else {
                Ok(vec![
                    track_playable("seen-1"),
                    track_playable("new-1"),
                    track_playable("new-1"),
                    track_playable("new-2"),
                ])
            }
        });
        let recommender = recommender(provider, None);

        let seen: HashSet<String> = ["seen-1", "seen-2", "q"].iter().map(|s| s.to_string()).collect();
        let seed = Seed::Queue(vec![streamable("q")]);
        let fresh = recommender.backfill(&seed, &[], 3, &seen).await.unwrap();

        let ids: Vec<_> = fresh.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["new-1", "new-2"]);
    }

    #[tokio::test]
    async fn backfill_is_bounded() {
        let mut provider = MockMetadataProvider::new();
        provider
            .expect_recommend()
            .times(4)
            .returning(|_| Ok(vec![track_playable("seen")]));
        let recommender = recommender(provider, None);

        let seen: HashSet<String> = ["seen".to_string()].into_iter().collect();
        let seed = Seed::Queue(vec![streamable("seen")]);
        let err = recommender.backfill(&seed, &[], 3, &seen).await.unwrap_err();
        // 3, 6, 9, 12 pedidas; 15 supera el máximo de 12
        assert!(matches!(err, SeedError::Exhausted { requested: 15 }));
    }
}
