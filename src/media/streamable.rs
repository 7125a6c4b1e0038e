use serde::{Deserialize, Serialize};
use serde_json::Value;
use serenity::model::id::UserId;
use std::{fmt, time::Duration};

use super::playable::{Playable, PlayableKind};

/// Plataforma de la que proviene la metadata de un track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamableSource {
    Spotify,
    YouTube,
    SoundCloud,
    Apple,
    Arbitrary,
}

impl fmt::Display for StreamableSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Spotify => "spotify",
            Self::YouTube => "youtube",
            Self::SoundCloud => "soundcloud",
            Self::Apple => "apple",
            Self::Arbitrary => "arbitrary",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtistRef {
    pub id: String,
    pub name: String,
    pub url: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    pub popularity: Option<u8>,
}

impl ArtistRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlbumRef {
    pub id: String,
    pub name: String,
    pub url: Option<String>,
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    pub release_date: Option<String>,
}

/// Audio features tal como las reporta el proveedor de metadatos.
///
/// Todos los campos numéricos son opcionales y solo valen si `exists` está
/// activo.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub exists: bool,
    pub acousticness: Option<f64>,
    pub danceability: Option<f64>,
    pub energy: Option<f64>,
    pub instrumentalness: Option<f64>,
    pub key: Option<i32>,
    pub liveness: Option<f64>,
    pub loudness: Option<f64>,
    pub mode: Option<i32>,
    pub speechiness: Option<f64>,
    pub tempo: Option<f64>,
    pub time_signature: Option<i32>,
    pub valence: Option<f64>,
}

impl AudioFeatures {
    pub fn is_valid(&self) -> bool {
        self.exists
    }
}

/// Una unidad de audio reproducible
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Streamable {
    pub source: StreamableSource,
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub artist: ArtistRef,
    pub album: Option<AlbumRef>,
    pub url: String,
    /// URL de audio resuelta (para Spotify es el proxy de YouTube)
    pub youtube_url: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Duration,
    pub popularity: Option<u8>,
    pub explicit: Option<bool>,
    pub audio_features: Option<AudioFeatures>,

    pub requested_by: Option<UserId>,
    pub data: Option<Value>,
}

impl Streamable {
    pub fn new(
        source: StreamableSource,
        id: impl Into<String>,
        name: impl Into<String>,
        artist: ArtistRef,
        url: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            source,
            id: id.into(),
            name: name.into(),
            description: None,
            artist,
            album: None,
            url: url.into(),
            youtube_url: None,
            thumbnail: None,
            duration,
            popularity: None,
            explicit: None,
            audio_features: None,
            requested_by: None,
            data: None,
        }
    }

    pub fn with_album(mut self, album: AlbumRef) -> Self {
        self.album = Some(album);
        self
    }

    pub fn with_youtube_url(mut self, url: impl Into<String>) -> Self {
        self.youtube_url = Some(url.into());
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    pub fn with_popularity(mut self, popularity: u8) -> Self {
        self.popularity = Some(popularity);
        self
    }

    pub fn with_audio_features(mut self, features: AudioFeatures) -> Self {
        self.audio_features = Some(features);
        self
    }

    pub fn has_audio_features(&self) -> bool {
        self.audio_features.as_ref().is_some_and(AudioFeatures::is_valid)
    }

    /// Envuelve el track en un `Playable` de tipo `track`, conservando la atribución
    pub fn to_playable(&self) -> Playable {
        Playable {
            kind: PlayableKind::Track,
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            artist: self.artist.clone(),
            url: self.url.clone(),
            thumbnail: self.thumbnail.clone(),
            duration: self.duration,
            streamables: vec![self.clone()],
            cursor: None,
            requested_by: self.requested_by,
            data: self.data.clone(),
        }
    }
}

impl fmt::Display for Streamable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} by {}", self.name, self.artist.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_playable_preserves_identity() {
        let track = Streamable::new(
            StreamableSource::Spotify,
            "4uLU6hMCjMI75M1A2tKUQC",
            "Never Gonna Give You Up",
            ArtistRef::new("0gxyHStUsqpMadRV0Di1Qt", "Rick Astley"),
            "https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC",
            Duration::from_secs(213),
        );

        let playable = track.to_playable();
        assert_eq!(playable.kind, PlayableKind::Track);
        assert_eq!(playable.streamables.len(), 1);

        let back = &playable.streamables[0];
        assert_eq!(back.id, track.id);
        assert_eq!(back.name, track.name);
        assert_eq!(back.artist, track.artist);
    }

    #[test]
    fn audio_features_gate_on_exists_flag() {
        let base = Streamable::new(
            StreamableSource::YouTube,
            "dQw4w9WgXcQ",
            "Video",
            ArtistRef::new("channel", "Channel"),
            "https://youtu.be/dQw4w9WgXcQ",
            Duration::from_secs(10),
        );
        assert!(!base.has_audio_features());

        let stale = base.clone().with_audio_features(AudioFeatures {
            energy: Some(0.4),
            ..Default::default()
        });
        assert!(!stale.has_audio_features());

        let valid = base.with_audio_features(AudioFeatures {
            exists: true,
            energy: Some(0.4),
            ..Default::default()
        });
        assert!(valid.has_audio_features());
    }
}
