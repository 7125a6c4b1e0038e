use serenity::model::id::UserId;

use crate::{
    media::{Playable, Streamable},
    storage::{AlbumRecord, ArtistRecord, PlaylistRecord, UserRecord},
};

/// Lo que se le da al recomendador para arrancar el autoplay
#[derive(Debug, Clone, PartialEq)]
pub enum Seed {
    /// Usuario de Discord; se resuelve a su perfil guardado
    User(UserId),
    /// Historial + pendientes de una cola, como lista de streamables
    Queue(Vec<Streamable>),
    Playlist(PlaylistRecord),
    Artist(ArtistRecord),
    Album(AlbumRecord),
    Profile(UserRecord),
    Playable(Playable),
    Items(Vec<SeedItem>),
    Text(TextSeed),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SeedItem {
    Playable(Playable),
    Streamable(Streamable),
}

/// Listas de nombres a buscar
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextSeed {
    pub track_names: Vec<String>,
    pub artist_names: Vec<String>,
    pub genres: Vec<String>,
}

impl TextSeed {
    /// Parsea listas separadas por coma, descartando entradas vacías
    pub fn from_lists(tracks: Option<&str>, artists: Option<&str>, genres: Option<&str>) -> Self {
        fn split(list: Option<&str>) -> Vec<String> {
            list.map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|x| !x.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
        }

        Self {
            track_names: split(tracks),
            artist_names: split(artists),
            genres: split(genres),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.track_names.is_empty() && self.artist_names.is_empty() && self.genres.is_empty()
    }
}

impl Seed {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::User(_) => "user",
            Self::Queue(_) => "queue",
            Self::Playlist(_) => "playlist",
            Self::Artist(_) => "artist",
            Self::Album(_) => "album",
            Self::Profile(_) => "profile",
            Self::Playable(_) => "playable",
            Self::Items(_) => "items",
            Self::Text(_) => "text",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_seed_splits_on_commas() {
        let seed = TextSeed::from_lists(Some("Song A, Song B ,,"), None, Some("rock"));
        assert_eq!(seed.track_names, vec!["Song A", "Song B"]);
        assert!(seed.artist_names.is_empty());
        assert_eq!(seed.genres, vec!["rock"]);
        assert!(!seed.is_empty());
        assert!(TextSeed::from_lists(Some(" , "), None, None).is_empty());
    }
}
