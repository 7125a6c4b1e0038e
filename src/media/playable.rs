use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serenity::model::id::UserId;
use std::{fmt, time::Duration};

use super::streamable::{ArtistRef, Streamable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlayableKind {
    Track,
    Album,
    Playlist,
    Artist,
    UserPlaylist,
}

/// Lo que el usuario encoló como una sola cosa.
///
/// El cursor empieza antes del primer streamable. [`Playable::advance`] lo
/// mueve de a un paso y nunca hacia atrás; al pasar el último streamable el
/// playable queda agotado y hay que sacarlo del frente de la cola.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playable {
    pub kind: PlayableKind,
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub artist: ArtistRef,
    pub url: String,
    pub thumbnail: Option<String>,
    pub duration: Duration,
    pub streamables: Vec<Streamable>,
    #[serde(skip)]
    pub(crate) cursor: Option<usize>,

    pub requested_by: Option<UserId>,
    pub data: Option<Value>,
}

impl Playable {
    pub fn new(
        kind: PlayableKind,
        id: impl Into<String>,
        name: impl Into<String>,
        artist: ArtistRef,
        url: impl Into<String>,
        streamables: Vec<Streamable>,
    ) -> Self {
        let duration = streamables.iter().map(|s| s.duration).sum();
        Self {
            kind,
            id: id.into(),
            name: name.into(),
            description: None,
            artist,
            url: url.into(),
            thumbnail: None,
            duration,
            streamables,
            cursor: None,
            requested_by: None,
            data: None,
        }
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    /// Atribuye el playable a `requester` y le adjunta `data`.
    ///
    /// La atribución se copia a cada streamable para saber quién pidió cada
    /// track.
    pub fn attribute(mut self, requester: UserId, data: Option<Value>) -> Self {
        for streamable in &mut self.streamables {
            streamable.requested_by = Some(requester);
            streamable.data = data.clone();
        }
        self.requested_by = Some(requester);
        self.data = data;
        self
    }

    /// Índice del streamable actual, `None` si todavía no empezó
    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn current_streamable(&self) -> Option<&Streamable> {
        self.cursor.and_then(|index| self.streamables.get(index))
    }

    /// Avanza el cursor y devuelve el nuevo streamable actual.
    ///
    /// Agotado, sigue devolviendo `None`; el cursor se queda en
    /// `streamables.len()` y nunca retrocede.
    pub fn advance(&mut self) -> Option<&Streamable> {
        let next = self
            .cursor
            .map_or(0, |index| index + 1)
            .min(self.streamables.len());
        self.cursor = Some(next);
        self.streamables.get(next)
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor.is_some_and(|index| index >= self.streamables.len())
    }

    /// Streamables que todavía no empezaron a sonar
    pub fn remaining(&self) -> &[Streamable] {
        let start = self.cursor.map_or(0, |index| (index + 1).min(self.streamables.len()));
        &self.streamables[start..]
    }

    /// Mezcla solo la parte no reproducida, el cursor sigue apuntando al mismo track
    pub fn shuffle_remaining<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let start = self.cursor.map_or(0, |index| (index + 1).min(self.streamables.len()));
        self.streamables[start..].shuffle(rng);
    }

    pub fn track_ids(&self) -> impl Iterator<Item = &str> {
        self.streamables.iter().map(|s| s.id.as_str())
    }
}

impl fmt::Display for Playable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::StreamableSource;

    fn track(id: &str) -> Streamable {
        Streamable::new(
            StreamableSource::Spotify,
            id,
            format!("Track {id}"),
            ArtistRef::new("artist", "Artist"),
            format!("https://open.spotify.com/track/{id}"),
            Duration::from_secs(100),
        )
    }

    fn album(ids: &[&str]) -> Playable {
        Playable::new(
            PlayableKind::Album,
            "album",
            "Album",
            ArtistRef::new("artist", "Artist"),
            "https://open.spotify.com/album/album",
            ids.iter().map(|id| track(id)).collect(),
        )
    }

    #[test]
    fn advance_walks_streamables_then_stays_exhausted() {
        let mut playable = album(&["a", "b"]);
        assert!(playable.current_streamable().is_none());
        assert!(!playable.is_exhausted());

        assert_eq!(playable.advance().map(|s| s.id.as_str()), Some("a"));
        assert_eq!(playable.advance().map(|s| s.id.as_str()), Some("b"));
        assert!(playable.advance().is_none());
        assert!(playable.is_exhausted());

        let cursor = playable.cursor();
        for _ in 0..3 {
            assert!(playable.advance().is_none());
            assert_eq!(playable.cursor(), cursor);
        }
    }

    #[test]
    fn remaining_excludes_current_and_played() {
        let mut playable = album(&["a", "b", "c"]);
        assert_eq!(playable.remaining().len(), 3);
        playable.advance();
        assert_eq!(playable.remaining().len(), 2);
        playable.advance();
        playable.advance();
        assert!(playable.remaining().is_empty());
        playable.advance();
        assert!(playable.remaining().is_empty());
    }

    #[test]
    fn attribute_cascades_to_streamables() {
        let requester = UserId::new(42);
        let data = serde_json::json!({ "channel": 7 });
        let playable = album(&["a", "b"]).attribute(requester, Some(data.clone()));

        assert_eq!(playable.requested_by, Some(requester));
        for streamable in &playable.streamables {
            assert_eq!(streamable.requested_by, Some(requester));
            assert_eq!(streamable.data.as_ref(), Some(&data));
        }
    }

    #[test]
    fn shuffle_remaining_keeps_current_track() {
        let mut playable = album(&["a", "b", "c", "d", "e", "f"]);
        playable.advance();
        playable.advance();
        let mut rng = rand::thread_rng();
        playable.shuffle_remaining(&mut rng);

        assert_eq!(playable.current_streamable().map(|s| s.id.as_str()), Some("b"));
        assert_eq!(playable.streamables[0].id, "a");
        let mut tail: Vec<_> = playable.remaining().iter().map(|s| s.id.clone()).collect();
        tail.sort();
        assert_eq!(tail, vec!["c", "d", "e", "f"]);
    }

    #[test]
    fn duration_is_sum_of_streamables() {
        assert_eq!(album(&["a", "b", "c"]).duration, Duration::from_secs(300));
    }
}
