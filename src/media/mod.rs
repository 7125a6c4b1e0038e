//! # Media Model
//!
//! Value objects for everything the bot can play.
//!
//! - [`Streamable`]: a single audio track, resolved to a playable source at
//!   playback time.
//! - [`Playable`]: an ordered group of streamables that the user enqueued as one
//!   thing (a track, an album, a playlist, an artist's top tracks). It carries the
//!   play cursor the [`Queue`](crate::audio::queue::Queue) advances.
//!
//! Two streamables with the same external id are the same track for
//! deduplication purposes.

pub mod playable;
pub mod streamable;

pub use playable::{Playable, PlayableKind};
pub use streamable::{AlbumRef, ArtistRef, AudioFeatures, Streamable, StreamableSource};
