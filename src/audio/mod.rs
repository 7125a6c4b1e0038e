//! # Audio Module
//!
//! Per-guild playback orchestration.
//!
//! ## Architecture
//!
//! ### [`voice_stream`] - Voice Stream Adapter
//! - Owns the songbird call and the currently loaded track
//! - Turns track lifecycle into [`StreamEvent`](voice_stream::StreamEvent)s
//! - Bounded reconnect with linear backoff
//!
//! ### [`queue`] - Queue
//! - The playback state machine: play, pause, skip, stop, shuffle, autoplay
//! - Publishes [`QueueEvent`](events::QueueEvent)s in transition order
//!
//! ### [`manager`] - Queue Manager
//! - Guild-keyed registry with create/get/destroy
//! - One event pump per queue so stream events and commands never interleave

pub mod events;
pub mod manager;
pub mod queue;
pub mod voice_stream;

pub use events::{EventBus, GuildEvent, QueueEvent};
pub use manager::{QueueManager, SharedQueue};
pub use queue::{Queue, QueueSettings};
pub use voice_stream::{SongbirdVoiceStream, StreamEvent, StreamOptions, VoiceStream};
