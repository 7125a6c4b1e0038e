//! # Cache Module
//!
//! Caches the result of resolving a metadata-only track (for example a
//! Spotify track) to a playable YouTube URL. Resolution shells out to
//! `yt-dlp`, so a hit saves several seconds before playback starts.
//!
//! ## Configuration
//!
//! ```env
//! RESOLVE_CACHE_SIZE=500      # Maximum number of resolved tracks
//! RESOLVE_CACHE_TTL=6h        # Time-to-live per entry
//! ```

pub mod lru_cache;

use lru_cache::LRUCache;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// Resolved playback URLs keyed by `source:id`.
#[derive(Debug, Clone)]
pub struct ResolveCache {
    inner: LRUCache<String, ResolvedTrack>,
    ttl: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedTrack {
    /// URL que entiende yt-dlp
    pub url: String,
    pub title: String,
    pub duration: Option<Duration>,
}

impl ResolveCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: LRUCache::new(capacity),
            ttl,
        }
    }

    fn key(source: &str, id: &str) -> String {
        format!("{}:{}", source, id)
    }

    pub fn get(&self, source: &str, id: &str) -> Option<ResolvedTrack> {
        self.inner.get(&Self::key(source, id))
    }

    pub fn put(&self, source: &str, id: &str, resolved: ResolvedTrack) {
        self.inner
            .insert_with_ttl(Self::key(source, id), resolved, Some(self.ttl));
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Performs cache maintenance by removing expired entries.
    ///
    /// Called periodically from a background task.
    pub fn cleanup_old_entries(&self) {
        let removed = self.inner.cleanup_expired();
        if removed > 0 {
            let metrics = self.inner.metrics();
            info!(
                "🧹 Cache cleanup: removed {} expired entries (hit rate {:.0}%)",
                removed,
                metrics.hit_rate() * 100.0
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_scoped_by_source() {
        let cache = ResolveCache::new(10, Duration::from_secs(60));
        cache.put(
            "spotify",
            "abc",
            ResolvedTrack {
                url: "https://www.youtube.com/watch?v=x".into(),
                title: "x".into(),
                duration: None,
            },
        );

        assert!(cache.get("spotify", "abc").is_some());
        assert!(cache.get("apple", "abc").is_none());
        assert_eq!(cache.len(), 1);
    }
}
