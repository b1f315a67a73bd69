//! Synthesized audio cache keyed by utterance text and voice.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Hex SHA-256 of the voice ID and text. Identical text under different
/// voices never collides.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(text: &str, voice_id: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(voice_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct CachedAudioEntry {
    pub audio: Arc<[u8]>,
    pub inserted_at: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Bounded, expiring map from [`CacheKey`] to audio. When full, the oldest
/// entry is evicted. Concurrent writers for one key: last write wins.
pub struct AudioCache {
    entries: RwLock<HashMap<CacheKey, CachedAudioEntry>>,
    max_entries: usize,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl AudioCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<[u8]>> {
        let now = Instant::now();
        let found = {
            let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
            entries
                .get(key)
                .map(|entry| (entry.audio.clone(), entry.inserted_at))
        };

        match found {
            Some((audio, inserted_at)) if now.duration_since(inserted_at) < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(audio)
            }
            Some((_, inserted_at)) => {
                self.remove_stale(key, inserted_at);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Removes `key` only if it still holds the entry inserted at
    /// `inserted_at`. A fresh insert that landed between the expiry check
    /// and this call survives.
    fn remove_stale(&self, key: &CacheKey, inserted_at: Instant) {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        if entries
            .get(key)
            .is_some_and(|entry| entry.inserted_at == inserted_at)
        {
            entries.remove(key);
        }
    }

    pub fn insert(&self, key: CacheKey, audio: Vec<u8>) -> Arc<[u8]> {
        let audio: Arc<[u8]> = audio.into();
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key,
            CachedAudioEntry {
                audio: audio.clone(),
                inserted_at: Instant::now(),
            },
        );
        audio
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
