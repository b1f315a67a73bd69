//! Cached speech synthesis with single-stream playback.
//!
//! At most one utterance plays at a time. A `speak` call made while another
//! is synthesizing or playing waits for it to finish, and calls run in the
//! order they were made.

use crate::cache::{AudioCache, CacheKey, CacheStats};
use crate::config::SynthesisConfig;
use crate::error::VoiceError;
use crate::tts::{SynthesisRequest, SynthesisService};
use async_trait::async_trait;
use parley_types::voice::SynthesisModel;
use parley_types::ErrorEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

const SPEECH_BROADCAST_CAPACITY: usize = 64;

/// Audio output device.
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    /// Plays the encoded audio to completion.
    async fn play(&self, audio: &[u8]) -> Result<(), VoiceError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpeechEvent {
    Started { key: CacheKey, cache_hit: bool },
    Finished { key: CacheKey },
    Failed { key: CacheKey, error: ErrorEvent },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackOutcome {
    pub key: CacheKey,
    pub cache_hit: bool,
    pub result: Result<(), VoiceError>,
}

impl PlaybackOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct SpeechSynthesisCache {
    service: Arc<dyn SynthesisService>,
    player: Arc<dyn AudioPlayer>,
    cache: AudioCache,
    model: SynthesisModel,
    playback: Mutex<()>,
    playing: AtomicBool,
    events: broadcast::Sender<SpeechEvent>,
}

impl SpeechSynthesisCache {
    pub fn new(
        service: Arc<dyn SynthesisService>,
        player: Arc<dyn AudioPlayer>,
        config: &SynthesisConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(SPEECH_BROADCAST_CAPACITY);
        Self {
            service,
            player,
            cache: AudioCache::new(config.cache_max_entries, config.cache_ttl()),
            model: config.model(),
            playback: Mutex::new(()),
            playing: AtomicBool::new(false),
            events,
        }
    }

    /// Speaks `text` in `voice_id`, synthesizing only on a cache miss.
    ///
    /// Always ends with exactly one `Finished` or `Failed` event for the key.
    pub async fn speak(&self, text: &str, voice_id: &str) -> PlaybackOutcome {
        let key = CacheKey::new(text, voice_id);
        let _turn = self.playback.lock().await;

        if text.trim().is_empty() {
            return self.fail(key, false, VoiceError::Synthesis("nothing to speak".to_string()));
        }

        let (audio, cache_hit) = match self.cache.get(&key) {
            Some(audio) => (audio, true),
            None => {
                let request = SynthesisRequest {
                    text: text.to_string(),
                    voice_id: voice_id.to_string(),
                    model: self.model,
                };
                match self.service.synthesize(&request).await {
                    Ok(synthesized) => {
                        debug!(
                            key = %key,
                            bytes = synthesized.bytes.len(),
                            service_cache_hit = synthesized.service_cache_hit,
                            "speech synthesized"
                        );
                        (self.cache.insert(key.clone(), synthesized.bytes), false)
                    }
                    Err(e) => return self.fail(key, false, e),
                }
            }
        };

        let _ = self.events.send(SpeechEvent::Started {
            key: key.clone(),
            cache_hit,
        });
        self.playing.store(true, Ordering::SeqCst);
        let played = self.player.play(&audio).await;
        self.playing.store(false, Ordering::SeqCst);

        match played {
            Ok(()) => {
                let _ = self.events.send(SpeechEvent::Finished { key: key.clone() });
                PlaybackOutcome {
                    key,
                    cache_hit,
                    result: Ok(()),
                }
            }
            Err(e) => self.fail(key, cache_hit, e),
        }
    }

    fn fail(&self, key: CacheKey, cache_hit: bool, error: VoiceError) -> PlaybackOutcome {
        warn!(key = %key, error = %error, "speech failed");
        let _ = self.events.send(SpeechEvent::Failed {
            key: key.clone(),
            error: error.to_event(),
        });
        PlaybackOutcome {
            key,
            cache_hit,
            result: Err(error),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpeechEvent> {
        self.events.subscribe()
    }
}
