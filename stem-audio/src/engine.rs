//! Audio engine - orchestrates the decode cache, mixing graph and transport

use crate::buffer::SongBuffers;
use crate::cache::DecodeCache;
use crate::context::AudioContext;
use crate::decoder::{AudioDecoder, SymphoniaDecoder};
use crate::error::EngineError;
use crate::mix::{compose_gains, TrackMixState};
use crate::mixer::MixingGraph;
use crate::render::GraphContext;
use crate::transport::{PlaybackState, Transport};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use stem_library::{SongId, Track, TrackStore};

/// Engine construction options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum number of decoded songs kept in memory
    pub cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { cache_capacity: 10 }
    }
}

/// Handle to a background preload
///
/// Dropping it detaches the preload; it still completes.
#[derive(Debug)]
pub struct PreloadHandle {
    handle: Option<JoinHandle<()>>,
}

impl PreloadHandle {
    /// Block until the preload has finished (successfully or not)
    pub fn wait(mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Preload thread panicked");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }
}

/// Multitrack playback engine
///
/// One instance owns the audio graph for the whole session. Only one song is
/// active at a time; other songs may sit decoded in the cache.
pub struct AudioEngine<C: AudioContext = GraphContext> {
    context: C,
    cache: Arc<DecodeCache>,
    mixer: MixingGraph,
    transport: Transport<C::Source>,
    active: Option<Arc<SongBuffers>>,
    disposed: bool,
}

impl<C: AudioContext> AudioEngine<C> {
    pub fn new(
        context: C,
        store: Arc<dyn TrackStore>,
        decoder: Arc<dyn AudioDecoder>,
        config: EngineConfig,
    ) -> Self {
        tracing::info!(
            "Audio engine at {} Hz, caching up to {} songs",
            context.sample_rate(),
            config.cache_capacity.max(1)
        );
        Self {
            context,
            cache: Arc::new(DecodeCache::new(store, decoder, config.cache_capacity)),
            mixer: MixingGraph::new(),
            transport: Transport::new(),
            active: None,
            disposed: false,
        }
    }

    /// Engine decoding with Symphonia at the context's sample rate
    pub fn with_symphonia(context: C, store: Arc<dyn TrackStore>, config: EngineConfig) -> Self {
        let decoder = Arc::new(SymphoniaDecoder::new(context.sample_rate()));
        Self::new(context, store, decoder, config)
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    /// Decode `song_id` if needed and make it the active song
    ///
    /// On failure the previously active song keeps playing untouched.
    pub fn load_song(&mut self, song_id: SongId, tracks: &[Track]) -> Result<(), EngineError> {
        if self.disposed {
            return Err(EngineError::Disposed);
        }

        let buffers = self.cache.load(song_id, tracks)?;
        self.activate(buffers);
        Ok(())
    }

    /// Decode `song_id` into the cache on a background thread
    ///
    /// Failures are logged, never surfaced. Active playback is not touched.
    pub fn preload_song(&self, song_id: SongId, tracks: Vec<Track>) -> PreloadHandle {
        if self.disposed {
            tracing::warn!(song_id, "preload ignored, engine disposed");
            return PreloadHandle { handle: None };
        }

        let cache = Arc::clone(&self.cache);
        let spawned = thread::Builder::new()
            .name(format!("preload-{song_id}"))
            .spawn(move || {
                if cache.has(song_id) {
                    tracing::debug!(song_id, "song already cached, skipping preload");
                    return;
                }
                match cache.decode_and_store(song_id, &tracks) {
                    Ok(_) => tracing::info!(song_id, "preloaded song"),
                    Err(e) => tracing::warn!(song_id, error = %e, "preload failed"),
                }
            });

        match spawned {
            Ok(handle) => PreloadHandle {
                handle: Some(handle),
            },
            Err(e) => {
                tracing::error!("Failed to spawn preload thread: {}", e);
                PreloadHandle { handle: None }
            }
        }
    }

    pub fn play(&mut self) {
        let Some(buffers) = self.active.as_deref() else {
            tracing::error!("{}", EngineError::NoAudioLoaded);
            return;
        };
        if let Err(e) = self.transport.play(&self.context, &self.mixer, buffers) {
            tracing::error!("{}", e);
        }
    }

    pub fn pause(&mut self) {
        if self.active.is_none() {
            tracing::error!("{}", EngineError::NoAudioLoaded);
            return;
        }
        self.transport.pause(&self.context);
    }

    pub fn stop(&mut self) {
        if self.active.is_none() {
            tracing::error!("{}", EngineError::NoAudioLoaded);
            return;
        }
        self.transport.stop();
    }

    /// Play if paused or stopped, pause if playing
    pub fn toggle(&mut self) {
        match self.transport.state() {
            PlaybackState::Playing => self.pause(),
            PlaybackState::Paused | PlaybackState::Stopped => self.play(),
        }
    }

    /// Jump to `time` seconds, clamped to the song length
    pub fn seek(&mut self, time: f64) {
        let Some(buffers) = self.active.as_deref() else {
            tracing::error!("{}", EngineError::NoAudioLoaded);
            return;
        };
        if let Err(e) = self
            .transport
            .seek(&self.context, &self.mixer, buffers, time)
        {
            tracing::error!("{}", e);
        }
    }

    pub fn set_track_volume(&mut self, key: &str, volume: f32) {
        if self.mixer.set_volume(key, volume) {
            self.apply_gains();
        } else {
            tracing::warn!(track = key, "unknown track");
        }
    }

    pub fn set_track_muted(&mut self, key: &str, muted: bool) {
        if self.mixer.set_muted(key, muted) {
            self.apply_gains();
        } else {
            tracing::warn!(track = key, "unknown track");
        }
    }

    pub fn set_track_solo(&mut self, key: &str, solo: bool) {
        if self.mixer.set_solo(key, solo) {
            self.apply_gains();
        } else {
            tracing::warn!(track = key, "unknown track");
        }
    }

    /// Return every track of the active song to volume 1, unmuted, unsoloed
    pub fn reset_track_states(&mut self) {
        self.mixer.reset_states();
        self.apply_gains();
    }

    /// Mix state of every track, in track order
    pub fn track_states(&self) -> Vec<(String, TrackMixState)> {
        self.mixer
            .track_keys()
            .map(str::to_string)
            .zip(self.mixer.states())
            .collect()
    }

    /// Gain currently applied to a track's stage
    pub fn track_gain(&self, key: &str) -> Option<f32> {
        self.mixer.gain_node(key).map(|g| g.gain())
    }

    pub fn get_current_time(&self) -> f64 {
        self.transport.current_time(&self.context)
    }

    /// Active song length in seconds, 0 with nothing loaded
    pub fn get_duration(&self) -> f64 {
        self.active.as_ref().map_or(0.0, |b| b.duration())
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.transport.state()
    }

    pub fn active_song_id(&self) -> Option<SongId> {
        self.active.as_ref().map(|b| b.song_id())
    }

    pub fn is_song_cached(&self, song_id: SongId) -> bool {
        self.cache.has(song_id)
    }

    pub fn cached_song_count(&self) -> usize {
        self.cache.len()
    }

    /// Cached songs, oldest first
    pub fn cached_song_ids(&self) -> Vec<SongId> {
        self.cache.song_ids()
    }

    /// Drop one song's decoded buffers. False if it is active or absent.
    pub fn clear_song_from_cache(&self, song_id: SongId) -> bool {
        self.cache.remove(song_id)
    }

    /// Stop playback and drop every decoded song
    pub fn clear_all_cached_buffers(&mut self) {
        self.transport.stop();
        self.cache.clear();
        self.mixer.clear();
        self.active = None;
        tracing::info!("Cleared all decoded songs");
    }

    /// Release the audio graph and all buffers. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.clear_all_cached_buffers();
        self.context.close();
        self.disposed = true;
        tracing::info!("Audio engine disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn activate(&mut self, buffers: Arc<SongBuffers>) {
        let song_id = buffers.song_id();

        self.transport.stop();
        self.mixer.activate(&self.context, song_id, &buffers);
        self.active = Some(buffers);
        self.apply_gains();

        tracing::info!(
            song_id,
            tracks = self.mixer.len(),
            seconds = self.get_duration(),
            "song loaded"
        );
    }

    /// Compose solo/mute across all tracks and push the result to the stages
    fn apply_gains(&self) {
        let gains = compose_gains(&self.mixer.states());
        for (key, gain) in self.mixer.track_keys().zip(gains) {
            self.mixer.apply_effective_gain(key, gain);
        }
    }
}

impl<C: AudioContext> Drop for AudioEngine<C> {
    fn drop(&mut self) {
        self.dispose();
    }
}
