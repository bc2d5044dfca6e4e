//! Transport - synchronized play/pause/stop/seek over all tracks of a song
//!
//! Position is derived from the context clock rather than counted, so every
//! track shares one timeline. Each play creates fresh one-shot sources and
//! starts them all with the same `when` and `offset`.

use crate::buffer::SongBuffers;
use crate::context::{AudioContext, PlaybackSource};
use crate::error::EngineError;
use crate::mixer::MixingGraph;

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl PlaybackState {
    pub fn label(&self) -> &'static str {
        match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        }
    }
}

/// Shared timeline for the active song's sources
pub struct Transport<S> {
    state: PlaybackState,
    /// Context time corresponding to song position 0
    origin: f64,
    /// Song position to resume from when not playing
    paused_offset: f64,
    sources: Vec<S>,
}

impl<S> Default for Transport<S> {
    fn default() -> Self {
        Self {
            state: PlaybackState::Stopped,
            origin: 0.0,
            paused_offset: 0.0,
            sources: Vec::new(),
        }
    }
}

impl<S: PlaybackSource> Transport<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    /// Number of live sources (one per track while playing)
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Start every track from the stored offset
    ///
    /// No-op while already playing.
    pub fn play<C>(
        &mut self,
        context: &C,
        mixer: &MixingGraph,
        buffers: &SongBuffers,
    ) -> Result<(), EngineError>
    where
        C: AudioContext<Source = S>,
    {
        if buffers.is_empty() {
            return Err(EngineError::NoAudioLoaded);
        }
        if self.is_playing() {
            tracing::debug!("Already playing");
            return Ok(());
        }

        self.stop_sources();

        let mut sources = Vec::with_capacity(buffers.len());
        for track in buffers.iter() {
            match mixer.gain_node(&track.key) {
                Some(gain) => sources.push(context.create_source(track.buffer.clone(), gain)),
                None => tracing::warn!("No gain stage for track {}", track.key),
            }
        }

        // One clock read for all tracks
        let offset = self.paused_offset;
        let when = context.current_time();
        self.origin = when - offset;
        for source in &mut sources {
            source.start(when, offset);
        }

        self.sources = sources;
        self.state = PlaybackState::Playing;
        tracing::debug!("Playing {} tracks from {:.3}s", self.sources.len(), offset);
        Ok(())
    }

    /// Freeze the position and silence all tracks. Only acts while playing.
    pub fn pause<C: AudioContext>(&mut self, context: &C) {
        if !self.is_playing() {
            return;
        }
        self.paused_offset = (context.current_time() - self.origin).max(0.0);
        self.stop_sources();
        self.state = PlaybackState::Paused;
    }

    /// Silence all tracks and rewind to 0
    pub fn stop(&mut self) {
        self.stop_sources();
        self.paused_offset = 0.0;
        self.origin = 0.0;
        self.state = PlaybackState::Stopped;
    }

    /// Move to `time` seconds, clamped to the song length
    ///
    /// Playback continues from the new position if it was running.
    pub fn seek<C>(
        &mut self,
        context: &C,
        mixer: &MixingGraph,
        buffers: &SongBuffers,
        time: f64,
    ) -> Result<(), EngineError>
    where
        C: AudioContext<Source = S>,
    {
        let target = time.clamp(0.0, buffers.duration());

        if self.is_playing() {
            self.stop_sources();
            self.paused_offset = target;
            self.state = PlaybackState::Paused;
            self.play(context, mixer, buffers)
        } else {
            self.paused_offset = target;
            Ok(())
        }
    }

    /// Song position in seconds
    pub fn current_time<C: AudioContext>(&self, context: &C) -> f64 {
        match self.state {
            PlaybackState::Playing => (context.current_time() - self.origin).max(0.0),
            PlaybackState::Paused | PlaybackState::Stopped => self.paused_offset,
        }
    }

    fn stop_sources(&mut self) {
        for source in self.sources.drain(..) {
            source.stop();
        }
    }
}
