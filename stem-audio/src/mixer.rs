//! Mixing graph - one gain stage per track of the active song

use crate::buffer::SongBuffers;
use crate::context::{AudioContext, GainNode};
use crate::mix::TrackMixState;
use stem_library::SongId;

/// Gain stage and mix settings of one track
#[derive(Debug)]
struct Channel {
    key: String,
    gain: GainNode,
    state: TrackMixState,
}

/// Per-track gain stages for the active song
///
/// Setters only record the user's intent; the audible gain is pushed
/// separately through [`MixingGraph::apply_effective_gain`] once solo and
/// mute have been composed across all tracks.
#[derive(Debug, Default)]
pub struct MixingGraph {
    song_id: Option<SongId>,
    channels: Vec<Channel>,
}

impl MixingGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build fresh gain stages for `buffers`, discarding the previous song's
    ///
    /// Every track starts at volume 1, unmuted, not soloed.
    pub fn activate<C: AudioContext>(&mut self, context: &C, song_id: SongId, buffers: &SongBuffers) {
        self.channels = buffers
            .iter()
            .map(|track| {
                let gain = context.create_gain();
                gain.set_gain(1.0);
                Channel {
                    key: track.key.clone(),
                    gain,
                    state: TrackMixState::default(),
                }
            })
            .collect();
        self.song_id = Some(song_id);
    }

    pub fn song_id(&self) -> Option<SongId> {
        self.song_id
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Set a track's fader, clamped to [0.0, 1.0]. False if the key is unknown.
    pub fn set_volume(&mut self, key: &str, volume: f32) -> bool {
        self.with_state(key, |s| s.volume = TrackMixState::clamp_volume(volume))
    }

    pub fn set_muted(&mut self, key: &str, muted: bool) -> bool {
        self.with_state(key, |s| s.muted = muted)
    }

    pub fn set_solo(&mut self, key: &str, solo: bool) -> bool {
        self.with_state(key, |s| s.solo = solo)
    }

    /// Push the audible gain for one track into its gain stage
    pub fn apply_effective_gain(&self, key: &str, gain: f32) -> bool {
        match self.channel(key) {
            Some(channel) => {
                channel.gain.set_gain(gain);
                true
            }
            None => false,
        }
    }

    pub fn gain_node(&self, key: &str) -> Option<&GainNode> {
        self.channel(key).map(|c| &c.gain)
    }

    pub fn state(&self, key: &str) -> Option<TrackMixState> {
        self.channel(key).map(|c| c.state)
    }

    /// Mix states in track order
    pub fn states(&self) -> Vec<TrackMixState> {
        self.channels.iter().map(|c| c.state).collect()
    }

    /// Track keys in track order
    pub fn track_keys(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|c| c.key.as_str())
    }

    /// Return every track to volume 1, unmuted, not soloed
    pub fn reset_states(&mut self) {
        for channel in &mut self.channels {
            channel.state = TrackMixState::default();
        }
    }

    /// Drop all gain stages
    pub fn clear(&mut self) {
        self.channels.clear();
        self.song_id = None;
    }

    fn channel(&self, key: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.key == key)
    }

    fn with_state(&mut self, key: &str, f: impl FnOnce(&mut TrackMixState)) -> bool {
        match self.channels.iter_mut().find(|c| c.key == key) {
            Some(channel) => {
                f(&mut channel.state);
                true
            }
            None => false,
        }
    }
}
