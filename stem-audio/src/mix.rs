//! Per-track mix state and solo/mute gain composition

/// Volume, mute and solo of one track
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackMixState {
    /// Fader level in [0.0, 1.0]
    pub volume: f32,
    pub muted: bool,
    pub solo: bool,
}

impl Default for TrackMixState {
    fn default() -> Self {
        Self {
            volume: 1.0,
            muted: false,
            solo: false,
        }
    }
}

impl TrackMixState {
    /// Clamp a fader value into range
    pub fn clamp_volume(volume: f32) -> f32 {
        if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        }
    }
}

/// Gain one track should have given whether any track in the song is soloed
///
/// Mute always wins. While any solo is engaged only soloed tracks sound.
pub fn effective_gain(state: &TrackMixState, any_solo: bool) -> f32 {
    if state.muted {
        0.0
    } else if !any_solo || state.solo {
        state.volume
    } else {
        0.0
    }
}

/// Effective gains for every track of a song, in the same order
pub fn compose_gains(states: &[TrackMixState]) -> Vec<f32> {
    let any_solo = states.iter().any(|s| s.solo);
    states.iter().map(|s| effective_gain(s, any_solo)).collect()
}
