//! Audio graph abstraction
//!
//! The engine never touches an output device directly. It schedules sources
//! against an [`AudioContext`], which owns the clock and the output sink.

use crate::buffer::DecodedBuffer;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// An audio graph with a monotonic clock and an output sink
pub trait AudioContext: Send + Sync {
    /// One-shot playback source produced by this context
    type Source: PlaybackSource;

    /// Context clock in seconds
    fn current_time(&self) -> f64;

    /// Output sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Create a gain stage wired to the output sink
    fn create_gain(&self) -> GainNode;

    /// Create a source that will play `buffer` through `output`
    fn create_source(&self, buffer: Arc<DecodedBuffer>, output: &GainNode) -> Self::Source;

    /// Release the output; later sources are silent
    fn close(&self);
}

/// A one-shot playback source
///
/// Started at most once. Stopping consumes it, so a stopped source can never
/// be restarted.
pub trait PlaybackSource: Send {
    /// Begin playback at context time `when`, from `offset` seconds into the buffer
    fn start(&mut self, when: f64, offset: f64);

    /// Halt playback
    fn stop(self);
}

/// Per-track gain stage
///
/// Cloning yields another handle to the same stage. The value is read by the
/// render thread on every block.
#[derive(Debug, Clone)]
pub struct GainNode {
    gain: Arc<AtomicU32>,
}

impl Default for GainNode {
    fn default() -> Self {
        Self::new()
    }
}

impl GainNode {
    /// New stage at unity gain
    pub fn new() -> Self {
        Self {
            gain: Arc::new(AtomicU32::new(1.0f32.to_bits())),
        }
    }

    /// Set the gain, clamped to [0.0, 1.0]
    pub fn set_gain(&self, gain: f32) {
        let gain = if gain.is_nan() { 0.0 } else { gain.clamp(0.0, 1.0) };
        self.gain.store(gain.to_bits(), Ordering::Relaxed);
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    /// True if both handles drive the same stage
    pub fn same_node(&self, other: &GainNode) -> bool {
        Arc::ptr_eq(&self.gain, &other.gain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_defaults_to_unity() {
        assert_eq!(GainNode::new().gain(), 1.0);
    }

    #[test]
    fn test_gain_clamped() {
        let node = GainNode::new();
        node.set_gain(1.7);
        assert_eq!(node.gain(), 1.0);
        node.set_gain(-0.3);
        assert_eq!(node.gain(), 0.0);
        node.set_gain(f32::NAN);
        assert_eq!(node.gain(), 0.0);
    }

    #[test]
    fn test_clones_share_stage() {
        let node = GainNode::new();
        let handle = node.clone();
        handle.set_gain(0.25);
        assert_eq!(node.gain(), 0.25);
        assert!(node.same_node(&handle));
        assert!(!node.same_node(&GainNode::new()));
    }
}
