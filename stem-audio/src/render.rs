//! Sample-accurate software audio graph
//!
//! [`GraphContext`] is the control side: it hands out sources and gain
//! stages and forwards scheduling commands over a channel. [`GraphRenderer`]
//! lives on the output thread and mixes every scheduled voice into the
//! device buffer, advancing the shared clock as it goes.

use crate::buffer::DecodedBuffer;
use crate::context::{AudioContext, GainNode, PlaybackSource};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Commands sent from the control side to the render thread
#[derive(Debug)]
enum GraphCommand {
    Start {
        id: u64,
        buffer: Arc<DecodedBuffer>,
        gain: GainNode,
        start_frame: u64,
        offset_frame: usize,
    },
    Stop {
        id: u64,
    },
    Close,
}

/// Control half of the software graph
pub struct GraphContext {
    commands: Sender<GraphCommand>,
    clock: Arc<AtomicU64>,
    sample_rate: u32,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl GraphContext {
    /// Create a context and the renderer that drives its clock
    pub fn new(sample_rate: u32) -> (Self, GraphRenderer) {
        let (tx, rx) = unbounded();
        let clock = Arc::new(AtomicU64::new(0));

        let context = Self {
            commands: tx,
            clock: Arc::clone(&clock),
            sample_rate,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        };
        let renderer = GraphRenderer {
            commands: rx,
            clock,
            voices: Vec::with_capacity(64),
            bus: vec![0.0; MAX_BUFFER_SIZE],
            closed: false,
        };

        (context, renderer)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn seconds_to_frames(&self, seconds: f64) -> f64 {
        (seconds.max(0.0) * self.sample_rate as f64).round()
    }
}

impl AudioContext for GraphContext {
    type Source = GraphSource;

    fn current_time(&self) -> f64 {
        self.clock.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn create_gain(&self) -> GainNode {
        GainNode::new()
    }

    fn create_source(&self, buffer: Arc<DecodedBuffer>, output: &GainNode) -> GraphSource {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        GraphSource {
            id,
            buffer,
            gain: output.clone(),
            commands: self.commands.clone(),
            sample_rate: self.sample_rate,
            started: false,
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.commands.send(GraphCommand::Close);
        tracing::debug!("Audio graph closed");
    }
}

/// One-shot source scheduled on a [`GraphContext`]
pub struct GraphSource {
    id: u64,
    buffer: Arc<DecodedBuffer>,
    gain: GainNode,
    commands: Sender<GraphCommand>,
    sample_rate: u32,
    started: bool,
}

impl GraphSource {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl PlaybackSource for GraphSource {
    fn start(&mut self, when: f64, offset: f64) {
        if self.started {
            tracing::warn!("Source {} already started", self.id);
            return;
        }
        self.started = true;

        let rate = self.sample_rate as f64;
        let _ = self.commands.send(GraphCommand::Start {
            id: self.id,
            buffer: Arc::clone(&self.buffer),
            gain: self.gain.clone(),
            start_frame: (when.max(0.0) * rate).round() as u64,
            offset_frame: (offset.max(0.0) * rate).round() as usize,
        });
    }

    fn stop(self) {
        if self.started {
            let _ = self.commands.send(GraphCommand::Stop { id: self.id });
        }
    }
}

/// Pre-allocated mix bus size in samples (stereo)
const MAX_BUFFER_SIZE: usize = 4096;

/// Frames mixed per pass through the bus
const MAX_BLOCK_FRAMES: usize = MAX_BUFFER_SIZE / DecodedBuffer::CHANNELS;

/// Gain smoothing coefficient (~5ms at 48kHz)
const GAIN_SMOOTH_COEFF: f32 = 0.995;

/// A scheduled or sounding source on the render thread
struct Voice {
    id: u64,
    buffer: Arc<DecodedBuffer>,
    gain: GainNode,
    start_frame: u64,
    position: usize,
    smoothed_gain: f32,
}

/// Render half of the software graph, owned by the output thread
pub struct GraphRenderer {
    commands: Receiver<GraphCommand>,
    clock: Arc<AtomicU64>,
    voices: Vec<Voice>,
    bus: Vec<f32>,
    closed: bool,
}

impl GraphRenderer {
    /// Mix one block into `output` (interleaved, `channels` wide)
    ///
    /// Mono output gets the average of left and right. Channels beyond the
    /// second are left silent.
    pub fn render(&mut self, output: &mut [f32], channels: usize) {
        let channels = channels.max(1);

        self.drain_commands();

        // Large callbacks are mixed in bus-sized pieces
        for block in output.chunks_mut(MAX_BLOCK_FRAMES * channels) {
            self.render_block(block, channels);
        }
    }

    fn render_block(&mut self, output: &mut [f32], channels: usize) {
        let frames = output.len() / channels;
        let bus = &mut self.bus[..frames * DecodedBuffer::CHANNELS];
        bus.fill(0.0);

        let block_start = self.clock.load(Ordering::Acquire);

        for voice in &mut self.voices {
            let first = voice.start_frame.saturating_sub(block_start);
            if first >= frames as u64 {
                continue;
            }

            let target = voice.gain.gain();
            let available = voice.buffer.frames();

            for frame in first as usize..frames {
                if voice.position >= available {
                    break;
                }
                voice.smoothed_gain =
                    GAIN_SMOOTH_COEFF * voice.smoothed_gain + (1.0 - GAIN_SMOOTH_COEFF) * target;

                let (left, right) = voice.buffer.frame(voice.position);
                bus[frame * 2] += left * voice.smoothed_gain;
                bus[frame * 2 + 1] += right * voice.smoothed_gain;
                voice.position += 1;
            }
        }

        self.voices.retain(|v| v.position < v.buffer.frames());

        for (frame, out) in output.chunks_exact_mut(channels).enumerate() {
            let left = soft_clip(bus[frame * 2]);
            let right = soft_clip(bus[frame * 2 + 1]);
            match out {
                [mono] => *mono = (left + right) * 0.5,
                [l, r, rest @ ..] => {
                    *l = left;
                    *r = right;
                    rest.fill(0.0);
                }
                [] => {}
            }
        }

        self.clock.fetch_add(frames as u64, Ordering::AcqRel);
    }

    /// Number of voices scheduled or sounding
    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Buffer position of every voice, in start order
    pub fn voice_positions(&self) -> Vec<usize> {
        self.voices.iter().map(|v| v.position).collect()
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                GraphCommand::Start {
                    id,
                    buffer,
                    gain,
                    start_frame,
                    offset_frame,
                } => {
                    if self.closed {
                        continue;
                    }
                    let smoothed_gain = gain.gain();
                    self.voices.push(Voice {
                        id,
                        buffer,
                        gain,
                        start_frame,
                        position: offset_frame,
                        smoothed_gain,
                    });
                }
                GraphCommand::Stop { id } => {
                    self.voices.retain(|v| v.id != id);
                }
                GraphCommand::Close => {
                    self.closed = true;
                    self.voices.clear();
                }
            }
        }
    }
}

/// Soft clip threshold
const SOFT_CLIP_THRESHOLD: f32 = 0.75;
/// Soft clip ceiling
const SOFT_CLIP_CEILING: f32 = 0.89;

/// Gentle soft clipper for the summed stems
///
/// Transparent below the threshold, asymptotic to the ceiling above it.
#[inline(always)]
fn soft_clip(x: f32) -> f32 {
    let abs_x = x.abs();
    if abs_x <= SOFT_CLIP_THRESHOLD {
        return x;
    }

    let knee_width = SOFT_CLIP_CEILING - SOFT_CLIP_THRESHOLD;
    let ratio = (abs_x - SOFT_CLIP_THRESHOLD) / knee_width;
    let compressed = SOFT_CLIP_THRESHOLD + knee_width * (1.0 - (-ratio * 3.0).exp());
    x.signum() * compressed.min(SOFT_CLIP_CEILING)
}
