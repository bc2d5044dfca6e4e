//! Audio output - drives the graph renderer from the sound card
//!
//! The cpal stream lives on its own thread for the whole session. Without a
//! usable device the renderer is driven by a timer instead, so the transport
//! clock still runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Sender;

use stem_audio::{GraphContext, GraphRenderer};

/// Sample rate used when no device is available
const FALLBACK_SAMPLE_RATE: u32 = 48000;

/// Running output thread
pub struct AudioOutput {
    description: String,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AudioOutput {
    /// Open the default output device and return the graph it drives
    pub fn start() -> anyhow::Result<(GraphContext, AudioOutput)> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let flag = shutdown.clone();
        let handle = thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || run_output_thread(ready_tx, flag))
            .context("failed to spawn audio output thread")?;

        let (context, description) = ready_rx
            .recv()
            .context("audio output thread exited before starting")?;

        Ok((
            context,
            AudioOutput {
                description,
                shutdown,
                handle: Some(handle),
            },
        ))
    }

    /// Device name and format, for display
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Stop the stream and wait for the output thread
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_output_thread(ready: Sender<(GraphContext, String)>, shutdown: Arc<AtomicBool>) {
    match open_device() {
        Ok((device, config, name)) => {
            let sample_rate = config.sample_rate.0;
            let channels = config.channels as usize;
            let (context, renderer) = GraphContext::new(sample_rate);

            match build_stream(&device, &config, renderer) {
                Ok(stream) => {
                    let description = format!("{} ({} Hz, {} ch)", name, sample_rate, channels);
                    tracing::info!("Audio output: {}", description);
                    if ready.send((context, description)).is_err() {
                        return;
                    }
                    while !shutdown.load(Ordering::Relaxed) {
                        thread::sleep(Duration::from_millis(20));
                    }
                    drop(stream);
                    return;
                }
                Err(e) => tracing::warn!("Failed to start audio stream: {:#}", e),
            }
        }
        Err(e) => tracing::warn!("No audio output: {:#}", e),
    }

    let (context, renderer) = GraphContext::new(FALLBACK_SAMPLE_RATE);
    let description = format!("silent ({} Hz, no device)", FALLBACK_SAMPLE_RATE);
    if ready.send((context, description)).is_err() {
        return;
    }
    run_silent(renderer, FALLBACK_SAMPLE_RATE, &shutdown);
}

fn open_device() -> anyhow::Result<(cpal::Device, cpal::StreamConfig, String)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .context("no audio output device found")?;
    let config = device
        .default_output_config()
        .context("failed to get audio config")?;
    let name = device.name().unwrap_or_else(|_| "default output".to_string());

    Ok((device, config.into(), name))
}

fn build_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut renderer: GraphRenderer,
) -> anyhow::Result<cpal::Stream> {
    let channels = config.channels as usize;

    let stream = device.build_output_stream(
        config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            renderer.render(data, channels);
        },
        |err| {
            tracing::error!("Audio stream error: {}", err);
        },
        None,
    )?;
    stream.play()?;

    Ok(stream)
}

/// Render into a scratch buffer in real time
fn run_silent(mut renderer: GraphRenderer, sample_rate: u32, shutdown: &AtomicBool) {
    let block = Duration::from_millis(10);
    let frames = (sample_rate / 100) as usize;
    let mut scratch = vec![0.0f32; frames * 2];

    while !shutdown.load(Ordering::Relaxed) {
        renderer.render(&mut scratch, 2);
        thread::sleep(block);
    }
}
