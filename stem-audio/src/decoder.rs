//! Compressed track bytes to PCM

use crate::buffer::DecodedBuffer;
use std::io::Cursor;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

/// Errors that can occur while decoding one track
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("No audio track found in data")]
    NoAudioTrack,
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Resample error: {0}")]
    Resample(String),
    #[error("No audio frames decoded")]
    Empty,
}

/// Corrupt packets tolerated in one track before it is rejected
pub const MAX_SKIPPED_PACKETS: usize = 8;

/// Turns raw track bytes into a [`DecodedBuffer`]
///
/// `hint` is the track filename, used to guess the container format.
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8], hint: Option<&str>) -> Result<DecodedBuffer, DecodeError>;
}

/// Decoder backed by Symphonia, resampling to a fixed output rate
pub struct SymphoniaDecoder {
    target_sample_rate: u32,
}

impl Default for SymphoniaDecoder {
    fn default() -> Self {
        Self::new(48000)
    }
}

impl SymphoniaDecoder {
    pub fn new(target_sample_rate: u32) -> Self {
        Self { target_sample_rate }
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    /// Resample interleaved stereo audio to the target rate
    fn resample(&self, samples: &[f32], source_rate: u32) -> Result<Vec<f32>, DecodeError> {
        use rubato::{FftFixedInOut, Resampler};

        let channels = DecodedBuffer::CHANNELS;
        let frames = samples.len() / channels;
        let expected =
            (frames as u64 * self.target_sample_rate as u64 / source_rate as u64) as usize;

        let mut resampler = FftFixedInOut::<f32>::new(
            source_rate as usize,
            self.target_sample_rate as usize,
            1024,
            channels,
        )
        .map_err(|e| DecodeError::Resample(e.to_string()))?;

        let planar: Vec<Vec<f32>> = (0..channels)
            .map(|ch| samples.iter().skip(ch).step_by(channels).copied().collect())
            .collect();

        let chunk_size = resampler.input_frames_next();
        let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + chunk_size); channels];

        let mut pos = 0;
        while pos < frames {
            let end = (pos + chunk_size).min(frames);
            let chunk: Vec<Vec<f32>> = planar
                .iter()
                .map(|ch| {
                    let mut v = ch[pos..end].to_vec();
                    v.resize(chunk_size, 0.0);
                    v
                })
                .collect();

            let resampled = resampler
                .process(&chunk, None)
                .map_err(|e| DecodeError::Resample(e.to_string()))?;

            for (ch, data) in resampled.into_iter().enumerate() {
                output[ch].extend(data);
            }

            pos = end;
        }

        // Drop the output produced by tail padding
        for ch in &mut output {
            ch.truncate(expected);
        }

        let out_frames = output[0].len();
        let mut interleaved = Vec::with_capacity(out_frames * channels);
        for frame in 0..out_frames {
            for ch in &output {
                interleaved.push(ch[frame]);
            }
        }

        Ok(interleaved)
    }
}

impl AudioDecoder for SymphoniaDecoder {
    fn decode(&self, bytes: &[u8], hint: Option<&str>) -> Result<DecodedBuffer, DecodeError> {
        let source = Cursor::new(bytes.to_vec());
        let mss = MediaSourceStream::new(Box::new(source), Default::default());

        let mut probe_hint = Hint::new();
        if let Some(ext) = hint
            .and_then(|name| Path::new(name).extension())
            .and_then(|e| e.to_str())
        {
            probe_hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &probe_hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let source_sample_rate = codec_params.sample_rate.unwrap_or(44100);

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;

        // Everything is folded to interleaved stereo while decoding
        let mut samples: Vec<f32> = Vec::new();
        let mut last_error = None;
        let mut skipped = SkippedPackets::new(MAX_SKIPPED_PACKETS);

        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                    break;
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::trace!("Skipping undecodable packet: {}", e);
                    skipped.record(e)?;
                    last_error = Some(e.to_string());
                    continue;
                }
                Err(e) => return Err(DecodeError::Decode(e.to_string())),
            };

            let spec = *decoded.spec();
            let channels = spec.channels.count();
            if channels == 0 {
                continue;
            }

            let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);

            for frame in sample_buf.samples().chunks_exact(channels) {
                let left = frame[0];
                let right = if channels > 1 { frame[1] } else { left };
                samples.push(left);
                samples.push(right);
            }
        }

        if samples.is_empty() {
            return Err(match last_error {
                Some(e) => DecodeError::Decode(e),
                None => DecodeError::Empty,
            });
        }

        let (samples, sample_rate) = if source_sample_rate != self.target_sample_rate {
            (
                self.resample(&samples, source_sample_rate)?,
                self.target_sample_rate,
            )
        } else {
            (samples, source_sample_rate)
        };

        Ok(DecodedBuffer::new(samples, sample_rate))
    }
}

/// Counts packets dropped by the decoder
///
/// A few bad packets are skipped; past the limit the track fails so that a
/// damaged stem cannot come back shorter than its siblings.
struct SkippedPackets {
    count: usize,
    limit: usize,
}

impl SkippedPackets {
    fn new(limit: usize) -> Self {
        Self { count: 0, limit }
    }

    fn record(&mut self, reason: &str) -> Result<(), DecodeError> {
        self.count += 1;
        if self.count > self.limit {
            return Err(DecodeError::Decode(format!(
                "{} packets could not be decoded, last: {}",
                self.count, reason
            )));
        }
        Ok(())
    }
}
