//! CPAL audio output wrapper.
//!
//! The device callback is chunked into engine blocks; each global output
//! port is mixed into device channel `port % channels`.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::engine::Engine;
use crate::error::{Error, Result};

const PREFERRED_BLOCK: usize = 512;

/// Wrapper to hold a `cpal::Stream` in a `Send` context.
///
/// `cpal::Stream` is `!Send` due to platform internals. The stream never
/// moves across threads after creation; it lives inside `AudioOutput`
/// until the host tears it down on the main thread.
struct StreamHandle(#[allow(dead_code)] cpal::Stream);

// SAFETY: see above; the handle is only created and dropped on the main
// thread.
unsafe impl Send for StreamHandle {}

pub struct AudioOutput {
    sample_rate: u32,
    channels: usize,
    block_size: usize,
    stream: Option<StreamHandle>,
}

impl AudioOutput {
    /// Probe the default output device for its rate and block size.
    pub fn new() -> Result<Self> {
        let device = default_device()?;
        let config = device.default_output_config()?;

        let block_size = match config.buffer_size() {
            cpal::SupportedBufferSize::Range { min, max } => {
                (PREFERRED_BLOCK as u32).clamp(*min, *max) as usize
            }
            cpal::SupportedBufferSize::Unknown => PREFERRED_BLOCK,
        };

        Ok(Self {
            sample_rate: config.sample_rate().0,
            channels: config.channels() as usize,
            block_size,
            stream: None,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Hand the engine to the device callback and start streaming.
    pub fn start(&mut self, engine: Engine) -> Result<()> {
        let device = default_device()?;
        let config = device.default_output_config()?;

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => self.build_stream::<f32>(&device, &config.into(), engine)?,
            cpal::SampleFormat::I16 => self.build_stream::<i16>(&device, &config.into(), engine)?,
            cpal::SampleFormat::U16 => self.build_stream::<u16>(&device, &config.into(), engine)?,
            format => {
                return Err(Error::UnsupportedSampleFormat(format!("{format:?}")));
            }
        };
        stream.play()?;
        self.stream = Some(StreamHandle(stream));
        Ok(())
    }

    fn build_stream<T>(
        &self,
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut engine: Engine,
    ) -> Result<cpal::Stream>
    where
        T: cpal::SizedSample + cpal::FromSample<f32>,
    {
        let channels = config.channels as usize;
        let block = self.block_size;
        let mut mix = vec![0.0f32; block * channels];

        let stream = device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let total_frames = data.len() / channels;
                let mut done = 0;
                while done < total_frames {
                    let chunk = (total_frames - done).min(block);
                    engine.process_block(chunk);

                    let mix = &mut mix[..chunk * channels];
                    mix.fill(0.0);
                    for port in 0..engine.output_count() {
                        let ch = port % channels;
                        let buf = engine.output(port);
                        for (frame, sample) in buf[..chunk].iter().enumerate() {
                            mix[frame * channels + ch] += sample;
                        }
                    }

                    for (i, value) in mix.iter().enumerate() {
                        data[done * channels + i] = T::from_sample(*value);
                    }
                    done += chunk;
                }
            },
            |_err| {
                // Audio stream error - cannot log from callback.
            },
            None,
        )?;
        Ok(stream)
    }

    /// Tear the stream down; no block call is in flight afterwards.
    pub fn stop(&mut self) {
        self.stream = None;
    }
}

fn default_device() -> Result<cpal::Device> {
    cpal::default_host()
        .default_output_device()
        .ok_or(Error::NoOutputDevice)
}
