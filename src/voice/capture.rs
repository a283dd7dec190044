//! Audio capture from microphone

use std::sync::mpsc as std_mpsc;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::mpsc;

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Samples per frame handed to the pipeline
pub const FRAME_SAMPLES: usize = 512;

/// Frames buffered between the device callback and the reader
const FRAME_QUEUE: usize = 32;

/// A source of fixed-size PCM frames
#[async_trait]
pub trait Microphone: Send {
    /// Next frame of [`FRAME_SAMPLES`] mono samples
    ///
    /// # Errors
    ///
    /// Returns error if the device stopped delivering audio
    async fn read(&mut self) -> Result<Vec<i16>>;
}

/// Opens a microphone on demand
///
/// The pipeline reopens through the factory after every unmute, so a
/// [`Microphone`] is owned for exactly one capture session.
pub trait MicrophoneFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns error if no input device can be opened
    fn open(&self) -> Result<Box<dyn Microphone>>;
}

/// Opens the default cpal input device
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalMicrophoneFactory;

impl MicrophoneFactory for CpalMicrophoneFactory {
    fn open(&self) -> Result<Box<dyn Microphone>> {
        Ok(Box::new(CpalMicrophone::open()?))
    }
}

/// Captures from the default input device
///
/// The cpal stream lives on a dedicated thread; dropping the microphone
/// stops that thread and releases the device.
pub struct CpalMicrophone {
    frames: mpsc::Receiver<Vec<i16>>,
    // Dropping this ends the capture thread
    _stop: std_mpsc::Sender<()>,
}

impl CpalMicrophone {
    /// Open the default input device at 16kHz mono
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn open() -> Result<Self> {
        let (frame_tx, frames) = mpsc::channel(FRAME_QUEUE);
        let (stop, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<()>>(1);

        std::thread::Builder::new()
            .name("microphone".to_string())
            .spawn(move || {
                let stream = match build_stream(frame_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Blocks until the microphone is dropped
                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("audio capture stopped");
            })?;

        ready_rx
            .recv()
            .map_err(|_| Error::Audio("capture thread exited during startup".to_string()))??;

        Ok(Self {
            frames,
            _stop: stop,
        })
    }
}

#[async_trait]
impl Microphone for CpalMicrophone {
    async fn read(&mut self) -> Result<Vec<i16>> {
        self.frames
            .recv()
            .await
            .ok_or_else(|| Error::Audio("microphone stream closed".to_string()))
    }
}

fn input_config(device: &cpal::Device) -> Result<StreamConfig> {
    let supported_config = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.sample_format() == cpal::SampleFormat::F32
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
        .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

    Ok(supported_config
        .with_sample_rate(SampleRate(SAMPLE_RATE))
        .config())
}

fn build_stream(frames: mpsc::Sender<Vec<i16>>) -> Result<cpal::Stream> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;
    let config = input_config(&device)?;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = SAMPLE_RATE,
        channels = config.channels,
        "audio capture initialized"
    );

    let mut pending: Vec<i16> = Vec::with_capacity(FRAME_SAMPLES * 2);
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                pending.extend(data.iter().map(|&s| f32_to_i16(s)));
                while pending.len() >= FRAME_SAMPLES {
                    let frame: Vec<i16> = pending.drain(..FRAME_SAMPLES).collect();
                    if frames.try_send(frame).is_err() {
                        tracing::trace!("audio frame dropped, reader behind");
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    tracing::debug!("audio capture started");
    Ok(stream)
}

#[allow(clippy::cast_possible_truncation)]
fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Names of available input and output devices
///
/// # Errors
///
/// Returns error if the audio host cannot enumerate devices
pub fn audio_devices() -> Result<(Vec<String>, Vec<String>)> {
    let host = cpal::default_host();
    let inputs = host
        .input_devices()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter_map(|d| d.name().ok())
        .collect();
    let outputs = host
        .output_devices()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter_map(|d| d.name().ok())
        .collect();
    Ok((inputs, outputs))
}

/// Encode PCM samples as a mono 16-bit WAV file
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Little-endian wire bytes of a PCM frame
#[must_use]
pub fn frame_to_bytes(frame: &[i16]) -> Vec<u8> {
    frame.iter().flat_map(|s| s.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_to_i16_clamps() {
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(-2.0), i16::MIN);
    }

    #[test]
    fn test_frame_to_bytes_little_endian() {
        assert_eq!(frame_to_bytes(&[1, -2]), vec![0x01, 0x00, 0xFE, 0xFF]);
    }

    #[test]
    fn test_samples_to_wav_header() {
        let wav = samples_to_wav(&[0; 160], SAMPLE_RATE).unwrap();
        assert_eq!(&wav[..4], b"RIFF");
        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
        assert_eq!(reader.len(), 160);
    }
}
