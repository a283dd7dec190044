//! Audio playback to speakers
//!
//! [`AudioOutput`] is the sink contract the player façade drives; [`CpalOutput`]
//! implements it on the default output device, fetching `http(s)` URLs or
//! reading local files and decoding MP3 or WAV.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};

use crate::{Error, Result};

/// How often playback progress is reported
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Poll interval of the playback thread
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Observer of one playback
pub trait PlaybackListener: Send + Sync {
    /// Total length is known
    fn on_duration(&self, _duration_ms: u64) {}

    /// First audio reached the device
    fn on_started(&self) {}

    /// Periodic position report
    fn on_progress(&self, _position_ms: u64, _duration_ms: u64) {}

    /// Playback ended on its own or failed; not called after `stop()`
    fn on_finished(&self);
}

/// A playback sink
///
/// `play` tears down any playback in flight (without notifying its listener)
/// before starting the new one.
pub trait AudioOutput: Send + Sync {
    /// Play `sources` back to back
    fn play(&self, sources: Vec<String>, listener: Option<Arc<dyn PlaybackListener>>);

    /// Stop and detach the current listener
    fn stop(&self);

    fn pause(&self);

    fn resume(&self);

    fn set_volume(&self, volume: f32);

    fn volume(&self) -> f32;

    fn is_playing(&self) -> bool;
}

/// Listener that runs a closure once when playback finishes
pub struct OnFinished(Mutex<Option<Box<dyn FnOnce() + Send>>>);

impl OnFinished {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Arc<Self> {
        Arc::new(Self(Mutex::new(Some(Box::new(f)))))
    }
}

impl PlaybackListener for OnFinished {
    fn on_finished(&self) {
        let f = self.0.lock().ok().and_then(|mut slot| slot.take());
        if let Some(f) = f {
            f();
        }
    }
}

/// Decoded mono audio
struct Clip {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl Clip {
    fn duration_ms(&self) -> u64 {
        (self.samples.len() as u64 * 1000) / u64::from(self.sample_rate.max(1))
    }
}

/// Flags shared with one playback thread
struct Session {
    stopped: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    playing: Arc<AtomicBool>,
}

/// Plays to the default output device
pub struct CpalOutput {
    name: &'static str,
    volume: Arc<AtomicU32>,
    session: Mutex<Option<Session>>,
}

impl CpalOutput {
    /// Create an output; the device is opened per playback
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            volume: Arc::new(AtomicU32::new(1.0_f32.to_bits())),
            session: Mutex::new(None),
        }
    }

    fn with_session(&self, f: impl FnOnce(&Session)) {
        if let Ok(guard) = self.session.lock() {
            if let Some(session) = guard.as_ref() {
                f(session);
            }
        }
    }
}

impl AudioOutput for CpalOutput {
    fn play(&self, sources: Vec<String>, listener: Option<Arc<dyn PlaybackListener>>) {
        self.stop();

        let session = Session {
            stopped: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            playing: Arc::new(AtomicBool::new(true)),
        };
        let stopped = Arc::clone(&session.stopped);
        let paused = Arc::clone(&session.paused);
        let playing = Arc::clone(&session.playing);
        if let Ok(mut guard) = self.session.lock() {
            *guard = Some(session);
        }

        let volume = Arc::clone(&self.volume);
        let name = self.name;
        let spawned = std::thread::Builder::new()
            .name(format!("{name}-playback"))
            .spawn(move || {
                let result = play_sources(&sources, &volume, &stopped, &paused, listener.as_deref());
                playing.store(false, Ordering::Release);
                if let Err(e) = &result {
                    tracing::warn!(output = name, error = %e, "playback failed");
                }
                if !stopped.load(Ordering::Acquire) {
                    if let Some(listener) = listener {
                        listener.on_finished();
                    }
                }
            });

        if let Err(e) = spawned {
            tracing::error!(output = name, error = %e, "failed to spawn playback thread");
        }
    }

    fn stop(&self) {
        let previous = self.session.lock().ok().and_then(|mut guard| guard.take());
        if let Some(session) = previous {
            session.stopped.store(true, Ordering::Release);
            session.playing.store(false, Ordering::Release);
            tracing::debug!(output = self.name, "playback stopped");
        }
    }

    fn pause(&self) {
        self.with_session(|s| s.paused.store(true, Ordering::Release));
    }

    fn resume(&self) {
        self.with_session(|s| s.paused.store(false, Ordering::Release));
    }

    fn set_volume(&self, volume: f32) {
        self.volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Release);
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Acquire))
    }

    fn is_playing(&self) -> bool {
        let mut playing = false;
        self.with_session(|s| playing = s.playing.load(Ordering::Acquire));
        playing
    }
}

/// Load, decode and play every source in order on the current thread
fn play_sources(
    sources: &[String],
    volume: &Arc<AtomicU32>,
    stopped: &Arc<AtomicBool>,
    paused: &Arc<AtomicBool>,
    listener: Option<&dyn PlaybackListener>,
) -> Result<()> {
    let mut clips = Vec::with_capacity(sources.len());
    for source in sources.iter().filter(|s| !s.is_empty()) {
        let bytes = load_source(source)?;
        clips.push(decode(&bytes)?);
        if stopped.load(Ordering::Acquire) {
            return Ok(());
        }
    }

    let total_ms: u64 = clips.iter().map(Clip::duration_ms).sum();
    if let Some(listener) = listener {
        listener.on_duration(total_ms);
    }

    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let mut offset_ms = 0;
    for (index, clip) in clips.into_iter().enumerate() {
        let clip_ms = clip.duration_ms();
        play_clip(&device, clip, volume, stopped, paused, |position_ms| {
            if let Some(listener) = listener {
                if index == 0 && position_ms == 0 {
                    listener.on_started();
                }
                listener.on_progress(offset_ms + position_ms, total_ms);
            }
        })?;
        if stopped.load(Ordering::Acquire) {
            return Ok(());
        }
        offset_ms += clip_ms;
    }

    Ok(())
}

fn output_config(device: &Device, sample_rate: u32) -> Result<StreamConfig> {
    let rate = SampleRate(sample_rate);
    device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .find(|c| c.channels() <= 2 && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
        .map(|c| c.with_sample_rate(rate).config())
        .or_else(|| {
            // Fallback: device default, resampled
            device
                .default_output_config()
                .ok()
                .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
                .map(|c| c.config())
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))
}

/// Play one clip, blocking until it ends or `stopped` is set
fn play_clip(
    device: &Device,
    clip: Clip,
    volume: &Arc<AtomicU32>,
    stopped: &Arc<AtomicBool>,
    paused: &Arc<AtomicBool>,
    mut on_position: impl FnMut(u64),
) -> Result<()> {
    if clip.samples.is_empty() {
        return Ok(());
    }

    let config = output_config(device, clip.sample_rate)?;
    let channels = usize::from(config.channels);
    let step = f64::from(clip.sample_rate) / f64::from(config.sample_rate.0);

    let samples = Arc::new(clip.samples);
    let frames_played = Arc::new(AtomicUsize::new(0));

    let stream = {
        let samples = Arc::clone(&samples);
        let frames_played = Arc::clone(&frames_played);
        let volume = Arc::clone(volume);
        let paused = Arc::clone(paused);
        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let gain = f32::from_bits(volume.load(Ordering::Acquire));
                    let is_paused = paused.load(Ordering::Acquire);
                    let mut frame_index = frames_played.load(Ordering::Acquire);

                    for frame in data.chunks_mut(channels) {
                        #[allow(
                            clippy::cast_possible_truncation,
                            clippy::cast_sign_loss,
                            clippy::cast_precision_loss
                        )]
                        let source_index = (frame_index as f64 * step) as usize;
                        let sample = if is_paused {
                            0.0
                        } else if let Some(s) = samples.get(source_index) {
                            frame_index += 1;
                            s * gain
                        } else {
                            0.0
                        };
                        frame.fill(sample);
                    }

                    frames_played.store(frame_index, Ordering::Release);
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    on_position(0);

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let total_frames = (samples.len() as f64 / step) as usize;
    let output_rate = u64::from(config.sample_rate.0.max(1));
    let mut since_report = Duration::ZERO;

    while !stopped.load(Ordering::Acquire) {
        let played = frames_played.load(Ordering::Acquire);
        if played >= total_frames {
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
        since_report += POLL_INTERVAL;
        if since_report >= PROGRESS_INTERVAL {
            since_report = Duration::ZERO;
            on_position(played as u64 * 1000 / output_rate);
        }
    }

    // Let the device drain its buffer
    if !stopped.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(100));
    }

    drop(stream);
    tracing::debug!(samples = samples.len(), "clip playback complete");
    Ok(())
}

/// Fetch a URL or read a local file
fn load_source(source: &str) -> Result<Vec<u8>> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let response = reqwest::blocking::get(source)?.error_for_status()?;
        Ok(response.bytes()?.to_vec())
    } else {
        let path = source.strip_prefix("file://").unwrap_or(source);
        Ok(std::fs::read(path)?)
    }
}

/// Decode WAV (by RIFF header) or MP3 bytes into mono f32 samples
fn decode(bytes: &[u8]) -> Result<Clip> {
    if bytes.starts_with(b"RIFF") {
        decode_wav(bytes)
    } else {
        decode_mp3(bytes)
    }
}

fn decode_wav(bytes: &[u8]) -> Result<Clip> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
        hound::SampleFormat::Int => {
            #[allow(clippy::cast_precision_loss)]
            let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(e.to_string()))?
        }
    };

    Ok(Clip {
        samples: downmix(&interleaved, channels),
        sample_rate: spec.sample_rate,
    })
}

fn decode_mp3(mp3_data: &[u8]) -> Result<Clip> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(sample_rate);
                let data: Vec<f32> = frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(downmix(&data, frame.channels.max(1)));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Audio("no MP3 frames decoded".to_string()));
    }

    Ok(Clip {
        samples,
        sample_rate,
    })
}

/// Average interleaved channels into mono
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    #[allow(clippy::cast_precision_loss)]
    let divisor = channels as f32;
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / divisor)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn test_downmix_stereo() {
        assert_eq!(downmix(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
        assert_eq!(downmix(&[0.25], 1), vec![0.25]);
    }

    #[test]
    fn test_decode_wav() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..1600 {
                writer.write_sample(16384_i16).unwrap();
            }
            writer.finalize().unwrap();
        }

        let clip = decode(&cursor.into_inner()).unwrap();
        assert_eq!(clip.sample_rate, 16000);
        assert_eq!(clip.samples.len(), 1600);
        assert_eq!(clip.duration_ms(), 100);
        assert!((clip.samples[0] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode(b"not audio at all").is_err());
    }

    #[test]
    fn test_on_finished_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let listener = OnFinished::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        listener.on_finished();
        listener.on_finished();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_volume_clamped() {
        let output = CpalOutput::new("test");
        output.set_volume(3.0);
        assert!((output.volume() - 1.0).abs() < f32::EPSILON);
        assert!(!output.is_playing());
    }
}
