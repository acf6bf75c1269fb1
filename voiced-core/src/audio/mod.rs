//! Audio Source: continuous 16 kHz mono PCM capture, shared by the wake
//! detector and the command listener via a pull interface.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated (TIME_CRITICAL on
//! Windows) priority. It **must not**:
//! - Allocate heap memory
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! This module satisfies that contract by writing directly into an SPSC ring buffer
//! producer whose `push_slice` is lock-free and allocation-free.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on macOS).
//! It is opened and kept alive on a dedicated OS thread spawned by `AudioSource::open`;
//! the consumer half of the ring buffer, which *is* `Send`, is handed back to the
//! caller. `AudioSource::read_frame`/`read_clip` run on whichever thread owns the
//! `AudioSource` value — typically the wake detector loop or the turn worker.

pub mod device;
pub mod resample;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc, Arc,
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::{
    buffering::{chunk::AudioChunk, create_audio_ring, AudioProducer, Consumer},
    error::{Result, VoicedError},
    vad::{energy::EnergyVad, VadDecision, VoiceActivityDetector},
};
use resample::RateConverter;

/// Target capture rate the rest of the pipeline (wake model, VAD, ASR) expects.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;
/// 80 ms at 16 kHz — the wake detector's frame size.
pub const FRAME_SAMPLES: usize = 1_280;

const EMPTY_SLEEP_MS: u64 = 5;
const PAUSED_POLL_MS: u64 = 20;
const RESAMPLE_CHUNK: usize = 960;

/// Handle to an active audio capture stream, owned by its dedicated OS thread.
///
/// **Not `Send`** — `cpal::Stream` is bound to its creation thread on Windows/macOS.
/// Create and drop this type on the same OS thread.
pub struct AudioCapture {
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    running: Arc<AtomicBool>,
    pub sample_rate: u32,
}

impl AudioCapture {
    /// Open an input device by preferred name, otherwise fall back to
    /// default input device and then the best-scoring non-loopback device.
    #[cfg(feature = "audio-cpal")]
    pub fn open_with_preference(
        mut producer: AudioProducer,
        running: Arc<AtomicBool>,
        device_ok: Arc<AtomicBool>,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();
        let mut devices: Vec<(String, cpal::Device)> = host
            .input_devices()
            .map_err(|e| VoicedError::AudioDevice(e.to_string()))?
            .enumerate()
            .map(|(idx, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
                (name, device)
            })
            .collect();
        if devices.is_empty() {
            return Err(VoicedError::NoDefaultInputDevice);
        }

        let default_name = host.default_input_device().and_then(|d| d.name().ok());
        let preferred_idx = preferred_device_name.and_then(|preferred| {
            devices
                .iter()
                .position(|(name, _)| name.as_str() == preferred)
        });
        let default_idx = default_name
            .as_deref()
            .and_then(|name| devices.iter().position(|(n, _)| n.as_str() == name));
        let best_non_loopback_idx = devices
            .iter()
            .enumerate()
            .filter(|(_, (name, _))| !device::is_loopback_like_name(name))
            .max_by_key(|(_, (name, _))| device::mic_preference_score(name))
            .map(|(idx, _)| idx);

        if preferred_device_name.is_some() && preferred_idx.is_none() {
            warn!(
                "preferred input device '{}' not found, falling back",
                preferred_device_name.unwrap_or_default()
            );
        }

        let selected_idx = if let Some(idx) = preferred_idx {
            idx
        } else if let Some(idx) = default_idx {
            if device::is_loopback_like_name(&devices[idx].0) {
                best_non_loopback_idx.unwrap_or(idx)
            } else {
                idx
            }
        } else if let Some(idx) = best_non_loopback_idx {
            warn!("no default input device, falling back to best available microphone input");
            idx
        } else {
            warn!("no default microphone input device, falling back to first available input");
            0
        };

        let (selected_name, device) = devices.swap_remove(selected_idx);
        info!(device = selected_name.as_str(), "opening input device");

        let supported = device
            .default_input_config()
            .map_err(|e| VoicedError::AudioDevice(e.to_string()))?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(sample_rate, channels, "audio config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let running_cb = Arc::clone(&running);
        let device_ok_err = Arc::clone(&device_ok);
        let ch = channels as usize;

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                let mut mix_buf: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _info| {
                        if !running_cb.load(Ordering::Relaxed) {
                            return;
                        }
                        push_mono(data, ch, &mut mix_buf, |s| *s, &mut producer);
                    },
                    move |err| {
                        error!("audio stream error: {err}");
                        device_ok_err.store(false, Ordering::Release);
                    },
                    None,
                )
            }
            SampleFormat::I16 => {
                let mut mix_buf: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _info| {
                        if !running_cb.load(Ordering::Relaxed) {
                            return;
                        }
                        push_mono(data, ch, &mut mix_buf, |s| *s as f32 / 32768.0, &mut producer);
                    },
                    move |err| {
                        error!("audio stream error: {err}");
                        device_ok_err.store(false, Ordering::Release);
                    },
                    None,
                )
            }
            SampleFormat::U8 => {
                let mut mix_buf: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[u8], _info| {
                        if !running_cb.load(Ordering::Relaxed) {
                            return;
                        }
                        push_mono(
                            data,
                            ch,
                            &mut mix_buf,
                            |s| (*s as f32 - 128.0) / 128.0,
                            &mut producer,
                        );
                    },
                    move |err| {
                        error!("audio stream error: {err}");
                        device_ok_err.store(false, Ordering::Release);
                    },
                    None,
                )
            }
            fmt => {
                return Err(VoicedError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| VoicedError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| VoicedError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
        })
    }

    #[cfg(feature = "audio-cpal")]
    pub fn open_default(
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        device_ok: Arc<AtomicBool>,
    ) -> Result<Self> {
        Self::open_with_preference(producer, running, device_ok, None)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(feature = "audio-cpal")]
fn push_mono<T: Copy>(
    data: &[T],
    channels: usize,
    mix_buf: &mut Vec<f32>,
    to_f32: impl Fn(&T) -> f32,
    producer: &mut AudioProducer,
) {
    use crate::buffering::Producer;
    if channels == 1 {
        mix_buf.clear();
        mix_buf.extend(data.iter().map(|s| to_f32(s)));
    } else {
        let frames = data.len() / channels;
        mix_buf.resize(frames, 0.0);
        for f in 0..frames {
            let base = f * channels;
            let sum: f32 = (0..channels).map(|c| to_f32(&data[base + c])).sum();
            mix_buf[f] = sum / channels as f32;
        }
    }
    let written = producer.push_slice(mix_buf);
    if written < mix_buf.len() {
        warn!("ring buffer full: dropped {} frames", mix_buf.len() - written);
    }
}

#[cfg(not(feature = "audio-cpal"))]
impl AudioCapture {
    pub fn open_with_preference(
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
        _device_ok: Arc<AtomicBool>,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(VoicedError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    pub fn open_default(
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        device_ok: Arc<AtomicBool>,
    ) -> Result<Self> {
        Self::open_with_preference(producer, running, device_ok, None)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// A captured utterance, or `None` if the phrase/silence-tail timeout elapsed
/// before any speech was observed.
pub type ClipOrTimeout = Option<AudioChunk>;

/// Continuous 16 kHz mono PCM source with a pull interface. Opens the default
/// (or preferred) input device on its own thread and resamples to
/// [`TARGET_SAMPLE_RATE`] on the reader's thread.
pub struct AudioSource {
    consumer: crate::buffering::AudioConsumer,
    resampler: RateConverter,
    leftover: Vec<f32>,
    paused: Arc<AtomicBool>,
    device_ok: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    _capture_thread: Option<JoinHandle<()>>,
}

impl AudioSource {
    /// Open the preferred (or default) input device and start capturing.
    pub fn open(preferred_device_name: Option<String>) -> Result<Self> {
        let (producer, consumer) = create_audio_ring();
        let running = Arc::new(AtomicBool::new(true));
        let device_ok = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::clone(&running);

        let (tx, rx) = mpsc::channel::<Result<u32>>();
        let running_thread = Arc::clone(&running);
        let device_ok_thread = Arc::clone(&device_ok);

        let capture_thread = std::thread::spawn(move || {
            match AudioCapture::open_with_preference(
                producer,
                running_thread.clone(),
                device_ok_thread,
                preferred_device_name.as_deref(),
            ) {
                Ok(capture) => {
                    let sample_rate = capture.sample_rate;
                    let _ = tx.send(Ok(sample_rate));
                    while running_thread.load(Ordering::Acquire) {
                        std::thread::sleep(Duration::from_millis(50));
                    }
                    capture.stop();
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                }
            }
        });

        let sample_rate = rx
            .recv()
            .map_err(|_| VoicedError::AudioDevice("capture thread died before reporting".into()))??;

        let resampler = RateConverter::new(sample_rate, TARGET_SAMPLE_RATE, RESAMPLE_CHUNK)?;

        Ok(Self {
            consumer,
            resampler,
            leftover: Vec::new(),
            paused: Arc::new(AtomicBool::new(false)),
            device_ok,
            shutdown,
            _capture_thread: Some(capture_thread),
        })
    }

    /// Pause reading — the caller promises not to contend with another logical
    /// reader for the device while paused.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    /// Resume reading.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Blocks until a full 80 ms (1280-sample) frame at 16 kHz is available.
    pub fn read_frame(&mut self) -> Result<AudioChunk> {
        loop {
            if !self.device_ok.load(Ordering::Acquire) {
                return Err(VoicedError::AudioDevice("input device lost".into()));
            }
            if self.paused.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(PAUSED_POLL_MS));
                continue;
            }
            self.drain_into_leftover();
            if self.leftover.len() >= FRAME_SAMPLES {
                let frame: Vec<f32> = self.leftover.drain(..FRAME_SAMPLES).collect();
                return Ok(AudioChunk::new(frame, TARGET_SAMPLE_RATE));
            }
            std::thread::sleep(Duration::from_millis(EMPTY_SLEEP_MS));
        }
    }

    /// Segment one utterance using an energy-threshold VAD: speech must begin
    /// within `phrase_timeout_secs`, and ends after `silence_tail_secs` of
    /// trailing silence or once `max_secs` of audio has accumulated.
    ///
    /// Returns `Ok(None)` (TIMEOUT) if no speech began before the phrase timeout.
    pub fn read_clip(
        &mut self,
        max_secs: f32,
        silence_tail_secs: f32,
        phrase_timeout_secs: f32,
    ) -> Result<ClipOrTimeout> {
        let mut vad = EnergyVad::default();
        let mut acc = ClipAccumulator::new(max_secs, silence_tail_secs);
        let deadline_for_phrase = Instant::now() + Duration::from_secs_f32(phrase_timeout_secs);

        loop {
            if !acc.started() && Instant::now() >= deadline_for_phrase {
                return Ok(None);
            }
            let frame = self.read_frame()?;
            let decision = vad.classify(&frame);
            if acc.push(&frame, decision) {
                break;
            }
        }

        Ok(acc.finish())
    }

    fn drain_into_leftover(&mut self) {
        let mut raw = [0f32; RESAMPLE_CHUNK];
        loop {
            let n = self.consumer.pop_slice(&mut raw);
            if n == 0 {
                break;
            }
            let resampled = self.resampler.process(&raw[..n]);
            self.leftover.extend_from_slice(&resampled);
        }
    }
}

impl Drop for AudioSource {
    fn drop(&mut self) {
        self.shutdown.store(false, Ordering::Release);
    }
}

/// Pure speech-accumulation state machine behind `AudioSource::read_clip`,
/// factored out so it can be driven by a synthetic frame sequence in tests.
struct ClipAccumulator {
    samples: Vec<f32>,
    started: bool,
    silence_run: f32,
    max_secs: f32,
    silence_tail_secs: f32,
    frame_secs: f32,
}

impl ClipAccumulator {
    fn new(max_secs: f32, silence_tail_secs: f32) -> Self {
        Self {
            samples: Vec::new(),
            started: false,
            silence_run: 0.0,
            max_secs,
            silence_tail_secs,
            frame_secs: FRAME_SAMPLES as f32 / TARGET_SAMPLE_RATE as f32,
        }
    }

    fn started(&self) -> bool {
        self.started
    }

    /// Feed one classified frame. Returns `true` once the clip is complete.
    fn push(&mut self, frame: &AudioChunk, decision: VadDecision) -> bool {
        match decision {
            VadDecision::Speech => {
                self.started = true;
                self.silence_run = 0.0;
                self.samples.extend_from_slice(&frame.samples);
            }
            VadDecision::Silence if self.started => {
                self.silence_run += self.frame_secs;
                self.samples.extend_from_slice(&frame.samples);
                if self.silence_run >= self.silence_tail_secs {
                    return true;
                }
            }
            VadDecision::Silence => {}
        }
        self.started && self.samples.len() as f32 / TARGET_SAMPLE_RATE as f32 >= self.max_secs
    }

    fn finish(self) -> ClipOrTimeout {
        if self.samples.is_empty() {
            None
        } else {
            Some(AudioChunk::new(self.samples, TARGET_SAMPLE_RATE))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(amplitude: f32) -> AudioChunk {
        AudioChunk::new(vec![amplitude; FRAME_SAMPLES], TARGET_SAMPLE_RATE)
    }

    #[test]
    fn accumulator_ends_on_trailing_silence() {
        let mut vad = EnergyVad::new(0.02, 0);
        let mut acc = ClipAccumulator::new(10.0, 0.2);
        let speech = frame(0.5);
        let silence = frame(0.0);

        assert!(!acc.push(&speech, vad.classify(&speech)));
        assert!(!acc.push(&speech, vad.classify(&speech)));
        // 0.2s tail needs 2 frames of 0.08s each (FRAME_SAMPLES/16000)
        assert!(!acc.push(&silence, vad.classify(&silence)));
        assert!(acc.push(&silence, vad.classify(&silence)));

        let clip = acc.finish().expect("clip should not be empty");
        assert_eq!(clip.samples.len(), FRAME_SAMPLES * 4);
    }

    #[test]
    fn accumulator_ignores_leading_silence() {
        let mut vad = EnergyVad::new(0.02, 0);
        let mut acc = ClipAccumulator::new(10.0, 0.2);
        let silence = frame(0.0);
        assert!(!acc.push(&silence, vad.classify(&silence)));
        assert!(!acc.started());
        assert!(acc.finish().is_none());
    }

    #[test]
    fn accumulator_stops_at_max_secs() {
        let mut vad = EnergyVad::new(0.02, 0);
        // max_secs small enough that a single speech frame already exceeds it
        let mut acc = ClipAccumulator::new(0.01, 5.0);
        let speech = frame(0.5);
        assert!(acc.push(&speech, vad.classify(&speech)));
        assert!(acc.finish().is_some());
    }
}
