use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use serde_derive::{Deserialize, Serialize};

/// Peak amplitude of the 1-bit oscillators (pulse and pattern waves).
const BIT_WAVE_LEVEL: f32 = 0.117;

/// Sample formats a stream can be opened with.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AudioFormat {
    U8,
    S8,
    S16,
    S32,
    F32,
}

/// The fixed parameters of an open audio stream.
#[derive(Copy, Clone, Debug)]
pub struct StreamSpec {
    pub format: AudioFormat,
    pub channels: u16,
    pub frequency: u32,
}

/// A playback backend. The engine renders `f32` sample frames; the backend
/// owns delivery to the host audio device.
pub trait AudioOut: Send + Sync {
    fn play(&self, stream_key: i32, spec: &StreamSpec, samples: &[f32]);
}

/// A backend that discards all audio. Used by tests and headless runs.
#[derive(Default)]
pub struct NullAudioOut;

impl AudioOut for NullAudioOut {
    fn play(&self, _stream_key: i32, _spec: &StreamSpec, _samples: &[f32]) {}
}

/// A rodio-backed [AudioOut]. One sink per stream key; sample frames are
/// appended as short buffers. The caller keeps the rodio `OutputStream`
/// alive for as long as this handle is in use.
pub struct RodioAudioOut {
    handle: rodio::OutputStreamHandle,
    sinks: Mutex<HashMap<i32, rodio::Sink>>,
}

impl RodioAudioOut {
    pub fn new(handle: rodio::OutputStreamHandle) -> Self {
        RodioAudioOut {
            handle,
            sinks: Mutex::new(HashMap::new()),
        }
    }
}

impl AudioOut for RodioAudioOut {
    fn play(&self, stream_key: i32, spec: &StreamSpec, samples: &[f32]) {
        let mut sinks = self.sinks.lock().unwrap();
        if !sinks.contains_key(&stream_key) {
            match rodio::Sink::try_new(&self.handle) {
                Ok(sink) => {
                    sinks.insert(stream_key, sink);
                }
                Err(_) => return,
            }
        }
        let sink = &sinks[&stream_key];
        sink.append(rodio::buffer::SamplesBuffer::new(
            spec.channels,
            spec.frequency,
            samples.to_vec(),
        ));
    }
}

/// Global (host-wide) audio settings: master gain and mute, shared across
/// threads as atomics and persisted in the `Audio` config section.
#[derive(Default)]
pub struct GlobalAudio {
    gain_bits: AtomicU32,
    muted: AtomicBool,
}

/// The serialisable shape of [GlobalAudio], one section of the main config.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct AudioSettings {
    #[serde(rename = "Volume")]
    pub volume: f32,
    #[serde(rename = "Muted")]
    pub muted: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        AudioSettings {
            volume: 0.75,
            muted: false,
        }
    }
}

impl GlobalAudio {
    pub fn new(settings: AudioSettings) -> Self {
        let audio = GlobalAudio::default();
        audio.set_global_gain(settings.volume);
        audio.set_muted(settings.muted);
        audio
    }

    pub fn export_settings(&self) -> AudioSettings {
        AudioSettings {
            volume: self.global_gain(),
            muted: self.is_muted(),
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, state: bool) {
        self.muted.store(state, Ordering::Relaxed);
    }

    pub fn toggle_muted(&self) {
        self.set_muted(!self.is_muted());
    }

    pub fn global_gain(&self) -> f32 {
        f32::from_bits(self.gain_bits.load(Ordering::Relaxed))
    }

    pub fn set_global_gain(&self, gain: f32) {
        self.gain_bits
            .store(gain.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn add_global_gain(&self, gain: f32) {
        self.set_global_gain(self.global_gain() + gain);
    }
}

/// One buffered output stream: spec, per-stream gain, pause flag, and the
/// fractional sample accumulator that carries sub-sample remainders from one
/// frame into the next.
pub struct AudioStream {
    spec: StreamSpec,
    gain: f32,
    paused: bool,
    accumulator: u64,
}

/// Fixed-point scale of the sample accumulator (24 fractional bits).
const ACCUMULATOR_ONE: u64 = 1 << 24;

impl AudioStream {
    fn new(spec: StreamSpec) -> Self {
        AudioStream {
            spec,
            gain: 1.0,
            paused: false,
            accumulator: 0,
        }
    }

    pub fn spec(&self) -> &StreamSpec {
        &self.spec
    }

    pub fn frequency(&self) -> u32 {
        self.spec.frequency
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain.clamp(0.0, 2.0);
    }

    pub fn add_gain(&mut self, gain: f32) {
        self.set_gain(self.gain + gain);
    }

    /// The exact sample count for a stream at `framerate`, without drift.
    pub fn raw_sample_rate(&self, framerate: f64) -> f64 {
        if framerate < 1.0 {
            return 0.0;
        }
        self.spec.frequency as f64 / framerate * self.spec.channels as f64
    }

    /// Computes the next frame's sample count, retaining the fractional
    /// remainder in the accumulator.
    pub fn next_buffer_size(&mut self, framerate: f64) -> usize {
        if framerate < 1.0 {
            return 0;
        }
        let step = (self.raw_sample_rate(framerate) * ACCUMULATOR_ONE as f64) as u64;
        self.accumulator = self.accumulator.wrapping_add(step);
        let samples = self.accumulator >> 24;
        self.accumulator &= ACCUMULATOR_ONE - 1;
        samples as usize
    }
}

/// The set of streams a core renders into, bound to a backend and the
/// global gain/mute state.
pub struct AudioDevice {
    out: Arc<dyn AudioOut>,
    base: Arc<GlobalAudio>,
    streams: HashMap<i32, AudioStream>,
}

impl AudioDevice {
    pub fn new(out: Arc<dyn AudioOut>, base: Arc<GlobalAudio>) -> Self {
        AudioDevice {
            out,
            base,
            streams: HashMap::new(),
        }
    }

    /// Opens (or reopens) a stream under `key`.
    pub fn add_audio_stream(
        &mut self,
        key: i32,
        format: AudioFormat,
        channels: u16,
        frequency: u32,
    ) -> bool {
        self.streams.insert(
            key,
            AudioStream::new(StreamSpec {
                format,
                channels,
                frequency,
            }),
        );
        true
    }

    pub fn stream(&self, key: i32) -> Option<&AudioStream> {
        self.streams.get(&key)
    }

    pub fn stream_mut(&mut self, key: i32) -> Option<&mut AudioStream> {
        self.streams.get_mut(&key)
    }

    /// Pushes one frame of samples through `key`, applying the stream gain
    /// and the master gain (zeroed while muted).
    pub fn push_samples(&self, key: i32, samples: &[f32]) {
        let Some(stream) = self.streams.get(&key) else {
            return;
        };
        if stream.paused || samples.is_empty() {
            return;
        }
        let master = if self.base.is_muted() {
            0.0
        } else {
            self.base.global_gain()
        };
        let gain = stream.gain * master;
        let scaled: Vec<f32> = samples.iter().map(|s| s * gain).collect();
        self.out.play(key, &stream.spec, &scaled);
    }

    /// Pushes one frame of unsigned 8-bit PCM through `key`.
    pub fn push_raw_u8(&self, key: i32, samples: &[u8]) {
        let widened: Vec<f32> = samples
            .iter()
            .map(|&s| ((s as i8 as i16) << 8) as f32 / 32768.0)
            .collect();
        self.push_samples(key, &widened);
    }
}

/// One oscillator voice: fractional phase, per-sample step, and the frame
/// countdown timer that gates it.
#[derive(Copy, Clone, Debug, Default)]
pub struct Voice {
    pub phase: f64,
    pub step: f64,
    pub timer: u32,
}

impl Voice {
    /// The unwrapped phase `index` samples into the current buffer.
    pub fn peek_phase(&self, index: usize) -> f64 {
        self.phase + self.step * index as f64
    }

    /// Advances the phase by `count` samples, keeping the fractional part.
    pub fn step_phase(&mut self, count: usize) {
        self.phase = (self.phase + self.step * count as f64).fract();
    }

    pub fn tick_timer(&mut self) {
        self.timer = self.timer.saturating_sub(1);
    }
}

/// Square wave: `+level` for the first half of the phase, `-level` for the
/// second. Silent (and phase-reset) while the voice timer is zero.
pub fn make_pulse_wave(data: &mut [f32], voice: &mut Voice) {
    if voice.timer == 0 {
        voice.phase = 0.0;
        return;
    }
    for sample in data.iter_mut() {
        *sample += if voice.phase < 0.5 {
            BIT_WAVE_LEVEL
        } else {
            -BIT_WAVE_LEVEL
        };
        voice.phase = (voice.phase + voice.step).fract();
    }
}

/// 1-bit pattern wave: the 128-bit pattern is scanned by the fractional
/// phase, one full sweep per phase period.
pub fn make_pattern_wave(data: &mut [f32], voice: &mut Voice, pattern: &[u8; 16]) {
    if voice.timer == 0 {
        voice.phase = 0.0;
        return;
    }
    for sample in data.iter_mut() {
        let bit_offset = ((voice.phase * 128.0).clamp(0.0, 127.0)) as usize;
        let byte_phase = 1u8 << (7 ^ (bit_offset & 7));
        *sample += if pattern[bit_offset >> 3] & byte_phase != 0 {
            BIT_WAVE_LEVEL
        } else {
            -BIT_WAVE_LEVEL
        };
        voice.phase = (voice.phase + voice.step).fract();
    }
}

/// The per-sample phase step of the 128-bit pattern oscillator for an
/// XO-CHIP pitch byte: `31.25 * 2^((pitch - 64) / 48)` pattern sweeps per
/// second, divided down to the stream's sample rate.
pub fn pattern_pitch_step(pitch: u8, sample_rate: f64) -> f64 {
    31.25 * f64::powf(2.0, (pitch as f64 - 64.0) / 48.0) / sample_rate
}

/// An 8-bit PCM track for the sampled-audio voice.
#[derive(Clone, Debug, Default)]
pub struct AudioTrack {
    pub data: Vec<u8>,
    pub looping: bool,
}

impl AudioTrack {
    pub fn reset(&mut self) {
        *self = AudioTrack::default();
    }

    pub fn is_on(&self) -> bool {
        !self.data.is_empty()
    }
}

/// Byte-stream wave: a cursor sweeps the PCM track at the voice's step; a
/// non-looping track disables itself at end-of-track.
pub fn make_byte_wave(data: &mut [f32], voice: &mut Voice, track: &mut AudioTrack) {
    if !track.is_on() {
        return;
    }
    let len = track.data.len();
    for (index, sample) in data.iter_mut().enumerate() {
        let head = voice.peek_phase(index);
        if !track.looping && head >= 1.0 {
            track.reset();
            return;
        }
        let cursor = ((head.fract() * len as f64) as usize).min(len - 1);
        *sample += (track.data[cursor] as f32 - 128.0) / 128.0;
    }
    voice.step_phase(data.len());
}
