//! A real-time granular synthesis engine, exposed as a VST3/CLAP effect
//! through the `nih_plug` framework.
//!
//! The engine itself lives in [`collection`]/[`grain`]/[`panner`]/[`spat`]/
//! [`recorder`] and is plugin-agnostic: none of it depends on `nih_plug`.
//! This file wires a [`collection::GrainCollection`] and a [`panner::Panner`]
//! into a stereo plugin shell, plus WAV fixture I/O used by tests and
//! benches. `stat()` is used for integration tests.
#![warn(missing_docs)]

extern crate core;

pub mod buffer;
pub mod collection;
pub mod error;
pub mod filter;
pub mod grain;
pub mod panner;
pub mod param;
pub mod recorder;
pub mod samples;
pub mod spat;
pub mod tables;
pub mod utils;

use std::num::NonZeroU32;
use std::sync::Arc;

use hound::{Error, SampleFormat, WavReader, WavSpec, WavWriter};
use nih_plug::prelude::*;

use buffer::SourceBuffer;
use collection::GrainCollection;
use panner::{PanMode, Panner};
use samples::PhonicMode;

/// Voice capacity allocated once at construction. `active_grains` (a host
/// parameter) may pick any value up to this without reallocating, per §2's
/// "dynamic grain-count changes at audio-rate" non-goal: the plugin only
/// ever resizes capacity in `initialize`.
const MAX_GRAINS: usize = 32;

/// Fixed sub-block size the plugin processes internally (§2).
const SUB_BLOCK: usize = 32;

/// Per-voice scratch passed to [`GrainCollection::process`] as a
/// [`grain::VoiceOutputs`], reused every sub-block to keep the audio path
/// allocation-free.
struct VoiceScratch {
    output: Vec<f64>,
    state: Vec<f64>,
    progress: Vec<f64>,
    playhead: Vec<f64>,
    amp: Vec<f64>,
    envelope: Vec<f64>,
    buffer_channel: Vec<f64>,
    stream_channel: Vec<f64>,
}

impl VoiceScratch {
    fn new(len: usize) -> Self {
        Self {
            output: vec![0.0; len],
            state: vec![0.0; len],
            progress: vec![0.0; len],
            playhead: vec![0.0; len],
            amp: vec![0.0; len],
            envelope: vec![0.0; len],
            buffer_channel: vec![0.0; len],
            stream_channel: vec![0.0; len],
        }
    }
}

/// Builds a short default source buffer (a one-second 220Hz sine ramp) so
/// the plugin is audible before a host binds a real sample over the
/// `buf`/`buffer` reflection (§6).
fn default_source_buffer(samplerate: u32) -> Arc<SourceBuffer> {
    let frames = samplerate as usize;
    let mut channel = Vec::with_capacity(frames);
    for n in 0..frames {
        let t = n as f64 / samplerate as f64;
        channel.push((2.0 * std::f64::consts::PI * 220.0 * t).sin() * 0.5);
    }
    Arc::new(SourceBuffer::from_channels(vec![channel], samplerate))
}

/// The granular engine, wired as a stereo `nih_plug` effect.
/// # Attributes
/// * `params`: the host-automatable top-level parameters
/// * `collection`: the grain voice bank driving the engine
/// * `panner`: spreads each voice's mono output across the stereo bus
struct GranularPlugin {
    params: Arc<GranularPluginParams>,
    collection: GrainCollection,
    panner: Panner,
    voices: Vec<VoiceScratch>,
    grain_clock: Vec<f64>,
    traversal_phasor: Vec<f64>,
    wet: Vec<Vec<f64>>,
    samplerate: f64,
}

/// The parameters for the granular engine, returned in an Arc type.
#[derive(Params)]
struct GranularPluginParams {
    /// Number of voices actively triggering, out of [`MAX_GRAINS`].
    #[id = "active_grains"]
    pub active_grains: IntParam,
    /// Pan draw mode: `0` bipolar, `1` unipolar, `2` stereo-clamped (§4.3).
    /// Modelled as an `IntParam` rather than an enum param since the
    /// engine's own [`PanMode`] is not a `nih_plug` concern.
    #[id = "pan_mode"]
    pub pan_mode: IntParam,
    /// Pan center, `0..=n_output_channels` (§4.3 step 2).
    #[id = "pan_center"]
    pub pan_center: FloatParam,
    /// Pan spread around the center (§4.3 step 2).
    #[id = "pan_spread"]
    pub pan_spread: FloatParam,
    /// Pan position quantization step; `0` disables quantization (§4.3).
    #[id = "pan_quantization"]
    pub pan_quantization: FloatParam,
}

impl Default for GranularPlugin {
    fn default() -> Self {
        let samplerate = 44_100.0;
        let mut collection = GrainCollection::new(MAX_GRAINS, SUB_BLOCK, samplerate as u32);
        collection.set_buffer(
            collection::BufferRole::Source,
            default_source_buffer(samplerate as u32),
            0,
        );
        Self {
            params: Arc::new(GranularPluginParams::default()),
            collection,
            panner: Panner::new(PanMode::Bipolar, MAX_GRAINS, 2, SUB_BLOCK),
            voices: (0..MAX_GRAINS).map(|_| VoiceScratch::new(SUB_BLOCK)).collect(),
            grain_clock: Vec::new(),
            traversal_phasor: Vec::new(),
            wet: vec![Vec::new(), Vec::new()],
            samplerate,
        }
    }
}

impl Default for GranularPluginParams {
    fn default() -> Self {
        Self {
            active_grains: IntParam::new(
                "Active Grains",
                8,
                IntRange::Linear { min: 1, max: MAX_GRAINS as i32 },
            ),
            pan_mode: IntParam::new("Pan Mode", 0, IntRange::Linear { min: 0, max: 2 }),
            pan_center: FloatParam::new("Pan Center", 0.5, FloatRange::Linear { min: 0.0, max: 2.0 })
                .with_smoother(SmoothingStyle::Linear(20.0)),
            pan_spread: FloatParam::new("Pan Spread", 0.25, FloatRange::Linear { min: 0.0, max: 2.0 })
                .with_smoother(SmoothingStyle::Linear(20.0)),
            pan_quantization: FloatParam::new(
                "Pan Quantization",
                0.0,
                FloatRange::Linear { min: 0.0, max: 1.0 },
            ),
        }
    }
}

impl GranularPlugin {
    fn pan_mode_from_param(value: i32) -> PanMode {
        match value {
            1 => PanMode::Unipolar,
            2 => PanMode::Stereo,
            _ => PanMode::Bipolar,
        }
    }

    /// Ensures the per-callback scratch buffers cover `num_samples`
    /// without reallocating on the audio thread once warmed up past the
    /// host's largest callback so far.
    fn ensure_capacity(&mut self, num_samples: usize) {
        if self.grain_clock.len() < num_samples {
            self.grain_clock.resize(num_samples, 0.0);
            self.traversal_phasor.resize(num_samples, 0.0);
            self.wet[0].resize(num_samples, 0.0);
            self.wet[1].resize(num_samples, 0.0);
        }
    }
}

impl Plugin for GranularPlugin {
    const NAME: &'static str = "Granular Engine";
    const VENDOR: &'static str = "Granular Engine Contributors";
    const URL: &'static str = env!("CARGO_PKG_HOMEPAGE");
    const EMAIL: &'static str = "info@example.com";

    const VERSION: &'static str = env!("CARGO_PKG_VERSION");

    const AUDIO_IO_LAYOUTS: &'static [AudioIOLayout] = &[AudioIOLayout {
        main_input_channels: NonZeroU32::new(2),
        main_output_channels: NonZeroU32::new(2),

        // The aux input carries the engine's two control signals rather
        // than audio: channel 0 is the grain clock, channel 1 the
        // traversal phasor (§3 IOConfig).
        aux_input_ports: &[new_nonzero_u32(2)],

        ..AudioIOLayout::const_default()
    }];

    const MIDI_INPUT: MidiConfig = MidiConfig::None;

    const MIDI_OUTPUT: MidiConfig = MidiConfig::None;
    const SAMPLE_ACCURATE_AUTOMATION: bool = true;

    type SysExMessage = ();

    // No background tasks: every parameter write lands directly on the
    // `GrainCollection`'s own lock-free routing (§5).
    type BackgroundTask = ();

    fn params(&self) -> Arc<dyn Params> {
        self.params.clone()
    }

    fn initialize(
        &mut self,
        _audio_io_layout: &AudioIOLayout,
        buffer_config: &BufferConfig,
        _context: &mut impl InitContext<Self>,
    ) -> bool {
        self.samplerate = buffer_config.sample_rate as f64;
        self.collection = GrainCollection::new(MAX_GRAINS, SUB_BLOCK, buffer_config.sample_rate as u32);
        self.collection.set_buffer(
            collection::BufferRole::Source,
            default_source_buffer(buffer_config.sample_rate as u32),
            0,
        );
        self.ensure_capacity(buffer_config.max_buffer_size as usize);
        true
    }

    fn reset(&mut self) {
        // Per-voice phase state resets itself on the next grain clock
        // reset; nothing here needs explicit clearing.
    }

    fn process(
        &mut self,
        buffer: &mut Buffer,
        aux: &mut AuxiliaryBuffers,
        _context: &mut impl ProcessContext<Self>,
    ) -> ProcessStatus {
        let num_samples = buffer.samples();
        self.ensure_capacity(num_samples);

        let active_grains = self.params.active_grains.value() as usize;
        self.collection.set_active_grains(active_grains.min(MAX_GRAINS));

        self.panner.set_mode(Self::pan_mode_from_param(self.params.pan_mode.value()));
        self.panner.pan_position = self.params.pan_center.value() as f64;
        self.panner.pan_spread = self.params.pan_spread.value() as f64;
        self.panner.pan_quantization = self.params.pan_quantization.value() as f64;

        if let Some(aux_in) = aux.inputs.first_mut() {
            let aux_slices = aux_in.as_slice();
            if let Some(clock_channel) = aux_slices.first() {
                for (dst, &src) in self.grain_clock[..num_samples].iter_mut().zip(clock_channel.iter()) {
                    *dst = src as f64;
                }
            }
            if let Some(traversal_channel) = aux_slices.get(1) {
                for (dst, &src) in self.traversal_phasor[..num_samples].iter_mut().zip(traversal_channel.iter()) {
                    *dst = src as f64;
                }
            }
        }

        self.wet[0][..num_samples].iter_mut().for_each(|s| *s = 0.0);
        self.wet[1][..num_samples].iter_mut().for_each(|s| *s = 0.0);

        let mut offset = 0;
        while offset < num_samples {
            let block_len = SUB_BLOCK.min(num_samples - offset);

            let io = buffer::IoConfig {
                grain_clock: &[&self.grain_clock[..num_samples]],
                traversal_phasor: &[&self.traversal_phasor[..num_samples]],
                fm: &[],
                am: &[],
                block_size: block_len,
                samplerate: self.samplerate,
                livemode: true,
            };

            {
                let mut outputs: Vec<grain::VoiceOutputs> = self
                    .voices
                    .iter_mut()
                    .map(|v| grain::VoiceOutputs {
                        output: &mut v.output[..block_len],
                        state: &mut v.state[..block_len],
                        progress: &mut v.progress[..block_len],
                        playhead: &mut v.playhead[..block_len],
                        amp: &mut v.amp[..block_len],
                        envelope: &mut v.envelope[..block_len],
                        buffer_channel: &mut v.buffer_channel[..block_len],
                        stream_channel: &mut v.stream_channel[..block_len],
                    })
                    .collect();
                self.collection.process(&io, offset, block_len, &mut outputs);
            }

            let grain_refs: Vec<&[f64]> = self.voices.iter().map(|v| &v.output[..block_len]).collect();
            let state_refs: Vec<&[f64]> = self.voices.iter().map(|v| &v.state[..block_len]).collect();
            self.panner.process(&grain_refs, &state_refs, &mut self.wet, offset);

            offset += block_len;
        }

        let host_channels = buffer.as_slice();
        for (ch, wet_channel) in self.wet.iter().enumerate().take(host_channels.len()) {
            for (sample, &wet) in host_channels[ch].iter_mut().zip(wet_channel[..num_samples].iter()) {
                *sample += wet as f32;
            }
        }

        ProcessStatus::Normal
    }
}

impl ClapPlugin for GranularPlugin {
    const CLAP_ID: &'static str = "org.example.granular-engine";
    const CLAP_DESCRIPTION: Option<&'static str> =
        Some("A real-time granular synthesis engine driven by an external grain clock and traversal phasor");
    const CLAP_MANUAL_URL: Option<&'static str> = Some(Self::URL);
    const CLAP_SUPPORT_URL: Option<&'static str> = None;

    const CLAP_FEATURES: &'static [ClapFeature] = &[ClapFeature::AudioEffect, ClapFeature::Stereo];
}

impl Vst3Plugin for GranularPlugin {
    const VST3_CLASS_ID: [u8; 16] = *b"GranularEngineXY";

    const VST3_SUBCATEGORIES: &'static [Vst3SubCategory] = &[Vst3SubCategory::Generator];
}

/// Smoke-test hook: confirms the crate links and its public API is callable
/// from an external module (used by `tests/`).
pub fn stat() -> i16 {
    200
}

/// Loads a grain source or control buffer fixture from a 16-bit PCM WAV
/// file, for use as a [`buffer::SourceBuffer`] in tests and benches.
/// # Returns
/// * A vector of i16 samples, or the `hound` error that stopped the read.
/// # Parameters
/// * `path`: path to the `.wav` fixture to load.
pub fn load_wav(path: &str) -> Result<Vec<i16>, Error> {
    let mut reader =
        WavReader::open(path).expect("fixture WAV should exist at the given path");
    let mut samples: Vec<i16> = vec![];

    for sample in reader.samples::<i16>() {
        match sample {
            Ok(s) => samples.push(s),
            Err(e) => return Err(e),
        };
    }

    Ok(samples)
}

/// Loads a grain source or control buffer fixture from a 32-bit float WAV
/// file, for use as a [`buffer::SourceBuffer`] in tests and benches.
/// # Returns
/// * A vector of f32 samples, or the `hound` error that stopped the read.
/// # Parameters
/// * `path`: path to the `.wav` fixture to load.
pub fn load_wav_float(path: &str) -> Result<Vec<f32>, Error> {
    let mut reader =
        WavReader::open(path).expect("fixture WAV should exist at the given path");
    let mut samples: Vec<f32> = vec![];

    for sample in reader.samples::<f32>() {
        match sample {
            Ok(s) => samples.push(s),
            Err(e) => return Err(e),
        };
    }

    Ok(samples)
}

/// Renders a rendered grain stream to a 16-bit PCM WAV file, for capturing
/// test/bench output at a fixed 44.1kHz.
/// # Parameters
/// * `path`: destination `.wav` path.
/// * `samples`: i16 samples, interleaved if `mode` is [`PhonicMode::Stereo`].
/// * `mode`: channel layout of `samples`.
pub fn write_wav(path: &str, samples: Vec<i16>, mode: PhonicMode) {
    let channels: u16 = match mode {
        PhonicMode::Mono => 1,
        PhonicMode::Stereo => 2,
    };

    let spec = WavSpec {
        channels,
        sample_rate: 44100,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec).expect("could not create WAV writer");

    for sample in samples {
        writer.write_sample(sample).expect("failed to write sample");
    }
    writer.finalize().expect("failed to finalize WAV file")
}

/// Renders a rendered grain stream to a 32-bit float WAV file, for capturing
/// test/bench output at a fixed 44.1kHz.
/// # Parameters
/// * `path`: destination `.wav` path.
/// * `samples`: f32 samples, interleaved if `mode` is [`PhonicMode::Stereo`].
/// * `mode`: channel layout of `samples`.
pub fn write_wav_float(path: &str, samples: Vec<f32>, mode: PhonicMode) {
    let channels: u16 = match mode {
        PhonicMode::Mono => 1,
        PhonicMode::Stereo => 2,
    };

    let spec = WavSpec {
        channels,
        sample_rate: 44100,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let mut writer = WavWriter::create(path, spec).expect("could not create WAV writer");

    for sample in samples {
        writer.write_sample(sample).expect("failed to write sample");
    }
    writer.finalize().expect("failed to finalize WAV file")
}

nih_export_vst3!(GranularPlugin);
nih_export_clap!(GranularPlugin);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore]
    fn wav_fixture_loads_correctly() {
        load_wav("tests/amen_br.wav").expect("fixture WAV should load without error");
    }

    #[test]
    #[should_panic]
    #[ignore]
    fn missing_wav_fixture_panics() {
        load_wav("doesnt/exist.wav").expect("a missing fixture should panic on open");
    }

    #[test]
    fn stat_returns_constant() {
        assert_eq!(stat(), 200);
    }

    #[test]
    fn default_source_buffer_is_one_second_of_audio() {
        let buf = default_source_buffer(44_100);
        assert_eq!(buf.frame_count(), 44_100);
        assert_eq!(buf.channel_count(), 1);
    }

    #[test]
    fn pan_mode_from_param_maps_every_index() {
        assert_eq!(GranularPlugin::pan_mode_from_param(0), PanMode::Bipolar);
        assert_eq!(GranularPlugin::pan_mode_from_param(1), PanMode::Unipolar);
        assert_eq!(GranularPlugin::pan_mode_from_param(2), PanMode::Stereo);
        assert_eq!(GranularPlugin::pan_mode_from_param(99), PanMode::Bipolar);
    }
}
