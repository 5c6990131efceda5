//! The grain voice (§4.1): a per-voice state machine and signal pipeline
//! that turns a driving phasor into one rendered grain-stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::buffer::{BufferReader, DefaultBufferReader, IoConfig, SourceBuffer};
use crate::param::{BufferMode, Param, ParamType, RandomSign};
use crate::tables::hann_lookup;
use crate::utils::{gf_mod, pong, Xorshift32};

const RESET_EPSILON: f64 = 1e-7;
const WINDOW_CHANGE_EPSILON: f64 = 1e-8;

/// The two-row snapshot of materialized values spanning a grain reset
/// within one sub-block (§3).
#[derive(Clone, Copy, Debug, Default)]
pub struct ValueTable {
    pub delay: f64,
    pub rate: f64,
    pub glisson: f64,
    pub window: f64,
    pub amplitude: f64,
    pub space: f64,
    pub envelope_position: f64,
    pub direction: f64,
    pub density: f64,
}

/// All [`Param`] fields a grain voice owns, named per §3's `ParamName`
/// enumeration (minus the three virtual names, which are resolved before
/// reaching a voice).
#[derive(Default)]
pub struct GrainParams {
    pub delay: Param,
    pub rate: Param,
    pub glisson: Param,
    pub glisson_rows: Param,
    pub glisson_position: Param,
    pub window: Param,
    pub amplitude: Param,
    pub space: Param,
    pub envelope_position: Param,
    pub n_envelopes: Param,
    pub direction: Param,
    pub start_point: Param,
    pub stop_point: Param,
    pub rate_quantize_semi: Param,
    pub loop_mode: Param,
    pub channel: Param,
    pub density: Param,
    pub vibrato_rate: Param,
    pub vibrato_depth: Param,
}

/// Non-owning handles to the six buffer roles a grain voice may read.
#[derive(Default, Clone)]
pub struct GrainBuffers {
    pub source: Option<Arc<SourceBuffer>>,
    pub envelope: Option<Arc<SourceBuffer>>,
    pub rate_ctl: Option<Arc<SourceBuffer>>,
    pub delay_ctl: Option<Arc<SourceBuffer>>,
    pub window_ctl: Option<Arc<SourceBuffer>>,
    pub glisson_ctl: Option<Arc<SourceBuffer>>,
}

/// Mutable output rows for one voice, one sub-block wide, bound by the
/// caller (§3 IOConfig output roles).
pub struct VoiceOutputs<'a> {
    pub output: &'a mut [f64],
    pub state: &'a mut [f64],
    pub progress: &'a mut [f64],
    pub playhead: &'a mut [f64],
    pub amp: &'a mut [f64],
    pub envelope: &'a mut [f64],
    pub buffer_channel: &'a mut [f64],
    pub stream_channel: &'a mut [f64],
}

/// A single grain voice.
pub struct Grain {
    index: usize,
    stream: usize,
    enabled: bool,
    enabled_internal: bool,
    window_changed: bool,

    source_sample: f64,
    last_grain_clock: f64,

    value_table: [ValueTable; 2],
    params: GrainParams,
    buffers: GrainBuffers,
    reader: Box<dyn BufferReader>,

    vibrato_phasor: f64,
    busy: Arc<AtomicBool>,
    rng: Xorshift32,

    scratch_progress: Vec<f64>,
    scratch_positions: Vec<f64>,
    scratch_delta: Vec<f64>,
    scratch_glisson_env: Vec<f64>,
}

impl Grain {
    /// Creates a voice at `index` with scratch buffers sized for up to
    /// `max_block` samples per sub-block call.
    pub fn new(index: usize, max_block: usize) -> Self {
        Self {
            index,
            stream: 0,
            enabled: true,
            enabled_internal: true,
            window_changed: false,
            source_sample: 0.0,
            last_grain_clock: 0.0,
            value_table: [ValueTable::default(); 2],
            params: Self::default_params(),
            buffers: GrainBuffers::default(),
            reader: Box::new(DefaultBufferReader),
            vibrato_phasor: 0.0,
            busy: Arc::new(AtomicBool::new(false)),
            // Mixing the voice index into the seed keeps voices decorrelated
            // while staying fully deterministic (§9 Design Notes).
            rng: Xorshift32::new((index as u32).wrapping_mul(0x9E3779B1).wrapping_add(1)),
            scratch_progress: vec![0.0; max_block],
            scratch_positions: vec![0.0; max_block],
            scratch_delta: vec![0.0; max_block],
            scratch_glisson_env: vec![0.0; max_block],
        }
    }

    /// Non-zero starting values for the parameters a silent all-zero
    /// `Param` would otherwise leave the voice unable to produce: a grain
    /// with `density.base == 0.0` never passes the `on_reset` enable coin
    /// flip, `rate.base`/`amplitude.base`/`direction.base` at zero mute the
    /// voice outright, and `stop_point` at zero degenerates the playback
    /// window to nothing.
    fn default_params() -> GrainParams {
        GrainParams {
            rate: Param::constant(1.0),
            amplitude: Param::constant(1.0),
            direction: Param::constant(1.0),
            stop_point: Param {
                base: 1.0,
                value: 1.0,
                ..Default::default()
            },
            rate_quantize_semi: Param {
                value: 1.0,
                ..Default::default()
            },
            n_envelopes: Param {
                value: 1.0,
                ..Default::default()
            },
            glisson_rows: Param {
                value: 1.0,
                ..Default::default()
            },
            density: Param::constant(1.0),
            ..Default::default()
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn stream(&self) -> usize {
        self.stream
    }

    pub fn set_stream(&mut self, stream: usize) {
        self.stream = stream;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn buffers(&self) -> &GrainBuffers {
        &self.buffers
    }

    pub fn buffers_mut(&mut self) -> &mut GrainBuffers {
        &mut self.buffers
    }

    pub fn params(&self) -> &GrainParams {
        &self.params
    }

    /// A clone of the per-voice busy flag; the control thread flips this
    /// around a parameter write (§5).
    pub fn busy_flag(&self) -> Arc<AtomicBool> {
        self.busy.clone()
    }

    fn param_mut(&mut self, name: crate::param::ParamName) -> &mut Param {
        use crate::param::ParamName::*;
        match name {
            Delay => &mut self.params.delay,
            Rate => &mut self.params.rate,
            Glisson => &mut self.params.glisson,
            GlissonRows => &mut self.params.glisson_rows,
            GlissonPosition => &mut self.params.glisson_position,
            Window => &mut self.params.window,
            Amplitude => &mut self.params.amplitude,
            Space => &mut self.params.space,
            EnvelopePosition => &mut self.params.envelope_position,
            NEnvelopes => &mut self.params.n_envelopes,
            Direction => &mut self.params.direction,
            StartPoint => &mut self.params.start_point,
            StopPoint => &mut self.params.stop_point,
            RateQuantizeSemi => &mut self.params.rate_quantize_semi,
            LoopMode => &mut self.params.loop_mode,
            Channel => &mut self.params.channel,
            Density => &mut self.params.density,
            VibratoRate => &mut self.params.vibrato_rate,
            VibratoDepth => &mut self.params.vibrato_depth,
        }
    }

    /// Control-path parameter write. Sets the busy flag for the duration of
    /// the write so the audio thread can skip a concurrent reset's
    /// stochastic resampling rather than race it (§5).
    pub fn param_set(&mut self, name: crate::param::ParamName, ty: ParamType, value: f64) {
        self.busy.store(true, Ordering::Release);
        self.param_mut(name).set_field(ty, value);
        self.busy.store(false, Ordering::Release);
    }

    pub fn param_get(&self, name: crate::param::ParamName, ty: ParamType) -> f64 {
        match name {
            crate::param::ParamName::Delay => self.params.delay.get_field(ty),
            crate::param::ParamName::Rate => self.params.rate.get_field(ty),
            crate::param::ParamName::Glisson => self.params.glisson.get_field(ty),
            crate::param::ParamName::GlissonRows => self.params.glisson_rows.get_field(ty),
            crate::param::ParamName::GlissonPosition => self.params.glisson_position.get_field(ty),
            crate::param::ParamName::Window => self.params.window.get_field(ty),
            crate::param::ParamName::Amplitude => self.params.amplitude.get_field(ty),
            crate::param::ParamName::Space => self.params.space.get_field(ty),
            crate::param::ParamName::EnvelopePosition => self.params.envelope_position.get_field(ty),
            crate::param::ParamName::NEnvelopes => self.params.n_envelopes.get_field(ty),
            crate::param::ParamName::Direction => self.params.direction.get_field(ty),
            crate::param::ParamName::StartPoint => self.params.start_point.get_field(ty),
            crate::param::ParamName::StopPoint => self.params.stop_point.get_field(ty),
            crate::param::ParamName::RateQuantizeSemi => self.params.rate_quantize_semi.get_field(ty),
            crate::param::ParamName::LoopMode => self.params.loop_mode.get_field(ty),
            crate::param::ParamName::Channel => self.params.channel.get_field(ty),
            crate::param::ParamName::Density => self.params.density.get_field(ty),
            crate::param::ParamName::VibratoRate => self.params.vibrato_rate.get_field(ty),
            crate::param::ParamName::VibratoDepth => self.params.vibrato_depth.get_field(ty),
        }
    }

    /// True if `prev -> curr` is a grain-reset crossing: a strictly
    /// positive descent past `RESET_EPSILON`, or a rising edge from at/under
    /// it up past it — i.e. the phasor wrapped back to (near) zero.
    fn is_reset(prev: f64, curr: f64) -> bool {
        prev - curr > RESET_EPSILON + f64::EPSILON || (prev <= RESET_EPSILON && curr > RESET_EPSILON)
    }

    /// Renders one sub-block. `block_len` must not exceed the `max_block`
    /// passed to [`Grain::new`]. Any failure mode in §4.1/§7 is handled by
    /// returning early, leaving outputs untouched (the "no-op" contract).
    pub fn process(&mut self, io: &IoConfig, voice_sub_block_offset: usize, block_len: usize, out: &mut VoiceOutputs) {
        if block_len == 0 || block_len > self.scratch_progress.len() {
            return;
        }
        let Some(full_clock) = io.grain_clock_for(self.index) else {
            return;
        };
        if voice_sub_block_offset + block_len > full_clock.len() {
            return;
        }
        let clock = &full_clock[voice_sub_block_offset..voice_sub_block_offset + block_len];
        if clock.len() >= 2 && clock[0] == clock[1] {
            return;
        }

        let traversal = io.traversal_for(self.index);
        let fm = io.fm_for(self.index);
        let am = io.am_for(self.index);

        // Step 1: window-shape the grain clock.
        let space_value = self.value_table[1].space;
        let window_value = self.value_table[1].window;
        let window_portion = 1.0 / (1.0 - space_value).clamp(1e-4, 1.0);
        for (j, &c) in clock.iter().enumerate() {
            let wrapped = gf_mod(c + window_value, 1.0);
            self.scratch_progress[j] = (wrapped * window_portion).min(1.0);
        }

        // Step 2: detect reset + emit grain state.
        let mut reset_position: Option<usize> = None;
        if Self::is_reset(self.last_grain_clock, self.scratch_progress[0]) {
            reset_position = Some(0);
        }
        for j in 1..block_len {
            if reset_position.is_none()
                && Self::is_reset(self.scratch_progress[j - 1], self.scratch_progress[j])
            {
                reset_position = Some(j);
            }
            out.state[j] = 1.0;
        }
        out.state[0] = 1.0;
        if let Some(pos) = reset_position {
            out.state[pos] = 0.0;
        }
        self.last_grain_clock = self.scratch_progress[block_len - 1];
        out.progress[..block_len].copy_from_slice(&self.scratch_progress[..block_len]);

        let source_buf = self.buffers.source.clone();
        let info = source_buf
            .as_ref()
            .and_then(|buf| self.reader.update_buffer_info(buf, io.samplerate));
        let buffer_frames = info.map_or(0.0, |i| i.buffer_frames);

        // Step 3: on reset only, sample the stochastic parameters.
        if let Some(reset_position) = reset_position {
            self.value_table[0] = self.value_table[1];
            self.on_reset(reset_position, traversal, buffer_frames);
            out.state[reset_position] = 0.0;
        }

        self.enabled_internal = self.enabled || reset_position.is_none() && self.enabled_internal;
        if self.window_changed {
            out.output[..block_len].fill(0.0);
            out.envelope[..block_len].fill(0.0);
            out.playhead[..block_len].fill(0.0);
            out.amp[..block_len].fill(0.0);
            return;
        }

        let Some(source_buf) = source_buf else {
            // No source buffer: still report envelope/progress/state but no
            // sample output (§7 missing-buffer semantics).
            out.output[..block_len].fill(0.0);
            self.sample_envelope_into(&mut out.envelope[..block_len], &self.scratch_progress[..block_len].to_vec());
            return;
        };
        let Some(info) = info else {
            out.output[..block_len].fill(0.0);
            return;
        };

        // Step 4: advance the playhead.
        let rate_value = self.value_table[1].rate;
        let direction_value = self.value_table[1].direction;
        let glisson_value = self.value_table[1].glisson;
        let glisson_mode = self.params.glisson.mode;
        let start = info.buffer_frames * self.params.start_point.value;
        let end = info.buffer_frames * self.params.stop_point.value;
        let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
        let fold = self.params.loop_mode.base > 1.1;

        let vibrato_active = self.params.vibrato_rate.value > 0.0 && self.params.vibrato_depth.value > 0.0;

        if glisson_mode != BufferMode::Normal {
            if let Some(env_buf) = &self.buffers.glisson_ctl {
                self.reader.sample_envelope(
                    Some(env_buf),
                    1,
                    0.0,
                    &self.scratch_progress[..block_len],
                    &mut self.scratch_glisson_env[..block_len],
                );
            } else {
                self.scratch_glisson_env[..block_len].fill(1.0);
            }
        }

        for j in 0..block_len {
            let mut fm_cents = fm.and_then(|f| f.get(voice_sub_block_offset + j)).copied().unwrap_or(0.0);
            if vibrato_active {
                self.vibrato_phasor = gf_mod(
                    self.vibrato_phasor + self.params.vibrato_rate.value / io.samplerate.max(1.0),
                    1.0,
                );
                let sine = chevyshev_sin(self.vibrato_phasor - 0.5);
                fm_cents += sine * self.params.vibrato_depth.value * 0.5;
            }
            let pitch_ratio = 2.0_f64.powf(fm_cents / 12.0);

            let glisson_term = if glisson_mode == BufferMode::Normal {
                1.0 + glisson_value * self.scratch_progress[j]
            } else {
                1.0 + self.scratch_glisson_env[j] * glisson_value * self.scratch_progress[j]
            };

            let delta = pitch_ratio * info.sample_rate_adjustment * rate_value * direction_value * glisson_term;
            self.scratch_delta[j] = delta;
        }

        self.scratch_positions[0] = self.source_sample;
        for j in 1..block_len {
            self.scratch_positions[j] = self.scratch_positions[j - 1] + self.scratch_delta[j - 1];
        }
        let last_delta = self.scratch_delta[block_len - 1];
        self.source_sample = gf_mod(
            self.scratch_positions[block_len - 1] + last_delta,
            2.0 * info.buffer_frames.max(1.0),
        );

        if (hi - lo).abs() < f64::EPSILON {
            // Degenerate window: early return, positions hold at previous
            // value (§7).
            out.output[..block_len].fill(0.0);
            return;
        }
        for j in 0..block_len {
            self.scratch_positions[j] = pong(self.scratch_positions[j], lo, hi, fold);
        }

        if self.scratch_positions[..block_len].iter().any(|p| p.is_nan()) {
            out.output[..block_len].fill(0.0);
            return;
        }

        // Step 5: sample envelope.
        let n_envelopes = self.params.n_envelopes.value.max(1.0) as usize;
        let env2d_pos = self.value_table[1].envelope_position;
        let progress_copy = self.scratch_progress[..block_len].to_vec();
        self.reader.sample_envelope(
            self.buffers.envelope.as_deref(),
            n_envelopes,
            env2d_pos,
            &progress_copy,
            &mut out.envelope[..block_len],
        );

        // Step 6: sample source buffer.
        let lower_bound = lo * info.one_over_buffer_frames;
        let upper_bound = hi * info.one_over_buffer_frames;
        let n_channels = info.n_channels.max(1);
        let channel = (self.params.channel.value.floor() as i64).rem_euclid(n_channels as i64) as usize;
        self.reader.sample_buffer(
            &source_buf,
            channel,
            &self.scratch_positions[..block_len],
            &mut out.output[..block_len],
            lower_bound,
            upper_bound,
        );

        // Step 7/8: expand value table + output mix.
        let density0 = self.value_table[0].density;
        let density1 = self.value_table[1].density;
        let amp0 = self.value_table[0].amplitude;
        let amp1 = self.value_table[1].amplitude;
        for j in 0..block_len {
            let active = out.state[j] > 0.5;
            let density = if active { density1 } else { density0 };
            let amplitude = if active { amp1 } else { amp0 };

            let am_in = am.and_then(|a| a.get(voice_sub_block_offset + j)).copied().unwrap_or(0.0);
            let amp_env = (1.0 - am_in) * amplitude * density;
            out.envelope[j] *= density;
            out.output[j] *= amp_env * 0.5 * out.envelope[j];
            out.playhead[j] = self.scratch_positions[j] * info.one_over_buffer_frames * density;
            out.amp[j] = amp_env;
            out.stream_channel[j] = (self.stream + 1) as f64;
            out.buffer_channel[j] = (channel as f64).floor() + 1.0;
        }
    }

    fn sample_envelope_into(&self, out: &mut [f64], progress: &[f64]) {
        for (o, &p) in out.iter_mut().zip(progress) {
            *o = hann_lookup(p);
        }
    }

    fn on_reset(&mut self, reset_position: usize, traversal: Option<&[f64]>, buffer_frames: f64) {
        let busy = self.busy.load(Ordering::Acquire);

        // (a) delay
        let delay_value = if let (BufferMode::BufferSequence | BufferMode::BufferRandom, Some(buf)) =
            (self.params.delay.mode, &self.buffers.delay_ctl)
        {
            self.reader
                .sample_param_buffer(
                    buf,
                    self.params.delay.mode,
                    self.index,
                    self.params.delay.random,
                    self.params.delay.offset,
                    &mut self.rng,
                )
                .unwrap_or_else(|| self.params.delay.sample(self.index, &mut self.rng))
        } else if !busy {
            self.params.delay.sample(self.index, &mut self.rng)
        } else {
            self.params.delay.value
        };
        self.params.delay.value = delay_value;

        // (b) reposition source_sample from the traversal phasor.
        let traversal_value = traversal
            .and_then(|t| t.get(reset_position))
            .copied()
            .unwrap_or(0.0);
        if buffer_frames > 0.0 {
            self.source_sample = gf_mod(traversal_value * buffer_frames - delay_value - 1.0, buffer_frames);
        }

        if !busy {
            // (c) rate, quantized.
            let raw_rate = self.params.rate.sample(self.index, &mut self.rng);
            let quantize_step = 1.0 - self.params.rate_quantize_semi.value;
            self.params.rate.value = if quantize_step.abs() > f64::EPSILON {
                (1.0 + (raw_rate - 1.0) / quantize_step).round() * quantize_step
            } else {
                raw_rate
            };

            // (d) window, unless the window-change latch is already set.
            let previous_window = self.params.window.value;
            if !self.window_changed {
                self.params.window.sample(self.index, &mut self.rng);
            }
            self.window_changed = (self.params.window.value - previous_window).abs() > WINDOW_CHANGE_EPSILON;

            // (e) stochastic params.
            self.params.space.sample(self.index, &mut self.rng);
            self.params.glisson.sample(self.index, &mut self.rng);
            self.params.envelope_position.sample(self.index, &mut self.rng);
            self.params.amplitude.sample(self.index, &mut self.rng);
            self.params.start_point.sample(self.index, &mut self.rng);
            self.params.stop_point.sample(self.index, &mut self.rng);
            self.params.glisson_position.sample(self.index, &mut self.rng);
            self.params.vibrato_rate.sample(self.index, &mut self.rng);
            self.params.vibrato_depth.sample(self.index, &mut self.rng);

            // (f) channel.
            let n_channels = 1.0_f64.max(1.0);
            self.params.channel.sample_normalized(self.index, &mut self.rng, n_channels.max(1.0));

            // (g) grain enable.
            let coin = self.rng.next_unit() as f64;
            let enabled_grain = self.params.density.base > coin;
            self.params.density.value = if enabled_grain { 1.0 } else { 0.0 };

            // (h) direction.
            let base = self.params.direction.base;
            self.params.direction.value = if base.abs() >= 1.0 {
                base.signum()
            } else {
                let roll = self.rng.next_unit() as f64;
                if roll < base {
                    1.0
                } else {
                    -1.0
                }
            };
        } else {
            self.window_changed = false;
        }

        self.value_table[1] = ValueTable {
            delay: self.params.delay.value,
            rate: self.params.rate.value,
            glisson: self.params.glisson.value,
            window: self.params.window.value,
            amplitude: self.params.amplitude.value,
            space: self.params.space.value,
            envelope_position: self.params.envelope_position.value,
            direction: self.params.direction.value,
            density: self.params.density.value,
        };
    }
}

/// Chebyshev-polynomial sine approximation used for the vibrato oscillator,
/// matching `gfSyn.h`'s `ChevyshevSin` (SPEC_FULL.md §F.1). `phase` is in
/// `[-0.5, 0.5)`.
fn chevyshev_sin(phase: f64) -> f64 {
    const COEFS: [f64; 4] = [-0.10132118, 0.0066208798, -0.00017350505, 0.0000025222919];
    const PI_MINOR: f64 = -0.00000008742278;
    const TWO_PI: f64 = std::f64::consts::PI * 2.0;

    let x = phase * TWO_PI;
    let x2 = x * x;
    let p7 = COEFS[3];
    let p5 = p7 * x2 + COEFS[2];
    let p3 = p5 * x2 + COEFS[1];
    let p1 = p3 * x2 + COEFS[0];
    (x - std::f64::consts::PI - PI_MINOR) * (x + std::f64::consts::PI + PI_MINOR) * p1 * x
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SourceBuffer;

    fn ramp_phasor(hz: f64, samplerate: f64, len: usize, start_phase: f64) -> Vec<f64> {
        (0..len)
            .map(|n| gf_mod(start_phase + hz * n as f64 / samplerate, 1.0))
            .collect()
    }

    #[test]
    fn single_grain_static_phasor_produces_bounded_output() {
        let samplerate = 48_000.0;
        let block = 32usize;
        let clock = ramp_phasor(10.0, samplerate, block * 50, 0.0);
        let traversal = vec![0.0; clock.len()];

        let mut grain = Grain::new(0, block);
        grain.params.rate.base = 1.0;
        grain.params.amplitude.base = 1.0;
        grain.params.window.base = 0.0;
        grain.params.space.base = 0.0;
        grain.buffers.source = Some(Arc::new(SourceBuffer::new(1, 48_000, samplerate as u32)));

        let mut peak = 0.0_f64;
        for sub in 0..(clock.len() / block) {
            let io = IoConfig {
                grain_clock: &[&clock],
                traversal_phasor: &[&traversal],
                fm: &[],
                am: &[],
                block_size: block,
                samplerate,
                livemode: false,
            };
            let mut output = vec![0.0; block];
            let mut state = vec![0.0; block];
            let mut progress = vec![0.0; block];
            let mut playhead = vec![0.0; block];
            let mut amp = vec![0.0; block];
            let mut envelope = vec![0.0; block];
            let mut buffer_channel = vec![0.0; block];
            let mut stream_channel = vec![0.0; block];
            let mut out = VoiceOutputs {
                output: &mut output,
                state: &mut state,
                progress: &mut progress,
                playhead: &mut playhead,
                amp: &mut amp,
                envelope: &mut envelope,
                buffer_channel: &mut buffer_channel,
                stream_channel: &mut stream_channel,
            };
            grain.process(&io, sub * block, block, &mut out);
            for &s in out.output.iter() {
                peak = peak.max(s.abs());
            }
            for &s in out.state.iter() {
                assert!(s == 0.0 || s == 1.0);
            }
        }
        assert!(peak <= 0.5 + 1e-6, "peak {peak} exceeded 0.5");
    }

    #[test]
    fn fixed_direction_is_stable_across_resets() {
        let mut grain = Grain::new(0, 16);
        grain.params.direction.base = 1.0;
        for _ in 0..20 {
            grain.on_reset(0, None, 48_000.0);
            assert_eq!(grain.value_table[1].direction, 1.0);
        }
        grain.params.direction.base = -1.0;
        grain.on_reset(0, None, 48_000.0);
        assert_eq!(grain.value_table[1].direction, -1.0);
    }

    #[test]
    fn is_reset_detects_descent_and_rising_edge() {
        assert!(Grain::is_reset(0.9, 0.05));
        assert!(!Grain::is_reset(0.05, 0.9));
        assert!(Grain::is_reset(0.0, RESET_EPSILON * 2.0));
        assert!(!Grain::is_reset(0.5, 0.6));
    }

    #[test]
    fn default_params_produce_audible_output_on_reset() {
        let mut grain = Grain::new(0, 16);
        grain.on_reset(0, None, 48_000.0);
        assert_eq!(grain.value_table[1].density, 1.0);
        assert_eq!(grain.value_table[1].rate, 1.0);
        assert_eq!(grain.value_table[1].direction, 1.0);
        assert_eq!(grain.params.stop_point.value, 1.0);
    }

    #[test]
    fn chevyshev_sin_matches_std_sin_roughly() {
        for n in 0..20 {
            let phase = n as f64 / 20.0 - 0.5;
            let approx = chevyshev_sin(phase);
            let exact = (phase * std::f64::consts::PI * 2.0).sin();
            assert!((approx - exact).abs() < 0.01, "phase {phase}: {approx} vs {exact}");
        }
    }
}
