//! Equal-power crossfade panner (§4.3): spreads each grain voice's output
//! across `output_channels` channels, re-picking a pan position once per
//! grain reset and crossfading between adjacent channels with a quarter-sine
//! curve.

use std::sync::Mutex;

use crate::tables::quarter_sine_lookup;
use crate::utils::{deviate, gf_mod, random_range, round_to, Xorshift32};

/// Selects how a new pan position is drawn from `(center, spread)` on each
/// grain reset (§4.3 step 2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PanMode {
    /// Uniform in `[center - spread, center + spread]`.
    Bipolar,
    /// Uniform in `[center, center + spread]`.
    Unipolar,
    /// `clamp(deviate(center, spread/2), 0, 1)`.
    Stereo,
}

struct ChannelState {
    last_sample: f64,
    last_position: f64,
}

/// Per-callback-channel state shared between reconfiguration and the audio
/// path, guarded by one mutex (§5).
struct Shared {
    channels: usize,
    output_channels: usize,
    states: Vec<ChannelState>,
}

/// The equal-power crossfade panner.
pub struct Panner {
    mode: PanMode,
    pub pan_position: f64,
    pub pan_spread: f64,
    pub pan_quantization: f64,
    shared: Mutex<Shared>,
    rng: Xorshift32,
    positions: Vec<f64>,
}

impl Panner {
    pub fn new(mode: PanMode, in_channels: usize, out_channels: usize, max_block: usize) -> Self {
        let mut panner = Self {
            mode,
            pan_position: 0.5,
            pan_spread: 0.25,
            pan_quantization: 0.0,
            shared: Mutex::new(Shared {
                channels: 0,
                output_channels: 0,
                states: Vec::new(),
            }),
            rng: Xorshift32::new(0xC0FF_EE01),
            positions: vec![0.0; max_block],
        };
        panner.set_channels(in_channels, out_channels);
        panner
    }

    /// Resizes per-channel tracking state. Takes the same lock the audio
    /// path uses around the per-channel vectors (§5).
    pub fn set_channels(&mut self, channels: usize, output_channels: usize) {
        let mut shared = self.shared.lock().unwrap();
        shared.channels = channels;
        shared.output_channels = output_channels;
        if shared.states.len() != channels {
            shared.states = (0..channels)
                .map(|_| ChannelState {
                    last_sample: 0.0,
                    last_position: 0.0,
                })
                .collect();
        }
    }

    /// Changes the pan-position draw mode (§4.3 step 2). Safe to call from
    /// the audio thread: it only rewrites a plain field, never touching
    /// `shared`.
    pub fn set_mode(&mut self, mode: PanMode) {
        self.mode = mode;
    }

    pub fn positions(&self) -> Vec<f64> {
        let shared = self.shared.lock().unwrap();
        shared.states.iter().map(|s| s.last_position).collect()
    }

    /// Finds the single reset transition in `state` for channel `ch`,
    /// returning an index in `0..=state.len()` (`state.len()` means no
    /// transition this sub-block). Mirrors the grain voice's own
    /// `is_reset` decrease-crossing criterion (§4.1), applied to the
    /// `1.0` normal / `0.0` reset-sample state signal.
    fn detect_one_transition(state: &[f64], last_sample: &mut f64) -> usize {
        let block_size = state.len();
        if *last_sample - state[0] > 0.5 {
            *last_sample = state[block_size - 1];
            return 0;
        }
        *last_sample = state[block_size - 1];
        for i in 1..block_size {
            if state[i - 1] - state[i] > 0.5 {
                return i;
            }
        }
        block_size
    }

    /// Draws a new pan position and writes the per-sample position curve for
    /// this sub-block into `out` (§4.3 steps 2-3). A free function (not a
    /// method) so callers can pass disjoint field borrows of `Panner`
    /// without aliasing `&mut self`.
    #[allow(clippy::too_many_arguments)]
    fn determine_pan_position(
        mode: PanMode,
        rng: &mut Xorshift32,
        center: f64,
        spread: f64,
        quantization: f64,
        idx: usize,
        block_size: usize,
        last_position: &mut f64,
        output_channels: usize,
        out: &mut [f64],
    ) {
        let mut position = match mode {
            PanMode::Bipolar => deviate(rng, center as f32, spread as f32) as f64,
            PanMode::Unipolar => random_range(rng, center as f32, (center + spread) as f32) as f64,
            PanMode::Stereo => deviate(rng, center as f32, (spread * 0.5) as f32).clamp(0.0, 1.0) as f64,
        };

        let n_outputs = output_channels as f64;
        position = gf_mod(position + n_outputs * 5.0, n_outputs).max(0.0);
        position = gf_mod(round_to(position, quantization), n_outputs);

        for (j, slot) in out.iter_mut().take(block_size).enumerate() {
            *slot = if j >= idx { position } else { *last_position };
        }
        *last_position = out[block_size - 1];
    }

    /// Mixes `input` into `output[..output_channels]` using an equal-power
    /// crossfade between the two channels adjacent to `positions[j]`
    /// (§4.3 step 4).
    fn perform_pan(input: &[f64], positions: &[f64], block_offset: usize, output: &mut [Vec<f64>], output_channels: usize) {
        for (j, &position) in positions.iter().enumerate() {
            let low = position as usize;
            let high = (low + 1) % output_channels;
            let mix = position - low as f64;
            output[low][block_offset + j] += input[j] * quarter_sine_lookup(1.0 - mix);
            output[high][block_offset + j] += input[j] * quarter_sine_lookup(mix);
        }
    }

    /// Processes one internal sub-block for every voice channel, adding
    /// into `output` (one `Vec` per output channel, each at least
    /// `block_offset + block_size` long). Channels whose `grain_state`
    /// carries no active grain (`sum|state| == 0`) are skipped (§4.3 fast
    /// path).
    pub fn process(&mut self, grains: &[&[f64]], grain_states: &[&[f64]], output: &mut [Vec<f64>], block_offset: usize) {
        let (channels, output_channels) = {
            let shared = self.shared.lock().unwrap();
            (shared.channels, shared.output_channels)
        };
        if output_channels < 1 {
            return;
        }
        for ch in 0..channels.min(grains.len()).min(grain_states.len()) {
            let input = grains[ch];
            let states = grain_states[ch];
            let block_size = input.len().min(states.len()).min(self.positions.len());
            if block_size == 0 {
                continue;
            }
            let abs_sum: f64 = states[..block_size].iter().map(|s| s.abs()).sum();
            if abs_sum <= 0.0 {
                continue;
            }

            let mut shared = self.shared.lock().unwrap();
            let state = &mut shared.states[ch];
            let idx = Self::detect_one_transition(&states[..block_size], &mut state.last_sample);
            let mut last_position = state.last_position;
            drop(shared);

            Self::determine_pan_position(
                self.mode,
                &mut self.rng,
                self.pan_position,
                self.pan_spread,
                self.pan_quantization,
                idx,
                block_size,
                &mut last_position,
                output_channels,
                &mut self.positions,
            );

            {
                let mut shared = self.shared.lock().unwrap();
                shared.states[ch].last_position = last_position;
            }

            Self::perform_pan(&input[..block_size], &self.positions[..block_size], block_offset, output, output_channels);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_transition_state(len: usize) -> Vec<f64> {
        vec![1.0; len]
    }

    #[test]
    fn skips_channel_with_zero_grain_state() {
        let mut panner = Panner::new(PanMode::Bipolar, 1, 2, 16);
        let input = vec![1.0; 16];
        let state = vec![0.0; 16];
        let mut output = vec![vec![0.0; 16]; 2];
        panner.process(&[&input], &[&state], &mut output, 0);
        assert!(output[0].iter().all(|&v| v == 0.0));
        assert!(output[1].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn active_channel_distributes_energy_across_two_outputs() {
        let mut panner = Panner::new(PanMode::Bipolar, 1, 3, 16);
        panner.pan_position = 1.0;
        panner.pan_spread = 0.0;
        let input = vec![1.0; 16];
        let state = no_transition_state(16);
        let mut output = vec![vec![0.0; 16]; 3];
        panner.process(&[&input], &[&state], &mut output, 0);
        let total: f64 = output.iter().map(|ch| ch.iter().sum::<f64>()).sum();
        assert!(total > 0.0);
    }

    #[test]
    fn detect_one_transition_finds_the_reset_sample() {
        let mut last = 1.0;
        let state = [1.0, 1.0, 0.0, 1.0];
        let idx = Panner::detect_one_transition(&state, &mut last);
        assert_eq!(idx, 2);
    }

    #[test]
    fn detect_one_transition_reports_block_len_when_absent() {
        let mut last = 1.0;
        let state = [1.0, 1.0, 1.0, 1.0];
        let idx = Panner::detect_one_transition(&state, &mut last);
        assert_eq!(idx, state.len());
    }
}
