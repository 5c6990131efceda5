//! Live-input recorder (§4.5): a circular write head into a [`SourceBuffer`],
//! with sync/freeze control, a simple overdub mix path, and an optional
//! band-split overdub path driven by a bank of RBJ band-pass filters.

use crate::buffer::{BufferReader, DefaultBufferReader, SourceBuffer};
use crate::filter::{Biquad, BiquadCoeffs};
use crate::utils::gf_mod;

/// One band in the band-split overdub path (§4.5.2). Carries two
/// independent biquad instances per channel — one filtering the existing
/// buffer content, one filtering the incoming input — so the two passes
/// never share delay memory.
pub struct BandFilter {
    pub center: f64,
    pub q: f64,
    /// Mix weight for this band: how much of it comes from the buffer side
    /// versus the input side (§4.5.2).
    pub overdub: f64,
    coeffs: BiquadCoeffs,
    buffer_side: Vec<Biquad>,
    input_side: Vec<Biquad>,
}

impl BandFilter {
    pub fn new(center: f64, q: f64, overdub: f64, channels: usize, samplerate: f64) -> Self {
        Self {
            center,
            q,
            overdub,
            coeffs: BiquadCoeffs::bandpass(center, q, samplerate),
            buffer_side: vec![Biquad::new(); channels],
            input_side: vec![Biquad::new(); channels],
        }
    }

    pub fn set_params(&mut self, center: f64, q: f64, overdub: f64, samplerate: f64) {
        self.center = center;
        self.q = q;
        self.overdub = overdub;
        self.coeffs = BiquadCoeffs::bandpass(center, q, samplerate);
    }
}

/// A live-input sample writer with a monotone circular write head.
pub struct Recorder {
    rec_range: [f64; 2],
    write_position: usize,
    pub write_position_norm: f64,
    pub write_position_ms: f64,
    pub write_position_samps: usize,
    pub sync: bool,
    pub freeze: bool,
    pub state: bool,
    pub overdub: f64,
    pub samplerate: u32,

    bands: Vec<BandFilter>,
    channels: usize,
    reader: Box<dyn BufferReader>,

    scratch_existing: Vec<f64>,
    scratch_residual: Vec<f64>,
    scratch_band_sum: Vec<f64>,
    scratch_out: Vec<f64>,
}

impl Recorder {
    pub fn new(channels: usize, max_block: usize, samplerate: u32) -> Self {
        Self {
            rec_range: [0.0, 1.0],
            write_position: 0,
            write_position_norm: 0.0,
            write_position_ms: 0.0,
            write_position_samps: 0,
            sync: false,
            freeze: false,
            state: false,
            overdub: 0.0,
            samplerate,
            bands: Vec::new(),
            channels,
            reader: Box::new(DefaultBufferReader),
            scratch_existing: vec![0.0; max_block],
            scratch_residual: vec![0.0; max_block],
            scratch_band_sum: vec![0.0; max_block],
            scratch_out: vec![0.0; max_block],
        }
    }

    pub fn set_rec_range(&mut self, lo: f64, hi: f64) {
        self.rec_range = [lo, hi];
    }

    /// Appends a band filter and keeps the bank sorted by `q` descending,
    /// prioritizing narrow bands during the audio-path pass (§4.5.2, §9's
    /// pre-sort fix).
    pub fn add_band(&mut self, center: f64, q: f64, overdub: f64) {
        let samplerate = self.samplerate as f64;
        self.bands.push(BandFilter::new(center, q, overdub, self.channels, samplerate));
        self.bands.sort_by(|a, b| b.q.partial_cmp(&a.q).unwrap_or(std::cmp::Ordering::Equal));
    }

    pub fn set_filter_params(&mut self, index: usize, center: f64, q: f64, overdub: f64) {
        let samplerate = self.samplerate as f64;
        if let Some(band) = self.bands.get_mut(index) {
            band.set_params(center, q, overdub, samplerate);
        }
        self.bands.sort_by(|a, b| b.q.partial_cmp(&a.q).unwrap_or(std::cmp::Ordering::Equal));
    }

    pub fn write_position(&self) -> usize {
        self.write_position
    }

    fn reset_telemetry(&mut self) {
        self.write_position = 0;
        self.write_position_samps = 0;
        self.write_position_norm = 0.0;
        self.write_position_ms = 0.0;
    }

    /// Processes one `block_size`-sample sub-block (§4.5). `input` holds one
    /// slice per channel; `recorded_head_out` is filled with the per-sample
    /// normalized write head.
    pub fn process(&mut self, input: &[&[f64]], time_override: f64, buffer: Option<&SourceBuffer>, block_size: usize, recorded_head_out: &mut [f64]) {
        let block_size = block_size.min(recorded_head_out.len()).min(self.scratch_existing.len());
        if block_size == 0 {
            return;
        }

        if !self.state {
            if !self.freeze {
                let buffer_frames = buffer
                    .and_then(|buf| self.reader.update_buffer_info(buf, self.samplerate as f64))
                    .map_or(0.0, |info| info.buffer_frames);
                let value = if buffer_frames > 0.0 {
                    self.write_position as f64 / buffer_frames
                } else {
                    0.0
                };
                recorded_head_out[..block_size].fill(value);
            } else {
                recorded_head_out[..block_size].fill(self.write_position_norm);
            }
            return;
        }

        let Some(buf) = buffer else {
            self.reset_telemetry();
            recorded_head_out[..block_size].fill(0.0);
            return;
        };
        let Some(info) = self.reader.update_buffer_info(buf, self.samplerate as f64) else {
            self.reset_telemetry();
            recorded_head_out[..block_size].fill(0.0);
            return;
        };
        if info.buffer_frames <= 0.0 {
            self.reset_telemetry();
            recorded_head_out[..block_size].fill(0.0);
            return;
        }
        let buffer_frames = info.buffer_frames;

        if self.sync {
            self.write_position = (buffer_frames * gf_mod(time_override, 1.0)) as usize;
        }

        let lo = self.rec_range[0];
        let hi = self.rec_range[1];
        let base = (lo * buffer_frames).floor() as i64;
        let range = ((hi - lo).abs() * buffer_frames).floor() as i64;
        if range <= 0 {
            recorded_head_out[..block_size].fill(self.write_position_norm);
            return;
        }
        let increment: i64 = if hi >= lo { block_size as i64 } else { -(block_size as i64) };

        for (c, &channel_input) in input.iter().enumerate().take(self.channels) {
            self.reader.read_buffer(buf, c, self.write_position, &mut self.scratch_existing[..block_size]);

            if self.bands.is_empty() {
                let mix = self.overdub;
                for i in 0..block_size {
                    let existing = self.scratch_existing[i];
                    let sample = channel_input[i];
                    self.scratch_out[i] = if mix <= 0.0 { sample } else { sample * (1.0 - mix) + existing * mix };
                }
            } else {
                self.write_band_split(c, block_size, &channel_input[..block_size]);
            }

            self.reader.write_buffer(buf, c, self.write_position, &self.scratch_out[..block_size]);
        }

        if !self.freeze {
            for i in 0..block_size {
                recorded_head_out[i] = ((self.write_position + i) % buffer_frames as usize) as f64 / buffer_frames;
            }
            self.write_position = (((self.write_position as i64 + increment) + range) % range + base) as usize;
            self.write_position_samps = self.write_position;
            self.write_position_norm =
                ((self.write_position_samps + block_size) % buffer_frames as usize) as f64 / buffer_frames;
            self.write_position_ms = (self.write_position_samps + block_size) as f64 * 1000.0 / self.samplerate.max(1) as f64;
        } else {
            recorded_head_out[..block_size].fill(self.write_position_norm);
            self.write_position = (((self.write_position as i64 + increment) + range) % range + base) as usize;
        }
    }

    /// Band-split overdub write (§4.5.2). Writes the mixed result into
    /// `self.scratch_out[..block_len]`.
    fn write_band_split(&mut self, channel: usize, block_len: usize, input: &[f64]) {
        self.scratch_band_sum[..block_len].fill(0.0);
        self.scratch_residual[..block_len].copy_from_slice(&self.scratch_existing[..block_len]);

        for band in &mut self.bands {
            let filt = &mut band.buffer_side[channel];
            for i in 0..block_len {
                let b = filt.process(&band.coeffs, self.scratch_residual[i]);
                self.scratch_band_sum[i] += b * band.overdub;
                self.scratch_residual[i] -= b;
            }
        }
        for i in 0..block_len {
            self.scratch_out[i] = self.scratch_residual[i] * self.overdub;
        }

        self.scratch_residual[..block_len].copy_from_slice(&input[..block_len]);
        for band in &mut self.bands {
            let filt = &mut band.input_side[channel];
            for i in 0..block_len {
                let b = filt.process(&band.coeffs, self.scratch_residual[i]);
                self.scratch_band_sum[i] += b * (1.0 - band.overdub);
                self.scratch_residual[i] -= b;
            }
        }
        for i in 0..block_len {
            self.scratch_out[i] += self.scratch_band_sum[i] + self.scratch_residual[i] * (1.0 - self.overdub);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_recorder_reports_zero_head_without_buffer() {
        let mut rec = Recorder::new(1, 64, 48_000);
        let mut head = vec![0.0; 16];
        rec.process(&[&[0.0; 16]], 0.0, None, 16, &mut head);
        assert!(head.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn simple_write_direct_when_overdub_zero() {
        let mut rec = Recorder::new(1, 64, 48_000);
        rec.state = true;
        let buf = SourceBuffer::new(1, 64, 48_000);
        let input = vec![0.5; 16];
        let mut head = vec![0.0; 16];
        rec.process(&[&input], 0.0, Some(&buf), 16, &mut head);

        let reader = DefaultBufferReader;
        let mut out = [0.0; 16];
        reader.read_buffer(&buf, 0, 0, &mut out);
        assert!(out.iter().all(|&v| (v - 0.5).abs() < 1e-9));
    }

    #[test]
    fn write_head_wraps_around_buffer_end() {
        let mut rec = Recorder::new(1, 64, 48_000);
        rec.state = true;
        let buf = SourceBuffer::new(1, 1000, 48_000);
        let input = vec![0.0; 16];
        let mut head = vec![0.0; 16];

        // Force the write head to 992 as if a previous call had left it there.
        rec.write_position = 992;
        rec.process(&[&input], 0.0, Some(&buf), 16, &mut head);

        assert_eq!(rec.write_position, 8);
        assert!((head[0] - 992.0 / 1000.0).abs() < 1e-9);
        assert!((head[15] - 7.0 / 1000.0).abs() < 1e-9);
    }

    #[test]
    fn sync_snaps_write_head_to_time_override() {
        let mut rec = Recorder::new(1, 64, 48_000);
        rec.state = true;
        rec.sync = true;
        let buf = SourceBuffer::new(1, 1000, 48_000);
        let input = vec![0.0; 16];
        let mut head = vec![0.0; 16];
        rec.process(&[&input], 0.25, Some(&buf), 16, &mut head);
        assert_eq!(rec.write_position, 250 + 16);
    }

    #[test]
    fn band_split_overdub_preserves_amplitude_bounds() {
        let mut rec = Recorder::new(1, 64, 48_000);
        rec.state = true;
        rec.overdub = 0.5;
        rec.add_band(1000.0, 2.0, 0.5);
        let buf = SourceBuffer::new(1, 64, 48_000);
        let input = vec![1.0; 16];
        let mut head = vec![0.0; 16];
        rec.process(&[&input], 0.0, Some(&buf), 16, &mut head);

        let reader = DefaultBufferReader;
        let mut out = [0.0; 16];
        reader.read_buffer(&buf, 0, 0, &mut out);
        assert!(out.iter().all(|&v| v.is_finite() && v.abs() < 10.0));
    }

    #[test]
    fn bands_stay_sorted_by_q_descending() {
        let mut rec = Recorder::new(1, 64, 48_000);
        rec.add_band(500.0, 1.0, 0.5);
        rec.add_band(1000.0, 4.0, 0.5);
        rec.add_band(2000.0, 2.0, 0.5);
        let qs: Vec<f64> = rec.bands.iter().map(|b| b.q).collect();
        assert_eq!(qs, vec![4.0, 2.0, 1.0]);
    }
}
