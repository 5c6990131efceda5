//! DBAP / VBAP spatial panner (§4.4): per-source gain maps derived from
//! 3D source and speaker geometry, with a dirty-flag linear ramp blend when
//! a gain map changes underneath a still-playing source.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::utils::distance_3d;

/// Which gain-calculation formula [`SpatPanner::recalculate_all_gains`]
/// uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpatMode {
    Vbap,
    Dbap,
}

type GainMap = HashMap<usize, f32>;

struct GainState {
    current: HashMap<usize, GainMap>,
    previous: HashMap<usize, GainMap>,
    dirty: HashMap<usize, bool>,
}

/// DBAP/VBAP spatial panner over an arbitrary speaker layout.
pub struct SpatPanner {
    pub mode: SpatMode,
    pub distance_thresh: f32,
    pub n_speakers: usize,
    pub exponent: f32,
    /// Per-axis mask; `0.0` suppresses that axis in every distance
    /// calculation (§4.4).
    pub dim_mask: [f32; 3],

    source_positions: HashMap<usize, [f32; 3]>,
    speaker_positions: HashMap<usize, [f32; 3]>,
    gains: Mutex<GainState>,

    speaker_amps: Vec<f32>,
    grain_amps: Vec<f32>,
}

impl SpatPanner {
    pub fn new(mode: SpatMode) -> Self {
        Self {
            mode,
            distance_thresh: 2.0,
            n_speakers: 3,
            exponent: 1.0,
            dim_mask: [1.0, 1.0, 1.0],
            source_positions: HashMap::new(),
            speaker_positions: HashMap::new(),
            gains: Mutex::new(GainState {
                current: HashMap::new(),
                previous: HashMap::new(),
                dirty: HashMap::new(),
            }),
            speaker_amps: Vec::new(),
            grain_amps: Vec::new(),
        }
    }

    pub fn set_source_position(&mut self, source_id: usize, position: [f32; 3]) {
        self.source_positions.insert(source_id, position);
        self.update_source_gains(source_id);
    }

    pub fn set_speaker_position(&mut self, speaker_id: usize, position: [f32; 3]) {
        self.speaker_positions.insert(speaker_id, position);
    }

    pub fn clear_speaker_positions(&mut self) {
        self.speaker_positions.clear();
        let mut gains = self.gains.lock().unwrap();
        gains.current.clear();
        gains.previous.clear();
        gains.dirty.clear();
    }

    pub fn clear_source_positions(&mut self) {
        self.source_positions.clear();
        let mut gains = self.gains.lock().unwrap();
        gains.current.clear();
        gains.previous.clear();
        gains.dirty.clear();
    }

    pub fn recalculate_all_gains(&mut self, clear_history: bool) {
        if clear_history {
            let mut gains = self.gains.lock().unwrap();
            gains.dirty.clear();
            gains.previous.clear();
        }
        let ids: Vec<usize> = self.source_positions.keys().copied().collect();
        for id in ids {
            self.update_source_gains(id);
        }
    }

    fn update_source_gains(&mut self, source_id: usize) {
        if !self.source_positions.contains_key(&source_id) {
            return;
        }
        match self.mode {
            SpatMode::Dbap => self.set_volume_dbap(source_id),
            SpatMode::Vbap => self.set_volume_vbap(source_id),
        }
    }

    fn masked(&self, position: [f32; 3]) -> [f32; 3] {
        [
            position[0] * self.dim_mask[0],
            position[1] * self.dim_mask[1],
            position[2] * self.dim_mask[2],
        ]
    }

    /// Sorts speakers by distance ascending, keeping at most `n_speakers`
    /// within `distance_thresh`. The masked speaker position is used
    /// consistently for both the sort key and the stored distance — the
    /// original DBAP implementation measured against the unmasked speaker
    /// position in one branch, a defect not reproduced here.
    fn sorted_distances(&self, source_id: usize) -> Vec<(usize, f32)> {
        let Some(&source_position) = self.source_positions.get(&source_id) else {
            return Vec::new();
        };
        let source_masked = self.masked(source_position);
        let mut distances: Vec<(usize, f32)> = self
            .speaker_positions
            .iter()
            .map(|(&id, &pos)| (id, distance_3d(source_masked, self.masked(pos))))
            .collect();
        distances.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        distances
    }

    fn set_volume_dbap(&mut self, source_id: usize) {
        if self.speaker_positions.is_empty() {
            return;
        }
        let distances = self.sorted_distances(source_id);
        let mut map = GainMap::new();
        for (counter, (id, distance)) in distances.into_iter().enumerate() {
            if self.n_speakers > 0 && counter >= self.n_speakers {
                break;
            }
            if self.distance_thresh > 0.0 && distance > self.distance_thresh {
                break;
            }
            map.insert(id, (1.0 - distance / self.distance_thresh).powf(self.exponent));
        }
        let mut gains = self.gains.lock().unwrap();
        gains.current.insert(source_id, map);
        gains.dirty.insert(source_id, true);
    }

    fn set_volume_vbap(&mut self, source_id: usize) {
        if self.speaker_positions.is_empty() {
            return;
        }
        let distances = self.sorted_distances(source_id);
        let mut total: f32 = 0.0;
        for (count, &(_, distance)) in distances.iter().enumerate() {
            if self.n_speakers > 0 && count >= self.n_speakers {
                break;
            }
            total += distance;
        }

        let mut gains = self.gains.lock().unwrap();
        if total <= 0.0 {
            gains.current.insert(source_id, GainMap::new());
            return;
        }
        let mut map = GainMap::new();
        for (counter, (id, distance)) in distances.into_iter().enumerate() {
            if self.n_speakers > 0 && counter >= self.n_speakers {
                break;
            }
            if self.distance_thresh > 0.0 && distance > self.distance_thresh {
                break;
            }
            map.insert(id, (1.0 - distance / total).powf(self.exponent));
        }
        gains.current.insert(source_id, map);
        gains.dirty.insert(source_id, true);
    }

    /// Applies current per-source gain maps to `output`, blending from the
    /// previous map when the source is dirty with a linear `0->1` ramp
    /// across the whole callback (§4.4). `input`/`output` are one slice
    /// per channel, all `block_size` samples long.
    pub fn process(&mut self, input: &[&[f64]], output: &mut [Vec<f64>], block_size: usize) {
        let mut gains = self.gains.lock().unwrap();
        if gains.current.is_empty() {
            return;
        }
        let ids: Vec<usize> = gains.current.keys().copied().collect();
        for source_id in ids {
            if source_id >= input.len() {
                continue;
            }
            let source_map = gains.current.get(&source_id).cloned().unwrap_or_default();
            let dirty = *gains.dirty.get(&source_id).unwrap_or(&false);
            let in_channel = input[source_id];

            if !dirty {
                for (&out_idx, &gain) in &source_map {
                    if out_idx >= output.len() {
                        continue;
                    }
                    for j in 0..block_size.min(in_channel.len()) {
                        output[out_idx][j] += in_channel[j] * gain as f64;
                    }
                }
                continue;
            }

            let mix_increment = 1.0 / block_size.max(1) as f64;
            if let Some(previous_map) = gains.previous.get(&source_id).cloned() {
                for (&out_idx, &gain) in &previous_map {
                    if out_idx >= output.len() {
                        continue;
                    }
                    for j in 0..block_size.min(in_channel.len()) {
                        let mix = 1.0 - mix_increment * j as f64;
                        output[out_idx][j] += in_channel[j] * gain as f64 * mix;
                    }
                }
            }
            for (&out_idx, &gain) in &source_map {
                if out_idx >= output.len() {
                    continue;
                }
                for j in 0..block_size.min(in_channel.len()) {
                    let mix = mix_increment * j as f64;
                    output[out_idx][j] += in_channel[j] * gain as f64 * mix;
                }
            }
            gains.previous.insert(source_id, source_map);
            gains.dirty.insert(source_id, false);
        }
        drop(gains);

        self.update_peak_telemetry(input, output, block_size);
    }

    fn update_peak_telemetry(&mut self, input: &[&[f64]], output: &[Vec<f64>], block_size: usize) {
        if output.len() > self.speaker_amps.len() {
            self.speaker_amps.resize(output.len(), 0.0);
        }
        for (i, channel) in output.iter().enumerate() {
            let peak = channel[..block_size.min(channel.len())]
                .iter()
                .fold(0.0_f64, |acc, v| acc.max(v.abs()));
            self.speaker_amps[i] = peak as f32;
        }
        if input.len() > self.grain_amps.len() {
            self.grain_amps.resize(input.len(), 0.0);
        }
        for (i, channel) in input.iter().enumerate() {
            let peak = channel[..block_size.min(channel.len())]
                .iter()
                .fold(0.0_f64, |acc, v| acc.max(v.abs()));
            self.grain_amps[i] = peak as f32;
        }
    }

    pub fn speaker_peaks(&self) -> &[f32] {
        &self.speaker_amps
    }

    pub fn grain_peaks(&self) -> &[f32] {
        &self.grain_amps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dbap_keeps_only_speakers_within_threshold() {
        let mut spat = SpatPanner::new(SpatMode::Dbap);
        spat.distance_thresh = 5.0;
        spat.n_speakers = 4;
        spat.set_speaker_position(0, [0.0, 0.0, 0.0]);
        spat.set_speaker_position(1, [10.0, 0.0, 0.0]);
        spat.set_source_position(0, [1.0, 0.0, 0.0]);

        let gains = spat.gains.lock().unwrap();
        let map = gains.current.get(&0).unwrap();
        assert!(map.contains_key(&0));
        assert!(!map.contains_key(&1));
    }

    #[test]
    fn vbap_distributes_more_gain_to_closer_speaker() {
        let mut spat = SpatPanner::new(SpatMode::Vbap);
        spat.distance_thresh = 100.0;
        spat.n_speakers = 2;
        spat.set_speaker_position(0, [0.0, 0.0, 0.0]);
        spat.set_speaker_position(1, [10.0, 0.0, 0.0]);
        spat.set_source_position(0, [1.0, 0.0, 0.0]);

        let gains = spat.gains.lock().unwrap();
        let map = gains.current.get(&0).unwrap();
        assert!(map[&0] > map[&1]);
    }

    #[test]
    fn dim_mask_suppresses_an_axis() {
        let mut spat = SpatPanner::new(SpatMode::Dbap);
        spat.distance_thresh = 100.0;
        spat.dim_mask = [0.0, 1.0, 1.0];
        spat.set_speaker_position(0, [50.0, 0.0, 0.0]);
        spat.set_source_position(0, [0.0, 0.0, 0.0]);

        let gains = spat.gains.lock().unwrap();
        let map = gains.current.get(&0).unwrap();
        assert!((map[&0] - 1.0).abs() < 1e-4, "masked axis should not affect distance");
    }

    #[test]
    fn process_adds_gained_input_into_output() {
        let mut spat = SpatPanner::new(SpatMode::Vbap);
        spat.distance_thresh = 100.0;
        spat.set_speaker_position(0, [0.0, 0.0, 0.0]);
        spat.set_source_position(0, [0.0, 0.0, 0.0]);
        spat.recalculate_all_gains(true);

        let input_ch0 = vec![1.0; 8];
        let mut output = vec![vec![0.0; 8]; 1];
        spat.process(&[&input_ch0], &mut output, 8);
        assert!(output[0].iter().sum::<f64>() > 0.0);
    }
}
