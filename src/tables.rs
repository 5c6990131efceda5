//! Process-wide constant lookup tables: a 1024-sample Hann window (the
//! default grain envelope) and a 4096-sample quarter sine wave (used by the
//! panner's equal-power crossfade). Both are built once and shared freely
//! across voices, matching §9's "Global mutable state" note — these tables
//! are immutable after construction.

use once_cell::sync::Lazy;
use std::f64::consts::PI;

const HANN_LEN: usize = 1024;
const QUARTER_SINE_LEN: usize = 4096;

/// 1024-sample Hann window, `w[n] = 0.5*(1 - cos(2*pi*n/(N-1)))`.
pub static HANN_WINDOW: Lazy<[f64; HANN_LEN]> = Lazy::new(|| {
    let mut table = [0.0; HANN_LEN];
    for (n, slot) in table.iter_mut().enumerate() {
        *slot = 0.5 * (1.0 - (2.0 * PI * n as f64 / (HANN_LEN - 1) as f64).cos());
    }
    table
});

/// 4096-entry quarter sine wave covering `sin(t * pi/2)` for `t in [0, 1]`,
/// used as the equal-power crossfade curve.
pub static QUARTER_SINE: Lazy<[f64; QUARTER_SINE_LEN]> = Lazy::new(|| {
    let mut table = [0.0; QUARTER_SINE_LEN];
    for (n, slot) in table.iter_mut().enumerate() {
        *slot = (n as f64 / (QUARTER_SINE_LEN - 1) as f64 * PI / 2.0).sin();
    }
    table
});

/// Looks up the default Hann envelope at normalized position `t in [0, 1]`.
pub fn hann_lookup(t: f64) -> f64 {
    let frame = ((t * HANN_LEN as f64).min((HANN_LEN - 1) as f64)).max(0.0) as usize;
    HANN_WINDOW[frame]
}

/// Looks up the quarter sine table at normalized position `t in [0, 1]`.
pub fn quarter_sine_lookup(t: f64) -> f64 {
    let index = ((t * (QUARTER_SINE_LEN - 1) as f64).round())
        .clamp(0.0, (QUARTER_SINE_LEN - 1) as f64) as usize;
    QUARTER_SINE[index]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hann_window_is_zero_at_edges_and_one_in_middle() {
        assert!(HANN_WINDOW[0] < 1e-6);
        assert!(HANN_WINDOW[HANN_LEN - 1] < 1e-6);
        assert!(HANN_WINDOW[HANN_LEN / 2] > 0.99);
    }

    #[test]
    fn quarter_sine_is_monotonic_and_bounded() {
        assert!((quarter_sine_lookup(0.0) - 0.0).abs() < 1e-6);
        assert!((quarter_sine_lookup(1.0) - 1.0).abs() < 1e-6);
        let mut prev = -1.0;
        for i in 0..=10 {
            let v = quarter_sine_lookup(i as f64 / 10.0);
            assert!(v >= prev);
            prev = v;
        }
    }
}
