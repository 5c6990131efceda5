//! Scalar math helpers shared by the grain voice, panner and spat panner,
//! plus the per-voice deterministic PRNG.
//!
//! These mirror the small set of free functions the original engine calls
//! `gf_utils::*`. None of them allocate and all are safe to call from the
//! audio thread.

/// Euclidean modulo: always returns a value in `[0, m)` for `m > 0`.
pub fn gf_mod(a: f64, b: f64) -> f64 {
    a - b * (a / b).floor()
}

/// Linear interpolation between `lower` and `upper` at fractional `position`.
pub fn lerp(lower: f64, upper: f64, position: f64) -> f64 {
    lower * (1.0 - position) + upper * position
}

/// Converts a pitch offset in semitones to a playback-rate ratio.
pub fn pitch_to_rate(semitones: f64) -> f64 {
    2.0_f64.powf(semitones / 12.0)
}

/// Inverse of [`pitch_to_rate`].
pub fn rate_to_pitch(rate: f64) -> f64 {
    12.0 * rate.log2()
}

/// Converts a *rate offset* (a delta applied multiplicatively around 1.0) to
/// the equivalent pitch offset in semitones.
pub fn rate_offset_to_pitch_offset(rate_offset: f64) -> f64 {
    rate_to_pitch(1.0 + rate_offset)
}

/// Inverse of [`rate_offset_to_pitch_offset`].
pub fn pitch_offset_to_rate_offset(pitch_offset: f64) -> f64 {
    pitch_to_rate(pitch_offset) - 1.0
}

/// Euclidean distance between two (optionally dimension-masked) 3-vectors.
pub fn distance_3d(a: [f32; 3], b: [f32; 3]) -> f32 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// Uniform draw in `[lower, upper)`.
pub fn random_range(rng: &mut Xorshift32, lower: f32, upper: f32) -> f32 {
    lower + rng.next_unit() * (upper - lower)
}

/// Uniform draw in `[center - range, center + range)`.
pub fn deviate(rng: &mut Xorshift32, center: f32, range: f32) -> f32 {
    center + (rng.next_unit() * 2.0 - 1.0) * range
}

/// Reflects or wraps `x` into `[a, b]`.
///
/// When `fold` is true, `x` is triangle-wave reflected off the boundaries
/// (glass bounces back rather than teleporting); otherwise it wraps modulo
/// the range width. Idempotent once `x` already lies in `[a, b]`, matching
/// `pong(pong(x, a, b, fold), a, b, fold) == pong(x, a, b, fold)`.
pub fn pong(x: f64, a: f64, b: f64, fold: bool) -> f64 {
    if a >= b {
        return a;
    }
    let range = b - a;
    if fold {
        let period = 2.0 * range;
        let m = gf_mod(x - a, period);
        a + if m > range { period - m } else { m }
    } else {
        a + gf_mod(x - a, range)
    }
}

/// Rounds `x` to the nearest multiple of `quantum`. A non-positive `quantum`
/// is treated as "no quantization" and returns `x` unchanged.
pub fn round_to(x: f64, quantum: f64) -> f64 {
    if quantum <= 0.0 {
        x
    } else {
        (x / quantum).round() * quantum
    }
}

/// A minimal xorshift32 PRNG, seeded once per voice at construction.
///
/// Substitutes the hardware-entropy source the original engine reads on
/// every stochastic parameter sample; seeding once removes an unbounded
/// system call from the audio thread.
pub struct Xorshift32 {
    state: u32,
}

impl Xorshift32 {
    /// Seeds the generator. `seed` must be non-zero; zero is mapped to a
    /// fixed non-zero fallback since xorshift cannot recover from a zero
    /// state.
    pub fn new(seed: u32) -> Self {
        Self {
            state: if seed == 0 { 0x9E3779B9 } else { seed },
        }
    }

    fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    /// Uniform draw in `[0, 1)`.
    pub fn next_unit(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 / (1u32 << 24) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(5.0, 3.0, 2.0)]
    #[test_case(-1.0, 3.0, 2.0)]
    #[test_case(-4.0, 3.0, 2.0)]
    fn mod_is_in_range(x: f64, m: f64, _unused: f64) {
        let r = gf_mod(x, m);
        assert!(r >= 0.0 && r < m);
        assert!((gf_mod(r, m) - r).abs() < 1e-9);
    }

    #[test]
    fn pitch_rate_round_trip() {
        for r in [0.25, 0.5, 1.0, 2.0, 4.0, 16.0] {
            let back = pitch_to_rate(rate_to_pitch(r));
            assert!((back - r).abs() < 1e-6, "{r} -> {back}");
        }
    }

    #[test]
    fn pitch_offset_round_trip() {
        for x in [-0.5, -0.1, 0.0, 0.3, 1.0] {
            let back = pitch_offset_to_rate_offset(rate_offset_to_pitch_offset(x));
            assert!((back - x).abs() < 1e-6, "{x} -> {back}");
        }
    }

    #[test]
    fn pong_idempotent() {
        for fold in [true, false] {
            for x in [-5.0, -0.5, 0.0, 0.3, 1.7, 10.25] {
                let once = pong(x, 0.0, 1.0, fold);
                let twice = pong(once, 0.0, 1.0, fold);
                assert!((once - twice).abs() < 1e-9, "fold={fold} x={x}");
                assert!(once >= 0.0 && once <= 1.0);
            }
        }
    }

    #[test]
    fn xorshift_is_deterministic_and_bounded() {
        let mut a = Xorshift32::new(42);
        let mut b = Xorshift32::new(42);
        for _ in 0..100 {
            let va = a.next_unit();
            let vb = b.next_unit();
            assert_eq!(va.to_bits(), vb.to_bits());
            assert!((0.0..1.0).contains(&va));
        }
    }
}
