//! Parameter records, the closed parameter-name enumeration, and name
//! reflection for the grain voice and collection.

use crate::utils::{gf_mod, pitch_offset_to_rate_offset, pitch_to_rate, Xorshift32};

/// The closed set of per-voice parameters. `Transpose`, `GlissonSt` and
/// `Stream` from the reflection table are virtual: they never appear here,
/// they are resolved to one of these variants (or, for `Stream`, to a
/// separate routing call) before dispatch. See [`transform`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParamName {
    Delay,
    Rate,
    Glisson,
    GlissonRows,
    GlissonPosition,
    Window,
    Amplitude,
    Space,
    EnvelopePosition,
    NEnvelopes,
    Direction,
    StartPoint,
    StopPoint,
    RateQuantizeSemi,
    LoopMode,
    Channel,
    Density,
    VibratoRate,
    VibratoDepth,
}

/// Which field of a [`Param`] a control-path write targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParamType {
    Base,
    Random,
    Offset,
    Mode,
    Value,
}

/// How an auxiliary control buffer (if any) overrides a parameter's value
/// on grain reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BufferMode {
    #[default]
    Normal,
    BufferSequence,
    BufferRandom,
}

/// Selects the distribution of the random term when sampling a [`Param`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RandomSign {
    /// `random * uniform[0, 1)` — the default sampling policy (§3).
    Positive,
    /// `random * -uniform[0, 1)`.
    Negative,
    /// `random * uniform[-1, 1)`.
    Bipolar,
}

/// `{base, random, offset, value, mode}` — the sampled-and-materialized
/// record backing every voice parameter (§3).
#[derive(Clone, Copy, Debug, Default)]
pub struct Param {
    pub base: f64,
    pub random: f64,
    pub offset: f64,
    pub value: f64,
    pub mode: BufferMode,
}

impl Param {
    /// Convenience constructor for a parameter with only a constant base
    /// value (no randomization or per-voice offset).
    pub fn constant(base: f64) -> Self {
        Self {
            base,
            ..Default::default()
        }
    }

    /// `value = base + offset*voice_index + sign(random_term) * random`,
    /// with the random term drawn from `rng` per `sign`.
    pub fn sample_signed(&mut self, voice_index: usize, rng: &mut Xorshift32, sign: RandomSign) -> f64 {
        let u = rng.next_unit() as f64;
        let signed = match sign {
            RandomSign::Positive => u,
            RandomSign::Negative => -u,
            RandomSign::Bipolar => u * 2.0 - 1.0,
        };
        self.value = self.base + self.offset * voice_index as f64 + signed * self.random;
        self.value
    }

    /// Samples using the default (positive/unsigned) random distribution.
    pub fn sample(&mut self, voice_index: usize, rng: &mut Xorshift32) -> f64 {
        self.sample_signed(voice_index, rng, RandomSign::Positive)
    }

    /// Samples, then wraps the result modulo `range`.
    pub fn sample_normalized(&mut self, voice_index: usize, rng: &mut Xorshift32, range: f64) -> f64 {
        let sampled = self.sample(voice_index, rng);
        self.value = if range > 0.0 { gf_mod(sampled, range) } else { sampled };
        self.value
    }

    /// Writes one field of this parameter, used by control-path `param_set`.
    pub fn set_field(&mut self, ty: ParamType, value: f64) {
        match ty {
            ParamType::Base => self.base = value,
            ParamType::Random => self.random = value,
            ParamType::Offset => self.offset = value,
            ParamType::Value => self.value = value,
            ParamType::Mode => {
                self.mode = match value as i32 {
                    1 => BufferMode::BufferSequence,
                    2 => BufferMode::BufferRandom,
                    _ => BufferMode::Normal,
                }
            }
        }
    }

    /// Reads one field of this parameter, used by control-path `param_get`.
    pub fn get_field(&self, ty: ParamType) -> f64 {
        match ty {
            ParamType::Base => self.base,
            ParamType::Random => self.random,
            ParamType::Offset => self.offset,
            ParamType::Value => self.value,
            ParamType::Mode => match self.mode {
                BufferMode::Normal => 0.0,
                BufferMode::BufferSequence => 1.0,
                BufferMode::BufferRandom => 2.0,
            },
        }
    }
}

/// Marks whether a reflected name was one of the two virtual names that
/// need a unit conversion before reaching a `Param` field (§4.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Virtual {
    None,
    Transpose,
    GlissonSt,
}

/// Result of parsing a reflection-table name string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reflected {
    Param(ParamName, ParamType, Virtual),
    /// The `nEnvelopes` virtual name, always `value` type.
    NEnvelopes,
    /// The `stream` virtual name: routes to stream assignment, not a `Param`.
    Stream,
}

/// Parses a reflection-table name of the form `<param>[Random|Offset|Mode]`
/// against the name list in §6. Returns `None` if the base name is not
/// recognized (surfaced to callers as `ReturnCode::ParamNotFound`).
pub fn reflect(name: &str) -> Option<Reflected> {
    const SUFFIXES: [(&str, ParamType); 3] = [
        ("Random", ParamType::Random),
        ("Offset", ParamType::Offset),
        ("Mode", ParamType::Mode),
    ];

    let (base, ty) = SUFFIXES
        .iter()
        .find_map(|(suffix, ty)| name.strip_suffix(suffix).map(|base| (base, *ty)))
        .unwrap_or((name, ParamType::Base));

    if base == "nEnvelopes" {
        return Some(Reflected::NEnvelopes);
    }
    if base == "stream" {
        return Some(Reflected::Stream);
    }

    let param_name = match base {
        "delay" => ParamName::Delay,
        "rate" => ParamName::Rate,
        "window" => ParamName::Window,
        "amp" => ParamName::Amplitude,
        "space" => ParamName::Space,
        "envelopePosition" => ParamName::EnvelopePosition,
        "direction" => ParamName::Direction,
        "startPoint" => ParamName::StartPoint,
        "stopPoint" => ParamName::StopPoint,
        "rateQuantizeSemi" => ParamName::RateQuantizeSemi,
        "loopMode" => ParamName::LoopMode,
        "channel" => ParamName::Channel,
        "density" => ParamName::Density,
        "vibratoDepth" => ParamName::VibratoDepth,
        "vibratoRate" => ParamName::VibratoRate,
        // Virtual names resolved by `transform` before dispatch; reflection
        // still needs to route them somewhere, so they parse to the
        // parameter they will become.
        "transpose" => ParamName::Rate,
        "glissonSt" => ParamName::Glisson,
        _ => return None,
    };
    let virt = match base {
        "transpose" => Virtual::Transpose,
        "glissonSt" => Virtual::GlissonSt,
        _ => Virtual::None,
    };
    Some(Reflected::Param(param_name, ty, virt))
}

/// Applies the transform pass §4.2 requires before a value reaches a
/// `Param`'s field: `transpose -> rate` (semitone to ratio conversion),
/// `glisson_st -> glisson` (semitone-offset to ratio-offset), and the
/// amplitude modulation-depth clamp for non-`base` types.
pub fn transform(name: ParamName, ty: ParamType, value: f64, virt: Virtual) -> f64 {
    match virt {
        Virtual::Transpose => {
            return if ty == ParamType::Base {
                pitch_to_rate(value)
            } else {
                pitch_offset_to_rate_offset(value)
            };
        }
        Virtual::GlissonSt => return pitch_offset_to_rate_offset(value),
        Virtual::None => {}
    }
    if name == ParamName::Amplitude && ty != ParamType::Base {
        // Non-base amplitude writes carry a modulation-depth interpretation:
        // clamp to [-1, 0]. See SPEC_FULL.md / DESIGN.md for the explicit
        // contract (§9's third open question).
        return (-value).min(0.0).max(-1.0);
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflect_recognizes_base_and_suffixed_names() {
        assert_eq!(
            reflect("delay"),
            Some(Reflected::Param(ParamName::Delay, ParamType::Base, Virtual::None))
        );
        assert_eq!(
            reflect("delayRandom"),
            Some(Reflected::Param(ParamName::Delay, ParamType::Random, Virtual::None))
        );
        assert_eq!(
            reflect("rateQuantizeSemiOffset"),
            Some(Reflected::Param(
                ParamName::RateQuantizeSemi,
                ParamType::Offset,
                Virtual::None
            ))
        );
        assert_eq!(reflect("nEnvelopes"), Some(Reflected::NEnvelopes));
        assert_eq!(reflect("stream"), Some(Reflected::Stream));
        assert_eq!(reflect("bogus"), None);
    }

    #[test]
    fn reflect_is_injective_over_recognized_names() {
        let names = [
            "delay", "delayRandom", "delayOffset", "delayMode", "rate", "window", "amp", "space",
            "envelopePosition", "direction", "startPoint", "stopPoint", "rateQuantizeSemi",
            "loopMode", "channel", "density", "vibratoDepth", "vibratoRate",
        ];
        let mut seen = std::collections::HashSet::new();
        for n in names {
            let r = reflect(n).unwrap();
            assert!(seen.insert(format!("{r:?}")), "duplicate mapping for {n}");
        }
    }

    #[test]
    fn sample_applies_offset_per_voice() {
        let mut rng = Xorshift32::new(1);
        let mut p = Param {
            base: 1.0,
            random: 0.0,
            offset: 0.5,
            ..Default::default()
        };
        assert!((p.sample(0, &mut rng) - 1.0).abs() < 1e-9);
        assert!((p.sample(2, &mut rng) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn amplitude_clamp_for_non_base_types() {
        assert_eq!(
            transform(ParamName::Amplitude, ParamType::Random, 0.3, Virtual::None),
            -0.3
        );
        assert_eq!(
            transform(ParamName::Amplitude, ParamType::Random, -2.0, Virtual::None),
            -1.0
        );
        assert_eq!(
            transform(ParamName::Amplitude, ParamType::Base, 0.7, Virtual::None),
            0.7
        );
    }
}
