//! Channel-count tag for the WAV fixture helpers in [`crate`].

/// Whether a sample vector is interleaved stereo or single-channel.
#[derive(Default)]
pub enum PhonicMode {
    #[default]
    /// Stereophonic (2 channels), interleaved L/R.
    Stereo,
    /// Monophonic (1 channel).
    Mono,
}
