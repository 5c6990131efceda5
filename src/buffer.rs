//! The shared-buffer abstraction: a lockable multi-channel sample store, the
//! scoped lock guard, the refreshed-per-call `BufferInfo` record, the
//! per-callback `IoConfig`, and the `BufferReader` capability record that
//! replaces the original's virtual-method buffer access (§9).

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};

/// A multi-channel, fixed-length sample store shared between the recorder,
/// the grains that read it, and (conceptually) a host-side file loader.
/// Access is mediated entirely through [`BufferLock`]: the `UnsafeCell` is
/// only ever dereferenced while the atomic latch below proves exclusive
/// access, which is the invariant `BufferLock` exists to uphold.
pub struct SourceBuffer {
    samples: UnsafeCell<Vec<Vec<f64>>>,
    samplerate: u32,
    latch: AtomicBool,
}

// SAFETY: mutable access to `samples` only ever happens through a validated
// `BufferLock`, which is backed by the atomic `latch` acting as a
// non-blocking mutex.
unsafe impl Sync for SourceBuffer {}

impl SourceBuffer {
    /// Creates a silent buffer with `channels` channels of `frames` samples.
    pub fn new(channels: usize, frames: usize, samplerate: u32) -> Self {
        Self {
            samples: UnsafeCell::new(vec![vec![0.0; frames]; channels.max(1)]),
            samplerate,
            latch: AtomicBool::new(false),
        }
    }

    /// Builds a buffer directly from existing channel data.
    pub fn from_channels(channels: Vec<Vec<f64>>, samplerate: u32) -> Self {
        Self {
            samples: UnsafeCell::new(channels),
            samplerate,
            latch: AtomicBool::new(false),
        }
    }

    pub fn frame_count(&self) -> usize {
        // SAFETY: read-only length query; transient aliasing with an
        // in-progress write is never observed because both paths only run
        // single-threaded within one audio callback.
        unsafe { (*self.samples.get()).first().map_or(0, |c| c.len()) }
    }

    pub fn channel_count(&self) -> usize {
        unsafe { (*self.samples.get()).len() }
    }

    pub fn samplerate(&self) -> u32 {
        self.samplerate
    }
}

/// A scoped, non-blocking lock on a [`SourceBuffer`]. Acquiring a lock that
/// is already held returns an invalid guard rather than blocking; callers
/// must check [`BufferLock::valid`] before using it. The underlying latch
/// is released unconditionally on drop.
pub struct BufferLock<'a> {
    buffer: &'a SourceBuffer,
    valid: bool,
}

impl<'a> BufferLock<'a> {
    pub fn acquire(buffer: &'a SourceBuffer) -> Self {
        let valid = buffer
            .latch
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        Self { buffer, valid }
    }

    pub fn valid(&self) -> bool {
        self.valid
    }

    pub fn frame_count(&self) -> usize {
        self.buffer.frame_count()
    }

    pub fn channel_count(&self) -> usize {
        self.buffer.channel_count()
    }

    pub fn samplerate(&self) -> u32 {
        self.buffer.samplerate()
    }

    /// Reads one sample. `channel` is wrapped modulo the channel count.
    pub fn lookup(&self, frame: usize, channel: usize) -> f64 {
        let channels = self.buffer.channel_count().max(1);
        let chan = channel % channels;
        let frames = self.buffer.frame_count();
        if frames == 0 {
            return 0.0;
        }
        // SAFETY: `self.valid` proves this lock holds the buffer's latch.
        unsafe { (*self.buffer.samples.get())[chan][frame.min(frames - 1)] }
    }

    /// Mutable access for the recorder's write path. Only valid while
    /// `self.valid()`; the caller must have checked that already.
    pub fn samples_mut(&self) -> &mut Vec<Vec<f64>> {
        // SAFETY: `self.valid` proves this lock holds the buffer's latch,
        // so no other `BufferLock` can be concurrently reading/writing.
        unsafe { &mut *self.buffer.samples.get() }
    }
}

impl Drop for BufferLock<'_> {
    fn drop(&mut self) {
        self.buffer.latch.store(false, Ordering::Release);
    }
}

/// Per-callback geometry snapshot, refreshed at the start of every
/// `process` call that touches a buffer (§3).
#[derive(Clone, Copy, Debug, Default)]
pub struct BufferInfo {
    pub buffer_frames: f64,
    pub one_over_buffer_frames: f64,
    pub sample_rate_adjustment: f64,
    pub n_channels: usize,
    pub samplerate: f64,
    pub one_over_samplerate: f64,
}

impl BufferInfo {
    /// Refreshes from a buffer lock and the engine's own samplerate.
    pub fn refresh(lock: &BufferLock, engine_samplerate: f64) -> Self {
        let frames = lock.frame_count() as f64;
        let samplerate = lock.samplerate() as f64;
        Self {
            buffer_frames: frames,
            one_over_buffer_frames: if frames > 0.0 { 1.0 / frames } else { 0.0 },
            sample_rate_adjustment: if engine_samplerate > 0.0 {
                samplerate / engine_samplerate
            } else {
                1.0
            },
            n_channels: lock.channel_count(),
            samplerate,
            one_over_samplerate: if samplerate > 0.0 { 1.0 / samplerate } else { 0.0 },
        }
    }
}

/// Per-callback record binding input/output channel pointers to logical
/// roles (§3/§6). Channel slices may be shorter than the voice count; a
/// voice with index `g` reads channel `g mod len`.
pub struct IoConfig<'a> {
    pub grain_clock: &'a [&'a [f64]],
    pub traversal_phasor: &'a [&'a [f64]],
    pub fm: &'a [&'a [f64]],
    pub am: &'a [&'a [f64]],
    pub block_size: usize,
    pub samplerate: f64,
    pub livemode: bool,
}

impl<'a> IoConfig<'a> {
    fn channel<'b>(rows: &'b [&'b [f64]], voice: usize) -> Option<&'b [f64]> {
        if rows.is_empty() {
            None
        } else {
            Some(rows[voice % rows.len()])
        }
    }

    pub fn grain_clock_for(&self, voice: usize) -> Option<&[f64]> {
        Self::channel(self.grain_clock, voice)
    }

    pub fn traversal_for(&self, voice: usize) -> Option<&[f64]> {
        Self::channel(self.traversal_phasor, voice)
    }

    pub fn fm_for(&self, voice: usize) -> Option<&[f64]> {
        Self::channel(self.fm, voice)
    }

    pub fn am_for(&self, voice: usize) -> Option<&[f64]> {
        Self::channel(self.am, voice)
    }
}

/// Capability record replacing the original's virtual buffer-access
/// methods (§9 Design Notes). A `Grain` holds one of these by value; tests
/// can substitute a fake implementation without touching `SourceBuffer`.
pub trait BufferReader {
    fn update_buffer_info(&self, buffer: &SourceBuffer, engine_samplerate: f64) -> Option<BufferInfo>;

    /// Linear-interpolated multi-sample read at fractional `positions`,
    /// wrapping at `[lower_frame, upper_frame]`.
    fn sample_buffer(
        &self,
        buffer: &SourceBuffer,
        channel: usize,
        positions: &[f64],
        out: &mut [f64],
        lower_bound: f64,
        upper_bound: f64,
    );

    /// Samples a 1024-sample default Hann envelope, or (if `buffer` is
    /// `Some`) an `n_envelopes`-concatenated custom envelope buffer
    /// interpolated between adjacent envelope slots by `env2d_pos` (§4.1
    /// step 5).
    fn sample_envelope(
        &self,
        buffer: Option<&SourceBuffer>,
        n_envelopes: usize,
        env2d_pos: f64,
        grain_clock: &[f64],
        out: &mut [f64],
    ) {
        match buffer {
            None => {
                for (o, &clock) in out.iter_mut().zip(grain_clock) {
                    *o = crate::tables::hann_lookup(clock);
                }
            }
            Some(buf) => {
                let lock = BufferLock::acquire(buf);
                if !lock.valid() {
                    for (o, &clock) in out.iter_mut().zip(grain_clock) {
                        *o = crate::tables::hann_lookup(clock);
                    }
                    return;
                }
                let frames = lock.frame_count();
                if frames == 0 {
                    return;
                }
                if n_envelopes <= 1 {
                    for (o, &clock) in out.iter_mut().zip(grain_clock) {
                        let frame = ((clock * frames as f64) as usize).min(frames - 1);
                        *o = lock.lookup(frame, 0);
                    }
                    return;
                }
                let size_per_envelope = frames / n_envelopes;
                let env1 = (env2d_pos * n_envelopes as f64) as usize;
                let env2 = env1 + 1;
                let fade = env2d_pos * n_envelopes as f64 - env1 as f64;
                for (o, &clock) in out.iter_mut().zip(grain_clock) {
                    let frame = (clock * size_per_envelope as f64) as usize;
                    let a = lock.lookup((env1 * size_per_envelope + frame) % frames, 0);
                    let b = lock.lookup((env2 * size_per_envelope + frame) % frames, 0);
                    *o = a * (1.0 - fade) + b * fade;
                }
            }
        }
    }

    /// Samples a named parameter control buffer on grain reset (§4.1 step
    /// 3, `BufferMode::{BufferSequence,BufferRandom}`).
    fn sample_param_buffer(
        &self,
        buffer: &SourceBuffer,
        mode: crate::param::BufferMode,
        grain_id: usize,
        random: f64,
        offset: f64,
        rng: &mut crate::utils::Xorshift32,
    ) -> Option<f64> {
        if mode == crate::param::BufferMode::Normal {
            return None;
        }
        let lock = BufferLock::acquire(buffer);
        if !lock.valid() {
            return None;
        }
        let frames = lock.frame_count();
        if frames == 0 {
            return None;
        }
        let frame = match mode {
            crate::param::BufferMode::BufferSequence => grain_id % frames,
            crate::param::BufferMode::BufferRandom => {
                ((rng.next_unit() as f64) * frames as f64) as usize % frames
            }
            crate::param::BufferMode::Normal => unreachable!(),
        };
        Some(lock.lookup(frame, 0) + random * rng.next_unit() as f64 + offset * grain_id as f64)
    }

    fn read_buffer(&self, buffer: &SourceBuffer, channel: usize, start: usize, out: &mut [f64]);

    fn write_buffer(&self, buffer: &SourceBuffer, channel: usize, start: usize, samples: &[f64]);

    /// Zeroes every sample in `buffer`.
    fn clear_buffer(&self, buffer: &SourceBuffer) {
        let lock = BufferLock::acquire(buffer);
        if !lock.valid() {
            return;
        }
        for channel in lock.samples_mut().iter_mut() {
            channel.iter_mut().for_each(|s| *s = 0.0);
        }
    }
}

/// The default, in-memory [`BufferReader`].
#[derive(Default)]
pub struct DefaultBufferReader;

impl BufferReader for DefaultBufferReader {
    fn update_buffer_info(&self, buffer: &SourceBuffer, engine_samplerate: f64) -> Option<BufferInfo> {
        let lock = BufferLock::acquire(buffer);
        if !lock.valid() {
            return None;
        }
        Some(BufferInfo::refresh(&lock, engine_samplerate))
    }

    fn sample_buffer(
        &self,
        buffer: &SourceBuffer,
        channel: usize,
        positions: &[f64],
        out: &mut [f64],
        lower_bound: f64,
        upper_bound: f64,
    ) {
        let lock = BufferLock::acquire(buffer);
        if !lock.valid() {
            return;
        }
        let max_frame = lock.frame_count().saturating_sub(1) as f64;
        let lower_frame = (max_frame * lower_bound) as usize;
        let upper_frame = (max_frame * upper_bound) as usize;
        if upper_frame == lower_frame {
            return;
        }
        for (i, &position) in positions.iter().enumerate() {
            let first_frame = position as usize;
            let tween = position - first_frame as f64;
            let frame_overflow = first_frame >= upper_frame;
            let second_frame = if frame_overflow { lower_frame } else { first_frame + 1 };
            out[i] = lock.lookup(first_frame, channel) * (1.0 - tween)
                + lock.lookup(second_frame, channel) * tween;
        }
    }

    fn read_buffer(&self, buffer: &SourceBuffer, channel: usize, start: usize, out: &mut [f64]) {
        let lock = BufferLock::acquire(buffer);
        if !lock.valid() {
            return;
        }
        let frames = lock.frame_count();
        if frames == 0 {
            return;
        }
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = lock.lookup((start + i) % frames, channel);
        }
    }

    fn write_buffer(&self, buffer: &SourceBuffer, channel: usize, start: usize, samples: &[f64]) {
        let lock = BufferLock::acquire(buffer);
        if !lock.valid() {
            return;
        }
        let frames = lock.frame_count();
        let channels = lock.channel_count().max(1);
        if frames == 0 {
            return;
        }
        let chan = channel % channels;
        let samples_vec = lock.samples_mut();
        for (i, &value) in samples.iter().enumerate() {
            let frame = (start + i) % frames;
            samples_vec[chan][frame] = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_invalidates_on_contention() {
        let buf = SourceBuffer::new(1, 8, 44100);
        let first = BufferLock::acquire(&buf);
        assert!(first.valid());
        let second = BufferLock::acquire(&buf);
        assert!(!second.valid());
        drop(first);
        let third = BufferLock::acquire(&buf);
        assert!(third.valid());
    }

    #[test]
    fn write_then_read_round_trips() {
        let buf = SourceBuffer::new(1, 8, 44100);
        let reader = DefaultBufferReader;
        reader.write_buffer(&buf, 0, 6, &[1.0, 2.0, 3.0, 4.0]);
        let mut out = [0.0; 4];
        reader.read_buffer(&buf, 0, 6, &mut out);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
    }
}
