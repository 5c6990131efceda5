//! The grain collection (§4.2): a fixed-capacity ordered vector of voices,
//! plus the routing logic (parameter reflection, stream/channel addressing,
//! active-count + auto-overlap) that sits on top of them.

use std::sync::Arc;

use crate::buffer::{IoConfig, SourceBuffer};
use crate::error::ReturnCode;
use crate::grain::{Grain, VoiceOutputs};
use crate::param::{reflect, transform, ParamName, ParamType, Reflected, Virtual};

/// One of the six buffer roles a voice may bind (§6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferRole {
    Source,
    Envelope,
    RateCtl,
    DelayCtl,
    WindowCtl,
    GlissonCtl,
}

/// Parses a buffer role reflection string (§6).
pub fn reflect_buffer_role(name: &str) -> Option<BufferRole> {
    match name {
        "buf" | "buffer" => Some(BufferRole::Source),
        "env" | "envelope" => Some(BufferRole::Envelope),
        "delay" | "delays" | "delayBuffer" => Some(BufferRole::DelayCtl),
        "window" | "windows" | "windowBuffer" => Some(BufferRole::WindowCtl),
        "glisson" | "glissonBuffer" => Some(BufferRole::GlissonCtl),
        "rate" | "rates" | "rateBuffer" => Some(BufferRole::RateCtl),
        _ => None,
    }
}

/// How [`GrainCollection::stream_set`] assigns stream ids across voices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamSetMode {
    /// `stream[g] = g mod n`.
    Automatic,
    /// `stream[g] = g / n`.
    PerStreams,
    /// Uniform random id in `[0, n)`, reseeded per call.
    Random,
    /// No bulk assignment; single-voice `stream_set(grain, id)` only.
    Manual,
}

/// A fixed-capacity ordered vector of [`Grain`] voices (§4.2).
pub struct GrainCollection {
    grains: Vec<Grain>,
    active_grains: usize,
    n_streams: usize,
    auto_overlap: bool,
    samplerate: u32,
    rng: crate::utils::Xorshift32,
}

impl GrainCollection {
    pub fn new(grain_count: usize, max_block: usize, samplerate: u32) -> Self {
        let mut collection = Self {
            grains: Vec::new(),
            active_grains: 0,
            n_streams: 0,
            auto_overlap: true,
            samplerate,
            rng: crate::utils::Xorshift32::new(0x1234_5678),
        };
        if grain_count > 0 {
            collection.resize(grain_count, max_block);
        }
        collection
    }

    /// Rebuilds the voice vector at `grain_count`, each sized for up to
    /// `max_block` samples per sub-block call. All existing voice state is
    /// discarded (this is a capacity change, not a live reconfiguration).
    pub fn resize(&mut self, grain_count: usize, max_block: usize) {
        self.grains = (0..grain_count).map(|g| Grain::new(g, max_block)).collect();
        self.set_active_grains(grain_count);
    }

    pub fn grains(&self) -> usize {
        self.grains.len()
    }

    pub fn get_grain(&self, index: usize) -> Option<&Grain> {
        self.grains.get(index)
    }

    pub fn get_grain_mut(&mut self, index: usize) -> Option<&mut Grain> {
        self.grains.get_mut(index)
    }

    /// Renders every voice in order into `outputs[g]` (§4.2: "voices are
    /// independent").
    pub fn process(&mut self, io: &IoConfig, voice_sub_block_offset: usize, block_len: usize, outputs: &mut [VoiceOutputs]) {
        for (grain, out) in self.grains.iter_mut().zip(outputs.iter_mut()) {
            grain.process(io, voice_sub_block_offset, block_len, out);
        }
    }

    /// Applies the transform pass (§4.2): `transpose -> rate`,
    /// `glisson_st -> glisson`, and the amplitude modulation-depth clamp.
    /// Mode-typed writes are never transformed.
    fn transform_params(name: ParamName, ty: ParamType, value: f64, virt: Virtual) -> (ParamName, f64) {
        if ty == ParamType::Mode {
            return (name, value);
        }
        (name, transform(name, ty, value, virt))
    }

    /// Addressed parameter write. `target == 0` broadcasts to every voice;
    /// `target in 1..=grains()` addresses `grains()[target-1]`. Out-of-range
    /// targets are silently ignored (§7).
    pub fn param_set(&mut self, target: usize, name: ParamName, ty: ParamType, value: f64) {
        self.param_set_virtual(target, name, ty, value, Virtual::None)
    }

    fn param_set_virtual(&mut self, target: usize, name: ParamName, ty: ParamType, value: f64, virt: Virtual) {
        if target > self.grains.len() {
            return;
        }
        let (name, value) = Self::transform_params(name, ty, value, virt);
        if target == 0 {
            for grain in &mut self.grains {
                grain.param_set(name, ty, value);
            }
            return;
        }
        if let Some(grain) = self.grains.get_mut(target - 1) {
            grain.param_set(name, ty, value);
        }
    }

    /// Addressed write by reflection string (§4.2, §6). `stream` addresses
    /// bypass the transform pass and route to [`Self::stream_set`] instead.
    pub fn param_set_by_name(&mut self, target: usize, reflection: &str, value: f64) -> ReturnCode {
        match reflect(reflection) {
            None => ReturnCode::ParamNotFound,
            Some(Reflected::Stream) => {
                if target < 1 {
                    return ReturnCode::Error;
                }
                self.stream_set_single(target - 1, value as usize);
                ReturnCode::Success
            }
            Some(Reflected::NEnvelopes) => {
                self.param_set(target, ParamName::NEnvelopes, ParamType::Value, value);
                ReturnCode::Success
            }
            Some(Reflected::Param(name, ty, virt)) => {
                self.param_set_virtual(target, name, ty, value, virt);
                ReturnCode::Success
            }
        }
    }

    /// Writes to every voice whose `channel.base == channel` (§4.2).
    pub fn channel_param_set(&mut self, channel: i64, name: ParamName, ty: ParamType, value: f64) {
        let targets: Vec<usize> = self
            .grains
            .iter()
            .enumerate()
            .filter(|(_, g)| g.param_get(ParamName::Channel, ParamType::Base) as i64 == channel)
            .map(|(g, _)| g + 1)
            .collect();
        for target in targets {
            self.param_set(target, name, ty, value);
        }
    }

    pub fn channel_param_set_by_name(&mut self, channel: i64, reflection: &str, value: f64) -> ReturnCode {
        match reflect(reflection) {
            Some(Reflected::Param(name, ty, _)) => {
                self.channel_param_set(channel, name, ty, value);
                ReturnCode::Success
            }
            Some(_) => ReturnCode::Error,
            None => ReturnCode::ParamNotFound,
        }
    }

    /// Evaluates `f(a, b, g/grains())` per voice and assigns the result
    /// (§4.2 "per-grain functional spread").
    pub fn grain_param_func(&mut self, name: ParamName, ty: ParamType, f: impl Fn(f64, f64, f64) -> f64, a: f64, b: f64) {
        let total = self.grains.len();
        if total == 0 {
            return;
        }
        for g in 0..total {
            let value = f(a, b, g as f64 / total as f64);
            // 1-based addressing convention (§9): voice `g` is target `g+1`.
            self.param_set(g + 1, name, ty, value);
        }
    }

    pub fn grain_param_func_by_name(
        &mut self,
        reflection: &str,
        f: impl Fn(f64, f64, f64) -> f64,
        a: f64,
        b: f64,
    ) -> ReturnCode {
        match reflect(reflection) {
            Some(Reflected::Param(name, ty, _)) => {
                self.grain_param_func(name, ty, f, a, b);
                ReturnCode::Success
            }
            Some(_) => ReturnCode::Error,
            None => ReturnCode::ParamNotFound,
        }
    }

    /// Addressed read. `target <= 1` reads voice 0; out-of-range targets
    /// read as `0.0`.
    pub fn param_get(&self, target: usize, name: ParamName, ty: ParamType) -> f64 {
        if target > self.grains.len() {
            return 0.0;
        }
        let index = if target <= 1 { 0 } else { target - 1 };
        self.grains.get(index).map_or(0.0, |g| g.param_get(name, ty))
    }

    /// Enables the first `n` voices; disables the rest. With auto-overlap
    /// on, each enabled voice's `window.offset` is set to `1/n` so windows
    /// stagger evenly (§4.2).
    pub fn set_active_grains(&mut self, n_grains: usize) {
        let total = self.grains.len();
        self.active_grains = n_grains.min(total);
        let window_offset = if self.active_grains > 0 {
            1.0 / self.active_grains as f64
        } else {
            1.0
        };
        for (g, grain) in self.grains.iter_mut().enumerate() {
            grain.set_enabled(g < self.active_grains);
        }
        if self.auto_overlap {
            for target in 1..=self.active_grains {
                self.param_set(target, ParamName::Window, ParamType::Offset, window_offset);
            }
        }
    }

    pub fn active_grains(&self) -> usize {
        self.active_grains
    }

    pub fn set_auto_overlap(&mut self, auto_overlap: bool) {
        self.auto_overlap = auto_overlap;
        self.set_active_grains(self.active_grains);
    }

    pub fn auto_overlap(&self) -> bool {
        self.auto_overlap
    }

    /// Binds `buf` into every voice's `role` slot (`target == 0`), or just
    /// voice `target-1`. Out-of-range targets return [`ReturnCode::Error`].
    pub fn set_buffer(&mut self, role: BufferRole, buf: Arc<SourceBuffer>, target: usize) -> ReturnCode {
        if target == 0 {
            for grain in &mut self.grains {
                Self::bind_buffer(grain.buffers_mut(), role, Some(buf.clone()));
            }
            return ReturnCode::Success;
        }
        if target > self.grains.len() {
            return ReturnCode::Error;
        }
        if let Some(grain) = self.grains.get_mut(target - 1) {
            Self::bind_buffer(grain.buffers_mut(), role, Some(buf));
        }
        ReturnCode::Success
    }

    pub fn set_buffer_by_name(&mut self, reflection: &str, buf: Arc<SourceBuffer>, target: usize) -> ReturnCode {
        match reflect_buffer_role(reflection) {
            Some(role) => self.set_buffer(role, buf, target),
            None => ReturnCode::ParamNotFound,
        }
    }

    fn bind_buffer(buffers: &mut crate::grain::GrainBuffers, role: BufferRole, buf: Option<Arc<SourceBuffer>>) {
        match role {
            BufferRole::Source => buffers.source = buf,
            BufferRole::Envelope => buffers.envelope = buf,
            BufferRole::RateCtl => buffers.rate_ctl = buf,
            BufferRole::DelayCtl => buffers.delay_ctl = buf,
            BufferRole::WindowCtl => buffers.window_ctl = buf,
            BufferRole::GlissonCtl => buffers.glisson_ctl = buf,
        }
    }

    pub fn streams(&self) -> usize {
        self.n_streams
    }

    /// Writes to every voice whose `stream() == stream-1` (§4.2).
    /// `stream == 0` is a no-op (stream 0 means "unassigned", not
    /// "broadcast", unlike voice target 0).
    pub fn stream_param_set(&mut self, stream: usize, name: ParamName, ty: ParamType, value: f64) -> ReturnCode {
        if stream > self.n_streams {
            return ReturnCode::Error;
        }
        if stream == 0 {
            return ReturnCode::Success;
        }
        let targets: Vec<usize> = self
            .grains
            .iter()
            .enumerate()
            .filter(|(_, g)| g.stream() == stream - 1)
            .map(|(g, _)| g + 1)
            .collect();
        for target in targets {
            self.param_set(target, name, ty, value);
        }
        ReturnCode::Success
    }

    pub fn stream_param_set_by_name(&mut self, reflection: &str, stream: usize, value: f64) -> ReturnCode {
        match reflect(reflection) {
            Some(Reflected::Param(name, ty, _)) => self.stream_param_set(stream, name, ty, value),
            Some(_) => ReturnCode::Error,
            None => ReturnCode::ParamNotFound,
        }
    }

    pub fn stream_param_func(
        &mut self,
        name: ParamName,
        ty: ParamType,
        f: impl Fn(f64, f64, f64) -> f64,
        a: f64,
        b: f64,
    ) -> ReturnCode {
        if self.n_streams == 0 {
            return ReturnCode::Success;
        }
        for s in 0..self.n_streams {
            let value = f(a, b, s as f64 / self.n_streams as f64);
            let code = self.stream_param_set(s, name, ty, value);
            if code != ReturnCode::Success {
                return code;
            }
        }
        ReturnCode::Success
    }

    pub fn stream_param_func_by_name(
        &mut self,
        reflection: &str,
        f: impl Fn(f64, f64, f64) -> f64,
        a: f64,
        b: f64,
    ) -> ReturnCode {
        match reflect(reflection) {
            Some(Reflected::Param(name, ty, _)) => self.stream_param_func(name, ty, f, a, b),
            Some(_) => ReturnCode::Error,
            None => ReturnCode::ParamNotFound,
        }
    }

    /// Bulk stream assignment (§4.2). `Manual` leaves existing assignments
    /// untouched (use [`Self::stream_set_single`] instead).
    pub fn stream_set(&mut self, mode: StreamSetMode, n_streams: usize) {
        self.n_streams = n_streams;
        if mode == StreamSetMode::Manual || n_streams == 0 {
            return;
        }
        let total = self.grains.len();
        for (g, grain) in self.grains.iter_mut().enumerate() {
            let stream = match mode {
                StreamSetMode::Automatic => g % n_streams,
                StreamSetMode::PerStreams => g / n_streams.max(1),
                StreamSetMode::Random => (self.rng.next_unit() as f64 * n_streams as f64) as usize % n_streams,
                StreamSetMode::Manual => unreachable!(),
            };
            let _ = total;
            grain.set_stream(stream);
        }
    }

    /// Assigns a single voice's stream id directly, bypassing `stream_set`'s
    /// bulk modes. `grain` is 1-based; out-of-range or non-positive
    /// addresses are ignored (§7).
    pub fn stream_set_single(&mut self, grain: usize, stream_id: usize) {
        if grain == 0 || grain > self.grains.len() {
            return;
        }
        self.grains[grain - 1].set_stream(stream_id);
    }

    pub fn stream_get(&self, grain_index: usize) -> usize {
        self.grains.get(grain_index).map_or(0, |g| g.stream())
    }

    pub fn channel_get(&self, index: usize) -> i64 {
        self.grains.get(index).map_or(0, |g| g.param_get(ParamName::Channel, ParamType::Base) as i64)
    }

    /// Sets `channel.base = g mod channels` for every voice (§4.2).
    pub fn channels_set_interleaved(&mut self, channels: usize) {
        if channels == 0 {
            return;
        }
        let total = self.grains.len();
        for g in 0..total {
            let value = (g % channels) as f64;
            self.param_set(g + 1, ParamName::Channel, ParamType::Base, value);
        }
    }

    pub fn channel_set(&mut self, index: usize, channel: i64) {
        if index >= self.grains.len() {
            return;
        }
        self.param_set(index + 1, ParamName::Channel, ParamType::Base, channel as f64);
    }

    pub fn samplerate(&self) -> u32 {
        self.samplerate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_active_grains_disables_tail_and_stages_windows() {
        let mut collection = GrainCollection::new(4, 64, 48_000);
        collection.set_active_grains(2);
        assert!(collection.get_grain(0).unwrap().enabled());
        assert!(collection.get_grain(1).unwrap().enabled());
        assert!(!collection.get_grain(2).unwrap().enabled());
        assert!(!collection.get_grain(3).unwrap().enabled());
        assert!((collection.param_get(1, ParamName::Window, ParamType::Offset) - 0.5).abs() < 1e-9);
        assert!((collection.param_get(2, ParamName::Window, ParamType::Offset) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn broadcast_target_zero_writes_every_voice() {
        let mut collection = GrainCollection::new(3, 64, 48_000);
        collection.param_set(0, ParamName::Delay, ParamType::Base, 7.0);
        for g in 1..=3 {
            assert!((collection.param_get(g, ParamName::Delay, ParamType::Base) - 7.0).abs() < 1e-9);
        }
    }

    #[test]
    fn reflection_routes_transpose_through_rate_transform() {
        let mut collection = GrainCollection::new(1, 64, 48_000);
        let code = collection.param_set_by_name(1, "transpose", 12.0);
        assert_eq!(code, ReturnCode::Success);
        let rate = collection.param_get(1, ParamName::Rate, ParamType::Base);
        assert!((rate - 2.0).abs() < 1e-6, "rate={rate}");
    }

    #[test]
    fn reflection_reports_param_not_found() {
        let mut collection = GrainCollection::new(1, 64, 48_000);
        assert_eq!(collection.param_set_by_name(1, "bogus", 1.0), ReturnCode::ParamNotFound);
    }

    #[test]
    fn stream_set_automatic_distributes_by_modulo() {
        let mut collection = GrainCollection::new(4, 64, 48_000);
        collection.stream_set(StreamSetMode::Automatic, 2);
        assert_eq!(collection.stream_get(0), 0);
        assert_eq!(collection.stream_get(1), 1);
        assert_eq!(collection.stream_get(2), 0);
        assert_eq!(collection.stream_get(3), 1);
    }

    #[test]
    fn stream_param_set_reaches_only_matching_voices() {
        let mut collection = GrainCollection::new(4, 64, 48_000);
        collection.stream_set(StreamSetMode::Automatic, 2);
        collection.stream_param_set(1, ParamName::Density, ParamType::Base, 3.0);
        assert!((collection.param_get(1, ParamName::Density, ParamType::Base) - 3.0).abs() < 1e-9);
        assert!((collection.param_get(2, ParamName::Density, ParamType::Base)).abs() < 1e-9);
    }

    #[test]
    fn channels_set_interleaved_wraps_modulo() {
        let mut collection = GrainCollection::new(5, 64, 48_000);
        collection.channels_set_interleaved(2);
        assert_eq!(collection.channel_get(0), 0);
        assert_eq!(collection.channel_get(1), 1);
        assert_eq!(collection.channel_get(2), 0);
        assert_eq!(collection.channel_get(3), 1);
        assert_eq!(collection.channel_get(4), 0);
    }

    #[test]
    fn channel_param_set_targets_matching_channel_only() {
        let mut collection = GrainCollection::new(4, 64, 48_000);
        collection.channels_set_interleaved(2);
        collection.channel_param_set(1, ParamName::Space, ParamType::Base, 0.5);
        assert!((collection.param_get(2, ParamName::Space, ParamType::Base) - 0.5).abs() < 1e-9);
        assert!((collection.param_get(1, ParamName::Space, ParamType::Base)).abs() < 1e-9);
    }

    #[test]
    fn out_of_range_target_is_ignored() {
        let mut collection = GrainCollection::new(2, 64, 48_000);
        collection.param_set(10, ParamName::Delay, ParamType::Base, 5.0);
        assert!((collection.param_get(1, ParamName::Delay, ParamType::Base)).abs() < 1e-9);
        assert!((collection.param_get(2, ParamName::Delay, ParamType::Base)).abs() < 1e-9);
    }

    #[test]
    fn set_buffer_broadcast_binds_every_voice() {
        let mut collection = GrainCollection::new(3, 64, 48_000);
        let buf = Arc::new(SourceBuffer::new(1, 256, 48_000));
        assert_eq!(collection.set_buffer(BufferRole::Source, buf, 0), ReturnCode::Success);
        for grain in 0..3 {
            assert!(collection.get_grain(grain).unwrap().buffers().source.is_some());
        }
    }
}
