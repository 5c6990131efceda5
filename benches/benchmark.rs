use criterion::{black_box, criterion_group, criterion_main, Criterion};
use granular_engine::buffer::{IoConfig, SourceBuffer};
use granular_engine::collection::{BufferRole, GrainCollection};
use granular_engine::grain::VoiceOutputs;
use std::sync::Arc;

const GRAINS: usize = 16;
const BLOCK: usize = 32;

struct VoiceBank {
    output: Vec<f64>,
    state: Vec<f64>,
    progress: Vec<f64>,
    playhead: Vec<f64>,
    amp: Vec<f64>,
    envelope: Vec<f64>,
    buffer_channel: Vec<f64>,
    stream_channel: Vec<f64>,
}

impl VoiceBank {
    fn new() -> Self {
        Self {
            output: vec![0.0; BLOCK],
            state: vec![0.0; BLOCK],
            progress: vec![0.0; BLOCK],
            playhead: vec![0.0; BLOCK],
            amp: vec![0.0; BLOCK],
            envelope: vec![0.0; BLOCK],
            buffer_channel: vec![0.0; BLOCK],
            stream_channel: vec![0.0; BLOCK],
        }
    }
}

fn make_collection() -> GrainCollection {
    let mut collection = GrainCollection::new(GRAINS, BLOCK, 44100);
    let source = Arc::new(SourceBuffer::new(1, 44100, 44100));
    collection.set_buffer(BufferRole::Source, source, 0);
    collection
}

pub fn grain_collection_process_bm(c: &mut Criterion) {
    let mut collection = make_collection();
    let grain_clock: Vec<f64> = (0..BLOCK).map(|i| (i as f64 / BLOCK as f64) * 0.1).collect();
    let traversal = vec![0.0; BLOCK];
    let mut banks: Vec<VoiceBank> = (0..GRAINS).map(|_| VoiceBank::new()).collect();

    c.bench_function("grain collection process", |b| {
        b.iter(|| {
            let io = IoConfig {
                grain_clock: &[&grain_clock],
                traversal_phasor: &[&traversal],
                fm: &[],
                am: &[],
                block_size: BLOCK,
                samplerate: 44100.0,
                livemode: true,
            };
            let mut outputs: Vec<VoiceOutputs> = banks
                .iter_mut()
                .map(|bank| VoiceOutputs {
                    output: &mut bank.output,
                    state: &mut bank.state,
                    progress: &mut bank.progress,
                    playhead: &mut bank.playhead,
                    amp: &mut bank.amp,
                    envelope: &mut bank.envelope,
                    buffer_channel: &mut bank.buffer_channel,
                    stream_channel: &mut bank.stream_channel,
                })
                .collect();
            black_box(collection.process(&io, 0, BLOCK, &mut outputs));
        })
    });
}

pub fn wav_file_load_bm(c: &mut Criterion) {
    c.bench_function("WAV file loading", |b| {
        b.iter(|| granular_engine::load_wav(black_box("tests/amen_br.wav")))
    });
}

criterion_group!(benches, grain_collection_process_bm, wav_file_load_bm);
criterion_main!(benches);
