//! Real-time granular synthesis engine: note dispatch, voice pool and block rendering.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use four_cc::FourCC;
use rand::{rngs::SmallRng, SeedableRng};

use crate::{
    parameter::GranularParameters,
    sample::SampleStore,
    viz::{ActiveGrainInfo, VizWriter, MAX_ACTIVE_GRAINS},
};

pub(crate) mod grain;
pub(crate) mod note_queue;
pub(crate) mod voice;

use note_queue::NoteQueue;
use voice::Voice;

// -------------------------------------------------------------------------------------------------

/// Number of voice slots in the engine.
pub const MAX_VOICES: usize = 16;
/// Number of grain slots per voice.
pub const GRAINS_PER_VOICE: usize = 16;

/// Visualization snapshots are published at roughly this rate.
const VIZ_RATE_HZ: u32 = 30;

// -------------------------------------------------------------------------------------------------

/// A raw, 3-byte MIDI event as passed into [`GranularEngine::process`].
///
/// Events shorter than 3 bytes are carried along but ignored by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    size: u8,
    data: [u8; 3],
}

impl MidiEvent {
    /// Create an event from raw MIDI bytes. Only the first 3 bytes are kept.
    pub fn from_raw(bytes: &[u8]) -> Self {
        let size = bytes.len().min(3);
        let mut data = [0; 3];
        data[..size].copy_from_slice(&bytes[..size]);
        Self {
            size: size as u8,
            data,
        }
    }

    /// A note-on event for the given note number and 0-127 velocity.
    pub fn note_on(note: u8, velocity: u8) -> Self {
        Self {
            size: 3,
            data: [0x90, note & 0x7F, velocity & 0x7F],
        }
    }

    /// A note-off event for the given note number.
    pub fn note_off(note: u8) -> Self {
        Self {
            size: 3,
            data: [0x80, note & 0x7F, 0],
        }
    }

    /// The 3-byte payload, or `None` for malformed (short) events.
    #[inline]
    fn payload(&self) -> Option<&[u8; 3]> {
        (self.size >= 3).then_some(&self.data)
    }
}

// -------------------------------------------------------------------------------------------------

/// Plain-data messages pushed from the controller into the engine, drained at the
/// top of each processed block.
#[derive(Debug, Clone, Copy)]
pub(crate) enum EngineMessage {
    SetParameter(FourCC, f32),
}

// -------------------------------------------------------------------------------------------------

/// Per-block constants derived once from the current parameter set.
///
/// All sample counts are floored to a minimum of 1 to keep the per-sample math
/// free of division faults and runaway loops.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockParameters {
    pub sample_rate: u32,
    pub gain: f32,
    /// Grain length in output samples.
    pub grain_duration: u32,
    /// Output samples between grain spawns. Infinite disables spawning.
    pub spawn_interval: f64,
    /// Normalized 0..1 spawn position in the sample.
    pub position: f32,
    /// Normalized 0..1 randomization of position and pan.
    pub spray: f32,
    /// Global pitch offset in semitones.
    pub pitch: f32,
    /// Random per-grain pitch range in semitones.
    pub random_pitch: f32,
    pub pitch_env_amount: f32,
    /// Per-sample linear decay of the pitch envelope, in semitones.
    pub pitch_env_step: f32,
    pub attack_step: f32,
    pub release_step: f32,
    pub kill_on_retrigger: bool,
    pub new_voice_on_retrigger: bool,
}

impl BlockParameters {
    pub fn derive(parameters: &GranularParameters, sample_rate: u32) -> Self {
        let ms_to_samples = |ms: f32| (ms * sample_rate as f32 / 1000.0).max(1.0);

        let density = parameters.density();
        let spawn_interval = if density > 0.0 {
            (sample_rate as f64 / density as f64).max(1.0)
        } else {
            f64::INFINITY
        };
        let pitch_env_amount = parameters.pitch_env_amount();

        Self {
            sample_rate,
            gain: parameters.gain(),
            grain_duration: ms_to_samples(parameters.grain_size_ms()) as u32,
            spawn_interval,
            position: parameters.position(),
            spray: parameters.spray(),
            pitch: parameters.pitch(),
            random_pitch: parameters.random_pitch(),
            pitch_env_amount,
            pitch_env_step: pitch_env_amount.abs()
                / ms_to_samples(parameters.pitch_env_decay_ms()),
            attack_step: 1.0 / ms_to_samples(parameters.attack_ms()),
            release_step: 1.0 / ms_to_samples(parameters.release_ms()),
            kill_on_retrigger: parameters.kill_on_retrigger(),
            new_voice_on_retrigger: parameters.new_voice_on_retrigger(),
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// The real-time half of the synth.
///
/// Owns the voice pool, per-note FIFO queues and the visualization writer. The
/// entire processing path runs allocation free: parameter changes arrive as plain
/// data through a bounded queue, the sample buffer is a shared reference snapshot
/// taken once per block.
pub struct GranularEngine {
    sample_rate: u32,
    parameters: GranularParameters,
    store: Arc<SampleStore>,
    messages: Arc<ArrayQueue<EngineMessage>>,
    voices: [Voice; MAX_VOICES],
    note_queues: [NoteQueue; 128],
    rng: SmallRng,
    viz: VizWriter,
    viz_interval: u32,
    viz_countdown: u32,
}

impl GranularEngine {
    pub(crate) fn new(
        sample_rate: u32,
        store: Arc<SampleStore>,
        messages: Arc<ArrayQueue<EngineMessage>>,
        viz: VizWriter,
    ) -> Self {
        let viz_interval = (sample_rate / VIZ_RATE_HZ).max(1);
        Self {
            sample_rate,
            parameters: GranularParameters::default(),
            store,
            messages,
            voices: [Voice::new(); MAX_VOICES],
            note_queues: [NoteQueue::new(); 128],
            rng: SmallRng::from_os_rng(),
            viz,
            viz_interval,
            viz_countdown: viz_interval,
        }
    }

    /// Render one block of interleaved stereo output.
    ///
    /// Drains pending parameter changes, dispatches the given MIDI events in order,
    /// then runs the per-sample scheduler and renderer for all active voices.
    pub fn process(&mut self, output: &mut [f32], events: &[MidiEvent]) {
        output.fill(0.0);

        while let Some(message) = self.messages.pop() {
            match message {
                EngineMessage::SetParameter(id, value) => {
                    self.parameters.set(id, value);
                }
            }
        }

        let block = BlockParameters::derive(&self.parameters, self.sample_rate);

        for event in events {
            self.dispatch_event(event, &block);
        }

        // One buffer reference for the whole block. A concurrent publish swaps the
        // store but never this snapshot.
        let sample = self.store.snapshot();
        let sample = sample.as_deref();

        for frame in output.chunks_exact_mut(2) {
            let mut left = 0.0;
            let mut right = 0.0;
            for voice in &mut self.voices {
                if voice.is_active() {
                    let (voice_left, voice_right) =
                        voice.process_sample(sample, &block, &mut self.rng, &mut self.viz);
                    left += voice_left;
                    right += voice_right;
                }
            }
            frame[0] = left * block.gain;
            frame[1] = right * block.gain;

            self.viz_countdown -= 1;
            if self.viz_countdown == 0 {
                self.viz_countdown = self.viz_interval;
                self.publish_viz();
            }
        }
    }

    fn dispatch_event(&mut self, event: &MidiEvent, block: &BlockParameters) {
        let Some(payload) = event.payload() else {
            return;
        };
        let status = payload[0] & 0xF0;
        let note = payload[1] & 0x7F;
        let velocity = payload[2] & 0x7F;
        match status {
            0x90 if velocity > 0 => self.note_on(note, velocity as f32 / 127.0, block),
            0x80 | 0x90 => self.note_off(note),
            _ => {}
        }
    }

    fn note_on(&mut self, note: u8, velocity: f32, block: &BlockParameters) {
        let voice_index = self.allocate_voice(note, block);
        // Purge the slot from every queue so a stale entry can't release the
        // wrong note later.
        for queue in &mut self.note_queues {
            queue.remove(voice_index);
        }
        self.voices[voice_index].start(note, velocity, block);
        self.note_queues[note as usize].push(voice_index);
    }

    fn note_off(&mut self, note: u8) {
        if let Some(voice_index) = self.note_queues[note as usize].pop() {
            self.voices[voice_index].release();
        } else if let Some(voice) = self
            .voices
            .iter_mut()
            .find(|voice| voice.is_active() && voice.note() == note)
        {
            // The queue entry was stolen away, release whatever still plays the note.
            voice.release();
        }
    }

    fn allocate_voice(&mut self, note: u8, block: &BlockParameters) -> usize {
        // Retriggering a held note reuses its voice unless every retrigger should
        // get a fresh one.
        if !block.new_voice_on_retrigger {
            if let Some(index) = self
                .voices
                .iter()
                .position(|voice| voice.is_active() && voice.note() == note)
            {
                return index;
            }
        }
        if let Some(index) = self.voices.iter().position(|voice| !voice.is_active()) {
            return index;
        }
        // All slots busy: steal the quietest voice, ties resolve to the lowest index.
        let mut quietest = 0;
        for (index, voice) in self.voices.iter().enumerate() {
            if voice.amplitude_env() < self.voices[quietest].amplitude_env() {
                quietest = index;
            }
        }
        quietest
    }

    fn publish_viz(&mut self) {
        let mut grains = [ActiveGrainInfo::default(); MAX_ACTIVE_GRAINS];
        let mut count = 0;
        'voices: for (voice_index, voice) in self.voices.iter().enumerate() {
            if !voice.is_active() {
                continue;
            }
            let voice_level = voice.velocity() * voice.amplitude_env();
            for grain in voice.grains() {
                if !grain.is_active() {
                    continue;
                }
                if count == MAX_ACTIVE_GRAINS {
                    break 'voices;
                }
                grains[count] = ActiveGrainInfo {
                    start: grain.start_position(),
                    end: grain.end_position(),
                    age: grain.progress(),
                    amplitude: grain.window_level() * voice_level,
                    voice: voice_index as u32,
                };
                count += 1;
            }
        }
        self.viz.publish_grains(&grains[..count]);
        self.viz.publish_spawns();
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use basedrop::{Collector, Shared};

    use super::*;
    use crate::{parameter::GranularParameters as Params, sample::SampleBuffer};

    struct TestRig {
        engine: GranularEngine,
        messages: Arc<ArrayQueue<EngineMessage>>,
        store: Arc<SampleStore>,
        reader: crate::viz::VizReader,
        _collector: Collector,
    }

    fn test_rig(sample_rate: u32) -> TestRig {
        let store = Arc::new(SampleStore::new());
        let messages = Arc::new(ArrayQueue::new(256));
        let (writer, reader) = crate::viz::channel();
        let engine = GranularEngine::new(
            sample_rate,
            Arc::clone(&store),
            Arc::clone(&messages),
            writer,
        );
        TestRig {
            engine,
            messages,
            store,
            reader,
            _collector: Collector::new(),
        }
    }

    fn publish_ones(rig: &TestRig, frames: usize, sample_rate: u32) {
        let buffer = SampleBuffer::new(
            vec![1.0; frames],
            vec![1.0; frames],
            sample_rate,
            "test".to_string(),
        )
        .unwrap();
        rig.store
            .publish(Shared::new(&rig._collector.handle(), buffer));
    }

    fn set_parameter(rig: &TestRig, id: &[u8; 4], value: f32) {
        rig.messages
            .push(EngineMessage::SetParameter(FourCC(*id), value))
            .unwrap();
    }

    fn run_samples(engine: &mut GranularEngine, samples: usize, events: &[MidiEvent]) {
        let mut output = vec![0.0; samples * 2];
        engine.process(&mut output, events);
    }

    fn active_voices(engine: &GranularEngine) -> usize {
        engine.voices.iter().filter(|voice| voice.is_active()).count()
    }

    #[test]
    fn silence_without_a_sample() {
        let mut rig = test_rig(48000);
        let mut output = vec![0.0; 1024];
        rig.engine
            .process(&mut output, &[MidiEvent::note_on(60, 127)]);
        assert!(output.iter().all(|&sample| sample == 0.0));
        // The voice is allocated and enveloped regardless.
        assert_eq!(active_voices(&rig.engine), 1);
    }

    #[test]
    fn malformed_events_are_ignored() {
        let mut rig = test_rig(48000);
        publish_ones(&rig, 96000, 48000);
        let events = [
            MidiEvent::from_raw(&[]),
            MidiEvent::from_raw(&[0x90]),
            MidiEvent::from_raw(&[0x90, 60]),
        ];
        run_samples(&mut rig.engine, 64, &events);
        assert_eq!(active_voices(&rig.engine), 0);
    }

    #[test]
    fn note_on_with_zero_velocity_is_a_note_off() {
        let mut rig = test_rig(48000);
        run_samples(&mut rig.engine, 64, &[MidiEvent::note_on(60, 127)]);
        run_samples(
            &mut rig.engine,
            64,
            &[MidiEvent::from_raw(&[0x90, 60, 0])],
        );
        // Default release is 200ms, run past it.
        run_samples(&mut rig.engine, 48000, &[]);
        assert_eq!(active_voices(&rig.engine), 0);
    }

    #[test]
    fn voice_flood_stays_bounded() {
        let mut rig = test_rig(48000);
        publish_ones(&rig, 96000, 48000);
        let events: Vec<MidiEvent> = (0..100)
            .map(|index| MidiEvent::note_on((index % 120) as u8, 100))
            .collect();
        run_samples(&mut rig.engine, 256, &events);
        assert!(active_voices(&rig.engine) <= MAX_VOICES);
        for voice in &rig.engine.voices {
            let grains = voice.grains().iter().filter(|grain| grain.is_active()).count();
            assert!(grains <= GRAINS_PER_VOICE);
        }
    }

    #[test]
    fn fifo_matching_releases_the_allocating_voice() {
        let mut rig = test_rig(48000);
        set_parameter(&rig, b"NVRT", 1.0);

        // Three note-ons, the middle one for a different note, then a note-off
        // for the first note. FIFO matching must release voice 0, not voice 2.
        let events = [
            MidiEvent::note_on(60, 100),
            MidiEvent::note_on(64, 100),
            MidiEvent::note_on(60, 100),
            MidiEvent::note_off(60),
        ];
        run_samples(&mut rig.engine, 64, &events);

        // Run past the 200ms default release: the released voice goes inactive,
        // the two still-gated voices stay.
        run_samples(&mut rig.engine, 48000, &[]);
        assert!(!rig.engine.voices[0].is_active());
        assert!(rig.engine.voices[1].is_active());
        assert!(rig.engine.voices[2].is_active());
        assert_eq!(rig.engine.voices[2].note(), 60);
    }

    #[test]
    fn stealing_takes_the_quietest_voice() {
        let mut rig = test_rig(48000);
        // Long release so a released voice stays active with a decaying envelope.
        set_parameter(&rig, b"RELS", 5000.0);

        let note_ons: Vec<MidiEvent> =
            (0..MAX_VOICES).map(|index| MidiEvent::note_on(20 + index as u8, 100)).collect();
        run_samples(&mut rig.engine, 1000, &note_ons);
        assert_eq!(active_voices(&rig.engine), MAX_VOICES);

        // Release the note held by voice 5 and let its envelope fall below the rest.
        run_samples(&mut rig.engine, 4800, &[MidiEvent::note_off(25)]);
        assert!(rig.engine.voices[5].amplitude_env() < 1.0);
        assert!(rig.engine.voices[5].is_active());

        run_samples(&mut rig.engine, 64, &[MidiEvent::note_on(100, 100)]);
        assert_eq!(rig.engine.voices[5].note(), 100);
        assert_eq!(active_voices(&rig.engine), MAX_VOICES);
    }

    #[test]
    fn stealing_ties_break_to_the_lowest_index() {
        let mut rig = test_rig(48000);
        let note_ons: Vec<MidiEvent> =
            (0..MAX_VOICES).map(|index| MidiEvent::note_on(20 + index as u8, 100)).collect();
        // All envelopes saturate at 1.0.
        run_samples(&mut rig.engine, 2000, &note_ons);

        run_samples(&mut rig.engine, 64, &[MidiEvent::note_on(100, 100)]);
        assert_eq!(rig.engine.voices[0].note(), 100);
    }

    #[test]
    fn kill_on_retrigger_clears_ringing_grains() {
        let mut rig = test_rig(48000);
        publish_ones(&rig, 96000, 48000);
        // Long grains so they are still ringing at the retrigger.
        set_parameter(&rig, b"GSIZ", 250.0);

        run_samples(&mut rig.engine, 4800, &[MidiEvent::note_on(60, 100)]);
        let before = rig.engine.voices[0]
            .grains()
            .iter()
            .filter(|grain| grain.is_active())
            .count();
        assert!(before > 1);

        // Soft retrigger: old grains keep ringing next to the new spawn.
        run_samples(&mut rig.engine, 1, &[MidiEvent::note_on(60, 100)]);
        let soft = rig.engine.voices[0]
            .grains()
            .iter()
            .filter(|grain| grain.is_active())
            .count();
        assert_eq!(soft, before + 1);

        // Hard retrigger: only the freshly spawned grain remains.
        set_parameter(&rig, b"KILL", 1.0);
        run_samples(&mut rig.engine, 1, &[MidiEvent::note_on(60, 100)]);
        let hard = rig.engine.voices[0]
            .grains()
            .iter()
            .filter(|grain| grain.is_active())
            .count();
        assert_eq!(hard, 1);
    }

    #[test]
    fn held_note_renders_hann_shaped_grains() {
        // 48 kHz engine, 2 second sample of ones, default parameters: grains spawn
        // every 2400 samples, 2880 samples long, reading from the sample's middle.
        let sample_rate = 48000;
        let mut rig = test_rig(sample_rate);
        publish_ones(&rig, 96000, sample_rate);

        // Silence before the note-on.
        let mut output = vec![0.0; 2400 * 2];
        rig.engine.process(&mut output, &[]);
        assert!(output.iter().all(|&sample| sample == 0.0));

        // One held note. The first grain starts at frame 47999 of the sample.
        rig.engine
            .process(&mut output, &[MidiEvent::note_on(60, 127)]);
        let first_grain = &rig.engine.voices[0].grains()[0];
        assert!(first_grain.is_active());
        assert!((first_grain.start_position() - 47999.0 / 96000.0).abs() < 1e-4);

        // Output follows the Hann window: near-silent at the grain edges, loudest
        // in the middle of the grain (sample 1440), scaled by envelope and gain.
        let left: Vec<f32> = output.chunks_exact(2).map(|frame| frame[0]).collect();
        assert!(left[0].abs() < 1e-4);
        let peak_index = left
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().partial_cmp(&b.1.abs()).unwrap())
            .unwrap()
            .0;
        assert!((1300..=1500).contains(&peak_index));
        assert!(left[peak_index].abs() > 0.0);

        // Viz snapshots report the spawns and the active grain region.
        let spawns = rig.reader.read_spawns().unwrap();
        assert!(!spawns.as_slice().is_empty());
        assert!((spawns.as_slice()[0] - 0.5).abs() < 0.01);
        let grains = rig.reader.read_grains().unwrap();
        assert!(!grains.as_slice().is_empty());
        assert_eq!(grains.as_slice()[0].voice, 0);

        // Release and run past release ramp plus grain tail: back to silence.
        rig.engine
            .process(&mut output, &[MidiEvent::note_off(60)]);
        let mut tail = vec![0.0; 48000 * 2];
        rig.engine.process(&mut tail, &[]);
        assert_eq!(active_voices(&rig.engine), 0);
        let mut silent = vec![0.0; 1024];
        rig.engine.process(&mut silent, &[]);
        assert!(silent.iter().all(|&sample| sample == 0.0));
    }

    #[test]
    fn parameter_messages_are_clamped_on_apply() {
        let mut rig = test_rig(48000);
        set_parameter(&rig, b"DENS", 500.0);
        set_parameter(&rig, b"GAIN", -2.0);
        run_samples(&mut rig.engine, 16, &[]);
        assert_eq!(rig.engine.parameters.density(), 80.0);
        assert_eq!(rig.engine.parameters.gain(), 0.0);
    }

    #[test]
    fn derived_block_constants_are_floored() {
        let mut parameters = Params::default();
        parameters.set(FourCC(*b"PEDC"), 0.0);
        parameters.set(FourCC(*b"ATTK"), 0.0);
        let block = BlockParameters::derive(&parameters, 48000);
        assert!(block.pitch_env_step.is_finite());
        assert_eq!(block.attack_step, 1.0);
        assert_eq!(block.grain_duration, 2880);
        assert_eq!(block.spawn_interval, 2400.0);
    }
}
