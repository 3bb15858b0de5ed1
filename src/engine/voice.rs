//! One polyphonic voice: amplitude/pitch envelopes plus a fixed grain pool.

use rand::{rngs::SmallRng, Rng};

use crate::{
    engine::{grain::Grain, BlockParameters, GRAINS_PER_VOICE},
    sample::SampleBuffer,
    utils::{midi_note_to_hz, semitones_to_ratio},
    viz::VizWriter,
};

// -------------------------------------------------------------------------------------------------

/// A single voice of the granular engine.
///
/// While gated, the voice spawns new grains on a per-sample countdown. Grains keep
/// ringing out after the gate closes; the voice itself stays active until the
/// release ramp reaches zero. All state is plain data, voices get reused in place.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Voice {
    active: bool,
    gate: bool,
    releasing: bool,
    note: u8,
    velocity: f32,
    amplitude_env: f32,
    /// Signed semitone offset, decaying linearly toward zero.
    pitch_env: f32,
    /// Samples until the next grain spawn. May go negative within a sample.
    spawn_countdown: f64,
    grains: [Grain; GRAINS_PER_VOICE],
}

impl Voice {
    pub const fn new() -> Self {
        Self {
            active: false,
            gate: false,
            releasing: false,
            note: 0,
            velocity: 0.0,
            amplitude_env: 0.0,
            pitch_env: 0.0,
            spawn_countdown: 0.0,
            grains: [Grain::new(); GRAINS_PER_VOICE],
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn note(&self) -> u8 {
        self.note
    }

    #[inline]
    pub fn velocity(&self) -> f32 {
        self.velocity
    }

    #[inline]
    pub fn amplitude_env(&self) -> f32 {
        self.amplitude_env
    }

    #[inline]
    pub fn grains(&self) -> &[Grain] {
        &self.grains
    }

    /// (Re)trigger this voice for the given note.
    ///
    /// Resets the amplitude envelope to zero so every trigger attacks from silence,
    /// and primes the pitch envelope and spawn countdown. Already ringing grains are
    /// kept unless the hard retrigger policy asks to kill them.
    pub fn start(&mut self, note: u8, velocity: f32, block: &BlockParameters) {
        self.active = true;
        self.gate = true;
        self.releasing = false;
        self.note = note;
        self.velocity = velocity;
        self.amplitude_env = 0.0;
        self.pitch_env = block.pitch_env_amount;
        self.spawn_countdown = 0.0;
        if block.kill_on_retrigger {
            for grain in &mut self.grains {
                grain.deactivate();
            }
        }
    }

    /// Close the gate and enter the release ramp.
    pub fn release(&mut self) {
        if self.active {
            self.gate = false;
            self.releasing = true;
        }
    }

    /// Run one output sample: spawn scheduling, grain rendering and envelopes.
    ///
    /// Returns the voice's stereo contribution, already scaled by velocity and
    /// the amplitude envelope.
    #[inline]
    pub fn process_sample(
        &mut self,
        sample: Option<&SampleBuffer>,
        block: &BlockParameters,
        rng: &mut SmallRng,
        viz: &mut VizWriter,
    ) -> (f32, f32) {
        if !self.active {
            return (0.0, 0.0);
        }

        // Spawn scheduling runs while gated only. At most one spawn per sample,
        // even when multiple intervals have elapsed.
        if self.gate {
            self.spawn_countdown -= 1.0;
            if self.spawn_countdown <= 0.0 {
                if let Some(sample) = sample {
                    self.spawn_grain(sample, block, rng, viz);
                }
                self.spawn_countdown += block.spawn_interval;
            }
        }

        // Render and mix all active grains.
        let mut left = 0.0;
        let mut right = 0.0;
        if let Some(sample) = sample {
            for grain in &mut self.grains {
                if grain.is_active() {
                    let (grain_left, grain_right) = grain.process(sample);
                    left += grain_left;
                    right += grain_right;
                }
            }
        }

        // Amplitude envelope: linear attack toward 1, linear release toward 0.
        if self.releasing {
            self.amplitude_env -= block.release_step;
            if self.amplitude_env <= 0.0 {
                self.amplitude_env = 0.0;
                self.active = false;
                self.releasing = false;
            }
        } else if self.gate {
            self.amplitude_env = (self.amplitude_env + block.attack_step).min(1.0);
        }

        // Pitch envelope decays linearly toward zero without overshooting.
        if self.pitch_env > 0.0 {
            self.pitch_env = (self.pitch_env - block.pitch_env_step).max(0.0);
        } else if self.pitch_env < 0.0 {
            self.pitch_env = (self.pitch_env + block.pitch_env_step).min(0.0);
        }

        let gain = self.velocity * self.amplitude_env;
        (left * gain, right * gain)
    }

    /// Spawn one grain into a free slot. Silently drops the spawn when the pool
    /// is saturated.
    fn spawn_grain(
        &mut self,
        sample: &SampleBuffer,
        block: &BlockParameters,
        rng: &mut SmallRng,
        viz: &mut VizWriter,
    ) {
        let note = self.note;
        let pitch_env = self.pitch_env;
        let Some(grain) = self.grains.iter_mut().find(|grain| !grain.is_active()) else {
            return;
        };

        let frame_count = sample.frame_count();

        // Randomized start position around the position parameter.
        let position = (block.position + (2.0 * rng.random::<f32>() - 1.0) * block.spray)
            .clamp(0.0, 1.0);
        let start_frame = position as f64 * (frame_count - 2) as f64;

        // Playback rate relative to middle C, including global and per-voice pitch.
        let random_offset = (2.0 * rng.random::<f32>() - 1.0) * block.random_pitch;
        let increment = midi_note_to_hz(note) / midi_note_to_hz(60)
            * semitones_to_ratio(block.pitch)
            * (sample.sample_rate() as f64 / block.sample_rate as f64)
            * semitones_to_ratio(pitch_env)
            * semitones_to_ratio(random_offset);

        // Random stereo placement around center, scaled by spray.
        let pan = 0.5 + (rng.random::<f32>() - 0.5) * block.spray;

        grain.activate(start_frame, increment, block.grain_duration, pan, frame_count);
        viz.record_spawn(grain.start_position());
    }
}

// -------------------------------------------------------------------------------------------------
