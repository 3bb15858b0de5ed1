//! Public control surface: the real-time synth half and its controller half.

use std::{fmt::Write, sync::Arc};

use crossbeam_queue::ArrayQueue;
use four_cc::FourCC;

use crate::{
    engine::{EngineMessage, GranularEngine, MidiEvent},
    error::Error,
    parameter::{GranularParameters, Parameter},
    sample::{
        loader::{LoadState, SampleLoader},
        SampleStore,
    },
    viz::{ActiveGrains, SpawnEvents, VizReader},
};

// -------------------------------------------------------------------------------------------------

/// State key which selects the sample file to load.
pub const STATE_SAMPLE: &str = "sample";
/// Read-only state key reporting the current load status.
pub const STATE_LOAD_STATUS: &str = "load_status";
/// Read-only state key reporting the last load error text.
pub const STATE_LOAD_ERROR: &str = "load_error";
/// Read-only state key with the latest spawn positions, comma separated.
pub const STATE_VIZ_SPAWN: &str = "viz_spawn";
/// Read-only state key with the latest active grains, semicolon separated
/// `start,end,age,amplitude,voice` quintuples.
pub const STATE_VIZ_GRAINS: &str = "viz_grains";

/// Capacity of the controller to engine message queue.
const MESSAGE_QUEUE_SIZE: usize = 1024;

// -------------------------------------------------------------------------------------------------

/// The audio-thread half of the synth.
///
/// Owned and driven by the host's render callback. All control flows in through
/// the paired [`SynthController`].
pub struct GranularSynth {
    engine: GranularEngine,
    sample_rate: u32,
}

impl GranularSynth {
    /// Create a synth and its controller for the given output sample rate.
    pub fn new(sample_rate: u32) -> (GranularSynth, SynthController) {
        log::debug!("Creating granular synth for {sample_rate} Hz output");

        let store = Arc::new(SampleStore::new());
        let messages = Arc::new(ArrayQueue::new(MESSAGE_QUEUE_SIZE));
        let (viz_writer, viz_reader) = crate::viz::channel();

        let engine = GranularEngine::new(
            sample_rate,
            Arc::clone(&store),
            Arc::clone(&messages),
            viz_writer,
        );
        let synth = GranularSynth {
            engine,
            sample_rate,
        };
        let controller = SynthController {
            messages,
            parameters: GranularParameters::default(),
            loader: SampleLoader::new(store),
            viz: viz_reader,
            last_spawns: None,
            last_grains: None,
        };
        (synth, controller)
    }

    /// The output sample rate this synth was created for.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Render one block of interleaved stereo output for the given MIDI events.
    pub fn process(&mut self, output: &mut [f32], events: &[MidiEvent]) {
        #[cfg(feature = "assert-allocs")]
        assert_no_alloc::assert_no_alloc(|| self.engine.process(output, events));
        #[cfg(not(feature = "assert-allocs"))]
        self.engine.process(output, events);
    }
}

// -------------------------------------------------------------------------------------------------

/// The non-real-time half of the synth: parameters, sample loading, state strings
/// and visualization readout. Lives on a UI or host automation thread.
pub struct SynthController {
    messages: Arc<ArrayQueue<EngineMessage>>,
    /// Mirror of the engine's parameter set, used for clamping and readback.
    parameters: GranularParameters,
    loader: SampleLoader,
    viz: VizReader,
    last_spawns: Option<SpawnEvents>,
    last_grains: Option<ActiveGrains>,
}

impl SynthController {
    /// Descriptors of all automatable parameters.
    pub fn parameters(&self) -> [&'static dyn Parameter; 13] {
        GranularParameters::descriptors()
    }

    /// Set a parameter value. The value is clamped to the parameter's range and
    /// handed to the engine; returns false for unknown parameter ids.
    pub fn set_parameter(&mut self, id: FourCC, value: f32) -> bool {
        if !self.parameters.set(id, value) {
            return false;
        }
        // Forward the raw value, the engine side clamps identically.
        if self
            .messages
            .push(EngineMessage::SetParameter(id, value))
            .is_err()
        {
            log::warn!("Engine message queue is full - dropping parameter change {id}");
        }
        true
    }

    /// The current (clamped) value of a parameter, or `None` for unknown ids.
    pub fn parameter(&self, id: FourCC) -> Option<f32> {
        self.parameters.get(id)
    }

    /// The path loaded when the sample state is set to [`crate::DEFAULT_SAMPLE_KEY`].
    pub fn set_default_sample_path(&mut self, path: &str) {
        self.loader.set_default_path(path);
    }

    /// Apply a string state change. Currently the only writable key is
    /// [`STATE_SAMPLE`], which requests an asynchronous sample load.
    pub fn set_state(&mut self, key: &str, value: &str) -> Result<(), Error> {
        match key {
            STATE_SAMPLE => {
                self.loader.request(value);
                Ok(())
            }
            _ => Err(Error::ParameterError(format!(
                "Unknown or read-only state key: '{key}'"
            ))),
        }
    }

    /// Read a state value. Besides echoing back the sample path, this exposes the
    /// load diagnostics and the visualization streams as strings.
    pub fn state(&mut self, key: &str) -> Option<String> {
        match key {
            STATE_SAMPLE => Some(self.loader.diagnostics().path),
            STATE_LOAD_STATUS => Some(self.loader.diagnostics().state.to_string()),
            STATE_LOAD_ERROR => Some(self.loader.diagnostics().error),
            STATE_VIZ_SPAWN => Some(self.spawn_state()),
            STATE_VIZ_GRAINS => Some(self.grain_state()),
            _ => None,
        }
    }

    /// True once a sample finished loading.
    pub fn sample_loaded(&self) -> bool {
        self.loader.diagnostics().state == LoadState::Loaded
    }

    fn spawn_state(&mut self) -> String {
        if let Some(spawns) = self.viz.read_spawns() {
            self.last_spawns = Some(spawns);
        }
        let Some(spawns) = &self.last_spawns else {
            return String::new();
        };
        let mut text = String::new();
        for (index, position) in spawns.as_slice().iter().enumerate() {
            if index > 0 {
                text.push(',');
            }
            let _ = write!(text, "{position:.4}");
        }
        text
    }

    fn grain_state(&mut self) -> String {
        if let Some(grains) = self.viz.read_grains() {
            self.last_grains = Some(grains);
        }
        let Some(grains) = &self.last_grains else {
            return String::new();
        };
        let mut text = String::new();
        for (index, grain) in grains.as_slice().iter().enumerate() {
            if index > 0 {
                text.push(';');
            }
            let _ = write!(
                text,
                "{:.4},{:.4},{:.4},{:.4},{}",
                grain.start, grain.end, grain.age, grain.amplitude, grain.voice
            );
        }
        text
    }
}

// -------------------------------------------------------------------------------------------------
