#![doc = include_str!("../README.md")]

// private mods (will be partly re-exported)
mod engine;
mod error;
mod parameter;
mod sample;
mod synth;
mod viz;

// public, flat re-exports
pub use error::Error;

pub use engine::{MidiEvent, GRAINS_PER_VOICE, MAX_VOICES};

pub use parameter::{
    BoolParameter, FloatParameter, GranularParameters, Parameter, ParameterType,
};

pub use sample::{
    loader::{LoadDiagnostics, LoadState, DEFAULT_SAMPLE_KEY},
    SampleBuffer, SampleStore,
};

pub use synth::{
    GranularSynth, SynthController, STATE_LOAD_ERROR, STATE_LOAD_STATUS, STATE_SAMPLE,
    STATE_VIZ_GRAINS, STATE_VIZ_SPAWN,
};

pub use viz::{
    ActiveGrainInfo, ActiveGrains, SpawnEvents, VizReader, MAX_ACTIVE_GRAINS, MAX_SPAWN_EVENTS,
};

// re-exported for parameter ids
pub use four_cc::FourCC;

// public mods
pub mod utils;
