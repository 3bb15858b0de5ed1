//! Engine parameter descriptors and clamped plain-value storage.

use std::ops::RangeInclusive;

use four_cc::FourCC;

// -------------------------------------------------------------------------------------------------

/// Describes the type of a [`Parameter`] to e.g. select a proper visual representation in a UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterType {
    /// A continuous floating-point value.
    Float,
    /// A boolean toggle.
    Boolean,
}

// -------------------------------------------------------------------------------------------------

/// Describes a single engine parameter for use in UIs or for automation.
pub trait Parameter {
    /// The unique id of the parameter.
    fn id(&self) -> FourCC;

    /// The name of the parameter.
    fn name(&self) -> &'static str;

    /// Optional unit for string displays.
    fn unit(&self) -> &'static str;

    /// The parameter type.
    fn parameter_type(&self) -> ParameterType;

    /// The parameter's plain value range.
    fn range(&self) -> RangeInclusive<f32>;

    /// The parameter's plain default value.
    fn default_value(&self) -> f32;
}

// -------------------------------------------------------------------------------------------------

/// A continuous (float) parameter descriptor.
#[derive(Debug, Clone)]
pub struct FloatParameter {
    id: FourCC,
    name: &'static str,
    range: RangeInclusive<f32>,
    default: f32,
    unit: &'static str,
}

impl FloatParameter {
    /// Create a new float parameter descriptor.
    pub const fn new(
        id: FourCC,
        name: &'static str,
        range: RangeInclusive<f32>,
        default: f32,
    ) -> Self {
        assert!(
            default >= *range.start() && default <= *range.end(),
            "Invalid parameter default value"
        );
        Self {
            id,
            name,
            range,
            default,
            unit: "",
        }
    }

    /// Optional unit for string displays.
    pub const fn with_unit(mut self, unit: &'static str) -> Self {
        self.unit = unit;
        self
    }

    /// Clamp the given plain value to the parameter's range.
    pub fn clamp_value(&self, value: f32) -> f32 {
        value.clamp(*self.range.start(), *self.range.end())
    }
}

impl Parameter for FloatParameter {
    fn id(&self) -> FourCC {
        self.id
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn unit(&self) -> &'static str {
        self.unit
    }

    fn parameter_type(&self) -> ParameterType {
        ParameterType::Float
    }

    fn range(&self) -> RangeInclusive<f32> {
        self.range.clone()
    }

    fn default_value(&self) -> f32 {
        self.default
    }
}

// -------------------------------------------------------------------------------------------------

/// A boolean toggle parameter descriptor. Plain values >= 0.5 are treated as "on".
#[derive(Debug, Clone)]
pub struct BoolParameter {
    id: FourCC,
    name: &'static str,
    default: bool,
}

impl BoolParameter {
    /// Create a new boolean parameter descriptor.
    pub const fn new(id: FourCC, name: &'static str, default: bool) -> Self {
        Self { id, name, default }
    }

    /// Convert a plain float value to the parameter's boolean value.
    pub fn value_to_bool(&self, value: f32) -> bool {
        value >= 0.5
    }
}

impl Parameter for BoolParameter {
    fn id(&self) -> FourCC {
        self.id
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn unit(&self) -> &'static str {
        ""
    }

    fn parameter_type(&self) -> ParameterType {
        ParameterType::Boolean
    }

    fn range(&self) -> RangeInclusive<f32> {
        0.0..=1.0
    }

    fn default_value(&self) -> f32 {
        if self.default {
            1.0
        } else {
            0.0
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// All granular engine parameter values, stored as plain values and clamped on write.
///
/// Position and spray are exposed as percentages (0 - 100) but stored normalized (0 - 1),
/// matching how the engine consumes them.
#[derive(Debug, Clone)]
pub struct GranularParameters {
    gain: f32,
    grain_size_ms: f32,
    density: f32,
    position: f32, // normalized 0..1
    spray: f32,    // normalized 0..1
    pitch: f32,
    random_pitch: f32,
    pitch_env_amount: f32,
    pitch_env_decay_ms: f32,
    attack_ms: f32,
    release_ms: f32,
    kill_on_retrigger: bool,
    new_voice_on_retrigger: bool,
}

impl GranularParameters {
    pub const GAIN: FloatParameter = FloatParameter::new(FourCC(*b"GAIN"), "Gain", 0.0..=1.0, 0.8);

    pub const GRAIN_SIZE: FloatParameter =
        FloatParameter::new(FourCC(*b"GSIZ"), "Grain Size", 5.0..=250.0, 60.0).with_unit("ms");

    pub const DENSITY: FloatParameter =
        FloatParameter::new(FourCC(*b"DENS"), "Density", 1.0..=80.0, 20.0).with_unit("gr/s");

    pub const POSITION: FloatParameter =
        FloatParameter::new(FourCC(*b"POSN"), "Position", 0.0..=100.0, 50.0).with_unit("%");

    pub const SPRAY: FloatParameter =
        FloatParameter::new(FourCC(*b"SPRY"), "Spray", 0.0..=100.0, 0.0).with_unit("%");

    pub const PITCH: FloatParameter =
        FloatParameter::new(FourCC(*b"PTCH"), "Pitch", -24.0..=24.0, 0.0).with_unit("st");

    pub const RANDOM_PITCH: FloatParameter =
        FloatParameter::new(FourCC(*b"RPCH"), "Rnd Pitch", 0.0..=12.0, 0.0).with_unit("st");

    pub const PITCH_ENV_AMOUNT: FloatParameter =
        FloatParameter::new(FourCC(*b"PEAM"), "Pitch Env", -48.0..=48.0, 0.0).with_unit("st");

    pub const PITCH_ENV_DECAY: FloatParameter =
        FloatParameter::new(FourCC(*b"PEDC"), "Pitch Env Decay", 0.0..=5000.0, 250.0)
            .with_unit("ms");

    pub const ATTACK: FloatParameter =
        FloatParameter::new(FourCC(*b"ATTK"), "Attack", 0.0..=2000.0, 5.0).with_unit("ms");

    pub const RELEASE: FloatParameter =
        FloatParameter::new(FourCC(*b"RELS"), "Release", 5.0..=5000.0, 200.0).with_unit("ms");

    pub const KILL_ON_RETRIGGER: BoolParameter =
        BoolParameter::new(FourCC(*b"KILL"), "Kill on Retrigger", false);

    pub const NEW_VOICE_ON_RETRIGGER: BoolParameter =
        BoolParameter::new(FourCC(*b"NVRT"), "New Voice on Retrigger", false);

    /// All parameter descriptors, e.g. for host registration.
    pub fn descriptors() -> [&'static dyn Parameter; 13] {
        [
            &Self::GAIN,
            &Self::GRAIN_SIZE,
            &Self::DENSITY,
            &Self::POSITION,
            &Self::SPRAY,
            &Self::PITCH,
            &Self::RANDOM_PITCH,
            &Self::PITCH_ENV_AMOUNT,
            &Self::PITCH_ENV_DECAY,
            &Self::ATTACK,
            &Self::RELEASE,
            &Self::KILL_ON_RETRIGGER,
            &Self::NEW_VOICE_ON_RETRIGGER,
        ]
    }

    /// Set a parameter's plain value, clamping it into the parameter's range.
    /// Returns false when the id is unknown.
    pub fn set(&mut self, id: FourCC, value: f32) -> bool {
        if id == Self::GAIN.id() {
            self.gain = Self::GAIN.clamp_value(value);
        } else if id == Self::GRAIN_SIZE.id() {
            self.grain_size_ms = Self::GRAIN_SIZE.clamp_value(value);
        } else if id == Self::DENSITY.id() {
            self.density = Self::DENSITY.clamp_value(value);
        } else if id == Self::POSITION.id() {
            self.position = Self::POSITION.clamp_value(value) / 100.0;
        } else if id == Self::SPRAY.id() {
            self.spray = Self::SPRAY.clamp_value(value) / 100.0;
        } else if id == Self::PITCH.id() {
            self.pitch = Self::PITCH.clamp_value(value);
        } else if id == Self::RANDOM_PITCH.id() {
            self.random_pitch = Self::RANDOM_PITCH.clamp_value(value);
        } else if id == Self::PITCH_ENV_AMOUNT.id() {
            self.pitch_env_amount = Self::PITCH_ENV_AMOUNT.clamp_value(value);
        } else if id == Self::PITCH_ENV_DECAY.id() {
            self.pitch_env_decay_ms = Self::PITCH_ENV_DECAY.clamp_value(value);
        } else if id == Self::ATTACK.id() {
            self.attack_ms = Self::ATTACK.clamp_value(value);
        } else if id == Self::RELEASE.id() {
            self.release_ms = Self::RELEASE.clamp_value(value);
        } else if id == Self::KILL_ON_RETRIGGER.id() {
            self.kill_on_retrigger = Self::KILL_ON_RETRIGGER.value_to_bool(value);
        } else if id == Self::NEW_VOICE_ON_RETRIGGER.id() {
            self.new_voice_on_retrigger = Self::NEW_VOICE_ON_RETRIGGER.value_to_bool(value);
        } else {
            return false;
        }
        true
    }

    /// Get a parameter's plain value. Returns `None` when the id is unknown.
    pub fn get(&self, id: FourCC) -> Option<f32> {
        if id == Self::GAIN.id() {
            Some(self.gain)
        } else if id == Self::GRAIN_SIZE.id() {
            Some(self.grain_size_ms)
        } else if id == Self::DENSITY.id() {
            Some(self.density)
        } else if id == Self::POSITION.id() {
            Some(self.position * 100.0)
        } else if id == Self::SPRAY.id() {
            Some(self.spray * 100.0)
        } else if id == Self::PITCH.id() {
            Some(self.pitch)
        } else if id == Self::RANDOM_PITCH.id() {
            Some(self.random_pitch)
        } else if id == Self::PITCH_ENV_AMOUNT.id() {
            Some(self.pitch_env_amount)
        } else if id == Self::PITCH_ENV_DECAY.id() {
            Some(self.pitch_env_decay_ms)
        } else if id == Self::ATTACK.id() {
            Some(self.attack_ms)
        } else if id == Self::RELEASE.id() {
            Some(self.release_ms)
        } else if id == Self::KILL_ON_RETRIGGER.id() {
            Some(if self.kill_on_retrigger { 1.0 } else { 0.0 })
        } else if id == Self::NEW_VOICE_ON_RETRIGGER.id() {
            Some(if self.new_voice_on_retrigger { 1.0 } else { 0.0 })
        } else {
            None
        }
    }

    #[inline(always)]
    pub fn gain(&self) -> f32 {
        self.gain
    }

    #[inline(always)]
    pub fn grain_size_ms(&self) -> f32 {
        self.grain_size_ms
    }

    #[inline(always)]
    pub fn density(&self) -> f32 {
        self.density
    }

    /// Normalized grain spawn position (0 - 1).
    #[inline(always)]
    pub fn position(&self) -> f32 {
        self.position
    }

    /// Normalized spawn position and pan randomization (0 - 1).
    #[inline(always)]
    pub fn spray(&self) -> f32 {
        self.spray
    }

    #[inline(always)]
    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    #[inline(always)]
    pub fn random_pitch(&self) -> f32 {
        self.random_pitch
    }

    #[inline(always)]
    pub fn pitch_env_amount(&self) -> f32 {
        self.pitch_env_amount
    }

    #[inline(always)]
    pub fn pitch_env_decay_ms(&self) -> f32 {
        self.pitch_env_decay_ms
    }

    #[inline(always)]
    pub fn attack_ms(&self) -> f32 {
        self.attack_ms
    }

    #[inline(always)]
    pub fn release_ms(&self) -> f32 {
        self.release_ms
    }

    #[inline(always)]
    pub fn kill_on_retrigger(&self) -> bool {
        self.kill_on_retrigger
    }

    #[inline(always)]
    pub fn new_voice_on_retrigger(&self) -> bool {
        self.new_voice_on_retrigger
    }
}

impl Default for GranularParameters {
    fn default() -> Self {
        Self {
            gain: Self::GAIN.default_value(),
            grain_size_ms: Self::GRAIN_SIZE.default_value(),
            density: Self::DENSITY.default_value(),
            position: Self::POSITION.default_value() / 100.0,
            spray: Self::SPRAY.default_value() / 100.0,
            pitch: Self::PITCH.default_value(),
            random_pitch: Self::RANDOM_PITCH.default_value(),
            pitch_env_amount: Self::PITCH_ENV_AMOUNT.default_value(),
            pitch_env_decay_ms: Self::PITCH_ENV_DECAY.default_value(),
            attack_ms: Self::ATTACK.default_value(),
            release_ms: Self::RELEASE.default_value(),
            kill_on_retrigger: false,
            new_voice_on_retrigger: false,
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_clamps_out_of_range_values() {
        let mut parameters = GranularParameters::default();

        assert!(parameters.set(GranularParameters::GAIN.id(), 2.0));
        assert_eq!(parameters.gain(), 1.0);
        assert!(parameters.set(GranularParameters::GAIN.id(), -1.0));
        assert_eq!(parameters.gain(), 0.0);

        assert!(parameters.set(GranularParameters::PITCH.id(), -100.0));
        assert_eq!(parameters.pitch(), -24.0);

        assert!(parameters.set(GranularParameters::RELEASE.id(), 0.0));
        assert_eq!(parameters.release_ms(), 5.0);
    }

    #[test]
    fn percent_parameters_are_stored_normalized() {
        let mut parameters = GranularParameters::default();

        assert!(parameters.set(GranularParameters::POSITION.id(), 25.0));
        assert_eq!(parameters.position(), 0.25);
        assert_eq!(
            parameters.get(GranularParameters::POSITION.id()),
            Some(25.0)
        );

        assert!(parameters.set(GranularParameters::SPRAY.id(), 150.0));
        assert_eq!(parameters.spray(), 1.0);
    }

    #[test]
    fn boolean_parameters() {
        let mut parameters = GranularParameters::default();
        assert!(!parameters.kill_on_retrigger());

        assert!(parameters.set(GranularParameters::KILL_ON_RETRIGGER.id(), 1.0));
        assert!(parameters.kill_on_retrigger());
        assert!(parameters.set(GranularParameters::KILL_ON_RETRIGGER.id(), 0.4));
        assert!(!parameters.kill_on_retrigger());
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let mut parameters = GranularParameters::default();
        assert!(!parameters.set(FourCC(*b"????"), 1.0));
        assert!(parameters.get(FourCC(*b"????")).is_none());
    }

    #[test]
    fn descriptor_defaults_are_in_range() {
        for descriptor in GranularParameters::descriptors() {
            assert!(descriptor.range().contains(&descriptor.default_value()));
        }
    }
}
