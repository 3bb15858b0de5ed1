//! Small DSP and MIDI conversion helpers.

pub(crate) mod decoder;

// -------------------------------------------------------------------------------------------------

/// Frequency in Hz of the given MIDI note number (A4 = 69 = 440 Hz).
#[inline]
pub fn midi_note_to_hz(note: u8) -> f64 {
    440.0 * 2.0_f64.powf((note as f64 - 69.0) / 12.0)
}

/// Playback rate multiplier for the given pitch offset in semitones.
#[inline]
pub fn semitones_to_ratio(semitones: f32) -> f64 {
    2.0_f64.powf(semitones as f64 / 12.0)
}

// -------------------------------------------------------------------------------------------------
