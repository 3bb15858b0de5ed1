//! A single windowed grain reading from a shared sample buffer.

use std::f32::consts::{FRAC_PI_2, PI};

use assume::assume;

use crate::sample::SampleBuffer;

// -------------------------------------------------------------------------------------------------

/// Catmull-Rom 4-point interpolation at fraction `t` between `y1` and `y2`.
#[inline(always)]
fn catmull_rom(y0: f32, y1: f32, y2: f32, y3: f32, t: f32) -> f32 {
    let a = -0.5 * y0 + 1.5 * y1 - 1.5 * y2 + 0.5 * y3;
    let b = y0 - 2.5 * y1 + 2.0 * y2 - 0.5 * y3;
    let c = -0.5 * y0 + 0.5 * y2;
    a * t * t * t + b * t * t + c * t + y1
}

// -------------------------------------------------------------------------------------------------

/// A short, Hann-windowed burst of sample playback with its own position, playback
/// rate and stereo placement.
///
/// Grains live in fixed pools inside voices and get recycled instead of reallocated.
/// Playback runs in absolute sample frames at the grain's own rate and stops at the
/// buffer end without wrapping.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Grain {
    /// Is this grain currently playing?
    active: bool,
    /// Playback position in sample frames.
    position: f64,
    /// Frames to advance per output sample.
    increment: f64,
    /// Samples played so far.
    age: u32,
    /// Total length in output samples.
    duration: u32,
    /// Energy normalization applied on top of the window.
    amplitude: f32,
    /// Constant power left/right gains, fixed at spawn time.
    pan_left: f32,
    pan_right: f32,
    /// Normalized start/end positions in the buffer, kept for visualization.
    start_position: f32,
    end_position: f32,
}

impl Default for Grain {
    fn default() -> Self {
        Self::new()
    }
}

impl Grain {
    /// Create a new inactive grain.
    pub const fn new() -> Self {
        Self {
            active: false,
            position: 0.0,
            increment: 0.0,
            age: 0,
            duration: 0,
            amplitude: 0.0,
            pan_left: 0.0,
            pan_right: 0.0,
            start_position: 0.0,
            end_position: 0.0,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Normalized buffer position where this grain started.
    #[inline]
    pub fn start_position(&self) -> f32 {
        self.start_position
    }

    /// Normalized buffer position where this grain will end.
    #[inline]
    pub fn end_position(&self) -> f32 {
        self.end_position
    }

    /// Grain progress (0.0 at spawn, 1.0 when finished).
    #[inline]
    pub fn progress(&self) -> f32 {
        self.age as f32 / self.duration.max(1) as f32
    }

    /// Current window envelope level, including the energy normalization.
    #[inline]
    pub fn window_level(&self) -> f32 {
        self.window_value() * self.amplitude
    }

    /// Start playback at the given frame position with the given rate and duration.
    ///
    /// `pan` is a 0..=1 stereo placement which gets mapped to constant power
    /// left/right gains. The duration also determines the energy normalization,
    /// so dense clouds of short grains don't get louder than sparse long ones.
    pub fn activate(
        &mut self,
        start_frame: f64,
        increment: f64,
        duration: u32,
        pan: f32,
        frame_count: usize,
    ) {
        let duration = duration.max(1);
        self.active = true;
        self.position = start_frame;
        self.increment = increment;
        self.age = 0;
        self.duration = duration;
        self.amplitude = 1.0 / (duration as f32).sqrt();
        self.pan_left = ((1.0 - pan) * FRAC_PI_2).sin();
        self.pan_right = (pan * FRAC_PI_2).sin();

        let frame_count = frame_count.max(1) as f64;
        self.start_position = (start_frame / frame_count) as f32;
        self.end_position =
            (((start_frame + increment * duration as f64) / frame_count).clamp(0.0, 1.0)) as f32;
    }

    /// Stop playback immediately.
    pub fn deactivate(&mut self) {
        self.active = false;
        self.age = 0;
        self.duration = 0;
    }

    /// Render one stereo sample and advance the grain.
    ///
    /// Deactivates itself when the window has been played through or when
    /// playback runs off the end of the buffer. Must only be called while active.
    #[inline]
    pub fn process(&mut self, sample: &SampleBuffer) -> (f32, f32) {
        #[cfg(not(test))]
        debug_assert!(self.active, "Should only process active grains");

        let frame_count = sample.frame_count();
        let index = self.position as usize;
        if index + 1 >= frame_count {
            self.active = false;
            return (0.0, 0.0);
        }
        let fraction = (self.position - index as f64) as f32;

        // 4-point neighborhood, clamped at the buffer edges.
        let i0 = index.saturating_sub(1);
        let i1 = index;
        let i2 = index + 1;
        let i3 = (index + 2).min(frame_count - 1);

        let left = sample.left();
        let right = sample.right();
        assume!(unsafe: left.len() == frame_count && right.len() == frame_count,
            "Channel lengths are validated in the buffer constructor");
        assume!(unsafe: i0 < frame_count);
        assume!(unsafe: i2 < frame_count);
        assume!(unsafe: i3 < frame_count);
        let out_left = catmull_rom(left[i0], left[i1], left[i2], left[i3], fraction);
        let out_right = catmull_rom(right[i0], right[i1], right[i2], right[i3], fraction);

        let gain = self.window_value() * self.amplitude;

        // Advance to the next sample.
        self.position += self.increment;
        self.age += 1;
        if self.age >= self.duration {
            self.active = false;
        }

        (
            out_left * gain * self.pan_left,
            out_right * gain * self.pan_right,
        )
    }

    /// Hann window value at the grain's current age.
    #[inline]
    fn window_value(&self) -> f32 {
        let phase = self.age as f32 / (self.duration.saturating_sub(1)).max(1) as f32;
        0.5 * (1.0 - (2.0 * PI * phase).cos())
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ones_buffer(frames: usize) -> SampleBuffer {
        SampleBuffer::new(vec![1.0; frames], vec![1.0; frames], 44100, String::new()).unwrap()
    }

    #[test]
    fn window_is_hann_shaped() {
        let sample = ones_buffer(1000);
        let mut grain = Grain::new();
        grain.activate(0.0, 1.0, 101, 0.5, sample.frame_count());

        // Hann: silent at the edges, peaks in the middle.
        let mut rendered = Vec::new();
        while grain.is_active() {
            let (left, _) = grain.process(&sample);
            rendered.push(left);
        }
        assert_eq!(rendered.len(), 101);
        assert!(rendered[0].abs() < 1e-6);
        let peak_index = rendered
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        assert_eq!(peak_index, 50);

        // Peak carries the 1/sqrt(duration) energy normalization and the center pan gain.
        let expected_peak = 1.0 / (101.0_f32).sqrt() * (0.5_f32).sqrt();
        assert!((rendered[50] - expected_peak).abs() < 1e-5);
    }

    #[test]
    fn deactivates_at_buffer_end_without_wrapping() {
        let sample = ones_buffer(16);
        let mut grain = Grain::new();
        // Long duration, playback runs off the buffer end first.
        grain.activate(12.0, 1.0, 1000, 0.5, sample.frame_count());

        let mut rendered = 0;
        while grain.is_active() {
            grain.process(&sample);
            rendered += 1;
            assert!(rendered <= 16);
        }
        // Frames 12, 13, 14 are renderable, index 15 has no next neighbor.
        assert_eq!(rendered, 4);
    }

    #[test]
    fn constant_power_panning() {
        let sample = ones_buffer(1000);

        let mut center = Grain::new();
        center.activate(0.0, 1.0, 100, 0.5, sample.frame_count());
        assert!((center.pan_left - center.pan_right).abs() < 1e-6);
        assert!((center.pan_left - (0.5_f32).sqrt()).abs() < 1e-6);

        let mut hard_left = Grain::new();
        hard_left.activate(0.0, 1.0, 100, 0.0, sample.frame_count());
        assert!((hard_left.pan_left - 1.0).abs() < 1e-6);
        assert!(hard_left.pan_right.abs() < 1e-6);

        let mut hard_right = Grain::new();
        hard_right.activate(0.0, 1.0, 100, 1.0, sample.frame_count());
        assert!(hard_right.pan_left.abs() < 1e-6);
        assert!((hard_right.pan_right - 1.0).abs() < 1e-6);
    }

    #[test]
    fn interpolation_is_exact_on_linear_ramps() {
        // Catmull-Rom reproduces straight lines exactly, away from the edges.
        let frames: Vec<f32> = (0..100).map(|i| i as f32 * 0.01).collect();
        let sample =
            SampleBuffer::new(frames.clone(), frames, 44100, String::new()).unwrap();

        let mut grain = Grain::new();
        grain.activate(10.25, 0.5, 8, 0.5, sample.frame_count());
        grain.pan_left = 1.0;
        grain.pan_right = 1.0;
        grain.amplitude = 1.0;
        grain.age = 1;
        grain.duration = 3; // Window value 1.0 at age 1 of an effective length 2.

        let (left, _) = grain.process(&sample);
        assert!((left - 0.1025).abs() < 1e-5);
    }
}
