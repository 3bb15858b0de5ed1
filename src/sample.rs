//! Immutable sample buffers and their real-time-safe publication.

use std::sync::Mutex;

use basedrop::Shared;

use crate::error::Error;

pub(crate) mod loader;

// -------------------------------------------------------------------------------------------------

/// An immutable, fully decoded stereo sample.
///
/// Buffers are constructed off the real-time path by the sample loader (or directly in tests)
/// and are never mutated afterwards. The render thread shares them via [`Shared`] references,
/// so a buffer is destroyed only after the last holder releases it, and never on the
/// audio thread.
#[derive(Debug)]
pub struct SampleBuffer {
    left: Vec<f32>,
    right: Vec<f32>,
    sample_rate: u32,
    path: String,
}

impl SampleBuffer {
    /// Create a new sample buffer from planar left/right channel data.
    ///
    /// Both channels must have the same length of at least 2 frames and the native
    /// sample rate must be valid.
    pub fn new(
        left: Vec<f32>,
        right: Vec<f32>,
        sample_rate: u32,
        path: String,
    ) -> Result<Self, Error> {
        if left.len() != right.len() {
            return Err(Error::ParameterError(format!(
                "Channel length mismatch: {} vs {}",
                left.len(),
                right.len()
            )));
        }
        if left.len() < 2 {
            return Err(Error::EmptyFile);
        }
        if sample_rate == 0 {
            return Err(Error::ParameterError(
                "Invalid sample rate: 0".to_string(),
            ));
        }
        Ok(Self {
            left,
            right,
            sample_rate,
            path,
        })
    }

    /// Left channel sample data.
    #[inline(always)]
    pub fn left(&self) -> &[f32] {
        &self.left
    }

    /// Right channel sample data.
    #[inline(always)]
    pub fn right(&self) -> &[f32] {
        &self.right
    }

    /// Number of sample frames in each channel.
    #[inline(always)]
    pub fn frame_count(&self) -> usize {
        self.left.len()
    }

    /// The buffer's native sample rate.
    #[inline(always)]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The file path or identifier this buffer was created from.
    pub fn path(&self) -> &str {
        &self.path
    }
}

// -------------------------------------------------------------------------------------------------

/// Holds the currently published [`SampleBuffer`] reference and swaps it atomically.
///
/// The loader thread publishes new buffers; the render thread takes a snapshot reference
/// once per processing block. The mutex is held only for the duration of a reference copy,
/// never while decoding, so the render path blocks for a bounded, tiny amount of time in
/// the worst case and not at all in the common (uncontended) one.
#[derive(Default)]
pub struct SampleStore {
    published: Mutex<Option<Shared<SampleBuffer>>>,
}

impl SampleStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the given buffer as the currently active one.
    pub fn publish(&self, buffer: Shared<SampleBuffer>) {
        let mut published = self.published.lock().expect("Sample store lock poisoned");
        *published = Some(buffer);
    }

    /// Get a reference to the buffer published at this instant, or `None` when no sample
    /// has been loaded yet.
    ///
    /// The returned reference keeps the buffer alive even when a concurrent [`Self::publish`]
    /// replaces it; releasing the reference defers the actual drop to the loader's collector.
    pub fn snapshot(&self) -> Option<Shared<SampleBuffer>> {
        let published = self.published.lock().expect("Sample store lock poisoned");
        published.clone()
    }
}

// -------------------------------------------------------------------------------------------------
