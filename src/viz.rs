//! Lock-free visualization snapshots, published from the render thread.
//!
//! A single writer (the engine) and a single reader (the controller) share two
//! fixed-size snapshot cells, each guarded by a sequence counter: the writer fully
//! rewrites the snapshot body and then increments the counter with release ordering,
//! the reader loads the counter with acquire ordering and copies the body only when
//! it changed. A read racing a write may observe a torn body, which is acceptable
//! here: the arrays are fixed size and counts get clamped on read, so a torn
//! snapshot is stale but never structurally invalid.

use std::{
    cell::UnsafeCell,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

// -------------------------------------------------------------------------------------------------

/// Maximum number of grain spawn positions retained per snapshot.
pub const MAX_SPAWN_EVENTS: usize = 64;
/// Maximum number of active grain entries per snapshot.
pub const MAX_ACTIVE_GRAINS: usize = 64;

// -------------------------------------------------------------------------------------------------

/// State of one active grain, as exposed to observers.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ActiveGrainInfo {
    /// Normalized start of the grain's source region.
    pub start: f32,
    /// Normalized end of the grain's source region.
    pub end: f32,
    /// Grain progress (0 at spawn, 1 when finished).
    pub age: f32,
    /// Current audible level (window level scaled by the voice's envelope and velocity).
    pub amplitude: f32,
    /// Index of the voice the grain belongs to.
    pub voice: u32,
}

/// Bounded set of normalized spawn positions accumulated since the last publish.
#[derive(Debug, Clone, Copy)]
pub struct SpawnEvents {
    positions: [f32; MAX_SPAWN_EVENTS],
    count: usize,
}

impl SpawnEvents {
    const fn empty() -> Self {
        Self {
            positions: [0.0; MAX_SPAWN_EVENTS],
            count: 0,
        }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.positions[..self.count.min(MAX_SPAWN_EVENTS)]
    }
}

/// Bounded snapshot of all currently active grains.
#[derive(Debug, Clone, Copy)]
pub struct ActiveGrains {
    grains: [ActiveGrainInfo; MAX_ACTIVE_GRAINS],
    count: usize,
}

impl ActiveGrains {
    const fn empty() -> Self {
        Self {
            grains: [ActiveGrainInfo {
                start: 0.0,
                end: 0.0,
                age: 0.0,
                amplitude: 0.0,
                voice: 0,
            }; MAX_ACTIVE_GRAINS],
            count: 0,
        }
    }

    pub fn as_slice(&self) -> &[ActiveGrainInfo] {
        &self.grains[..self.count.min(MAX_ACTIVE_GRAINS)]
    }
}

// -------------------------------------------------------------------------------------------------

/// A snapshot body paired with its publication sequence counter.
struct SnapshotCell<T> {
    sequence: AtomicU32,
    body: UnsafeCell<T>,
}

// SAFETY: the body is only written by the single VizWriter and only read by the
// single VizReader. Both sides are Copy data; a torn read yields stale values
// but no invalid memory access.
unsafe impl<T: Copy + Send> Sync for SnapshotCell<T> {}

impl<T: Copy> SnapshotCell<T> {
    fn new(initial: T) -> Self {
        Self {
            sequence: AtomicU32::new(0),
            body: UnsafeCell::new(initial),
        }
    }

    /// Writer side: overwrite the body, then publish the new sequence number.
    fn publish(&self, value: T) {
        unsafe { *self.body.get() = value };
        self.sequence.fetch_add(1, Ordering::Release);
    }

    /// Reader side: copy the body when the sequence number moved past `last_seen`.
    fn read(&self, last_seen: &mut u32) -> Option<T> {
        let sequence = self.sequence.load(Ordering::Acquire);
        if sequence == *last_seen {
            return None;
        }
        let value = unsafe { *self.body.get() };
        *last_seen = sequence;
        Some(value)
    }
}

struct VizShared {
    spawns: SnapshotCell<SpawnEvents>,
    grains: SnapshotCell<ActiveGrains>,
}

// -------------------------------------------------------------------------------------------------

/// Create a connected writer/reader pair.
pub(crate) fn channel() -> (VizWriter, VizReader) {
    let shared = Arc::new(VizShared {
        spawns: SnapshotCell::new(SpawnEvents::empty()),
        grains: SnapshotCell::new(ActiveGrains::empty()),
    });
    let writer = VizWriter {
        shared: Arc::clone(&shared),
        pending_spawns: SpawnEvents::empty(),
    };
    let reader = VizReader {
        shared,
        spawn_sequence: 0,
        grain_sequence: 0,
    };
    (writer, reader)
}

// -------------------------------------------------------------------------------------------------

/// Render-thread half: accumulates spawn events and publishes snapshots.
///
/// Deliberately not Clone, there must never be more than one writer.
pub(crate) struct VizWriter {
    shared: Arc<VizShared>,
    pending_spawns: SpawnEvents,
}

impl VizWriter {
    /// Remember a grain spawn position for the next publish. Positions past the
    /// snapshot capacity are dropped.
    #[inline]
    pub fn record_spawn(&mut self, position: f32) {
        if self.pending_spawns.count < MAX_SPAWN_EVENTS {
            self.pending_spawns.positions[self.pending_spawns.count] = position;
            self.pending_spawns.count += 1;
        }
    }

    /// Publish all spawn positions recorded since the last publish and start over.
    pub fn publish_spawns(&mut self) {
        self.shared.spawns.publish(self.pending_spawns);
        self.pending_spawns.count = 0;
    }

    /// Publish the given active grain states wholesale.
    pub fn publish_grains(&mut self, grains: &[ActiveGrainInfo]) {
        let mut snapshot = ActiveGrains::empty();
        let count = grains.len().min(MAX_ACTIVE_GRAINS);
        snapshot.grains[..count].copy_from_slice(&grains[..count]);
        snapshot.count = count;
        self.shared.grains.publish(snapshot);
    }
}

/// Observer-thread half: copies out snapshots when they changed.
pub struct VizReader {
    shared: Arc<VizShared>,
    spawn_sequence: u32,
    grain_sequence: u32,
}

impl VizReader {
    /// Spawn positions published since the last call, or `None` when nothing new
    /// was published.
    pub fn read_spawns(&mut self) -> Option<SpawnEvents> {
        self.shared.spawns.read(&mut self.spawn_sequence)
    }

    /// The latest active grain snapshot, or `None` when it did not change since
    /// the last call.
    pub fn read_grains(&mut self) -> Option<ActiveGrains> {
        self.shared.grains.read(&mut self.grain_sequence)
    }
}

// -------------------------------------------------------------------------------------------------
