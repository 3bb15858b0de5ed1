//! Fixed-size FIFO of voice indices, one per MIDI note.

use crate::engine::MAX_VOICES;

// -------------------------------------------------------------------------------------------------

/// Ring buffer of voice slot indices which currently play one particular MIDI note.
///
/// Note-ons push the started voice, note-offs pop the oldest one, so retriggered
/// notes release in first-in first-out order. Stolen or finished voices get removed
/// from the middle. All operations are constant-size and allocation free.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NoteQueue {
    slots: [usize; MAX_VOICES],
    head: usize,
    count: usize,
}

impl NoteQueue {
    pub const fn new() -> Self {
        Self {
            slots: [0; MAX_VOICES],
            head: 0,
            count: 0,
        }
    }

    /// Append a voice index. Returns false when the queue is full.
    pub fn push(&mut self, voice_index: usize) -> bool {
        if self.count == MAX_VOICES {
            return false;
        }
        let tail = (self.head + self.count) % MAX_VOICES;
        self.slots[tail] = voice_index;
        self.count += 1;
        true
    }

    /// Remove and return the oldest voice index.
    pub fn pop(&mut self) -> Option<usize> {
        if self.count == 0 {
            return None;
        }
        let voice_index = self.slots[self.head];
        self.head = (self.head + 1) % MAX_VOICES;
        self.count -= 1;
        Some(voice_index)
    }

    /// Remove the given voice index wherever it sits in the queue, keeping the
    /// remaining entries in order. Returns true when an entry was removed.
    pub fn remove(&mut self, voice_index: usize) -> bool {
        for offset in 0..self.count {
            let position = (self.head + offset) % MAX_VOICES;
            if self.slots[position] == voice_index {
                // Shift the entries behind the removed one forward.
                for shift in offset..self.count - 1 {
                    let from = (self.head + shift + 1) % MAX_VOICES;
                    let to = (self.head + shift) % MAX_VOICES;
                    self.slots[to] = self.slots[from];
                }
                self.count -= 1;
                return true;
            }
        }
        false
    }
}

impl Default for NoteQueue {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------------------------------
