//! Look-back buffer for fragment text that has not been classified yet.
//!
//! Fragments are appended whole. The classifier then either consumes a
//! complete marker from the front or settles the buffer: everything before
//! the first position that could still start a marker is released, and only
//! that possible marker prefix is kept. A kept prefix is always shorter than
//! [`MAX_MARKER_LEN`], so the buffer cannot grow without bound on malformed
//! input.

use crate::markers::MAX_MARKER_LEN;

#[derive(Debug, Default)]
pub(crate) struct FragmentBuffer {
    pending: String,
}

impl FragmentBuffer {
    pub(crate) fn append(&mut self, fragment: &str) {
        self.pending.push_str(fragment);
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.pending
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    /// Removes and returns the first `len` bytes.
    pub(crate) fn take_prefix(&mut self, len: usize) -> String {
        self.pending.drain(..len).collect()
    }

    pub(crate) fn discard_prefix(&mut self, len: usize) {
        self.pending.drain(..len);
    }

    /// Releases everything before `keep_from` and retains the rest, which
    /// must be a possible marker prefix.
    pub(crate) fn settle(&mut self, keep_from: usize) -> String {
        let released = self.take_prefix(keep_from);
        debug_assert!(
            self.pending.len() < MAX_MARKER_LEN,
            "look-back buffer exceeded the marker bound: {} bytes",
            self.pending.len()
        );
        released
    }

    pub(crate) fn take_all(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }
}
