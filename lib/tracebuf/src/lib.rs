// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Trace ring buffer for instrumenting drivers.
//!
//! A `TraceBuf` records the last `N` interesting things that happened to a
//! driver, for inspection from a debugger or from tests. Unlike a
//! module-level static, a `TraceBuf` is owned by the recording context
//! (typically a driver control block), so the same code works on hardware
//! and under host tests without any `unsafe` static machinery.
//!
//! The payload type must implement `Copy` and `PartialEq`. Consecutive
//! identical payloads are coalesced into a single entry with a repeat count,
//! so a busy polling loop doesn't immediately evict the interesting entries.
//!
//! ```
//! use tracebuf::TraceBuf;
//!
//! let mut trace: TraceBuf<u32, 16> = TraceBuf::new();
//! trace.record(5);
//! trace.record(5);
//! assert_eq!(trace.last().unwrap().count, 2);
//! ```

#![cfg_attr(not(test), no_std)]

/// One recorded entry: a payload plus the number of consecutive times it was
/// recorded.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TraceEntry<T: Copy + PartialEq> {
    pub count: u32,
    pub payload: T,
}

/// A fixed-capacity ring of trace entries.
#[derive(Debug)]
pub struct TraceBuf<T: Copy + PartialEq, const N: usize> {
    /// Index of the most recently written entry, or `None` if nothing has
    /// been recorded yet.
    last: Option<usize>,
    buffer: [Option<TraceEntry<T>>; N],
}

impl<T: Copy + PartialEq, const N: usize> TraceBuf<T, N> {
    pub const fn new() -> Self {
        Self {
            last: None,
            buffer: [None; N],
        }
    }

    /// Records `payload`, either bumping the repeat count of the most recent
    /// entry (if it carries an equal payload) or writing a new entry over
    /// the oldest one.
    pub fn record(&mut self, payload: T) {
        if let Some(ndx) = self.last {
            if let Some(ent) = &mut self.buffer[ndx] {
                if ent.payload == payload {
                    // Coalesce, unless the count would wrap.
                    if let Some(count) = ent.count.checked_add(1) {
                        ent.count = count;
                        return;
                    }
                }
            }
        }

        let ndx = match self.last {
            Some(ndx) if ndx + 1 < N => ndx + 1,
            _ => 0,
        };
        self.buffer[ndx] = Some(TraceEntry { count: 1, payload });
        self.last = Some(ndx);
    }

    /// Returns the most recently recorded entry.
    pub fn last(&self) -> Option<&TraceEntry<T>> {
        self.buffer[self.last?].as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_none()
    }

    /// Iterates over recorded entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &TraceEntry<T>> + '_ {
        let split = match self.last {
            Some(ndx) => ndx + 1,
            None => 0,
        };
        // Entries after `last` (if the ring has wrapped) are older than
        // entries at or before it.
        self.buffer[split..]
            .iter()
            .chain(self.buffer[..split].iter())
            .filter_map(|e| e.as_ref())
    }
}

impl<T: Copy + PartialEq, const N: usize> Default for TraceBuf<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
