// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring buffers for tracing the IPMC transport core
//!
//! A [`Ringbuf`] records the most recent `N` events of some small `Copy`
//! payload type (in practice, a per-module `Trace` enum), along with the
//! source line that generated each one.  The design center is debugging: the
//! buffers are plain data, so they can be dumped from a debugger on the target
//! or examined directly by host-side tests.
//!
//! Unlike a static ring buffer, a [`Ringbuf`] here is a field of the component
//! it traces: each I2C channel and the engine own their own.  This keeps
//! independent instances (two bus channels, or many engines under test)
//! from interleaving their history.
//!
//! ## Constraints
//!
//! The payload type must implement both `Copy` and `PartialEq`.
//!
//! ## Recording entries
//!
//! ```ignore
//! struct Channel {
//!     trace: Ringbuf<Trace, 32>,
//! }
//!
//! ringbuf_entry!(self.trace, Trace::Start(addr));
//! ```
//!
//! When an entry is generated with a payload identical to the most recent
//! entry (same `line` and same `payload`), the most recent entry's `count` is
//! bumped instead of consuming a new slot, so a spinning condition costs one
//! slot rather than flushing the whole history.
//!
//! ## Inspecting a ring buffer via GDB
//!
//! ```console
//! (gdb) set print pretty on
//! (gdb) print ipmc.channels[0].trace
//! ```
//!
//! `last` is the index of the newest entry; `generation` increments each time
//! a slot is overwritten, which makes it possible to order entries across a
//! wrap.

#![cfg_attr(not(test), no_std)]

///
/// The structure of a single [`Ringbuf`] entry, carrying a payload of arbitrary
/// type.  When a ring buffer entry is generated with an identical payload to
/// the most recent entry (in terms of both `line` and `payload`), `count` will
/// be incremented rather than generating a new entry.
///
#[derive(Debug, Copy, Clone)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

///
/// A ring buffer of parametrized type and size.
///
#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    last: Option<usize>,
    buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, { N }> {
    /// Creates an empty ring buffer whose slots are filled with `init`.
    /// Slots that have never been written have a `count` of zero and are
    /// skipped by [`Ringbuf::iter`].
    pub const fn new(init: T) -> Self {
        Self {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: init,
            }; N],
        }
    }

    pub fn entry(&mut self, line: u16, payload: T) {
        // A `None` for `last` is the never-written case; treat it as an
        // out-of-range index so that the first entry lands in slot 0 and never
        // adds to the count of the placeholder in that slot.
        let last = self.last.unwrap_or(usize::MAX);

        if let Some(ent) = self.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                // Only reuse this entry if we don't overflow the count.
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        // Advance and wrap. This is deliberately not a remainder operation:
        // several of our targets have no hardware divide, and the wrapping_add
        // also takes usize::MAX (the empty case) to 0.
        let ndx = {
            let last_plus_1 = last.wrapping_add(1);
            if last_plus_1 >= self.buffer.len() {
                0
            } else {
                last_plus_1
            }
        };

        let ent = &mut self.buffer[ndx];
        *ent = RingbufEntry {
            line,
            payload,
            count: 1,
            generation: ent.generation.wrapping_add(1),
        };

        self.last = Some(ndx);
    }

    /// Returns the payload of the most recent entry, if any.
    pub fn last(&self) -> Option<T> {
        self.last
            .and_then(|ndx| self.buffer.get(ndx))
            .map(|ent| ent.payload)
    }

    /// Iterates over recorded entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let start = match self.last {
            Some(last) => last + 1,
            None => self.buffer.len(),
        };

        let (newer, older) = self.buffer.split_at(start.min(N));

        older
            .iter()
            .chain(newer.iter())
            .filter(|ent| ent.count != 0)
    }

    /// Returns true if any retained entry carries `payload`.
    pub fn contains(&self, payload: T) -> bool {
        self.iter().any(|ent| ent.payload == payload)
    }
}

/// Inserts data into a ring buffer owned by the caller.
///
/// `ringbuf_entry!(self.trace, expr)` will insert `expr` into the ring buffer
/// `self.trace`, recording the line of the invocation.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate the payload before taking the mutable borrow of the
        // buffer, so that the payload expression may itself read from the
        // structure that owns the buffer.
        let p = $payload;
        $crate::Ringbuf::entry(&mut $buf, line!() as u16, p);
    }};
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let _ = &$buf;
        let _ = &$payload;
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    enum Trace {
        None,
        A(u8),
        B,
    }

    #[test]
    fn empty() {
        let buf = Ringbuf::<Trace, 4>::new(Trace::None);
        assert_eq!(buf.last(), None);
        assert_eq!(buf.iter().count(), 0);
    }

    #[test]
    fn repeated_entries_are_counted() {
        let mut buf = Ringbuf::<Trace, 4>::new(Trace::None);

        buf.entry(10, Trace::B);
        buf.entry(10, Trace::B);
        buf.entry(10, Trace::B);

        let entries = buf.iter().collect::<Vec<_>>();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].count, 3);
        assert_eq!(entries[0].payload, Trace::B);

        // Same payload from a different line is a different event.
        buf.entry(11, Trace::B);
        assert_eq!(buf.iter().count(), 2);
    }

    #[test]
    fn wraps_oldest_first() {
        let mut buf = Ringbuf::<Trace, 3>::new(Trace::None);

        for i in 0..5 {
            buf.entry(1, Trace::A(i));
        }

        let payloads = buf.iter().map(|e| e.payload).collect::<Vec<_>>();
        assert_eq!(payloads, [Trace::A(2), Trace::A(3), Trace::A(4)]);
        assert_eq!(buf.last(), Some(Trace::A(4)));
        assert!(!buf.contains(Trace::A(1)));
    }

    #[test]
    fn macro_records_line() {
        let mut buf = Ringbuf::<Trace, 3>::new(Trace::None);
        ringbuf_entry!(buf, Trace::B);

        let ent = buf.iter().next().unwrap();
        assert_ne!(ent.line, 0);
        assert_eq!(ent.payload, Trace::B);
    }
}
