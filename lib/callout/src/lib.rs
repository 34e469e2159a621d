// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A cooperative callout scheduler.
//!
//! `Scheduler` multiplexes a single tick source into a fixed number of
//! one-shot timers ("callouts"), each identified by a caller-chosen handle.
//! Nothing here runs from interrupt context: the owner feeds elapsed ticks in
//! with [`Scheduler::tick`] or [`Scheduler::advance`] and fires due entries
//! from its main loop.
//!
//! The expected usage model is:
//!
//! - Pick a `Copy + Eq` key type naming the things you time out (a channel, a
//!   message handle, a housekeeping job).
//!
//! - Pick a `Copy` callback type, usually a tagged enum saying what to do on
//!   expiry.
//!
//! - `add` a callout; `remove` it when the guarded step completes, or `reset`
//!   it when the step makes progress.
//!
//! - Call [`Scheduler::process`] (or the two-phase `take_due` / `retire`) from
//!   the main loop. Each call fires at most one entry.
//!
//! At most one active entry may exist per handle. Callers that want to re-arm
//! a handle should `remove` it before `add`ing it again; `add` does not check.

#![cfg_attr(not(test), no_std)]

/// Scheduler errors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CalloutError {
    /// Every entry in the table is in use.
    OutOfMemory,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EntryState {
    Free,
    Active,
    /// Taken by `take_due` and being run by the owner.
    Pending,
}

#[derive(Copy, Clone, Debug)]
struct Entry<K, C> {
    state: EntryState,
    expire: u64,
    handle: Option<K>,
    callback: Option<C>,
}

impl<K, C> Entry<K, C> {
    const FREE: Self = Self {
        state: EntryState::Free,
        expire: 0,
        handle: None,
        callback: None,
    };
}

/// An entry that has come due and been taken out of the active set.
///
/// This is deliberately not `Copy`: it must be handed back to
/// [`Scheduler::retire`] exactly once.
#[derive(Debug)]
#[must_use]
pub struct Due<K, C> {
    slot: usize,
    pub handle: K,
    pub callback: C,
}

pub struct Scheduler<K, C, const N: usize> {
    now: u64,
    entries: [Entry<K, C>; N],
}

impl<K: Copy + Eq, C: Copy, const N: usize> Default for Scheduler<K, C, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + Eq, C: Copy, const N: usize> Scheduler<K, C, N> {
    pub const fn new() -> Self {
        Self {
            now: 0,
            entries: [Entry::FREE; N],
        }
    }

    /// Current scheduler time, in ticks.
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn tick(&mut self) {
        self.advance(1);
    }

    /// Moves time forward by `ticks`. Entries that come due are not fired
    /// here; they wait for `process`.
    pub fn advance(&mut self, ticks: u64) {
        self.now = self.now.saturating_add(ticks);
    }

    /// Schedules `callback` to fire `delay` ticks from now under `handle`.
    pub fn add(
        &mut self,
        handle: K,
        delay: u64,
        callback: C,
    ) -> Result<(), CalloutError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.state == EntryState::Free)
            .ok_or(CalloutError::OutOfMemory)?;

        *entry = Entry {
            state: EntryState::Active,
            expire: self.now.saturating_add(delay),
            handle: Some(handle),
            callback: Some(callback),
        };
        Ok(())
    }

    fn find_active(&mut self, handle: K) -> Option<&mut Entry<K, C>> {
        self.entries
            .iter_mut()
            .find(|e| e.state == EntryState::Active && e.handle == Some(handle))
    }

    /// Cancels the active callout for `handle`. Returns `false` if there was
    /// none, which is not an error: the callout may already have fired.
    pub fn remove(&mut self, handle: K) -> bool {
        match self.find_active(handle) {
            Some(e) => {
                *e = Entry::FREE;
                true
            }
            None => false,
        }
    }

    /// Pushes the expiry of the active callout for `handle` out to `delay`
    /// ticks from now, keeping its callback.
    pub fn reset(&mut self, handle: K, delay: u64) -> bool {
        let now = self.now;
        match self.find_active(handle) {
            Some(e) => {
                e.expire = now.saturating_add(delay);
                true
            }
            None => false,
        }
    }

    /// Ticks until the callout for `handle` fires; zero if it is absent or
    /// already due.
    pub fn expiration_remaining(&self, handle: K) -> u64 {
        self.entries
            .iter()
            .find(|e| e.state == EntryState::Active && e.handle == Some(handle))
            .map(|e| e.expire.saturating_sub(self.now))
            .unwrap_or(0)
    }

    pub fn is_active(&self, handle: K) -> bool {
        self.entries
            .iter()
            .any(|e| e.state == EntryState::Active && e.handle == Some(handle))
    }

    /// Number of entries not free.
    pub fn active(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.state != EntryState::Free)
            .count()
    }

    /// Takes the earliest due entry, if any, marking it pending. Ties go to
    /// the lowest slot.
    pub fn take_due(&mut self) -> Option<Due<K, C>> {
        let now = self.now;
        let (slot, entry) = self
            .entries
            .iter_mut()
            .enumerate()
            .filter(|(_, e)| e.state == EntryState::Active && e.expire <= now)
            // min_by_key keeps the first of equal keys.
            .min_by_key(|(_, e)| e.expire)?;

        let (handle, callback) = (entry.handle?, entry.callback?);
        entry.state = EntryState::Pending;
        Some(Due {
            slot,
            handle,
            callback,
        })
    }

    /// Frees the slot behind a `Due` taken earlier.
    pub fn retire(&mut self, due: Due<K, C>) {
        if let Some(e) = self.entries.get_mut(due.slot) {
            if e.state == EntryState::Pending {
                *e = Entry::FREE;
            }
        }
    }

    /// Fires at most one due callout. Returns `true` if one fired.
    pub fn process(&mut self, f: impl FnOnce(K, C)) -> bool {
        match self.take_due() {
            Some(due) => {
                f(due.handle, due.callback);
                self.retire(due);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    enum Key {
        A,
        B,
        C,
    }

    type Uut = Scheduler<Key, u32, 4>;

    fn drain(uut: &mut Uut) -> Vec<(Key, u32)> {
        let mut fired = vec![];
        while uut.process(|k, c| fired.push((k, c))) {}
        fired
    }

    #[test]
    fn nothing_fires_early() {
        let mut uut = Uut::new();
        uut.add(Key::A, 10, 1).unwrap();

        uut.advance(9);
        assert!(drain(&mut uut).is_empty());
        assert_eq!(uut.expiration_remaining(Key::A), 1);

        uut.tick();
        assert_eq!(drain(&mut uut), [(Key::A, 1)]);
    }

    #[test]
    fn fires_exactly_once() {
        let mut uut = Uut::new();
        uut.add(Key::A, 0, 7).unwrap();

        assert_eq!(drain(&mut uut), [(Key::A, 7)]);
        uut.advance(1000);
        assert!(drain(&mut uut).is_empty());
        assert_eq!(uut.active(), 0);
        assert!(!uut.is_active(Key::A));
    }

    #[test]
    fn removed_before_expiry_never_fires() {
        let mut uut = Uut::new();
        uut.add(Key::A, 5, 1).unwrap();
        assert!(uut.remove(Key::A));
        assert!(!uut.remove(Key::A));

        uut.advance(100);
        assert!(drain(&mut uut).is_empty());
    }

    #[test]
    fn reset_pushes_out_without_duplicating() {
        let mut uut = Uut::new();
        uut.add(Key::A, 5, 1).unwrap();

        uut.advance(4);
        assert!(uut.reset(Key::A, 5));
        assert_eq!(uut.active(), 1);

        uut.advance(4);
        assert!(drain(&mut uut).is_empty());
        uut.advance(1);
        assert_eq!(drain(&mut uut), [(Key::A, 1)]);

        assert!(!uut.reset(Key::A, 5));
    }

    #[test]
    fn one_per_process_earliest_first() {
        let mut uut = Uut::new();
        uut.add(Key::A, 30, 1).unwrap();
        uut.add(Key::B, 10, 2).unwrap();
        uut.add(Key::C, 20, 3).unwrap();
        uut.advance(50);

        let mut fired = vec![];
        assert!(uut.process(|k, _| fired.push(k)));
        assert_eq!(fired, [Key::B]);
        assert!(uut.process(|k, _| fired.push(k)));
        assert_eq!(fired, [Key::B, Key::C]);
        assert!(uut.process(|k, _| fired.push(k)));
        assert!(!uut.process(|k, _| fired.push(k)));
        assert_eq!(fired, [Key::B, Key::C, Key::A]);
    }

    #[test]
    fn ties_break_by_slot() {
        let mut uut = Uut::new();
        uut.add(Key::C, 10, 1).unwrap();
        uut.add(Key::A, 10, 2).unwrap();
        uut.advance(10);

        assert_eq!(drain(&mut uut), [(Key::C, 1), (Key::A, 2)]);
    }

    #[test]
    fn out_of_memory() {
        let mut uut = Uut::new();
        for i in 0..4 {
            uut.add(Key::A, 100 + i, i as u32).unwrap();
        }
        assert_eq!(uut.add(Key::B, 1, 0), Err(CalloutError::OutOfMemory));

        // Freeing a slot makes room again.
        assert!(uut.remove(Key::A));
        uut.add(Key::B, 1, 0).unwrap();
    }

    #[test]
    fn rearm_from_pending() {
        let mut uut = Uut::new();
        uut.add(Key::A, 1, 1).unwrap();
        uut.tick();

        let due = uut.take_due().unwrap();
        assert_eq!(due.handle, Key::A);
        // While pending the entry is neither active nor removable.
        assert!(!uut.is_active(Key::A));
        assert!(!uut.remove(Key::A));

        // The owner re-arms the same handle before retiring.
        uut.add(Key::A, 5, 2).unwrap();
        uut.retire(due);

        assert!(uut.is_active(Key::A));
        assert_eq!(uut.expiration_remaining(Key::A), 5);
        assert_eq!(uut.active(), 1);
    }

    #[test]
    fn remaining_is_zero_when_absent_or_due() {
        let mut uut = Uut::new();
        assert_eq!(uut.expiration_remaining(Key::B), 0);
        uut.add(Key::B, 3, 0).unwrap();
        uut.advance(10);
        assert_eq!(uut.expiration_remaining(Key::B), 0);
    }
}
