// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The boundary between interrupt handlers and the main loop.
//!
//! Interrupt handlers never touch the message pool or the scheduler. The I2C
//! handler captures the controller's status and data registers into an
//! [`I2cEvent`] and enqueues it; the timer handler bumps a [`Ticker`]. Both
//! are single-producer, so neither needs a critical section or
//! compare-and-swap.
//!
//! The controller holds SCL low until SI is cleared, which only the main loop
//! does, so each channel has at most one event outstanding. The board's
//! handler should mask the channel's interrupt after capturing, and unmask it
//! when its `I2cRegisters::clear` implementation clears SI.

use core::sync::atomic::{AtomicU32, Ordering};

use heapless::spsc::{Producer, Queue};
use workset::ChannelId;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct I2cEvent {
    pub channel: ChannelId,
    pub status: u8,
    pub data: u8,
}

/// Holds `N - 1` events.
pub type EventQueue<const N: usize> = Queue<I2cEvent, N>;

/// Interrupt-side capture. Returns `false` if the queue was full and the
/// event was lost; the channel's transition timeout will recover it.
pub fn capture<const N: usize>(
    tx: &mut Producer<'_, I2cEvent, N>,
    channel: ChannelId,
    status: u8,
    data: u8,
) -> bool {
    tx.enqueue(I2cEvent {
        channel,
        status,
        data,
    })
    .is_ok()
}

/// A tick counter written by one interrupt handler and read by the main
/// loop.
pub struct Ticker {
    count: AtomicU32,
}

impl Default for Ticker {
    fn default() -> Self {
        Self::new()
    }
}

impl Ticker {
    pub const fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
        }
    }

    /// Called from the tick interrupt only.
    pub fn tick(&self) {
        // Sole writer: load and store is enough.
        let n = self.count.load(Ordering::Relaxed);
        self.count.store(n.wrapping_add(1), Ordering::Relaxed);
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticker_wraps() {
        let t = Ticker::new();
        t.count.store(u32::MAX, Ordering::Relaxed);
        t.tick();
        assert_eq!(t.count(), 0);
        assert_eq!(t.count().wrapping_sub(u32::MAX), 1);
    }

    #[test]
    fn capture_reports_overrun() {
        let mut q: EventQueue<3> = Queue::new();
        let (mut tx, mut rx) = q.split();
        assert!(capture(&mut tx, ChannelId::A, 0x60, 0x20));
        assert!(capture(&mut tx, ChannelId::B, 0x08, 0));
        assert!(!capture(&mut tx, ChannelId::A, 0x80, 1));

        assert_eq!(
            rx.dequeue(),
            Some(I2cEvent {
                channel: ChannelId::A,
                status: 0x60,
                data: 0x20
            })
        );
    }
}
