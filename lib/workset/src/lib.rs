// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The working set: a fixed pool of message contexts.
//!
//! Every IPMB exchange in flight, inbound or outbound, lives in one
//! [`MessageContext`]. A context is owned by whichever component its
//! [`WsState`] says (the I2C channel while a transfer is on the wire, the
//! dispatcher while a request awaits handling, the scheduler while a request
//! awaits its response) and ownership moves only by changing state.
//!
//! Contexts are named by [`WsHandle`], an index plus a generation. Releasing a
//! context bumps its generation, so a handle kept past release (for example
//! the back-reference from a bridged request to its origin) simply stops
//! resolving instead of aliasing whatever reuses the slot.
//!
//! Only main-loop code touches the pool; interrupt handlers talk to the main
//! loop through a queue, so nothing here needs a critical section.

#![cfg_attr(not(test), no_std)]

use bitflags::bitflags;
use ipmi_types::{CompletionCode, MSG_BUF_LEN};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WsState {
    Free,
    /// Allocated and being filled, either by the caller or by a slave receive
    /// in progress.
    Pending,
    /// Holds a complete inbound frame waiting for dispatch.
    ActiveIn,
    /// A handler deferred its response; the context waits for it.
    ActiveInPending,
    /// Queued for master transmit.
    ActiveMasterWrite,
    /// Owned by a channel, on the wire.
    ActiveMasterWritePending,
    /// Request sent; waiting for the response with our sequence number.
    ActiveMasterWriteSuccess,
    /// Queued for a raw master receive.
    ActiveMasterRead,
    ActiveMasterReadPending,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChannelId {
    A,
    B,
}

impl ChannelId {
    pub const ALL: [Self; 2] = [Self::A, Self::B];

    pub fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }

    pub fn from_index(i: u8) -> Option<Self> {
        match i {
            0 => Some(Self::A),
            1 => Some(Self::B),
            _ => None,
        }
    }

    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

/// Which bus channel a master operation goes out on.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChannelSelect {
    /// Let the channel policy pick.
    Auto,
    Fixed(ChannelId),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Protocol {
    Ipmb,
    /// Unframed bytes, as for a raw device read.
    Raw,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Medium {
    I2c(ChannelSelect),
    /// Delivered back into this controller's own inbound path.
    Loopback,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Route {
    pub protocol: Protocol,
    pub medium: Medium,
}

impl Route {
    pub const DEFAULT: Self = Self {
        protocol: Protocol::Ipmb,
        medium: Medium::I2c(ChannelSelect::Auto),
    };

    pub const fn ipmb(medium: Medium) -> Self {
        Self {
            protocol: Protocol::Ipmb,
            medium,
        }
    }

    /// The fixed channel this route names, if any.
    pub fn channel(&self) -> Option<ChannelId> {
        match self.medium {
            Medium::I2c(ChannelSelect::Fixed(ch)) => Some(ch),
            _ => None,
        }
    }
}

/// What to do with a context once its transport step succeeds.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransportCallback {
    /// Nothing further is expected (e.g. a response we sent); free it.
    Release,
    /// A request went out; wait for the correlated response.
    AwaitResponse,
    /// Raw read data is ready; hand it to the IPMI callback.
    Deliver,
}

/// The outcome of an outbound exchange, as seen by whoever asked for it.
#[derive(Copy, Clone, Debug)]
pub struct Completion<'a> {
    /// The sequence number the request went out with; `None` for raw reads.
    pub seq: Option<u8>,
    pub code: CompletionCode,
    /// Response data after the completion code, or the bytes read.
    pub data: &'a [u8],
}

pub type ClientFn = fn(&Completion<'_>);

/// Who learns about the outcome of an outbound exchange.
#[derive(Copy, Clone, Debug)]
pub enum IpmiCallback {
    Discard,
    /// Relay the result to the context in `bridged`.
    Relay,
    Client(ClientFn),
}

bitflags! {
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct WsFlags: u8 {
        /// Inbound frame arrived via the general call address.
        const GENERAL_CALL = 1 << 0;
        /// Follow the write with a repeated start rather than a stop.
        const REPEATED_START = 1 << 1;
        /// Inbound frame did not fit the buffer.
        const OVERFLOW = 1 << 2;
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WsHandle {
    index: u8,
    generation: u16,
}

impl WsHandle {
    pub fn index(self) -> usize {
        usize::from(self.index)
    }
}

/// No free context.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Exhausted;

/// A buffer was already full.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Overflow;

pub struct MessageContext {
    pub incoming: Route,
    pub outgoing: Route,
    /// Target of a raw master operation.
    pub addr_out: u8,

    pub inbuf: [u8; MSG_BUF_LEN],
    pub len_in: usize,

    /// Outbound frame, responder address byte first.
    pub outbuf: [u8; MSG_BUF_LEN],
    pub len_out: usize,
    pub len_sent: usize,
    /// Bytes requested by a raw master read.
    pub len_read: usize,

    pub seq_out: u8,
    /// The inbound request this outbound one was bridged from.
    pub bridged: Option<WsHandle>,

    pub transport_done: TransportCallback,
    pub ipmi_done: IpmiCallback,
    /// Transmissions so far, including the one in flight.
    pub attempts: u8,
    pub flags: WsFlags,
}

impl MessageContext {
    pub const EMPTY: Self = Self {
        incoming: Route::DEFAULT,
        outgoing: Route::DEFAULT,
        addr_out: 0,
        inbuf: [0; MSG_BUF_LEN],
        len_in: 0,
        outbuf: [0; MSG_BUF_LEN],
        len_out: 0,
        len_sent: 0,
        len_read: 0,
        seq_out: 0,
        bridged: None,
        transport_done: TransportCallback::Release,
        ipmi_done: IpmiCallback::Discard,
        attempts: 0,
        flags: WsFlags::empty(),
    };

    /// Appends a received byte. On overflow the byte is dropped and the
    /// context is flagged.
    pub fn push_in(&mut self, b: u8) -> Result<(), Overflow> {
        match self.inbuf.get_mut(self.len_in) {
            Some(slot) => {
                *slot = b;
                self.len_in += 1;
                Ok(())
            }
            None => {
                self.flags |= WsFlags::OVERFLOW;
                Err(Overflow)
            }
        }
    }

    pub fn has_room(&self) -> bool {
        self.len_in < MSG_BUF_LEN
    }

    /// The next byte to transmit, advancing the cursor.
    pub fn next_out(&mut self) -> Option<u8> {
        if self.len_sent < self.len_out {
            let b = self.outbuf[self.len_sent];
            self.len_sent += 1;
            Some(b)
        } else {
            None
        }
    }

    pub fn inbound(&self) -> &[u8] {
        &self.inbuf[..self.len_in]
    }

    pub fn outbound(&self) -> &[u8] {
        &self.outbuf[..self.len_out]
    }

    pub fn set_outbound(&mut self, frame: &[u8]) -> Result<(), Overflow> {
        let dst = self.outbuf.get_mut(..frame.len()).ok_or(Overflow)?;
        dst.copy_from_slice(frame);
        self.len_out = frame.len();
        self.len_sent = 0;
        Ok(())
    }
}

struct Slot {
    state: WsState,
    stamp: u64,
    generation: u16,
    ctx: MessageContext,
}

impl Slot {
    const EMPTY: Self = Self {
        state: WsState::Free,
        stamp: 0,
        generation: 0,
        ctx: MessageContext::EMPTY,
    };
}

pub struct WorkSet<const N: usize> {
    slots: [Slot; N],
    clock: u64,
}

impl<const N: usize> Default for WorkSet<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> WorkSet<N> {
    // Handles carry the slot index as a u8.
    const INDEX_FITS: () = assert!(N <= u8::MAX as usize + 1);

    pub const fn new() -> Self {
        let () = Self::INDEX_FITS;
        Self {
            slots: [Slot::EMPTY; N],
            clock: 0,
        }
    }

    fn stamp(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn slot(&self, h: WsHandle) -> Option<&Slot> {
        self.slots
            .get(h.index())
            .filter(|s| s.state != WsState::Free && s.generation == h.generation)
    }

    fn slot_mut(&mut self, h: WsHandle) -> Option<&mut Slot> {
        self.slots
            .get_mut(h.index())
            .filter(|s| s.state != WsState::Free && s.generation == h.generation)
    }

    /// Takes the first free context, cleared and in `Pending`.
    pub fn allocate(&mut self) -> Result<WsHandle, Exhausted> {
        let stamp = self.stamp();
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.state == WsState::Free)
            .ok_or(Exhausted)?;

        slot.ctx = MessageContext::EMPTY;
        slot.state = WsState::Pending;
        slot.stamp = stamp;
        Ok(WsHandle {
            index: index as u8,
            generation: slot.generation,
        })
    }

    /// Returns a context to the pool. Stale handles are ignored.
    pub fn release(&mut self, h: WsHandle) -> bool {
        match self.slot_mut(h) {
            Some(slot) => {
                slot.ctx = MessageContext::EMPTY;
                slot.state = WsState::Free;
                slot.generation = slot.generation.wrapping_add(1);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, h: WsHandle) -> Option<&MessageContext> {
        self.slot(h).map(|s| &s.ctx)
    }

    pub fn get_mut(&mut self, h: WsHandle) -> Option<&mut MessageContext> {
        self.slot_mut(h).map(|s| &mut s.ctx)
    }

    pub fn state(&self, h: WsHandle) -> Option<WsState> {
        self.slot(h).map(|s| s.state)
    }

    /// Moves a context to `state`, putting it at the back of that state's
    /// queue. Use [`WorkSet::release`] rather than setting `Free`.
    pub fn set_state(&mut self, h: WsHandle, state: WsState) -> bool {
        if state == WsState::Free {
            return self.release(h);
        }
        let stamp = self.stamp();
        match self.slot_mut(h) {
            Some(slot) => {
                slot.state = state;
                slot.stamp = stamp;
                true
            }
            None => false,
        }
    }

    fn find_slot(
        &self,
        mut pred: impl FnMut(usize, &Slot) -> bool,
    ) -> Option<WsHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.state != WsState::Free)
            .filter(|(i, s)| pred(*i, s))
            .min_by_key(|(_, s)| s.stamp)
            .map(|(index, s)| WsHandle {
                index: index as u8,
                generation: s.generation,
            })
    }

    /// The oldest in-use context satisfying `pred`.
    pub fn find(
        &self,
        mut pred: impl FnMut(WsState, &MessageContext) -> bool,
    ) -> Option<WsHandle> {
        self.find_slot(|_, s| pred(s.state, &s.ctx))
    }

    /// The context that has been in `state` the longest.
    pub fn oldest(&self, state: WsState) -> Option<WsHandle> {
        self.find(|s, _| s == state)
    }

    /// The sent request waiting on sequence number `seq`, other than
    /// `exclude`.
    pub fn find_by_seq(
        &self,
        seq: u8,
        exclude: Option<WsHandle>,
    ) -> Option<WsHandle> {
        let skip = exclude.map(WsHandle::index);
        self.find_slot(|i, s| {
            Some(i) != skip
                && s.state == WsState::ActiveMasterWriteSuccess
                && s.ctx.seq_out == seq
        })
    }

    pub fn in_use(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state != WsState::Free)
            .count()
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Uut = WorkSet<4>;

    #[test]
    fn exhaustion_and_reuse() {
        let mut uut = Uut::new();
        let hs = (0..4).map(|_| uut.allocate().unwrap()).collect::<Vec<_>>();
        assert_eq!(uut.allocate(), Err(Exhausted));
        assert_eq!(uut.in_use(), 4);

        assert!(uut.release(hs[2]));
        let again = uut.allocate().unwrap();
        assert_eq!(again.index(), hs[2].index());
        assert_ne!(again, hs[2]);
        assert_eq!(uut.state(again), Some(WsState::Pending));
    }

    #[test]
    fn largest_pool_indexes_every_slot() {
        let mut uut = WorkSet::<256>::new();
        let last = (0..256).map(|_| uut.allocate().unwrap()).last().unwrap();
        assert_eq!(last.index(), 255);
        assert_eq!(uut.allocate(), Err(Exhausted));
        assert!(uut.get(last).is_some());
    }

    #[test]
    fn stale_handles_do_not_resolve() {
        let mut uut = Uut::new();
        let h = uut.allocate().unwrap();
        uut.get_mut(h).unwrap().seq_out = 9;

        assert!(uut.release(h));
        assert!(!uut.release(h));
        assert!(uut.get(h).is_none());
        assert!(!uut.set_state(h, WsState::ActiveIn));

        // The reused slot starts clean.
        let h2 = uut.allocate().unwrap();
        assert!(uut.get(h).is_none());
        assert_eq!(uut.get(h2).unwrap().seq_out, 0);
    }

    #[test]
    fn fifo_per_state() {
        let mut uut = Uut::new();
        let a = uut.allocate().unwrap();
        let b = uut.allocate().unwrap();
        let c = uut.allocate().unwrap();

        uut.set_state(b, WsState::ActiveIn);
        uut.set_state(a, WsState::ActiveIn);
        uut.set_state(c, WsState::ActiveMasterWrite);
        assert_eq!(uut.oldest(WsState::ActiveIn), Some(b));
        assert_eq!(uut.oldest(WsState::ActiveMasterWrite), Some(c));

        // Re-stamping moves b to the back.
        uut.set_state(b, WsState::ActiveIn);
        assert_eq!(uut.oldest(WsState::ActiveIn), Some(a));
        assert_eq!(uut.oldest(WsState::ActiveMasterRead), None);
    }

    #[test]
    fn find_by_seq_excludes() {
        let mut uut = Uut::new();
        let req = uut.allocate().unwrap();
        uut.get_mut(req).unwrap().seq_out = 5;
        assert_eq!(uut.find_by_seq(5, None), None);

        uut.set_state(req, WsState::ActiveMasterWriteSuccess);
        assert_eq!(uut.find_by_seq(5, None), Some(req));
        assert_eq!(uut.find_by_seq(6, None), None);
        assert_eq!(uut.find_by_seq(5, Some(req)), None);

        let other = uut.allocate().unwrap();
        assert_eq!(uut.find_by_seq(5, Some(other)), Some(req));
    }

    #[test]
    fn buffers() {
        let mut ctx = MessageContext::EMPTY;
        for i in 0..MSG_BUF_LEN {
            ctx.push_in(i as u8).unwrap();
        }
        assert!(!ctx.has_room());
        assert_eq!(ctx.push_in(0), Err(Overflow));
        assert!(ctx.flags.contains(WsFlags::OVERFLOW));
        assert_eq!(ctx.inbound().len(), MSG_BUF_LEN);

        ctx.set_outbound(&[1, 2]).unwrap();
        assert_eq!(ctx.next_out(), Some(1));
        assert_eq!(ctx.next_out(), Some(2));
        assert_eq!(ctx.next_out(), None);
        assert_eq!(ctx.set_outbound(&[0; MSG_BUF_LEN + 1]), Err(Overflow));
    }
}
