// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! IPMB transport over a pair of status-code driven I2C controllers.
//!
//! The controllers this targets (the classic LPC/8xC552 lineage) report every
//! bus event as a one-byte status code and hold SCL low until software
//! clears SI. The interrupt handler only captures `(status, data)` and queues
//! it; the main loop feeds each capture to [`Channel::on_status`], which
//! advances the channel's state machine and writes the control bits that
//! release the bus.
//!
//! A channel acts as a slave whenever it is idle, and becomes a master when
//! the engine hands it a queued message context with [`Channel::start`].

#![cfg_attr(not(test), no_std)]

use bitflags::bitflags;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

use workset::{ChannelId, WsHandle};

mod channel;
mod select;

pub use channel::{Channel, StartError, Trace};
pub use select::{ChannelPolicy, Selector};

/// Byte clocked out when a master reads from us; we have nothing to say.
pub const FILLER: u8 = 0xFF;

/// Controller status codes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum Status {
    BusError = 0x00,
    Start = 0x08,
    RepeatedStart = 0x10,
    SlaWriteAck = 0x18,
    SlaWriteNak = 0x20,
    DataSentAck = 0x28,
    DataSentNak = 0x30,
    ArbitrationLost = 0x38,
    SlaReadAck = 0x40,
    SlaReadNak = 0x48,
    DataReceivedAck = 0x50,
    DataReceivedNak = 0x58,
    OwnSlaWriteAck = 0x60,
    ArbLostOwnSlaWrite = 0x68,
    GeneralCall = 0x70,
    ArbLostGeneralCall = 0x78,
    SlaveDataAck = 0x80,
    SlaveDataNak = 0x88,
    GeneralCallDataAck = 0x90,
    GeneralCallDataNak = 0x98,
    /// STOP or repeated START while addressed as a slave.
    StopOrRepeatedStart = 0xA0,
    OwnSlaReadAck = 0xA8,
    ArbLostOwnSlaRead = 0xB0,
    SlaveDataSentAck = 0xB8,
    SlaveDataSentNak = 0xC0,
    LastByteSentAck = 0xC8,
    NoInfo = 0xF8,
}

impl Status {
    pub fn from_raw(raw: u8) -> Option<Self> {
        Self::from_u8(raw)
    }
}

bitflags! {
    /// Controller control register bits.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct Control: u8 {
        /// Assert acknowledge.
        const AA = 0x04;
        /// Interrupt flag; the bus is held until software clears it.
        const SI = 0x08;
        const STO = 0x10;
        const STA = 0x20;
        const I2EN = 0x40;
    }
}

/// Register access for one controller, provided by the board.
pub trait I2cRegisters {
    fn set(&mut self, bits: Control);
    fn clear(&mut self, bits: Control);
    fn write_data(&mut self, byte: u8);
    fn set_own_address(&mut self, addr: u8, general_call: bool);
}

/// The per-transition watchdog a channel keeps armed while it is busy.
pub trait TransitionTimer {
    /// Arms (or re-arms) the channel's timer to expire `ticks` from now.
    fn arm(&mut self, channel: ChannelId, ticks: u64);
    fn disarm(&mut self, channel: ChannelId);
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Op {
    IdleSlave,
    MasterTransmit,
    MasterReceive,
    SlaveReceive,
    SlaveTransmit,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum State {
    Idle,
    /// START requested, not yet on the bus.
    Starting,
    /// The last status handled.
    After(Status),
}

/// How a master operation ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransportStatus {
    Success,
    ArbitrationLost,
    Nak,
    Timeout,
    /// The controller reported a status that makes no sense for the
    /// operation in progress.
    StateTransition,
    BusError,
    NoResources,
}

impl TransportStatus {
    /// Every failure is worth another attempt; the caller bounds how many.
    pub fn is_retryable(self) -> bool {
        self != Self::Success
    }
}

/// What the engine needs to hear about after a status is handled.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Event {
    /// A complete frame is now `ActiveIn`.
    Received(WsHandle),
    /// A master operation finished.
    Done(WsHandle, TransportStatus),
}
