// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! IPMI controller core: dual-IPMB transport, request dispatch and bridging.
//!
//! Everything runs from one cooperative loop. Interrupt handlers only
//! capture controller status into an [`EventQueue`] and bump a [`Ticker`];
//! [`Ipmc::run_once`] does the rest:
//!
//! - feeds captured status to the owning channel's state machine,
//! - dispatches the oldest received frame to its command handler, or
//!   matches a response to the request waiting on it,
//! - starts the oldest queued outbound message on a channel,
//! - fires at most one due callout (transition, response and housekeeping
//!   timers).
//!
//! A request for another bus arrives as Send Message; it is re-framed with
//! us as requester, sent on the far channel, and the answer is relayed back
//! to the original requester.

#![cfg_attr(not(test), no_std)]

mod config;
mod dispatch;
mod engine;
mod envelope;
pub mod handlers;
mod isr;
mod seq;

pub use config::{ChannelPolicy, Config, DeviceId, PicmgProperties, BOARD};
pub use dispatch::{
    Command, Handler, Reply, Request, Response, Services, MAX_RESPONSE_DATA,
};
pub use engine::{
    Ipmc, OutboundRequest, TimerAction, TimerKey, Timers, Trace,
    UnsolicitedFn,
};
pub use envelope::Envelope;
pub use handlers::BUILTIN;
pub use isr::{capture, EventQueue, I2cEvent, Ticker};
pub use seq::{SequenceTable, SEQ_COUNT};

/// Message contexts in the pool.
pub const WS_COUNT: usize = 8;

/// Callout slots.
pub const CALLOUT_COUNT: usize = 16;

// Two channel timers, the error reset and its re-arm, and a response timer
// per context.
static_assertions::const_assert!(CALLOUT_COUNT >= 2 + 2 + WS_COUNT);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// No free message context.
    NoResources,
    /// Every sequence number is waiting on a response.
    NoSequence,
    /// The message does not fit a frame.
    TooLong,
    /// The NetFn given is a response NetFn.
    NotARequest,
    /// The handle no longer names the context it did.
    Stale,
}
