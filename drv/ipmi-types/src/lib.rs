// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common types for IPMI messages carried over IPMB
//!
//! This crate works on both the host and embedded system, so it can be used in
//! host-side tests.

#![cfg_attr(not(test), no_std)]

use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

mod frame;

pub use frame::{
    encode, parse, FrameError, Header, Message, HEADER_LEN, MIN_REQUEST_LEN,
    MIN_RESPONSE_LEN,
};

/// Capacity of a message buffer. Every frame this stack sends or receives,
/// including the leading responder address byte, fits in this many bytes.
pub const MSG_BUF_LEN: usize = 64;

/// Largest data field that fits in a request frame.
pub const MAX_REQUEST_DATA: usize = MSG_BUF_LEN - MIN_REQUEST_LEN;

/// An IPMI network function. Even values are requests; the matching response
/// is always the next odd value.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct NetFn(u8);

impl NetFn {
    pub const CHASSIS: Self = Self(0x00);
    pub const BRIDGE: Self = Self(0x02);
    pub const SENSOR_EVENT: Self = Self(0x04);
    pub const APP: Self = Self(0x06);
    pub const FIRMWARE: Self = Self(0x08);
    pub const STORAGE: Self = Self(0x0A);
    pub const TRANSPORT: Self = Self(0x0C);
    /// Group extension; PICMG commands live here with a leading 0x00 group
    /// identifier in the data field.
    pub const GROUP_EXTENSION: Self = Self(0x2C);
    pub const OEM: Self = Self(0x2E);

    /// Builds a NetFn from its six-bit wire value. Upper bits are discarded.
    pub const fn new(raw: u8) -> Self {
        Self(raw & 0x3f)
    }

    pub const fn raw(self) -> u8 {
        self.0
    }

    pub const fn is_request(self) -> bool {
        self.0 & 1 == 0
    }

    pub const fn is_response(self) -> bool {
        !self.is_request()
    }

    /// The response NetFn paired with this one.
    pub const fn response(self) -> Self {
        Self(self.0 | 1)
    }

    /// The request NetFn paired with this one.
    pub const fn request(self) -> Self {
        Self(self.0 & !1)
    }
}

/// IPMI completion codes, the first data byte of every response.
#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
#[repr(u8)]
pub enum CompletionCode {
    Success = 0x00,
    /// The responder cannot take the request right now, e.g. because it is
    /// out of message buffers or sequence numbers.
    NodeBusy = 0xC0,
    /// No handler is registered for this NetFn/command pair.
    InvalidCommand = 0xC1,
    InvalidCommandForLun = 0xC2,
    Timeout = 0xC3,
    OutOfSpace = 0xC4,
    ReservationCancelled = 0xC5,
    RequestDataTruncated = 0xC6,
    RequestDataLengthInvalid = 0xC7,
    RequestDataLengthExceeded = 0xC8,
    ParameterOutOfRange = 0xC9,
    CannotReturnRequestedBytes = 0xCA,
    NotPresent = 0xCB,
    /// Also used for requests that arrive with a bad checksum.
    InvalidDataField = 0xCC,
    IllegalCommandForSensor = 0xCD,
    CannotProvideResponse = 0xCE,
    DuplicateRequest = 0xCF,
    SdrInUpdateMode = 0xD0,
    FirmwareInUpdateMode = 0xD1,
    InitInProgress = 0xD2,
    /// A bridged or locally originated request could not be delivered, or
    /// no response came back in time.
    DestinationUnavailable = 0xD3,
    InsufficientPrivilege = 0xD4,
    NotSupportedInPresentState = 0xD5,
    SubfunctionDisabled = 0xD6,
    Unspecified = 0xFF,
}

impl CompletionCode {
    /// Decodes a completion code off the wire. Codes this stack does not
    /// name (OEM and command-specific ranges) read as `Unspecified`.
    pub fn from_byte(b: u8) -> Self {
        Self::from_u8(b).unwrap_or(Self::Unspecified)
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl From<CompletionCode> for u8 {
    fn from(cc: CompletionCode) -> u8 {
        cc as u8
    }
}

/// IPMB checksum: the two's complement of the byte sum, so that the covered
/// bytes plus the checksum add to zero modulo 256.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
        .wrapping_neg()
}

/// Checks a run of bytes whose final byte is its checksum.
pub fn checksum_ok(bytes_with_checksum: &[u8]) -> bool {
    !bytes_with_checksum.is_empty()
        && bytes_with_checksum
            .iter()
            .fold(0u8, |acc, b| acc.wrapping_add(*b))
            == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn netfn_parity() {
        assert!(NetFn::APP.is_request());
        assert_eq!(NetFn::APP.response().raw(), 0x07);
        assert!(NetFn::APP.response().is_response());
        assert_eq!(NetFn::new(0x07).request(), NetFn::APP);
        assert_eq!(NetFn::new(0xff).raw(), 0x3f);
    }

    #[test]
    fn completion_codes() {
        assert_eq!(CompletionCode::from_byte(0x00), CompletionCode::Success);
        assert_eq!(
            CompletionCode::from_byte(0xD3),
            CompletionCode::DestinationUnavailable
        );
        assert_eq!(u8::from(CompletionCode::InvalidDataField), 0xCC);
        // OEM range
        assert_eq!(CompletionCode::from_byte(0x01), CompletionCode::Unspecified);
    }

    #[test]
    fn checksum_vectors() {
        assert_eq!(checksum(&[0x20, 0x18]), 0xC8);
        assert_eq!(checksum(&[0x81, 0x04, 0x01]), 0x7A);
        assert_eq!(checksum(&[]), 0);
        assert!(checksum_ok(&[0x20, 0x18, 0xC8]));
        assert!(!checksum_ok(&[0x20, 0x18, 0xC9]));
        assert!(!checksum_ok(&[]));
    }
}
