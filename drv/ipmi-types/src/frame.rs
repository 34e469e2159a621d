// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! IPMB frame layout.
//!
//! ```text
//!  0      1             2     3      4             5    6..n-1  n-1
//! +------+-------------+-----+------+-------------+----+-------+-----+
//! | dst  | netfn | lun | ck1 | src  | seq  | lun  | cmd| data  | ck2 |
//! +------+-------------+-----+------+-------------+----+-------+-----+
//! ```
//!
//! For a request `dst` is the responder and `src` the requester; a response
//! swaps them. The first checksum covers bytes 0-1, the second covers byte 3
//! through the end of the data. A response's first data byte is its
//! completion code.

use static_assertions::const_assert_eq;
use zerocopy::{FromBytes, IntoBytes};

use crate::{checksum, checksum_ok, CompletionCode, NetFn, MSG_BUF_LEN};

/// Bytes ahead of the data field.
pub const HEADER_LEN: usize = 6;
/// Header plus the trailing checksum.
pub const MIN_REQUEST_LEN: usize = HEADER_LEN + 1;
/// A response additionally carries a completion code.
pub const MIN_RESPONSE_LEN: usize = MIN_REQUEST_LEN + 1;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FrameError {
    TooShort,
    TooLong,
    HeaderChecksum,
    DataChecksum,
}

/// The wire image of the header, checksum byte included.
#[derive(
    Copy,
    Clone,
    zerocopy_derive::FromBytes,
    zerocopy_derive::IntoBytes,
    zerocopy_derive::KnownLayout,
    zerocopy_derive::Immutable,
    zerocopy_derive::Unaligned,
)]
#[repr(C)]
struct RawHeader {
    dst: u8,
    net_fn_lun: u8,
    checksum: u8,
    src: u8,
    seq_lun: u8,
    cmd: u8,
}

const_assert_eq!(core::mem::size_of::<RawHeader>(), HEADER_LEN);

/// Decoded IPMB header. Fields are positional: `dst`/`dst_lun` describe
/// byte 0-1 and `src`/`src_lun` bytes 3-4, whichever direction the frame is
/// travelling.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Header {
    pub dst: u8,
    pub net_fn: NetFn,
    pub dst_lun: u8,
    pub src: u8,
    pub seq: u8,
    pub src_lun: u8,
    pub cmd: u8,
}

impl Header {
    fn from_raw(raw: &RawHeader) -> Self {
        Self {
            dst: raw.dst,
            net_fn: NetFn::new(raw.net_fn_lun >> 2),
            dst_lun: raw.net_fn_lun & 0b11,
            src: raw.src,
            seq: raw.seq_lun >> 2,
            src_lun: raw.seq_lun & 0b11,
            cmd: raw.cmd,
        }
    }

    fn to_raw(self) -> RawHeader {
        let mut raw = RawHeader {
            dst: self.dst,
            net_fn_lun: self.net_fn.raw() << 2 | (self.dst_lun & 0b11),
            checksum: 0,
            src: self.src,
            seq_lun: (self.seq & 0x3f) << 2 | (self.src_lun & 0b11),
            cmd: self.cmd,
        };
        raw.checksum = checksum(&[raw.dst, raw.net_fn_lun]);
        raw
    }

    /// Reads the header without checking either checksum. Used to address a
    /// complaint back to the sender of a damaged request.
    pub fn peek(frame: &[u8]) -> Option<Self> {
        let (raw, _) = RawHeader::read_from_prefix(frame).ok()?;
        Some(Self::from_raw(&raw))
    }

    /// The header of the response to this request: addresses and LUNs
    /// swapped, NetFn made odd, sequence and command kept.
    pub fn response(&self) -> Self {
        Self {
            dst: self.src,
            net_fn: self.net_fn.response(),
            dst_lun: self.src_lun,
            src: self.dst,
            seq: self.seq,
            src_lun: self.dst_lun,
            cmd: self.cmd,
        }
    }
}

/// A checked frame: header plus everything between it and the trailing
/// checksum.
#[derive(Copy, Clone, Debug)]
pub struct Message<'a> {
    pub header: Header,
    pub body: &'a [u8],
}

impl Message<'_> {
    pub fn is_request(&self) -> bool {
        self.header.net_fn.is_request()
    }

    /// For responses, the leading completion code.
    pub fn completion_code(&self) -> Option<CompletionCode> {
        if self.is_request() {
            return None;
        }
        self.body.first().copied().map(CompletionCode::from_byte)
    }

    /// For responses, the data after the completion code.
    pub fn response_data(&self) -> &[u8] {
        if self.is_request() {
            &[]
        } else {
            self.body.get(1..).unwrap_or(&[])
        }
    }
}

/// Validates a complete frame and splits it into header and body.
pub fn parse(frame: &[u8]) -> Result<Message<'_>, FrameError> {
    if frame.len() < MIN_REQUEST_LEN {
        return Err(FrameError::TooShort);
    }
    if frame.len() > MSG_BUF_LEN {
        return Err(FrameError::TooLong);
    }
    if !checksum_ok(&frame[..3]) {
        return Err(FrameError::HeaderChecksum);
    }
    if !checksum_ok(&frame[3..]) {
        return Err(FrameError::DataChecksum);
    }

    let (raw, rest) = RawHeader::read_from_prefix(frame)
        .map_err(|_| FrameError::TooShort)?;
    let header = Header::from_raw(&raw);
    if header.net_fn.is_response() && frame.len() < MIN_RESPONSE_LEN {
        return Err(FrameError::TooShort);
    }

    Ok(Message {
        header,
        body: &rest[..rest.len() - 1],
    })
}

/// Writes a frame for `header` and `body` into `out`, filling in both
/// checksums. Returns the frame length.
pub fn encode(
    header: &Header,
    body: &[u8],
    out: &mut [u8],
) -> Result<usize, FrameError> {
    let len = MIN_REQUEST_LEN + body.len();
    if len > out.len() || len > MSG_BUF_LEN {
        return Err(FrameError::TooLong);
    }

    out[..HEADER_LEN].copy_from_slice(header.to_raw().as_bytes());
    out[HEADER_LEN..len - 1].copy_from_slice(body);
    out[len - 1] = checksum(&out[3..len - 1]);
    Ok(len)
}
