// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The command table boundary.
//!
//! A request is routed by NetFn and command to a [`Handler`]. The board's
//! table is searched first, then the built-in one, so a board can override
//! any built-in command.

use heapless::Vec;
use ipmi_types::{
    parse, CompletionCode, Header, NetFn, MIN_RESPONSE_LEN, MSG_BUF_LEN,
};
use workset::{
    ChannelId, ChannelSelect, IpmiCallback, Medium, TransportCallback,
    WorkSet, WsHandle, WsState,
};

use crate::envelope::Envelope;
use crate::seq::SequenceTable;
use crate::{Config, WS_COUNT};

/// Room for response data after the completion code.
pub const MAX_RESPONSE_DATA: usize = MSG_BUF_LEN - MIN_RESPONSE_LEN;

pub type Handler = fn(
    &mut Services<'_>,
    &Request<'_>,
    &mut Response,
) -> Result<Reply, CompletionCode>;

#[derive(Copy, Clone)]
pub struct Command {
    pub net_fn: NetFn,
    pub cmd: u8,
    pub handler: Handler,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Reply {
    /// Send the response now, with completion code `Success`.
    Done,
    /// The response will come later, through `Ipmc::finish_delayed` or a
    /// relayed reply; the request stays parked until then.
    Delayed,
}

/// A validated inbound request.
#[derive(Copy, Clone, Debug)]
pub struct Request<'a> {
    pub header: Header,
    pub data: &'a [u8],
    /// The context holding the request, for handlers that reply later.
    pub handle: WsHandle,
    /// Where the request came from.
    pub medium: Medium,
}

#[derive(Clone, Debug, Default)]
pub struct Response {
    data: Vec<u8, MAX_RESPONSE_DATA>,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Result<(), CompletionCode> {
        self.data
            .extend_from_slice(bytes)
            .map_err(|_| CompletionCode::CannotReturnRequestedBytes)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

/// What a handler may use besides its request.
pub struct Services<'a> {
    pub config: &'a Config,
    pool: &'a mut WorkSet<WS_COUNT>,
    seq: &'a mut SequenceTable,
    origin: WsHandle,
}

impl<'a> Services<'a> {
    pub(crate) fn new(
        config: &'a Config,
        pool: &'a mut WorkSet<WS_COUNT>,
        seq: &'a mut SequenceTable,
        origin: WsHandle,
    ) -> Self {
        Self {
            config,
            pool,
            seq,
            origin,
        }
    }

    /// Forwards the IPMB request `inner` onto `channel` with ourselves as
    /// requester. The answer is relayed back to the request being handled,
    /// which should then return [`Reply::Delayed`]. Returns the sequence
    /// number used on the far side.
    pub fn relay(
        &mut self,
        channel: ChannelId,
        inner: &[u8],
    ) -> Result<u8, CompletionCode> {
        let msg = parse(inner).map_err(|_| CompletionCode::InvalidDataField)?;
        if !msg.is_request() {
            return Err(CompletionCode::InvalidDataField);
        }

        let seq = self.seq.allocate().ok_or(CompletionCode::NodeBusy)?;
        let Ok(h) = self.pool.allocate() else {
            self.seq.free(seq);
            return Err(CompletionCode::NodeBusy);
        };

        let header = Header {
            src: self.config.own_address,
            seq,
            src_lun: 0,
            ..msg.header
        };
        let installed =
            Envelope::build(Medium::I2c(ChannelSelect::Fixed(channel)), &header, msg.body)
                .ok()
                .and_then(|env| {
                    let ctx = self.pool.get_mut(h)?;
                    env.install(ctx).ok()?;
                    ctx.seq_out = seq;
                    ctx.bridged = Some(self.origin);
                    ctx.transport_done = TransportCallback::AwaitResponse;
                    ctx.ipmi_done = IpmiCallback::Relay;
                    Some(())
                });
        if installed.is_none() {
            self.pool.release(h);
            self.seq.free(seq);
            return Err(CompletionCode::InvalidDataField);
        }

        self.pool.set_state(h, WsState::ActiveMasterWrite);
        Ok(seq)
    }
}

/// Finds the handler for `(net_fn, cmd)`, board table first.
pub fn lookup(
    board: &[Command],
    builtin: &[Command],
    net_fn: NetFn,
    cmd: u8,
) -> Option<Handler> {
    board
        .iter()
        .chain(builtin)
        .find(|c| c.net_fn == net_fn && c.cmd == cmd)
        .map(|c| c.handler)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a(
        _: &mut Services<'_>,
        _: &Request<'_>,
        rsp: &mut Response,
    ) -> Result<Reply, CompletionCode> {
        rsp.push(&[1])?;
        Ok(Reply::Done)
    }

    fn b(
        _: &mut Services<'_>,
        _: &Request<'_>,
        _: &mut Response,
    ) -> Result<Reply, CompletionCode> {
        Err(CompletionCode::NodeBusy)
    }

    #[test]
    fn board_table_wins() {
        let board = [Command {
            net_fn: NetFn::APP,
            cmd: 1,
            handler: b,
        }];
        let builtin = [
            Command {
                net_fn: NetFn::APP,
                cmd: 1,
                handler: a,
            },
            Command {
                net_fn: NetFn::APP,
                cmd: 2,
                handler: a,
            },
        ];

        let h = lookup(&board, &builtin, NetFn::APP, 1).unwrap();
        assert_eq!(h as usize, b as Handler as usize);
        let h = lookup(&board, &builtin, NetFn::APP, 2).unwrap();
        assert_eq!(h as usize, a as Handler as usize);
        assert!(lookup(&board, &builtin, NetFn::STORAGE, 1).is_none());
    }

    #[test]
    fn response_capacity() {
        let mut rsp = Response::new();
        rsp.push(&[0; MAX_RESPONSE_DATA]).unwrap();
        assert_eq!(
            rsp.push(&[0]),
            Err(CompletionCode::CannotReturnRequestedBytes)
        );
    }
}
