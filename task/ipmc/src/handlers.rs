// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Commands every controller answers, whatever the board adds.

use ipmi_types::{CompletionCode, NetFn};
use workset::ChannelId;

use crate::dispatch::{Command, Reply, Request, Response, Services};

pub mod cmd {
    pub const GET_DEVICE_ID: u8 = 0x01;
    pub const GET_SELF_TEST_RESULTS: u8 = 0x04;
    pub const SEND_MESSAGE: u8 = 0x34;

    pub const GET_PICMG_PROPERTIES: u8 = 0x00;
    pub const SET_PORT_STATE: u8 = 0x0E;
    pub const GET_PORT_STATE: u8 = 0x0F;
    pub const SET_CLOCK_STATE: u8 = 0x2C;
    pub const GET_CLOCK_STATE: u8 = 0x2D;
}

/// Leads the data of every PICMG group extension command.
pub const PICMG_IDENTIFIER: u8 = 0x00;

pub static BUILTIN: &[Command] = &[
    Command {
        net_fn: NetFn::APP,
        cmd: cmd::GET_DEVICE_ID,
        handler: get_device_id,
    },
    Command {
        net_fn: NetFn::APP,
        cmd: cmd::GET_SELF_TEST_RESULTS,
        handler: get_self_test_results,
    },
    Command {
        net_fn: NetFn::APP,
        cmd: cmd::SEND_MESSAGE,
        handler: send_message,
    },
    Command {
        net_fn: NetFn::GROUP_EXTENSION,
        cmd: cmd::GET_PICMG_PROPERTIES,
        handler: get_picmg_properties,
    },
    // E-keying lives with the board's FRU logic; until a board supplies
    // these, say so.
    Command {
        net_fn: NetFn::GROUP_EXTENSION,
        cmd: cmd::SET_PORT_STATE,
        handler: not_supported,
    },
    Command {
        net_fn: NetFn::GROUP_EXTENSION,
        cmd: cmd::GET_PORT_STATE,
        handler: not_supported,
    },
    Command {
        net_fn: NetFn::GROUP_EXTENSION,
        cmd: cmd::SET_CLOCK_STATE,
        handler: not_supported,
    },
    Command {
        net_fn: NetFn::GROUP_EXTENSION,
        cmd: cmd::GET_CLOCK_STATE,
        handler: not_supported,
    },
];

fn get_device_id(
    svc: &mut Services<'_>,
    _req: &Request<'_>,
    rsp: &mut Response,
) -> Result<Reply, CompletionCode> {
    let d = &svc.config.device;
    let mfr = d.manufacturer_id.to_le_bytes();
    let product = d.product_id.to_le_bytes();

    rsp.push(&[
        d.device_id,
        d.device_revision,
        d.firmware_major & 0x7f,
        d.firmware_minor,
        d.ipmi_version,
        d.additional_support,
        mfr[0],
        mfr[1],
        mfr[2] & 0x0f,
        product[0],
        product[1],
    ])?;
    Ok(Reply::Done)
}

fn get_self_test_results(
    _svc: &mut Services<'_>,
    _req: &Request<'_>,
    rsp: &mut Response,
) -> Result<Reply, CompletionCode> {
    // 0x55: no error.
    rsp.push(&[0x55, 0x00])?;
    Ok(Reply::Done)
}

/// Bridges an encapsulated request to the other IPMB. Data is the channel
/// number followed by a complete IPMB request frame.
fn send_message(
    svc: &mut Services<'_>,
    req: &Request<'_>,
    _rsp: &mut Response,
) -> Result<Reply, CompletionCode> {
    let (&channel, inner) = req
        .data
        .split_first()
        .ok_or(CompletionCode::RequestDataLengthInvalid)?;

    let channel = ChannelId::from_index(channel & 0x0f)
        .ok_or(CompletionCode::ParameterOutOfRange)?;
    svc.relay(channel, inner)?;
    Ok(Reply::Delayed)
}

fn picmg_request<'a>(req: &Request<'a>) -> Result<&'a [u8], CompletionCode> {
    match req.data.split_first() {
        Some((&PICMG_IDENTIFIER, rest)) => Ok(rest),
        Some(_) => Err(CompletionCode::InvalidDataField),
        None => Err(CompletionCode::RequestDataLengthInvalid),
    }
}

fn get_picmg_properties(
    svc: &mut Services<'_>,
    req: &Request<'_>,
    rsp: &mut Response,
) -> Result<Reply, CompletionCode> {
    picmg_request(req)?;

    let p = &svc.config.picmg;
    rsp.push(&[
        PICMG_IDENTIFIER,
        p.extension_version,
        p.max_fru_id,
        p.ipmc_fru_id,
    ])?;
    Ok(Reply::Done)
}

fn not_supported(
    _svc: &mut Services<'_>,
    req: &Request<'_>,
    _rsp: &mut Response,
) -> Result<Reply, CompletionCode> {
    picmg_request(req)?;
    Err(CompletionCode::InvalidCommand)
}
