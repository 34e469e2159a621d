// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Board configuration.
//!
//! `BOARD` is generated at build time from `ipmc.toml` (or the file named by
//! `IPMC_CONFIG`), with every timeout already converted to scheduler ticks.

pub use drv_ipmb_i2c::ChannelPolicy;

#[derive(Copy, Clone, Debug)]
pub struct Config {
    /// Our 8-bit IPMB address.
    pub own_address: u8,
    pub policy: ChannelPolicy,
    /// Longest a channel may sit between two bus events, in ticks.
    pub transition_timeout: u64,
    /// Longest we wait for the response to a sent request, in ticks.
    pub response_timeout: u64,
    /// How often channel error counts are cleared, in ticks; zero disables.
    pub error_reset_period: u64,
    /// Transmissions allowed per message, the first included.
    pub max_attempts: u8,
    pub device: DeviceId,
    pub picmg: PicmgProperties,
}

/// What we report for Get Device ID.
#[derive(Copy, Clone, Debug)]
pub struct DeviceId {
    pub device_id: u8,
    pub device_revision: u8,
    pub firmware_major: u8,
    /// BCD
    pub firmware_minor: u8,
    pub ipmi_version: u8,
    pub additional_support: u8,
    /// IANA enterprise number, 20 bits.
    pub manufacturer_id: u32,
    pub product_id: u16,
}

#[derive(Copy, Clone, Debug)]
pub struct PicmgProperties {
    pub extension_version: u8,
    pub max_fru_id: u8,
    pub ipmc_fru_id: u8,
}

include!(concat!(env!("OUT_DIR"), "/ipmc_config.rs"));
