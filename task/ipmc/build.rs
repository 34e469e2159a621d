// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::env;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct IpmcConfig {
    controller: ControllerConfig,
    timeouts: TimeoutConfig,
    channels: ChannelConfig,
    device: DeviceConfig,
    picmg: PicmgConfig,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ControllerConfig {
    address: u8,
    tick_hz: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct TimeoutConfig {
    transition_ms: u64,
    response_ms: u64,
    error_reset_ms: u64,
    max_attempts: u8,
}

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum Policy {
    Primary,
    Secondary,
    Alternate,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ChannelConfig {
    policy: Policy,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct DeviceConfig {
    device_id: u8,
    device_revision: u8,
    firmware_major: u8,
    firmware_minor: u8,
    ipmi_version: u8,
    additional_support: u8,
    manufacturer_id: u32,
    product_id: u16,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PicmgConfig {
    extension_version: u8,
    max_fru_id: u8,
    ipmc_fru_id: u8,
}

fn config_path() -> Result<PathBuf> {
    println!("cargo:rerun-if-env-changed=IPMC_CONFIG");
    if let Ok(path) = env::var("IPMC_CONFIG") {
        return Ok(PathBuf::from(path));
    }
    let dir = env::var("CARGO_MANIFEST_DIR")?;
    Ok(Path::new(&dir).join("ipmc.toml"))
}

fn ticks(ms: u64, tick_hz: u32) -> u64 {
    // Round up so that a short timeout never becomes zero.
    (ms * u64::from(tick_hz)).div_ceil(1000)
}

fn validate(cfg: &IpmcConfig) -> Result<()> {
    let addr = cfg.controller.address;
    if addr == 0 || addr & 1 != 0 {
        bail!("controller address 0x{addr:02x} is not a valid IPMB address");
    }
    if cfg.controller.tick_hz == 0 {
        bail!("tick-hz must be nonzero");
    }
    if cfg.timeouts.max_attempts == 0 {
        bail!("max-attempts must be at least 1");
    }
    if cfg.timeouts.transition_ms == 0 || cfg.timeouts.response_ms == 0 {
        bail!("transition and response timeouts must be nonzero");
    }
    if cfg.device.manufacturer_id >= 1 << 20 {
        bail!(
            "manufacturer-id 0x{:x} does not fit in 20 bits",
            cfg.device.manufacturer_id
        );
    }
    if cfg.device.firmware_major > 0x7f {
        bail!("firmware-major must fit in 7 bits");
    }
    if cfg.picmg.ipmc_fru_id > cfg.picmg.max_fru_id {
        bail!("ipmc-fru-id exceeds max-fru-id");
    }
    Ok(())
}

fn codegen(cfg: &IpmcConfig, out: &mut impl Write) -> Result<()> {
    let hz = cfg.controller.tick_hz;
    let t = &cfg.timeouts;
    let d = &cfg.device;
    let p = &cfg.picmg;

    writeln!(
        out,
        r##"pub const BOARD: Config = Config {{
    own_address: {:#04x},
    policy: ChannelPolicy::{:?},
    transition_timeout: {},
    response_timeout: {},
    error_reset_period: {},
    max_attempts: {},
    device: DeviceId {{
        device_id: {:#04x},
        device_revision: {:#04x},
        firmware_major: {:#04x},
        firmware_minor: {:#04x},
        ipmi_version: {:#04x},
        additional_support: {:#04x},
        manufacturer_id: {:#08x},
        product_id: {:#06x},
    }},
    picmg: PicmgProperties {{
        extension_version: {:#04x},
        max_fru_id: {},
        ipmc_fru_id: {},
    }},
}};"##,
        cfg.controller.address,
        cfg.channels.policy,
        ticks(t.transition_ms, hz),
        ticks(t.response_ms, hz),
        ticks(t.error_reset_ms, hz),
        t.max_attempts,
        d.device_id,
        d.device_revision,
        d.firmware_major,
        d.firmware_minor,
        d.ipmi_version,
        d.additional_support,
        d.manufacturer_id,
        d.product_id,
        p.extension_version,
        p.max_fru_id,
        p.ipmc_fru_id,
    )?;
    Ok(())
}

fn run() -> Result<()> {
    let path = config_path()?;
    println!("cargo:rerun-if-changed={}", path.display());

    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let cfg: IpmcConfig = toml::from_str(&text)
        .with_context(|| format!("parsing {}", path.display()))?;
    validate(&cfg)?;

    let out_dir = env::var("OUT_DIR")?;
    let dest_path = Path::new(&out_dir).join("ipmc_config.rs");
    let mut file = File::create(&dest_path)?;
    codegen(&cfg, &mut file)?;
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        println!("code generation failed: {e:#}");
        std::process::exit(1);
    }

    println!("cargo:rerun-if-changed=build.rs");
}
