// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use heapless::Vec;
use ipmi_types::{encode, FrameError, Header, MSG_BUF_LEN};
use workset::{ChannelSelect, MessageContext, Medium, Overflow, Route};

/// A framed IPMB message and the medium it leaves on.
#[derive(Clone, Debug)]
pub enum Envelope {
    Ipmb {
        channel: ChannelSelect,
        frame: Vec<u8, MSG_BUF_LEN>,
    },
    /// Fed back into our own inbound path.
    Loopback { frame: Vec<u8, MSG_BUF_LEN> },
}

impl Envelope {
    /// Frames `body` under `header` for `medium`. Requests and responses are
    /// built the same way; the header's NetFn says which this is.
    pub fn build(
        medium: Medium,
        header: &Header,
        body: &[u8],
    ) -> Result<Self, FrameError> {
        let mut buf = [0u8; MSG_BUF_LEN];
        let len = encode(header, body, &mut buf)?;
        let frame =
            Vec::from_slice(&buf[..len]).map_err(|_| FrameError::TooLong)?;

        Ok(match medium {
            Medium::I2c(channel) => Self::Ipmb { channel, frame },
            Medium::Loopback => Self::Loopback { frame },
        })
    }

    pub fn frame(&self) -> &[u8] {
        match self {
            Self::Ipmb { frame, .. } | Self::Loopback { frame } => &frame[..],
        }
    }

    pub fn route(&self) -> Route {
        match self {
            Self::Ipmb { channel, .. } => Route::ipmb(Medium::I2c(*channel)),
            Self::Loopback { .. } => Route::ipmb(Medium::Loopback),
        }
    }

    /// Loads the frame into `ctx` as its outbound message.
    pub fn install(&self, ctx: &mut MessageContext) -> Result<(), Overflow> {
        ctx.set_outbound(self.frame())?;
        ctx.outgoing = self.route();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipmi_types::NetFn;
    use workset::ChannelId;

    fn header() -> Header {
        Header {
            dst: 0x20,
            net_fn: NetFn::APP,
            dst_lun: 0,
            src: 0x81,
            seq: 1,
            src_lun: 0,
            cmd: 0x01,
        }
    }

    #[test]
    fn one_builder_for_every_medium() {
        let fixed = Medium::I2c(ChannelSelect::Fixed(ChannelId::B));
        let env = Envelope::build(fixed, &header(), &[]).unwrap();
        assert_eq!(env.frame(), &[0x20, 0x18, 0xC8, 0x81, 0x04, 0x01, 0x7A]);
        assert_eq!(env.route().channel(), Some(ChannelId::B));

        let lo = Envelope::build(Medium::Loopback, &header(), &[]).unwrap();
        assert_eq!(lo.frame(), env.frame());
        assert_eq!(lo.route().medium, Medium::Loopback);

        let mut ctx = MessageContext::EMPTY;
        env.install(&mut ctx).unwrap();
        assert_eq!(ctx.outbound(), env.frame());
        assert_eq!(ctx.outgoing, env.route());
    }
}
