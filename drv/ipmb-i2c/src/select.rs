// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use workset::ChannelId;

/// How outbound traffic with no fixed channel is spread over the two buses.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChannelPolicy {
    /// Channel A only.
    Primary,
    /// Channel B only.
    Secondary,
    /// Whichever channel has seen fewer errors, alternating when they tie.
    Alternate,
}

#[derive(Copy, Clone, Debug)]
pub struct Selector {
    policy: ChannelPolicy,
    last: Option<ChannelId>,
}

impl Selector {
    pub const fn new(policy: ChannelPolicy) -> Self {
        Self { policy, last: None }
    }

    /// Picks a channel given each channel's error count, indexed by
    /// [`ChannelId::index`].
    pub fn select(&mut self, errors: [u32; 2]) -> ChannelId {
        let pick = match self.policy {
            ChannelPolicy::Primary => ChannelId::A,
            ChannelPolicy::Secondary => ChannelId::B,
            ChannelPolicy::Alternate => {
                let (a, b) = (errors[0], errors[1]);
                if a < b {
                    ChannelId::A
                } else if b < a {
                    ChannelId::B
                } else {
                    self.last.map(ChannelId::other).unwrap_or(ChannelId::A)
                }
            }
        };
        self.last = Some(pick);
        pick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_policies() {
        let mut s = Selector::new(ChannelPolicy::Primary);
        assert_eq!(s.select([5, 0]), ChannelId::A);
        assert_eq!(s.select([5, 0]), ChannelId::A);

        let mut s = Selector::new(ChannelPolicy::Secondary);
        assert_eq!(s.select([0, 5]), ChannelId::B);
    }

    #[test]
    fn alternate_on_tie() {
        let mut s = Selector::new(ChannelPolicy::Alternate);
        let picks = (0..4).map(|_| s.select([0, 0])).collect::<Vec<_>>();
        assert_eq!(picks, [ChannelId::A, ChannelId::B, ChannelId::A, ChannelId::B]);
    }

    #[test]
    fn alternate_prefers_healthier_channel() {
        let mut s = Selector::new(ChannelPolicy::Alternate);
        assert_eq!(s.select([3, 1]), ChannelId::B);
        assert_eq!(s.select([3, 1]), ChannelId::B);
        assert_eq!(s.select([0, 1]), ChannelId::A);
        // Tie after A: B next.
        assert_eq!(s.select([1, 1]), ChannelId::B);
    }
}
