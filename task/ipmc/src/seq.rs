// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// IPMB sequence numbers are six bits wide.
pub const SEQ_COUNT: u8 = 64;

/// Sequence numbers of requests awaiting a response.
///
/// Numbers are handed out round-robin so that a late response to a request
/// we gave up on is unlikely to match a newer one.
#[derive(Copy, Clone, Debug, Default)]
pub struct SequenceTable {
    in_use: u64,
    next: u8,
}

impl SequenceTable {
    pub const fn new() -> Self {
        Self { in_use: 0, next: 0 }
    }

    pub fn allocate(&mut self) -> Option<u8> {
        for i in 0..SEQ_COUNT {
            let seq = (self.next + i) % SEQ_COUNT;
            if self.in_use & (1 << seq) == 0 {
                self.in_use |= 1 << seq;
                self.next = (seq + 1) % SEQ_COUNT;
                return Some(seq);
            }
        }
        None
    }

    pub fn free(&mut self, seq: u8) {
        if seq < SEQ_COUNT {
            self.in_use &= !(1 << seq);
        }
    }

    pub fn is_in_use(&self, seq: u8) -> bool {
        seq < SEQ_COUNT && self.in_use & (1 << seq) != 0
    }

    pub fn outstanding(&self) -> u32 {
        self.in_use.count_ones()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin() {
        let mut t = SequenceTable::new();
        assert_eq!(t.allocate(), Some(0));
        assert_eq!(t.allocate(), Some(1));
        t.free(0);
        // 0 is free again, but we move on before reusing it.
        assert_eq!(t.allocate(), Some(2));
        assert!(t.is_in_use(1));
        assert!(!t.is_in_use(0));
    }

    #[test]
    fn exhaustion() {
        let mut t = SequenceTable::new();
        for i in 0..SEQ_COUNT {
            assert_eq!(t.allocate(), Some(i));
        }
        assert_eq!(t.allocate(), None);
        assert_eq!(t.outstanding(), 64);

        t.free(17);
        assert_eq!(t.allocate(), Some(17));
    }
}
