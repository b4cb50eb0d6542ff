/*
 * This file is part of meshreg.
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! Echo suppression: every outbound `set` carries a send-id this
//! process generated. A peer connection remembers its own recently-sent
//! ids in a fixed-capacity ring; if an inbound `set` echoes one of
//! them back (because the remote mirrored it straight onto the same
//! mount), the connection recognizes `is_only_echo` and drops it rather
//! than looping the value back into the tree a second time.

use std::collections::VecDeque;

/// A fixed-capacity ring of recently-sent ids. `remember` evicts the
/// oldest entry once full, rather than growing — old ids age out since
/// a genuine echo will arrive promptly or not at all.
pub struct EchoRing {
    capacity: usize,
    seen: VecDeque<u64>,
}

impl EchoRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: VecDeque::with_capacity(capacity),
        }
    }

    pub fn remember(&mut self, send_id: u64) {
        if self.seen.len() >= self.capacity {
            self.seen.pop_front();
        }
        self.seen.push_back(send_id);
    }

    /// `true` if `send_id` is one this side sent itself, i.e. the
    /// inbound message is only an echo of our own write.
    pub fn is_only_echo(&self, send_id: u64) -> bool {
        self.seen.contains(&send_id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remembered_id_is_recognised_as_echo() {
        let mut ring = EchoRing::new(4);
        ring.remember(7);
        assert!(ring.is_only_echo(7));
        assert!(!ring.is_only_echo(8));
    }

    #[test]
    fn ring_evicts_oldest_once_full() {
        let mut ring = EchoRing::new(2);
        ring.remember(1);
        ring.remember(2);
        ring.remember(3);
        assert!(!ring.is_only_echo(1));
        assert!(ring.is_only_echo(2));
        assert!(ring.is_only_echo(3));
        assert_eq!(ring.len(), 2);
    }
}
