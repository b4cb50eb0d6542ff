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

//! Pipes: an ordered byte-stream on top of a link, always `BiDir`.
//! Unlike a plain value write, every pipe message is a discrete event —
//! equal-value suppression never applies, because the point of a pipe
//! is the sequence of messages, not the current value. Each twin keeps
//! its own send sequence counter; an optional check sequence number on
//! the wire lets the receiver detect gaps.

use crate::event::Event;
use crate::link::{Link, Mode};
use regex::Regex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One discrete pipe message: the payload plus an optional sequence
/// number assigned at send time.
#[derive(Debug, Clone)]
pub struct PipeMessage {
    pub seq: Option<u64>,
    pub payload: bytes::Bytes,
}

/// A send queue with optional regex-based coalescing: a newly queued
/// message that matches `coalesce` against an already-queued message
/// replaces it in place, rather than appending a second entry. Used for
/// high-frequency producers where only the latest match of a pattern
/// (e.g. a per-key status line) needs to survive until it's flushed.
pub struct SendQueue {
    queue: VecDeque<PipeMessage>,
    coalesce: Option<Regex>,
    soft_limit: usize,
}

impl SendQueue {
    pub fn new(soft_limit: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            coalesce: None,
            soft_limit,
        }
    }

    pub fn with_coalesce_pattern(soft_limit: usize, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            queue: VecDeque::new(),
            coalesce: Some(Regex::new(pattern)?),
            soft_limit,
        })
    }

    /// `true` if the queue is at or past its soft limit — sync peers
    /// log this condition but still enqueue; a pipe never drops
    /// messages silently.
    pub fn is_over_soft_limit(&self) -> bool {
        self.queue.len() >= self.soft_limit
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Enqueue `msg`. If a coalesce pattern is set and an existing
    /// queued message's payload also matches it, that entry is replaced
    /// in place rather than appending a duplicate.
    pub fn push(&mut self, msg: PipeMessage) {
        if let Some(re) = &self.coalesce {
            let text = String::from_utf8_lossy(&msg.payload);
            if re.is_match(&text) {
                if let Some(existing) = self.queue.iter_mut().find(|m| {
                    re.is_match(&String::from_utf8_lossy(&m.payload))
                }) {
                    *existing = msg;
                    return;
                }
            }
        }
        self.queue.push_back(msg);
    }

    pub fn pop(&mut self) -> Option<PipeMessage> {
        self.queue.pop_front()
    }

    pub fn drain(&mut self) -> Vec<PipeMessage> {
        self.queue.drain(..).collect()
    }
}

/// Gap-detecting sequence tracker for one direction of a pipe twin.
#[derive(Default)]
pub struct SequenceTracker {
    next_send: AtomicU64,
    next_expected: AtomicU64,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next outgoing sequence number.
    pub fn next_send_seq(&self) -> u64 {
        self.next_send.fetch_add(1, Ordering::AcqRel)
    }

    /// Record an inbound sequence number; `Ok(())` if it's exactly the
    /// expected next one, `Err((expected, got))` on a gap. Either way
    /// the tracker advances past `got` so a single dropped message
    /// doesn't wedge every subsequent check.
    pub fn observe(&self, got: u64) -> Result<(), (u64, u64)> {
        let expected = self.next_expected.swap(got + 1, Ordering::AcqRel);
        if expected == got {
            Ok(())
        } else {
            Err((expected, got))
        }
    }
}

/// The pipe endpoint bound to one twin of a link. Owns that twin's send
/// queue and sequence trackers; `emit_out_of_sequence` is how a gap
/// becomes an `Event::OutOfSequence` on the underlying link.
pub struct PipeEndpoint {
    link: Arc<Link>,
    send_queue: parking_lot::Mutex<SendQueue>,
    sequence: SequenceTracker,
    use_sequence_numbers: bool,
}

impl PipeEndpoint {
    pub fn new(link: Arc<Link>, soft_limit: usize, use_sequence_numbers: bool) -> Self {
        link.add_mode(Mode::PIPE | Mode::BIDIR);
        Self {
            link,
            send_queue: parking_lot::Mutex::new(SendQueue::new(soft_limit)),
            sequence: SequenceTracker::new(),
            use_sequence_numbers,
        }
    }

    pub fn with_coalesce_pattern(
        link: Arc<Link>,
        soft_limit: usize,
        use_sequence_numbers: bool,
        pattern: &str,
    ) -> Result<Self, regex::Error> {
        link.add_mode(Mode::PIPE | Mode::BIDIR);
        Ok(Self {
            link,
            send_queue: parking_lot::Mutex::new(SendQueue::with_coalesce_pattern(soft_limit, pattern)?),
            sequence: SequenceTracker::new(),
            use_sequence_numbers,
        })
    }

    /// Queue a discrete message for send. Always appended as a new
    /// event on the underlying link — pipe writes never go through the
    /// value cell's equal-value suppression, since each message is its
    /// own occurrence regardless of payload equality with the last one.
    pub fn send(&self, payload: bytes::Bytes, send_id: u64) {
        let seq = self.use_sequence_numbers.then(|| self.sequence.next_send_seq());
        self.send_queue.lock().push(PipeMessage { seq, payload: payload.clone() });
        self.link.emit(Event::ValueChange {
            link: self.link.id(),
            bytes: payload,
            send_id,
            handle_hint: None,
        });
    }

    /// Record an inbound message's sequence number (if sequencing is on)
    /// and report a gap via `Event::OutOfSequence` if one is found.
    pub fn observe_inbound_seq(&self, seq: u64) {
        if !self.use_sequence_numbers {
            return;
        }
        if let Err((expected, got)) = self.sequence.observe(seq) {
            self.link.emit(Event::OutOfSequence {
                link: self.link.id(),
                expected,
                got,
            });
        }
    }

    pub fn pending_len(&self) -> usize {
        self.send_queue.lock().len()
    }

    pub fn drain_send_queue(&self) -> Vec<PipeMessage> {
        self.send_queue.lock().drain()
    }

    pub fn link(&self) -> &Arc<Link> {
        &self.link
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::Link;

    #[test]
    fn send_queue_coalesces_matching_messages() {
        let mut q = SendQueue::with_coalesce_pattern(16, r"^status:").unwrap();
        q.push(PipeMessage { seq: None, payload: bytes::Bytes::from_static(b"status: ok") });
        q.push(PipeMessage { seq: None, payload: bytes::Bytes::from_static(b"status: busy") });
        q.push(PipeMessage { seq: None, payload: bytes::Bytes::from_static(b"other: x") });
        assert_eq!(q.len(), 2);
        let drained = q.drain();
        assert_eq!(&drained[0].payload[..], b"status: busy");
        assert_eq!(&drained[1].payload[..], b"other: x");
    }

    #[test]
    fn sequence_tracker_detects_gap() {
        let tracker = SequenceTracker::new();
        assert!(tracker.observe(0).is_ok());
        assert!(tracker.observe(1).is_ok());
        assert_eq!(tracker.observe(5), Err((2, 5)));
    }

    #[test]
    fn pipe_endpoint_is_always_bidir_and_pipe_mode() {
        let link = Link::new_leaf("p", None);
        let endpoint = PipeEndpoint::new(link.clone(), 4096, false);
        let mode = endpoint.link().mode();
        assert!(mode.has(Mode::BIDIR));
        assert!(mode.has(Mode::PIPE));
    }

    #[test]
    fn discrete_sends_each_queue_independently_of_value_equality() {
        let link = Link::new_leaf("p", None);
        let endpoint = PipeEndpoint::new(link, 4096, false);
        endpoint.send(bytes::Bytes::from_static(b"same"), 1);
        endpoint.send(bytes::Bytes::from_static(b"same"), 1);
        assert_eq!(endpoint.pending_len(), 2);
    }

    #[test]
    fn out_of_sequence_gap_emits_event() {
        let link = Link::new_leaf("p", None);
        let endpoint = PipeEndpoint::new(link.clone(), 4096, true);
        let seen = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let seen2 = seen.clone();
        let alive = Arc::new(std::sync::atomic::AtomicBool::new(true));
        link.subscribe(Arc::new(crate::event::CallbackSubscriber::new(1, alive, move |ev| {
            if matches!(ev, Event::OutOfSequence { .. }) {
                seen2.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        })));
        endpoint.observe_inbound_seq(0);
        endpoint.observe_inbound_seq(5);
        assert!(seen.load(std::sync::atomic::Ordering::SeqCst));
    }
}
