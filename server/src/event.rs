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

//! The event fabric (C6): the kinds of notifications a link emits, and
//! the delivery contract recipients get. A recipient is same-thread
//! (delivered synchronously, the common case for a `Basic`/`Signal`
//! handle) or cross-thread (enqueued onto the target's home-thread
//! queue, the `Adaptive` handle and sync-peer case).

use crate::link::{LinkId, Mode, RetireKind};
use bytes::Bytes;
use std::sync::mpsc::Sender;
use std::sync::Arc;

/// A self-origin identifier carried on value-change events so the
/// pipe/sync layer can suppress its own echoes (§4.9).
pub type SendId = u64;

/// A hint about which handle authored a `ValueChange`, so that handle
/// can skip re-processing its own write if it doesn't want the
/// echo. `None` when the change did not originate from a handle at all
/// (e.g. an inbound peer `set`).
pub type HandleHint = Option<u64>;

#[derive(Debug, Clone)]
pub enum Event {
    ValueChange {
        link: LinkId,
        bytes: Bytes,
        send_id: SendId,
        handle_hint: HandleHint,
    },
    ModeChange {
        link: LinkId,
        mode: Mode,
    },
    ChildCreated {
        link: LinkId,
        path: String,
    },
    Retired {
        link: LinkId,
        kind: RetireKind,
        path: String,
    },
    MonitorReload {
        link: LinkId,
    },
    LinkOwnershipReleased {
        link: LinkId,
    },
    /// Pipe-only: a gap was detected between an inbound check sequence
    /// number and the last one seen.
    OutOfSequence {
        link: LinkId,
        expected: u64,
        got: u64,
    },
}

impl Event {
    pub fn link(&self) -> LinkId {
        match self {
            Event::ValueChange { link, .. }
            | Event::ModeChange { link, .. }
            | Event::ChildCreated { link, .. }
            | Event::Retired { link, .. }
            | Event::MonitorReload { link }
            | Event::LinkOwnershipReleased { link }
            | Event::OutOfSequence { link, .. } => *link,
        }
    }
}

/// Something that wants to hear about a link's events. Implemented by
/// each handle shape (§4.5) and by the sync peer's per-mount forwarder.
///
/// `deliver` is called with the link no longer locked; implementations
/// must not attempt to re-acquire the originating link's lock
/// re-entrantly — only their own state.
pub trait Subscriber: Send + Sync {
    /// Stable identity used for subscriber-set membership tests and for
    /// the lazy dead-subscriber sweep.
    fn subscriber_id(&self) -> u64;
    /// `true` once the owning handle has gone away; the link sweeps
    /// dead subscribers out of its set the next time it emits.
    fn is_alive(&self) -> bool;
    /// `true` if this subscriber lives on a different thread than the
    /// one emitting the event — the emitter enqueues instead of calling
    /// straight through.
    fn is_cross_thread(&self) -> bool;
    fn deliver(&self, event: Event);
}

/// A same-thread recipient backed by a plain callback. Used by the
/// `Basic`/`Signal` handle shapes, which never cross a thread boundary.
pub struct CallbackSubscriber<F: Fn(Event) + Send + Sync> {
    id: u64,
    alive: Arc<std::sync::atomic::AtomicBool>,
    callback: F,
}

impl<F: Fn(Event) + Send + Sync> CallbackSubscriber<F> {
    pub fn new(id: u64, alive: Arc<std::sync::atomic::AtomicBool>, callback: F) -> Self {
        Self {
            id,
            alive,
            callback,
        }
    }
}

impl<F: Fn(Event) + Send + Sync> Subscriber for CallbackSubscriber<F> {
    fn subscriber_id(&self) -> u64 {
        self.id
    }
    fn is_alive(&self) -> bool {
        self.alive.load(std::sync::atomic::Ordering::Acquire)
    }
    fn is_cross_thread(&self) -> bool {
        false
    }
    fn deliver(&self, event: Event) {
        (self.callback)(event)
    }
}

/// A cross-thread recipient: events are handed to an mpsc channel that
/// the target thread's event loop drains. Used by the `Adaptive` handle
/// shape and by threaded-subtree proxying.
pub struct QueueSubscriber {
    id: u64,
    alive: Arc<std::sync::atomic::AtomicBool>,
    tx: Sender<Event>,
}

impl QueueSubscriber {
    pub fn new(id: u64, alive: Arc<std::sync::atomic::AtomicBool>, tx: Sender<Event>) -> Self {
        Self { id, alive, tx }
    }
}

impl Subscriber for QueueSubscriber {
    fn subscriber_id(&self) -> u64 {
        self.id
    }
    fn is_alive(&self) -> bool {
        self.alive.load(std::sync::atomic::Ordering::Acquire)
    }
    fn is_cross_thread(&self) -> bool {
        true
    }
    fn deliver(&self, event: Event) {
        // A send failure means the receiving end is gone; the next
        // sweep over the subscriber set will notice `is_alive` is false
        // and drop this entry, so there's nothing further to do here.
        let _ = self.tx.send(event);
    }
}

/// The subscriber set owned by a link. Structural edits (subscribe,
/// sweep) happen under the link's own mutex; delivery itself happens
/// after the caller has released that lock, via [`SubscriberSet::snapshot`].
#[derive(Default)]
pub struct SubscriberSet {
    subscribers: Vec<Arc<dyn Subscriber>>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `sub` unless a subscriber with the same id is already
    /// present (idempotent per handle).
    pub fn subscribe(&mut self, sub: Arc<dyn Subscriber>) {
        if !self
            .subscribers
            .iter()
            .any(|s| s.subscriber_id() == sub.subscriber_id())
        {
            self.subscribers.push(sub);
        }
    }

    pub fn unsubscribe(&mut self, id: u64) {
        self.subscribers.retain(|s| s.subscriber_id() != id);
    }

    /// Drop any subscriber whose handle has gone away.
    pub fn sweep_dead(&mut self) {
        self.subscribers.retain(|s| s.is_alive());
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// A cheap clone of the live subscriber list, taken while the
    /// link's lock is held, so the caller can release the lock before
    /// calling `deliver` on each one.
    pub fn snapshot(&mut self) -> Vec<Arc<dyn Subscriber>> {
        self.sweep_dead();
        self.subscribers.clone()
    }
}

/// Fan an event out to a pre-taken subscriber snapshot. Must be called
/// with no link locks held.
pub fn deliver_to(snapshot: &[Arc<dyn Subscriber>], event: &Event) {
    for sub in snapshot {
        if sub.is_alive() {
            sub.deliver(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn subscribe_is_idempotent_per_subscriber_id() {
        let mut set = SubscriberSet::new();
        let alive = Arc::new(AtomicBool::new(true));
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let sub = Arc::new(CallbackSubscriber::new(1, alive, move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        }));
        set.subscribe(sub.clone());
        set.subscribe(sub);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn dead_subscribers_are_swept_lazily() {
        let mut set = SubscriberSet::new();
        let alive = Arc::new(AtomicBool::new(true));
        let sub = Arc::new(CallbackSubscriber::new(1, alive.clone(), |_| {}));
        set.subscribe(sub);
        assert_eq!(set.len(), 1);
        alive.store(false, Ordering::SeqCst);
        let snapshot = set.snapshot();
        assert!(snapshot.is_empty());
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn delivery_invokes_every_live_subscriber() {
        let mut set = SubscriberSet::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for id in 0..3 {
            let hits = hits.clone();
            let alive = Arc::new(AtomicBool::new(true));
            set.subscribe(Arc::new(CallbackSubscriber::new(id, alive, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })));
        }
        let snapshot = set.snapshot();
        deliver_to(
            &snapshot,
            &Event::MonitorReload { link: LinkId(0) },
        );
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
