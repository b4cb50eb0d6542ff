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

//! Handles: the caller-facing view onto a link. Three shapes, all
//! wrapping the same open/close/get/set surface:
//!
//! - `Basic` never subscribes; it only reads and writes.
//! - `Signal` subscribes with a same-thread callback, delivered
//!   synchronously from whichever thread the link's emit happens on.
//! - `Adaptive` subscribes with a cross-thread queue and exposes a
//!   `poll`/`drain` surface the owning thread pumps itself.
//!
//! A handle that is closed (or was never opened) answers `get` with a
//! zero value and `is_ok = false`, and silently discards `set` — there
//! is no error path for writing to nothing, per the registry's
//! fire-and-forget contract for disconnected handles.

use crate::event::{CallbackSubscriber, Event, QueueSubscriber, Subscriber};
use crate::link::{Link, SyncFlags};
use crate::registry::Registry;
use crate::util::error::ErrorKind;
use crate::util::IdGen;
use crate::value::{Variant, ValueType};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;

static HANDLE_IDS: IdGen = IdGen::new();

/// The result of a typed read: the value (zeroed if unavailable) and
/// whether the read actually reflects a live representation.
#[derive(Debug, Clone, PartialEq)]
pub struct Got<T> {
    pub value: T,
    pub is_ok: bool,
}

impl<T: Default> Got<T> {
    fn unavailable() -> Self {
        Self {
            value: T::default(),
            is_ok: false,
        }
    }
    fn from_pair((value, is_ok): (T, bool)) -> Self {
        Self { value, is_ok }
    }
}

enum Shape {
    Basic,
    Signal,
    Adaptive { rx: Receiver<Event> },
}

/// A caller-facing handle onto a link, in one of three shapes.
pub struct Handle {
    id: u64,
    link: Arc<Link>,
    open: AtomicBool,
    alive: Arc<AtomicBool>,
    shape: Shape,
    suppress_equal: AtomicBool,
    registry: Mutex<Option<Arc<Registry>>>,
}

impl Handle {
    /// Open a `Basic` handle: no subscription, just get/set.
    pub fn open_basic(link: Arc<Link>) -> Self {
        link.incref();
        Self {
            id: HANDLE_IDS.next(),
            link,
            open: AtomicBool::new(true),
            alive: Arc::new(AtomicBool::new(true)),
            shape: Shape::Basic,
            suppress_equal: AtomicBool::new(false),
            registry: Mutex::new(None),
        }
    }

    /// Open a `Signal` handle: `on_event` runs synchronously on
    /// whichever thread triggers the link's emit.
    pub fn open_signal(link: Arc<Link>, on_event: impl Fn(Event) + Send + Sync + 'static) -> Self {
        link.incref();
        let id = HANDLE_IDS.next();
        let alive = Arc::new(AtomicBool::new(true));
        let sub = Arc::new(CallbackSubscriber::new(id, alive.clone(), on_event));
        link.subscribe(sub);
        Self {
            id,
            link,
            open: AtomicBool::new(true),
            alive,
            shape: Shape::Signal,
            suppress_equal: AtomicBool::new(false),
            registry: Mutex::new(None),
        }
    }

    /// Open an `Adaptive` handle: events are enqueued for the caller to
    /// pull with [`Handle::poll`] / [`Handle::drain`].
    pub fn open_adaptive(link: Arc<Link>) -> Self {
        link.incref();
        let id = HANDLE_IDS.next();
        let alive = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel();
        let sub = Arc::new(QueueSubscriber::new(id, alive.clone(), tx));
        link.subscribe(sub);
        Self {
            id,
            link,
            open: AtomicBool::new(true),
            alive,
            shape: Shape::Adaptive { rx },
            suppress_equal: AtomicBool::new(false),
            registry: Mutex::new(None),
        }
    }

    /// Turn equal-value suppression on or off: while set, a write that
    /// decodes to the same representation and bytes as the link's
    /// current value is a no-op (no counter bump, no event, no peer
    /// forward). Pipe-mode links ignore this regardless, since every
    /// pipe send is a discrete message.
    pub fn set_equal_value_suppression(&self, enabled: bool) {
        self.suppress_equal.store(enabled, Ordering::Release);
    }

    pub fn equal_value_suppression(&self) -> bool {
        self.suppress_equal.load(Ordering::Acquire)
    }

    /// Hand this handle a registry to call back into on close, so a
    /// link with `AutoDestroy` set can retire itself once its last
    /// handle goes away. Handles opened without one (tests, embedders
    /// with no registry) just skip that trigger.
    pub fn bind_registry(&self, registry: Arc<Registry>) {
        *self.registry.lock() = Some(registry);
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.link.is_retired()
    }

    pub fn link(&self) -> &Arc<Link> {
        &self.link
    }

    /// Close the handle: it stops counting against the link's refcount
    /// and unsubscribes, but keeps pointing at the same link so a
    /// caller inspecting a stale handle gets a consistent
    /// closed-handle answer rather than a panic. If this was the last
    /// reference and the link has `AutoDestroy` set, the link retires
    /// itself here (lifecycle trigger (b)).
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            self.alive.store(false, Ordering::Release);
            self.link.unsubscribe(self.id);
            let reached_zero = self.link.decref();
            if reached_zero && self.link.sync_flags().has(SyncFlags::AUTO_DESTROY) {
                let path = self.link.full_path();
                match self.registry.lock().clone() {
                    Some(registry) => registry.retire(&self.link, crate::link::RetireKind::LeafGlobal, path),
                    None => {
                        self.link.retire(crate::link::RetireKind::LeafGlobal, path);
                        if let Some(parent) = self.link.parent() {
                            parent.detach_child(self.link.id());
                        }
                    }
                }
            }
        }
    }

    // -- typed get/set ----------------------------------------------------

    pub fn get_int(&self) -> Got<i64> {
        if !self.is_open() {
            return Got::unavailable();
        }
        self.link.with_value(|v| match v {
            Some(cell) => Got::from_pair(cell.to_int()),
            None => Got::unavailable(),
        })
    }

    pub fn get_real(&self) -> Got<f64> {
        if !self.is_open() {
            return Got::unavailable();
        }
        self.link.with_value(|v| match v {
            Some(cell) => Got::from_pair(cell.to_real()),
            None => Got::unavailable(),
        })
    }

    pub fn get_text(&self) -> Got<String> {
        if !self.is_open() {
            return Got::unavailable();
        }
        self.link.with_value(|v| match v {
            Some(cell) => Got::from_pair(cell.to_text()),
            None => Got::unavailable(),
        })
    }

    pub fn get_bytes(&self) -> Got<Bytes> {
        if !self.is_open() {
            return Got::unavailable();
        }
        self.link.with_value(|v| match v {
            Some(cell) => Got::from_pair(cell.to_bytes()),
            None => Got::unavailable(),
        })
    }

    pub fn get_variant(&self) -> Got<Option<Variant>> {
        if !self.is_open() {
            return Got {
                value: None,
                is_ok: false,
            };
        }
        self.link.with_value(|v| match v {
            Some(cell) => Got::from_pair(cell.to_variant()),
            None => Got {
                value: None,
                is_ok: false,
            },
        })
    }

    pub fn value_type(&self) -> Option<ValueType> {
        if !self.is_open() {
            return None;
        }
        self.link.with_value(|v| v.map(|c| c.value_type()))
    }

    /// Write via `f`; silently discarded if the handle is closed or the
    /// link has no value cell (a folder). When equal-value suppression
    /// is on, `f` is first tried against a scratch cell and the write is
    /// dropped if it would decode to the same representation and bytes
    /// the link already holds.
    pub fn set_with(&self, send_id: u64, f: impl Fn(&mut crate::value::ValueCell)) {
        if !self.is_open() {
            return;
        }
        if self.suppress_equal.load(Ordering::Acquire) {
            let unchanged = self.link.with_value(|v| {
                v.map(|cell| {
                    let mut probe = crate::value::ValueCell::default();
                    f(&mut probe);
                    cell.value_type() == probe.value_type()
                        && cell.equals_current_bytes(&probe.to_bytes().0)
                })
                .unwrap_or(false)
            });
            if unchanged {
                return;
            }
        }
        self.link.update_value(send_id, Some(self.id), f);
    }

    pub fn set_int(&self, send_id: u64, v: i64) {
        self.set_with(send_id, move |cell| cell.set_int(v));
    }
    pub fn set_real(&self, send_id: u64, v: f64) {
        self.set_with(send_id, move |cell| cell.set_real(v));
    }
    pub fn set_text(&self, send_id: u64, v: String) {
        self.set_with(send_id, move |cell| cell.set_text(v.clone()));
    }
    pub fn set_bytes(&self, send_id: u64, v: Bytes) {
        self.set_with(send_id, move |cell| cell.set_bytes(v.clone()));
    }
    pub fn set_variant(&self, send_id: u64, v: Variant) {
        self.set_with(send_id, move |cell| cell.set_variant(v.clone()));
    }

    // -- mode accessors -----------------------------------------------------

    pub fn mode(&self) -> crate::link::Mode {
        self.link.mode()
    }

    pub fn add_mode(&self, add: crate::link::Mode) -> Result<crate::link::Mode, ErrorKind> {
        if !self.is_open() {
            return Err(ErrorKind::NotOpen);
        }
        Ok(self.link.add_mode(add))
    }

    // -- export/import --------------------------------------------------------

    pub fn export(&self) -> Option<Vec<u8>> {
        if !self.is_open() {
            return None;
        }
        self.link.with_value(|v| v.map(|c| c.export()))
    }

    pub fn import(&self, blob: &[u8], send_id: u64) -> bool {
        if !self.is_open() {
            return false;
        }
        match crate::value::ValueCell::import(blob) {
            Some(imported) => {
                self.link.update_value(send_id, Some(self.id), |cell| *cell = imported);
                true
            }
            None => false,
        }
    }

    // -- adaptive polling ------------------------------------------------------

    /// Pull one queued event without blocking, if this is an `Adaptive`
    /// handle with one pending; `None` on a `Basic`/`Signal` handle or
    /// an empty queue.
    pub fn poll(&self) -> Option<Event> {
        match &self.shape {
            Shape::Adaptive { rx } => rx.try_recv().ok(),
            _ => None,
        }
    }

    /// Drain every currently-queued event.
    pub fn drain(&self) -> Vec<Event> {
        match &self.shape {
            Shape::Adaptive { rx } => rx.try_iter().collect(),
            _ => Vec::new(),
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::Link;

    #[test]
    fn get_on_closed_handle_is_zero_and_not_ok() {
        let link = Link::new_leaf("x", None);
        let h = Handle::open_basic(link);
        h.close();
        let got = h.get_int();
        assert_eq!(got.value, 0);
        assert!(!got.is_ok);
    }

    #[test]
    fn set_on_closed_handle_is_silently_discarded() {
        let link = Link::new_leaf("x", None);
        link.update_value(0, None, |c| c.set_int(5));
        let h = Handle::open_basic(link.clone());
        h.close();
        h.set_int(0, 99);
        assert_eq!(link.with_value(|v| v.unwrap().to_int()), (5, true));
    }

    #[test]
    fn basic_get_set_round_trip() {
        let link = Link::new_leaf("x", None);
        let h = Handle::open_basic(link);
        h.set_text(1, "hello".into());
        let got = h.get_text();
        assert!(got.is_ok);
        assert_eq!(got.value, "hello");
    }

    #[test]
    fn signal_handle_receives_same_thread_callback() {
        use std::sync::atomic::AtomicUsize;
        let link = Link::new_leaf("x", None);
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let h = Handle::open_signal(link, move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        h.set_int(1, 7);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn adaptive_handle_queues_events_for_polling() {
        let link = Link::new_leaf("x", None);
        let h = Handle::open_adaptive(link);
        h.set_int(1, 7);
        h.set_int(1, 8);
        let drained = h.drain();
        assert_eq!(drained.len(), 2);
    }

    #[test]
    fn closing_releases_the_link_refcount() {
        let link = Link::new_leaf("x", None);
        let h = Handle::open_basic(link.clone());
        assert_eq!(link.refcount(), 1);
        h.close();
        assert_eq!(link.refcount(), 0);
    }

    #[test]
    fn equal_value_suppression_skips_counter_and_event_on_a_matching_write() {
        use std::sync::atomic::AtomicUsize;
        let link = Link::new_leaf("x", None);
        link.update_value(0, None, |c| c.set_text("same".into()));
        let events = Arc::new(AtomicUsize::new(0));
        let events2 = events.clone();
        let h = Handle::open_signal(link.clone(), move |_| {
            events2.fetch_add(1, Ordering::SeqCst);
        });
        h.set_equal_value_suppression(true);
        let before = link.with_value(|v| v.unwrap().update_count());

        h.set_text(1, "same".into());
        assert_eq!(link.with_value(|v| v.unwrap().update_count()), before);
        assert_eq!(events.load(Ordering::SeqCst), 0);

        h.set_text(2, "different".into());
        assert_eq!(link.with_value(|v| v.unwrap().update_count()), before + 1);
        assert_eq!(events.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn equal_value_suppression_off_emits_every_write() {
        let link = Link::new_leaf("x", None);
        link.update_value(0, None, |c| c.set_int(5));
        let h = Handle::open_basic(link.clone());
        let before = link.with_value(|v| v.unwrap().update_count());
        h.set_int(1, 5);
        assert_eq!(link.with_value(|v| v.unwrap().update_count()), before + 1);
    }

    #[test]
    fn closing_last_handle_with_auto_destroy_retires_the_link() {
        let link = Link::new_leaf("x", None);
        link.add_sync_flags(crate::link::SyncFlags::AUTO_DESTROY);
        let h = Handle::open_basic(link.clone());
        h.close();
        assert!(link.is_retired());
    }

    #[test]
    fn closing_without_auto_destroy_leaves_the_link_active() {
        let link = Link::new_leaf("x", None);
        let h = Handle::open_basic(link.clone());
        h.close();
        assert!(!link.is_retired());
    }
}
