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

//! End-to-end scenarios across the registry, handle, pipe, and wire
//! layers, exercised the way an external caller would: through the
//! public `meshreg` surface rather than any module's internals.

use meshreg::event::Event;
use meshreg::handle::Handle;
use meshreg::link::{Mode, RetireKind};
use meshreg::pipe::PipeEndpoint;
use meshreg::registry::Registry;
use meshreg::wire::Record;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn set_and_get_round_trips_through_a_handle() {
    let registry = Registry::new();
    let link = registry.resolve_or_create("/devices/sensor1/temp").unwrap();
    let handle = Handle::open_basic(link);
    handle.set_real(1, 21.5);
    let got = handle.get_real();
    assert!(got.is_ok);
    assert_eq!(got.value, 21.5);
}

#[test]
fn provider_twin_pair_resolves_to_linked_leaves() {
    let registry = Registry::new();
    let provider = registry.resolve_or_create("/service/echo!").unwrap();
    let request_side = registry.resolve("/service/echo").expect("twin auto-created");
    assert_eq!(provider.twin().unwrap().id(), request_side.id());
    assert!(provider.mode().has(Mode::PROVIDER));
    assert!(request_side.mode().has(Mode::BIDIR));
}

#[test]
fn auto_destroy_retires_through_the_bound_registry_on_last_close() {
    let registry = Registry::new();
    let link = registry.resolve_or_create("/ephemeral/session").unwrap();
    link.add_sync_flags(meshreg::link::SyncFlags::AUTO_DESTROY);
    let id = link.id();

    let handle = Handle::open_basic(link);
    handle.bind_registry(registry.clone());
    handle.close();

    assert!(registry.by_id(id).is_none());
}

#[test]
fn pipe_messages_preserve_order_and_detect_a_dropped_sequence() {
    let registry = Registry::new();
    let link = registry.resolve_or_create("/pipes/log").unwrap();
    let endpoint = PipeEndpoint::new(link.clone(), 4096, true);

    let gap_seen = Arc::new(AtomicUsize::new(0));
    let gap_seen2 = gap_seen.clone();
    let alive = Arc::new(std::sync::atomic::AtomicBool::new(true));
    link.subscribe(Arc::new(meshreg::event::CallbackSubscriber::new(1, alive, move |ev| {
        if matches!(ev, Event::OutOfSequence { .. }) {
            gap_seen2.fetch_add(1, Ordering::SeqCst);
        }
    })));

    endpoint.send(bytes::Bytes::from_static(b"line one"), 1);
    endpoint.send(bytes::Bytes::from_static(b"line two"), 1);
    let queued = endpoint.drain_send_queue();
    assert_eq!(queued.len(), 2);
    assert_eq!(&queued[0].payload[..], b"line one");
    assert_eq!(&queued[1].payload[..], b"line two");

    endpoint.observe_inbound_seq(0);
    endpoint.observe_inbound_seq(1);
    endpoint.observe_inbound_seq(10);
    assert_eq!(gap_seen.load(Ordering::SeqCst), 1);
}

#[test]
fn cross_thread_threaded_subtree_proxies_a_call() {
    let registry = Registry::new();
    let link = registry.resolve_or_create("/threaded/root").unwrap();
    registry.register_threaded_home(&link);

    let registry_for_home = registry.clone();
    let link_id = link.id();
    let home = std::thread::spawn(move || {
        // Simulate the home thread's event pump: give the caller a
        // moment to enqueue, then drain it.
        std::thread::sleep(std::time::Duration::from_millis(20));
        registry_for_home.pump_home(link_id);
    });

    let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let ran2 = ran.clone();
    registry.call_on_home(link_id, move || {
        ran2.store(true, Ordering::SeqCst);
    });
    home.join().unwrap();
    assert!(ran.load(Ordering::SeqCst));
}

#[test]
fn echo_suppression_drops_a_self_originated_set() {
    use meshreg::sync::EchoRing;
    let mut ring = EchoRing::new(16);
    let my_send_id = 42;
    ring.remember(my_send_id);
    // a peer mirrors our own write back to us verbatim
    assert!(ring.is_only_echo(my_send_id));
    // a genuinely new write from the peer is not mistaken for an echo
    assert!(!ring.is_only_echo(my_send_id + 1));
}

#[test]
fn retirement_cascade_retires_every_descendant() {
    let registry = Registry::new();
    let root = registry.resolve_or_create("/tree/").unwrap();
    let a = registry.resolve_or_create("/tree/a").unwrap();
    let b = registry.resolve_or_create("/tree/b/c").unwrap();

    registry.retire(&root, RetireKind::Tree, "/tree/".to_string());
    assert!(root.is_retired());
    assert!(a.is_retired());
    assert!(b.is_retired());
}

#[test]
fn wire_record_survives_a_full_encode_decode_cycle_with_reserved_bytes() {
    let record = Record::new()
        .with("path", "/devices/sensor 1/temp!")
        .with("value", "a=b c\\d")
        .with_flag("sync");
    let encoded = record.encode();
    let line = std::str::from_utf8(&encoded[..encoded.len() - 1]).unwrap();
    let decoded = Record::decode(line);
    assert_eq!(decoded.get("path"), Some("/devices/sensor 1/temp!"));
    assert_eq!(decoded.get("value"), Some("a=b c\\d"));
    assert!(decoded.has_flag("sync"));
}
