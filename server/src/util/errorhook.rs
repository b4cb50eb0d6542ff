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

//! The global, non-fatal error log hook.
//!
//! Handle operations that must never fail fatally (set on a closed
//! handle, get of the wrong type, a path resolution miss) report here
//! instead of returning a `Result`. A registered receiver sees
//! `(text, kind, opaque-ref)` for every one of these; the default
//! receiver just forwards to the `log` facade, which keeps the behavior
//! sane for a process that never wires a collector.

use crate::util::error::ErrorKind;
use parking_lot::RwLock;
use std::sync::Arc;

/// An opaque reference threaded through from the call site (e.g. a
/// handle's user reference pointer) so a receiver can correlate a report
/// with the object that produced it.
pub type OpaqueRef = u64;

pub trait ErrorReceiver: Send + Sync {
    fn on_error(&self, text: &str, kind: ErrorKind, opaque: OpaqueRef);
}

struct LogReceiver;

impl ErrorReceiver for LogReceiver {
    fn on_error(&self, text: &str, kind: ErrorKind, opaque: OpaqueRef) {
        match kind {
            ErrorKind::Ok | ErrorKind::Info => log::info!("[{opaque}] {kind}: {text}"),
            ErrorKind::Warning => log::warn!("[{opaque}] {kind}: {text}"),
            _ => log::error!("[{opaque}] {kind}: {text}"),
        }
    }
}

static RECEIVER: RwLock<Option<Arc<dyn ErrorReceiver>>> = RwLock::new(None);

/// Install a custom error receiver, replacing the default log-forwarding
/// one. Intended for an external collaborator (service discovery,
/// a readiness coordinator) that wants to observe registry-internal
/// errors without re-parsing log output.
pub fn set_receiver(receiver: Arc<dyn ErrorReceiver>) {
    *RECEIVER.write() = Some(receiver);
}

/// Report a non-fatal error. Falls back to routing through `log` if no
/// receiver has been installed.
pub fn report(text: impl AsRef<str>, kind: ErrorKind, opaque: OpaqueRef) {
    let guard = RECEIVER.read();
    match guard.as_ref() {
        Some(recv) => recv.on_error(text.as_ref(), kind, opaque),
        None => LogReceiver.on_error(text.as_ref(), kind, opaque),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingReceiver(AtomicUsize);
    impl ErrorReceiver for CountingReceiver {
        fn on_error(&self, _text: &str, _kind: ErrorKind, _opaque: OpaqueRef) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn custom_receiver_is_invoked() {
        let recv = Arc::new(CountingReceiver(AtomicUsize::new(0)));
        set_receiver(recv.clone());
        report("boom", ErrorKind::NotFound, 1);
        assert_eq!(recv.0.load(Ordering::SeqCst), 1);
        // leave no dangling global state for the other tests in this binary
        set_receiver(Arc::new(CountingReceiver(AtomicUsize::new(0))));
    }
}
