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

//! Authentication/authorization hook for the `login` step of the peer
//! handshake. A mesh that never sets a gate accepts every peer; one that
//! does gets to reject the handshake before `sync` state is reached. No
//! concrete user/key policy lives here — that's left to whatever the
//! embedder wires in.

use crate::util::error::ErrorKind;
use std::sync::Arc;

/// A pluggable credential check, given whatever bytes a peer sent with
/// its `login` command.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, credentials: &[u8]) -> bool;
}

/// The default gate: authentication is off, every peer is let through.
struct Open;

impl Authenticator for Open {
    fn authenticate(&self, _credentials: &[u8]) -> bool {
        true
    }
}

/// Holds the installed [`Authenticator`], if any. Cheap to clone, so a
/// sync peer's connection state can carry its own handle.
#[derive(Clone)]
pub struct AuthGate {
    authenticator: Arc<dyn Authenticator>,
}

impl AuthGate {
    pub fn open() -> Self {
        Self {
            authenticator: Arc::new(Open),
        }
    }
    pub fn with_authenticator(authenticator: Arc<dyn Authenticator>) -> Self {
        Self { authenticator }
    }
    /// Check a peer's submitted credentials, returning the error kind to
    /// report on the wire if they don't check out.
    pub fn check(&self, credentials: &[u8]) -> Result<(), ErrorKind> {
        if self.authenticator.authenticate(credentials) {
            Ok(())
        } else {
            Err(ErrorKind::LoginBad)
        }
    }
}

impl Default for AuthGate {
    fn default() -> Self {
        Self::open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SharedSecret(&'static [u8]);
    impl Authenticator for SharedSecret {
        fn authenticate(&self, credentials: &[u8]) -> bool {
            credentials == self.0
        }
    }

    #[test]
    fn open_gate_accepts_anything() {
        let gate = AuthGate::open();
        assert!(gate.check(b"").is_ok());
        assert!(gate.check(b"whatever").is_ok());
    }

    #[test]
    fn installed_authenticator_rejects_bad_credentials() {
        let gate = AuthGate::with_authenticator(Arc::new(SharedSecret(b"hunter2")));
        assert!(gate.check(b"hunter2").is_ok());
        assert_eq!(gate.check(b"nope").unwrap_err(), ErrorKind::LoginBad);
    }
}
