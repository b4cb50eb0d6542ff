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

//! Peer synchronization: the TCP wire protocol that keeps two registry
//! processes' mounted subtrees in step.

pub mod connection;
pub mod listener;
pub mod mount;

pub use connection::{Command, PeerConnection, PeerState};
pub use listener::SyncListener;
pub use mount::EchoRing;

/// The command verbs a peer connection exchanges, after the wire
/// codec's generic `Record` has been read off the line.
pub const CMD_SYNC: &str = "sync";
pub const CMD_SET: &str = "set";
pub const CMD_MODE: &str = "mode";
pub const CMD_LS: &str = "ls";
pub const CMD_GET: &str = "get";
pub const CMD_VER: &str = "ver";
pub const CMD_EXIT: &str = "exit";
pub const CMD_NOP: &str = "nop";
pub const CMD_DESTROY: &str = "destroy";
pub const CMD_MONITOR: &str = "monitor";
