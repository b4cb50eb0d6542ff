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

//! # meshreg
//!
//! A distributed, hierarchical live-data registry. Callers address
//! typed values by path, pair them into request/provider twins, stream
//! ordered pipes between them, and mirror subtrees across processes
//! over the sync wire protocol. See the modules below for their
//! respective pieces.

pub mod auth;
pub mod config;
pub mod event;
pub mod handle;
pub mod link;
pub mod path;
pub mod pipe;
pub mod registry;
pub mod sync;
pub mod util;
pub mod value;
pub mod wire;

pub use handle::Handle;
pub use link::{Link, LinkId, Mode, RetireKind, SyncFlags};
pub use registry::Registry;
pub use value::{Variant, ValueCell, ValueType};
