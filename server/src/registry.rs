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

//! The registry: a single process-wide tree rooted at `/`, with
//! path-driven resolution that auto-creates intermediate folders, a
//! home-thread proxy for `Threaded` subtrees, and the mount table that
//! backs peer sync.
//!
//! The registry's own mutex (`tree_lock`) is coarse and is only ever
//! taken for whole-tree operations: resolving/creating a path, and
//! editing the mount table. It is always acquired *before* any
//! individual link's lock — never the other way around — so a caller
//! already holding a link's lock must not call back into the registry.

use crate::link::{Link, LinkId, Mode};
use crate::path;
use crate::util::error::{Error, ErrorKind};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A record of one peer-sync mount: a local folder mirrored to/from a
/// path under a remote registry.
#[derive(Debug, Clone)]
pub struct Mount {
    pub local_base: String,
    pub remote_base: String,
    pub peer_addr: std::net::SocketAddr,
}

/// Per-thread home for a `Threaded` subtree: calls from any other
/// thread queue here and block until the home thread's pump picks them
/// up and signals completion. A plain `Condvar` paired with a
/// `Mutex<()>`, used only as a wait/notify rendezvous rather than to
/// protect data.
struct ProxyGate {
    cvar: Condvar,
    lock: Mutex<()>,
}

impl ProxyGate {
    fn new() -> Self {
        Self {
            cvar: Condvar::new(),
            lock: Mutex::new(()),
        }
    }

    /// Block until `notify` is called from the home thread. No timeout:
    /// a `Threaded` subtree's home thread is assumed always live for
    /// the registry's lifetime.
    fn wait(&self) {
        let mut guard = self.lock.lock();
        self.cvar.wait(&mut guard);
    }

    fn notify(&self) {
        let _guard = self.lock.lock();
        self.cvar.notify_all();
    }
}

/// A pending cross-thread call against a `Threaded` subtree: the
/// closure to run on the home thread, and the gate the caller is
/// parked on.
type ProxyCall = Box<dyn FnOnce() + Send>;

struct ProxyQueue {
    gate: ProxyGate,
    pending: Mutex<Vec<ProxyCall>>,
}

impl ProxyQueue {
    fn new() -> Self {
        Self {
            gate: ProxyGate::new(),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue `call` and block the caller's thread until the home
    /// thread has drained and run it.
    fn submit_and_wait(&self, call: ProxyCall) {
        let done = Arc::new(Mutex::new(false));
        let done2 = done.clone();
        let wrapped: ProxyCall = Box::new(move || {
            call();
            *done2.lock() = true;
        });
        self.pending.lock().push(wrapped);
        loop {
            if *done.lock() {
                return;
            }
            self.gate.wait();
        }
    }

    /// Called from the home thread's pump: run every queued call, then
    /// wake any caller blocked in `submit_and_wait`.
    fn drain(&self) {
        let calls: Vec<ProxyCall> = std::mem::take(&mut *self.pending.lock());
        for call in calls {
            call();
        }
        self.gate.notify();
    }
}

struct TreeState {
    root: Arc<Link>,
    by_id: HashMap<LinkId, Arc<Link>>,
    mounts: Vec<Mount>,
    threaded_homes: HashMap<LinkId, Arc<ProxyQueue>>,
}

/// The global registry. One instance per process; `Registry::global`
/// hands back the shared handle.
pub struct Registry {
    tree_lock: Mutex<TreeState>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        let root = Link::new_folder("", None);
        let mut by_id = HashMap::new();
        by_id.insert(root.id(), root.clone());
        Arc::new(Self {
            tree_lock: Mutex::new(TreeState {
                root,
                by_id,
                mounts: Vec::new(),
                threaded_homes: HashMap::new(),
            }),
        })
    }

    pub fn root(&self) -> Arc<Link> {
        self.tree_lock.lock().root.clone()
    }

    /// Resolve `path`, auto-creating intermediate folders as needed.
    /// The final segment is created as a leaf unless `path` itself
    /// names a folder (trailing `/`). Twin paths resolve to (and
    /// lazily create) the sibling leaf, linking the two as twins on
    /// first contact.
    pub fn resolve_or_create(self: &Arc<Self>, path: &str) -> Result<Arc<Link>, Error> {
        if !path::is_valid(path) {
            return Err(Error::with_context(ErrorKind::CreateError, format!("invalid path {path}")));
        }
        let norm = path::normalize(path);
        let is_folder_path = path::is_folder(&norm);
        let wants_provider = path::is_provider(&norm);
        let mut state = self.tree_lock.lock();
        let mut cur = state.root.clone();
        // Walk the literal path, `!` and all: the provider side is a
        // distinctly-named sibling of the request side, not a modifier
        // on it, so the last segment's name must keep its mark.
        let segments: Vec<&str> = norm
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        for (i, seg) in segments.iter().enumerate() {
            let name = path::canonical_segment(seg);
            let last = i == segments.len() - 1;
            if let Some(existing) = cur.child_named(name) {
                cur = existing;
                continue;
            }
            let new_link = if !last || is_folder_path {
                Link::new_folder(name, Some(Arc::downgrade(&cur)))
            } else {
                Link::new_leaf(name, Some(Arc::downgrade(&cur)))
            };
            cur.attach_child(new_link.clone());
            state.by_id.insert(new_link.id(), new_link.clone());
            cur.emit(crate::event::Event::ChildCreated {
                link: cur.id(),
                path: norm.clone(),
            });
            cur = new_link;
        }
        // Twin creation triggers only on first creation of the provider
        // (`!`) side; resolving the plain request side alone never
        // auto-creates a twin.
        if !is_folder_path && wants_provider {
            cur.add_mode(Mode::BIDIR | Mode::PROVIDER);
            if cur.twin().is_none() {
                let request_name = cur.name().trim_end_matches('!').to_string();
                if let Some(parent) = cur.parent() {
                    let request_side = match parent.child_named(&request_name) {
                        Some(existing) => existing,
                        None => {
                            let leaf = Link::new_leaf(request_name, Some(Arc::downgrade(&parent)));
                            parent.attach_child(leaf.clone());
                            state.by_id.insert(leaf.id(), leaf.clone());
                            leaf
                        }
                    };
                    request_side.add_mode(Mode::BIDIR);
                    request_side.set_twin(&cur);
                    cur.set_twin(&request_side);
                }
            }
        }
        Ok(cur)
    }

    /// Resolve `path` without creating anything; `None` if it doesn't
    /// exist.
    pub fn resolve(&self, path: &str) -> Option<Arc<Link>> {
        let norm = path::normalize(path);
        let state = self.tree_lock.lock();
        let mut cur = state.root.clone();
        for seg in norm.trim_matches('/').split('/').filter(|s| !s.is_empty()) {
            cur = cur.child_named(path::canonical_segment(seg))?;
        }
        Some(cur)
    }

    pub fn by_id(&self, id: LinkId) -> Option<Arc<Link>> {
        self.tree_lock.lock().by_id.get(&id).cloned()
    }

    /// Retire a single link and detach it from its parent. `LeafLocal`
    /// stays silent, `LeafGlobal` and `Tree` are forwarded; see
    /// [`crate::link::RetireKind`].
    pub fn retire(self: &Arc<Self>, link: &Arc<Link>, kind: crate::link::RetireKind, path_str: String) {
        let mut ids = vec![link.id()];
        if kind == crate::link::RetireKind::Tree {
            collect_descendant_ids(link, &mut ids);
            link.retire_tree(|_| path_str.clone());
        } else {
            link.retire(kind, path_str);
        }
        if let Some(parent) = link.parent() {
            parent.detach_child(link.id());
        }
        let mut state = self.tree_lock.lock();
        for id in ids {
            state.by_id.remove(&id);
        }
    }

    // -- mounts -----------------------------------------------------------

    pub fn add_mount(&self, mount: Mount) {
        self.tree_lock.lock().mounts.push(mount);
    }

    pub fn mounts(&self) -> Vec<Mount> {
        self.tree_lock.lock().mounts.clone()
    }

    pub fn remove_mount(&self, local_base: &str) {
        self.tree_lock.lock().mounts.retain(|m| m.local_base != local_base);
    }

    // -- threaded subtree proxying -----------------------------------------

    /// Register the calling thread as the home for the subtree rooted
    /// at `link`. Must be called from the thread that will own it.
    pub fn register_threaded_home(&self, link: &Arc<Link>) {
        link.add_mode(Mode::THREADED);
        self.tree_lock
            .lock()
            .threaded_homes
            .entry(link.id())
            .or_insert_with(|| Arc::new(ProxyQueue::new()));
    }

    /// Run `f` against a `Threaded` link from any thread: if a home is
    /// registered for it, the call is proxied and this function blocks
    /// until the home thread's pump executes it; otherwise `f` runs
    /// inline.
    pub fn call_on_home<F>(&self, link_id: LinkId, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let queue = self.tree_lock.lock().threaded_homes.get(&link_id).cloned();
        match queue {
            Some(q) => q.submit_and_wait(Box::new(f)),
            None => f(),
        }
    }

    /// Drain and run any calls queued against `link_id`'s home. Called
    /// periodically by the owning thread's event pump.
    pub fn pump_home(&self, link_id: LinkId) {
        let queue = self.tree_lock.lock().threaded_homes.get(&link_id).cloned();
        if let Some(q) = queue {
            q.drain();
        }
    }
}

fn collect_descendant_ids(link: &Arc<Link>, out: &mut Vec<LinkId>) {
    for child in link.children() {
        out.push(child.id());
        collect_descendant_ids(&child, out);
    }
}

/// Default interval between reconnect attempts for a disconnected sync
/// peer, used when no override is configured.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(2);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_or_create_auto_creates_folders() {
        let reg = Registry::new();
        let link = reg.resolve_or_create("/a/b/c").unwrap();
        assert_eq!(link.name(), "c");
        assert!(reg.resolve("/a/").is_some());
        assert!(reg.resolve("/a/b/").is_some());
    }

    #[test]
    fn resolve_without_create_misses_unknown_path() {
        let reg = Registry::new();
        assert!(reg.resolve("/nope").is_none());
    }

    #[test]
    fn resolve_is_idempotent_for_existing_path() {
        let reg = Registry::new();
        let a = reg.resolve_or_create("/x/y").unwrap();
        let b = reg.resolve_or_create("/x/y").unwrap();
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn provider_path_creates_linked_twin() {
        let reg = Registry::new();
        let provider = reg.resolve_or_create("/svc!").unwrap();
        let twin = provider.twin().expect("twin created");
        assert_eq!(twin.twin().unwrap().id(), provider.id());
    }

    #[test]
    fn retire_detaches_from_parent() {
        let reg = Registry::new();
        let link = reg.resolve_or_create("/x/y").unwrap();
        let parent = link.parent().unwrap();
        reg.retire(&link, crate::link::RetireKind::LeafGlobal, "/x/y".into());
        assert!(parent.child_named("y").is_none());
        assert!(reg.by_id(link.id()).is_none());
    }

    #[test]
    fn retire_tree_removes_every_descendant_from_by_id() {
        let reg = Registry::new();
        let root = reg.resolve_or_create("/tree/").unwrap();
        let a = reg.resolve_or_create("/tree/a").unwrap();
        let b = reg.resolve_or_create("/tree/b/c").unwrap();

        reg.retire(&root, crate::link::RetireKind::Tree, "/tree/".into());

        assert!(reg.by_id(root.id()).is_none());
        assert!(reg.by_id(a.id()).is_none());
        assert!(reg.by_id(b.id()).is_none());
    }

    #[test]
    fn threaded_call_without_registered_home_runs_inline() {
        let reg = Registry::new();
        let link = reg.resolve_or_create("/t").unwrap();
        let ran = Arc::new(Mutex::new(false));
        let ran2 = ran.clone();
        reg.call_on_home(link.id(), move || *ran2.lock() = true);
        assert!(*ran.lock());
    }
}
