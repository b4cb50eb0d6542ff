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

//! The link: a node in the registry's tree. Holds a name, a parent
//! pointer, an ordered child list, an optional twin pointer, a value
//! cell on leaves, additive mode/sync-mode flags, retirement state, a
//! refcount with a zero-ref generation counter, and the subscriber set
//! that the event fabric fans out to.
//!
//! Locking convention: every mutable field lives behind the link's own
//! `parking_lot::Mutex`. Any operation that must hold two links locked
//! at once (attaching a child, detaching for retirement) locks the
//! parent first, then the child — never the reverse. The registry's
//! process-wide mutex is a separate, coarser lock taken only for
//! whole-tree path resolution and mount table edits; it is always
//! acquired before any individual link lock, never after.

use crate::event::{deliver_to, Event, SubscriberSet};
use crate::value::ValueCell;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

static NEXT_LINK_ID: AtomicU32 = AtomicU32::new(1);

/// A process-scoped, monotonically increasing link identifier. Not
/// stable across restarts and never reused while the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u32);

impl LinkId {
    fn next() -> Self {
        Self(NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

macro_rules! flag_set {
    ($name:ident { $($variant:ident = $bit:expr),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name(u8);

        impl $name {
            $(pub const $variant: Self = Self($bit);)+
            pub const NONE: Self = Self(0);

            pub fn has(self, flag: Self) -> bool {
                self.0 & flag.0 == flag.0
            }
            pub fn with(self, flag: Self) -> Self {
                Self(self.0 | flag.0)
            }
            pub fn without(self, flag: Self) -> Self {
                Self(self.0 & !flag.0)
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                self.with(rhs)
            }
        }
    };
}

flag_set!(Mode {
    FOLDER = 0b0000_0001,
    PROVIDER = 0b0000_0010,
    BIDIR = 0b0000_0100,
    PIPE = 0b0000_1000,
    SAVE = 0b0001_0000,
    THREADED = 0b0010_0000,
});

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        for (flag, name) in [
            (Self::FOLDER, "folder"),
            (Self::PROVIDER, "provider"),
            (Self::BIDIR, "bidir"),
            (Self::PIPE, "pipe"),
            (Self::SAVE, "save"),
            (Self::THREADED, "threaded"),
        ] {
            if self.has(flag) {
                parts.push(name);
            }
        }
        if parts.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", parts.join("|"))
        }
    }
}

flag_set!(SyncFlags {
    MONITOR = 0b0000_0001,
    MASTER = 0b0000_0010,
    AUTO_DESTROY = 0b0000_0100,
});

impl fmt::Display for SyncFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        for (flag, name) in [
            (Self::MONITOR, "monitor"),
            (Self::MASTER, "master"),
            (Self::AUTO_DESTROY, "auto_destroy"),
        ] {
            if self.has(flag) {
                parts.push(name);
            }
        }
        if parts.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", parts.join("|"))
        }
    }
}

/// How far retirement has progressed for a link. Distinct from a plain
/// "is it gone" bool because the scope of the announcement differs:
/// `LeafLocal` never reaches peers, `LeafGlobal` does, and `Tree`
/// cascades to descendants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetireKind {
    #[default]
    Active,
    LeafLocal,
    LeafGlobal,
    Tree,
}

impl RetireKind {
    pub fn is_retired(self) -> bool {
        !matches!(self, Self::Active)
    }
    /// `true` if peers should be told about this retirement.
    pub fn is_global(self) -> bool {
        matches!(self, Self::LeafGlobal | Self::Tree)
    }
}

/// The mutable state of a link, held behind its mutex. Split out from
/// [`Link`] so the lock guard type is self-describing.
struct State {
    children: Vec<Arc<Link>>,
    twin: Option<Weak<Link>>,
    value: Option<ValueCell>,
    mode: Mode,
    sync_flags: SyncFlags,
    retirement: RetireKind,
    subscribers: SubscriberSet,
}

/// A node in the registry tree.
pub struct Link {
    id: LinkId,
    name: String,
    parent: Option<Weak<Link>>,
    refcount: AtomicUsize,
    /// Bumped every time `refcount` returns to zero, so a handle that
    /// cached a generation can tell whether the link has cycled through
    /// zero-ref (and possibly been swept) since it last looked.
    zero_ref_generation: AtomicU32,
    state: Mutex<State>,
}

impl Link {
    /// Build a fresh, unparented leaf link with a null value, active
    /// and unretired. Callers attach it under a parent via
    /// [`Link::attach_child`].
    pub fn new_leaf(name: impl Into<String>, parent: Option<Weak<Link>>) -> Arc<Self> {
        Arc::new(Self {
            id: LinkId::next(),
            name: name.into(),
            parent,
            refcount: AtomicUsize::new(0),
            zero_ref_generation: AtomicU32::new(0),
            state: Mutex::new(State {
                children: Vec::new(),
                twin: None,
                value: Some(ValueCell::new_null()),
                mode: Mode::NONE,
                sync_flags: SyncFlags::NONE,
                retirement: RetireKind::Active,
                subscribers: SubscriberSet::new(),
            }),
        })
    }

    /// Build a fresh folder link: no value cell, `Mode::FOLDER` set.
    pub fn new_folder(name: impl Into<String>, parent: Option<Weak<Link>>) -> Arc<Self> {
        Arc::new(Self {
            id: LinkId::next(),
            name: name.into(),
            parent,
            refcount: AtomicUsize::new(0),
            zero_ref_generation: AtomicU32::new(0),
            state: Mutex::new(State {
                children: Vec::new(),
                twin: None,
                value: None,
                mode: Mode::FOLDER,
                sync_flags: SyncFlags::NONE,
                retirement: RetireKind::Active,
                subscribers: SubscriberSet::new(),
            }),
        })
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<Arc<Link>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_folder(&self) -> bool {
        self.state.lock().mode.has(Mode::FOLDER)
    }

    /// Reconstruct this link's absolute path by walking up through
    /// `parent()`. Used where a caller holds only the link (no path
    /// string close at hand), e.g. a handle's auto-destroy retirement.
    pub fn full_path(&self) -> String {
        let mut segments = vec![self.name.clone()];
        let mut cur = self.parent();
        while let Some(p) = cur {
            if p.parent().is_some() {
                segments.push(p.name().to_string());
            }
            cur = p.parent();
        }
        segments.reverse();
        let mut path = String::from("/");
        path.push_str(&segments.join("/"));
        if self.is_folder() && !path.ends_with('/') {
            path.push('/');
        }
        path
    }

    pub fn mode(&self) -> Mode {
        self.state.lock().mode
    }

    pub fn sync_flags(&self) -> SyncFlags {
        self.state.lock().sync_flags
    }

    pub fn retirement(&self) -> RetireKind {
        self.state.lock().retirement
    }

    pub fn is_retired(&self) -> bool {
        self.retirement().is_retired()
    }

    pub fn twin(&self) -> Option<Arc<Link>> {
        self.state.lock().twin.as_ref().and_then(Weak::upgrade)
    }

    pub fn set_twin(&self, twin: &Arc<Link>) {
        self.state.lock().twin = Some(Arc::downgrade(twin));
    }

    pub fn children(&self) -> Vec<Arc<Link>> {
        self.state.lock().children.clone()
    }

    pub fn child_named(&self, name: &str) -> Option<Arc<Link>> {
        self.state
            .lock()
            .children
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    /// Attach `child` to this link's child list. Lock ordering: the
    /// caller must not be holding `child`'s lock. This link's lock is
    /// taken here; `child` itself is not locked.
    pub fn attach_child(self: &Arc<Self>, child: Arc<Link>) {
        let mut state = self.state.lock();
        state.children.push(child);
    }

    pub fn detach_child(&self, id: LinkId) -> Option<Arc<Link>> {
        let mut state = self.state.lock();
        let idx = state.children.iter().position(|c| c.id == id)?;
        Some(state.children.remove(idx))
    }

    // -- refcounting --------------------------------------------------

    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }

    pub fn zero_ref_generation(&self) -> u32 {
        self.zero_ref_generation.load(Ordering::Acquire)
    }

    pub fn incref(&self) -> usize {
        self.refcount.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement the refcount; if it lands on zero, bump the zero-ref
    /// generation and report that to the caller so it can decide
    /// whether to sweep this link for retirement.
    pub fn decref(&self) -> bool {
        let prev = self.refcount.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "refcount underflow on {}", self.id);
        if prev == 1 {
            self.zero_ref_generation.fetch_add(1, Ordering::AcqRel);
            true
        } else {
            false
        }
    }

    // -- mode / sync-mode: monotonic-additive --------------------------

    /// Fold in additional mode bits. Mode changes are additive and
    /// monotonic for `BiDir`, `Pipe`, `Save` per the tree-wide contract;
    /// `Folder`/`Provider` are fixed at creation and never passed here.
    pub fn add_mode(self: &Arc<Self>, add: Mode) -> Mode {
        let new_mode = {
            let mut state = self.state.lock();
            state.mode = state.mode.with(add);
            state.mode
        };
        self.emit(Event::ModeChange {
            link: self.id,
            mode: new_mode,
        });
        new_mode
    }

    pub fn add_sync_flags(self: &Arc<Self>, add: SyncFlags) -> SyncFlags {
        let mut state = self.state.lock();
        state.sync_flags = state.sync_flags.with(add);
        state.sync_flags
    }

    // -- value ----------------------------------------------------------

    /// Read-only access to the value cell. `None` on a folder.
    pub fn with_value<R>(&self, f: impl FnOnce(Option<&ValueCell>) -> R) -> R {
        let state = self.state.lock();
        f(state.value.as_ref())
    }

    /// Overwrite the value cell's contents via `f`, then emit
    /// `ValueChange` with the lock released, per the snapshot-then-emit
    /// rule: the write happens under the lock, the notification after.
    pub fn update_value(
        self: &Arc<Self>,
        send_id: u64,
        handle_hint: Option<u64>,
        f: impl FnOnce(&mut ValueCell),
    ) -> bool {
        let bytes = {
            let mut state = self.state.lock();
            let Some(cell) = state.value.as_mut() else {
                return false;
            };
            f(cell);
            cell.to_bytes().0
        };
        self.emit(Event::ValueChange {
            link: self.id,
            bytes,
            send_id,
            handle_hint,
        });
        true
    }

    // -- subscribers / events -------------------------------------------

    pub fn subscribe(self: &Arc<Self>, sub: Arc<dyn crate::event::Subscriber>) {
        self.state.lock().subscribers.subscribe(sub);
    }

    pub fn unsubscribe(&self, id: u64) {
        self.state.lock().subscribers.unsubscribe(id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Take a subscriber snapshot under the lock, then deliver with the
    /// lock released. Never call this while already holding `self`'s
    /// lock.
    pub fn emit(&self, event: Event) {
        let snapshot = self.state.lock().subscribers.snapshot();
        deliver_to(&snapshot, &event);
    }

    // -- retirement -------------------------------------------------------

    /// Mark this link retired at `kind`. Returns `false` if it was
    /// already retired (retirement is one-way). Emits `Retired` with
    /// the given `path` for logging/peer propagation; the lock is
    /// released before the event is delivered.
    pub fn retire(self: &Arc<Self>, kind: RetireKind, path: String) -> bool {
        {
            let mut state = self.state.lock();
            if state.retirement.is_retired() {
                return false;
            }
            state.retirement = kind;
        }
        self.emit(Event::Retired {
            link: self.id,
            kind,
            path,
        });
        true
    }

    /// Recursively retire this link and every descendant, depth-first,
    /// each announced as `Tree`. Children are locked one at a time, in
    /// parent-before-child order, and never two siblings at once.
    pub fn retire_tree(self: &Arc<Self>, path_of: impl Fn(LinkId) -> String + Copy) {
        for child in self.children() {
            child.retire_tree(path_of);
        }
        self.retire(RetireKind::Tree, path_of(self.id));
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("refcount", &self.refcount())
            .finish()
    }
}

/// A set of link ids, used by the registry to track which links a given
/// mount or monitor currently cares about without holding `Arc`s that
/// would keep retired links alive.
pub type LinkIdSet = HashSet<LinkId>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::CallbackSubscriber;
    use std::sync::atomic::{AtomicBool, AtomicUsize as StdAtomicUsize};

    #[test]
    fn subscribe_is_idempotent_on_a_link() {
        let link = Link::new_leaf("x", None);
        let alive = Arc::new(AtomicBool::new(true));
        let sub = Arc::new(CallbackSubscriber::new(1, alive, |_| {}));
        link.subscribe(sub.clone());
        link.subscribe(sub);
        assert_eq!(link.subscriber_count(), 1);
    }

    #[test]
    fn retired_link_refuses_a_second_retirement() {
        let link = Link::new_leaf("x", None);
        assert!(link.retire(RetireKind::LeafLocal, "/x".into()));
        assert!(!link.retire(RetireKind::LeafGlobal, "/x".into()));
        assert_eq!(link.retirement(), RetireKind::LeafLocal);
    }

    #[test]
    fn value_change_snapshot_then_emit_reaches_subscriber() {
        let link = Link::new_leaf("x", None);
        let seen = Arc::new(StdAtomicUsize::new(0));
        let seen2 = seen.clone();
        let alive = Arc::new(AtomicBool::new(true));
        link.subscribe(Arc::new(CallbackSubscriber::new(1, alive, move |ev| {
            if let Event::ValueChange { bytes, .. } = ev {
                assert_eq!(&bytes[..], b"42");
                seen2.fetch_add(1, Ordering::SeqCst);
            }
        })));
        link.update_value(1, None, |cell| cell.set_bytes(bytes::Bytes::from_static(b"42")));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mode_change_is_monotonic_additive() {
        let link = Link::new_leaf("x", None);
        link.add_mode(Mode::BIDIR);
        link.add_mode(Mode::PIPE);
        let mode = link.mode();
        assert!(mode.has(Mode::BIDIR));
        assert!(mode.has(Mode::PIPE));
    }

    #[test]
    fn refcount_zero_bumps_generation() {
        let link = Link::new_leaf("x", None);
        link.incref();
        link.incref();
        assert!(!link.decref());
        assert_eq!(link.zero_ref_generation(), 0);
        assert!(link.decref());
        assert_eq!(link.zero_ref_generation(), 1);
    }

    #[test]
    fn retire_tree_cascades_depth_first() {
        let root = Link::new_folder("root", None);
        let child = Link::new_leaf("child", Some(Arc::downgrade(&root)));
        let grandchild = Link::new_leaf("grandchild", Some(Arc::downgrade(&child)));
        child.attach_child(grandchild.clone());
        root.attach_child(child.clone());
        root.retire_tree(|_| "/x".to_string());
        assert!(root.is_retired());
        assert!(child.is_retired());
        assert!(grandchild.is_retired());
    }
}
