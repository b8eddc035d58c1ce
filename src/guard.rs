//! Weak observers of host objects.
//!
//! Invariants:
//! - A guard node is linked into at most one side table's guard list.
//! - `table` is set iff the node is linked; `target` is set iff `table` is.
//! - Host teardown nulls `target` and unlinks every node before the side
//!   table is released, so a guard never yields a destroyed host.
//! - Guard nodes are boxed: moving a `Guard` never moves its link.

use crate::list::{LinkedList, LinkedListLink, UnsafeRef, intrusive_adapter};
use crate::registry::Host;
use crate::side_table::SideTable;
use core::cell::Cell;
use core::fmt;
use core::marker::PhantomData;
use core::ptr::NonNull;

pub(crate) struct GuardNode {
    link: LinkedListLink,
    target: Cell<Option<NonNull<()>>>,
    table: Cell<Option<NonNull<SideTable>>>,
}

impl GuardNode {
    fn new() -> Self {
        Self {
            link: LinkedListLink::new(),
            target: Cell::new(None),
            table: Cell::new(None),
        }
    }

    fn clear(&self) {
        self.target.set(None);
        self.table.set(None);
    }
}

intrusive_adapter!(GuardAdapter = UnsafeRef<GuardNode>: GuardNode { link: LinkedListLink });

/// Per-host list of observing guard nodes. Does not own the nodes.
pub(crate) struct GuardList {
    nodes: LinkedList<GuardAdapter>,
    len: usize,
}

impl GuardList {
    pub(crate) fn new() -> Self {
        Self {
            nodes: LinkedList::new(GuardAdapter::new()),
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// # Safety
    /// `node` must be unlinked and must stay at a stable address until it is
    /// removed again, and `table` must own this list.
    pub(crate) unsafe fn push(&mut self, node: &GuardNode, target: NonNull<()>, table: NonNull<SideTable>) {
        debug_assert!(!node.link.is_linked());
        node.target.set(Some(target));
        node.table.set(Some(table));
        // SAFETY: caller guarantees `node` outlives its membership.
        self.nodes.push_front(unsafe { UnsafeRef::from_raw(node) });
        self.len += 1;
    }

    /// # Safety
    /// `node` must be linked into this list.
    pub(crate) unsafe fn remove(&mut self, node: &GuardNode) {
        // SAFETY: caller guarantees `node` is linked here.
        let removed = unsafe { self.nodes.cursor_mut_from_ptr(node).remove() };
        debug_assert!(removed.is_some());
        node.clear();
        self.len -= 1;
    }

    /// Nulls and unlinks the newest guard. Returns `false` once the list is empty.
    pub(crate) fn invalidate_front(&mut self) -> bool {
        match self.nodes.pop_front() {
            Some(node) => {
                node.clear();
                self.len -= 1;
                true
            }
            None => false,
        }
    }
}

/// Weak reference to a host object.
///
/// A guard never keeps its host alive. When the host is destroyed the guard is
/// nulled and unlinked by the host's teardown, with no action from the owner.
/// Dropping a guard unregisters it.
pub struct Guard<H> {
    node: Box<GuardNode>,
    _host: PhantomData<*const H>,
}

impl<H: Host> Guard<H> {
    /// Creates a detached guard. Attach it with
    /// [`crate::SideTableRegistry::register_guard`].
    pub fn new() -> Self {
        Self {
            node: Box::new(GuardNode::new()),
            _host: PhantomData,
        }
    }

    /// The watched host, or `None` if detached or the host is gone.
    pub fn target(&self) -> Option<NonNull<H>> {
        self.node.target.get().map(|ptr| ptr.cast::<H>())
    }

    /// # Safety
    /// The host must not be destroyed or moved while the returned reference is
    /// alive.
    pub unsafe fn get(&self) -> Option<&H> {
        // SAFETY: a set target always points at a live host; caller upholds
        // the lifetime of the borrow.
        self.target().map(|ptr| unsafe { ptr.as_ref() })
    }

    pub fn is_null(&self) -> bool {
        self.node.target.get().is_none()
    }

    pub fn points_to(&self, host: &H) -> bool {
        self.target() == Some(NonNull::from(host))
    }

    pub fn is_linked(&self) -> bool {
        self.node.link.is_linked()
    }

    /// Removes the guard from whatever list holds it. No-op when detached.
    pub fn unregister(&self) {
        if let Some(table) = self.node.table.get() {
            // SAFETY: `table` is set only while the node is linked into that
            // table's guard list, and teardown clears it before freeing.
            unsafe { table.as_ref().unlink_guard(&self.node) };
        }
        self.node.clear();
    }

    pub(crate) fn node(&self) -> &GuardNode {
        &self.node
    }
}

impl<H: Host> Default for Guard<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> Drop for Guard<H> {
    fn drop(&mut self) {
        if let Some(table) = self.node.table.get() {
            // SAFETY: see `Guard::unregister`.
            unsafe { table.as_ref().unlink_guard(&self.node) };
        }
    }
}

impl<H> fmt::Debug for Guard<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guard")
            .field("target", &self.node.target.get())
            .field("linked", &self.node.link.is_linked())
            .finish()
    }
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;

    #[test]
    fn push_remove_and_invalidate() {
        let mut list = GuardList::new();
        let first = GuardNode::new();
        let second = GuardNode::new();
        let mut target = 0u8;
        let target = NonNull::from(&mut target).cast::<()>();
        let table = NonNull::<SideTable>::dangling();

        unsafe {
            list.push(&first, target, table);
            list.push(&second, target, table);
        }
        assert_eq!(list.len(), 2);
        assert_eq!(first.target.get(), Some(target));

        unsafe { list.remove(&first) };
        assert_eq!(list.len(), 1);
        assert!(!first.link.is_linked());
        assert!(first.target.get().is_none());
        assert!(first.table.get().is_none());

        assert!(list.invalidate_front());
        assert!(second.target.get().is_none());
        assert!(!second.link.is_linked());
        assert!(!list.invalidate_front());
        assert_eq!(list.len(), 0);
    }
}
