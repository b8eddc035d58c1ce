//! Declarative scopes and the registry of side tables created within them.
//!
//! Invariants:
//! - A side table is linked into a context's object list iff its owning
//!   context is that context and neither it nor the context was torn down.
//! - Linking prepends and unlinking goes through the table's own link; neither
//!   scans the list.
//! - Every enumeration cursor points at a linked table or is `None`; removing
//!   a table moves any cursor parked on it to its successor.
//! - `Context` is the unique owner of a scope. Dropping it (or calling
//!   [`Context::destroy`]) retires every table still linked. Side tables and
//!   extension slots hold `ContextRef`s, which only keep the bookkeeping
//!   allocation alive, never the scope.

use crate::list::{LinkedList, LinkedListLink, UnsafeRef, intrusive_adapter};
use crate::side_table::{Enumeration, SideTable};
use core::cell::{Cell, RefCell};
use core::fmt;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, Ordering};
use std::rc::Rc;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a context, stable for the life of the process.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

intrusive_adapter!(ContextObjectAdapter = UnsafeRef<SideTable>: SideTable { context_link: LinkedListLink });

struct ContextObjectList {
    tables: LinkedList<ContextObjectAdapter>,
    len: usize,
    /// Next table for each running `for_each`, innermost last.
    cursors: Vec<Option<NonNull<SideTable>>>,
}

impl ContextObjectList {
    fn new() -> Self {
        Self {
            tables: LinkedList::new(ContextObjectAdapter::new()),
            len: 0,
            cursors: Vec::new(),
        }
    }

    /// # Safety
    /// `table` must be unlinked and stay allocated until it is unlinked again.
    unsafe fn link(&mut self, table: &SideTable) {
        debug_assert!(!table.context_link.is_linked());
        // SAFETY: caller guarantees `table` outlives its membership.
        self.tables.push_front(unsafe { UnsafeRef::from_raw(table) });
        self.len += 1;
    }

    /// # Safety
    /// `table` must be linked into this list.
    unsafe fn unlink(&mut self, table: &SideTable) {
        // SAFETY: caller guarantees `table` is linked here.
        let mut cursor = unsafe { self.tables.cursor_mut_from_ptr(table) };
        let removed = cursor.remove();
        debug_assert!(removed.is_some());
        let next = cursor.get().map(NonNull::from);
        self.len -= 1;
        self.skip_cursors(NonNull::from(table), next);
    }

    fn pop(&mut self) -> Option<NonNull<SideTable>> {
        let table = NonNull::from(&*self.tables.pop_front()?);
        self.len -= 1;
        let next = self.front();
        self.skip_cursors(table, next);
        Some(table)
    }

    fn skip_cursors(&mut self, removed: NonNull<SideTable>, next: Option<NonNull<SideTable>>) {
        for cursor in &mut self.cursors {
            if *cursor == Some(removed) {
                *cursor = next;
            }
        }
    }

    fn front(&self) -> Option<NonNull<SideTable>> {
        self.tables.front().get().map(NonNull::from)
    }

    /// # Safety
    /// `table` must be linked into this list.
    unsafe fn next_after(&self, table: NonNull<SideTable>) -> Option<NonNull<SideTable>> {
        // SAFETY: caller guarantees `table` is linked here.
        let cursor = unsafe { self.tables.cursor_from_ptr(table.as_ptr()) };
        cursor.peek_next().get().map(NonNull::from)
    }
}

pub(crate) struct ContextInner {
    id: ContextId,
    name: String,
    destroyed: Cell<bool>,
    objects: RefCell<ContextObjectList>,
}

/// Non-owning reference to a context's bookkeeping.
#[derive(Clone)]
pub(crate) struct ContextRef(Rc<ContextInner>);

impl ContextRef {
    pub(crate) fn id(&self) -> ContextId {
        self.0.id
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.0.destroyed.get()
    }

    /// # Safety
    /// `table` must be unlinked and must unlink itself before it is freed.
    pub(crate) unsafe fn link(&self, table: &SideTable) {
        debug_assert!(!self.is_destroyed());
        // SAFETY: forwarded from the caller.
        unsafe { self.0.objects.borrow_mut().link(table) };
    }

    /// # Safety
    /// `table` must be linked into this context.
    pub(crate) unsafe fn unlink(&self, table: &SideTable) {
        // SAFETY: forwarded from the caller.
        unsafe { self.0.objects.borrow_mut().unlink(table) };
    }
}

impl fmt::Debug for ContextRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContextRef").field(&self.0.id).finish()
    }
}

/// A declarative scope owning the registry of every side table created in it.
pub struct Context {
    inner: Rc<ContextInner>,
}

impl Context {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(ContextInner {
                id: ContextId::next(),
                name: name.into(),
                destroyed: Cell::new(false),
                objects: RefCell::new(ContextObjectList::new()),
            }),
        }
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// Number of side tables currently linked.
    pub fn len(&self) -> usize {
        self.inner.objects.borrow().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, table: &SideTable) -> bool {
        table.context_link.is_linked() && table.owning_context() == Some(self.id())
    }

    pub(crate) fn handle(&self) -> ContextRef {
        ContextRef(Rc::clone(&self.inner))
    }

    /// Visits every linked side table, newest first.
    ///
    /// `f` may unlink any table of this context, including by destroying
    /// hosts or the context itself. Tables unlinked before their turn are
    /// skipped, and tables freed during the walk stay allocated until it ends.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&SideTable),
    {
        let _enumeration = Enumeration::enter();
        let visit = Visit::start(&self.inner);
        while let Some(table) = visit.advance() {
            // SAFETY: `table` was linked when the cursor passed it, and
            // `Enumeration` defers freeing until the walk is over.
            f(unsafe { table.as_ref() });
        }
    }

    /// Tears down the scope: every linked side table is unlinked and retired
    /// (guards nulled, bindings detached, companions released). Idempotent.
    pub fn destroy(&self) {
        if self.inner.destroyed.replace(true) {
            return;
        }
        let mut retired = 0usize;
        loop {
            let table = self.inner.objects.borrow_mut().pop();
            let Some(table) = table else {
                break;
            };
            // SAFETY: the table was linked, so it is allocated; popping it
            // does not free it.
            unsafe { table.as_ref() }.retire();
            retired += 1;
        }
        tracing::debug!(context = %self.inner.id, name = %self.inner.name, retired, "context destroyed");
    }
}

/// One `for_each` cursor registered with a context's object list.
struct Visit<'a> {
    inner: &'a ContextInner,
    index: usize,
}

impl<'a> Visit<'a> {
    fn start(inner: &'a ContextInner) -> Self {
        let mut objects = inner.objects.borrow_mut();
        let front = objects.front();
        objects.cursors.push(front);
        Self {
            index: objects.cursors.len() - 1,
            inner,
        }
    }

    /// Returns the table under the cursor and moves the cursor past it.
    fn advance(&self) -> Option<NonNull<SideTable>> {
        let mut objects = self.inner.objects.borrow_mut();
        let table = objects.cursors[self.index]?;
        // SAFETY: cursors only ever hold linked tables.
        let next = unsafe { objects.next_after(table) };
        objects.cursors[self.index] = next;
        Some(table)
    }
}

impl Drop for Visit<'_> {
    fn drop(&mut self) {
        let mut objects = self.inner.objects.borrow_mut();
        debug_assert_eq!(objects.cursors.len(), self.index + 1);
        objects.cursors.truncate(self.index);
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("destroyed", &self.inner.destroyed.get())
            .field("objects", &self.len())
            .finish()
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Context {}
