//! The per-host extension record.
//!
//! Invariants:
//! - A side table is allocated on first extension need and freed only by its
//!   host's teardown; context teardown retires it but never frees it.
//! - `context` is `Some` iff `context_link` is linked into that context.
//! - Teardown runs to completion before the storage is released: guards are
//!   nulled, bindings detached, the context link removed and companions
//!   released, in that order.
//! - Only `Live` tables accept new guards, bindings, companions or deferred
//!   descriptors.
//! - A table accepts at most one deferred descriptor in its lifetime, so its
//!   template runs at most once.
//! - While any `Context::for_each` is running, freed tables are parked in the
//!   thread's enumeration state and released when the outermost walk ends.

use crate::binding::{Binding, BindingList, DetachReason, SlotIndex};
use crate::companion::Companion;
use crate::config::RegistryConfig;
use crate::context::{ContextId, ContextRef};
use crate::deferred::Deferred;
use crate::error::{ExtensionError, report};
use crate::guard::{GuardList, GuardNode};
use crate::list::LinkedListLink;
use crate::type_info::TypeIndex;
use core::cell::{Cell, OnceCell, RefCell};
use core::fmt;
use core::mem;
use core::ptr::NonNull;
use rustc_hash::FxHashMap;
use std::rc::Rc;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TableState {
    Live,
    TearingDown,
    /// The owning context was destroyed; the host still owns the table.
    Retired,
}

/// Diagnostic position of the declaration that created the host.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Default)]
enum DeferredSlot {
    #[default]
    Empty,
    Pending(Deferred),
    Consumed,
}

struct EnumerationState {
    depth: usize,
    parked: Vec<NonNull<SideTable>>,
}

thread_local! {
    static ENUMERATION: RefCell<EnumerationState> = const {
        RefCell::new(EnumerationState {
            depth: 0,
            parked: Vec::new(),
        })
    };
}

/// Marks a running context enumeration. Tables destroyed meanwhile keep their
/// storage until the last marker is dropped.
pub(crate) struct Enumeration(());

impl Enumeration {
    pub(crate) fn enter() -> Self {
        ENUMERATION.with_borrow_mut(|state| state.depth += 1);
        Self(())
    }
}

impl Drop for Enumeration {
    fn drop(&mut self) {
        let parked = ENUMERATION.with_borrow_mut(|state| {
            state.depth -= 1;
            if state.depth == 0 {
                mem::take(&mut state.parked)
            } else {
                Vec::new()
            }
        });
        for table in parked {
            // SAFETY: parked tables finished teardown in `SideTable::destroy`
            // and nothing else refers to them.
            drop(unsafe { Box::from_raw(table.as_ptr()) });
        }
    }
}

pub struct SideTable {
    pub(crate) context_link: LinkedListLink,
    context: RefCell<Option<ContextRef>>,
    config: RegistryConfig,
    state: Cell<TableState>,
    bindings: RefCell<BindingList>,
    guards: RefCell<GuardList>,
    deferred: RefCell<DeferredSlot>,
    companions: RefCell<FxHashMap<TypeIndex, Rc<dyn Companion>>>,
    location: OnceCell<SourceLocation>,
}

impl SideTable {
    fn new(config: RegistryConfig) -> Self {
        Self {
            context_link: LinkedListLink::new(),
            context: RefCell::new(None),
            config,
            state: Cell::new(TableState::Live),
            bindings: RefCell::new(BindingList::new()),
            guards: RefCell::new(GuardList::new()),
            deferred: RefCell::new(DeferredSlot::Empty),
            companions: RefCell::new(FxHashMap::default()),
            location: OnceCell::new(),
        }
    }

    /// Allocates a table and prepends it to `context`'s object list. A
    /// destroyed context is not linked into.
    pub(crate) fn allocate(config: RegistryConfig, context: Option<ContextRef>) -> NonNull<SideTable> {
        let table = NonNull::from(Box::leak(Box::new(Self::new(config))));
        // SAFETY: freshly leaked, so valid and uniquely referenced here.
        let this = unsafe { table.as_ref() };
        match context {
            Some(context) if !context.is_destroyed() => {
                // SAFETY: the table is boxed and unlinks itself in `destroy`
                // or is popped by the context before it is freed.
                unsafe { context.link(this) };
                *this.context.borrow_mut() = Some(context);
            }
            Some(context) => {
                tracing::debug!(context = %context.id(), "declared context already destroyed; side table left unlinked");
            }
            None => {}
        }
        tracing::trace!(table = ?table, "side table created");
        table
    }

    /// Runs host teardown and frees the table.
    ///
    /// # Safety
    /// `table` must come from [`SideTable::allocate`], must not be destroyed
    /// twice, and no reference to it may be used afterwards.
    pub(crate) unsafe fn destroy(table: NonNull<SideTable>) {
        {
            // SAFETY: caller guarantees the table is still allocated.
            let this = unsafe { table.as_ref() };
            this.state.set(TableState::TearingDown);
            let guards = this.null_guards();
            let bindings = this.detach_bindings(DetachReason::TargetDestroyed);
            let context = this.context.borrow_mut().take();
            if let Some(context) = context {
                // SAFETY: `context` is set only while the table is linked there.
                unsafe { context.unlink(this) };
            }
            let companions = this.release_companions();
            this.drop_deferred();
            tracing::debug!(guards, bindings, companions, "side table destroyed");
        }
        let parked = ENUMERATION.with_borrow_mut(|state| {
            if state.depth > 0 {
                state.parked.push(table);
                true
            } else {
                false
            }
        });
        if !parked {
            // SAFETY: allocated by `allocate` via `Box::leak`; teardown has
            // removed every external link to it.
            drop(unsafe { Box::from_raw(table.as_ptr()) });
        }
    }

    /// Context teardown: the context has already unlinked this table.
    pub(crate) fn retire(&self) {
        self.context.borrow_mut().take();
        if self.state.get() != TableState::Live {
            return;
        }
        self.state.set(TableState::TearingDown);
        self.null_guards();
        self.detach_bindings(DetachReason::ContextDestroyed);
        self.release_companions();
        self.drop_deferred();
        self.state.set(TableState::Retired);
    }

    fn null_guards(&self) -> usize {
        let mut count = 0;
        while self.guards.borrow_mut().invalidate_front() {
            count += 1;
        }
        count
    }

    fn detach_bindings(&self, reason: DetachReason) -> usize {
        let mut count = 0;
        loop {
            let popped = self.bindings.borrow_mut().pop();
            let Some((_, mut binding)) = popped else {
                break;
            };
            binding.detached(reason);
            count += 1;
        }
        count
    }

    fn drop_deferred(&self) {
        let mut slot = self.deferred.borrow_mut();
        if matches!(*slot, DeferredSlot::Pending(_)) {
            *slot = DeferredSlot::Empty;
        }
    }

    fn release_companions(&self) -> usize {
        let companions = mem::take(&mut *self.companions.borrow_mut());
        let count = companions.len();
        for companion in companions.into_values() {
            companion.owner_destroyed();
        }
        count
    }

    pub(crate) fn ensure_live(&self) -> Result<(), ExtensionError> {
        match self.state.get() {
            TableState::Live => Ok(()),
            TableState::TearingDown => Err(report(&self.config, ExtensionError::TearingDown)),
            TableState::Retired => Err(ExtensionError::Retired),
        }
    }

    pub fn state(&self) -> TableState {
        self.state.get()
    }

    pub fn is_live(&self) -> bool {
        self.state.get() == TableState::Live
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn owning_context(&self) -> Option<ContextId> {
        self.context.borrow().as_ref().map(ContextRef::id)
    }

    /// Binds `slot`, superseding any binding already there.
    ///
    /// A superseded binding is signalled with [`DetachReason::Superseded`] and
    /// handed back to the caller.
    pub fn attach_binding(
        &self,
        slot: SlotIndex,
        binding: Box<dyn Binding>,
    ) -> Result<Option<Box<dyn Binding>>, ExtensionError> {
        self.ensure_live()?;
        if slot > self.config.max_slot_index {
            return Err(report(
                &self.config,
                ExtensionError::SlotOutOfRange {
                    slot,
                    max: self.config.max_slot_index,
                },
            ));
        }
        let previous = self.bindings.borrow_mut().insert(slot, binding);
        tracing::trace!(slot, superseded = previous.is_some(), "binding attached");
        Ok(previous.map(|mut previous| {
            previous.detached(DetachReason::Superseded);
            previous
        }))
    }

    /// Unbinds `slot` and returns its binding, or `None` if nothing was bound.
    pub fn detach_binding(&self, slot: SlotIndex) -> Option<Box<dyn Binding>> {
        self.bindings.borrow_mut().remove(slot)
    }

    #[inline]
    pub fn has_binding(&self, slot: SlotIndex) -> bool {
        self.bindings.borrow().has(slot)
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.borrow().len()
    }

    /// Slots with a live binding, newest first.
    pub fn bound_slots(&self) -> Vec<SlotIndex> {
        self.bindings.borrow().slots().collect()
    }

    /// Runs `f` against the binding in `slot`. `f` must not re-enter this
    /// table's binding operations.
    pub fn with_binding<R>(&self, slot: SlotIndex, f: impl FnOnce(&dyn Binding) -> R) -> Option<R> {
        let bindings = self.bindings.borrow();
        bindings.get(slot).map(f)
    }

    pub fn guard_count(&self) -> usize {
        self.guards.borrow().len()
    }

    pub(crate) fn link_guard(&self, node: &GuardNode, target: NonNull<()>) -> Result<(), ExtensionError> {
        self.ensure_live()?;
        // SAFETY: guard nodes are boxed and unlink themselves on drop; the
        // table nulls and unlinks them before it is freed.
        unsafe {
            self.guards
                .borrow_mut()
                .push(node, target, NonNull::from(self));
        }
        Ok(())
    }

    pub(crate) fn unlink_guard(&self, node: &GuardNode) {
        // SAFETY: callers only pass nodes whose table pointer is `self`.
        unsafe { self.guards.borrow_mut().remove(node) };
    }

    pub fn companion(&self, type_index: TypeIndex) -> Option<Rc<dyn Companion>> {
        self.companions.borrow().get(&type_index).cloned()
    }

    pub fn companion_count(&self) -> usize {
        self.companions.borrow().len()
    }

    /// Caches `companion` for `type_index`. If one is already cached it wins
    /// and is returned instead.
    pub(crate) fn insert_companion(
        &self,
        type_index: TypeIndex,
        companion: Rc<dyn Companion>,
    ) -> Result<Rc<dyn Companion>, ExtensionError> {
        self.ensure_live()?;
        let mut companions = self.companions.borrow_mut();
        Ok(Rc::clone(companions.entry(type_index).or_insert(companion)))
    }

    /// Records the deferred descriptor. Only one is ever accepted: a second
    /// one is rejected while the first is pending and after it has run.
    pub fn set_deferred(&self, deferred: Deferred) -> Result<(), ExtensionError> {
        self.ensure_live()?;
        let mut slot = self.deferred.borrow_mut();
        match &*slot {
            DeferredSlot::Empty => {}
            DeferredSlot::Pending(_) => return Err(ExtensionError::DeferredPending),
            DeferredSlot::Consumed => return Err(ExtensionError::DeferredConsumed),
        }
        *slot = DeferredSlot::Pending(deferred);
        Ok(())
    }

    pub fn has_deferred(&self) -> bool {
        matches!(*self.deferred.borrow(), DeferredSlot::Pending(_))
    }

    pub(crate) fn take_deferred(&self) -> Option<Deferred> {
        let mut slot = self.deferred.borrow_mut();
        match mem::replace(&mut *slot, DeferredSlot::Consumed) {
            DeferredSlot::Pending(deferred) => Some(deferred),
            previous => {
                *slot = previous;
                None
            }
        }
    }

    pub fn source_location(&self) -> Option<SourceLocation> {
        self.location.get().copied()
    }

    pub fn set_source_location(&self, location: SourceLocation) -> Result<(), ExtensionError> {
        self.location
            .set(location)
            .map_err(|_| ExtensionError::LocationAlreadySet)
    }
}

impl fmt::Debug for SideTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SideTable")
            .field("state", &self.state.get())
            .field("context", &self.owning_context())
            .field("bindings", &self.binding_count())
            .field("guards", &self.guard_count())
            .field("companions", &self.companion_count())
            .field("deferred", &self.has_deferred())
            .field("location", &self.location.get())
            .finish()
    }
}
