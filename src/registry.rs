//! Host attachment: the lazily filled back-pointer each host embeds and the
//! registry operations that create, use and tear down side tables.
//!
//! Invariants:
//! - A host has a side table iff some extension state was requested for it.
//! - The slot moves `Empty -> Attached -> Destroyed` or `Empty -> Destroyed`
//!   and never back.
//! - A side table is freed only through `on_host_destroyed(&mut host)` or the
//!   slot's drop, both of which exclude outstanding `&SideTable` borrows.

use crate::binding::{Binding, SlotIndex};
use crate::companion::{Companion, CompanionFactory};
use crate::config::RegistryConfig;
use crate::context::{Context, ContextId, ContextRef};
use crate::deferred::Deferred;
use crate::error::{ExtensionError, report};
use crate::guard::Guard;
use crate::side_table::{SideTable, SourceLocation};
use crate::type_info::TypeIndex;
use core::any::Any;
use core::cell::Cell;
use core::fmt;
use core::ptr::NonNull;
use std::rc::Rc;

/// An object the engine can attach extension state to.
///
/// Implementors embed an [`ExtensionSlot`] and must not move while any
/// [`Guard`] watches them.
pub trait Host: Any {
    fn extension_slot(&self) -> &ExtensionSlot;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum SlotState {
    Empty,
    Attached(NonNull<SideTable>),
    Destroyed,
}

/// The single optional back-pointer a host exposes for its side table.
pub struct ExtensionSlot {
    state: Cell<SlotState>,
    context: Option<ContextRef>,
}

impl ExtensionSlot {
    /// A slot for a host created within `context`.
    pub fn new(context: &Context) -> Self {
        Self {
            state: Cell::new(SlotState::Empty),
            context: Some(context.handle()),
        }
    }

    /// A slot for a host created outside any context.
    pub fn detached() -> Self {
        Self {
            state: Cell::new(SlotState::Empty),
            context: None,
        }
    }

    pub fn declared_context(&self) -> Option<ContextId> {
        self.context.as_ref().map(ContextRef::id)
    }

    pub fn is_attached(&self) -> bool {
        matches!(self.state.get(), SlotState::Attached(_))
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.get() == SlotState::Destroyed
    }

    fn table(&self) -> Option<&SideTable> {
        match self.state.get() {
            // SAFETY: an attached table is freed only through `&mut` access to
            // the host or by dropping this slot, so it outlives `&self`.
            SlotState::Attached(table) => Some(unsafe { table.as_ref() }),
            SlotState::Empty | SlotState::Destroyed => None,
        }
    }
}

impl Default for ExtensionSlot {
    fn default() -> Self {
        Self::detached()
    }
}

impl Drop for ExtensionSlot {
    fn drop(&mut self) {
        if let SlotState::Attached(table) = self.state.replace(SlotState::Destroyed) {
            // SAFETY: the slot owns the table and is going away.
            unsafe { SideTable::destroy(table) };
        }
    }
}

impl fmt::Debug for ExtensionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionSlot")
            .field("state", &self.state.get())
            .field("context", &self.declared_context())
            .finish()
    }
}

/// Create-on-demand access to the side tables of hosts.
#[derive(Clone, Debug, Default)]
pub struct SideTableRegistry {
    config: RegistryConfig,
}

impl SideTableRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Returns the host's side table, allocating it when `create` is set.
    ///
    /// Without `create` this never allocates. A destroyed host yields `None`.
    pub fn get<'h, H: Host + ?Sized>(&self, host: &'h H, create: bool) -> Option<&'h SideTable> {
        if create {
            self.get_or_create(host).ok()
        } else {
            host.extension_slot().table()
        }
    }

    pub fn get_or_create<'h, H: Host + ?Sized>(&self, host: &'h H) -> Result<&'h SideTable, ExtensionError> {
        let slot = host.extension_slot();
        match slot.state.get() {
            SlotState::Attached(_) => {}
            SlotState::Empty => {
                let table = SideTable::allocate(self.config, slot.context.clone());
                slot.state.set(SlotState::Attached(table));
            }
            SlotState::Destroyed => return Err(report(&self.config, ExtensionError::HostDestroyed)),
        }
        slot.table().ok_or(ExtensionError::HostDestroyed)
    }

    /// Teardown entry point, called once from the host's destruction path.
    ///
    /// Guards are nulled, bindings detached, the context link removed and
    /// companions released before the table is freed. A second call reports
    /// [`ExtensionError::AlreadyDestroyed`].
    pub fn on_host_destroyed<H: Host + ?Sized>(&self, host: &mut H) -> Result<(), ExtensionError> {
        let slot = host.extension_slot();
        match slot.state.get() {
            SlotState::Destroyed => Err(report(&self.config, ExtensionError::AlreadyDestroyed)),
            SlotState::Empty => {
                slot.state.set(SlotState::Destroyed);
                Ok(())
            }
            SlotState::Attached(table) => {
                // SAFETY: `&mut host` rules out outstanding borrows of the
                // table, and the slot stops handing it out below.
                unsafe { SideTable::destroy(table) };
                slot.state.set(SlotState::Destroyed);
                Ok(())
            }
        }
    }

    /// Points `guard` at `host`, unregistering it from any previous host.
    pub fn register_guard<H: Host>(&self, host: &H, guard: &Guard<H>) -> Result<(), ExtensionError> {
        guard.unregister();
        let table = self.get_or_create(host)?;
        table.link_guard(guard.node(), NonNull::from(host).cast())
    }

    /// Moves `guard` to `host`, or leaves it detached when `host` is `None`.
    pub fn retarget<H: Host>(&self, guard: &Guard<H>, host: Option<&H>) -> Result<(), ExtensionError> {
        match host {
            Some(host) => self.register_guard(host, guard),
            None => {
                guard.unregister();
                Ok(())
            }
        }
    }

    /// Creates a guard already watching `host`.
    pub fn guard<H: Host>(&self, host: &H) -> Result<Guard<H>, ExtensionError> {
        let guard = Guard::new();
        self.register_guard(host, &guard)?;
        Ok(guard)
    }

    pub fn attach_binding<H: Host + ?Sized>(
        &self,
        host: &H,
        slot: SlotIndex,
        binding: Box<dyn Binding>,
    ) -> Result<Option<Box<dyn Binding>>, ExtensionError> {
        self.get_or_create(host)?.attach_binding(slot, binding)
    }

    pub fn detach_binding<H: Host + ?Sized>(&self, host: &H, slot: SlotIndex) -> Option<Box<dyn Binding>> {
        self.get(host, false)?.detach_binding(slot)
    }

    /// Hot-path check used before plain writes; never allocates.
    #[inline]
    pub fn has_binding<H: Host + ?Sized>(&self, host: &H, slot: SlotIndex) -> bool {
        self.get(host, false).is_some_and(|table| table.has_binding(slot))
    }

    pub fn set_deferred<H: Host + ?Sized>(&self, host: &H, deferred: Deferred) -> Result<(), ExtensionError> {
        self.get_or_create(host)?.set_deferred(deferred)
    }

    /// Runs the pending deferred descriptor, if any. Returns the slots the
    /// template wrote; a descriptor is consumed by its first run.
    pub fn materialize_deferred<H: Host>(&self, host: &H) -> Option<Vec<SlotIndex>> {
        let deferred = self.get(host, false)?.take_deferred()?;
        tracing::trace!(index = deferred.index(), "materializing deferred properties");
        Some(deferred.run(host))
    }

    pub fn set_source_location<H: Host + ?Sized>(
        &self,
        host: &H,
        location: SourceLocation,
    ) -> Result<(), ExtensionError> {
        self.get_or_create(host)?.set_source_location(location)
    }

    /// Returns the companion of `host` for `type_index`, creating it through
    /// `factory` on first use. A declining factory is asked again next time.
    pub fn companion(
        &self,
        host: &dyn Host,
        type_index: TypeIndex,
        factory: &dyn CompanionFactory,
    ) -> Result<Option<Rc<dyn Companion>>, ExtensionError> {
        let table = self.get_or_create(host)?;
        if let Some(companion) = table.companion(type_index) {
            return Ok(Some(companion));
        }
        table.ensure_live()?;
        match factory.create(type_index, host) {
            Some(companion) => {
                tracing::trace!(type_index = type_index.get(), "companion materialized");
                match table.insert_companion(type_index, Rc::clone(&companion)) {
                    Ok(cached) => Ok(Some(cached)),
                    Err(err) => {
                        // The factory retired the table; the new companion never got an owner.
                        companion.owner_destroyed();
                        Err(err)
                    }
                }
            }
            None => {
                tracing::trace!(type_index = type_index.get(), "companion factory declined");
                Ok(None)
            }
        }
    }
}
