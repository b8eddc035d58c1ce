use crate::registry::Host;
use crate::type_info::TypeIndex;
use core::any::Any;
use std::rc::Rc;

/// Auxiliary object attached to a host for one type.
///
/// Companions may be referenced outside the side table, so teardown never
/// destroys them directly; it calls [`Companion::owner_destroyed`] and drops
/// the side table's reference.
pub trait Companion: Any {
    fn owner_destroyed(&self) {}
}

/// Builds companions on demand. Invoked at most once per (host, type) pair
/// unless it declines, in which case a later lookup asks again.
pub trait CompanionFactory {
    fn create(&self, type_index: TypeIndex, host: &dyn Host) -> Option<Rc<dyn Companion>>;
}

impl<F> CompanionFactory for F
where
    F: Fn(TypeIndex, &dyn Host) -> Option<Rc<dyn Companion>>,
{
    fn create(&self, type_index: TypeIndex, host: &dyn Host) -> Option<Rc<dyn Companion>> {
        self(type_index, host)
    }
}

/// Downcasts a companion to its concrete type.
pub fn downcast_companion<T: Companion>(companion: &dyn Companion) -> Option<&T> {
    let any: &dyn Any = companion;
    any.downcast_ref::<T>()
}
