//! Dynamic identifier resolution against a type or a namespace.
//!
//! Lookup order for a type subject:
//! - uppercase identifiers are enumerators (most derived declaration wins) or
//!   nothing at all;
//! - other identifiers are properties of the host's attached companion for
//!   the subject type, materialized through the side table on first use.
//!
//! Namespace subjects only resolve to types. Every miss is an ordinary
//! [`Resolution::Unresolved`] carrying a diagnostic reason.

use crate::binding::SlotIndex;
use crate::companion::{Companion, CompanionFactory};
use crate::registry::{Host, SideTableRegistry};
use crate::type_info::{EnumLookup, NamespaceEntry, TypeIndex, TypeInfo, TypeNamespace};
use bitflags::bitflags;
use core::fmt;
use std::rc::Rc;

bitflags! {
    /// Access a property accessor grants for a queried name.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct QueryFlags: u8 {
        const HANDLES_READ = 1 << 0;
        const HANDLES_WRITE = 1 << 1;
    }
}

/// Generic member access on companion objects.
pub trait PropertyAccessor {
    type Value;

    /// Maps `name` to a property slot of `object` and the access it allows.
    fn query(&self, object: &dyn Companion, name: &str) -> Option<(SlotIndex, QueryFlags)>;

    fn read(&self, object: &dyn Companion, slot: SlotIndex) -> Option<Self::Value>;

    fn write(&self, object: &dyn Companion, slot: SlotIndex, value: Self::Value) -> bool;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TypeNameMode {
    IncludeEnums,
    ExcludeEnums,
}

/// What an identifier is resolved against.
#[derive(Clone, Debug)]
pub enum Subject {
    Type { ty: Rc<TypeInfo>, mode: TypeNameMode },
    Namespace { namespace: Rc<TypeNamespace>, mode: TypeNameMode },
}

impl Subject {
    pub fn of_type(ty: Rc<TypeInfo>) -> Self {
        Self::Type {
            ty,
            mode: TypeNameMode::IncludeEnums,
        }
    }

    pub fn of_namespace(namespace: Rc<TypeNamespace>) -> Self {
        Self::Namespace {
            namespace,
            mode: TypeNameMode::IncludeEnums,
        }
    }

    pub fn with_mode(self, mode: TypeNameMode) -> Self {
        match self {
            Self::Type { ty, .. } => Self::Type { ty, mode },
            Self::Namespace { namespace, .. } => Self::Namespace { namespace, mode },
        }
    }

    pub fn mode(&self) -> TypeNameMode {
        match self {
            Self::Type { mode, .. } | Self::Namespace { mode, .. } => *mode,
        }
    }
}

/// Why an identifier did not resolve. Diagnostic only.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Unresolved {
    NotFound,
    EmptyIdentifier,
    EnumsExcluded,
    AmbiguousEnumerator,
    NotAType,
    NoHostInScope,
    CompanionDeclined,
    NoSuchProperty,
}

/// A companion property an identifier was delegated to.
#[derive(Clone)]
pub struct CompanionProperty {
    companion: Rc<dyn Companion>,
    type_index: TypeIndex,
    slot: SlotIndex,
    flags: QueryFlags,
}

impl CompanionProperty {
    pub fn companion(&self) -> &Rc<dyn Companion> {
        &self.companion
    }

    pub fn type_index(&self) -> TypeIndex {
        self.type_index
    }

    pub fn slot(&self) -> SlotIndex {
        self.slot
    }

    pub fn flags(&self) -> QueryFlags {
        self.flags
    }
}

impl fmt::Debug for CompanionProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompanionProperty")
            .field("type_index", &self.type_index)
            .field("slot", &self.slot)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub enum Resolution {
    EnumValue(i32),
    TypeReference(Rc<TypeInfo>),
    Companion(CompanionProperty),
    Unresolved(Unresolved),
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Unresolved(_))
    }

    pub fn enum_value(&self) -> Option<i32> {
        match self {
            Self::EnumValue(value) => Some(*value),
            _ => None,
        }
    }

    /// Rebinds a type reference as the subject of further member access.
    pub fn into_subject(self, mode: TypeNameMode) -> Option<Subject> {
        match self {
            Self::TypeReference(ty) => Some(Subject::Type { ty, mode }),
            _ => None,
        }
    }
}

fn starts_uppercase(identifier: &str) -> bool {
    identifier.chars().next().is_some_and(char::is_uppercase)
}

pub struct NameResolver<'a, A> {
    registry: &'a SideTableRegistry,
    factory: &'a dyn CompanionFactory,
    accessor: &'a A,
}

impl<'a, A: PropertyAccessor> NameResolver<'a, A> {
    pub fn new(registry: &'a SideTableRegistry, factory: &'a dyn CompanionFactory, accessor: &'a A) -> Self {
        Self {
            registry,
            factory,
            accessor,
        }
    }

    /// Resolves one identifier. Companion lookups may create the host's side
    /// table and companion; both are cached for later lookups.
    pub fn resolve(&self, identifier: &str, subject: &Subject, host: Option<&dyn Host>) -> Resolution {
        if identifier.is_empty() {
            return Resolution::Unresolved(Unresolved::EmptyIdentifier);
        }
        match subject {
            Subject::Namespace { namespace, .. } => match namespace.get(identifier) {
                Some(NamespaceEntry::Type(ty)) => Resolution::TypeReference(Rc::clone(ty)),
                Some(NamespaceEntry::Namespace(_)) => Resolution::Unresolved(Unresolved::NotAType),
                None => Resolution::Unresolved(Unresolved::NotFound),
            },
            Subject::Type { ty, mode } if starts_uppercase(identifier) => {
                if *mode == TypeNameMode::ExcludeEnums {
                    return Resolution::Unresolved(Unresolved::EnumsExcluded);
                }
                match ty.lookup_enumerator(identifier) {
                    EnumLookup::Found(value) => Resolution::EnumValue(value),
                    EnumLookup::Ambiguous => {
                        tracing::debug!(identifier, ty = ty.name(), "ambiguous enumerator");
                        Resolution::Unresolved(Unresolved::AmbiguousEnumerator)
                    }
                    EnumLookup::Missing => Resolution::Unresolved(Unresolved::NotFound),
                }
            }
            Subject::Type { ty, .. } => match host {
                Some(host) => self.resolve_companion(identifier, ty, host),
                None => Resolution::Unresolved(Unresolved::NoHostInScope),
            },
        }
    }

    fn resolve_companion(&self, identifier: &str, ty: &TypeInfo, host: &dyn Host) -> Resolution {
        let companion = match self.registry.companion(host, ty.index(), self.factory) {
            Ok(Some(companion)) => companion,
            Ok(None) => return Resolution::Unresolved(Unresolved::CompanionDeclined),
            Err(err) => {
                tracing::debug!(identifier, ty = ty.name(), error = %err, "companion unavailable");
                return Resolution::Unresolved(Unresolved::CompanionDeclined);
            }
        };
        match self.accessor.query(&*companion, identifier) {
            Some((slot, flags)) if !flags.is_empty() => Resolution::Companion(CompanionProperty {
                companion,
                type_index: ty.index(),
                slot,
                flags,
            }),
            _ => Resolution::Unresolved(Unresolved::NoSuchProperty),
        }
    }

    /// Resolves a dotted path such as `Ui.Rect.Left`, rebinding to each
    /// intermediate type reference in turn.
    pub fn resolve_path(&self, path: &str, subject: Subject, host: Option<&dyn Host>) -> Resolution {
        let mode = subject.mode();
        let mut subject = subject;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let resolution = self.resolve(segment, &subject, host);
            if segments.peek().is_none() {
                return resolution;
            }
            subject = match resolution {
                Resolution::Unresolved(reason) => return Resolution::Unresolved(reason),
                other => match other.into_subject(mode) {
                    Some(next) => next,
                    None => return Resolution::Unresolved(Unresolved::NotAType),
                },
            };
        }
        Resolution::Unresolved(Unresolved::EmptyIdentifier)
    }

    pub fn read(&self, property: &CompanionProperty) -> Option<A::Value> {
        if !property.flags.contains(QueryFlags::HANDLES_READ) {
            return None;
        }
        self.accessor.read(&*property.companion, property.slot)
    }

    /// Writes through the accessor. Refused unless the query granted write
    /// access.
    pub fn write(&self, property: &CompanionProperty, value: A::Value) -> bool {
        if !property.flags.contains(QueryFlags::HANDLES_WRITE) {
            return false;
        }
        self.accessor.write(&*property.companion, property.slot, value)
    }
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;
    use crate::companion::downcast_companion;
    use crate::config::RegistryConfig;
    use crate::context::Context;
    use crate::registry::ExtensionSlot;
    use crate::type_info::EnumInfo;
    use core::cell::Cell;

    #[derive(Default)]
    struct Item {
        slot: ExtensionSlot,
    }

    impl Host for Item {
        fn extension_slot(&self) -> &ExtensionSlot {
            &self.slot
        }
    }

    #[derive(Default)]
    struct Keys {
        enabled: Cell<i32>,
        pressed: Cell<i32>,
    }

    impl Companion for Keys {}

    struct KeysAccessor;

    impl PropertyAccessor for KeysAccessor {
        type Value = i32;

        fn query(&self, object: &dyn Companion, name: &str) -> Option<(SlotIndex, QueryFlags)> {
            downcast_companion::<Keys>(object)?;
            match name {
                "enabled" => Some((0, QueryFlags::HANDLES_READ | QueryFlags::HANDLES_WRITE)),
                "pressed" => Some((1, QueryFlags::HANDLES_READ)),
                _ => None,
            }
        }

        fn read(&self, object: &dyn Companion, slot: SlotIndex) -> Option<i32> {
            let keys = downcast_companion::<Keys>(object)?;
            match slot {
                0 => Some(keys.enabled.get()),
                1 => Some(keys.pressed.get()),
                _ => None,
            }
        }

        fn write(&self, object: &dyn Companion, slot: SlotIndex, value: i32) -> bool {
            match (downcast_companion::<Keys>(object), slot) {
                (Some(keys), 0) => {
                    keys.enabled.set(value);
                    true
                }
                _ => false,
            }
        }
    }

    fn item_type() -> Rc<TypeInfo> {
        Rc::new(
            TypeInfo::new("Item", TypeIndex(1))
                .with_enum(EnumInfo::new("Mode").with_key("Foo", 7).with_key("Bar", 2)),
        )
    }

    fn rect_type() -> Rc<TypeInfo> {
        Rc::new(
            TypeInfo::new("Rect", TypeIndex(2))
                .with_base(item_type())
                .with_enum(EnumInfo::new("Shape").with_key("Foo", 9)),
        )
    }

    fn registry() -> SideTableRegistry {
        SideTableRegistry::new(RegistryConfig::default().with_strict(false))
    }

    fn keys_factory(calls: &Cell<u32>) -> impl Fn(TypeIndex, &dyn Host) -> Option<Rc<dyn Companion>> + '_ {
        move |_, _| {
            calls.set(calls.get() + 1);
            Some(Rc::new(Keys::default()) as Rc<dyn Companion>)
        }
    }

    #[test]
    fn most_derived_enumerator_wins() {
        let registry = registry();
        let calls = Cell::new(0);
        let factory = keys_factory(&calls);
        let resolver = NameResolver::new(&registry, &factory, &KeysAccessor);

        let subject = Subject::of_type(rect_type());
        assert_eq!(resolver.resolve("Foo", &subject, None).enum_value(), Some(9));
        assert_eq!(resolver.resolve("Bar", &subject, None).enum_value(), Some(2));
        assert!(matches!(
            resolver.resolve("Baz", &subject, None),
            Resolution::Unresolved(Unresolved::NotFound)
        ));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn excluded_enums_and_empty_identifiers_are_unresolved() {
        let registry = registry();
        let calls = Cell::new(0);
        let factory = keys_factory(&calls);
        let resolver = NameResolver::new(&registry, &factory, &KeysAccessor);

        let subject = Subject::of_type(rect_type()).with_mode(TypeNameMode::ExcludeEnums);
        assert!(matches!(
            resolver.resolve("Foo", &subject, None),
            Resolution::Unresolved(Unresolved::EnumsExcluded)
        ));
        assert!(matches!(
            resolver.resolve("", &subject, None),
            Resolution::Unresolved(Unresolved::EmptyIdentifier)
        ));
    }

    #[test]
    fn ambiguous_enumerators_are_rejected() {
        let registry = registry();
        let calls = Cell::new(0);
        let factory = keys_factory(&calls);
        let resolver = NameResolver::new(&registry, &factory, &KeysAccessor);
        let ty = TypeInfo::new("Text", TypeIndex(5))
            .with_enum(EnumInfo::new("HAlign").with_key("Left", 1))
            .with_enum(EnumInfo::new("Elide").with_key("Left", 4));
        assert!(matches!(
            resolver.resolve("Left", &Subject::of_type(Rc::new(ty)), None),
            Resolution::Unresolved(Unresolved::AmbiguousEnumerator)
        ));
    }

    #[test]
    fn namespaces_resolve_types_and_paths() {
        let registry = registry();
        let calls = Cell::new(0);
        let factory = keys_factory(&calls);
        let resolver = NameResolver::new(&registry, &factory, &KeysAccessor);

        let mut ns = TypeNamespace::new("Ui");
        ns.insert_type(rect_type());
        ns.insert_namespace(Rc::new(TypeNamespace::new("Effects")));
        let subject = Subject::of_namespace(Rc::new(ns));

        assert!(matches!(
            resolver.resolve("Rect", &subject, None),
            Resolution::TypeReference(ty) if ty.index() == TypeIndex(2)
        ));
        assert!(matches!(
            resolver.resolve("Effects", &subject, None),
            Resolution::Unresolved(Unresolved::NotAType)
        ));
        assert!(matches!(
            resolver.resolve("Missing", &subject, None),
            Resolution::Unresolved(Unresolved::NotFound)
        ));

        assert_eq!(resolver.resolve_path("Rect.Foo", subject.clone(), None).enum_value(), Some(9));
        assert!(matches!(
            resolver.resolve_path("Rect.Foo.Bar", subject.clone(), None),
            Resolution::Unresolved(Unresolved::NotAType)
        ));
        assert!(matches!(
            resolver.resolve_path("Rect..Foo", subject.clone(), None),
            Resolution::Unresolved(Unresolved::EmptyIdentifier)
        ));

        let excluded = subject.with_mode(TypeNameMode::ExcludeEnums);
        assert!(matches!(
            resolver.resolve_path("Rect.Foo", excluded, None),
            Resolution::Unresolved(Unresolved::EnumsExcluded)
        ));
    }

    #[test]
    fn lowercase_needs_a_host() {
        let registry = registry();
        let calls = Cell::new(0);
        let factory = keys_factory(&calls);
        let resolver = NameResolver::new(&registry, &factory, &KeysAccessor);
        assert!(matches!(
            resolver.resolve("enabled", &Subject::of_type(item_type()), None),
            Resolution::Unresolved(Unresolved::NoHostInScope)
        ));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn companion_is_created_once_and_shared() {
        let registry = registry();
        let calls = Cell::new(0);
        let factory = keys_factory(&calls);
        let resolver = NameResolver::new(&registry, &factory, &KeysAccessor);
        let item = Item::default();
        let subject = Subject::of_type(item_type());

        let first = resolver.resolve("enabled", &subject, Some(&item));
        let second = resolver.resolve("pressed", &subject, Some(&item));
        match (first, second) {
            (Resolution::Companion(first), Resolution::Companion(second)) => {
                assert!(Rc::ptr_eq(first.companion(), second.companion()));
                assert_eq!(first.slot(), 0);
                assert_eq!(second.flags(), QueryFlags::HANDLES_READ);
            }
            other => panic!("unexpected resolutions: {other:?}"),
        }
        assert_eq!(calls.get(), 1);
        assert_eq!(registry.get(&item, false).map(|table| table.companion_count()), Some(1));

        assert!(matches!(
            resolver.resolve("missing", &subject, Some(&item)),
            Resolution::Unresolved(Unresolved::NoSuchProperty)
        ));
    }

    #[test]
    fn reads_and_writes_go_through_the_accessor() {
        let registry = registry();
        let calls = Cell::new(0);
        let factory = keys_factory(&calls);
        let resolver = NameResolver::new(&registry, &factory, &KeysAccessor);
        let item = Item::default();
        let subject = Subject::of_type(item_type());

        let Resolution::Companion(enabled) = resolver.resolve("enabled", &subject, Some(&item)) else {
            panic!("expected a companion property");
        };
        assert!(resolver.write(&enabled, 1));
        assert_eq!(resolver.read(&enabled), Some(1));

        let Resolution::Companion(pressed) = resolver.resolve("pressed", &subject, Some(&item)) else {
            panic!("expected a companion property");
        };
        assert!(!resolver.write(&pressed, 5));
        assert_eq!(resolver.read(&pressed), Some(0));
    }

    #[test]
    fn retired_host_resolves_without_calling_the_factory() {
        let registry = registry();
        let calls = Cell::new(0);
        let factory = keys_factory(&calls);
        let resolver = NameResolver::new(&registry, &factory, &KeysAccessor);
        let ctx = Context::new("scope");
        let item = Item {
            slot: ExtensionSlot::new(&ctx),
        };
        let subject = Subject::of_type(item_type());
        assert!(resolver.resolve("enabled", &subject, Some(&item)).is_resolved());
        assert_eq!(calls.get(), 1);

        ctx.destroy();
        for _ in 0..3 {
            assert!(matches!(
                resolver.resolve("enabled", &subject, Some(&item)),
                Resolution::Unresolved(Unresolved::CompanionDeclined)
            ));
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn declined_companion_is_retried() {
        let registry = registry();
        let ready = Cell::new(false);
        let calls = Cell::new(0);
        let factory = |_: TypeIndex, _: &dyn Host| -> Option<Rc<dyn Companion>> {
            calls.set(calls.get() + 1);
            ready.get().then(|| Rc::new(Keys::default()) as Rc<dyn Companion>)
        };
        let resolver = NameResolver::new(&registry, &factory, &KeysAccessor);
        let item = Item::default();
        let subject = Subject::of_type(item_type());

        assert!(matches!(
            resolver.resolve("enabled", &subject, Some(&item)),
            Resolution::Unresolved(Unresolved::CompanionDeclined)
        ));
        ready.set(true);
        assert!(resolver.resolve("enabled", &subject, Some(&item)).is_resolved());
        assert!(resolver.resolve("enabled", &subject, Some(&item)).is_resolved());
        assert_eq!(calls.get(), 2);
    }
}
