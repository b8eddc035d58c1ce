//! Object extension runtime for a declarative binding engine.
//!
//! Objects the engine does not own get a lazily created [`SideTable`] holding
//! binding bookkeeping, weak [`Guard`] observers, attached companions and
//! deferred-initialisation state. Side tables are linked into the [`Context`]
//! that created their host so a whole scope can be torn down in one pass.
//!
//! - [`SideTableRegistry`] - create-on-demand attachment and host teardown
//! - [`Guard`] - weak observer nulled automatically when its host dies
//! - [`NameResolver`] - enum / namespace / attached-companion name lookup
//!
//! Everything here is single-threaded: side tables, guards and contexts are
//! `!Send` and rely on synchronous teardown instead of reference counting.

pub mod binding;
pub mod bitset;
pub mod companion;
pub mod config;
pub mod context;
pub mod deferred;
pub mod error;
pub mod guard;
pub mod list;
pub mod registry;
pub mod resolver;
pub mod side_table;
pub mod type_info;

pub use binding::{Binding, DetachReason, SlotIndex};
pub use companion::{Companion, CompanionFactory};
pub use config::RegistryConfig;
pub use context::{Context, ContextId};
pub use deferred::{CompiledTemplate, Deferred};
pub use error::ExtensionError;
pub use guard::Guard;
pub use registry::{ExtensionSlot, Host, SideTableRegistry};
pub use resolver::{
    CompanionProperty, NameResolver, PropertyAccessor, QueryFlags, Resolution, Subject, TypeNameMode,
    Unresolved,
};
pub use side_table::{SideTable, SourceLocation, TableState};
pub use type_info::{EnumInfo, EnumLookup, NamespaceEntry, TypeIndex, TypeInfo, TypeNamespace};
