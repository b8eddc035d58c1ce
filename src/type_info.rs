//! Static type metadata consumed by name resolution: enumerations along a
//! derivation chain and namespaces of named types.

use core::fmt;
use rustc_hash::FxHashMap;
use std::rc::Rc;

/// Dense identifier of a registered type; keys companion caches.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TypeIndex(pub u32);

impl TypeIndex {
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TypeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type#{}", self.0)
    }
}

/// One enumeration declared by a type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnumInfo {
    name: String,
    keys: Vec<(String, i32)>,
}

impl EnumInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keys: Vec::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>, value: i32) -> Self {
        self.keys.push((key.into(), value));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_of(&self, key: &str) -> Option<i32> {
        self.keys
            .iter()
            .find(|(name, _)| name == key)
            .map(|&(_, value)| value)
    }

    pub fn keys(&self) -> impl Iterator<Item = (&str, i32)> + '_ {
        self.keys.iter().map(|(name, value)| (name.as_str(), *value))
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EnumLookup {
    Found(i32),
    /// Differing values for the name at one derivation level.
    Ambiguous,
    Missing,
}

/// A type with its enumerations and optional base type.
#[derive(Clone, Debug)]
pub struct TypeInfo {
    name: String,
    index: TypeIndex,
    base: Option<Rc<TypeInfo>>,
    enums: Vec<EnumInfo>,
}

impl TypeInfo {
    pub fn new(name: impl Into<String>, index: TypeIndex) -> Self {
        Self {
            name: name.into(),
            index,
            base: None,
            enums: Vec::new(),
        }
    }

    pub fn with_base(mut self, base: Rc<TypeInfo>) -> Self {
        self.base = Some(base);
        self
    }

    pub fn with_enum(mut self, info: EnumInfo) -> Self {
        self.enums.push(info);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> TypeIndex {
        self.index
    }

    pub fn base(&self) -> Option<&Rc<TypeInfo>> {
        self.base.as_ref()
    }

    /// Enumerations declared by this type itself, not its bases.
    pub fn enums(&self) -> &[EnumInfo] {
        &self.enums
    }

    /// This type followed by its bases, most derived first.
    pub fn ancestry(&self) -> impl Iterator<Item = &TypeInfo> + '_ {
        core::iter::successors(Some(self), |ty| ty.base.as_deref())
    }

    /// Finds `key` among the enumerators, most derived type first. The first
    /// level declaring the key decides; a derived redeclaration shadows its
    /// base.
    pub fn lookup_enumerator(&self, key: &str) -> EnumLookup {
        for ty in self.ancestry() {
            let mut found = None;
            for value in ty.enums.iter().filter_map(|info| info.value_of(key)) {
                match found {
                    None => found = Some(value),
                    Some(previous) if previous != value => return EnumLookup::Ambiguous,
                    Some(_) => {}
                }
            }
            if let Some(value) = found {
                return EnumLookup::Found(value);
            }
        }
        EnumLookup::Missing
    }

    pub fn is_a(&self, other: &TypeInfo) -> bool {
        self.ancestry().any(|ty| ty.index == other.index)
    }
}

#[derive(Clone, Debug)]
pub enum NamespaceEntry {
    Type(Rc<TypeInfo>),
    Namespace(Rc<TypeNamespace>),
}

/// Named collection of types, as produced by an import qualifier.
#[derive(Clone, Debug, Default)]
pub struct TypeNamespace {
    name: String,
    members: FxHashMap<String, NamespaceEntry>,
}

impl TypeNamespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: FxHashMap::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers `ty` under its own name. Returns the entry it replaced.
    pub fn insert_type(&mut self, ty: Rc<TypeInfo>) -> Option<NamespaceEntry> {
        self.members
            .insert(ty.name().to_owned(), NamespaceEntry::Type(ty))
    }

    pub fn insert_namespace(&mut self, namespace: Rc<TypeNamespace>) -> Option<NamespaceEntry> {
        self.members
            .insert(namespace.name().to_owned(), NamespaceEntry::Namespace(namespace))
    }

    pub fn get(&self, name: &str) -> Option<&NamespaceEntry> {
        self.members.get(name)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
