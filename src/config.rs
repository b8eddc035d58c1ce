use crate::binding::SlotIndex;

const DEFAULT_MAX_SLOT_INDEX: SlotIndex = 0xffff;

/// Registry-wide limits and misuse policy.
///
/// Every side table keeps a copy of the configuration it was created under.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RegistryConfig {
    /// Highest property slot index a binding may occupy.
    pub max_slot_index: SlotIndex,
    /// Panic on programming errors instead of logging and returning them.
    pub strict: bool,
}

impl RegistryConfig {
    pub const fn new(max_slot_index: SlotIndex, strict: bool) -> Self {
        Self {
            max_slot_index,
            strict,
        }
    }

    pub fn with_max_slot_index(mut self, max_slot_index: SlotIndex) -> Self {
        self.max_slot_index = max_slot_index;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SLOT_INDEX, cfg!(debug_assertions))
    }
}
