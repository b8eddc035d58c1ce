use crate::binding::SlotIndex;
use crate::registry::Host;
use std::rc::Rc;

/// Compiled template that can finish initialising properties it postponed.
pub trait CompiledTemplate {
    /// Applies the postponed properties recorded at `index` to `host` and
    /// returns the slots it wrote.
    fn materialize(&self, index: u32, host: &dyn Host) -> Vec<SlotIndex>;
}

/// Pending deferred-initialisation descriptor.
#[derive(Clone)]
pub struct Deferred {
    template: Rc<dyn CompiledTemplate>,
    index: u32,
}

impl Deferred {
    pub fn new(template: Rc<dyn CompiledTemplate>, index: u32) -> Self {
        Self { template, index }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn template(&self) -> &Rc<dyn CompiledTemplate> {
        &self.template
    }

    pub(crate) fn run(self, host: &dyn Host) -> Vec<SlotIndex> {
        self.template.materialize(self.index, host)
    }
}

impl core::fmt::Debug for Deferred {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Deferred").field("index", &self.index).finish_non_exhaustive()
    }
}
