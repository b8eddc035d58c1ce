//! Active-binding bookkeeping for one host object.
//!
//! Invariants:
//! - At most one binding record per property slot.
//! - Bit `i` of `bits` is set iff `records` holds a record for slot `i`.
//! - Records are owned by the list; removing one hands ownership back.

use crate::bitset::BitSet;
use crate::list::{SinglyLinkedList, SinglyLinkedListLink, intrusive_adapter};

/// Dense property slot index assigned by the host type's static metadata.
pub type SlotIndex = u32;

/// Why a binding lost its slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DetachReason {
    /// Another binding was attached to the same slot.
    Superseded,
    /// The host object was destroyed.
    TargetDestroyed,
    /// The context the host was created in was torn down.
    ContextDestroyed,
}

/// An active binding expression occupying one property slot.
///
/// Evaluation is out of scope here; the side table only tracks which slot a
/// binding holds and tells it when it is forced off that slot.
pub trait Binding {
    fn detached(&mut self, reason: DetachReason);
}

struct BindingRecord {
    link: SinglyLinkedListLink,
    slot: SlotIndex,
    binding: Box<dyn Binding>,
}

intrusive_adapter!(BindingAdapter = Box<BindingRecord>: BindingRecord { link: SinglyLinkedListLink });

pub(crate) struct BindingList {
    records: SinglyLinkedList<BindingAdapter>,
    bits: BitSet,
}

impl BindingList {
    pub(crate) fn new() -> Self {
        Self {
            records: SinglyLinkedList::new(BindingAdapter::new()),
            bits: BitSet::new(),
        }
    }

    #[inline]
    pub(crate) fn has(&self, slot: SlotIndex) -> bool {
        self.bits.test(slot as usize)
    }

    pub(crate) fn len(&self) -> usize {
        self.bits.count_ones()
    }

    /// Links `binding` at the head. Returns the previous occupant of `slot`,
    /// which the caller must signal as superseded.
    pub(crate) fn insert(&mut self, slot: SlotIndex, binding: Box<dyn Binding>) -> Option<Box<dyn Binding>> {
        let previous = self.remove(slot);
        self.bits.set(slot as usize);
        self.records.push_front(Box::new(BindingRecord {
            link: SinglyLinkedListLink::new(),
            slot,
            binding,
        }));
        previous
    }

    pub(crate) fn remove(&mut self, slot: SlotIndex) -> Option<Box<dyn Binding>> {
        if !self.has(slot) {
            return None;
        }
        let mut cursor = self.records.cursor_mut();
        loop {
            let hit = match cursor.peek_next().get() {
                Some(record) => record.slot == slot,
                None => break,
            };
            if hit {
                let record = cursor.remove_next()?;
                self.bits.clear(slot as usize);
                return Some(record.binding);
            }
            cursor.move_next();
        }
        debug_assert!(false, "binding bit {slot} set without a record");
        self.bits.clear(slot as usize);
        None
    }

    /// Unlinks the most recently attached binding together with its slot.
    pub(crate) fn pop(&mut self) -> Option<(SlotIndex, Box<dyn Binding>)> {
        let record = self.records.pop_front()?;
        self.bits.clear(record.slot as usize);
        Some((record.slot, record.binding))
    }

    pub(crate) fn get(&self, slot: SlotIndex) -> Option<&dyn Binding> {
        if !self.has(slot) {
            return None;
        }
        self.records
            .iter()
            .find(|record| record.slot == slot)
            .map(|record| &*record.binding)
    }

    pub(crate) fn slots(&self) -> impl Iterator<Item = SlotIndex> + '_ {
        self.records.iter().map(|record| record.slot)
    }
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<(&'static str, DetachReason)>>>;

    struct Recorder {
        name: &'static str,
        log: Log,
    }

    impl Binding for Recorder {
        fn detached(&mut self, reason: DetachReason) {
            self.log.borrow_mut().push((self.name, reason));
        }
    }

    fn recorder(name: &'static str, log: &Log) -> Box<dyn Binding> {
        Box::new(Recorder {
            name,
            log: Rc::clone(log),
        })
    }

    #[test]
    fn insert_sets_bit_and_remove_clears_it() {
        let log = Log::default();
        let mut list = BindingList::new();
        assert!(list.insert(3, recorder("a", &log)).is_none());
        assert!(list.has(3));
        assert!(!list.has(2));
        assert_eq!(list.len(), 1);

        assert!(list.remove(3).is_some());
        assert!(!list.has(3));
        assert_eq!(list.len(), 0);
        assert!(list.remove(3).is_none());
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn second_insert_returns_previous_occupant() {
        let log = Log::default();
        let mut list = BindingList::new();
        list.insert(7, recorder("first", &log));
        let mut previous = list.insert(7, recorder("second", &log)).expect("occupant");
        previous.detached(DetachReason::Superseded);
        assert_eq!(log.borrow().as_slice(), &[("first", DetachReason::Superseded)]);
        assert_eq!(list.len(), 1);
        assert_eq!(list.slots().collect::<Vec<_>>(), vec![7]);
    }

    #[test]
    fn pop_drains_newest_first() {
        let log = Log::default();
        let mut list = BindingList::new();
        for slot in [1, 40, 2] {
            list.insert(slot, recorder("x", &log));
        }
        let mut drained = Vec::new();
        while let Some((slot, _)) = list.pop() {
            drained.push(slot);
        }
        assert_eq!(drained, vec![2, 40, 1]);
        assert_eq!(list.len(), 0);
        assert_eq!(list.bits.capacity(), 64);
    }
}
