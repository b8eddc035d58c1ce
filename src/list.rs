//! Intrusive lists shared by guards, bindings and context object registries.
//!
//! Invariants:
//! - Nodes embed their link and must not move while linked (keep them boxed).
//! - A node can belong to at most one list per link field at a time.
//! - Non-owned nodes (`UnsafeRef`) must be unlinked before they are dropped;
//!   owned nodes (`Box`) are dropped by the list.
//! - Unlinking a known node goes through `cursor_mut_from_ptr`, never a scan.

pub use intrusive_collections::{
    LinkedList, LinkedListLink, SinglyLinkedList, SinglyLinkedListLink, UnsafeRef, intrusive_adapter,
};
