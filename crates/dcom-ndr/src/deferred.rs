//! Deferred pointer queues
//!
//! NDR writes a unique pointer's referent id where the pointer appears but
//! serializes the referent only after the enclosing level (struct, array,
//! or top-level parameter) is complete. Each level owns one queue and drains
//! it in FIFO order; referents that contain pointers themselves append to the
//! same queue while it drains.
//!
//! On decode the referent bytes arrive after the level, so the level's value
//! tree holds pending slots until [`DeferredReads::resolve`] swaps the
//! decoded referents in.

use std::collections::VecDeque;

use crate::error::{NdrError, Result};
use crate::types::TypeDescriptor;
use crate::value::{PointerState, Value};

/// Referents waiting to be written.
#[derive(Debug, Default)]
pub struct DeferredWrites<'a> {
    queue: VecDeque<(&'a TypeDescriptor, &'a Value)>,
}

impl<'a> DeferredWrites<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, ty: &'a TypeDescriptor, referent: &'a Value) {
        self.queue.push_back((ty, referent));
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn pop(&mut self) -> Option<(&'a TypeDescriptor, &'a Value)> {
        self.queue.pop_front()
    }
}

/// Referents waiting to be read, and the slots they fill.
#[derive(Debug, Default)]
pub struct DeferredReads<'a> {
    queue: VecDeque<(&'a TypeDescriptor, usize)>,
    slots: Vec<Option<Value>>,
}

impl<'a> DeferredReads<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Queue a referent of type `ty` and return the slot it will fill.
    pub(crate) fn reserve(&mut self, ty: &'a TypeDescriptor) -> usize {
        let slot = self.slots.len();
        self.slots.push(None);
        self.queue.push_back((ty, slot));
        slot
    }

    pub(crate) fn pop(&mut self) -> Option<(&'a TypeDescriptor, usize)> {
        self.queue.pop_front()
    }

    pub(crate) fn fill(&mut self, slot: usize, referent: Value) {
        if let Some(entry) = self.slots.get_mut(slot) {
            *entry = Some(referent);
        }
    }

    /// Replace every pending pointer in `value` with its decoded referent.
    ///
    /// Must run after the queue is drained; a slot left empty is an error.
    pub(crate) fn resolve(&mut self, value: &mut Value) -> Result<()> {
        match value {
            Value::Pointer(ptr) => {
                if let PointerState::Pending(slot) = ptr.0 {
                    let mut referent = self
                        .slots
                        .get_mut(slot)
                        .and_then(Option::take)
                        .ok_or(NdrError::InvalidPointer(slot))?;
                    self.resolve(&mut referent)?;
                    ptr.0 = PointerState::Resolved(Box::new(referent));
                }
                Ok(())
            }
            Value::Struct(members) => members.iter_mut().try_for_each(|m| self.resolve(m)),
            Value::Union(union) => self.resolve(&mut union.value),
            Value::Array(array) => array
                .elements_mut()
                .iter_mut()
                .try_for_each(|e| self.resolve(e)),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::PointerValue;

    #[test]
    fn test_writes_are_fifo() {
        let ty = TypeDescriptor::I32;
        let (a, b) = (Value::I32(1), Value::I32(2));
        let mut q = DeferredWrites::new();
        q.push(&ty, &a);
        q.push(&ty, &b);
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop().map(|(_, v)| v), Some(&a));
        assert_eq!(q.pop().map(|(_, v)| v), Some(&b));
        assert!(q.is_empty());
    }

    #[test]
    fn test_resolve_nested_pending() {
        let ty = TypeDescriptor::I32;
        let mut q = DeferredReads::new();
        let outer = q.reserve(&ty);
        let inner = q.reserve(&ty);
        q.fill(inner, Value::I32(9));
        q.fill(outer, Value::Pointer(PointerValue::pending(inner)));

        let mut value = Value::Struct(vec![Value::Pointer(PointerValue::pending(outer))]);
        q.resolve(&mut value).unwrap();

        let expected = Value::Struct(vec![Value::Pointer(PointerValue::new(Value::Pointer(
            PointerValue::new(Value::I32(9)),
        )))]);
        assert_eq!(value, expected);
    }

    #[test]
    fn test_resolve_missing_slot_fails() {
        let mut q = DeferredReads::new();
        let mut value = Value::Pointer(PointerValue::pending(3));
        assert!(matches!(q.resolve(&mut value), Err(NdrError::InvalidPointer(3))));
    }
}
