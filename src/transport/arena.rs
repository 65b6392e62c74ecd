//! Opaque integer handles backed by a slot map.

use crate::error::{TransportError, TransportResult};
use std::collections::HashMap;

/// Maps opaque `u32` tokens to backend-owned state.
///
/// Tokens are never reused within one arena, so a stale handle is reported as
/// [`TransportError::InvalidHandle`] instead of aliasing a newer object.
#[derive(Debug)]
pub struct HandleArena<T> {
    next: u32,
    slots: HashMap<u32, T>,
}

impl<T> HandleArena<T> {
    /// Create an arena whose first token is `base`.
    pub fn with_base(base: u32) -> Self {
        Self {
            next: base,
            slots: HashMap::new(),
        }
    }

    /// Store `value` and return its token.
    pub fn insert(&mut self, value: T) -> u32 {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        self.slots.insert(id, value);
        id
    }

    /// Borrow the value behind `id`.
    pub fn get(&self, id: u32) -> TransportResult<&T> {
        self.slots.get(&id).ok_or(TransportError::InvalidHandle(id))
    }

    /// Mutably borrow the value behind `id`.
    pub fn get_mut(&mut self, id: u32) -> TransportResult<&mut T> {
        self.slots
            .get_mut(&id)
            .ok_or(TransportError::InvalidHandle(id))
    }

    /// Release `id`, returning its value.
    pub fn remove(&mut self, id: u32) -> TransportResult<T> {
        self.slots
            .remove(&id)
            .ok_or(TransportError::InvalidHandle(id))
    }

    /// Tokens whose value matches `pred`.
    pub fn ids_where(&self, pred: impl Fn(&T) -> bool) -> Vec<u32> {
        self.slots
            .iter()
            .filter(|(_, value)| pred(value))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Iterate over live values.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.slots.values()
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no handle is live.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
