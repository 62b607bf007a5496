//! Draw queue
//!
//! Collects this frame's contributions and orders them for drawing: ascending
//! priority, so the lowest priority is drawn first and ends up bottom-most,
//! with ties broken by registration order so equal-priority operations always
//! stack the same way.

use crate::foundation::collections::DrawOperationId;
use crate::foundation::math::Vec2;
use crate::render::owner::Contribution;

/// One queued draw
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedDraw<T> {
    /// Operation handle
    pub id: DrawOperationId,
    /// Draw priority (lower first)
    pub priority: i32,
    /// Registration sequence number, the tie-breaker
    pub sequence: u64,
    /// Offset requested by the owner
    pub offset: Vec2,
    /// Payload the registry needs to run the draw
    pub payload: T,
}

/// Priority-ordered queue for a frame
#[derive(Debug)]
pub struct DrawQueue<T> {
    items: Vec<QueuedDraw<T>>,
}

impl<T> DrawQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Create an empty queue with room for `capacity` draws
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
        }
    }

    /// Queue `payload` according to its owner's contribution
    pub fn push(&mut self, id: DrawOperationId, sequence: u64, contribution: Contribution, payload: T) {
        self.items.push(QueuedDraw {
            id,
            priority: contribution.priority,
            sequence,
            offset: contribution.offset,
            payload,
        });
    }

    /// Number of queued draws
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing was queued
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Draws in drawing order
    pub fn into_ordered(mut self) -> Vec<QueuedDraw<T>> {
        self.items.sort_by_key(|item| (item.priority, item.sequence));
        self.items
    }
}

impl<T> Default for DrawQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
