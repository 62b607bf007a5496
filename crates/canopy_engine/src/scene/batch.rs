//! Update batch table
//!
//! A scene keeps its root nodes bucketed by `(batch, tendency)`. Buckets keep
//! insertion order, and the table walks batches in ascending ordinal order,
//! so building a frame plan never needs a sort.

use crate::foundation::collections::NodeId;
use crate::scene::node::{Tendency, UpdateClass};
use std::collections::BTreeMap;

/// Nodes of one batch, split by tendency
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchGroup {
    /// Batch ordinal
    pub batch: u8,
    /// Nodes awaited one at a time, in order
    pub sequential: Vec<NodeId>,
    /// Nodes dispatched together
    pub concurrent: Vec<NodeId>,
}

impl BatchGroup {
    fn push(&mut self, node: NodeId, tendency: Tendency) {
        match tendency {
            Tendency::Sequential => self.sequential.push(node),
            Tendency::Concurrent => self.concurrent.push(node),
        }
    }

    /// Total nodes in the batch
    pub fn len(&self) -> usize {
        self.sequential.len() + self.concurrent.len()
    }

    /// Whether the batch has no nodes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scene-owned table of root nodes keyed by `(batch, tendency)`
#[derive(Debug, Clone, Default)]
pub struct UpdateBatchTable {
    buckets: BTreeMap<(u8, Tendency), Vec<NodeId>>,
}

impl UpdateBatchTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `node` to the bucket for `class`
    pub fn insert(&mut self, node: NodeId, class: UpdateClass) {
        self.buckets.entry((class.batch, class.tendency)).or_default().push(node);
    }

    /// Remove `node` from the bucket for `class`; returns whether it was there
    pub fn remove(&mut self, node: NodeId, class: UpdateClass) -> bool {
        let key = (class.batch, class.tendency);
        let Some(bucket) = self.buckets.get_mut(&key) else {
            return false;
        };
        let Some(position) = bucket.iter().position(|&n| n == node) else {
            return false;
        };
        bucket.remove(position);
        if bucket.is_empty() {
            self.buckets.remove(&key);
        }
        true
    }

    /// Move `node` from one bucket to the end of another
    pub fn reclassify(&mut self, node: NodeId, from: UpdateClass, to: UpdateClass) {
        if from != to && self.remove(node, from) {
            self.insert(node, to);
        }
    }

    /// Nodes in one bucket
    pub fn bucket(&self, class: UpdateClass) -> &[NodeId] {
        self.buckets
            .get(&(class.batch, class.tendency))
            .map_or(&[], Vec::as_slice)
    }

    /// Number of nodes across all buckets
    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Remove everything
    pub fn clear(&mut self) {
        self.buckets.clear();
    }

    /// Batches in ascending order
    pub fn groups(&self) -> Vec<BatchGroup> {
        let mut groups: Vec<BatchGroup> = Vec::new();
        for (&(batch, tendency), nodes) in &self.buckets {
            if groups.last().map_or(true, |group| group.batch != batch) {
                groups.push(BatchGroup {
                    batch,
                    ..BatchGroup::default()
                });
            }
            if let Some(group) = groups.last_mut() {
                for &node in nodes {
                    group.push(node, tendency);
                }
            }
        }
        groups
    }
}

/// Group an ordered node list into ascending batches, keeping relative order
pub fn group_by_batch<I>(nodes: I) -> Vec<BatchGroup>
where
    I: IntoIterator<Item = (NodeId, UpdateClass)>,
{
    let mut table = UpdateBatchTable::new();
    for (node, class) in nodes {
        table.insert(node, class);
    }
    table.groups()
}
