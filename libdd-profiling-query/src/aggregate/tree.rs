// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::collections::identifiable::FxIndexMap;
use crate::error::AggregationError;
use crate::frames::{Frame, FrameKey, ResolvedStack};
use std::cmp::Reverse;
use std::sync::Arc;

/// Which operand a stack belongs to. A diff is `B - A`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Side {
    Single,
    A,
    B,
}

/// What one stack adds to every node on its path.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct Contribution {
    cumulative: i64,
    diff: i64,
}

impl Contribution {
    fn new(side: Side, value: i64) -> Result<Self, AggregationError> {
        Ok(match side {
            Side::Single => Self {
                cumulative: value,
                diff: 0,
            },
            Side::A => Self {
                cumulative: 0,
                diff: value
                    .checked_neg()
                    .ok_or(AggregationError::Overflow("negating a baseline value"))?,
            },
            Side::B => Self {
                cumulative: value,
                diff: value,
            },
        })
    }
}

pub type NodeId = usize;

#[derive(Clone, Debug)]
pub struct Node {
    pub key: Option<FrameKey>,
    /// Among the frames merged into this node, the one with the smallest
    /// location id. `None` for the root.
    pub frame: Option<Arc<Frame>>,
    pub cumulative: i64,
    pub diff: i64,
    /// Value of the stacks ending exactly here.
    pub flat: i64,
    children: FxIndexMap<FrameKey, NodeId>,
}

impl Node {
    fn new(key: Option<FrameKey>, frame: Option<Arc<Frame>>) -> Self {
        Self {
            key,
            frame,
            cumulative: 0,
            diff: 0,
            flat: 0,
            children: FxIndexMap::default(),
        }
    }

    fn add(&mut self, cumulative: i64, diff: i64) -> Result<(), AggregationError> {
        self.cumulative = self
            .cumulative
            .checked_add(cumulative)
            .ok_or(AggregationError::Overflow("summing cumulative values"))?;
        self.diff = self
            .diff
            .checked_add(diff)
            .ok_or(AggregationError::Overflow("summing diff values"))?;
        Ok(())
    }

    fn add_flat(&mut self, flat: i64) -> Result<(), AggregationError> {
        self.flat = self
            .flat
            .checked_add(flat)
            .ok_or(AggregationError::Overflow("summing flat values"))?;
        Ok(())
    }

    fn offer_frame(&mut self, frame: &Arc<Frame>) {
        match &self.frame {
            Some(current) if current.location_id <= frame.location_id => {}
            _ => self.frame = Some(frame.clone()),
        }
    }
}

/// Stacks folded into a tree, root to leaf, one node per distinct frame key
/// path. Nodes live in an arena; the root is node 0.
#[derive(Clone, Debug)]
pub struct StackTree {
    nodes: Vec<Node>,
}

impl Default for StackTree {
    fn default() -> Self {
        Self::new()
    }
}

impl StackTree {
    pub const ROOT: NodeId = 0;

    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(None, None)],
        }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn root(&self) -> &Node {
        &self.nodes[Self::ROOT]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Every node but the root, in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().skip(1)
    }

    /// Total value of the tree: the root's cumulative value.
    pub fn total(&self) -> i64 {
        self.root().cumulative
    }

    fn child(&mut self, parent: NodeId, key: &FrameKey, frame: &Arc<Frame>) -> NodeId {
        if let Some(&child) = self.nodes[parent].children.get(key) {
            self.nodes[child].offer_frame(frame);
            return child;
        }
        let child = self.nodes.len();
        self.nodes.push(Node::new(Some(key.clone()), Some(frame.clone())));
        self.nodes[parent].children.insert(key.clone(), child);
        child
    }

    /// Folds one stack into the tree.
    pub fn add(&mut self, side: Side, stack: &ResolvedStack, value: i64) -> Result<(), AggregationError> {
        let contribution = Contribution::new(side, value)?;
        let mut node = Self::ROOT;
        self.nodes[node].add(contribution.cumulative, contribution.diff)?;
        for frame in stack.frames.iter().rev() {
            node = self.child(node, &frame.key(), frame);
            self.nodes[node].add(contribution.cumulative, contribution.diff)?;
        }
        self.nodes[node].add_flat(contribution.cumulative)
    }

    /// Merges `other` into `self`, matching nodes by frame key at each depth
    /// and summing their values.
    pub fn merge(&mut self, other: &StackTree) -> Result<(), AggregationError> {
        let mut pending = vec![(Self::ROOT, Self::ROOT)];
        while let Some((ours, theirs)) = pending.pop() {
            let source = &other.nodes[theirs];
            self.nodes[ours].add(source.cumulative, source.diff)?;
            self.nodes[ours].add_flat(source.flat)?;
            for (key, &their_child) in &source.children {
                let frame = other.nodes[their_child].frame.as_ref();
                let our_child = match (self.nodes[ours].children.get(key), frame) {
                    (Some(&child), Some(frame)) => {
                        self.nodes[child].offer_frame(frame);
                        child
                    }
                    (Some(&child), None) => child,
                    (None, _) => {
                        let child = self.nodes.len();
                        self.nodes.push(Node::new(Some(key.clone()), frame.cloned()));
                        self.nodes[ours].children.insert(key.clone(), child);
                        child
                    }
                };
                pending.push((our_child, their_child));
            }
        }
        Ok(())
    }

    /// Children ordered by descending cumulative value, ties broken by frame
    /// key.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        let mut children: Vec<NodeId> = self.nodes[id].children.values().copied().collect();
        children.sort_by_key(|child| {
            let node = &self.nodes[*child];
            (Reverse(node.cumulative), node.key.clone())
        });
        children
    }

    /// Number of levels, the root included.
    pub fn height(&self) -> usize {
        let mut height = 0;
        let mut pending = vec![(Self::ROOT, 1)];
        while let Some((id, depth)) = pending.pop() {
            height = height.max(depth);
            pending.extend(self.nodes[id].children.values().map(|child| (*child, depth + 1)));
        }
        height
    }

    /// Per-node values by the path of frame keys leading to it, for
    /// comparing trees regardless of arena layout.
    pub fn paths(&self) -> Vec<(Vec<FrameKey>, i64, i64)> {
        let mut paths = Vec::with_capacity(self.nodes.len());
        let mut pending = vec![(Self::ROOT, Vec::new())];
        while let Some((id, path)) = pending.pop() {
            let node = &self.nodes[id];
            for child in node.children.values() {
                let mut child_path = path.clone();
                if let Some(key) = &self.nodes[*child].key {
                    child_path.push(key.clone());
                }
                pending.push((*child, child_path));
            }
            paths.push((path, node.cumulative, node.diff));
        }
        paths.sort();
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::test_utils::*;

    #[test]
    fn single_fold() {
        let mut tree = StackTree::new();
        tree.add(Side::Single, &stack(&["main", "a"]), 3).unwrap();
        tree.add(Side::Single, &stack(&["main", "b"]), 5).unwrap();
        tree.add(Side::Single, &stack(&["main"]), 1).unwrap();

        assert_eq!(tree.total(), 9);
        assert_eq!(tree.height(), 3);
        let main = tree.children(StackTree::ROOT);
        assert_eq!(main.len(), 1);
        let main = tree.node(main[0]);
        assert_eq!(main.cumulative, 9);
        assert_eq!(main.flat, 1);

        // Parent = children + what ends at the parent.
        let children = tree.children(tree.children(StackTree::ROOT)[0]);
        let names: Vec<_> = children
            .iter()
            .map(|id| tree.node(*id).frame.as_ref().unwrap().name())
            .collect();
        assert_eq!(names, ["b", "a"]);
        let sum: i64 = children.iter().map(|id| tree.node(*id).cumulative).sum();
        assert_eq!(sum + main.flat, main.cumulative);
    }

    #[test]
    fn diff_fold() {
        let mut a = StackTree::new();
        a.add(Side::A, &stack(&["main", "gone"]), 4).unwrap();
        a.add(Side::A, &stack(&["main", "kept"]), 1).unwrap();
        let mut b = StackTree::new();
        b.add(Side::B, &stack(&["main", "kept"]), 2).unwrap();
        b.add(Side::B, &stack(&["main", "new"]), 3).unwrap();
        b.merge(&a).unwrap();

        assert_eq!(b.total(), 5);
        assert_eq!(b.root().diff, 0);
        let main = b.children(StackTree::ROOT)[0];
        let values: Vec<_> = b
            .children(main)
            .iter()
            .map(|id| {
                let node = b.node(*id);
                (node.frame.as_ref().unwrap().name(), node.cumulative, node.diff)
            })
            .collect();
        assert_eq!(
            values,
            [
                ("new".to_string(), 3, 3),
                ("kept".to_string(), 2, 1),
                ("gone".to_string(), 0, -4),
            ]
        );
    }

    #[test]
    fn empty_tree() {
        let tree = StackTree::new();
        assert!(tree.is_empty());
        assert_eq!(tree.height(), 1);
        assert_eq!(tree.total(), 0);
    }

    #[test]
    fn overflow_is_an_error() {
        let mut tree = StackTree::new();
        tree.add(Side::Single, &stack(&["main"]), i64::MAX).unwrap();
        let err = tree.add(Side::Single, &stack(&["main"]), 1).unwrap_err();
        assert!(matches!(err, AggregationError::Overflow(_)));
        let err = StackTree::new()
            .add(Side::A, &stack(&["main"]), i64::MIN)
            .unwrap_err();
        assert!(matches!(err, AggregationError::Overflow(_)));
    }
}
