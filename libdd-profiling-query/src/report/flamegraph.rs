// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::aggregate::{NodeId, StackTree};
use crate::frames::Frame;
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone, Debug, Serialize)]
pub struct Flamegraph {
    pub root: FlamegraphNode,
    /// The root's cumulative value; in a diff, the total of B.
    pub total: i64,
    pub unit: String,
    /// Number of levels, the root included.
    pub height: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct FlamegraphNode {
    /// `None` at the root.
    pub frame: Option<Arc<Frame>>,
    pub cumulative: i64,
    pub diff: i64,
    pub children: Vec<FlamegraphNode>,
}

impl Flamegraph {
    pub fn new(tree: &StackTree, unit: &str) -> Self {
        Self {
            root: build(tree),
            total: tree.total(),
            unit: unit.to_string(),
            height: tree.height(),
        }
    }
}

impl Drop for FlamegraphNode {
    // Flattens the subtree first so deep stacks don't recurse on drop.
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

fn open(tree: &StackTree, id: NodeId) -> (FlamegraphNode, std::vec::IntoIter<NodeId>) {
    let source = tree.node(id);
    let node = FlamegraphNode {
        frame: source.frame.clone(),
        cumulative: source.cumulative,
        diff: source.diff,
        children: Vec::new(),
    };
    (node, tree.children(id).into_iter())
}

/// Copies the tree depth first with an explicit stack. A node is attached to
/// its parent once all of its children are, which keeps the sorted order.
fn build(tree: &StackTree) -> FlamegraphNode {
    let (mut root, mut remaining) = open(tree, StackTree::ROOT);
    let mut pending: Vec<(FlamegraphNode, std::vec::IntoIter<NodeId>)> = Vec::new();
    loop {
        let next = match pending.last_mut() {
            Some((_, children)) => children.next(),
            None => remaining.next(),
        };
        if let Some(child) = next {
            pending.push(open(tree, child));
            continue;
        }
        let Some((done, _)) = pending.pop() else {
            return root;
        };
        match pending.last_mut() {
            Some((parent, _)) => parent.children.push(done),
            None => root.children.push(done),
        }
    }
}
