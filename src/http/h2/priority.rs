//! Stream priority tree (RFC 7540 Section 5.3)
//!
//! The tree is only a scheduling hint: it orders streams that have DATA
//! ready when [`SchedulingPolicy::Priority`](super::config::SchedulingPolicy)
//! is selected. Stream 0 is the virtual root.
//!
//! Nodes for streams that were never opened (PRIORITY on an idle id, or a
//! dependency on an unseen id) are capped; the oldest is dropped first.

use super::error::{Error, ErrorCode, Result};
use super::frames::PrioritySpec;
use std::collections::{HashMap, VecDeque};
use tracing::trace;

/// Default cap on nodes not backed by an opened stream
pub const DEFAULT_MAX_IDLE_NODES: usize = 1024;

#[derive(Debug, Clone)]
struct Node {
    parent: u32,
    weight: u16,
    children: Vec<u32>,
    /// The stream is closed; the node stays while it has children
    released: bool,
    /// No stream was ever opened for this id
    idle: bool,
}

impl Node {
    fn new(parent: u32, weight: u16, idle: bool) -> Self {
        Node {
            parent,
            weight: weight.clamp(1, 256),
            children: Vec::new(),
            released: false,
            idle,
        }
    }
}

/// Dependency tree of the streams of one connection
#[derive(Debug, Clone)]
pub struct PriorityTree {
    nodes: HashMap<u32, Node>,
    /// Idle node ids in creation order; may hold ids that are no longer idle
    idle_order: VecDeque<u32>,
    idle_count: usize,
    max_idle: usize,
}

impl PriorityTree {
    /// Create a tree holding only the root
    pub fn new() -> Self {
        Self::with_max_idle(DEFAULT_MAX_IDLE_NODES)
    }

    /// Create a tree keeping at most `max_idle` nodes for unopened streams
    pub fn with_max_idle(max_idle: usize) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(0, Node::new(0, PrioritySpec::DEFAULT_WEIGHT, false));
        PriorityTree {
            nodes,
            idle_order: VecDeque::new(),
            idle_count: 0,
            // a single update may create two idle nodes
            max_idle: max_idle.max(2),
        }
    }

    /// Number of nodes, the root excluded
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Check if the tree holds only the root
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nodes held for streams that were never opened
    pub fn idle_len(&self) -> usize {
        self.idle_count
    }

    /// Check if a stream has a node
    pub fn contains(&self, stream_id: u32) -> bool {
        stream_id != 0 && self.nodes.contains_key(&stream_id)
    }

    /// Parent of a stream
    pub fn parent(&self, stream_id: u32) -> Option<u32> {
        self.nodes.get(&stream_id).map(|n| n.parent)
    }

    /// Weight of a stream (1-256)
    pub fn weight(&self, stream_id: u32) -> Option<u16> {
        self.nodes.get(&stream_id).map(|n| n.weight)
    }

    /// Direct children of a stream
    pub fn children(&self, stream_id: u32) -> &[u32] {
        self.nodes
            .get(&stream_id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Record an opened stream, with the default priority unless it
    /// already has a node
    pub fn insert(&mut self, stream_id: u32) {
        if stream_id == 0 {
            return;
        }
        match self.nodes.get_mut(&stream_id) {
            Some(node) => {
                if node.idle {
                    node.idle = false;
                    self.idle_count -= 1;
                }
            }
            None => {
                self.nodes.insert(
                    stream_id,
                    Node::new(0, PrioritySpec::DEFAULT_WEIGHT, false),
                );
                if let Some(root) = self.nodes.get_mut(&0) {
                    root.children.push(stream_id);
                }
            }
        }
    }

    /// Apply a priority block from HEADERS or PRIORITY
    ///
    /// A stream may not depend on itself.
    pub fn reprioritize(&mut self, stream_id: u32, spec: PrioritySpec) -> Result<()> {
        if spec.stream_dependency == stream_id {
            return Err(Error::stream(
                stream_id,
                ErrorCode::ProtocolError,
                "stream depends on itself",
            ));
        }

        self.ensure_node(stream_id);
        self.ensure_node(spec.stream_dependency);

        // A new parent that sits below this stream is first moved up to
        // this stream's current parent.
        if self.is_descendant(spec.stream_dependency, stream_id) {
            let old_parent = self.nodes.get(&stream_id).map_or(0, |n| n.parent);
            self.attach(spec.stream_dependency, old_parent);
        }

        let parent = spec.stream_dependency;
        if spec.exclusive {
            let siblings: Vec<u32> = self
                .children(parent)
                .iter()
                .copied()
                .filter(|&c| c != stream_id)
                .collect();
            for child in siblings {
                self.attach(child, stream_id);
            }
        }
        self.attach(stream_id, parent);
        if let Some(node) = self.nodes.get_mut(&stream_id) {
            node.weight = spec.weight.clamp(1, 256);
        }
        trace!(
            stream_id,
            parent,
            weight = spec.weight,
            exclusive = spec.exclusive,
            "stream reprioritized"
        );
        self.evict_idle();
        Ok(())
    }

    /// Note that a stream closed; its node goes once nothing depends on it
    pub fn release(&mut self, stream_id: u32) {
        if stream_id == 0 {
            return;
        }
        if let Some(node) = self.nodes.get_mut(&stream_id) {
            node.released = true;
            if node.idle {
                node.idle = false;
                self.idle_count -= 1;
            }
        }
        self.collect(stream_id);
    }

    /// Order `ready` streams for sending: parents before their dependents,
    /// heavier siblings first
    pub fn schedule(&self, ready: &[u32]) -> Vec<u32> {
        let mut order = Vec::with_capacity(ready.len());
        let mut stack = vec![0u32];
        while let Some(id) = stack.pop() {
            if id != 0 && ready.contains(&id) {
                order.push(id);
            }
            let mut children = self.children(id).to_vec();
            // popped from the end, so sort lightest first
            children.sort_by(|a, b| {
                let wa = self.weight(*a).unwrap_or(0);
                let wb = self.weight(*b).unwrap_or(0);
                wa.cmp(&wb).then(b.cmp(a))
            });
            stack.extend(children);
        }
        // streams without a node keep their relative order at the end
        order.extend(ready.iter().copied().filter(|id| !self.contains(*id)));
        order
    }

    fn ensure_node(&mut self, stream_id: u32) {
        if !self.nodes.contains_key(&stream_id) {
            self.nodes
                .insert(stream_id, Node::new(0, PrioritySpec::DEFAULT_WEIGHT, true));
            if let Some(root) = self.nodes.get_mut(&0) {
                root.children.push(stream_id);
            }
            self.idle_order.push_back(stream_id);
            self.idle_count += 1;
        }
    }

    /// Drop the oldest idle nodes until the cap holds; their children move
    /// up to the dropped node's parent
    fn evict_idle(&mut self) {
        while self.idle_count > self.max_idle {
            let id = match self.idle_order.pop_front() {
                Some(id) => id,
                None => break,
            };
            let (parent, children) = match self.nodes.get(&id) {
                Some(node) if node.idle => (node.parent, node.children.clone()),
                _ => continue,
            };
            for child in children {
                self.attach(child, parent);
            }
            self.nodes.remove(&id);
            self.idle_count -= 1;
            if let Some(p) = self.nodes.get_mut(&parent) {
                p.children.retain(|&c| c != id);
            }
            trace!(stream_id = id, "idle priority node evicted");
            self.collect(parent);
        }
        // ids that were opened or released since are stale
        if self.idle_order.len() > 2 * self.max_idle {
            let nodes = &self.nodes;
            self.idle_order
                .retain(|id| nodes.get(id).map_or(false, |n| n.idle));
        }
    }

    fn attach(&mut self, stream_id: u32, parent: u32) {
        let old_parent = match self.nodes.get(&stream_id) {
            Some(node) => node.parent,
            None => return,
        };
        if let Some(old) = self.nodes.get_mut(&old_parent) {
            old.children.retain(|&c| c != stream_id);
        }
        if let Some(node) = self.nodes.get_mut(&stream_id) {
            node.parent = parent;
        }
        if let Some(new) = self.nodes.get_mut(&parent) {
            new.children.push(stream_id);
        }
        if old_parent != parent {
            self.collect(old_parent);
        }
    }

    fn is_descendant(&self, candidate: u32, ancestor: u32) -> bool {
        let mut current = candidate;
        while current != 0 {
            current = match self.nodes.get(&current) {
                Some(node) => node.parent,
                None => return false,
            };
            if current == ancestor {
                return true;
            }
        }
        false
    }

    /// Remove released, childless nodes walking up from `stream_id`
    fn collect(&mut self, mut stream_id: u32) {
        while stream_id != 0 {
            let parent = match self.nodes.get(&stream_id) {
                Some(node) if node.released && node.children.is_empty() => node.parent,
                _ => return,
            };
            self.nodes.remove(&stream_id);
            if let Some(p) = self.nodes.get_mut(&parent) {
                p.children.retain(|&c| c != stream_id);
            }
            stream_id = parent;
        }
    }
}

impl Default for PriorityTree {
    fn default() -> Self {
        Self::new()
    }
}
