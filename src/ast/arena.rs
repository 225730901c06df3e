use std::ops::{Index, IndexMut};

use super::{Node, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("node arena exhausted ({limit} nodes)")]
pub struct ArenaExhausted {
    pub limit: usize,
}

/// Owns every node built during one parse.
///
/// Nodes are addressed by [NodeId]. A node discarded by the parser can be
/// handed back with [Arena::recycle]; its slot is reused by the next
/// allocation. The limit counts live nodes, so recycling frees capacity.
#[derive(Debug, Clone)]
pub struct Arena {
    slots: Vec<Option<Node>>,
    free: Vec<NodeId>,
    live: usize,
    limit: usize,
}

impl Default for Arena {
    fn default() -> Self {
        Self::with_limit(usize::MAX)
    }
}

impl Arena {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            limit,
        }
    }

    pub fn alloc(&mut self, node: Node) -> Result<NodeId, ArenaExhausted> {
        if self.live >= self.limit {
            return Err(ArenaExhausted { limit: self.limit });
        }
        self.live += 1;
        if let Some(id) = self.free.pop() {
            self.slots[id.index()] = Some(node);
            return Ok(id);
        }
        let id = NodeId(self.slots.len() as u32);
        self.slots.push(Some(node));
        Ok(id)
    }

    /// Returns `id` to the freelist. Its children are left alone.
    pub fn recycle(&mut self, id: NodeId) {
        if let Some(slot) = self.slots.get_mut(id.index()) {
            if slot.take().is_some() {
                self.live -= 1;
                self.free.push(id);
            }
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.slots.get(id.index()).and_then(|slot| slot.as_ref())
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Live nodes in allocation-slot order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|node| (NodeId(i as u32), node)))
    }

    /// Number of slots ever handed out, live or recycled.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

impl Index<NodeId> for Arena {
    type Output = Node;
    fn index(&self, id: NodeId) -> &Node {
        match self.slots.get(id.index()) {
            Some(Some(node)) => node,
            _ => panic!("dangling node id {:?}", id),
        }
    }
}

impl IndexMut<NodeId> for Arena {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        match self.slots.get_mut(id.index()) {
            Some(Some(node)) => node,
            _ => panic!("dangling node id {:?}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ast::{NodeKind, DUMMY_RANGE};

    fn node(kind: NodeKind) -> Node {
        Node {
            kind,
            range: DUMMY_RANGE,
            line: 1,
            file: 0,
        }
    }

    #[test]
    fn test_recycle_reuses_slot() {
        let mut arena = Arena::default();
        let a = arena.alloc(node(NodeKind::Nil)).unwrap();
        let b = arena.alloc(node(NodeKind::True)).unwrap();
        arena.recycle(a);
        assert_eq!(arena.get(a), None);
        let c = arena.alloc(node(NodeKind::False)).unwrap();
        assert_eq!(c, a);
        assert_eq!(arena[c].kind, NodeKind::False);
        assert_eq!(arena[b].kind, NodeKind::True);
        assert_eq!(arena.slot_count(), 2);
        assert_eq!(arena.live_count(), 2);
    }

    #[test]
    fn test_iter_skips_recycled() {
        let mut arena = Arena::default();
        let a = arena.alloc(node(NodeKind::Nil)).unwrap();
        let b = arena.alloc(node(NodeKind::True)).unwrap();
        arena.recycle(a);
        let live: Vec<NodeId> = arena.iter().map(|(id, _)| id).collect();
        assert_eq!(live, vec![b]);
    }

    #[test]
    fn test_recycle_twice_is_harmless() {
        let mut arena = Arena::default();
        let a = arena.alloc(node(NodeKind::Nil)).unwrap();
        arena.recycle(a);
        arena.recycle(a);
        assert_eq!(arena.live_count(), 0);
        let b = arena.alloc(node(NodeKind::Nil)).unwrap();
        let c = arena.alloc(node(NodeKind::Nil)).unwrap();
        assert!(b != c);
    }

    #[test]
    fn test_limit() {
        let mut arena = Arena::with_limit(2);
        let a = arena.alloc(node(NodeKind::Nil)).unwrap();
        arena.alloc(node(NodeKind::Nil)).unwrap();
        assert_eq!(
            arena.alloc(node(NodeKind::Nil)),
            Err(ArenaExhausted { limit: 2 })
        );
        arena.recycle(a);
        assert!(arena.alloc(node(NodeKind::Nil)).is_ok());
    }
}
