use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CohortRuntimeError;
use crate::ids::{digest_parts, TreeId, TreeNodeId};
use crate::roster::Roster;
use cohort_transport::Entity;

/// A rooted tree over entities drawn from one roster.
///
/// Trees are immutable and shared as `Arc<Tree>`. Nodes live in an
/// id-keyed arena; navigation (parent, children, entity) goes through
/// the tree rather than through pointers, which keeps the structure
/// cycle-free and serializable.
///
/// Identifiers are content-derived: a node id hashes the roster id, the
/// node's position, its entity index and its children's ids (bottom-up);
/// the tree id hashes the roster id and the root id. Peers that build
/// the same tree independently compute identical ids.
#[derive(Debug, Clone)]
pub struct Tree {
    id: TreeId,
    roster: Arc<Roster>,
    root: TreeNodeId,
    /// Node ids in construction order; the marshal preserves it.
    order: Vec<TreeNodeId>,
    nodes: HashMap<TreeNodeId, TreeNode>,
}

/// One slot in a [`Tree`]: an entity reference plus parent/child links.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    id: TreeNodeId,
    entity_index: usize,
    parent: Option<TreeNodeId>,
    children: Vec<TreeNodeId>,
}

impl TreeNode {
    pub fn id(&self) -> TreeNodeId {
        self.id
    }

    /// Index of this node's entity within the tree's roster.
    pub fn entity_index(&self) -> usize {
        self.entity_index
    }

    pub fn parent(&self) -> Option<TreeNodeId> {
        self.parent
    }

    pub fn children(&self) -> &[TreeNodeId] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

impl Tree {
    /// Build a tree from parallel slot arrays: per slot an entity index,
    /// a parent slot and a child-slot list.
    ///
    /// Validates the shape (single root, consistent links, every slot
    /// reachable) and computes all identifiers bottom-up.
    pub(crate) fn from_structure(
        roster: Arc<Roster>,
        entities: Vec<usize>,
        parents: Vec<Option<usize>>,
        children: Vec<Vec<usize>>,
    ) -> Result<Tree, CohortRuntimeError> {
        let total = entities.len();
        if total == 0 || parents.len() != total || children.len() != total {
            return Err(CohortRuntimeError::InvalidTree(
                "inconsistent slot arrays".into(),
            ));
        }

        let mut roots = parents.iter().enumerate().filter(|(_, p)| p.is_none());
        let root_slot = match (roots.next(), roots.next()) {
            (Some((slot, _)), None) => slot,
            _ => {
                return Err(CohortRuntimeError::InvalidTree(
                    "tree must have exactly one root".into(),
                ))
            }
        };

        let mut child_count = vec![0usize; total];
        for (slot, kids) in children.iter().enumerate() {
            for &child in kids {
                if child >= total || parents[child] != Some(slot) {
                    return Err(CohortRuntimeError::InvalidTree(
                        "child list disagrees with parent links".into(),
                    ));
                }
                child_count[child] += 1;
            }
        }
        if child_count.iter().enumerate().any(|(slot, &c)| {
            if slot == root_slot { c != 0 } else { c != 1 }
        }) {
            return Err(CohortRuntimeError::InvalidTree(
                "every non-root must appear as a child exactly once".into(),
            ));
        }
        if let Some(&bad) = entities.iter().find(|&&e| e >= roster.len()) {
            return Err(CohortRuntimeError::InvalidTree(format!(
                "entity index {bad} outside roster of {}",
                roster.len()
            )));
        }

        // Post-order walk from the root: children ids exist before their
        // parent's id is hashed. Reachability falls out of the visit count.
        let mut ids: Vec<Option<TreeNodeId>> = vec![None; total];
        let mut visited = 0usize;
        let mut stack = vec![(root_slot, 0usize)];
        while let Some((slot, cursor)) = stack.pop() {
            if cursor < children[slot].len() {
                stack.push((slot, cursor + 1));
                stack.push((children[slot][cursor], 0));
                continue;
            }
            let mut parts: Vec<Vec<u8>> = vec![
                b"cohort-tree-node:".to_vec(),
                roster.id().as_bytes().to_vec(),
                (slot as u64).to_le_bytes().to_vec(),
                (entities[slot] as u64).to_le_bytes().to_vec(),
            ];
            for &child in &children[slot] {
                parts.push(ids[child].expect("child visited before parent").as_bytes().to_vec());
            }
            let refs: Vec<&[u8]> = parts.iter().map(|p| p.as_slice()).collect();
            ids[slot] = Some(TreeNodeId::from_bytes(digest_parts(&refs)));
            visited += 1;
        }
        if visited != total {
            return Err(CohortRuntimeError::InvalidTree(
                "unreachable slots in tree".into(),
            ));
        }

        let slot_id = |slot: usize| ids[slot].expect("all slots visited");
        let mut nodes = HashMap::with_capacity(total);
        let mut order = Vec::with_capacity(total);
        for slot in 0..total {
            let id = slot_id(slot);
            order.push(id);
            nodes.insert(
                id,
                TreeNode {
                    id,
                    entity_index: entities[slot],
                    parent: parents[slot].map(slot_id),
                    children: children[slot].iter().map(|&c| slot_id(c)).collect(),
                },
            );
        }

        let root = slot_id(root_slot);
        let id = TreeId::from_bytes(digest_parts(&[
            b"cohort-tree:",
            roster.id().as_bytes(),
            root.as_bytes(),
        ]));

        Ok(Tree {
            id,
            roster,
            root,
            order,
            nodes,
        })
    }

    pub fn id(&self) -> TreeId {
        self.id
    }

    pub fn roster(&self) -> &Arc<Roster> {
        &self.roster
    }

    pub fn root_id(&self) -> TreeNodeId {
        self.root
    }

    pub fn root(&self) -> &TreeNode {
        self.nodes.get(&self.root).expect("root is always present")
    }

    pub fn node(&self, id: TreeNodeId) -> Option<&TreeNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: TreeNodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All node ids in construction order.
    pub fn node_ids(&self) -> &[TreeNodeId] {
        &self.order
    }

    /// The entity a node stands for.
    pub fn entity_of(&self, id: TreeNodeId) -> Option<&Entity> {
        self.node(id).and_then(|n| self.roster.get(n.entity_index))
    }

    /// Flatten into the wire form.
    pub fn marshal(&self) -> TreeMarshal {
        TreeMarshal {
            roster_id: self.roster.id(),
            root: self.root,
            nodes: self
                .order
                .iter()
                .map(|id| {
                    let node = &self.nodes[id];
                    TreeNodeMarshal {
                        id: node.id,
                        entity_index: node.entity_index,
                        children: node.children.clone(),
                    }
                })
                .collect(),
        }
    }
}

// ── TreeMarshal ───────────────────────────────────────────────────────

/// Flattened wire form of a [`Tree`]: roster reference, root id and per
/// node its id, entity index and child-id list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeMarshal {
    pub roster_id: crate::ids::RosterId,
    pub root: TreeNodeId,
    pub nodes: Vec<TreeNodeMarshal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNodeMarshal {
    pub id: TreeNodeId,
    pub entity_index: usize,
    pub children: Vec<TreeNodeId>,
}

impl TreeMarshal {
    /// The empty marshal, used as the "I don't know it" reply.
    pub fn empty() -> Self {
        Self {
            roster_id: crate::ids::RosterId::NIL,
            root: TreeNodeId::NIL,
            nodes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_nil()
    }

    /// Rebuild the tree against its roster.
    ///
    /// Every id is recomputed from the carried structure and compared to
    /// the carried ids; a marshal that lies about its ids is rejected.
    pub fn materialize(&self, roster: Arc<Roster>) -> Result<Tree, CohortRuntimeError> {
        if self.is_empty() {
            return Err(CohortRuntimeError::InvalidTree("empty tree marshal".into()));
        }
        if roster.id() != self.roster_id {
            return Err(CohortRuntimeError::InvalidTree(
                "marshal references a different roster".into(),
            ));
        }

        let slot_of: HashMap<TreeNodeId, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(slot, n)| (n.id, slot))
            .collect();
        if slot_of.len() != self.nodes.len() {
            return Err(CohortRuntimeError::InvalidTree(
                "duplicate node ids in marshal".into(),
            ));
        }

        let total = self.nodes.len();
        let entities: Vec<usize> = self.nodes.iter().map(|n| n.entity_index).collect();
        let mut children: Vec<Vec<usize>> = Vec::with_capacity(total);
        let mut parents: Vec<Option<usize>> = vec![None; total];
        for (slot, node) in self.nodes.iter().enumerate() {
            let mut kids = Vec::with_capacity(node.children.len());
            for child_id in &node.children {
                let &child_slot = slot_of.get(child_id).ok_or_else(|| {
                    CohortRuntimeError::InvalidTree("child id missing from marshal".into())
                })?;
                parents[child_slot] = Some(slot);
                kids.push(child_slot);
            }
            children.push(kids);
        }

        let tree = Tree::from_structure(roster, entities, parents, children)?;

        if tree.root != self.root
            || tree
                .order
                .iter()
                .zip(self.nodes.iter())
                .any(|(computed, carried)| *computed != carried.id)
        {
            return Err(CohortRuntimeError::InvalidTree(
                "marshal ids do not match the carried structure".into(),
            ));
        }
        Ok(tree)
    }
}
