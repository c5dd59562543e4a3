use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CohortRuntimeError;
use crate::ids::{digest_parts, RosterId};
use crate::tree::Tree;
use cohort_transport::{Entity, EntityId};

/// An ordered, immutable list of entities.
///
/// Rosters define the universe a [`Tree`] draws its entities from. The
/// identifier is derived from the entity list, so two peers holding the
/// same entities in the same order agree on the roster id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RosterWire", into = "RosterWire")]
pub struct Roster {
    id: RosterId,
    entities: Vec<Entity>,
}

impl Roster {
    pub fn new(entities: Vec<Entity>) -> Self {
        let id = if entities.is_empty() {
            RosterId::NIL
        } else {
            let ids: Vec<[u8; 32]> = entities.iter().map(|e| *e.id().as_bytes()).collect();
            let mut parts: Vec<&[u8]> = vec![b"cohort-roster:"];
            parts.extend(ids.iter().map(|b| b.as_slice()));
            RosterId::from_bytes(digest_parts(&parts))
        };
        Self { id, entities }
    }

    /// The empty roster, used as the "I don't know it" reply.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn id(&self) -> RosterId {
        self.id
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Entity> {
        self.entities.get(index)
    }

    /// Position of the entity with `id`, if present.
    pub fn index_of(&self, id: EntityId) -> Option<usize> {
        self.entities.iter().position(|e| e.id() == id)
    }

    /// Build a binary tree over the whole roster, rooted at the first
    /// entity.
    pub fn generate_binary_tree(&self) -> Result<Tree, CohortRuntimeError> {
        self.generate_tree(self.len(), 2, 2)
    }

    /// Build a tree of `total` nodes where the root has `root_children`
    /// children and every other interior node up to `branching`.
    ///
    /// Entities are assigned round-robin, so `total` may exceed the
    /// roster size.
    pub fn generate_tree(
        &self,
        total: usize,
        root_children: usize,
        branching: usize,
    ) -> Result<Tree, CohortRuntimeError> {
        if self.is_empty() {
            return Err(CohortRuntimeError::InvalidTree("empty roster".into()));
        }
        if total == 0 {
            return Err(CohortRuntimeError::InvalidTree("tree of zero nodes".into()));
        }
        if total > 1 && root_children == 0 {
            return Err(CohortRuntimeError::InvalidTree(
                "root branching factor is zero".into(),
            ));
        }
        if total > 1 + root_children && branching == 0 {
            return Err(CohortRuntimeError::InvalidTree(
                "interior branching factor is zero".into(),
            ));
        }

        let entities: Vec<usize> = (0..total).map(|slot| slot % self.len()).collect();
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); total];
        let mut parents: Vec<Option<usize>> = vec![None; total];

        // Breadth-first fill: the root takes its quota, then every
        // following node takes up to `branching` of the remaining slots.
        let mut queue = std::collections::VecDeque::from([0usize]);
        let mut next = 1;
        while next < total {
            let parent = queue.pop_front().expect("slots remain, queue cannot be empty");
            let quota = if parent == 0 { root_children } else { branching };
            for _ in 0..quota {
                if next >= total {
                    break;
                }
                children[parent].push(next);
                parents[next] = Some(parent);
                queue.push_back(next);
                next += 1;
            }
        }

        Tree::from_structure(Arc::new(self.clone()), entities, parents, children)
    }
}

/// Wire mirror of [`Roster`]; the id is recomputed on deserialization so
/// a peer cannot claim an id its contents do not hash to.
#[derive(Clone, Serialize, Deserialize)]
struct RosterWire {
    entities: Vec<Entity>,
}

impl From<RosterWire> for Roster {
    fn from(wire: RosterWire) -> Self {
        Roster::new(wire.entities)
    }
}

impl From<Roster> for RosterWire {
    fn from(roster: Roster) -> Self {
        RosterWire {
            entities: roster.entities,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn entity(seed: u8) -> Entity {
        let mut rng = StdRng::seed_from_u64(seed as u64);
        let key = SigningKey::generate(&mut rng);
        Entity::new(
            key.verifying_key(),
            vec![format!("local://e{seed}").as_str().into()],
        )
    }

    fn roster(n: u8) -> Roster {
        Roster::new((0..n).map(entity).collect())
    }

    #[test]
    fn id_depends_on_contents_and_order() {
        let r1 = Roster::new(vec![entity(1), entity(2)]);
        let r2 = Roster::new(vec![entity(1), entity(2)]);
        let r3 = Roster::new(vec![entity(2), entity(1)]);

        assert_eq!(r1.id(), r2.id());
        assert_ne!(r1.id(), r3.id());
    }

    #[test]
    fn empty_roster_has_nil_id() {
        assert!(Roster::empty().id().is_nil());
        assert!(Roster::empty().is_empty());
        assert!(!roster(1).id().is_nil());
    }

    #[test]
    fn index_of_finds_entities() {
        let r = roster(3);
        let second = r.get(1).unwrap().id();
        assert_eq!(r.index_of(second), Some(1));
        assert_eq!(r.index_of(entity(9).id()), None);
    }

    #[test]
    fn binary_tree_over_two_entities() {
        let r = roster(2);
        let tree = r.generate_binary_tree().expect("tree");
        assert_eq!(tree.len(), 2);

        let root = tree.root();
        assert_eq!(root.children().len(), 1);
        let leaf = tree.node(root.children()[0]).unwrap();
        assert!(leaf.is_leaf());
        assert_eq!(leaf.parent(), Some(root.id()));
    }

    #[test]
    fn limited_tree_shape() {
        // 7 slots, root branching 1, interior branching 2.
        let r = roster(7);
        let tree = r.generate_tree(7, 1, 2).expect("tree");
        assert_eq!(tree.len(), 7);

        let root = tree.root();
        assert_eq!(root.children().len(), 1);
        let second = tree.node(root.children()[0]).unwrap();
        assert_eq!(second.children().len(), 2);
    }

    #[test]
    fn round_robin_reuses_entities() {
        let r = roster(2);
        let tree = r.generate_tree(5, 2, 2).expect("tree");
        assert_eq!(tree.len(), 5);
        // Entity indices cycle through the roster.
        let indices: Vec<usize> = tree
            .node_ids()
            .iter()
            .map(|id| tree.node(*id).unwrap().entity_index())
            .collect();
        assert_eq!(indices, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn degenerate_generators_fail() {
        assert!(Roster::empty().generate_binary_tree().is_err());
        assert!(roster(2).generate_tree(0, 2, 2).is_err());
        assert!(roster(2).generate_tree(2, 0, 2).is_err());
        assert!(roster(5).generate_tree(5, 1, 0).is_err());
    }

    #[test]
    fn roundtrip_recomputes_id() {
        let r = roster(3);
        let bytes = rmp_serde::to_vec(&r).expect("serialize");
        let decoded: Roster = rmp_serde::from_slice(&bytes).expect("deserialize");
        assert_eq!(r, decoded);
        assert_eq!(r.id(), decoded.id());
    }
}
