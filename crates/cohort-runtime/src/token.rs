use serde::{Deserialize, Serialize};

use crate::ids::{digest_parts, ProtocolId, RosterId, RoundId, TokenId, TreeId, TreeNodeId};

/// The session address of one running protocol instance.
///
/// A token pins a run down completely: which protocol, over which roster
/// and tree, in which round, at which slot of the tree. The hash of the
/// token identifies the instance in the host's registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub protocol: ProtocolId,
    pub roster: RosterId,
    pub tree: TreeId,
    pub round: RoundId,
    pub tree_node: TreeNodeId,
}

impl Token {
    /// The instance identifier: hash of all five parts.
    pub fn id(&self) -> TokenId {
        TokenId::from_bytes(digest_parts(&[
            b"cohort-token:",
            self.protocol.as_bytes(),
            self.roster.as_bytes(),
            self.tree.as_bytes(),
            self.round.as_bytes(),
            self.tree_node.as_bytes(),
        ]))
    }

    /// The peer view of this token: the address a recipient at
    /// `tree_node` uses for its own instance of the same run.
    pub fn other(&self, tree_node: TreeNodeId) -> Token {
        Token {
            tree_node,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(node: u8) -> Token {
        Token {
            protocol: ProtocolId::from_bytes([1; 32]),
            roster: RosterId::from_bytes([2; 32]),
            tree: TreeId::from_bytes([3; 32]),
            round: RoundId::from_bytes([4; 32]),
            tree_node: TreeNodeId::from_bytes([node; 32]),
        }
    }

    #[test]
    fn other_swaps_only_the_tree_node() {
        let t = token(10);
        let peer = TreeNodeId::from_bytes([20; 32]);

        let o = t.other(peer);
        assert_eq!(o.tree_node, peer);
        assert_eq!(o.protocol, t.protocol);
        assert_eq!(o.roster, t.roster);
        assert_eq!(o.tree, t.tree);
        assert_eq!(o.round, t.round);
    }

    #[test]
    fn other_is_an_involution() {
        let t1 = token(10);
        let t2 = token(20);
        assert_eq!(t1.other(t2.tree_node).other(t1.tree_node), t1);
    }

    #[test]
    fn id_changes_with_every_part() {
        let base = token(10);
        let mut round_changed = base.clone();
        round_changed.round = RoundId::from_bytes([9; 32]);

        assert_eq!(base.id(), token(10).id());
        assert_ne!(base.id(), token(11).id());
        assert_ne!(base.id(), round_changed.id());
    }

    #[test]
    fn token_roundtrip() {
        let t = token(7);
        let bytes = rmp_serde::to_vec(&t).expect("serialize");
        let decoded: Token = rmp_serde::from_slice(&bytes).expect("deserialize");
        assert_eq!(t, decoded);
        assert_eq!(t.id(), decoded.id());
    }
}
