//! Control wire types the host exchanges with its peers.
//!
//! Five tags cross a connection: the instance-to-instance [`Envelope`]
//! and the two request/reply pairs for tree and roster discovery. All
//! are registered with the wire registry when a host is built.

use serde::{Deserialize, Serialize};

use crate::error::CohortRuntimeError;
use crate::ids::{RosterId, TreeId};
use crate::roster::Roster;
use crate::token::Token;
use crate::tree::TreeMarshal;
use cohort_transport::{register_message, TypeTag, WireMessage};

/// The payload envelope between two protocol instances.
///
/// `to` addresses the recipient's instance, `from` the sender's; for a
/// well-formed envelope `from.other(to.tree_node) == to`. The payload is
/// carried as raw bytes and decoded through the wire registry right
/// before delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub to: Token,
    pub from: Token,
    pub type_tag: TypeTag,
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Wrap `msg` for transmission from the instance at `from` to the
    /// instance at `to`.
    pub fn new<T: WireMessage>(
        from: &Token,
        to: &Token,
        msg: &T,
    ) -> Result<Envelope, CohortRuntimeError> {
        let payload =
            rmp_serde::to_vec(msg).map_err(|e| CohortRuntimeError::Serialization(e.to_string()))?;
        Ok(Envelope {
            to: to.clone(),
            from: from.clone(),
            type_tag: TypeTag::of::<T>(),
            payload,
        })
    }
}

/// Ask a peer for the tree behind an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestTree {
    pub tree_id: TreeId,
}

/// Reply to [`RequestTree`]; an empty marshal means "unknown here".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendTree {
    pub tree: TreeMarshal,
}

/// Ask a peer for the roster behind an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRoster {
    pub roster_id: RosterId,
}

/// Reply to [`RequestRoster`]; an empty roster means "unknown here".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRoster {
    pub roster: Roster,
}

/// Register the five control tags with the wire registry. Idempotent.
pub(crate) fn register_control_messages() {
    register_message::<Envelope>();
    register_message::<RequestTree>();
    register_message::<SendTree>();
    register_message::<RequestRoster>();
    register_message::<SendRoster>();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ProtocolId, RoundId, TreeNodeId};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        i: i32,
    }

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
    fn envelope_wraps_and_tags_the_payload() {
        let from = token(1);
        let to = from.other(TreeNodeId::from_bytes([2; 32]));

        let env = Envelope::new(&from, &to, &Sample { i: 12 }).expect("envelope");
        assert_eq!(env.type_tag, TypeTag::of::<Sample>());
        assert_eq!(env.from.other(env.to.tree_node), env.to);

        let payload: Sample = rmp_serde::from_slice(&env.payload).expect("payload");
        assert_eq!(payload, Sample { i: 12 });
    }

    #[test]
    fn envelope_roundtrip() {
        let from = token(1);
        let to = from.other(TreeNodeId::from_bytes([2; 32]));
        let env = Envelope::new(&from, &to, &Sample { i: -3 }).expect("envelope");

        let bytes = rmp_serde::to_vec(&env).expect("serialize");
        let decoded: Envelope = rmp_serde::from_slice(&bytes).expect("deserialize");
        assert_eq!(env, decoded);
    }

    #[test]
    fn control_messages_roundtrip() {
        register_control_messages();

        let req = RequestTree {
            tree_id: TreeId::from_bytes([7; 32]),
        };
        let bytes = rmp_serde::to_vec(&req).expect("serialize");
        let decoded: RequestTree = rmp_serde::from_slice(&bytes).expect("deserialize");
        assert_eq!(req, decoded);

        let reply = SendTree {
            tree: TreeMarshal::empty(),
        };
        let bytes = rmp_serde::to_vec(&reply).expect("serialize");
        let decoded: SendTree = rmp_serde::from_slice(&bytes).expect("deserialize");
        assert!(decoded.tree.is_empty());

        let reply = SendRoster {
            roster: Roster::empty(),
        };
        let bytes = rmp_serde::to_vec(&reply).expect("serialize");
        let decoded: SendRoster = rmp_serde::from_slice(&bytes).expect("deserialize");
        assert!(decoded.roster.is_empty());
    }
}
