use crate::ids::{ProtocolId, RosterId, TokenId, TreeId, TreeNodeId};
use cohort_transport::CohortTransportError;

/// Errors of the cohort runtime.
///
/// Wraps transport errors and adds the runtime's own failure surfaces:
/// topology lookups, addressing, registration and serialization.
#[derive(Debug, thiserror::Error)]
pub enum CohortRuntimeError {
    #[error("transport error: {0}")]
    Transport(#[from] CohortTransportError),

    #[error("no protocol registered under {0}")]
    UnknownProtocol(ProtocolId),

    #[error("protocol {name:?} is already registered")]
    DuplicateProtocol { name: String },

    #[error("unknown tree {0}")]
    UnknownTree(TreeId),

    #[error("unknown roster {0}")]
    UnknownRoster(RosterId),

    #[error("tree {tree} has no node {node}")]
    UnknownTreeNode { tree: TreeId, node: TreeNodeId },

    #[error("no instance registered under token {0}")]
    NoInstance(TokenId),

    #[error("a channel or handler for {type_name} is already registered")]
    DuplicateChannel { type_name: &'static str },

    #[error("invalid tree marshal: {0}")]
    InvalidTree(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("host is closed")]
    Closed,
}
