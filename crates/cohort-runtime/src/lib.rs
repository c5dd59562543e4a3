//! Cohort runtime.
//!
//! The node-side core of a collective authority: take a protocol
//! definition (message types plus a start routine), a roster of
//! entities and a tree over them, and run one protocol instance per
//! tree node: routing messages between instances over a small set of
//! authenticated connections, fetching topology a peer does not know
//! yet, and feeding typed channels and handlers with single or
//! child-aggregated deliveries.
//!
//! Wire format: MessagePack over type-tagged frames. Identity: Ed25519
//! keys, Sha256 content-derived identifiers.

pub mod error;
pub mod host;
pub mod ids;
pub mod instance;
pub mod messages;
pub mod node;
pub mod protocols;
pub mod registry;
pub mod roster;
pub mod testing;
pub mod token;
pub mod tree;

pub use error::CohortRuntimeError;
pub use host::{Host, HostConfig};
pub use ids::{ProtocolId, RosterId, RoundId, TokenId, TreeId, TreeNodeId};
pub use instance::{Delivery, ProtocolInstance};
pub use messages::{Envelope, RequestRoster, RequestTree, SendRoster, SendTree};
pub use node::{Node, AGGREGATE_MESSAGES};
pub use registry::{protocol_exists, protocol_name, register_protocol, ProtocolConstructor};
pub use roster::Roster;
pub use token::Token;
pub use tree::{Tree, TreeMarshal, TreeNode, TreeNodeMarshal};

pub use cohort_transport::{Address, Entity, EntityId, TypeTag, WireMessage};
