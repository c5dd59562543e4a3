//! Cohort transport seam.
//!
//! The runtime above this crate multiplexes protocol traffic over a small
//! set of authenticated connections. This crate defines what it needs from
//! a transport: entities, type-tagged frames, the wire-type registry and
//! the [`Transport`]/[`Connection`] traits, plus the in-process
//! [`LocalTransport`] used by tests and simulation. A production transport
//! (TLS, QUIC, ...) implements the same traits behind the seam.

mod error;
mod frame;
mod local;
pub mod registry;
mod transport;

pub use error::CohortTransportError;
pub use frame::{Frame, TypeTag};
pub use local::{LocalConn, LocalDirectory, LocalTransport};
pub use registry::{register_message, WireMessage};
pub use transport::{Connection, Transport};

use std::fmt;

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Render the first bytes of an identifier as lowercase hex.
pub(crate) fn short_hex(bytes: &[u8]) -> String {
    bytes.iter().take(6).map(|b| format!("{b:02x}")).collect()
}

// ── Address ───────────────────────────────────────────────────────────

/// An opaque network address token, e.g. `"local://node-3"`.
///
/// The transport decides what the string means; the runtime only passes
/// it around.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ── EntityId ──────────────────────────────────────────────────────────

/// Stable identifier of an [`Entity`]: Sha256 of its public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId([u8; 32]);

impl EntityId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({}…)", short_hex(&self.0))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", short_hex(&self.0))
    }
}

// ── Entity ────────────────────────────────────────────────────────────

/// The long-lived identity of a node: a public key plus the addresses it
/// can be reached at. Equality is by derived identifier, i.e. by key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Ed25519 public key.
    pub public: VerifyingKey,
    /// Network addresses, in preference order.
    pub addresses: Vec<Address>,
}

impl Entity {
    pub fn new(public: VerifyingKey, addresses: Vec<Address>) -> Self {
        Self { public, addresses }
    }

    /// Stable identifier, derived from the public key.
    pub fn id(&self) -> EntityId {
        let digest = Sha256::digest(self.public.as_bytes());
        EntityId(digest.into())
    }

    /// The preferred address, if any.
    pub fn first_address(&self) -> Option<&Address> {
        self.addresses.first()
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.public == other.public
    }
}

impl Eq for Entity {}
