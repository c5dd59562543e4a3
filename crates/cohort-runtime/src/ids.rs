//! Content-derived identifiers of the runtime data model.
//!
//! Every identifier is a 32-byte Sha256 digest: rosters hash their
//! entities, trees hash their structure, tokens hash their five parts.
//! Two peers that independently compute the same object therefore agree
//! on its identifier without coordination. `RoundId` is the one
//! exception: it is minted at random by a protocol initiator to keep
//! concurrent runs on the same tree apart.

use sha2::{Digest, Sha256};

pub(crate) fn short_hex(bytes: &[u8]) -> String {
    bytes.iter().take(6).map(|b| format!("{b:02x}")).collect()
}

/// Sha256 over a sequence of byte slices.
pub(crate) fn digest_parts(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        pub struct $name([u8; 32]);

        impl $name {
            /// The all-zero identifier, used as an absent marker.
            pub const NIL: $name = $name([0u8; 32]);

            pub fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn is_nil(&self) -> bool {
                self.0 == [0u8; 32]
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!(stringify!($name), "({}…)"), crate::ids::short_hex(&self.0))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", crate::ids::short_hex(&self.0))
            }
        }
    };
}

id_type! {
    /// Identifier of a [`crate::Roster`], derived from its entities.
    RosterId
}

id_type! {
    /// Identifier of a [`crate::Tree`], derived from its structure.
    TreeId
}

id_type! {
    /// Identifier of one node inside a [`crate::Tree`].
    TreeNodeId
}

id_type! {
    /// Identifier of one concrete protocol run on a tree.
    RoundId
}

id_type! {
    /// Identifier of a protocol type, derived from its registered name.
    ProtocolId
}

id_type! {
    /// Identifier of a running instance, the hash of its [`crate::Token`].
    TokenId
}

impl RoundId {
    /// Mint a fresh random round identifier.
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl ProtocolId {
    /// Derive the identifier of a protocol from its name.
    pub fn from_name(name: &str) -> Self {
        Self(digest_parts(&[b"cohort-protocol:", name.as_bytes()]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_is_nil() {
        assert!(TreeId::NIL.is_nil());
        assert!(!TreeId::from_bytes([1u8; 32]).is_nil());
    }

    #[test]
    fn protocol_id_from_name_is_stable() {
        assert_eq!(ProtocolId::from_name("count"), ProtocolId::from_name("count"));
        assert_ne!(ProtocolId::from_name("count"), ProtocolId::from_name("sign"));
    }

    #[test]
    fn round_ids_are_fresh() {
        assert_ne!(RoundId::random(), RoundId::random());
    }

    #[test]
    fn display_is_short_hex() {
        let id = TreeId::from_bytes([0xab; 32]);
        assert_eq!(id.to_string(), "abababababab");
        assert_eq!(format!("{id:?}"), "TreeId(abababababab…)");
    }
}
