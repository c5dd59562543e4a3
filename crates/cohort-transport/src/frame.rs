use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CohortTransportError;
use crate::registry::{self, WireMessage};
use crate::short_hex;

// ── TypeTag ───────────────────────────────────────────────────────────

/// Stable tag of a wire message type: Sha256 of the type's name.
///
/// Two peers built from the same source derive identical tags, so a tag
/// on the wire selects the same decoder on both sides.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeTag([u8; 32]);

impl TypeTag {
    /// The all-zero tag. Never assigned to a real type.
    pub const NIL: TypeTag = TypeTag([0u8; 32]);

    /// The tag of a message type.
    pub fn of<T: WireMessage>() -> Self {
        Self::from_name(std::any::type_name::<T>())
    }

    pub(crate) fn from_name(name: &str) -> Self {
        let digest = Sha256::digest(name.as_bytes());
        TypeTag(digest.into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeTag({}…)", short_hex(&self.0))
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", short_hex(&self.0))
    }
}

// ── Frame ─────────────────────────────────────────────────────────────

/// The unit a connection carries: a type tag plus the message bytes.
///
/// On a real wire this is a length-prefixed record; the local transport
/// hands frames over in memory unchanged.
#[derive(Debug, Clone)]
pub struct Frame {
    pub tag: TypeTag,
    pub bytes: Bytes,
}

impl Frame {
    /// Serialize a message into a tagged frame.
    pub fn encode<T: WireMessage>(msg: &T) -> Result<Frame, CohortTransportError> {
        let bytes = rmp_serde::to_vec(msg).map_err(|e| CohortTransportError::Encode(e.to_string()))?;
        Ok(Frame {
            tag: TypeTag::of::<T>(),
            bytes: Bytes::from(bytes),
        })
    }

    /// Decode the frame as a known message type. Fails if the tag does
    /// not match `T`.
    pub fn decode<T: WireMessage>(&self) -> Result<T, CohortTransportError> {
        let expected = TypeTag::of::<T>();
        if self.tag != expected {
            return Err(CohortTransportError::TagMismatch {
                expected,
                actual: self.tag,
            });
        }
        rmp_serde::from_slice(&self.bytes).map_err(|e| CohortTransportError::Decode(e.to_string()))
    }

    /// Decode the frame through the wire-type registry, yielding the
    /// registered type behind `dyn Any`.
    pub fn decode_any(&self) -> Result<Box<dyn std::any::Any + Send>, CohortTransportError> {
        registry::decode_registered(self.tag, &self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Pong {
        seq: u32,
    }

    #[test]
    fn tags_are_stable_and_distinct() {
        assert_eq!(TypeTag::of::<Ping>(), TypeTag::of::<Ping>());
        assert_ne!(TypeTag::of::<Ping>(), TypeTag::of::<Pong>());
        assert_ne!(TypeTag::of::<Ping>(), TypeTag::NIL);
    }

    #[test]
    fn encode_decode_roundtrip() {
        let frame = Frame::encode(&Ping { seq: 7 }).expect("encode");
        assert_eq!(frame.tag, TypeTag::of::<Ping>());

        let decoded: Ping = frame.decode().expect("decode");
        assert_eq!(decoded, Ping { seq: 7 });
    }

    #[test]
    fn decode_wrong_type_fails() {
        let frame = Frame::encode(&Ping { seq: 1 }).expect("encode");
        let err = frame.decode::<Pong>().unwrap_err();
        assert!(matches!(err, CohortTransportError::TagMismatch { .. }));
    }

    #[test]
    fn decode_any_requires_registration() {
        #[derive(Debug, Serialize, Deserialize)]
        struct Unregistered {
            x: u8,
        }

        let frame = Frame::encode(&Unregistered { x: 1 }).expect("encode");
        assert!(matches!(
            frame.decode_any(),
            Err(CohortTransportError::UnknownType(_))
        ));

        registry::register_message::<Unregistered>();
        let any = frame.decode_any().expect("decode after registration");
        let msg = any.downcast::<Unregistered>().expect("downcast");
        assert_eq!(msg.x, 1);
    }
}
