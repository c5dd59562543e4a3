//! Process-global wire-type registry.
//!
//! Every message that crosses a connection is tagged with the
//! [`TypeTag`] of its Rust type. Decoding an incoming frame back into a
//! typed value needs a decoder per tag; this registry holds them.
//! Registration is write-once and idempotent per type.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CohortTransportError;
use crate::frame::TypeTag;

/// Anything that can cross a connection: serde-serializable, sendable,
/// owned. Blanket-implemented; never implement it by hand.
pub trait WireMessage: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T: Serialize + DeserializeOwned + Send + Sync + 'static> WireMessage for T {}

struct RegisteredType {
    name: &'static str,
    decode: fn(&[u8]) -> Result<Box<dyn Any + Send>, CohortTransportError>,
}

static REGISTRY: OnceLock<RwLock<HashMap<TypeTag, RegisteredType>>> = OnceLock::new();

fn table() -> &'static RwLock<HashMap<TypeTag, RegisteredType>> {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

fn decode_erased<T: WireMessage>(bytes: &[u8]) -> Result<Box<dyn Any + Send>, CohortTransportError> {
    let value: T = rmp_serde::from_slice(bytes)
        .map_err(|e| CohortTransportError::Decode(e.to_string()))?;
    Ok(Box::new(value))
}

/// Register `T` so incoming frames tagged with it can be decoded.
///
/// Idempotent; returns the type's tag either way.
pub fn register_message<T: WireMessage>() -> TypeTag {
    let tag = TypeTag::of::<T>();
    let mut map = table().write().expect("wire registry poisoned");
    map.entry(tag).or_insert(RegisteredType {
        name: std::any::type_name::<T>(),
        decode: decode_erased::<T>,
    });
    tag
}

/// Decode `bytes` as the type registered under `tag`.
pub fn decode_registered(
    tag: TypeTag,
    bytes: &[u8],
) -> Result<Box<dyn Any + Send>, CohortTransportError> {
    let map = table().read().expect("wire registry poisoned");
    let entry = map
        .get(&tag)
        .ok_or(CohortTransportError::UnknownType(tag))?;
    (entry.decode)(bytes)
}

/// Whether a decoder is registered for `tag`.
pub fn is_registered(tag: TypeTag) -> bool {
    table()
        .read()
        .expect("wire registry poisoned")
        .contains_key(&tag)
}

/// The registered type name for `tag`, for log messages.
pub fn type_name_of(tag: TypeTag) -> Option<&'static str> {
    table()
        .read()
        .expect("wire registry poisoned")
        .get(&tag)
        .map(|e| e.name)
}
