//! Process-wide protocol registry.
//!
//! A protocol is registered once under a name; the registry maps the
//! name's derived [`ProtocolId`] to a constructor the host calls
//! whenever an instance has to come to life: locally via
//! `start_protocol`, or on demand when the first envelope for an
//! unknown token arrives. Any peer that can receive a message for a
//! protocol must have registered it under the same name.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::error::CohortRuntimeError;
use crate::ids::ProtocolId;
use crate::instance::ProtocolInstance;
use crate::node::Node;

/// Builds one live instance from its runtime handle.
pub type ProtocolConstructor =
    dyn Fn(Node) -> Result<Box<dyn ProtocolInstance>, CohortRuntimeError> + Send + Sync;

struct Registration {
    name: String,
    constructor: Arc<ProtocolConstructor>,
}

static PROTOCOLS: OnceLock<RwLock<HashMap<ProtocolId, Registration>>> = OnceLock::new();

fn table() -> &'static RwLock<HashMap<ProtocolId, Registration>> {
    PROTOCOLS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a protocol under `name`.
///
/// Write-once: a second registration under the same name fails with
/// [`CohortRuntimeError::DuplicateProtocol`].
pub fn register_protocol<F>(name: &str, constructor: F) -> Result<ProtocolId, CohortRuntimeError>
where
    F: Fn(Node) -> Result<Box<dyn ProtocolInstance>, CohortRuntimeError> + Send + Sync + 'static,
{
    let id = ProtocolId::from_name(name);
    let mut map = table().write().expect("protocol registry poisoned");
    if map.contains_key(&id) {
        return Err(CohortRuntimeError::DuplicateProtocol {
            name: name.to_string(),
        });
    }
    map.insert(
        id,
        Registration {
            name: name.to_string(),
            constructor: Arc::new(constructor),
        },
    );
    Ok(id)
}

/// Whether a protocol is registered under `id`.
pub fn protocol_exists(id: ProtocolId) -> bool {
    table()
        .read()
        .expect("protocol registry poisoned")
        .contains_key(&id)
}

/// The registered name behind `id`, for log messages.
pub fn protocol_name(id: ProtocolId) -> Option<String> {
    table()
        .read()
        .expect("protocol registry poisoned")
        .get(&id)
        .map(|r| r.name.clone())
}

/// Run the registered constructor for `id` on `node`.
///
/// The constructor is cloned out of the table first, so user code never
/// runs under the registry lock.
pub(crate) fn instantiate(
    id: ProtocolId,
    node: Node,
) -> Result<Box<dyn ProtocolInstance>, CohortRuntimeError> {
    let constructor = {
        let map = table().read().expect("protocol registry poisoned");
        map.get(&id)
            .map(|r| r.constructor.clone())
            .ok_or(CohortRuntimeError::UnknownProtocol(id))?
    };
    constructor(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_look_up() {
        let id = register_protocol("registry-test-noop", |_node| {
            Err(CohortRuntimeError::Protocol("not constructible".into()))
        })
        .expect("register");

        assert!(protocol_exists(id));
        assert_eq!(id, ProtocolId::from_name("registry-test-noop"));
        assert_eq!(
            protocol_name(id).as_deref(),
            Some("registry-test-noop")
        );
    }

    #[test]
    fn duplicate_name_fails() {
        register_protocol("registry-test-dup", |_node| {
            Err(CohortRuntimeError::Protocol("unused".into()))
        })
        .expect("first registration");

        let err = register_protocol("registry-test-dup", |_node| {
            Err(CohortRuntimeError::Protocol("unused".into()))
        })
        .unwrap_err();
        assert!(matches!(err, CohortRuntimeError::DuplicateProtocol { .. }));
    }

    #[test]
    fn unknown_protocol_is_reported() {
        let id = ProtocolId::from_name("registry-test-never-registered");
        assert!(!protocol_exists(id));
        assert!(protocol_name(id).is_none());
    }
}
