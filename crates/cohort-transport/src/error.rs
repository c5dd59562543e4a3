use crate::{Address, TypeTag};

/// Errors returned by the cohort transport layer.
#[derive(Debug, thiserror::Error)]
pub enum CohortTransportError {
    #[error("{addr} is not listening")]
    NotListening { addr: Address },

    #[error("{addr} is already listening")]
    AlreadyListening { addr: Address },

    #[error("entity has no address")]
    NoAddress,

    /// The local side of the connection (or the transport) was closed.
    #[error("connection closed")]
    Closed,

    /// The remote side finished cleanly; no more frames will arrive.
    #[error("end of stream")]
    Eof,

    #[error("frame encode failed: {0}")]
    Encode(String),

    #[error("frame decode failed: {0}")]
    Decode(String),

    #[error("no wire type registered for tag {0}")]
    UnknownType(TypeTag),

    #[error("frame tagged {actual} where {expected} was expected")]
    TagMismatch { expected: TypeTag, actual: TypeTag },
}

impl CohortTransportError {
    /// True for the two error kinds that mean the connection is gone for
    /// good and the reader should terminate quietly.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Closed | Self::Eof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_classification() {
        assert!(CohortTransportError::Closed.is_disconnect());
        assert!(CohortTransportError::Eof.is_disconnect());
        assert!(!CohortTransportError::Decode("bad".into()).is_disconnect());
        assert!(!CohortTransportError::NotListening {
            addr: "local://x".into()
        }
        .is_disconnect());
    }
}
