use futures::future::BoxFuture;

use crate::error::CohortRuntimeError;
use crate::ids::TreeNodeId;

/// One delivered message: who sent it (their slot in the tree) and the
/// decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery<T> {
    pub sender: TreeNodeId,
    pub msg: T,
}

/// The capability set every protocol implements.
///
/// A protocol is a plain struct holding its [`crate::Node`] handle plus
/// whatever channels it opened in its constructor. The host drives it
/// through exactly two entry points:
///
/// - [`start`](Self::start) runs once, on the root instance only, when
///   the initiator launches the round.
/// - [`dispatch`](Self::dispatch) is the optional cooperative body; the
///   host spawns it in its own task right after construction, where it
///   may suspend on its channels for as long as it likes.
///
/// Both default to doing nothing. The host never blocks on either: a
/// slow or stuck instance stalls only its own task.
pub trait ProtocolInstance: Send + 'static {
    /// Kick off the round. Called once on the root.
    fn start(&mut self) -> BoxFuture<'_, Result<(), CohortRuntimeError>> {
        Box::pin(async { Ok(()) })
    }

    /// The instance's own message loop, run in a dedicated task.
    fn dispatch(self: Box<Self>) -> BoxFuture<'static, Result<(), CohortRuntimeError>> {
        Box::pin(async { Ok(()) })
    }
}
