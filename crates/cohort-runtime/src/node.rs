//! The per-instance runtime handle.
//!
//! Every protocol instance holds a [`Node`]: its token, its slot in the
//! tree, and the delivery machinery the host feeds. Protocol authors
//! bind a typed channel or handler per payload type, in a *single*
//! flavor (one record per envelope) or an *aggregate* flavor (the
//! runtime buffers until one envelope has arrived from every direct
//! child, then delivers the batch in arrival order).

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;

use crate::error::CohortRuntimeError;
use crate::host::Host;
use crate::ids::TreeNodeId;
use crate::instance::Delivery;
use crate::token::Token;
use crate::tree::{Tree, TreeNode};
use cohort_transport::registry::decode_registered;
use cohort_transport::{register_message, Entity, TypeTag, WireMessage};

/// The one recognized per-type flag: buffer envelopes of this type until
/// every direct child has contributed, then deliver the batch at once.
pub const AGGREGATE_MESSAGES: u8 = 1;

type SingleSinkFn = dyn Fn(TreeNodeId, Box<dyn Any + Send>) -> BoxFuture<'static, ()> + Send + Sync;
type BatchSinkFn =
    dyn Fn(Vec<(TreeNodeId, Box<dyn Any + Send>)>) -> BoxFuture<'static, ()> + Send + Sync;

/// The registered endpoint for one payload type.
#[derive(Clone)]
enum Sink {
    Single(Arc<SingleSinkFn>),
    Aggregate(Arc<BatchSinkFn>),
}

/// A delivery waiting for decode: sender slot plus raw payload bytes.
/// Decoding is deferred to delivery time so a type registered late still
/// decodes.
struct RawEntry {
    sender: TreeNodeId,
    bytes: Bytes,
}

#[derive(Default)]
struct AggBuffer {
    entries: Vec<RawEntry>,
    seen: HashSet<TreeNodeId>,
}

#[derive(Default)]
struct NodeState {
    sinks: HashMap<TypeTag, Sink>,
    flags: HashMap<TypeTag, u8>,
    /// Aggregate buffers, per type, until the completion condition holds.
    aggregating: HashMap<TypeTag, AggBuffer>,
    /// Envelopes for types with no registration yet.
    backlog: HashMap<TypeTag, Vec<RawEntry>>,
    /// Types whose backlog is currently being drained; arrivals for them
    /// append to the backlog so per-type order survives the drain.
    draining: HashSet<TypeTag>,
}

struct NodeInner {
    host: Weak<Host>,
    token: Token,
    tree: Arc<Tree>,
    delivery_deadline: Duration,
    channel_capacity: usize,
    state: Mutex<NodeState>,
    done: AtomicBool,
}

/// Cheaply-cloned handle of one protocol instance.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    pub(crate) fn new(
        host: Weak<Host>,
        token: Token,
        tree: Arc<Tree>,
        delivery_deadline: Duration,
        channel_capacity: usize,
    ) -> Node {
        Node {
            inner: Arc::new(NodeInner {
                host,
                token,
                tree,
                delivery_deadline,
                channel_capacity,
                state: Mutex::new(NodeState::default()),
                done: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn host(&self) -> Option<Arc<Host>> {
        self.inner.host.upgrade()
    }

    // ── Identity and navigation ────────────────────────────────────────

    pub fn token(&self) -> &Token {
        &self.inner.token
    }

    pub fn tree(&self) -> &Arc<Tree> {
        &self.inner.tree
    }

    pub fn tree_node_id(&self) -> TreeNodeId {
        self.inner.token.tree_node
    }

    pub fn tree_node(&self) -> &TreeNode {
        self.inner
            .tree
            .node(self.inner.token.tree_node)
            .expect("instance slot was validated at instantiation")
    }

    /// The entity this instance runs as.
    pub fn entity(&self) -> &Entity {
        self.inner
            .tree
            .entity_of(self.inner.token.tree_node)
            .expect("instance slot was validated at instantiation")
    }

    /// The entity behind any slot of this instance's tree.
    pub fn entity_of(&self, id: TreeNodeId) -> Option<&Entity> {
        self.inner.tree.entity_of(id)
    }

    pub fn children(&self) -> Vec<TreeNodeId> {
        self.tree_node().children().to_vec()
    }

    pub fn parent(&self) -> Option<TreeNodeId> {
        self.tree_node().parent()
    }

    pub fn root(&self) -> TreeNodeId {
        self.inner.tree.root_id()
    }

    pub fn is_root(&self) -> bool {
        self.inner.token.tree_node == self.inner.tree.root_id()
    }

    pub fn is_leaf(&self) -> bool {
        self.tree_node().is_leaf()
    }

    // ── Sending ────────────────────────────────────────────────────────

    /// Send `msg` to the instance of this round at `to`.
    pub async fn send_to<T: WireMessage>(
        &self,
        to: TreeNodeId,
        msg: &T,
    ) -> Result<(), CohortRuntimeError> {
        let host = self.inner.host.upgrade().ok_or(CohortRuntimeError::Closed)?;
        let to_token = self.inner.token.other(to);
        host.send(&self.inner.token, &to_token, msg).await
    }

    // ── Channel and handler registration ──────────────────────────────

    /// Bind a caller-created channel receiving one record per envelope.
    pub fn register_channel<T: WireMessage>(
        &self,
        tx: mpsc::Sender<Delivery<T>>,
    ) -> Result<(), CohortRuntimeError> {
        let deadline = self.inner.delivery_deadline;
        let sink = Sink::Single(Arc::new(move |sender, any: Box<dyn Any + Send>| {
            let tx = tx.clone();
            async move {
                let Ok(msg) = any.downcast::<T>() else {
                    tracing::error!("delivered payload is not the registered type");
                    return;
                };
                push_with_deadline(tx, Delivery { sender, msg: *msg }, deadline).await;
            }
            .boxed()
        }));
        self.insert_sink::<T>(sink, false)
    }

    /// Bind a caller-created channel receiving one batch per completed
    /// aggregation. Sets the [`AGGREGATE_MESSAGES`] flag for the type.
    pub fn register_channel_agg<T: WireMessage>(
        &self,
        tx: mpsc::Sender<Vec<Delivery<T>>>,
    ) -> Result<(), CohortRuntimeError> {
        let deadline = self.inner.delivery_deadline;
        let sink = Sink::Aggregate(Arc::new(move |entries| {
            let tx = tx.clone();
            async move {
                let batch = downcast_batch::<T>(entries);
                push_with_deadline(tx, batch, deadline).await;
            }
            .boxed()
        }));
        self.insert_sink::<T>(sink, true)
    }

    /// Runtime-allocated variant of [`register_channel`](Self::register_channel).
    pub fn open_channel<T: WireMessage>(
        &self,
    ) -> Result<mpsc::Receiver<Delivery<T>>, CohortRuntimeError> {
        let (tx, rx) = mpsc::channel(self.inner.channel_capacity);
        self.register_channel(tx)?;
        Ok(rx)
    }

    /// Runtime-allocated variant of [`register_channel_agg`](Self::register_channel_agg).
    pub fn open_channel_agg<T: WireMessage>(
        &self,
    ) -> Result<mpsc::Receiver<Vec<Delivery<T>>>, CohortRuntimeError> {
        let (tx, rx) = mpsc::channel(self.inner.channel_capacity);
        self.register_channel_agg(tx)?;
        Ok(rx)
    }

    /// Bind a callback invoked once per envelope, each invocation in its
    /// own task. Panics are caught and logged.
    pub fn register_handler<T, F>(&self, handler: F) -> Result<(), CohortRuntimeError>
    where
        T: WireMessage,
        F: Fn(Delivery<T>) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let sink = Sink::Single(Arc::new(move |sender, any: Box<dyn Any + Send>| {
            let handler = handler.clone();
            async move {
                let Ok(msg) = any.downcast::<T>() else {
                    tracing::error!("delivered payload is not the registered type");
                    return;
                };
                let delivery = Delivery { sender, msg: *msg };
                tokio::spawn(async move {
                    let call = std::panic::AssertUnwindSafe(async move { handler(delivery) });
                    if call.catch_unwind().await.is_err() {
                        tracing::error!("message handler panicked");
                    }
                });
            }
            .boxed()
        }));
        self.insert_sink::<T>(sink, false)
    }

    /// Aggregate-flavored [`register_handler`](Self::register_handler).
    pub fn register_handler_agg<T, F>(&self, handler: F) -> Result<(), CohortRuntimeError>
    where
        T: WireMessage,
        F: Fn(Vec<Delivery<T>>) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let sink = Sink::Aggregate(Arc::new(move |entries| {
            let handler = handler.clone();
            async move {
                let batch = downcast_batch::<T>(entries);
                tokio::spawn(async move {
                    let call = std::panic::AssertUnwindSafe(async move { handler(batch) });
                    if call.catch_unwind().await.is_err() {
                        tracing::error!("aggregate handler panicked");
                    }
                });
            }
            .boxed()
        }));
        self.insert_sink::<T>(sink, true)
    }

    // ── Flags ─────────────────────────────────────────────────────────

    pub fn set_flag(&self, tag: TypeTag, flag: u8) {
        let mut state = self.inner.state.lock().expect("node state poisoned");
        *state.flags.entry(tag).or_default() |= flag;
    }

    pub fn clear_flag(&self, tag: TypeTag, flag: u8) {
        let mut state = self.inner.state.lock().expect("node state poisoned");
        if let Some(flags) = state.flags.get_mut(&tag) {
            *flags &= !flag;
        }
    }

    pub fn has_flag(&self, tag: TypeTag, flag: u8) -> bool {
        let state = self.inner.state.lock().expect("node state poisoned");
        state.flags.get(&tag).is_some_and(|f| f & flag != 0)
    }

    // ── Termination ───────────────────────────────────────────────────

    /// Terminal hook: removes this instance from the host registry and
    /// drops all buffered messages. Idempotent.
    pub fn done(&self) {
        if self.inner.done.swap(true, Ordering::AcqRel) {
            return;
        }
        self.clear_state();
        if let Some(host) = self.inner.host.upgrade() {
            host.remove_instance(self.inner.token.id());
        }
    }

    pub fn is_done(&self) -> bool {
        self.inner.done.load(Ordering::Acquire)
    }

    /// Host-side termination on close: no registry callback, the map is
    /// already being drained.
    pub(crate) fn terminate(&self) {
        self.inner.done.store(true, Ordering::Release);
        self.clear_state();
    }

    fn clear_state(&self) {
        let mut state = self.inner.state.lock().expect("node state poisoned");
        state.sinks.clear();
        state.flags.clear();
        state.aggregating.clear();
        state.backlog.clear();
        state.draining.clear();
    }

    // ── Delivery (host-facing) ────────────────────────────────────────

    /// Feed one decoded-on-demand payload into this instance.
    ///
    /// Called by the host dispatcher; per (type, instance) FIFO order is
    /// whatever order the dispatcher observed.
    pub(crate) async fn deliver(&self, sender: TreeNodeId, tag: TypeTag, bytes: Bytes) {
        self.deliver_inner(sender, tag, bytes, false).await;
    }

    async fn deliver_inner(&self, sender: TreeNodeId, tag: TypeTag, bytes: Bytes, from_drain: bool) {
        if self.is_done() {
            return;
        }

        enum Action {
            Direct(Sink, RawEntry),
            Batch(Sink, Vec<RawEntry>),
            Buffered,
        }

        let children = self.children();
        let action = {
            let mut state = self.inner.state.lock().expect("node state poisoned");
            let aggregate = state.flags.get(&tag).copied().unwrap_or(0) & AGGREGATE_MESSAGES != 0;
            if aggregate {
                let buffer = state.aggregating.entry(tag).or_default();
                buffer.seen.insert(sender);
                buffer.entries.push(RawEntry { sender, bytes });
                let complete = children.iter().all(|c| buffer.seen.contains(c));
                match state.sinks.get(&tag) {
                    Some(sink) if complete => {
                        let sink = sink.clone();
                        let buffer = state.aggregating.remove(&tag).expect("buffer just filled");
                        Action::Batch(sink, buffer.entries)
                    }
                    _ => Action::Buffered,
                }
            } else {
                let idle = !state.draining.contains(&tag)
                    && state.backlog.get(&tag).is_none_or(Vec::is_empty);
                match state.sinks.get(&tag) {
                    Some(sink) if from_drain || idle => {
                        Action::Direct(sink.clone(), RawEntry { sender, bytes })
                    }
                    _ => {
                        state
                            .backlog
                            .entry(tag)
                            .or_default()
                            .push(RawEntry { sender, bytes });
                        Action::Buffered
                    }
                }
            }
        };

        match action {
            Action::Direct(sink, entry) => self.deliver_one(tag, sink, entry).await,
            Action::Batch(sink, entries) => self.deliver_batch(tag, sink, entries).await,
            Action::Buffered => {}
        }
    }

    async fn deliver_one(&self, tag: TypeTag, sink: Sink, entry: RawEntry) {
        let any = match decode_registered(tag, &entry.bytes) {
            Ok(any) => any,
            Err(e) => {
                tracing::error!(%tag, "payload decode failed: {e}");
                return;
            }
        };
        match sink {
            Sink::Single(f) => f(entry.sender, any).await,
            // The flag was cleared under an aggregate registration:
            // deliver as a batch of one.
            Sink::Aggregate(f) => f(vec![(entry.sender, any)]).await,
        }
    }

    async fn deliver_batch(&self, tag: TypeTag, sink: Sink, entries: Vec<RawEntry>) {
        let mut decoded = Vec::with_capacity(entries.len());
        for entry in entries {
            match decode_registered(tag, &entry.bytes) {
                Ok(any) => decoded.push((entry.sender, any)),
                Err(e) => tracing::error!(%tag, "payload decode failed: {e}"),
            }
        }
        match sink {
            Sink::Aggregate(f) => f(decoded).await,
            // The flag was set over a single-flavored registration:
            // deliver the records one by one, in arrival order.
            Sink::Single(f) => {
                for (sender, any) in decoded {
                    f(sender, any).await;
                }
            }
        }
    }

    // ── Registration internals ────────────────────────────────────────

    fn insert_sink<T: WireMessage>(
        &self,
        sink: Sink,
        aggregate: bool,
    ) -> Result<(), CohortRuntimeError> {
        let tag = register_message::<T>();
        {
            let mut state = self.inner.state.lock().expect("node state poisoned");
            if state.sinks.contains_key(&tag) {
                return Err(CohortRuntimeError::DuplicateChannel {
                    type_name: std::any::type_name::<T>(),
                });
            }
            state.sinks.insert(tag, sink);
            if aggregate {
                *state.flags.entry(tag).or_default() |= AGGREGATE_MESSAGES;
            }
            if state.backlog.get(&tag).is_some_and(|b| !b.is_empty()) {
                state.draining.insert(tag);
                self.spawn_drain(tag);
            }
        }
        if aggregate {
            self.recheck_aggregate(tag);
        }
        Ok(())
    }

    /// Push buffered envelopes of `tag` through the delivery path, in
    /// order, until the backlog stays empty.
    fn spawn_drain(&self, tag: TypeTag) {
        let node = self.clone();
        tokio::spawn(async move {
            loop {
                let batch = {
                    let mut state = node.inner.state.lock().expect("node state poisoned");
                    match state.backlog.remove(&tag) {
                        Some(entries) if !entries.is_empty() => entries,
                        _ => {
                            state.draining.remove(&tag);
                            return;
                        }
                    }
                };
                for entry in batch {
                    node.deliver_inner(entry.sender, tag, entry.bytes, true).await;
                }
            }
        });
    }

    /// An aggregate registration may complete a buffer that filled up
    /// before the sink existed.
    fn recheck_aggregate(&self, tag: TypeTag) {
        let children = self.children();
        let ready = {
            let mut state = self.inner.state.lock().expect("node state poisoned");
            let complete = state
                .aggregating
                .get(&tag)
                .is_some_and(|b| children.iter().all(|c| b.seen.contains(c)) && !b.entries.is_empty());
            if complete {
                let sink = state.sinks.get(&tag).cloned();
                sink.map(|s| (s, state.aggregating.remove(&tag).expect("buffer present").entries))
            } else {
                None
            }
        };
        if let Some((sink, entries)) = ready {
            let node = self.clone();
            tokio::spawn(async move {
                node.deliver_batch(tag, sink, entries).await;
            });
        }
    }
}

async fn push_with_deadline<M: Send>(tx: mpsc::Sender<M>, msg: M, deadline: Duration) {
    match tokio::time::timeout(deadline, tx.send(msg)).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => tracing::debug!("channel receiver dropped, message discarded"),
        Err(_) => tracing::warn!("delivery deadline expired, message dropped"),
    }
}

fn downcast_batch<T: WireMessage>(entries: Vec<(TreeNodeId, Box<dyn Any + Send>)>) -> Vec<Delivery<T>> {
    entries
        .into_iter()
        .filter_map(|(sender, any)| match any.downcast::<T>() {
            Ok(msg) => Some(Delivery { sender, msg: *msg }),
            Err(_) => {
                tracing::error!("aggregated payload is not the registered type");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ProtocolId, RoundId};
    use crate::roster::Roster;
    use ed25519_dalek::SigningKey;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct UnitMsg {
        i: i32,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct UnitAggMsg {
        i: i32,
    }

    fn roster(n: u8) -> Roster {
        let entities = (0..n)
            .map(|seed| {
                let mut rng = StdRng::seed_from_u64(seed as u64);
                let key = SigningKey::generate(&mut rng);
                Entity::new(
                    key.verifying_key(),
                    vec![format!("local://n{seed}").as_str().into()],
                )
            })
            .collect();
        Roster::new(entities)
    }

    /// A detached node at the root of an n-entity binary tree.
    fn detached_node(n: u8) -> Node {
        let tree = Arc::new(roster(n).generate_binary_tree().expect("tree"));
        let token = Token {
            protocol: ProtocolId::from_name("node-unit-test"),
            roster: tree.roster().id(),
            tree: tree.id(),
            round: RoundId::random(),
            tree_node: tree.root_id(),
        };
        Node::new(Weak::new(), token, tree, Duration::from_secs(1), 16)
    }

    fn payload<T: WireMessage>(msg: &T) -> Bytes {
        Bytes::from(rmp_serde::to_vec(msg).expect("serialize"))
    }

    #[tokio::test]
    async fn single_channel_receives_deliveries() {
        let node = detached_node(2);
        let mut rx = node.open_channel::<UnitMsg>().expect("open channel");

        let child = node.children()[0];
        node.deliver(child, TypeTag::of::<UnitMsg>(), payload(&UnitMsg { i: 3 }))
            .await;

        let delivery = rx.recv().await.expect("delivery");
        assert_eq!(delivery.sender, child);
        assert_eq!(delivery.msg, UnitMsg { i: 3 });
    }

    #[tokio::test]
    async fn messages_buffer_until_registration() {
        let node = detached_node(2);
        let child = node.children()[0];

        node.deliver(child, TypeTag::of::<UnitMsg>(), payload(&UnitMsg { i: 1 }))
            .await;
        node.deliver(child, TypeTag::of::<UnitMsg>(), payload(&UnitMsg { i: 2 }))
            .await;

        let mut rx = node.open_channel::<UnitMsg>().expect("open channel");
        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("drained")
            .expect("delivery");
        let second = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("drained")
            .expect("delivery");
        assert_eq!(first.msg.i, 1);
        assert_eq!(second.msg.i, 2);
    }

    #[tokio::test]
    async fn aggregation_waits_for_every_child() {
        let node = detached_node(3);
        let children = node.children();
        assert_eq!(children.len(), 2);

        let mut rx = node.open_channel_agg::<UnitAggMsg>().expect("open channel");
        assert!(node.has_flag(TypeTag::of::<UnitAggMsg>(), AGGREGATE_MESSAGES));

        node.deliver(children[0], TypeTag::of::<UnitAggMsg>(), payload(&UnitAggMsg { i: 3 }))
            .await;
        assert!(rx.try_recv().is_err(), "one child is not a full batch");

        node.deliver(children[1], TypeTag::of::<UnitAggMsg>(), payload(&UnitAggMsg { i: 4 }))
            .await;
        let batch = rx.recv().await.expect("batch");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].msg.i, 3);
        assert_eq!(batch[1].msg.i, 4);
        assert_eq!(batch[0].sender, children[0]);
        assert_eq!(batch[1].sender, children[1]);
    }

    #[tokio::test]
    async fn repeated_sender_does_not_complete_aggregation() {
        let node = detached_node(3);
        let children = node.children();
        let mut rx = node.open_channel_agg::<UnitAggMsg>().expect("open channel");

        node.deliver(children[0], TypeTag::of::<UnitAggMsg>(), payload(&UnitAggMsg { i: 1 }))
            .await;
        node.deliver(children[0], TypeTag::of::<UnitAggMsg>(), payload(&UnitAggMsg { i: 2 }))
            .await;
        assert!(rx.try_recv().is_err(), "same child twice is not completion");

        node.deliver(children[1], TypeTag::of::<UnitAggMsg>(), payload(&UnitAggMsg { i: 3 }))
            .await;
        let batch = rx.recv().await.expect("batch");
        assert_eq!(batch.len(), 3, "all buffered entries are delivered");
    }

    #[tokio::test]
    async fn aggregate_registration_completes_buffered_messages() {
        let node = detached_node(3);
        let children = node.children();

        // Both children arrive before any registration: the entries land
        // in the backlog, then flow into the aggregation buffer once the
        // flag and sink exist.
        node.set_flag(TypeTag::of::<UnitAggMsg>(), AGGREGATE_MESSAGES);
        node.deliver(children[0], TypeTag::of::<UnitAggMsg>(), payload(&UnitAggMsg { i: 1 }))
            .await;
        node.deliver(children[1], TypeTag::of::<UnitAggMsg>(), payload(&UnitAggMsg { i: 2 }))
            .await;

        let mut rx = node.open_channel_agg::<UnitAggMsg>().expect("open channel");
        let batch = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("completed on registration")
            .expect("batch");
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_registration_fails() {
        let node = detached_node(2);
        let _rx = node.open_channel::<UnitMsg>().expect("first registration");

        let err = node.open_channel::<UnitMsg>().unwrap_err();
        assert!(matches!(err, CohortRuntimeError::DuplicateChannel { .. }));

        let err = node
            .register_handler::<UnitMsg, _>(|_delivery| {})
            .unwrap_err();
        assert!(matches!(err, CohortRuntimeError::DuplicateChannel { .. }));
    }

    #[tokio::test]
    async fn handler_runs_per_delivery() {
        let node = detached_node(2);
        let (tx, mut rx) = mpsc::channel(4);
        node.register_handler::<UnitMsg, _>(move |delivery| {
            tx.try_send(delivery.msg.i).ok();
        })
        .expect("register handler");

        let child = node.children()[0];
        node.deliver(child, TypeTag::of::<UnitMsg>(), payload(&UnitMsg { i: 5 }))
            .await;

        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("handler ran")
            .expect("value");
        assert_eq!(got, 5);
    }

    #[tokio::test]
    async fn flag_roundtrip() {
        let node = detached_node(2);
        let tag = TypeTag::NIL;

        assert!(!node.has_flag(tag, AGGREGATE_MESSAGES));
        node.set_flag(tag, AGGREGATE_MESSAGES);
        assert!(node.has_flag(tag, AGGREGATE_MESSAGES));
        node.set_flag(tag, AGGREGATE_MESSAGES);
        assert!(node.has_flag(tag, AGGREGATE_MESSAGES), "set is idempotent");
        node.clear_flag(tag, AGGREGATE_MESSAGES);
        assert!(!node.has_flag(tag, AGGREGATE_MESSAGES));
        node.clear_flag(tag, AGGREGATE_MESSAGES);
        assert!(!node.has_flag(tag, AGGREGATE_MESSAGES), "clear is idempotent");
    }

    #[tokio::test]
    async fn done_drops_buffered_messages() {
        let node = detached_node(2);
        let child = node.children()[0];

        node.deliver(child, TypeTag::of::<UnitMsg>(), payload(&UnitMsg { i: 9 }))
            .await;
        node.done();
        assert!(node.is_done());

        // Late registration finds nothing; late deliveries are dropped.
        let mut rx = node.open_channel::<UnitMsg>().expect("register");
        node.deliver(child, TypeTag::of::<UnitMsg>(), payload(&UnitMsg { i: 10 }))
            .await;
        assert!(rx.try_recv().is_err());
    }
}
