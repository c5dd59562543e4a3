//! The Host: connection multiplexer and message dispatcher.
//!
//! One host per process-node. It owns the transport endpoint, the stores
//! of known entities/rosters/trees, the instance registry, and the two
//! pending queues of the topology-fetch path. One reader task per
//! connection pumps frames into a single ingress queue; one dispatcher
//! task consumes it, answering topology control messages itself and
//! routing payload envelopes to their instances, instantiating them on
//! demand.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::CohortRuntimeError;
use crate::ids::{ProtocolId, RosterId, RoundId, TokenId, TreeId, TreeNodeId};
use crate::instance::ProtocolInstance;
use crate::messages::{
    register_control_messages, Envelope, RequestRoster, RequestTree, SendRoster, SendTree,
};
use crate::node::Node;
use crate::registry;
use crate::roster::Roster;
use crate::token::Token;
use crate::tree::{Tree, TreeMarshal};
use cohort_transport::{Connection, Entity, EntityId, Frame, Transport, TypeTag, WireMessage};
use ed25519_dalek::SigningKey;

/// Tunables of a [`Host`].
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Depth of the single ingress queue between readers and dispatcher.
    pub ingress_buffer: usize,
    /// A connection that stays silent this long is logged, not torn down.
    pub read_timeout: Duration,
    /// How long a delivery may block on a full instance channel before it
    /// is dropped with a warning.
    pub delivery_deadline: Duration,
    /// Capacity of runtime-allocated instance channels.
    pub channel_capacity: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            ingress_buffer: 64,
            read_timeout: Duration::from_secs(60),
            delivery_deadline: Duration::from_secs(10),
            channel_capacity: 100,
        }
    }
}

/// A frame plus the authenticated entity it came from.
struct Inbound {
    from: Entity,
    frame: Frame,
}

/// The node-side runtime: transport connections, topology stores,
/// instance registry and the dispatch loop.
pub struct Host {
    entity: Entity,
    private: SigningKey,
    config: HostConfig,
    transport: Arc<dyn Transport>,

    // One lock per store; none is held across instance delivery.
    connections: Mutex<HashMap<EntityId, Arc<dyn Connection>>>,
    entities: Mutex<HashMap<EntityId, Entity>>,
    rosters: Mutex<HashMap<RosterId, Arc<Roster>>>,
    trees: Mutex<HashMap<TreeId, Arc<Tree>>>,
    instances: Mutex<HashMap<TokenId, Node>>,
    /// Envelopes whose tree or roster we do not know yet.
    pending_envelopes: Mutex<Vec<Envelope>>,
    /// Tree marshals waiting for their roster, keyed by roster id.
    pending_trees: Mutex<HashMap<RosterId, Vec<TreeMarshal>>>,

    ingress_tx: mpsc::Sender<Inbound>,
    shutdown: watch::Sender<bool>,
    listening: AtomicBool,
    closed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Host {
    /// Build a host over a bound transport endpoint and spawn its
    /// dispatcher. Call [`listen`](Self::listen) to accept inbound
    /// connections.
    pub fn new(
        entity: Entity,
        private: SigningKey,
        transport: Arc<dyn Transport>,
        config: HostConfig,
    ) -> Arc<Host> {
        register_control_messages();

        let (ingress_tx, ingress_rx) = mpsc::channel(config.ingress_buffer);
        let (shutdown, _) = watch::channel(false);

        let host = Arc::new(Host {
            entity,
            private,
            config,
            transport,
            connections: Mutex::new(HashMap::new()),
            entities: Mutex::new(HashMap::new()),
            rosters: Mutex::new(HashMap::new()),
            trees: Mutex::new(HashMap::new()),
            instances: Mutex::new(HashMap::new()),
            pending_envelopes: Mutex::new(Vec::new()),
            pending_trees: Mutex::new(HashMap::new()),
            ingress_tx,
            shutdown,
            listening: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        });

        let dispatcher = tokio::spawn(dispatch_loop(
            host.clone(),
            ingress_rx,
            host.shutdown.subscribe(),
        ));
        host.push_task(dispatcher);
        host
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub fn private(&self) -> &SigningKey {
        &self.private
    }

    // ── Connections ───────────────────────────────────────────────────

    /// Start accepting inbound connections. Idempotent.
    pub fn listen(self: &Arc<Self>) {
        if self.listening.swap(true, Ordering::AcqRel) {
            return;
        }
        let host = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        let accept_loop = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    accepted = host.transport.accept() => match accepted {
                        Ok(conn) => {
                            tracing::debug!(host = %host.entity.id(), peer = %conn.peer().id(), "accepted connection");
                            host.register_connection(conn);
                        }
                        Err(e) if e.is_disconnect() => break,
                        Err(e) => {
                            tracing::error!("accept failed: {e}");
                            break;
                        }
                    },
                }
            }
        });
        self.push_task(accept_loop);
    }

    /// Open (or reuse) the authenticated connection to `remote`.
    pub async fn connect(
        self: &Arc<Self>,
        remote: &Entity,
    ) -> Result<Arc<dyn Connection>, CohortRuntimeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CohortRuntimeError::Closed);
        }
        if let Some(conn) = self.connections.lock().expect("connections poisoned").get(&remote.id())
        {
            return Ok(conn.clone());
        }
        let conn = self.transport.open(remote).await?;
        tracing::debug!(host = %self.entity.id(), peer = %remote.id(), "connected");
        self.register_connection(conn.clone());
        Ok(conn)
    }

    fn register_connection(self: &Arc<Self>, conn: Arc<dyn Connection>) {
        let peer = conn.peer().clone();
        self.entities
            .lock()
            .expect("entities poisoned")
            .insert(peer.id(), peer.clone());
        self.connections
            .lock()
            .expect("connections poisoned")
            .insert(peer.id(), conn.clone());
        self.spawn_reader(conn);
    }

    /// One reader per connection: pump frames into the ingress queue.
    /// Disconnects terminate the reader; anything else is logged and the
    /// connection stays up.
    fn spawn_reader(self: &Arc<Self>, conn: Arc<dyn Connection>) {
        let host = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        let reader = tokio::spawn(async move {
            let peer = conn.peer().clone();
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        conn.close().await;
                        break;
                    }
                    received = tokio::time::timeout(host.config.read_timeout, conn.recv()) => {
                        match received {
                            Err(_elapsed) => {
                                tracing::warn!(peer = %peer.id(), "no frame within read timeout");
                            }
                            Ok(Ok(frame)) => {
                                let inbound = Inbound { from: peer.clone(), frame };
                                if host.ingress_tx.send(inbound).await.is_err() {
                                    break;
                                }
                            }
                            Ok(Err(e)) if e.is_disconnect() => break,
                            Ok(Err(e)) => tracing::error!(peer = %peer.id(), "receive error: {e}"),
                        }
                    }
                }
            }
        });
        self.push_task(reader);
    }

    // ── Sending ───────────────────────────────────────────────────────

    /// Serialize `msg` under its registered tag and push it to `to`,
    /// opening a connection if none exists.
    pub async fn send_raw<M: WireMessage>(
        self: &Arc<Self>,
        to: &Entity,
        msg: &M,
    ) -> Result<(), CohortRuntimeError> {
        let frame = Frame::encode(msg)?;
        let conn = self.connect(to).await?;
        conn.send(frame).await?;
        Ok(())
    }

    /// The instance-to-instance send: wrap `msg` into an [`Envelope`]
    /// from the instance at `from` to the instance at `to`.
    ///
    /// The wire recipient token is always derived as
    /// `from.other(to.tree_node)`; the caller's `to` routes to the
    /// peer's entity and is sanity-checked against the derivation. Fails
    /// with an addressing error if `from` has no registered instance.
    pub async fn send<M: WireMessage>(
        self: &Arc<Self>,
        from: &Token,
        to: &Token,
        msg: &M,
    ) -> Result<(), CohortRuntimeError> {
        if !self
            .instances
            .lock()
            .expect("instances poisoned")
            .contains_key(&from.id())
        {
            return Err(CohortRuntimeError::NoInstance(from.id()));
        }
        let tree = self
            .tree(to.tree)
            .ok_or(CohortRuntimeError::UnknownTree(to.tree))?;
        let entity = tree
            .entity_of(to.tree_node)
            .ok_or(CohortRuntimeError::UnknownTreeNode {
                tree: to.tree,
                node: to.tree_node,
            })?
            .clone();

        let derived = from.other(to.tree_node);
        if derived != *to {
            tracing::warn!("recipient token disagrees with the sender view; using the derived token");
        }
        let envelope = Envelope::new(from, &derived, msg)?;
        self.send_raw(&entity, &envelope).await
    }

    // ── Protocol lifecycle ────────────────────────────────────────────

    /// Launch a round of `protocol` on `tree_id`: mint a fresh round id,
    /// instantiate at the root, run `start()`, then spawn the dispatch
    /// body.
    pub async fn start_protocol(
        self: &Arc<Self>,
        protocol: ProtocolId,
        tree_id: TreeId,
    ) -> Result<Node, CohortRuntimeError> {
        if !registry::protocol_exists(protocol) {
            return Err(CohortRuntimeError::UnknownProtocol(protocol));
        }
        let tree = self
            .tree(tree_id)
            .ok_or(CohortRuntimeError::UnknownTree(tree_id))?;
        let token = Token {
            protocol,
            roster: tree.roster().id(),
            tree: tree_id,
            round: RoundId::random(),
            tree_node: tree.root_id(),
        };

        let (node, instance) = self.instantiate_at(&token, &tree)?;
        let mut instance = instance.ok_or_else(|| {
            CohortRuntimeError::Protocol("freshly minted round already has an instance".into())
        })?;

        tracing::debug!(host = %self.entity.id(), protocol = %protocol, "starting protocol");
        if let Err(e) = instance.start().await {
            self.remove_instance(token.id());
            return Err(e);
        }
        self.spawn_dispatch_body(instance);
        Ok(node)
    }

    /// [`start_protocol`](Self::start_protocol) by registered name.
    pub async fn start_protocol_name(
        self: &Arc<Self>,
        name: &str,
        tree_id: TreeId,
    ) -> Result<Node, CohortRuntimeError> {
        self.start_protocol(ProtocolId::from_name(name), tree_id).await
    }

    /// Instantiate at an exact token without calling `start()`.
    ///
    /// This is the harness entry point: tests build an instance at a
    /// chosen slot (e.g. the peer view of a running root) and drive it
    /// by hand.
    pub fn create_instance(self: &Arc<Self>, token: Token) -> Result<Node, CohortRuntimeError> {
        let tree = self
            .tree(token.tree)
            .ok_or(CohortRuntimeError::UnknownTree(token.tree))?;
        let (node, instance) = self.instantiate_at(&token, &tree)?;
        if let Some(instance) = instance {
            self.spawn_dispatch_body(instance);
        }
        Ok(node)
    }

    /// Look up or construct the instance for `token`.
    ///
    /// Returns the protocol object when this call constructed it; the
    /// caller decides whether `start()` runs before the dispatch body is
    /// spawned. The node is registered before the constructor runs, so
    /// two concurrent deliveries for one token construct exactly once.
    fn instantiate_at(
        self: &Arc<Self>,
        token: &Token,
        tree: &Arc<Tree>,
    ) -> Result<(Node, Option<Box<dyn ProtocolInstance>>), CohortRuntimeError> {
        let token_id = token.id();
        if let Some(existing) = self
            .instances
            .lock()
            .expect("instances poisoned")
            .get(&token_id)
        {
            return Ok((existing.clone(), None));
        }

        if !registry::protocol_exists(token.protocol) {
            return Err(CohortRuntimeError::UnknownProtocol(token.protocol));
        }
        if !self
            .rosters
            .lock()
            .expect("rosters poisoned")
            .contains_key(&token.roster)
        {
            return Err(CohortRuntimeError::UnknownRoster(token.roster));
        }
        if !tree.contains(token.tree_node) {
            return Err(CohortRuntimeError::UnknownTreeNode {
                tree: token.tree,
                node: token.tree_node,
            });
        }

        let node = Node::new(
            Arc::downgrade(self),
            token.clone(),
            tree.clone(),
            self.config.delivery_deadline,
            self.config.channel_capacity,
        );
        {
            let mut instances = self.instances.lock().expect("instances poisoned");
            if let Some(existing) = instances.get(&token_id) {
                return Ok((existing.clone(), None));
            }
            instances.insert(token_id, node.clone());
        }

        match registry::instantiate(token.protocol, node.clone()) {
            Ok(instance) => Ok((node, Some(instance))),
            Err(e) => {
                self.remove_instance(token_id);
                Err(e)
            }
        }
    }

    /// Run a protocol's dispatch body in its own task; failures and
    /// panics stay out of the host loop.
    fn spawn_dispatch_body(self: &Arc<Self>, instance: Box<dyn ProtocolInstance>) {
        let body = tokio::spawn(async move {
            match std::panic::AssertUnwindSafe(instance.dispatch())
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("protocol dispatch body failed: {e}"),
                Err(_) => tracing::error!("protocol dispatch body panicked"),
            }
        });
        self.push_task(body);
    }

    pub(crate) fn remove_instance(&self, id: TokenId) {
        self.instances
            .lock()
            .expect("instances poisoned")
            .remove(&id);
    }

    // ── Topology stores ───────────────────────────────────────────────

    /// Store a roster, then materialize any tree marshals waiting on it.
    pub async fn add_roster(self: &Arc<Self>, roster: Roster) {
        let id = roster.id();
        let roster = Arc::new(roster);
        if self
            .rosters
            .lock()
            .expect("rosters poisoned")
            .insert(id, roster.clone())
            .is_some()
        {
            tracing::debug!(roster = %id, "roster was already known");
        }

        let waiting = self
            .pending_trees
            .lock()
            .expect("pending trees poisoned")
            .remove(&id);
        for marshal in waiting.unwrap_or_default() {
            match marshal.materialize(roster.clone()) {
                Ok(tree) => self.add_tree(tree).await,
                Err(e) => tracing::error!("dropping pending tree marshal: {e}"),
            }
        }
    }

    /// Store a tree, then re-deliver any envelopes waiting on it.
    pub async fn add_tree(self: &Arc<Self>, tree: Tree) {
        let id = tree.id();
        let tree = Arc::new(tree);
        if self
            .trees
            .lock()
            .expect("trees poisoned")
            .insert(id, tree.clone())
            .is_some()
        {
            tracing::debug!(tree = %id, "tree was already known");
        }
        self.check_pending_envelopes(&tree).await;
    }

    pub fn tree(&self, id: TreeId) -> Option<Arc<Tree>> {
        self.trees.lock().expect("trees poisoned").get(&id).cloned()
    }

    pub fn roster(&self, id: RosterId) -> Option<Arc<Roster>> {
        self.rosters
            .lock()
            .expect("rosters poisoned")
            .get(&id)
            .cloned()
    }

    pub fn known_trees(&self) -> Vec<TreeId> {
        self.trees.lock().expect("trees poisoned").keys().copied().collect()
    }

    pub fn known_rosters(&self) -> Vec<RosterId> {
        self.rosters
            .lock()
            .expect("rosters poisoned")
            .keys()
            .copied()
            .collect()
    }

    /// The live instance at `token`, if any.
    pub fn instance(&self, token: &Token) -> Option<Node> {
        self.instances
            .lock()
            .expect("instances poisoned")
            .get(&token.id())
            .cloned()
    }

    /// Resolve a token's tree-node against the tree store.
    pub fn tree_node_from_token(&self, token: &Token) -> Result<TreeNodeId, CohortRuntimeError> {
        let tree = self
            .tree(token.tree)
            .ok_or(CohortRuntimeError::UnknownTree(token.tree))?;
        if tree.contains(token.tree_node) {
            Ok(token.tree_node)
        } else {
            Err(CohortRuntimeError::UnknownTreeNode {
                tree: token.tree,
                node: token.tree_node,
            })
        }
    }

    // ── Shutdown ──────────────────────────────────────────────────────

    /// Close everything: transport, connections, instances, pending
    /// queues, worker tasks. Idempotent.
    pub async fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown.send(true);
        self.transport.close().await;

        let connections: Vec<_> = {
            let mut map = self.connections.lock().expect("connections poisoned");
            map.drain().map(|(_, conn)| conn).collect()
        };
        for conn in connections {
            conn.close().await;
        }

        let instances: Vec<Node> = {
            let mut map = self.instances.lock().expect("instances poisoned");
            map.drain().map(|(_, node)| node).collect()
        };
        for node in instances {
            node.terminate();
        }

        self.pending_envelopes
            .lock()
            .expect("pending envelopes poisoned")
            .clear();
        self.pending_trees
            .lock()
            .expect("pending trees poisoned")
            .clear();

        let tasks: Vec<_> = {
            let mut tasks = self.tasks.lock().expect("tasks poisoned");
            tasks.drain(..).collect()
        };
        for task in tasks {
            task.abort();
        }
        tracing::debug!(host = %self.entity.id(), "closed");
    }

    fn push_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().expect("tasks poisoned").push(handle);
    }

    // ── Dispatch ──────────────────────────────────────────────────────

    async fn handle_frame(self: &Arc<Self>, from: &Entity, frame: Frame) {
        let tag = frame.tag;
        if tag == TypeTag::of::<Envelope>() {
            match frame.decode::<Envelope>() {
                Ok(envelope) => self.process_envelope(from, envelope).await,
                Err(e) => tracing::error!("undecodable envelope: {e}"),
            }
        } else if tag == TypeTag::of::<RequestTree>() {
            match frame.decode::<RequestTree>() {
                Ok(request) => self.handle_request_tree(from, request).await,
                Err(e) => tracing::error!("undecodable tree request: {e}"),
            }
        } else if tag == TypeTag::of::<SendTree>() {
            match frame.decode::<SendTree>() {
                Ok(reply) => self.handle_send_tree(from, reply).await,
                Err(e) => tracing::error!("undecodable tree reply: {e}"),
            }
        } else if tag == TypeTag::of::<RequestRoster>() {
            match frame.decode::<RequestRoster>() {
                Ok(request) => self.handle_request_roster(from, request).await,
                Err(e) => tracing::error!("undecodable roster request: {e}"),
            }
        } else if tag == TypeTag::of::<SendRoster>() {
            match frame.decode::<SendRoster>() {
                Ok(reply) => self.handle_send_roster(reply).await,
                Err(e) => tracing::error!("undecodable roster reply: {e}"),
            }
        } else {
            tracing::error!(%tag, "unrecognized frame tag, dropping");
        }
    }

    /// Route a payload envelope: fetch missing topology first, then look
    /// up (or create) the addressed instance and hand the payload over.
    async fn process_envelope(self: &Arc<Self>, from: &Entity, envelope: Envelope) {
        if !registry::protocol_exists(envelope.to.protocol) {
            tracing::error!(
                protocol = %envelope.to.protocol,
                "envelope for a protocol this node never registered"
            );
            return;
        }

        let roster_known = self
            .rosters
            .lock()
            .expect("rosters poisoned")
            .contains_key(&envelope.to.roster);
        let tree = if roster_known {
            self.tree(envelope.to.tree)
        } else {
            None
        };

        match tree {
            Some(tree) => self.dispatch_envelope(envelope, &tree).await,
            None => self.request_topology(from, envelope).await,
        }
    }

    async fn dispatch_envelope(self: &Arc<Self>, envelope: Envelope, tree: &Arc<Tree>) {
        let node = match self.instantiate_at(&envelope.to, tree) {
            Ok((node, Some(instance))) => {
                self.spawn_dispatch_body(instance);
                node
            }
            Ok((node, None)) => node,
            Err(e) => {
                tracing::error!("cannot instantiate addressed instance: {e}");
                return;
            }
        };
        node.deliver(
            envelope.from.tree_node,
            envelope.type_tag,
            Bytes::from(envelope.payload),
        )
        .await;
    }

    /// Unknown tree or roster: park the envelope and ask the sender for
    /// the tree (the roster follows via the tree marshal if needed).
    async fn request_topology(self: &Arc<Self>, from: &Entity, envelope: Envelope) {
        let tree_id = envelope.to.tree;
        tracing::debug!(host = %self.entity.id(), tree = %tree_id, "parking envelope, requesting tree");
        self.pending_envelopes
            .lock()
            .expect("pending envelopes poisoned")
            .push(envelope);
        if let Err(e) = self.send_raw(from, &RequestTree { tree_id }).await {
            tracing::error!("tree request failed: {e}");
        }
    }

    async fn handle_request_tree(self: &Arc<Self>, from: &Entity, request: RequestTree) {
        let reply = match self.tree(request.tree_id) {
            Some(tree) => SendTree {
                tree: tree.marshal(),
            },
            None => {
                tracing::debug!(tree = %request.tree_id, "peer asked for a tree this node does not hold");
                SendTree {
                    tree: TreeMarshal::empty(),
                }
            }
        };
        if let Err(e) = self.send_raw(from, &reply).await {
            tracing::error!("tree reply failed: {e}");
        }
    }

    async fn handle_send_tree(self: &Arc<Self>, from: &Entity, reply: SendTree) {
        let marshal = reply.tree;
        if marshal.is_empty() {
            tracing::warn!("received an empty tree; leaving envelopes pending");
            return;
        }
        match self.roster(marshal.roster_id) {
            Some(roster) => match marshal.materialize(roster) {
                Ok(tree) => self.add_tree(tree).await,
                Err(e) => tracing::error!("dropping malformed tree marshal: {e}"),
            },
            None => {
                let roster_id = marshal.roster_id;
                self.pending_trees
                    .lock()
                    .expect("pending trees poisoned")
                    .entry(roster_id)
                    .or_default()
                    .push(marshal);
                if let Err(e) = self.send_raw(from, &RequestRoster { roster_id }).await {
                    tracing::error!("roster request failed: {e}");
                }
            }
        }
    }

    async fn handle_request_roster(self: &Arc<Self>, from: &Entity, request: RequestRoster) {
        let reply = match self.roster(request.roster_id) {
            Some(roster) => SendRoster {
                roster: (*roster).clone(),
            },
            None => {
                tracing::debug!(roster = %request.roster_id, "peer asked for a roster this node does not hold");
                SendRoster {
                    roster: Roster::empty(),
                }
            }
        };
        if let Err(e) = self.send_raw(from, &reply).await {
            tracing::error!("roster reply failed: {e}");
        }
    }

    async fn handle_send_roster(self: &Arc<Self>, reply: SendRoster) {
        if reply.roster.is_empty() {
            tracing::warn!("received an empty roster; leaving trees pending");
            return;
        }
        self.add_roster(reply.roster).await;
    }

    /// A new tree may unblock parked envelopes: deliver every match
    /// exactly once, instantiating instances as needed.
    async fn check_pending_envelopes(self: &Arc<Self>, tree: &Arc<Tree>) {
        let matching: Vec<Envelope> = {
            let mut pending = self
                .pending_envelopes
                .lock()
                .expect("pending envelopes poisoned");
            let (matched, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut *pending)
                .into_iter()
                .partition(|env| env.to.tree == tree.id());
            *pending = rest;
            matched
        };
        for envelope in matching {
            self.dispatch_envelope(envelope, tree).await;
        }
    }
}

/// The single dispatcher: consumes the ingress queue until shutdown.
async fn dispatch_loop(
    host: Arc<Host>,
    mut ingress: mpsc::Receiver<Inbound>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            inbound = ingress.recv() => match inbound {
                Some(Inbound { from, frame }) => host.handle_frame(&from, frame).await,
                None => break,
            },
        }
    }
    tracing::debug!(host = %host.entity.id(), "dispatcher stopped");
}
