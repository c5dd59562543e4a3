//! Local in-process harness for runtime tests and simulation.
//!
//! Builds a set of hosts over one private [`LocalDirectory`] with
//! deterministic keys, assembles rosters and trees over them, and
//! offers direct instance-to-instance sends for driving protocols by
//! hand. Every test gets its own directory, so parallel tests never see
//! each other's addresses.

use std::sync::Arc;

use ed25519_dalek::SigningKey;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::CohortRuntimeError;
use crate::host::{Host, HostConfig};
use crate::messages::Envelope;
use crate::node::Node;
use crate::roster::Roster;
use crate::tree::Tree;
use crate::ids::TreeNodeId;
use cohort_transport::{Address, Entity, LocalDirectory, WireMessage};

pub struct LocalTest {
    dir: Arc<LocalDirectory>,
    hosts: Vec<Arc<Host>>,
    rng: StdRng,
}

impl LocalTest {
    pub fn new() -> Self {
        Self {
            dir: LocalDirectory::new(),
            hosts: Vec::new(),
            rng: StdRng::seed_from_u64(42),
        }
    }

    /// Spin up one listening host on the private directory.
    pub fn gen_host(&mut self) -> Arc<Host> {
        let index = self.hosts.len();
        let key = SigningKey::generate(&mut self.rng);
        let entity = Entity::new(
            key.verifying_key(),
            vec![Address::new(format!("local://host-{index}"))],
        );
        let transport = self
            .dir
            .bind(entity.clone())
            .expect("bind local endpoint");
        let host = Host::new(entity, key, Arc::new(transport), HostConfig::default());
        host.listen();
        self.hosts.push(host.clone());
        host
    }

    /// `n` hosts, a roster over all of them and a binary tree, with the
    /// topology registered on every host.
    pub async fn gen_tree(&mut self, n: usize) -> (Vec<Arc<Host>>, Roster, Tree) {
        self.gen_tree_shaped(n, 2, 2).await
    }

    /// Like [`gen_tree`](Self::gen_tree) with explicit branching: the
    /// root gets `root_children` children, interior nodes `branching`.
    pub async fn gen_tree_shaped(
        &mut self,
        n: usize,
        root_children: usize,
        branching: usize,
    ) -> (Vec<Arc<Host>>, Roster, Tree) {
        let hosts: Vec<_> = (0..n).map(|_| self.gen_host()).collect();
        let roster = Roster::new(hosts.iter().map(|h| h.entity().clone()).collect());
        let tree = roster
            .generate_tree(n, root_children, branching)
            .expect("tree generation");
        for host in &hosts {
            host.add_roster(roster.clone()).await;
            host.add_tree(tree.clone()).await;
        }
        (hosts, roster, tree)
    }

    pub fn hosts(&self) -> &[Arc<Host>] {
        &self.hosts
    }

    /// The host whose entity backs `node_id` in `tree`.
    pub fn host_for(&self, tree: &Tree, node_id: TreeNodeId) -> Option<Arc<Host>> {
        let entity = tree.entity_of(node_id)?;
        self.hosts
            .iter()
            .find(|h| h.entity().id() == entity.id())
            .cloned()
    }

    /// Send `msg` from one live instance straight to another, addressing
    /// the receiver's exact token. Lets a test drive two independently
    /// started instances against each other.
    pub async fn send_direct<T: WireMessage>(
        &self,
        from: &Node,
        to: &Node,
        msg: &T,
    ) -> Result<(), CohortRuntimeError> {
        let envelope = Envelope::new(from.token(), to.token(), msg)?;
        let host = from.host().ok_or(CohortRuntimeError::Closed)?;
        let entity = to.entity().clone();
        host.send_raw(&entity, &envelope).await
    }

    /// Close every host. Call at the end of each test.
    pub async fn close_all(&mut self) {
        for host in self.hosts.drain(..) {
            host.close().await;
        }
    }
}

impl Default for LocalTest {
    fn default() -> Self {
        Self::new()
    }
}
