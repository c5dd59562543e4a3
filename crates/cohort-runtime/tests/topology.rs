//! Topology discovery: late trees are fetched from the sender, parked
//! envelopes are delivered exactly once, and a token maps to at most
//! one instance.

use cohort_runtime::testing::LocalTest;
use cohort_runtime::{
    register_protocol, CohortRuntimeError, Delivery, Node, ProtocolInstance, Roster, TreeNodeId,
};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Ping {
    i: i32,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();
}

/// Root sends `count` pings to each child; children report deliveries.
struct Flood {
    node: Node,
    count: usize,
    incoming: mpsc::Receiver<Delivery<Ping>>,
    report: mpsc::Sender<(TreeNodeId, Ping)>,
}

impl ProtocolInstance for Flood {
    fn start(&mut self) -> BoxFuture<'_, Result<(), CohortRuntimeError>> {
        Box::pin(async move {
            for child in self.node.children() {
                for i in 0..self.count {
                    self.node.send_to(child, &Ping { i: 42 + i as i32 }).await?;
                }
            }
            Ok(())
        })
    }

    fn dispatch(self: Box<Self>) -> BoxFuture<'static, Result<(), CohortRuntimeError>> {
        let mut this = *self;
        Box::pin(async move {
            if this.node.is_root() {
                return Ok(());
            }
            while let Some(delivery) = this.incoming.recv().await {
                let _ = this.report.send((delivery.sender, delivery.msg)).await;
            }
            Ok(())
        })
    }
}

fn register_flood(
    name: &str,
    count: usize,
    constructions: Arc<AtomicUsize>,
) -> mpsc::Receiver<(TreeNodeId, Ping)> {
    let (report, rx) = mpsc::channel(16);
    register_protocol(name, move |node| {
        constructions.fetch_add(1, Ordering::SeqCst);
        let incoming = node.open_channel::<Ping>()?;
        Ok(Box::new(Flood {
            node,
            count,
            incoming,
            report: report.clone(),
        }))
    })
    .expect("register protocol");
    rx
}

#[tokio::test]
async fn late_topology_is_fetched_and_delivered_once() {
    init_tracing();
    let mut lt = LocalTest::new();
    let a = lt.gen_host();
    let b = lt.gen_host();

    // Only A knows the topology; B will have to ask for it.
    let roster = Roster::new(vec![a.entity().clone(), b.entity().clone()]);
    let tree = roster.generate_binary_tree().expect("tree");
    a.add_roster(roster.clone()).await;
    a.add_tree(tree.clone()).await;

    let constructions = Arc::new(AtomicUsize::new(0));
    let mut report = register_flood("topology-late", 1, constructions.clone());

    let _root = a
        .start_protocol_name("topology-late", tree.id())
        .await
        .expect("start protocol");

    // B must issue RequestTree, then RequestRoster, materialize the
    // tree, instantiate the instance and deliver the payload.
    let (sender, msg) = timeout(Duration::from_secs(3), report.recv())
        .await
        .expect("payload must arrive despite the late topology")
        .expect("report");
    assert_eq!(sender, tree.root_id());
    assert_eq!(msg, Ping { i: 42 });

    // Exactly once.
    assert!(
        timeout(Duration::from_millis(300), report.recv())
            .await
            .is_err(),
        "no duplicate delivery"
    );

    // B now holds the fetched topology and nothing else.
    assert_eq!(b.known_trees(), vec![tree.id()]);
    assert_eq!(b.known_rosters(), vec![roster.id()]);
    assert_eq!(constructions.load(Ordering::SeqCst), 2, "one per role");

    lt.close_all().await;
}

#[tokio::test]
async fn one_instance_per_token() {
    init_tracing();
    let mut lt = LocalTest::new();
    let (hosts, _roster, tree) = lt.gen_tree(2).await;

    let constructions = Arc::new(AtomicUsize::new(0));
    let mut report = register_flood("topology-single-instance", 2, constructions.clone());

    let _root = hosts[0]
        .start_protocol_name("topology-single-instance", tree.id())
        .await
        .expect("start protocol");

    // Both envelopes land in the same child instance.
    let first = timeout(Duration::from_secs(3), report.recv())
        .await
        .expect("first delivery")
        .expect("report");
    let second = timeout(Duration::from_secs(3), report.recv())
        .await
        .expect("second delivery")
        .expect("report");
    assert_eq!(first.1, Ping { i: 42 });
    assert_eq!(second.1, Ping { i: 43 });

    // One construction for the root, one for the child; the second
    // envelope reused the existing instance.
    assert_eq!(constructions.load(Ordering::SeqCst), 2);

    lt.close_all().await;
}

#[tokio::test]
async fn operations_fail_after_close() {
    init_tracing();
    let mut lt = LocalTest::new();
    let (hosts, _roster, _tree) = lt.gen_tree(2).await;

    let host = hosts[0].clone();
    let peer = hosts[1].entity().clone();
    lt.close_all().await;

    let err = host.send_raw(&peer, &Ping { i: 0 }).await.unwrap_err();
    assert!(matches!(err, CohortRuntimeError::Closed));
}
