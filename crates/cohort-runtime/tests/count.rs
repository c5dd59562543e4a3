//! The count protocol over a limited tree: 7 nodes, root branching 1,
//! interior branching 2. The root must report a total of 7.

use cohort_runtime::protocols::count::register_count_protocol;
use cohort_runtime::testing::LocalTest;

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

#[tokio::test]
async fn count_over_limited_tree() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();

    let mut lt = LocalTest::new();
    let (hosts, _roster, tree) = lt.gen_tree_shaped(7, 1, 2).await;

    let (results_tx, mut results_rx) = mpsc::channel(1);
    register_count_protocol("count-limited-tree", results_tx).expect("register protocol");

    hosts[0]
        .start_protocol_name("count-limited-tree", tree.id())
        .await
        .expect("start protocol");

    let total = timeout(Duration::from_secs(10), results_rx.recv())
        .await
        .expect("count must converge")
        .expect("result");
    assert_eq!(total, 7);

    lt.close_all().await;
}

#[tokio::test]
async fn count_singleton_tree() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();

    let mut lt = LocalTest::new();
    let (hosts, _roster, tree) = lt.gen_tree(1).await;

    let (results_tx, mut results_rx) = mpsc::channel(1);
    register_count_protocol("count-singleton", results_tx).expect("register protocol");

    hosts[0]
        .start_protocol_name("count-singleton", tree.id())
        .await
        .expect("start protocol");

    let total = timeout(Duration::from_secs(3), results_rx.recv())
        .await
        .expect("count must converge")
        .expect("result");
    assert_eq!(total, 1);

    lt.close_all().await;
}
