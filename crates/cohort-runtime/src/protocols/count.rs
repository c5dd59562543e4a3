//! Tree-size count.
//!
//! The root floods a [`CountRequest`] down the tree; every leaf answers
//! `1`; every interior node waits for the aggregated replies of all its
//! children, adds one for itself and passes the sum up. The root
//! publishes the total (the number of reachable nodes) on the result
//! channel supplied at registration.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::CohortRuntimeError;
use crate::ids::ProtocolId;
use crate::instance::{Delivery, ProtocolInstance};
use crate::node::Node;
use crate::registry::register_protocol;

/// Flooded down the tree to ask every node to report in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountRequest;

/// Subtree size, passed from child to parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountReply {
    pub count: u32,
}

/// Register the count protocol under `name`. The root instance sends
/// the final total into `results`.
pub fn register_count_protocol(
    name: &str,
    results: mpsc::Sender<u32>,
) -> Result<ProtocolId, CohortRuntimeError> {
    register_protocol(name, move |node| {
        let requests = node.open_channel::<CountRequest>()?;
        let replies = node.open_channel_agg::<CountReply>()?;
        Ok(Box::new(CountProtocol {
            node,
            requests,
            replies,
            results: results.clone(),
        }))
    })
}

pub struct CountProtocol {
    node: Node,
    requests: mpsc::Receiver<Delivery<CountRequest>>,
    replies: mpsc::Receiver<Vec<Delivery<CountReply>>>,
    results: mpsc::Sender<u32>,
}

impl CountProtocol {
    async fn run(mut self) -> Result<(), CohortRuntimeError> {
        if !self.node.is_root() {
            // Wait for the flood to reach us, pass it on.
            self.requests
                .recv()
                .await
                .ok_or(CohortRuntimeError::Closed)?;
            for child in self.node.children() {
                self.node.send_to(child, &CountRequest).await?;
            }
            if self.node.is_leaf() {
                let parent = self.node.parent().expect("non-root has a parent");
                self.node.send_to(parent, &CountReply { count: 1 }).await?;
                self.node.done();
                return Ok(());
            }
        } else if self.node.is_leaf() {
            // Singleton tree: the root is the whole count.
            let _ = self.results.send(1).await;
            self.node.done();
            return Ok(());
        }

        let batch = self
            .replies
            .recv()
            .await
            .ok_or(CohortRuntimeError::Closed)?;
        let total: u32 = batch.iter().map(|d| d.msg.count).sum::<u32>() + 1;

        if self.node.is_root() {
            let _ = self.results.send(total).await;
        } else {
            let parent = self.node.parent().expect("non-root has a parent");
            self.node.send_to(parent, &CountReply { count: total }).await?;
        }
        self.node.done();
        Ok(())
    }
}

impl ProtocolInstance for CountProtocol {
    fn start(&mut self) -> BoxFuture<'_, Result<(), CohortRuntimeError>> {
        Box::pin(async move {
            for child in self.node.children() {
                self.node.send_to(child, &CountRequest).await?;
            }
            Ok(())
        })
    }

    fn dispatch(self: Box<Self>) -> BoxFuture<'static, Result<(), CohortRuntimeError>> {
        let this = *self;
        Box::pin(this.run())
    }
}
