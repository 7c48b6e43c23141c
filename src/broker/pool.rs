use std::net::SocketAddr;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::{net::Endpoint, worker::WorkerClient};

/// The workers the broker can reach, in ring order.
///
/// Every change bumps the generation. The ring is stale, and every worker
/// must be re-initialised before the next turn, whenever the generation it
/// was last seeded for is not the current one.
#[derive(Default)]
pub(crate) struct NodePool {
    nodes: Vec<WorkerClient>,
    generation: u64,
    seeded: Option<u64>,
}

impl NodePool {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn clients(&self) -> &[WorkerClient] {
        &self.nodes
    }

    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.nodes.iter().map(WorkerClient::addr).collect()
    }

    /// The nodes that take part in a world of `height` rows. A node per row
    /// at most; any extra nodes stay connected but idle.
    pub fn active(&self, height: usize) -> &[WorkerClient] {
        &self.nodes[..self.nodes.len().min(height)]
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_stale(&self) -> bool {
        self.seeded != Some(self.generation)
    }

    /// Records that every active node was initialised for `generation`.
    /// Ignored if the pool changed since.
    pub fn mark_seeded(&mut self, generation: u64) {
        if generation == self.generation {
            self.seeded = Some(generation);
        }
    }

    pub fn invalidate(&mut self) {
        self.seeded = None;
    }

    /// Adds nodes not already in the pool.
    pub fn extend(&mut self, clients: Vec<WorkerClient>) {
        let before = self.nodes.len();
        for client in clients {
            if self.nodes.iter().all(|n| n.addr() != client.addr()) {
                self.nodes.push(client);
            }
        }
        if self.nodes.len() != before {
            self.generation += 1;
        }
    }

    /// Removes the listed nodes and closes their connections, returning how
    /// many were actually present.
    pub fn evict(&mut self, addrs: &[SocketAddr]) -> usize {
        let (evicted, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.nodes)
            .into_iter()
            .partition(|node| addrs.contains(&node.addr()));
        self.nodes = kept;
        for node in &evicted {
            node.close();
        }
        if !evicted.is_empty() {
            self.generation += 1;
            warn!(
                evicted = evicted.len(),
                remaining = self.nodes.len(),
                "evicted workers"
            );
        }
        evicted.len()
    }
}

/// Dials every address at once. Nodes that cannot be reached are left out;
/// nothing is retried.
pub(crate) async fn dial_all(
    endpoint: &Endpoint,
    addrs: &[SocketAddr],
) -> Vec<WorkerClient> {
    let attempts = addrs.iter().map(|addr| async move {
        (addr, WorkerClient::connect(endpoint, *addr).await)
    });
    let mut connected = Vec::with_capacity(addrs.len());
    for (addr, result) in join_all(attempts).await {
        match result {
            Ok(client) => {
                debug!(%addr, "worker connected");
                connected.push(client);
            }
            Err(e) => warn!(%addr, "leaving out unreachable worker: {}", e),
        }
    }
    info!(connected = connected.len(), dialed = addrs.len(), "cluster dialed");
    connected
}
