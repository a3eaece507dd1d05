//! Serves simulated nodes over real TCP sockets.

use async_trait::async_trait;
use replset_core::{AdminCommand, AdminReply, Candidate, CommandFailure, Result, Secret};
use replset_network::{AdminEndpoint, AdminHandler};
use std::sync::Arc;

use crate::cluster_sim::SimulatedCluster;

/// Answers admin commands as one node of a [`SimulatedCluster`].
pub struct SimNodeHandler {
    cluster: SimulatedCluster,
    index: usize,
}

impl SimNodeHandler {
    pub fn new(cluster: SimulatedCluster, index: usize) -> Self {
        Self { cluster, index }
    }
}

#[async_trait]
impl AdminHandler for SimNodeHandler {
    async fn authenticate(
        &self,
        username: &str,
        password: &Secret,
        _source: &str,
    ) -> std::result::Result<(), CommandFailure> {
        if self.cluster.is_down(self.index) {
            return Err(CommandFailure::new(6, "HostUnreachable", "node is down"));
        }
        self.cluster.check_login(self.index, username, password)
    }

    async fn handle(
        &self,
        command: AdminCommand,
    ) -> std::result::Result<AdminReply, CommandFailure> {
        self.cluster.dispatch(self.index, command)
    }
}

/// Listening endpoints for every node of a simulated cluster.
pub struct TcpCluster {
    endpoints: Vec<AdminEndpoint>,
    cluster: SimulatedCluster,
}

impl TcpCluster {
    /// Binds one loopback endpoint per node.
    pub async fn serve(cluster: SimulatedCluster) -> Result<Self> {
        let mut endpoints = Vec::with_capacity(cluster.node_count());
        for index in 0..cluster.node_count() {
            let handler = Arc::new(SimNodeHandler::new(cluster.clone(), index));
            endpoints.push(AdminEndpoint::bind("127.0.0.1:0", handler).await?);
        }
        Ok(Self { endpoints, cluster })
    }

    /// Candidates pointing at the TCP endpoints, in node order.
    pub fn candidates(&self) -> Vec<Candidate> {
        self.cluster
            .candidates()
            .into_iter()
            .zip(&self.endpoints)
            .map(|(candidate, endpoint)| {
                Candidate::new(endpoint.local_addr().to_string(), candidate.credentials)
            })
            .collect()
    }

    pub fn cluster(&self) -> &SimulatedCluster {
        &self.cluster
    }

    pub fn shutdown(&self) {
        for endpoint in &self.endpoints {
            endpoint.shutdown();
        }
    }
}
