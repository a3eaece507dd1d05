//! Scripted in-memory connector for unit tests.

use async_trait::async_trait;
use replset_core::{
    codes, AdminCommand, AdminConnector, AdminReply, AdminSession, Candidate, ClusterConfig,
    CommandFailure, HelloReply, ReplSetError, ReplSetStatus, Result,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub(crate) struct MockNode {
    pub hello: HelloReply,
    pub delay: Duration,
    pub config: Option<ClusterConfig>,
    /// Status replies in poll order; the last one repeats
    pub statuses: VecDeque<ReplSetStatus>,
    /// Failures keyed by command name
    pub failures: HashMap<&'static str, CommandFailure>,
    pub commands: Vec<AdminCommand>,
}

impl MockNode {
    pub fn primary() -> Self {
        Self {
            hello: HelloReply {
                is_writable_primary: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn secondary() -> Self {
        Self {
            hello: HelloReply {
                secondary: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_config(mut self, config: ClusterConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_status(mut self, status: ReplSetStatus) -> Self {
        self.statuses.push_back(status);
        self
    }

    pub fn failing(mut self, command: &'static str, failure: CommandFailure) -> Self {
        self.failures.insert(command, failure);
        self
    }

    pub fn count(&self, command: &str) -> usize {
        self.commands.iter().filter(|c| c.name() == command).count()
    }

    fn handle(&mut self, command: AdminCommand) -> Result<AdminReply> {
        let name = command.name();
        self.commands.push(command.clone());
        if let Some(failure) = self.failures.get(name) {
            return Err(ReplSetError::command_failed(name, failure.clone()));
        }

        let not_initialized = || {
            ReplSetError::command_failed(
                name,
                CommandFailure::new(
                    codes::NOT_YET_INITIALIZED,
                    "NotYetInitialized",
                    "no replset config",
                ),
            )
        };

        match command {
            AdminCommand::Hello => Ok(AdminReply::Hello(self.hello.clone())),
            AdminCommand::ReplSetGetConfig => {
                self.config.clone().map(AdminReply::Config).ok_or_else(not_initialized)
            }
            AdminCommand::ReplSetGetStatus => {
                let status = if self.statuses.len() > 1 {
                    self.statuses.pop_front()
                } else {
                    self.statuses.front().cloned()
                };
                status.map(AdminReply::Status).ok_or_else(not_initialized)
            }
            AdminCommand::ReplSetReconfig { config, .. } => {
                self.config = Some(config);
                Ok(AdminReply::Ok)
            }
            AdminCommand::ReplSetInitiate { config } => {
                if self.config.is_some() {
                    return Err(ReplSetError::command_failed(
                        name,
                        CommandFailure::new(
                            codes::ALREADY_INITIALIZED,
                            "AlreadyInitialized",
                            "already initialized",
                        ),
                    ));
                }
                self.config = Some(config);
                Ok(AdminReply::Ok)
            }
            _ => Ok(AdminReply::Ok),
        }
    }
}

#[derive(Default)]
pub(crate) struct MockConnector {
    nodes: HashMap<String, Arc<Mutex<MockNode>>>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, address: &str, node: MockNode) -> Self {
        self.nodes
            .insert(address.to_string(), Arc::new(Mutex::new(node)));
        self
    }

    pub fn node(&self, address: &str) -> Arc<Mutex<MockNode>> {
        self.nodes[address].clone()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.opened() - self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdminConnector for MockConnector {
    type Session = MockSession;

    async fn connect(&self, candidate: &Candidate, _timeout: Duration) -> Result<MockSession> {
        let node = self
            .nodes
            .get(&candidate.address)
            .cloned()
            .ok_or_else(|| {
                ReplSetError::network(format!("{}: connection refused", candidate.address))
            })?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MockSession {
            address: candidate.address.clone(),
            node,
            closed: self.closed.clone(),
        })
    }
}

pub(crate) struct MockSession {
    address: String,
    node: Arc<Mutex<MockNode>>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl AdminSession for MockSession {
    fn address(&self) -> &str {
        &self.address
    }

    async fn execute(&mut self, command: AdminCommand) -> Result<AdminReply> {
        let delay = self.node.lock().unwrap().delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.node.lock().unwrap().handle(command)
    }

    async fn close(self) -> Result<()> {
        Ok(())
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
