//! Server side of the TCP admin protocol.
//!
//! [`AdminEndpoint`] accepts connections and hands decoded commands to an
//! [`AdminHandler`]. Test harnesses and node-side agents implement the
//! handler; the endpoint owns framing and the login handshake.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use replset_core::{codes, AdminCommand, AdminReply, CommandFailure, ReplSetError, Result, Secret};

use crate::tcp::{
    read_message, write_message, AdminRequest, AdminResponse, TcpAdminConfig, WireResult,
};

/// Executes admin commands on behalf of a node.
#[async_trait]
pub trait AdminHandler: Send + Sync + 'static {
    /// Checks the login presented as the first frame of a connection.
    async fn authenticate(
        &self,
        username: &str,
        password: &Secret,
        source: &str,
    ) -> std::result::Result<(), CommandFailure>;

    async fn handle(
        &self,
        command: AdminCommand,
    ) -> std::result::Result<AdminReply, CommandFailure>;
}

/// A listening admin endpoint. The accept loop and its connections stop on
/// [`AdminEndpoint::shutdown`] or when the endpoint is dropped.
pub struct AdminEndpoint {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
}

impl AdminEndpoint {
    pub async fn bind<H: AdminHandler>(addr: &str, handler: Arc<H>) -> Result<Self> {
        Self::bind_with_config(addr, handler, TcpAdminConfig::default()).await
    }

    pub async fn bind_with_config<H: AdminHandler>(
        addr: &str,
        handler: Arc<H>,
        config: TcpAdminConfig,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ReplSetError::network(format!("Failed to bind to {}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!("Admin endpoint listening on {}", local_addr);

        tokio::spawn(Self::accept_connections(listener, handler, config, shutdown_rx));

        Ok(Self {
            local_addr,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and closes open connections.
    pub fn shutdown(&self) {
        info!("Shutting down admin endpoint on {}", self.local_addr);
        let _ = self.shutdown_tx.send(true);
    }

    async fn accept_connections<H: AdminHandler>(
        listener: TcpListener,
        handler: Arc<H>,
        config: TcpAdminConfig,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("Accepted admin connection from {}", addr);

                        let handler = handler.clone();
                        let config = config.clone();
                        let shutdown_rx = shutdown_rx.clone();

                        tokio::spawn(async move {
                            if let Err(e) =
                                Self::handle_connection(stream, handler, config, shutdown_rx).await
                            {
                                warn!("Admin connection from {} ended with error: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }
    }

    async fn handle_connection<H: AdminHandler>(
        mut stream: TcpStream,
        handler: Arc<H>,
        config: TcpAdminConfig,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<()> {
        let login: AdminRequest = tokio::select! {
            _ = shutdown_rx.changed() => return Ok(()),
            read = timeout(
                config.login_timeout,
                read_message(&mut stream, config.max_frame_size),
            ) => match read {
                Ok(login) => login?,
                Err(_) => {
                    return Err(ReplSetError::timeout(format!(
                        "login within {:?}",
                        config.login_timeout
                    )))
                }
            },
        };
        let result = Self::login(handler.as_ref(), &login.command).await;
        let authenticated = result.is_ok();
        Self::respond(&mut stream, login, result, &config).await?;
        if !authenticated {
            return Ok(());
        }

        loop {
            let request: AdminRequest = tokio::select! {
                _ = shutdown_rx.changed() => return Ok(()),
                read = read_message(&mut stream, config.max_frame_size) => match read {
                    Ok(request) => request,
                    // Peer closed the session
                    Err(ReplSetError::Network { .. }) => return Ok(()),
                    Err(e) => return Err(e),
                },
            };

            // A failed re-login ends the connection like a failed first login.
            let (result, keep_open) = match &request.command {
                AdminCommand::Authenticate { .. } => {
                    let result = Self::login(handler.as_ref(), &request.command).await;
                    let ok = result.is_ok();
                    (result, ok)
                }
                command => (handler.handle(command.clone()).await, true),
            };
            Self::respond(&mut stream, request, result, &config).await?;
            if !keep_open {
                return Ok(());
            }
        }
    }

    async fn login<H: AdminHandler>(
        handler: &H,
        command: &AdminCommand,
    ) -> std::result::Result<AdminReply, CommandFailure> {
        match command {
            AdminCommand::Authenticate {
                username,
                password,
                source,
            } => handler
                .authenticate(username, password, source)
                .await
                .map(|_| AdminReply::Ok),
            other => Err(CommandFailure::new(
                codes::UNAUTHORIZED,
                "Unauthorized",
                format!("command {} requires authentication", other.name()),
            )),
        }
    }

    async fn respond(
        stream: &mut TcpStream,
        request: AdminRequest,
        result: std::result::Result<AdminReply, CommandFailure>,
        config: &TcpAdminConfig,
    ) -> Result<()> {
        let response = AdminResponse {
            request_id: request.request_id,
            result: match result {
                Ok(reply) => WireResult::Ok(reply),
                Err(failure) => WireResult::Err(failure),
            },
        };
        write_message(stream, &response, config.max_frame_size).await
    }
}

impl Drop for AdminEndpoint {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}
