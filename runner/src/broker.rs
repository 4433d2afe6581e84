//! Connection broker: one inbound TCP strategy per configured port.
//!
//! Waiting is bounded twice: the accept window (`wait_timeout`, counted from
//! the moment the port is bound) and the hello exchange that follows
//! (`handshake_timeout`). Missing either leaves the slot unfilled; the match
//! goes on without it.

use crate::config::{ExecutionLimits, RunnerConfig};
use crate::error::RunnerError;
use crate::tcp::TcpClient;
use log::{info, warn};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout_at, Instant};

#[derive(Debug, Clone)]
pub struct ConnectionBroker {
    host: String,
    wait_timeout: Duration,
    handshake_timeout: Duration,
    limits: ExecutionLimits,
}

impl ConnectionBroker {
    pub fn new(
        host: impl Into<String>,
        wait_timeout: Duration,
        handshake_timeout: Duration,
        limits: ExecutionLimits,
    ) -> Self {
        Self {
            host: host.into(),
            wait_timeout,
            handshake_timeout,
            limits,
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        Self::new(
            config.host.clone(),
            config.wait_timeout,
            config.handshake_timeout,
            config.execution_limits(),
        )
    }

    /// Binds the port and starts the waiting window
    pub async fn open(&self, port: u16) -> Result<PendingConnection, RunnerError> {
        let addr = format!("{}:{}", self.host, port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| RunnerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        info!(
            "Waiting up to {:?} for a client on {}",
            self.wait_timeout, local_addr
        );

        Ok(PendingConnection {
            local_addr,
            listener,
            deadline: Instant::now() + self.wait_timeout,
            handshake_timeout: self.handshake_timeout,
            limits: self.limits,
        })
    }

    /// Waits for one identified client on `port`; `None` when the slot stays unfilled
    pub async fn wait_client(&self, port: u16) -> Result<Option<TcpClient>, RunnerError> {
        Ok(self.open(port).await?.resolve().await)
    }
}

/// A bound port waiting for its single client
#[derive(Debug)]
pub struct PendingConnection {
    local_addr: SocketAddr,
    listener: TcpListener,
    deadline: Instant,
    handshake_timeout: Duration,
    limits: ExecutionLimits,
}

impl PendingConnection {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Accepts the first connection before the deadline and runs the handshake.
    ///
    /// The listener is closed as soon as a connection is accepted or the
    /// window expires, so later connection attempts are refused.
    pub async fn resolve(self) -> Option<TcpClient> {
        let PendingConnection {
            local_addr,
            listener,
            deadline,
            handshake_timeout,
            limits,
        } = self;

        let accepted = loop {
            match timeout_at(deadline, listener.accept()).await {
                Ok(Ok(accepted)) => break Some(accepted),
                Ok(Err(e)) => {
                    warn!("Accept failed on {}: {}", local_addr, e);
                    sleep(Duration::from_millis(10)).await;
                }
                Err(_) => break None,
            }
        };
        drop(listener);

        let Some((stream, peer)) = accepted else {
            warn!("No client connected on {} in time", local_addr);
            return None;
        };

        info!("Client connected on {} from {}", local_addr, peer);
        let mut client = TcpClient::new(stream, peer, limits);
        match client.set_solution_id(handshake_timeout).await {
            Ok(_) => Some(client),
            Err(fault) => {
                warn!("Handshake with {} failed: {}", peer, fault);
                None
            }
        }
    }
}
