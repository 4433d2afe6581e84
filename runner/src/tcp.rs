//! Remote strategy connected over a TCP stream.

use crate::client::{ClientFault, Observation};
use crate::config::ExecutionLimits;
use crate::exchange::LineExchange;
use log::info;
use shared::{Hello, Intent, Message};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;

pub struct TcpClient {
    peer: SocketAddr,
    solution_id: Option<String>,
    exchange: LineExchange<OwnedWriteHalf>,
}

impl TcpClient {
    pub fn new(stream: TcpStream, peer: SocketAddr, limits: ExecutionLimits) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            peer,
            solution_id: None,
            exchange: LineExchange::new(format!("tcp client {}", peer), reader, writer, limits),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Reads the hello line carrying the strategy's solution id
    pub async fn set_solution_id(&mut self, limit: Duration) -> Result<&str, ClientFault> {
        let hello: Hello = self.exchange.read_handshake(limit).await?;
        if hello.solution_id.trim().is_empty() {
            return Err(ClientFault::Malformed("empty solution_id".to_string()));
        }

        info!("Client {} identified as '{}'", self.peer, hello.solution_id);
        Ok(self.solution_id.insert(hello.solution_id).as_str())
    }

    pub fn identity(&self) -> &str {
        self.solution_id.as_deref().unwrap_or("unidentified")
    }

    pub fn is_faulted(&self) -> bool {
        self.exchange.is_faulted()
    }

    pub fn execution_time(&self) -> Duration {
        self.exchange.execution_time()
    }

    /// Clears per-match accounting before the client plays another match
    pub fn reset_match(&mut self) {
        self.exchange.reset_match();
    }

    pub async fn notify(&mut self, message: &Message) {
        self.exchange.notify(message).await;
    }

    pub async fn send_observation(&mut self, observation: &Observation) {
        self.exchange.request(&observation.to_message()).await;
    }

    pub async fn get_command(&mut self) -> Result<Intent, ClientFault> {
        self.exchange.receive_command().await
    }
}
