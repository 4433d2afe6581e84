//! # Sample Strategy
//!
//! A minimal external strategy for the local runner. It speaks both runner
//! protocols:
//!
//! - **process**: launched by the runner, reads messages on stdin and answers
//!   on stdout
//! - **tcp**: connects to a `tcpclient` port, identifies itself with a
//!   `{"solution_id": ...}` line, then plays the same line protocol
//!
//! Every `tick` message is answered with exactly one
//! `{"command": "<direction>"}` line.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! Board geometry and the [`game::Pilot`] that keeps the player on the board.
//!
//! ### Network Module (`network`)
//! The message loop over any buffered reader and writer.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let ticks = strategy::network::play_tcp("127.0.0.1:8000", "sample").await?;
//!     println!("played {} ticks", ticks);
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod network;
