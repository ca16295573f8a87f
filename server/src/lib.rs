//! # Lockstep Server Library
//!
//! The authoritative side of the lockstep protocol. The server advances the
//! simulation at a fixed rate, numbers every tick, and streams each tick's
//! update to every connected client. Clients replay the stream and report a
//! checksum back, which the server compares against its own history.
//!
//! ## Architecture
//!
//! ### Single Simulation Context
//! All protocol state lives in one place: the registry of peers, the
//! sequencer, the tick deadline, the world and the checksum history are owned
//! by [`host::LockstepHost`], and only the main loop in [`network::Server`]
//! calls into it. Network tasks communicate with that loop through transport
//! queues and nothing else.
//!
//! ### UDP Transport
//! Each datagram carries one bincode-encoded envelope. A receive task stamps
//! every envelope with its sender address and pushes it into the inbox; a
//! send task drains the outbox. Letters produced during a pass are staged in
//! the host and only reach the outbox when the pass ends, so a peer released
//! mid-pass never receives them.
//!
//! ## Module Organization
//!
//! - `client_manager`: peer registry with acknowledgement and timeout
//!   tracking
//! - `scheduler`: fixed-rate tick emission and the server's checksum history
//! - `host`: reaction to inbound letters and per-pass updates
//! - `network`: sockets, I/O tasks and the main loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use shared::demo::DemoAuthority;
//! use shared::LockstepConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = LockstepConfig::default();
//!     let world = DemoAuthority::new(42, config.sub_steps_per_tick);
//!
//!     let mut server = Server::new("127.0.0.1:8080", world, config, 32).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod host;
pub mod network;
pub mod scheduler;
