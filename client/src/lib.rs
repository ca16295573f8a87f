//! # Lockstep Client Library
//!
//! The replaying side of the lockstep protocol. The client restores the
//! server's snapshot when it joins, then applies every tick the server
//! streams, strictly in order, spreading each tick's work across several
//! rendered frames. After each tick it reports a checksum so the server can
//! spot divergence, and on a fixed cadence it sends its current input.
//!
//! ## Catching Up
//!
//! The client never waits for the server to tell it the time. It measures
//! how long it has been connected, converts that into the number of
//! sub-steps it should have performed, and performs the difference, capped
//! per frame so a long stall is absorbed over several frames instead of one.
//!
//! ## Failure Handling
//!
//! A missing, duplicated or wildly out-of-order tick, or a payload the world
//! refuses, ends the session. The client says goodbye, throws its replica
//! away and joins again from a fresh snapshot. Desync reports from the
//! server are only recorded; they never end the session.
//!
//! ## Module Organization
//!
//! - `reconciler`: elapsed time to sub-steps, in-order tick application
//! - `heartbeat`: input aggregation and the fixed-rate input send
//! - `diagnostics`: latency estimate, lag warnings, last desync tick
//! - `session`: handshake, per-frame work and resynchronization
//! - `network`: sockets, I/O tasks and the frame loop
//! - `input`: scripted player used by the headless binary
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::input::ScriptedInput;
//! use client::network::Client;
//! use shared::demo::DemoWorld;
//! use shared::LockstepConfig;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let mut client = Client::<DemoWorld, _>::new(
//!         "127.0.0.1:8080",
//!         ScriptedInput::new(7),
//!         LockstepConfig::default(),
//!         Duration::from_millis(16),
//!     )
//!     .await?;
//!
//!     client.run().await?;
//!     Ok(())
//! }
//! ```

pub mod diagnostics;
pub mod heartbeat;
pub mod input;
pub mod network;
pub mod reconciler;
pub mod session;
