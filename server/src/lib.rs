//! # Chat Server Library
//!
//! This library provides the server side of a line-based TCP chat service.
//! It authenticates clients, tracks who is connected, routes public and
//! private messages, and lets an operator moderate the room and stream a
//! text animation rendered from text or image frames to every client.
//!
//! ## Core Responsibilities
//!
//! ### Authentication
//! Every connection starts with a short login/register exchange. Accounts
//! live behind the `AuthStore` trait, either in memory or in a bincode file.
//! Registration always closes the connection; a successful login admits the
//! client into the chat.
//!
//! ### Session Tracking
//! Connected clients are kept in a concurrent registry keyed by pseudo.
//! Insertion is atomic insert-if-absent, so two logins racing for the same
//! pseudo produce exactly one session.
//!
//! ### Message Routing
//! Each session runs one router which applies the flood gate, answers `help`,
//! delivers whispers to a single target and fans public messages out to
//! everyone, sender included.
//!
//! ## Architecture Design
//!
//! ### Task Per Connection
//! The accept loop spawns one task per connection. After login that task
//! splits into a reader (the router) and a writer draining the session's
//! bounded outbound queue. Broadcasts only ever enqueue, so a slow client
//! cannot stall the others.
//!
//! ### Cancellation
//! Shutdown, kicks and animation stops are all `CancellationToken`s checked
//! at every await point that could otherwise block.
//!
//! ## Module Organization
//!
//! - `auth`: credential stores and the operator gate
//! - `config`: runtime settings
//! - `error`: error taxonomy and the peer-facing rejection lines
//! - `handshake`: login/register negotiation
//! - `registry`: live sessions and the `FanOut` broadcast seam
//! - `router`: per-session chat loop
//! - `animation`: frame sources and the frame broadcaster
//! - `console`: operator commands
//! - `codec`: lossy inbound line decoding
//! - `network`: listener, connection tasks and line I/O
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::auth::MemoryAuthStore;
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default(), Arc::new(MemoryAuthStore::new())).await?;
//!
//!     // Operator commands from the terminal
//!     let mut console = server.console();
//!     tokio::spawn(async move {
//!         let stdin = tokio::io::BufReader::new(tokio::io::stdin());
//!         let _ = console.run(stdin, tokio::io::stdout()).await;
//!     });
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod animation;
pub mod auth;
pub mod codec;
pub mod config;
pub mod console;
pub mod error;
pub mod handshake;
pub mod network;
pub mod registry;
pub mod router;
