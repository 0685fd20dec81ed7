//! # Chat Client Library
//!
//! Terminal client for the chat server. It relays lines between the user's
//! terminal and a single TCP connection, first through the login/register
//! handshake and then through the chat itself.
//!
//! ## Handshake
//!
//! The server drives the exchange with two prompts. The client answers the
//! mode prompt with the normalised token typed by the user and the
//! credentials prompt with the raw `pseudo::password` line. A login that
//! succeeds gets no reply, so the first line that comes back decides: `[OK]`
//! or `[ERROR]` ends the run, anything else is already chat traffic.
//!
//! ## Chat
//!
//! Server lines are printed as they arrive, including the clear-screen
//! prefixed animation frames. Typed lines are sent as-is; `exit` is sent and
//! then the connection is closed.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//! use tokio::io::BufReader;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::connect("127.0.0.1:5000").await?;
//!     let end = client
//!         .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
//!         .await?;
//!     println!("Session ended: {:?}", end);
//!     Ok(())
//! }
//! ```

pub mod network;
