//! # Match Orchestrator
//!
//! A modular Rust crate for orchestrating one multiplayer match between remotely provisioned, untrusted player programs.
//!
//! It provides:
//! - Match assignment and code download from a remote authority ([`MatchSource`](crate::match_source::MatchSource))
//! - Concurrent provisioning of player code into isolated scratch directories ([`CodeProvisioner`](crate::provisioner::CodeProvisioner))
//! - One child process per player, with deterministic liveness polling ([`ProcessSupervisor`](crate::supervisor::ProcessSupervisor))
//! - A framed Unix-socket channel with broadcast/gather round synchronization ([`PlayerChannel`](crate::channel::PlayerChannel))
//! - The match lifecycle tying it all together ([`MatchOrchestrator`](crate::orchestrator::MatchOrchestrator))
//!
//! The game rules themselves stay outside this crate: game states and
//! decisions are opaque JSON values that are moved, never interpreted. Your
//! rules engine decides what they mean and when the match is over.
//!
//! # Documentation Overview
//!
//! - For the match lifecycle and its failure semantics, see the [`orchestrator`] module.
//! - For configuring retry, socket path, worker pool width and round deadlines, see [`Configuration`](crate::configuration::Configuration).
//! - For the wire protocol spoken with player processes, see the [`framing`] module.
//! - For what a player process must do, see below.
//!
//! # Usage Example
//!
//! Driving a match from a rules engine:
//!
//! ```no_run
//! use match_orchestrator::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), MatchError> {
//!     let config = Configuration::from_env("matchmaking.example.org").with_server_port(8000);
//!     let mut orchestrator = MatchOrchestrator::new(config);
//!
//!     orchestrator.init_game().await?;
//!
//!     let mut history = Vec::new();
//!     let mut round = 0;
//!     let winners = loop {
//!         round += 1;
//!         let state = json!({ "round": round });
//!         let decisions = orchestrator.request_decisions(&state).await?;
//!         history.push(json!({ "state": state, "decisions": decisions }));
//!
//!         // your rules engine decides when the match is over
//!         if round == 10 {
//!             break vec![];
//!         }
//!     };
//!
//!     orchestrator.report_outcome(winners, history).await
//! }
//! ```
//!
//! # Player Contract
//!
//! Each player process is spawned with its bundle directory as working
//! directory and two environment variables: `player_id` (its assigned
//! identifier) and `game_socket` (the path of the match's Unix socket). The
//! launcher script execs the bundle's `run.sh`. The player must:
//!
//! 1. connect to the Unix socket at `game_socket`,
//! 2. send one identification frame `{"player_id": <id>}`,
//! 3. answer every `{"game_state": …}` frame with exactly one decision
//!    frame before the next round arrives.
//!
//! Frames are `uint32` big-endian payload length followed by that many
//! bytes of UTF-8 JSON; the length counts the payload only.
//!
//! ## A Minimal Player
//!
//! ```no_run
//! use std::env;
//! use std::io::{Read, Write};
//! use std::os::unix::net::UnixStream;
//!
//! fn send(stream: &mut UnixStream, payload: &str) -> std::io::Result<()> {
//!     stream.write_all(&(payload.len() as u32).to_be_bytes())?;
//!     stream.write_all(payload.as_bytes())
//! }
//!
//! fn recv(stream: &mut UnixStream) -> std::io::Result<String> {
//!     let mut prefix = [0u8; 4];
//!     stream.read_exact(&mut prefix)?;
//!     let mut payload = vec![0u8; u32::from_be_bytes(prefix) as usize];
//!     stream.read_exact(&mut payload)?;
//!     Ok(String::from_utf8(payload).expect("payload is UTF-8 JSON"))
//! }
//!
//! fn main() -> std::io::Result<()> {
//!     let player_id = env::var("player_id").expect("set by the supervisor");
//!     let socket = env::var("game_socket").expect("set by the supervisor");
//!
//!     let mut stream = UnixStream::connect(socket)?;
//!     send(&mut stream, &format!("{{\"player_id\": {player_id}}}"))?;
//!
//!     loop {
//!         let _game_state = recv(&mut stream)?;
//!         send(&mut stream, "{\"decision\": true}")?;
//!     }
//! }
//! ```
#![warn(missing_docs)]

pub use anyhow;

pub mod channel;
pub mod configuration;
pub mod error;
pub mod framing;
mod logger;
pub mod match_source;
pub mod orchestrator;
pub mod provisioner;
pub mod supervisor;
#[cfg(test)]
mod test_support;

/// Identifier of one player within a match, assigned by the authority.
pub type PlayerId = u32;

/// Commonly used types for quick access.
///
/// Import this prelude to get started easily:
/// ```rust
/// use match_orchestrator::prelude::*;
/// ```
///
/// Includes:
/// - [`Configuration`](crate::configuration::Configuration)
/// - [`MatchError`](crate::error::MatchError)
/// - [`MatchOrchestrator`](crate::orchestrator::MatchOrchestrator)
/// - [`PlayerId`]
pub mod prelude {
    pub use crate::configuration::Configuration;
    pub use crate::error::MatchError;
    pub use crate::orchestrator::MatchOrchestrator;
    pub use crate::PlayerId;
}
