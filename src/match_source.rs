//! HTTP client for the remote match authority.
//!
//! The authority is consumed, not re-specified:
//! - `GET /request_match/` → `{"players": [ids], "game_id": id}`
//! - `GET /code_list/{id}/download/` → tar archive bytes
//! - `POST /matches/{game_id}/report_match/` ← outcome report
//!
//! All requests are blocking; callers running inside the tokio runtime must
//! go through `tokio::task::spawn_blocking` (the orchestrator does). The
//! HTTP client is created per call, on the thread making the request:
//! `reqwest::blocking::Client` must neither be built nor dropped inside an
//! async runtime, so a `MatchSource` holds none and stays safe to construct,
//! hold and drop anywhere.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::configuration::Configuration;
use crate::error::MatchError;
use crate::PlayerId;

/// A match assignment as returned by the authority.
///
/// Immutable once fetched; the player list order is preserved as-is.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchAssignment {
    /// Ordered roster of player identifiers. Duplicate-free.
    pub players: Vec<PlayerId>,
    /// Opaque identifier of this match on the authority.
    pub game_id: u64,
}

/// Blocking client for the match authority.
#[derive(Debug)]
pub struct MatchSource {
    base_url: String,
    fetch_attempts: u32,
    fetch_retry_interval: Duration,
}

impl MatchSource {
    /// Address the authority named in `config`. No connection is made and no
    /// HTTP client exists until a request method runs.
    pub fn new(config: &Configuration) -> MatchSource {
        // todo: deal with http/https later
        let base_url = format!("http://{}:{}", config.server_address, config.server_port);
        MatchSource {
            base_url,
            fetch_attempts: config.fetch_attempts,
            fetch_retry_interval: config.fetch_retry_interval,
        }
    }

    /// Fetch the match assignment, retrying on transport errors and
    /// non-success statuses up to the attempt budget.
    ///
    /// # Errors
    /// [`MatchError::UnreachableServer`] once the budget is exhausted,
    /// [`MatchError::Protocol`] when the body is not a valid assignment.
    pub fn fetch_match(&self) -> Result<MatchAssignment, MatchError> {
        let client = reqwest::blocking::Client::new();
        let url = format!("{}/request_match/", self.base_url);
        for attempt in 1..=self.fetch_attempts {
            match client.get(&url).send() {
                Ok(response) if response.status().is_success() => {
                    let assignment = response
                        .json::<MatchAssignment>()
                        .map_err(|e| MatchError::Protocol(e.to_string()))?;
                    Self::check_roster(&assignment)?;
                    info!(
                        game_id = assignment.game_id,
                        players = ?assignment.players,
                        "match assignment received"
                    );
                    return Ok(assignment);
                }
                Ok(response) => {
                    warn!(
                        status = %response.status(),
                        attempt,
                        "match request not successful"
                    );
                }
                Err(e) => {
                    warn!(attempt, "match authority unreachable: {e}");
                }
            }
            if attempt < self.fetch_attempts {
                std::thread::sleep(self.fetch_retry_interval);
            }
        }
        Err(MatchError::UnreachableServer {
            address: self.base_url.clone(),
            attempts: self.fetch_attempts,
        })
    }

    fn check_roster(assignment: &MatchAssignment) -> Result<(), MatchError> {
        if assignment.players.is_empty() {
            return Err(MatchError::Protocol("empty player list".to_owned()));
        }
        let unique = assignment.players.iter().collect::<HashSet<_>>();
        if unique.len() != assignment.players.len() {
            return Err(MatchError::Protocol(format!(
                "duplicate player ids in {:?}",
                assignment.players
            )));
        }
        Ok(())
    }

    /// Download one player's code archive. A single blocking request; retry,
    /// if any, is the caller's concern.
    pub fn fetch_code_archive(&self, player_id: PlayerId) -> Result<Vec<u8>, MatchError> {
        let url = format!("{}/code_list/{player_id}/download/", self.base_url);
        let fetch = || -> anyhow::Result<Vec<u8>> {
            let response = reqwest::blocking::Client::new()
                .get(&url)
                .send()
                .context("archive request failed")?
                .error_for_status()
                .context("archive request refused")?;
            Ok(response.bytes().context("archive body unreadable")?.to_vec())
        };
        fetch().map_err(|source| MatchError::CodeFetch { player_id, source })
    }

    /// Post the match outcome. Not retried; a refusal is surfaced as
    /// [`MatchError::Report`].
    pub fn report_match(
        &self,
        game_id: u64,
        winners: &[PlayerId],
        match_history: &[Value],
    ) -> Result<(), MatchError> {
        let url = format!("{}/matches/{game_id}/report_match/", self.base_url);
        let body = json!({
            "outcome": "ok",
            "winners": winners,
            "match_history": match_history,
        });
        let post = || -> anyhow::Result<()> {
            reqwest::blocking::Client::new()
                .post(&url)
                .json(&body)
                .send()
                .context("report request failed")?
                .error_for_status()
                .context("report request refused")?;
            Ok(())
        };
        post().map_err(MatchError::Report)
    }
}
