//! Error taxonomy of the orchestrator.
//!
//! Everything here is fatal to the match: there is no partial-roster play
//! and no automatic retry beyond the bounded match-fetch retry in
//! [`MatchSource`](crate::match_source::MatchSource).

use crate::framing::FrameError;
use crate::PlayerId;

/// Failures surfaced by the match lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    /// The match authority stayed unreachable (or kept returning non-success
    /// statuses) for the whole retry budget.
    #[error("unable to reach match authority at {address} after {attempts} attempts")]
    UnreachableServer {
        /// Base address of the authority.
        address: String,
        /// Attempt budget that was exhausted.
        attempts: u32,
    },

    /// The authority answered, but not with a well-formed match assignment.
    #[error("malformed match assignment: {0}")]
    Protocol(String),

    /// One player's code archive could not be fetched or extracted.
    /// Aggregated by provisioning into a whole-match failure.
    #[error("could not provision code for player {player_id}")]
    CodeFetch {
        /// Player whose bundle failed.
        player_id: PlayerId,
        /// Underlying fetch/extract failure.
        #[source]
        source: anyhow::Error,
    },

    /// A player process could not be spawned.
    #[error("could not launch player {player_id}")]
    Launch {
        /// Player whose process failed to start.
        player_id: PlayerId,
        /// Underlying spawn failure.
        #[source]
        source: anyhow::Error,
    },

    /// One or more player processes exited; detected by a liveness poll at
    /// launch or before a round. No restart policy exists.
    #[error("player process(es) died: {0:?}")]
    PlayerProcessDied(Vec<PlayerId>),

    /// The channel socket could not be set up.
    #[error("could not bind player channel at {path}")]
    Bind {
        /// Socket path that failed to bind.
        path: String,
        /// Underlying bind/unlink failure.
        #[source]
        source: std::io::Error,
    },

    /// A frame to or from one peer was malformed or truncated. The peer's
    /// connection is marked failed; the enclosing broadcast/gather fails.
    #[error("frame error on connection to player {player_id}")]
    Frame {
        /// Peer whose connection failed.
        player_id: PlayerId,
        /// The framing failure.
        #[source]
        source: FrameError,
    },

    /// A decision round exceeded the configured deadline. Only possible when
    /// a round timeout was explicitly configured.
    #[error("decision round did not complete within {0:?}")]
    RoundTimeout(std::time::Duration),

    /// Posting the match outcome failed. Logged and surfaced, never retried.
    #[error("could not report match outcome")]
    Report(#[source] anyhow::Error),

    /// An operation was called in the wrong lifecycle phase.
    #[error("invalid operation: {0}")]
    State(&'static str),
}
