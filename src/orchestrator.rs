//! Match lifecycle: init → round loop → report.
//!
//! [`MatchOrchestrator`] composes the match source, the provisioner, the
//! process supervisor and the player channel into one match instance, and
//! is the only type exposed to the game-rules engine. All state lives in
//! the orchestrator value itself, so several matches can run in one
//! process (each with its own socket path).
//!
//! Failure policy: provisioning failures, launch failures, and any player
//! death are fatal to the whole match. No partial-roster play, no restarts.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, instrument, trace};

use crate::channel::PlayerChannel;
use crate::configuration::Configuration;
use crate::error::MatchError;
use crate::logger::init_logger;
use crate::match_source::{MatchAssignment, MatchSource};
use crate::provisioner::{CodeBundle, CodeProvisioner};
use crate::supervisor::ProcessSupervisor;
use crate::PlayerId;

/// Lifecycle phase of one match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    MatchFetched,
    Provisioned,
    Launched,
    Ready,
}

/// Orchestrates one multiplayer match from assignment to outcome report.
///
/// Lifecycle: [`init_game`](Self::init_game) →
/// [`request_decisions`](Self::request_decisions) per round (which lazily
/// launches and connects the players on the first call) →
/// [`report_outcome`](Self::report_outcome).
#[derive(Debug)]
pub struct MatchOrchestrator {
    config: Configuration,
    source: Arc<MatchSource>,
    phase: Phase,
    assignment: Option<MatchAssignment>,
    bundles: HashMap<PlayerId, CodeBundle>,
    supervisor: ProcessSupervisor,
    channel: Option<PlayerChannel>,
}

impl MatchOrchestrator {
    /// Create an orchestrator with the given [`Configuration`].
    #[instrument(skip_all)]
    pub fn new(config: Configuration) -> MatchOrchestrator {
        if config.log {
            init_logger();
        }
        trace!(?config);

        let source = Arc::new(MatchSource::new(&config));
        let supervisor = ProcessSupervisor::new(config.debug_player_stderr);
        MatchOrchestrator {
            config,
            source,
            phase: Phase::Created,
            assignment: None,
            bundles: HashMap::new(),
            supervisor,
            channel: None,
        }
    }

    /// The match assignment, once fetched.
    pub fn assignment(&self) -> Option<&MatchAssignment> {
        self.assignment.as_ref()
    }

    /// Fetch the match assignment and provision every player's code bundle.
    ///
    /// # Errors
    /// Fatal on an unreachable authority, a malformed assignment, or any
    /// player's fetch/extract failure (no partial match may proceed).
    pub async fn init_game(&mut self) -> Result<(), MatchError> {
        if self.phase != Phase::Created {
            return Err(MatchError::State(
                "init_game is only valid on a fresh orchestrator",
            ));
        }

        let source = self.source.clone();
        let assignment = tokio::task::spawn_blocking(move || source.fetch_match())
            .await
            .expect("match fetch task panicked")?;
        self.phase = Phase::MatchFetched;

        let provisioner = CodeProvisioner::new(self.source.clone(), self.config.provision_workers);
        self.bundles = provisioner.provision_all(&assignment.players).await?;
        self.assignment = Some(assignment);
        self.phase = Phase::Provisioned;
        Ok(())
    }

    /// Start the player channel, launch every player process, and block
    /// until all of them have connected and identified themselves.
    ///
    /// Called lazily by [`request_decisions`](Self::request_decisions); only
    /// call it directly to control when the players come up.
    ///
    /// # Errors
    /// Fatal if the socket cannot be bound, a spawn fails, or any player is
    /// already dead at the liveness poll after launch. The connect wait
    /// itself has no deadline.
    pub async fn init_players(&mut self) -> Result<(), MatchError> {
        if self.phase != Phase::Provisioned {
            return Err(MatchError::State("init_players requires a provisioned match"));
        }

        // the channel must be up before any player tries to connect
        let channel = PlayerChannel::start(
            self.config.socket_path.clone(),
            self.config.connect_poll_interval,
        )?;

        let roster = self
            .assignment
            .as_ref()
            .expect("assignment exists once provisioned")
            .players
            .clone();
        for player_id in &roster {
            let bundle = self
                .bundles
                .remove(player_id)
                .expect("a bundle exists for every assigned player");
            self.supervisor.launch(bundle, &self.config.socket_path)?;
        }
        self.phase = Phase::Launched;

        // let startup crashes actually exit before the first liveness poll
        tokio::time::sleep(self.config.launch_grace).await;
        let dead = self.supervisor.poll_dead();
        if !dead.is_empty() {
            return Err(MatchError::PlayerProcessDied(dead));
        }

        channel.wait_until_connected(roster.len()).await;
        info!("all {} players connected", roster.len());
        self.channel = Some(channel);
        self.phase = Phase::Ready;
        Ok(())
    }

    /// Run one decision round: broadcast `game_state` to every player, then
    /// gather one decision per player.
    ///
    /// Lazily runs [`init_players`](Self::init_players) on the first call.
    /// The round has no deadline unless
    /// [`with_round_timeout`](Configuration::with_round_timeout) was set.
    ///
    /// # Errors
    /// Fatal if any player died since the last check, on any frame error,
    /// and on the configured round deadline.
    pub async fn request_decisions(
        &mut self,
        game_state: &Value,
    ) -> Result<HashMap<PlayerId, Value>, MatchError> {
        match self.phase {
            Phase::Ready => {}
            Phase::Provisioned => self.init_players().await?,
            Phase::Created | Phase::MatchFetched => {
                return Err(MatchError::State(
                    "request_decisions requires a provisioned match (run init_game)",
                ))
            }
            Phase::Launched => {
                return Err(MatchError::State(
                    "request_decisions after a failed player startup",
                ))
            }
        }

        let dead = self.supervisor.poll_dead();
        if !dead.is_empty() {
            return Err(MatchError::PlayerProcessDied(dead));
        }

        let channel = self.channel.as_ref().expect("channel exists once ready");
        let round = async {
            channel.broadcast_game_state(game_state).await?;
            channel.gather_decisions().await
        };
        match self.config.round_timeout {
            None => round.await,
            Some(deadline) => tokio::time::timeout(deadline, round)
                .await
                .map_err(|_| MatchError::RoundTimeout(deadline))?,
        }
    }

    /// Post the match outcome to the authority and tear the match down:
    /// all player processes are killed, bundles removed, and the socket
    /// unlinked. This is the single normal end of a match.
    ///
    /// # Errors
    /// [`MatchError::Report`] when the post fails; teardown happens anyway.
    pub async fn report_outcome(
        mut self,
        winners: Vec<PlayerId>,
        match_history: Vec<Value>,
    ) -> Result<(), MatchError> {
        let Some(assignment) = self.assignment.take() else {
            return Err(MatchError::State("report_outcome requires a fetched match"));
        };

        let source = self.source.clone();
        let result = tokio::task::spawn_blocking(move || {
            source.report_match(assignment.game_id, &winners, &match_history)
        })
        .await
        .expect("report task panicked");

        match &result {
            Ok(()) => info!("match outcome reported"),
            Err(e) => error!("match outcome could not be reported: {e}"),
        }

        // kill_all reaps with bounded sleeps; keep that off the runtime
        // workers (the supervisor drops on the blocking thread, bundles
        // with it)
        let supervisor = std::mem::take(&mut self.supervisor);
        tokio::task::spawn_blocking(move || drop(supervisor))
            .await
            .expect("teardown task panicked");
        // the channel is torn down when `self` drops here
        result
    }
}

#[cfg(test)]
mod orchestrator_tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::test_support::StubAuthority;

    fn config() -> Configuration {
        Configuration::new("127.0.0.1").with_server_port(1)
    }

    #[tokio::test]
    async fn request_decisions_requires_init_game() {
        let mut orchestrator = MatchOrchestrator::new(config());
        let err = orchestrator
            .request_decisions(&json!({"round": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::State(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn init_players_requires_a_provisioned_match() {
        let mut orchestrator = MatchOrchestrator::new(config());
        let err = orchestrator.init_players().await.unwrap_err();
        assert!(matches!(err, MatchError::State(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn state_errors_name_the_actual_phase() {
        // assignment succeeds, the code archive does not: the orchestrator
        // is left between fetched and provisioned
        let stub = StubAuthority::serving(vec![
            StubAuthority::json_response(200, r#"{"players": [1], "game_id": 4}"#),
            StubAuthority::json_response(404, "{}"),
        ]);
        let config = Configuration::new("127.0.0.1")
            .with_server_port(stub.port())
            .with_fetch_retry_interval(Duration::from_millis(10));
        let mut orchestrator = MatchOrchestrator::new(config);

        let err = orchestrator.init_game().await.unwrap_err();
        assert!(matches!(err, MatchError::CodeFetch { .. }), "got {err:?}");

        let err = orchestrator.init_game().await.unwrap_err();
        assert!(
            err.to_string().contains("fresh orchestrator"),
            "got {err:?}"
        );

        let err = orchestrator
            .request_decisions(&json!({"round": 1}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("provisioned"), "got {err:?}");
    }

    #[tokio::test]
    async fn report_outcome_requires_a_fetched_match() {
        let orchestrator = MatchOrchestrator::new(config());
        let err = orchestrator.report_outcome(vec![], vec![]).await.unwrap_err();
        assert!(matches!(err, MatchError::State(_)), "got {err:?}");
    }
}
