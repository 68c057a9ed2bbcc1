//! Config for the orchestrator behaviors
//!
//! This module provides configuration options controlling how a match is
//! fetched, provisioned, and driven.
//!
//! Configuration can be created programmatically using
//! [`Configuration::new()`] or by reading environment variables on top of it
//! using [`Configuration::from_env()`].
//!
//! # Environment Variables
//!
//! The following environment variables override configuration values. All
//! are optional.
//!
//! - `RETRY_INTERVAL` — Seconds to sleep between match-fetch attempts (default: `1.0`)
//! - `MATCH_SOCKET_PATH` — Path of the Unix socket served to players (default: `/tmp/game.sock`)
//! - `MATCH_PROVISION_WORKERS` — Width of the code-provisioning worker pool (default: `8`)
//! - `MATCH_DEBUG_PLAYER_STDERR` — Set to `"true"` to keep player stderr attached (default: `false`)

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for one match orchestration.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub(crate) server_address: String,
    pub(crate) server_port: u16,
    pub(crate) fetch_attempts: u32,
    pub(crate) fetch_retry_interval: Duration,
    pub(crate) socket_path: PathBuf,
    pub(crate) provision_workers: usize,
    pub(crate) connect_poll_interval: Duration,
    pub(crate) launch_grace: Duration,
    pub(crate) round_timeout: Option<Duration>,
    pub(crate) log: bool,
    pub(crate) debug_player_stderr: bool,
}

impl Configuration {
    /// Create a new configuration for an authority at `server_address`.
    ///
    /// By default:
    /// - The authority is contacted on port 80.
    /// - Match fetch retries up to 5 times, sleeping 1 second between attempts.
    /// - The player channel is served at `/tmp/game.sock`.
    /// - Code provisioning uses 8 concurrent workers.
    /// - The connect wait polls every 50 ms.
    /// - Liveness is polled 100 ms after launch.
    /// - Decision rounds have no deadline.
    /// - Logging to file is disabled.
    /// - Player stderr output is discarded.
    pub fn new(server_address: impl Into<String>) -> Self {
        Self {
            server_address: server_address.into(),
            server_port: 80,
            fetch_attempts: 5,
            fetch_retry_interval: Duration::from_secs(1),
            socket_path: PathBuf::from("/tmp/game.sock"),
            provision_workers: 8,
            connect_poll_interval: Duration::from_millis(50),
            launch_grace: Duration::from_millis(100),
            round_timeout: None,
            log: false,
            debug_player_stderr: false,
        }
    }

    /// Create a configuration for `server_address`, then apply environment
    /// variable overrides (see module documentation).
    ///
    /// Unset or unparseable variables keep their default value.
    pub fn from_env(server_address: impl Into<String>) -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        fn get_env_parsed<T: std::str::FromStr>(var: &str, default: T) -> T {
            std::env::var(var)
                .ok()
                .and_then(|val| val.parse().ok())
                .unwrap_or(default)
        }

        let mut config = Self::new(server_address);
        config.fetch_retry_interval =
            Duration::from_secs_f64(get_env_parsed("RETRY_INTERVAL", 1.0_f64).max(0.0));
        config.socket_path = get_env_parsed("MATCH_SOCKET_PATH", config.socket_path);
        config.provision_workers =
            get_env_parsed("MATCH_PROVISION_WORKERS", config.provision_workers).max(1);
        config.debug_player_stderr =
            get_env_flag("MATCH_DEBUG_PLAYER_STDERR", config.debug_player_stderr);
        config
    }

    /// Set the authority port.
    pub fn with_server_port(mut self, value: u16) -> Self {
        self.server_port = value;
        self
    }

    /// Set the match-fetch attempt budget.
    pub fn with_fetch_attempts(mut self, value: u32) -> Self {
        self.fetch_attempts = value.max(1);
        self
    }

    /// Set the sleep between match-fetch attempts.
    pub fn with_fetch_retry_interval(mut self, value: Duration) -> Self {
        self.fetch_retry_interval = value;
        self
    }

    /// Set the Unix socket path served to players.
    pub fn with_socket_path(mut self, value: impl Into<PathBuf>) -> Self {
        self.socket_path = value.into();
        self
    }

    /// Set the width of the code-provisioning worker pool.
    pub fn with_provision_workers(mut self, value: usize) -> Self {
        self.provision_workers = value.max(1);
        self
    }

    /// Set the poll interval of the wait for player connections.
    pub fn with_connect_poll_interval(mut self, value: Duration) -> Self {
        self.connect_poll_interval = value;
        self
    }

    /// Set the delay between launching players and the first liveness poll.
    ///
    /// A player that crashes on startup needs a moment to actually exit;
    /// polling before that reports it alive.
    pub fn with_launch_grace(mut self, value: Duration) -> Self {
        self.launch_grace = value;
        self
    }

    /// Set a deadline for one whole decision round (broadcast + gather).
    ///
    /// There is none by default: a peer that never answers stalls the match.
    pub fn with_round_timeout(mut self, value: Duration) -> Self {
        self.round_timeout = Some(value);
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Enable or disable player stderr output (debug purposes only).
    pub fn with_debug_player_stderr(mut self, value: bool) -> Self {
        self.debug_player_stderr = value;
        self
    }
}
