//! Child-process lifecycle for player programs.
//!
//! One OS process per player, spawned in its provisioned bundle directory
//! through a fixed launcher script. Liveness is checked by non-blocking
//! polls at well-defined checkpoints (after launch, before each round),
//! never by a background watcher, so failure detection stays deterministic.
//! There is no restart policy: a dead player is fatal to the match.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use anyhow::Context;
use tracing::{info, instrument, warn};

use crate::error::MatchError;
use crate::provisioner::CodeBundle;
use crate::PlayerId;

/// Name under which the launcher script is placed in each bundle.
pub const LAUNCHER_SCRIPT_NAME: &str = "start_player.sh";

/// Fixed entry point copied into every bundle before spawn. The bundle is
/// expected to provide `run.sh`; everything else about how the player runs
/// is the player's business.
const LAUNCHER_SCRIPT: &str = "\
#!/bin/bash
# Launched with the bundle directory as cwd. `player_id` and `game_socket`
# are in the environment.
exec /bin/bash ./run.sh
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessState {
    Running,
    Exited(Option<i32>),
}

#[derive(Debug)]
struct PlayerProcess {
    child: Child,
    state: ProcessState,
    // keeps the scratch directory alive as long as the process entry
    _bundle: CodeBundle,
}

/// Spawns and tracks one child process per player.
///
/// All still-running children are killed when the supervisor drops, and the
/// bundles it owns are removed with it.
#[derive(Debug, Default)]
pub struct ProcessSupervisor {
    processes: HashMap<PlayerId, PlayerProcess>,
    debug_player_stderr: bool,
}

impl ProcessSupervisor {
    /// Create a supervisor. `debug_player_stderr` keeps children's stderr
    /// attached instead of discarding it.
    pub fn new(debug_player_stderr: bool) -> ProcessSupervisor {
        ProcessSupervisor {
            processes: HashMap::new(),
            debug_player_stderr,
        }
    }

    /// Spawn one player process in its bundle directory.
    ///
    /// Takes ownership of the bundle: the scratch directory lives until the
    /// supervisor (and with it the process entry) is dropped. The launcher
    /// script is written into the bundle first; the child gets `player_id`
    /// and `game_socket` in its environment.
    #[instrument(skip_all, fields(player_id = bundle.player_id()))]
    pub fn launch(
        &mut self,
        bundle: CodeBundle,
        socket_path: &std::path::Path,
    ) -> Result<(), MatchError> {
        let player_id = bundle.player_id();

        let spawn = || -> anyhow::Result<Child> {
            let script_path = bundle.path().join(LAUNCHER_SCRIPT_NAME);
            std::fs::write(&script_path, LAUNCHER_SCRIPT)
                .context("could not write launcher script")?;
            std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755))
                .context("could not mark launcher script executable")?;

            let mut command = Command::new("/bin/bash");
            command
                .arg(format!("./{LAUNCHER_SCRIPT_NAME}"))
                .current_dir(bundle.path())
                .env("player_id", player_id.to_string())
                .env("game_socket", socket_path)
                .stdin(Stdio::null())
                .stdout(Stdio::null());
            if !self.debug_player_stderr {
                command.stderr(Stdio::null());
            }
            command.spawn().context("could not spawn player process")
        };

        let child = spawn().map_err(|source| MatchError::Launch { player_id, source })?;
        info!("player {player_id} launched (pid {})", child.id());

        self.processes.insert(
            player_id,
            PlayerProcess {
                child,
                state: ProcessState::Running,
                _bundle: bundle,
            },
        );
        Ok(())
    }

    /// Non-blocking liveness check: returns every player whose process has
    /// exited, including ones already reported by an earlier poll.
    pub fn poll_dead(&mut self) -> Vec<PlayerId> {
        let mut dead = Vec::new();
        for (&player_id, process) in &mut self.processes {
            if process.state == ProcessState::Running {
                match process.child.try_wait() {
                    Ok(Some(status)) => {
                        warn!("player {player_id} exited with {status}");
                        process.state = ProcessState::Exited(status.code());
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!("could not poll player {player_id}: {e}");
                    }
                }
            }
            if let ProcessState::Exited(_) = process.state {
                dead.push(player_id);
            }
        }
        dead.sort_unstable();
        dead
    }

    /// Number of launched players.
    pub fn player_count(&self) -> usize {
        self.processes.len()
    }

    /// Kill every still-running child and reap it.
    pub fn kill_all(&mut self) {
        static REAP_TIMEOUT: Duration = Duration::from_secs(1);
        for (&player_id, process) in &mut self.processes {
            if process.state != ProcessState::Running {
                continue;
            }
            if let Err(e) = process.child.kill() {
                warn!("could not kill player {player_id}: {e}");
                continue;
            }
            // kill() only delivers the signal; reap to avoid zombies
            let deadline = std::time::Instant::now() + REAP_TIMEOUT;
            loop {
                match process.child.try_wait() {
                    Ok(Some(status)) => {
                        process.state = ProcessState::Exited(status.code());
                        break;
                    }
                    Ok(None) if std::time::Instant::now() < deadline => {
                        std::thread::sleep(Duration::from_millis(10));
                    }
                    Ok(None) => {
                        warn!("player {player_id} did not die within {REAP_TIMEOUT:?}");
                        break;
                    }
                    Err(e) => {
                        warn!("could not reap player {player_id}: {e}");
                        break;
                    }
                }
            }
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.kill_all();
    }
}
