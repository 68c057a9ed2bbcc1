//! Concurrent fetch-and-extract of player code bundles.
//!
//! Network fetch and disk extraction are blocking work, so each player is
//! provisioned on a `spawn_blocking` worker, with a semaphore bounding how
//! many run at once. Failures are independent per player but aggregate:
//! provisioning succeeds only if every player's bundle succeeded.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tracing::{debug, error, instrument};

use crate::error::MatchError;
use crate::match_source::MatchSource;
use crate::PlayerId;

/// An exclusively-owned scratch directory holding one player's extracted
/// code. The directory is deleted when the bundle drops, so a bundle exists
/// exactly as long as its provisioning outcome is alive.
#[derive(Debug)]
pub struct CodeBundle {
    player_id: PlayerId,
    dir: TempDir,
}

impl CodeBundle {
    /// Player this bundle belongs to.
    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    /// Directory holding the extracted code.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Fetches and extracts every player's code bundle, concurrently.
#[derive(Debug)]
pub struct CodeProvisioner {
    source: Arc<MatchSource>,
    workers: usize,
}

impl CodeProvisioner {
    /// Create a provisioner drawing archives from `source` with at most
    /// `workers` concurrent fetch/extract jobs.
    pub fn new(source: Arc<MatchSource>, workers: usize) -> CodeProvisioner {
        CodeProvisioner {
            source,
            workers: workers.max(1),
        }
    }

    /// Provision every player in `players`.
    ///
    /// All-or-nothing: if any player's fetch or extract fails, the whole
    /// call fails (every failure is logged, the first error is returned).
    /// In-flight jobs are not cancelled; bundles built for other players
    /// are dropped, which removes their directories.
    #[instrument(skip_all, fields(players = players.len()))]
    pub async fn provision_all(
        &self,
        players: &[PlayerId],
    ) -> Result<HashMap<PlayerId, CodeBundle>, MatchError> {
        let semaphore = Arc::new(Semaphore::new(self.workers));

        let jobs = players
            .iter()
            .map(|&player_id| {
                let source = self.source.clone();
                let semaphore = semaphore.clone();
                let job = tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                    tokio::task::spawn_blocking(move || provision_player(&source, player_id))
                        .await
                        .expect("provision worker panicked")
                });
                (player_id, job)
            })
            .collect::<Vec<_>>();

        let mut bundles = HashMap::new();
        let mut first_failure = None;
        for (player_id, job) in jobs {
            match job.await.expect("provision task panicked") {
                Ok(bundle) => {
                    bundles.insert(player_id, bundle);
                }
                Err(e) => {
                    error!("provisioning failed for player {player_id}: {e}");
                    first_failure.get_or_insert(e);
                }
            }
        }

        match first_failure {
            None => Ok(bundles),
            Some(e) => Err(e),
        }
    }
}

fn provision_player(source: &MatchSource, player_id: PlayerId) -> Result<CodeBundle, MatchError> {
    let archive = source.fetch_code_archive(player_id)?;

    let extract = || -> anyhow::Result<TempDir> {
        let dir = scratch_dir().context("could not create scratch directory")?;
        tar::Archive::new(archive.as_slice())
            .unpack(dir.path())
            .context("could not extract code archive")?;
        Ok(dir)
    };

    let dir = extract().map_err(|source| MatchError::CodeFetch { player_id, source })?;
    debug!("player {player_id} code extracted to {:?}", dir.path());
    Ok(CodeBundle { player_id, dir })
}

/// A fresh player-exclusive scratch directory, on the ram-backed filesystem
/// when one is available.
fn scratch_dir() -> std::io::Result<TempDir> {
    let builder_dir = |base: Option<&Path>| {
        let mut builder = tempfile::Builder::new();
        builder.prefix("player_code_");
        match base {
            Some(base) => builder.tempdir_in(base),
            None => builder.tempdir(),
        }
    };

    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        builder_dir(Some(shm))
    } else {
        builder_dir(None)
    }
}
