//! The local IPC endpoint shared by all players of one match.
//!
//! A single Unix-domain stream socket is served per match. Each player
//! process connects once and must identify itself with a first frame
//! `{"player_id": <id>}` before any other traffic; only then is it entered
//! into the connection table. All socket I/O runs as cooperative tokio
//! tasks; the only blocking work in this crate (fetch/extract) lives
//! elsewhere on the worker pool.
//!
//! Within one round, the broadcast to all peers happens-before any gather
//! read, and a gather returns only once every peer's message has been read.
//! Peers are otherwise mutually unordered. Connections are never removed
//! from the table: a peer that errors is flagged failed and skipped by
//! later snapshots, and the failure is surfaced to the caller rather than
//! absorbed.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::{json, Value};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::MatchError;
use crate::framing;
use crate::PlayerId;

/// One identified peer. Reader and writer are locked independently so a
/// broadcast and a gather never contend with each other.
#[derive(Debug)]
struct PlayerConnection {
    reader: tokio::sync::Mutex<OwnedReadHalf>,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    connected_at: Instant,
    failed: AtomicBool,
}

impl PlayerConnection {
    fn mark_failed(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }
}

/// playerId → connection; additions happen only on the handshake path.
type ConnectionTable = Mutex<HashMap<PlayerId, Arc<PlayerConnection>>>;

/// The match's IPC server: accepts player connections, frames messages, and
/// synchronizes broadcast/gather across all connected peers.
///
/// Dropping the channel stops the accept loop and unlinks the socket.
#[derive(Debug)]
pub struct PlayerChannel {
    socket_path: PathBuf,
    connections: Arc<ConnectionTable>,
    poll_interval: Duration,
    accept_task: JoinHandle<()>,
}

impl PlayerChannel {
    /// Bind the socket at `socket_path` (reclaiming a stale one first) and
    /// start accepting player connections.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        socket_path: impl Into<PathBuf>,
        poll_interval: Duration,
    ) -> Result<PlayerChannel, MatchError> {
        let socket_path = socket_path.into();
        let bind_error = |source| MatchError::Bind {
            path: socket_path.display().to_string(),
            source,
        };

        // reclaim the endpoint left behind by a previous match
        match std::fs::remove_file(&socket_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(bind_error(e)),
        }
        let listener = UnixListener::bind(&socket_path).map_err(bind_error)?;
        info!("player channel listening at {}", socket_path.display());

        let connections: Arc<ConnectionTable> = Arc::default();
        let table = connections.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _addr)) => {
                        tokio::spawn(register_peer(stream, table.clone()));
                    }
                    Err(e) => warn!("accept failed: {e}"),
                }
            }
        });

        Ok(PlayerChannel {
            socket_path,
            connections,
            poll_interval,
            accept_task,
        })
    }

    /// Number of peers that completed the handshake.
    pub fn connected_count(&self) -> usize {
        self.connections.lock().expect("poisoned").len()
    }

    /// Identifiers of all peers that completed the handshake, sorted.
    pub fn connected_players(&self) -> Vec<PlayerId> {
        let mut players = self
            .connections
            .lock()
            .expect("poisoned")
            .keys()
            .copied()
            .collect::<Vec<_>>();
        players.sort_unstable();
        players
    }

    /// Suspend until `expected` peers are connected, polling cooperatively.
    ///
    /// The channel imposes no timeout here; wrap the call with a deadline if
    /// one is required.
    pub async fn wait_until_connected(&self, expected: usize) {
        while self.connected_count() < expected {
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Frame and write `{"game_state": state}` to every live peer,
    /// concurrently, returning once all writes completed.
    ///
    /// A write failure marks that peer failed (excluding it from future
    /// operations) without blocking delivery to the others; the first
    /// failure is returned after every write finished.
    pub async fn broadcast_game_state(&self, state: &Value) -> Result<(), MatchError> {
        let message = json!({ "game_state": state });
        let writes = self.live_peers().into_iter().map(|(player_id, connection)| {
            let message = message.clone();
            async move {
                let mut writer = connection.writer.lock().await;
                framing::write_frame(&mut *writer, &message)
                    .await
                    .map_err(|source| {
                        connection.mark_failed();
                        MatchError::Frame { player_id, source }
                    })
            }
        });

        let mut first_failure = None;
        for result in join_all(writes).await {
            if let Err(e) = result {
                warn!("broadcast: {e}");
                first_failure.get_or_insert(e);
            }
        }
        match first_failure {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Read one framed message from every live peer, concurrently, and
    /// return the full mapping once **all** reads completed.
    ///
    /// There is no per-peer timeout at this layer: a peer that never
    /// responds stalls the whole round. A frame error on one peer marks it
    /// failed and fails the call, again only after every read finished.
    pub async fn gather_decisions(&self) -> Result<HashMap<PlayerId, Value>, MatchError> {
        let reads = self.live_peers().into_iter().map(|(player_id, connection)| {
            async move {
                let mut reader = connection.reader.lock().await;
                match framing::read_frame(&mut *reader).await {
                    Ok(decision) => Ok((player_id, decision)),
                    Err(source) => {
                        connection.mark_failed();
                        Err(MatchError::Frame { player_id, source })
                    }
                }
            }
        });

        let mut decisions = HashMap::new();
        let mut first_failure = None;
        for result in join_all(reads).await {
            match result {
                Ok((player_id, decision)) => {
                    decisions.insert(player_id, decision);
                }
                Err(e) => {
                    warn!("gather: {e}");
                    first_failure.get_or_insert(e);
                }
            }
        }
        match first_failure {
            None => Ok(decisions),
            Some(e) => Err(e),
        }
    }

    /// Snapshot of the non-failed connections. Taken up front so that
    /// handshakes racing with a broadcast/gather only affect the next
    /// operation.
    fn live_peers(&self) -> Vec<(PlayerId, Arc<PlayerConnection>)> {
        self.connections
            .lock()
            .expect("poisoned")
            .iter()
            .filter(|(_, connection)| !connection.is_failed())
            .map(|(&player_id, connection)| (player_id, connection.clone()))
            .collect()
    }
}

impl Drop for PlayerChannel {
    fn drop(&mut self) {
        self.accept_task.abort();
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

/// Handshake for one freshly accepted connection: exactly one
/// identification frame `{"player_id": <id>}` before any other traffic.
/// Anything else drops the connection without registering it.
async fn register_peer(stream: UnixStream, table: Arc<ConnectionTable>) {
    let (mut read_half, write_half) = stream.into_split();

    let hello = match framing::read_frame(&mut read_half).await {
        Ok(hello) => hello,
        Err(e) => {
            warn!("handshake failed: {e}");
            return;
        }
    };
    let player_id = hello
        .get("player_id")
        .and_then(Value::as_u64)
        .and_then(|id| PlayerId::try_from(id).ok());
    let Some(player_id) = player_id else {
        warn!("rejecting connection: first frame is not an identification ({hello})");
        return;
    };

    let connection = Arc::new(PlayerConnection {
        reader: tokio::sync::Mutex::new(read_half),
        writer: tokio::sync::Mutex::new(write_half),
        connected_at: Instant::now(),
        failed: AtomicBool::new(false),
    });

    match table.lock().expect("poisoned").entry(player_id) {
        Entry::Occupied(existing) => {
            warn!(
                "player {player_id} connected twice; keeping the connection made {:?} ago",
                existing.get().connected_at.elapsed()
            );
        }
        Entry::Vacant(entry) => {
            entry.insert(connection);
            info!("player {player_id} connected");
        }
    }
}

#[cfg(test)]
mod channel_tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::framing::{read_frame, write_frame, FrameError};

    const POLL: Duration = Duration::from_millis(5);

    fn socket_in(dir: &TempDir) -> PathBuf {
        dir.path().join("game.sock")
    }

    async fn connect_identified(path: &std::path::Path, player_id: PlayerId) -> UnixStream {
        let mut stream = UnixStream::connect(path).await.unwrap();
        write_frame(&mut stream, &json!({ "player_id": player_id }))
            .await
            .unwrap();
        stream
    }

    #[tokio::test]
    async fn three_peers_round_trip() {
        let dir = TempDir::new().unwrap();
        let channel = PlayerChannel::start(socket_in(&dir), POLL).unwrap();

        let mut peers = Vec::new();
        for player_id in 0..3 {
            peers.push(connect_identified(&socket_in(&dir), player_id).await);
        }
        channel.wait_until_connected(3).await;
        assert_eq!(channel.connected_players(), vec![0, 1, 2]);

        channel
            .broadcast_game_state(&json!({"round": 1}))
            .await
            .unwrap();

        for peer in &mut peers {
            let state = read_frame(peer).await.unwrap();
            assert_eq!(state, json!({"game_state": {"round": 1}}));
            write_frame(peer, &json!({"decision": true})).await.unwrap();
        }

        let decisions = channel.gather_decisions().await.unwrap();
        assert_eq!(decisions.len(), 3);
        for player_id in 0..3 {
            assert_eq!(decisions[&player_id], json!({"decision": true}));
        }
    }

    #[tokio::test]
    async fn gather_waits_for_every_peer() {
        let dir = TempDir::new().unwrap();
        let channel = PlayerChannel::start(socket_in(&dir), POLL).unwrap();

        let mut fast = connect_identified(&socket_in(&dir), 1).await;
        let mut slow = connect_identified(&socket_in(&dir), 2).await;
        channel.wait_until_connected(2).await;

        write_frame(&mut fast, &json!({"decision": "now"}))
            .await
            .unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            write_frame(&mut slow, &json!({"decision": "late"}))
                .await
                .unwrap();
            // keep the stream open until after the write is gathered
            tokio::time::sleep(Duration::from_millis(500)).await;
        });

        let started = Instant::now();
        let decisions = channel.gather_decisions().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[&1], json!({"decision": "now"}));
        assert_eq!(decisions[&2], json!({"decision": "late"}));
    }

    #[tokio::test]
    async fn non_identification_first_frame_is_rejected() {
        let dir = TempDir::new().unwrap();
        let channel = PlayerChannel::start(socket_in(&dir), POLL).unwrap();

        let mut stream = UnixStream::connect(socket_in(&dir)).await.unwrap();
        write_frame(&mut stream, &json!({"decision": true}))
            .await
            .unwrap();

        // the connection is dropped, never registered
        let err = read_frame(&mut stream).await.unwrap_err();
        assert!(matches!(err, FrameError::Io(_)), "got {err:?}");
        assert_eq!(channel.connected_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_identification_keeps_the_first_connection() {
        let dir = TempDir::new().unwrap();
        let channel = PlayerChannel::start(socket_in(&dir), POLL).unwrap();

        let _first = connect_identified(&socket_in(&dir), 9).await;
        channel.wait_until_connected(1).await;

        let mut second = connect_identified(&socket_in(&dir), 9).await;
        let err = read_frame(&mut second).await.unwrap_err();
        assert!(matches!(err, FrameError::Io(_)), "got {err:?}");
        assert_eq!(channel.connected_count(), 1);
    }

    #[tokio::test]
    async fn failed_peer_is_excluded_from_later_operations() {
        let dir = TempDir::new().unwrap();
        let channel = PlayerChannel::start(socket_in(&dir), POLL).unwrap();

        let mut alive = connect_identified(&socket_in(&dir), 1).await;
        let gone = connect_identified(&socket_in(&dir), 2).await;
        channel.wait_until_connected(2).await;
        drop(gone);
        tokio::time::sleep(Duration::from_millis(20)).await;

        // peer 2 fails (at the latest) at gather time, and peer 1 is still
        // fully served in the same operation
        let broadcast_result = channel.broadcast_game_state(&json!({"round": 1})).await;
        let state = read_frame(&mut alive).await.unwrap();
        assert_eq!(state, json!({"game_state": {"round": 1}}));
        match broadcast_result {
            Err(e) => {
                assert!(matches!(e, MatchError::Frame { player_id: 2, .. }), "got {e:?}");
            }
            Ok(()) => {
                write_frame(&mut alive, &json!({"decision": false}))
                    .await
                    .unwrap();
                let err = channel.gather_decisions().await.unwrap_err();
                assert!(
                    matches!(err, MatchError::Frame { player_id: 2, .. }),
                    "got {err:?}"
                );
            }
        }

        // the failed peer is out of the snapshot now; the round works again
        channel
            .broadcast_game_state(&json!({"round": 2}))
            .await
            .unwrap();
        let state = read_frame(&mut alive).await.unwrap();
        assert_eq!(state, json!({"game_state": {"round": 2}}));
        write_frame(&mut alive, &json!({"decision": true}))
            .await
            .unwrap();
        let decisions = channel.gather_decisions().await.unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[&1], json!({"decision": true}));
    }

    #[tokio::test]
    async fn stale_socket_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let path = socket_in(&dir);
        std::fs::write(&path, b"stale").unwrap();

        let channel = PlayerChannel::start(&path, POLL).unwrap();
        let _peer = connect_identified(&path, 4).await;
        channel.wait_until_connected(1).await;
    }

    #[tokio::test]
    async fn dropping_the_channel_unlinks_the_socket() {
        let dir = TempDir::new().unwrap();
        let path = socket_in(&dir);
        let channel = PlayerChannel::start(&path, POLL).unwrap();
        assert!(path.exists());
        drop(channel);
        assert!(!path.exists());
    }
}
