//! The per-torrent download orchestrator: a pool of peer session workers
//! fed from a shared address queue, an announce loop that keeps the queue
//! stocked, and a progress reporter.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::engine::PieceManager;
use crate::error::torrent::{Result, TorrentError};
use crate::metainfo::Metainfo;
use crate::peer::{Peer, PeerSession};
use crate::tracker::{Announce, Tracker};
use crate::PeerId;

/// The connection count used when the caller has no preference.
pub const DEFAULT_CONNECTION_COUNT: usize = 5;

/// The port we report to the tracker. We never accept inbound
/// connections, so the value only has to be plausible.
const LISTEN_PORT: u16 = 6881;

/// Re-announce at least this often even if the tracker asked for a
/// longer interval, so a drained queue never starves the workers for
/// more than a minute.
const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(60);

/// How often the orchestrator checks for completion and the progress
/// reporter logs a line.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// A queue of peer addresses shared between the announce loop (producer)
/// and the session workers (consumers). Workers park on [`pop`](Self::pop)
/// until an address or a shutdown sentinel arrives.
pub struct PeerQueue {
    inner: Mutex<VecDeque<Peer>>,
    notify: Notify,
}

impl PeerQueue {
    pub fn new() -> Self {
        PeerQueue {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub fn push(&self, peer: Peer) {
        self.lock().push_back(peer);
        self.notify.notify_one();
    }

    pub fn extend(&self, peers: impl IntoIterator<Item = Peer>) {
        let mut queue = self.lock();
        for peer in peers {
            queue.push_back(peer);
            self.notify.notify_one();
        }
    }

    /// Drops every queued address. Run before refilling from a fresh
    /// announce so stale addresses don't linger ahead of current ones.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Takes the next address, waiting if the queue is empty.
    pub async fn pop(&self) -> Peer {
        loop {
            if let Some(peer) = self.lock().pop_front() {
                return peer;
            }
            self.notify.notified().await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Peer>> {
        self.inner.lock().expect("peer queue lock poisoned")
    }
}

impl Default for PeerQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Generates our peer id in the Azureus convention: a client tag
/// followed by twelve random digits.
pub fn generate_peer_id() -> PeerId {
    let mut id = *b"-RT0001-000000000000";
    let mut rng = rand::thread_rng();
    for byte in id[8..].iter_mut() {
        *byte = b'0' + rng.gen_range(0..10);
    }
    id
}

/// One torrent being downloaded to disk.
pub struct Torrent {
    meta: Metainfo,
    engine: Arc<PieceManager>,
    queue: Arc<PeerQueue>,
    client_id: PeerId,
    /// How many peer sessions run concurrently, and thus how many
    /// shutdown sentinels terminate them.
    connection_count: usize,
    stop: Arc<AtomicBool>,
}

impl Torrent {
    /// Sets up the piece manager with its pre-allocated output file in
    /// `output_dir`, named after the metainfo, with a worker pool of
    /// `connection_count` sessions
    /// ([`DEFAULT_CONNECTION_COUNT`] when in doubt).
    pub fn new(meta: Metainfo, output_dir: &Path, connection_count: usize) -> Result<Self> {
        let output_path = output_dir.join(&meta.name);
        let engine = Arc::new(PieceManager::new(&meta, &output_path)?);
        Ok(Torrent {
            meta,
            engine,
            queue: Arc::new(PeerQueue::new()),
            client_id: generate_peer_id(),
            connection_count: connection_count.max(1),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn engine(&self) -> &Arc<PieceManager> {
        &self.engine
    }

    pub fn connection_count(&self) -> usize {
        self.connection_count
    }

    /// Runs the download to completion: spawns the worker pool and the
    /// progress reporter, then drives the announce loop until every
    /// piece is verified on disk.
    pub async fn download(&self) -> Result<()> {
        log::info!(
            "Starting download of {} ({} pieces)",
            self.meta.name,
            self.engine.piece_count()
        );

        let workers = self.spawn_workers();
        let reporter = self.spawn_progress_reporter();

        let result = self.announce_loop().await;

        // wake every worker, whether parked on the queue or mid-session
        self.stop.store(true, Ordering::Relaxed);
        for _ in 0..workers.len() {
            self.queue.push(Peer::SHUTDOWN);
        }
        for worker in workers {
            let _ = worker.await;
        }
        reporter.abort();

        if result.is_ok() {
            log::info!("Download of {} complete", self.meta.name);
        }
        result
    }

    /// Requests that the download stop at the next completion check.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    fn spawn_workers(&self) -> Vec<JoinHandle<()>> {
        (0..self.connection_count)
            .map(|index| {
                let queue = Arc::clone(&self.queue);
                let engine = Arc::clone(&self.engine);
                let stop = Arc::clone(&self.stop);
                let info_hash = self.meta.info_hash;
                let client_id = self.client_id;
                tokio::spawn(async move {
                    loop {
                        let peer = queue.pop().await;
                        if peer.is_shutdown() {
                            log::debug!("Worker {index} shutting down");
                            return;
                        }
                        let session = PeerSession::new(
                            peer.addr,
                            info_hash,
                            client_id,
                            Arc::clone(&engine),
                            Arc::clone(&stop),
                        );
                        if let Err(e) = session.run().await {
                            log::debug!("Session with {} ended: {e}", peer.addr);
                        }
                        if stop.load(Ordering::Relaxed) || engine.is_complete() {
                            return;
                        }
                    }
                })
            })
            .collect()
    }

    fn spawn_progress_reporter(&self) -> JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            let mut last_bytes = 0u64;
            let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let progress = engine.progress();
                let rate = progress.bytes_downloaded.saturating_sub(last_bytes);
                last_bytes = progress.bytes_downloaded;

                let percent =
                    progress.have_pieces as f64 / progress.total_pieces as f64 * 100.0;
                let eta = if rate > 0 {
                    let remaining = (progress.total_pieces - progress.have_pieces) as u64
                        * progress.bytes_downloaded
                        / progress.have_pieces.max(1) as u64;
                    format!("{}s", remaining / rate)
                } else {
                    "inf".to_string()
                };
                log::info!(
                    "[Peers: {}] {}/{} pieces ({percent:.2}%) {} KiB/s ETA {eta}",
                    progress.peer_count,
                    progress.have_pieces,
                    progress.total_pieces,
                    rate / 1024,
                );
                if progress.have_pieces == progress.total_pieces {
                    return;
                }
            }
        })
    }

    /// Keeps the peer queue stocked until the download completes.
    ///
    /// Announces to each tracker in order until one yields peers, then
    /// sleeps in short completion-checking hops until either the
    /// tracker's interval elapses or the queue drains. A round where
    /// every tracker fails while the queue is empty and no sessions are
    /// active aborts with [`TorrentError::NoPeers`].
    async fn announce_loop(&self) -> Result<()> {
        let trackers: Vec<Tracker> = self
            .meta
            .trackers
            .iter()
            .cloned()
            .map(Tracker::new)
            .collect();

        while !self.engine.is_complete() {
            if self.stop.load(Ordering::Relaxed) {
                return Err(TorrentError::Stopped);
            }

            let response = self.announce_round(&trackers).await;
            let interval = match response {
                Some(resp) => {
                    self.queue.clear();
                    log::debug!("Tracker returned {} peers", resp.peers.len());
                    self.queue.extend(resp.peers);
                    resp.interval
                        .unwrap_or(ANNOUNCE_INTERVAL)
                        .min(ANNOUNCE_INTERVAL)
                }
                None => {
                    if self.queue.is_empty() && self.engine.progress().peer_count == 0 {
                        return Err(TorrentError::NoPeers);
                    }
                    ANNOUNCE_INTERVAL
                }
            };

            // sleep in short hops so completion or a drained queue cuts
            // the wait short
            let deadline = Instant::now() + interval;
            while Instant::now() < deadline {
                if self.engine.is_complete() {
                    return Ok(());
                }
                if self.stop.load(Ordering::Relaxed) {
                    return Err(TorrentError::Stopped);
                }
                if self.queue.is_empty() && self.engine.progress().peer_count == 0 {
                    // everything we handed out ran dry, ask again early
                    break;
                }
                tokio::time::sleep(PROGRESS_INTERVAL / 2).await;
            }
        }
        Ok(())
    }

    /// Tries each tracker in announce-list order, returning the first
    /// reply that carries peers. A reply without peers is kept as a last
    /// resort so its interval still applies.
    async fn announce_round(&self, trackers: &[Tracker]) -> Option<crate::tracker::Response> {
        let mut fallback = None;
        for tracker in trackers {
            let params = Announce {
                info_hash: self.meta.info_hash,
                peer_id: self.client_id,
                port: LISTEN_PORT,
                downloaded: self.engine.bytes_downloaded(),
                uploaded: 0,
                left: self
                    .meta
                    .total_len
                    .saturating_sub(self.engine.bytes_downloaded()),
                peer_count: Some(self.connection_count * 4),
            };
            match tracker.announce(params).await {
                Ok(resp) if !resp.peers.is_empty() => return Some(resp),
                Ok(resp) => fallback = Some(resp),
                Err(e) => log::warn!("Announce to {} failed: {e}", tracker.url()),
            }
        }
        fallback
    }
}
