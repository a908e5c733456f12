//! The piece manager: the single authoritative owner of all piece and
//! block state for one download.
//!
//! Peer sessions never hold references into piece data; everything goes
//! through the method surface here, under one internal lock. Each piece
//! walks the partition Missing -> Ongoing -> Have and never backwards.
//! Blocks inside an Ongoing piece may individually fall back to Missing
//! when the piece fails hash verification, but the piece itself stays
//! Ongoing until it verifies.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::blockinfo::{self, BlockInfo};
use crate::error::engine::{EngineError, Result};
use crate::metainfo::Metainfo;
use crate::piece::Piece;
use crate::{Bitfield, PeerId, PieceIndex};

/// How long a dispatched block request may stay unanswered before it is
/// proactively re-issued.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Where a piece currently is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PieceState {
    /// Never dispatched to any peer.
    Missing,
    /// Dispatched to at least one peer, not yet verified.
    Ongoing,
    /// Verified and written to the output file.
    Have,
}

/// A block request that has been sent but not yet answered.
struct PendingRequest {
    block: BlockInfo,
    /// Refreshed whenever the request is re-issued.
    issued_at: Instant,
}

/// A snapshot of download progress for the observational side channel.
#[derive(Clone, Copy, Debug)]
pub struct Progress {
    pub have_pieces: usize,
    pub total_pieces: usize,
    pub peer_count: usize,
    pub bytes_downloaded: u64,
}

struct Inner {
    /// The arena owning every piece (and thus block) for the lifetime of
    /// the download, indexed by piece index.
    pieces: Vec<Piece>,
    state: Vec<PieceState>,
    have_count: usize,
    /// Piece availability per connected peer, one bit per piece index.
    peers: HashMap<PeerId, Bitfield>,
    pending: Vec<PendingRequest>,
    /// The pre-allocated output file; written only from the piece
    /// completion path, so the lock doubles as the single-writer guard.
    output: File,
    request_timeout: Duration,
}

/// Owns all piece state, peer availability and in-flight request tracking,
/// and writes verified pieces to the output file.
pub struct PieceManager {
    piece_len: u32,
    total_pieces: usize,
    inner: Mutex<Inner>,
}

impl PieceManager {
    /// Builds the piece arena from the metainfo and pre-allocates the
    /// output file to the exact declared length.
    pub fn new(meta: &Metainfo, output_path: &Path) -> Result<Self> {
        let total_pieces = meta.piece_count();
        let pieces = meta
            .piece_hashes
            .iter()
            .enumerate()
            .map(|(index, hash)| {
                let len = blockinfo::piece_len(meta.total_len, meta.piece_len, index);
                Piece::new(index, len, *hash)
            })
            .collect();

        let output = OpenOptions::new()
            .create(true)
            .write(true)
            .read(true)
            .open(output_path)?;
        output.set_len(meta.total_len)?;

        Ok(PieceManager {
            piece_len: meta.piece_len,
            total_pieces,
            inner: Mutex::new(Inner {
                pieces,
                state: vec![PieceState::Missing; total_pieces],
                have_count: 0,
                peers: HashMap::new(),
                pending: Vec::new(),
                output,
                request_timeout: REQUEST_TIMEOUT,
            }),
        })
    }

    /// The number of pieces in the torrent.
    pub fn piece_count(&self) -> usize {
        self.total_pieces
    }

    /// True once every piece has been verified and persisted. This is the
    /// overall termination condition.
    pub fn is_complete(&self) -> bool {
        let inner = self.lock();
        inner.have_count == self.total_pieces
    }

    /// Approximate verified byte count, used for tracker accounting and
    /// progress display. Not exact for a short final piece.
    pub fn bytes_downloaded(&self) -> u64 {
        let inner = self.lock();
        inner.have_count as u64 * self.piece_len as u64
    }

    pub fn progress(&self) -> Progress {
        let inner = self.lock();
        Progress {
            have_pieces: inner.have_count,
            total_pieces: self.total_pieces,
            peer_count: inner.peers.len(),
            bytes_downloaded: inner.have_count as u64 * self.piece_len as u64,
        }
    }

    /// Records which pieces a peer claims to have. Idempotent per peer:
    /// a later call overwrites the earlier availability.
    pub fn add_peer(&self, peer_id: PeerId, bitfield: Bitfield) {
        let mut inner = self.lock();
        inner.peers.insert(peer_id, bitfield);
    }

    /// Sets one availability bit for a peer that announced a new piece.
    ///
    /// The caller must have called [`add_peer`](Self::add_peer) first;
    /// anything else is a session invariant violation.
    pub fn update_peer(&self, peer_id: &PeerId, piece_index: PieceIndex) -> Result<()> {
        if piece_index >= self.total_pieces {
            return Err(EngineError::UnknownPiece(piece_index));
        }
        let mut inner = self.lock();
        let bitfield = inner
            .peers
            .get_mut(peer_id)
            .ok_or(EngineError::UnknownPeer(*peer_id))?;
        if piece_index >= bitfield.len() {
            bitfield.resize(piece_index + 1, false);
        }
        bitfield.set(piece_index, true);
        Ok(())
    }

    /// Drops availability tracking for a disconnecting peer.
    ///
    /// A no-op once the download is complete; the completion check and the
    /// removal share one critical section so a late disconnect cannot race
    /// a finishing download.
    pub fn remove_peer(&self, peer_id: &PeerId) -> Result<()> {
        let mut inner = self.lock();
        if inner.have_count == self.total_pieces {
            return Ok(());
        }
        inner
            .peers
            .remove(peer_id)
            .map(|_| ())
            .ok_or(EngineError::UnknownPeer(*peer_id))
    }

    /// Selects the next block to request from this peer.
    ///
    /// Priority order:
    /// 1. a dispatched request older than the expiry threshold, for a piece
    ///    this peer has: re-issued to the same peer with its timestamp
    ///    refreshed;
    /// 2. the next Missing block within an Ongoing piece this peer has;
    /// 3. the first block of the rarest Missing piece among those this peer
    ///    has, ties broken by lowest index; selecting it moves the piece
    ///    out of Missing.
    ///
    /// Returns `None` when the peer has nothing eligible; the caller must
    /// not busy-loop on that without waiting for new messages.
    pub fn next_request(&self, peer_id: &PeerId) -> Option<BlockInfo> {
        let mut inner = self.lock();
        if !inner.peers.contains_key(peer_id) {
            return None;
        }

        if let Some(block) = inner.expired_request(peer_id) {
            log::trace!("Re-issuing expired request {block} to {}", hex::encode(peer_id));
            return Some(block);
        }
        if let Some(block) = inner.next_ongoing(peer_id) {
            return Some(block);
        }
        inner.next_rarest(peer_id)
    }

    /// Stores a block arriving from a peer and drives piece completion.
    ///
    /// The matching pending request is cleared if one exists; a response to
    /// an already-resolved request is tolerated. A block for a piece that
    /// is not Ongoing is a bookkeeping violation and fatal to the session
    /// that reported it. On completion the piece is verified: a match is
    /// persisted at `piece_index * piece_len` and moves the piece to Have,
    /// a mismatch resets every block to Missing for re-request.
    pub fn block_received(
        &self,
        peer_id: &PeerId,
        piece_index: PieceIndex,
        offset: u32,
        data: Vec<u8>,
    ) -> Result<()> {
        let mut inner = self.lock();

        inner
            .pending
            .retain(|p| !(p.block.piece_index == piece_index && p.block.offset == offset));

        if piece_index >= self.total_pieces || inner.state[piece_index] != PieceState::Ongoing {
            log::warn!(
                "Peer {} sent block {offset} for piece {piece_index} which is not ongoing",
                hex::encode(peer_id)
            );
            return Err(EngineError::UnknownPiece(piece_index));
        }

        inner.pieces[piece_index].block_received(offset, data)?;
        if !inner.pieces[piece_index].is_complete() {
            return Ok(());
        }

        if inner.pieces[piece_index].is_hash_matching() {
            let position = piece_index as u64 * self.piece_len as u64;
            let data = inner.pieces[piece_index].data();
            inner.output.seek(SeekFrom::Start(position))?;
            inner.output.write_all(&data)?;

            inner.state[piece_index] = PieceState::Have;
            inner.have_count += 1;
            log::info!(
                "Piece {piece_index} verified and written ({}/{})",
                inner.have_count,
                self.total_pieces
            );
        } else {
            // never trust a partially bad piece: drop all of it and
            // re-request; the piece stays Ongoing
            log::warn!("Piece {piece_index} failed hash verification, discarding");
            inner.pieces[piece_index].reset();
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // a poisoned lock means a panic elsewhere already tore down the
        // download; propagating the panic is the only sensible option
        self.inner.lock().expect("piece state lock poisoned")
    }

    #[cfg(test)]
    fn set_request_timeout(&self, timeout: Duration) {
        self.lock().request_timeout = timeout;
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }
}

impl Inner {
    fn peer_has_piece(&self, peer_id: &PeerId, piece_index: PieceIndex) -> bool {
        self.peers
            .get(peer_id)
            .map(|bitfield| bitfield.get(piece_index).map(|bit| *bit).unwrap_or(false))
            .unwrap_or(false)
    }

    /// The oldest-style scan of the original scheduler: any in-flight
    /// request past the expiry threshold, for a piece this peer has, is
    /// handed back to this same peer with a fresh timestamp.
    fn expired_request(&mut self, peer_id: &PeerId) -> Option<BlockInfo> {
        let now = Instant::now();
        let timeout = self.request_timeout;
        let peers = &self.peers;
        let peer = peers.get(peer_id)?;
        self.pending
            .iter_mut()
            .find(|p| {
                peer.get(p.block.piece_index).map(|bit| *bit).unwrap_or(false)
                    && now.duration_since(p.issued_at) >= timeout
            })
            .map(|p| {
                p.issued_at = now;
                p.block
            })
    }

    /// The next Missing block of any piece already being downloaded that
    /// this peer can serve.
    fn next_ongoing(&mut self, peer_id: &PeerId) -> Option<BlockInfo> {
        for index in 0..self.state.len() {
            if self.state[index] != PieceState::Ongoing || !self.peer_has_piece(peer_id, index) {
                continue;
            }
            if let Some(block) = self.pieces[index].next_request() {
                self.pending.push(PendingRequest {
                    block,
                    issued_at: Instant::now(),
                });
                return Some(block);
            }
        }
        None
    }

    /// Claims the rarest Missing piece this peer has: rarity is the number
    /// of tracked peers advertising the piece, ties broken by lowest
    /// index. The claimed piece moves to Ongoing.
    fn next_rarest(&mut self, peer_id: &PeerId) -> Option<BlockInfo> {
        let mut rarest: Option<(PieceIndex, usize)> = None;
        for index in 0..self.state.len() {
            if self.state[index] != PieceState::Missing || !self.peer_has_piece(peer_id, index) {
                continue;
            }
            let count = self
                .peers
                .values()
                .filter(|bitfield| bitfield.get(index).map(|bit| *bit).unwrap_or(false))
                .count();
            // strictly-less keeps the lowest index on ties
            if rarest.map(|(_, best)| count < best).unwrap_or(true) {
                rarest = Some((index, count));
            }
        }

        let (index, _) = rarest?;
        self.state[index] = PieceState::Ongoing;
        let block = self.pieces[index]
            .next_request()
            .expect("a Missing piece always has a requestable block");
        self.pending.push(PendingRequest {
            block,
            issued_at: Instant::now(),
        });
        Some(block)
    }
}
