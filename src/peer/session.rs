//! A per-peer session: connect, handshake, exchange bitfield and piece
//! traffic, and feed every result into the piece manager.
//!
//! A session owns nothing but its socket; all piece and availability state
//! lives in the [`PieceManager`]. Any unrecoverable error closes the
//! socket, releases the peer's availability entry and returns the worker
//! to the queue; a single peer failure never aborts the download.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use crate::engine::PieceManager;
use crate::error::peer::{PeerError, Result};
use crate::peer::codec::{Handshake, HandshakeCodec, Message, MessageCodec};
use crate::{PeerId, Sha1Hash};

/// Establishing the TCP connection is bounded tighter than steady-state
/// reads: an unresponsive address should not hold a worker for long.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(60);

type MessageStream = Framed<TcpStream, MessageCodec>;

pub struct PeerSession {
    addr: SocketAddr,
    info_hash: Sha1Hash,
    /// Our own id, sent in the handshake.
    client_id: PeerId,
    engine: Arc<PieceManager>,
    /// Cooperative termination, checked at the top of the main loop.
    stop: Arc<AtomicBool>,
}

impl PeerSession {
    pub fn new(
        addr: SocketAddr,
        info_hash: Sha1Hash,
        client_id: PeerId,
        engine: Arc<PieceManager>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        PeerSession {
            addr,
            info_hash,
            client_id,
            engine,
            stop,
        }
    }

    /// Runs the session to completion: either the download finished, the
    /// orchestrator asked us to stop, or this peer failed.
    pub async fn run(self) -> Result<()> {
        let (mut stream, peer_id) = self.establish().await?;
        let result = self.drive(&mut stream, &peer_id).await;

        // release the availability entry on every exit path; once the
        // download is complete this is a no-op
        if let Err(e) = self.engine.remove_peer(&peer_id) {
            log::trace!("Releasing peer {}: {e}", hex::encode(peer_id));
        }
        result
    }

    /// Connect, exchange handshakes and the initial bitfield.
    ///
    /// On success the peer is registered with the engine under the
    /// identity its handshake reply carried.
    async fn establish(&self) -> Result<(MessageStream, PeerId)> {
        log::debug!("Connecting to peer [{}]", self.addr);
        let socket = timeout(CONNECT_TIMEOUT, TcpStream::connect(self.addr))
            .await
            .map_err(|_| PeerError::Timeout("connecting"))??;

        let mut stream = Framed::new(socket, HandshakeCodec);
        stream
            .send(Handshake::new(self.info_hash, self.client_id))
            .await?;

        let reply = match timeout(HANDSHAKE_TIMEOUT, stream.next()).await {
            Err(_) => return Err(PeerError::Timeout("awaiting the handshake reply")),
            Ok(None) => return Err(PeerError::ConnectionClosed),
            Ok(Some(reply)) => reply?,
        };
        if reply.info_hash != self.info_hash {
            return Err(PeerError::InvalidInfoHash);
        }
        // the reply's peer id is this session's identity from here on
        let peer_id = reply.peer_id;
        log::debug!(
            "Handshake with peer [{}] ({}) succeeded",
            self.addr,
            hex::encode(peer_id)
        );

        let mut stream = stream.map_codec(|_| MessageCodec);
        let bitfield = match timeout(READ_TIMEOUT, stream.next()).await {
            Err(_) => return Err(PeerError::Timeout("awaiting the bitfield")),
            Ok(None) => return Err(PeerError::ConnectionClosed),
            Ok(Some(msg)) => match msg? {
                Message::Bitfield(bitfield) => bitfield,
                _ => return Err(PeerError::NoBitfield),
            },
        };
        // the wire bitfield is padded to a byte boundary, so it may carry
        // up to seven spare bits but never fewer than the piece count
        let want = self.engine.piece_count();
        if bitfield.len() < want {
            return Err(PeerError::InvalidBitfield {
                got: bitfield.len(),
                want,
            });
        }
        self.engine.add_peer(peer_id, bitfield);

        Ok((stream, peer_id))
    }

    /// The main loop: one framed message in, at most one request out.
    async fn drive(&self, stream: &mut MessageStream, peer_id: &PeerId) -> Result<()> {
        stream.send(Message::Interested).await?;
        log::debug!("Sent interested to peer [{}]", self.addr);

        // requests are gated on the remote's choke state and on having no
        // request already in flight
        let mut choked = true;
        let mut request_pending = false;

        while !self.stop.load(Ordering::Relaxed) && !self.engine.is_complete() {
            let msg = match timeout(READ_TIMEOUT, stream.next()).await {
                Err(_) => return Err(PeerError::Timeout("waiting for a message")),
                Ok(None) => return Err(PeerError::ConnectionClosed),
                Ok(Some(msg)) => msg?,
            };

            match msg {
                Message::KeepAlive => {}
                Message::Choke => choked = true,
                Message::Unchoke => choked = false,
                Message::Have { piece_index } => {
                    self.engine.update_peer(peer_id, piece_index)?;
                }
                Message::Block {
                    piece_index,
                    offset,
                    data,
                } => {
                    request_pending = false;
                    self.engine
                        .block_received(peer_id, piece_index, offset, data)?;
                }
                Message::Bitfield(_) => return Err(PeerError::BitfieldNotAfterHandshake),
                // we never upload, so inbound requests and the rest of the
                // chatter are irrelevant to this session
                Message::Interested
                | Message::NotInterested
                | Message::Request(_)
                | Message::Cancel(_)
                | Message::Port(_) => {}
            }

            if !choked && !request_pending {
                if let Some(block) = self.engine.next_request(peer_id) {
                    log::trace!("Requesting {block} from peer [{}]", self.addr);
                    stream.send(Message::Request(block)).await?;
                    request_pending = true;
                }
            }
        }
        Ok(())
    }
}
