//! The HTTP tracker client: announces transfer progress and decodes the
//! peer roster out of the bencoded reply.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use bytes::Buf;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC};
use reqwest::Client;
use url::Url;

use crate::bencode::{self, Value};
use crate::error::tracker::{Result, TrackerError};
use crate::peer::Peer;

pub mod announce;

pub use announce::Announce;

/// A reply body must fit this announce round trip.
const TRACKER_TIMEOUT: Duration = Duration::from_secs(15);

/// Length of one compact-form peer entry: 4 bytes IPv4, 2 bytes port.
const COMPACT_ENTRY_LEN: usize = 6;

/// Contains the characters that need to be URL encoded according to:
/// <https://en.wikipedia.org/wiki/Percent-encoding#Types_of_URI_characters>
const URL_ENCODE_RESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'~')
    .remove(b'.');

/// The decoded announce reply.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Response {
    /// How long the tracker wants us to wait before re-announcing.
    pub interval: Option<Duration>,
    /// The roster for this round. Empty is valid: "no peers this round".
    pub peers: Vec<Peer>,
}

/// The HTTP tracker for a torrent, from which we can request peers and to
/// which we announce transfer progress.
pub struct Tracker {
    client: Client,
    url: Url,
}

impl Tracker {
    pub fn new(url: Url) -> Self {
        Tracker {
            client: Client::new(),
            url,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Sends an announce request with the given parameters.
    ///
    /// A non-success HTTP status means "no peers this round" and yields an
    /// empty response rather than an error; a body that fails to decode is
    /// an error that discards this round.
    pub async fn announce(&self, params: Announce) -> Result<Response> {
        let mut query = vec![
            ("port", params.port.to_string()),
            ("downloaded", params.downloaded.to_string()),
            ("uploaded", params.uploaded.to_string()),
            ("left", params.left.to_string()),
            ("compact", "1".to_string()),
        ];
        if let Some(peer_count) = params.peer_count {
            query.push(("numwant", peer_count.to_string()));
        }

        // the raw 20 byte digests go into the URL percent-encoded
        let url = format!(
            "{url}\
            ?info_hash={info_hash}\
            &peer_id={peer_id}",
            url = self.url,
            info_hash = percent_encoding::percent_encode(&params.info_hash, URL_ENCODE_RESERVED),
            peer_id = percent_encoding::percent_encode(&params.peer_id, URL_ENCODE_RESERVED),
        );

        let resp = self
            .client
            .get(&url)
            .query(&query)
            .timeout(TRACKER_TIMEOUT)
            .send()
            .await?;

        if !resp.status().is_success() {
            log::warn!("Tracker {} replied with status {}", self.url, resp.status());
            return Ok(Response::default());
        }

        let body = resp.bytes().await?;
        parse_response(&body)
    }
}

/// Decodes an announce reply body.
///
/// The reply must be a bencoded dictionary with a `peers` key, either in
/// compact form (a byte string of 6-byte runs) or in verbose form (a list
/// of dictionaries with `ip` and `port`).
pub fn parse_response(body: &[u8]) -> Result<Response> {
    let root = bencode::decode(body)?;
    if root.as_dict().is_none() {
        return Err(TrackerError::NotADictionary);
    }

    if let Some(reason) = root.lookup(b"failure reason") {
        log::warn!(
            "Tracker refused the announce: {}",
            reason.as_str().unwrap_or("<unreadable reason>")
        );
        return Ok(Response::default());
    }

    let interval = match root.lookup(b"interval") {
        Some(value) => {
            let secs = value.as_int().ok_or(TrackerError::WrongType("interval"))?;
            Some(Duration::from_secs(secs.max(0) as u64))
        }
        None => None,
    };

    let peers = match root.lookup(b"peers") {
        Some(Value::Bytes(compact)) => parse_compact_peers(compact)?,
        Some(Value::List(entries)) => parse_peer_list(entries)?,
        Some(_) => return Err(TrackerError::WrongType("peers")),
        None => return Err(TrackerError::MissingKey("peers")),
    };

    Ok(Response { interval, peers })
}

/// Each non-overlapping 6-byte run is 4 bytes of IPv4 and a big-endian
/// port, both in network byte order.
fn parse_compact_peers(mut compact: &[u8]) -> Result<Vec<Peer>> {
    if compact.len() % COMPACT_ENTRY_LEN != 0 {
        return Err(TrackerError::MalformedCompactPeers(compact.len()));
    }

    let mut peers = Vec::with_capacity(compact.len() / COMPACT_ENTRY_LEN);
    while compact.has_remaining() {
        let ip = Ipv4Addr::from(compact.get_u32());
        let port = compact.get_u16();
        peers.push(Peer::new(SocketAddr::new(IpAddr::V4(ip), port)));
    }
    Ok(peers)
}

/// The verbose form: one dictionary per peer with string keys `ip` and
/// `port`. A missing key discards the whole round.
fn parse_peer_list(entries: &[Value]) -> Result<Vec<Peer>> {
    let mut peers = Vec::with_capacity(entries.len());
    for entry in entries {
        let ip = match entry.lookup(b"ip") {
            Some(value) => value
                .as_str()
                .and_then(|ip| ip.parse::<IpAddr>().ok())
                .ok_or(TrackerError::WrongType("ip"))?,
            None => return Err(TrackerError::MissingKey("ip")),
        };
        let port = match entry.lookup(b"port") {
            Some(value) => {
                let port = value.as_int().ok_or(TrackerError::WrongType("port"))?;
                u16::try_from(port).map_err(|_| TrackerError::WrongType("port"))?
            }
            None => return Err(TrackerError::MissingKey("port")),
        };
        peers.push(Peer::new(SocketAddr::new(ip, port)));
    }
    Ok(peers)
}
