use crate::{PeerId, Sha1Hash};

/// Parameters for one announce request.
///
/// [`Key meanings`](http://bittorrent.org/beps/bep_0003.html).
pub struct Announce {
    /// Identifies the content towards the tracker.
    pub info_hash: Sha1Hash,
    /// Our own identity in the swarm.
    pub peer_id: PeerId,

    /// The port we claim to listen on.
    pub port: u16,

    /// Number of bytes downloaded so far.
    pub downloaded: u64,
    /// Number of bytes uploaded so far.
    pub uploaded: u64,
    /// Number of bytes left to download.
    pub left: u64,

    /// How many peers we would like; trackers pick a default (usually
    /// between 30 and 50) when omitted.
    pub peer_count: Option<usize>,
}
