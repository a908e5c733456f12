use std::net::{IpAddr, Ipv4Addr, SocketAddr};

pub mod codec;
pub mod session;

pub use session::PeerSession;

/// A peer address: produced by the tracker client, consumed by session
/// workers pulling from the shared queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Peer {
    pub addr: SocketAddr,
}

impl Peer {
    /// The sentinel pushed onto the work queue once per worker at
    /// shutdown, so a worker blocked on the queue wakes and exits instead
    /// of hanging forever. Never a routable address.
    pub const SHUTDOWN: Peer = Peer {
        addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
    };

    pub fn new(addr: SocketAddr) -> Self {
        Peer { addr }
    }

    pub fn is_shutdown(&self) -> bool {
        *self == Self::SHUTDOWN
    }
}

impl From<SocketAddr> for Peer {
    fn from(addr: SocketAddr) -> Self {
        Peer { addr }
    }
}
