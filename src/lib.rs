pub mod bencode;
pub mod blockinfo;
pub mod engine;
pub mod error;
pub mod metainfo;
pub mod peer;
pub mod piece;
pub mod torrent;
pub mod tracker;

mod define;
pub use define::*;
