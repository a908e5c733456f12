//! Set of module Error
pub mod bencode;
pub mod engine;
pub mod metainfo;
pub mod peer;
pub mod torrent;
pub mod tracker;
