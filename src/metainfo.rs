use std::fmt;

use sha1::{Digest, Sha1};
use url::Url;

use crate::bencode::{self, Value};
use crate::error::metainfo::{MetainfoError, Result};
use crate::Sha1Hash;

/// The meta info from a torrent file.
///
/// Derived once from the decoded descriptor, read-only thereafter.
#[derive(Clone)]
pub struct Metainfo {
    /// Torrent name, which doubles as the download file name.
    pub name: String,
    /// 20 byte SHA-1 of the re-encoded `info` dictionary.
    ///
    /// This is how trackers and peers identify the content, so it is
    /// computed from the exact canonical bytes of the sub-dictionary and
    /// never from the whole descriptor.
    pub info_hash: Sha1Hash,
    /// One expected SHA-1 digest per piece, in piece order.
    pub piece_hashes: Vec<Sha1Hash>,
    /// The length of each piece except possibly the last.
    pub piece_len: u32,
    /// The length of the single target file, in bytes.
    pub total_len: u64,
    /// The trackers that we can announce to, in descriptor order.
    pub trackers: Vec<Url>,
}

impl fmt::Debug for Metainfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metainfo")
            .field("name", &self.name)
            .field("info_hash", &hex::encode(self.info_hash))
            .field("pieces", &self.piece_hashes.len())
            .field("piece_len", &self.piece_len)
            .field("total_len", &self.total_len)
            .field("trackers", &self.trackers)
            .finish()
    }
}

impl Metainfo {
    /// Parses a torrent descriptor buffer into a [`Metainfo`].
    ///
    /// Rules enforced here, beyond bencode well-formedness:
    /// - `announce` (or an `announce-list` entry) must yield an HTTP(S) URL.
    /// - `info.pieces` must be a multiple of 20 bytes and non-empty.
    /// - `info.length` must be present and positive (single file only).
    /// - `info.name` must be a plain file name without path separators.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let root = bencode::decode(bytes)?;
        let root = root.as_dict().ok_or(MetainfoError::WrongType("root"))?;

        let info = root.get(&b"info"[..]).ok_or(MetainfoError::MissingKey("info"))?;
        if info.as_dict().is_none() {
            return Err(MetainfoError::WrongType("info"));
        }

        // the name becomes a file name under the caller's output
        // directory, so it must not traverse out of it
        let name = required_str(info, "name")?.to_owned();
        if name.is_empty() || name == ".." || name.contains(['/', '\\']) {
            return Err(MetainfoError::InvalidName);
        }

        let total_len = match info.lookup(b"length") {
            Some(Value::Integer(len)) if *len > 0 => *len as u64,
            Some(Value::Integer(_)) => return Err(MetainfoError::InvalidLength),
            Some(_) => return Err(MetainfoError::WrongType("length")),
            None => return Err(MetainfoError::MissingKey("length")),
        };

        let piece_len = match info.lookup(b"piece length") {
            Some(Value::Integer(len)) if *len > 0 => *len as u32,
            Some(Value::Integer(_)) => return Err(MetainfoError::InvalidLength),
            Some(_) => return Err(MetainfoError::WrongType("piece length")),
            None => return Err(MetainfoError::MissingKey("piece length")),
        };

        // the pieces field is a concatenation of 20 byte SHA-1 hashes, so
        // it must be a non-empty multiple of 20
        let pieces = required_bytes(info, "pieces")?;
        if pieces.is_empty() || pieces.len() % 20 != 0 {
            return Err(MetainfoError::InvalidPieces(pieces.len()));
        }
        let piece_hashes = pieces
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let trackers = collect_trackers(root)?;
        if trackers.is_empty() {
            log::warn!("No HTTP trackers in metainfo");
            return Err(MetainfoError::NoTrackers);
        }

        // hash the exact canonical bytes of the info sub-dictionary
        let digest = Sha1::digest(info.encode());
        let mut info_hash = [0; 20];
        info_hash.copy_from_slice(&digest);

        Ok(Metainfo {
            name,
            info_hash,
            piece_hashes,
            piece_len,
            total_len,
            trackers,
        })
    }

    /// The number of pieces the file is split into.
    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }
}

/// Collects announce URLs from `announce-list` if present, the plain
/// `announce` key otherwise. Non-HTTP trackers (e.g. UDP) are skipped.
fn collect_trackers(root: &std::collections::BTreeMap<Vec<u8>, Value>) -> Result<Vec<Url>> {
    let mut trackers = Vec::new();

    if let Some(tiers) = root.get(&b"announce-list"[..]) {
        let tiers = tiers
            .as_list()
            .ok_or(MetainfoError::WrongType("announce-list"))?;
        for tier in tiers {
            let tier = tier
                .as_list()
                .ok_or(MetainfoError::WrongType("announce-list"))?;
            for tracker in tier {
                let tracker = tracker
                    .as_str()
                    .ok_or(MetainfoError::WrongType("announce-list"))?;
                let url = Url::parse(tracker)?;
                if url.scheme() == "http" || url.scheme() == "https" {
                    trackers.push(url);
                }
            }
        }
    }

    if trackers.is_empty() {
        let announce = match root.get(&b"announce"[..]) {
            Some(value) => value
                .as_str()
                .ok_or(MetainfoError::WrongType("announce"))?,
            None => return Err(MetainfoError::MissingKey("announce")),
        };
        let url = Url::parse(announce)?;
        if url.scheme() == "http" || url.scheme() == "https" {
            trackers.push(url);
        }
    }

    Ok(trackers)
}

fn required_str<'v>(dict: &'v Value, key: &'static str) -> Result<&'v str> {
    match dict.lookup(key.as_bytes()) {
        Some(value) => value.as_str().ok_or(MetainfoError::WrongType(key)),
        None => Err(MetainfoError::MissingKey(key)),
    }
}

fn required_bytes<'v>(dict: &'v Value, key: &'static str) -> Result<&'v [u8]> {
    match dict.lookup(key.as_bytes()) {
        Some(value) => value.as_bytes().ok_or(MetainfoError::WrongType(key)),
        None => Err(MetainfoError::MissingKey(key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(comment: Option<&str>, piece_len: i64, pieces: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"d8:announce28:http://tracker.test/announce");
        if let Some(comment) = comment {
            out.extend_from_slice(format!("7:comment{}:{}", comment.len(), comment).as_bytes());
        }
        out.extend_from_slice(b"4:infod6:lengthi425984e4:name9:river.iso12:piece length");
        out.extend_from_slice(format!("i{piece_len}e").as_bytes());
        out.extend_from_slice(format!("6:pieces{}:", pieces.len()).as_bytes());
        out.extend_from_slice(pieces);
        out.extend_from_slice(b"ee");
        out
    }

    #[test]
    fn parses_a_single_file_descriptor() {
        let pieces = [0x11; 40];
        let meta = Metainfo::from_bytes(&descriptor(None, 262144, &pieces)).unwrap();

        assert_eq!(meta.name, "river.iso");
        assert_eq!(meta.total_len, 425984);
        assert_eq!(meta.piece_len, 262144);
        assert_eq!(meta.piece_count(), 2);
        assert_eq!(meta.piece_hashes[0], [0x11; 20]);
        assert_eq!(meta.trackers.len(), 1);
        assert_eq!(meta.trackers[0].as_str(), "http://tracker.test/announce");
    }

    #[test]
    fn info_hash_is_deterministic() {
        let bytes = descriptor(None, 262144, &[0x11; 40]);
        let first = Metainfo::from_bytes(&bytes).unwrap();
        let second = Metainfo::from_bytes(&bytes).unwrap();
        assert_eq!(first.info_hash, second.info_hash);
    }

    #[test]
    fn info_hash_covers_only_the_info_dictionary() {
        let base = Metainfo::from_bytes(&descriptor(None, 262144, &[0x11; 40])).unwrap();

        // a change outside `info` leaves the hash alone
        let commented =
            Metainfo::from_bytes(&descriptor(Some("fresh"), 262144, &[0x11; 40])).unwrap();
        assert_eq!(base.info_hash, commented.info_hash);

        // any change inside `info` moves it
        let other_len = Metainfo::from_bytes(&descriptor(None, 131072, &[0x11; 40])).unwrap();
        assert_ne!(base.info_hash, other_len.info_hash);
        let mut pieces = [0x11; 40];
        pieces[3] ^= 1;
        let other_pieces = Metainfo::from_bytes(&descriptor(None, 262144, &pieces)).unwrap();
        assert_ne!(base.info_hash, other_pieces.info_hash);
    }

    #[test]
    fn rejects_pieces_not_multiple_of_twenty() {
        let err = Metainfo::from_bytes(&descriptor(None, 262144, &[0x11; 30])).unwrap_err();
        assert!(matches!(err, MetainfoError::InvalidPieces(30)));
    }

    #[test]
    fn missing_key_is_distinct_from_a_decode_error() {
        // well-formed bencode, but not a torrent descriptor
        let err = Metainfo::from_bytes(b"d8:announce28:http://tracker.test/announce4:infodee")
            .unwrap_err();
        assert!(matches!(err, MetainfoError::MissingKey("name")));

        let err = Metainfo::from_bytes(b"d4:info").unwrap_err();
        assert!(matches!(err, MetainfoError::Bencode(_)));
    }

    #[test]
    fn rejects_a_name_with_path_separators() {
        for name in ["../evil", "a/b", r"a\b", ".."] {
            let mut out = Vec::new();
            out.extend_from_slice(b"d8:announce28:http://tracker.test/announce");
            out.extend_from_slice(b"4:infod6:lengthi16384e4:name");
            out.extend_from_slice(format!("{}:{}", name.len(), name).as_bytes());
            out.extend_from_slice(b"12:piece lengthi16384e6:pieces20:");
            out.extend_from_slice(&[0x22; 20]);
            out.extend_from_slice(b"ee");

            let err = Metainfo::from_bytes(&out).unwrap_err();
            assert!(matches!(err, MetainfoError::InvalidName), "name {name:?}");
        }
    }

    #[test]
    fn announce_list_wins_over_announce() {
        let mut out = Vec::new();
        out.extend_from_slice(b"d8:announce28:http://tracker.test/announce");
        out.extend_from_slice(
            b"13:announce-listll31:http://backup.test/announce.php25:udp://noise.test/announceee",
        );
        out.extend_from_slice(b"4:infod6:lengthi16384e4:name1:a12:piece lengthi16384e6:pieces20:");
        out.extend_from_slice(&[0x22; 20]);
        out.extend_from_slice(b"ee");

        let meta = Metainfo::from_bytes(&out).unwrap();
        // the udp entry is skipped, the http one kept
        assert_eq!(meta.trackers.len(), 1);
        assert_eq!(
            meta.trackers[0].as_str(),
            "http://backup.test/announce.php"
        );
    }
}
