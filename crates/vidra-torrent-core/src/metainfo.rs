//! Parsed `.torrent` descriptors and the infohash identity type.

use std::fmt;

use lava_torrent::torrent::v1::Torrent;

use crate::error::{EngineError, EngineResult};

/// 20-byte SHA-1 of the bencoded `info` dict, held as lowercase 40-hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InfoHash(String);

impl InfoHash {
    /// Validate and normalize a 40-hex infohash string.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidInfoHash`] for anything that is not 40
    /// hex characters.
    pub fn parse(value: &str) -> EngineResult<Self> {
        let normalized = value.to_ascii_lowercase();
        if normalized.len() == 40 && normalized.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(normalized))
        } else {
            Err(EngineError::InvalidInfoHash {
                value: value.to_string(),
            })
        }
    }

    /// Borrow the hex form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One file described by a metainfo document.
#[derive(Debug, Clone)]
pub struct MetainfoFile {
    /// Display path, top-level name included for multi-file payloads.
    pub display_path: String,
    /// File size in bytes.
    pub length: u64,
}

/// A decoded `.torrent` document plus the raw bytes it came from.
pub struct Metainfo {
    torrent: Torrent,
    raw: Vec<u8>,
}

impl Metainfo {
    /// Decode metainfo bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Metainfo`] when the bytes are not a valid
    /// bencoded v1 torrent.
    pub fn parse(bytes: &[u8]) -> EngineResult<Self> {
        let torrent =
            Torrent::read_from_bytes(bytes).map_err(|source| EngineError::Metainfo { source })?;
        Ok(Self {
            torrent,
            raw: bytes.to_vec(),
        })
    }

    /// Canonical identity of the described torrent.
    ///
    /// # Panics
    ///
    /// Never panics in practice: the decoder always yields a 40-hex digest.
    #[must_use]
    pub fn info_hash(&self) -> InfoHash {
        InfoHash::parse(&self.torrent.info_hash()).expect("decoder yields 40-hex digests")
    }

    /// Payload name from the `info` dict.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.torrent.name
    }

    /// Piece size in bytes.
    #[must_use]
    pub fn piece_length(&self) -> u64 {
        u64::try_from(self.torrent.piece_length).unwrap_or(0)
    }

    /// Total payload size in bytes.
    #[must_use]
    pub fn total_length(&self) -> u64 {
        u64::try_from(self.torrent.length).unwrap_or(0)
    }

    /// BEP-27 private flag.
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.torrent.is_private()
    }

    /// Files in metainfo order; a single-file payload yields one entry named
    /// after the torrent.
    #[must_use]
    pub fn files(&self) -> Vec<MetainfoFile> {
        self.torrent.files.as_ref().map_or_else(
            || {
                vec![MetainfoFile {
                    display_path: self.torrent.name.clone(),
                    length: self.total_length(),
                }]
            },
            |files| {
                files
                    .iter()
                    .map(|file| MetainfoFile {
                        display_path: format!(
                            "{}/{}",
                            self.torrent.name,
                            file.path.display()
                        ),
                        length: u64::try_from(file.length).unwrap_or(0),
                    })
                    .collect()
            },
        )
    }

    /// The raw descriptor bytes, as read from disk or the wire.
    #[must_use]
    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw
    }
}

impl fmt::Debug for Metainfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metainfo")
            .field("name", &self.torrent.name)
            .field("info_hash", &self.torrent.info_hash())
            .field("piece_length", &self.torrent.piece_length)
            .finish_non_exhaustive()
    }
}
