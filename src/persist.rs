//! Versioned session snapshots and their storage.
//!
//! A snapshot captures everything a suspended session needs to resume: the
//! flag register bytes, the navigation stack (current symbol on top), and
//! the cache contents. The serialized form carries a single leading version
//! byte; the rest is the [`BinaryCodec`](vise_derive::BinaryCodec) encoding
//! of the snapshot struct.

use crate::encoding::{Decode, Encode};
use crate::errors::EngineError;
use std::fs;
use std::path::PathBuf;
use vise_derive::BinaryCodec;

/// Current snapshot format version.
const SNAPSHOT_VERSION: u8 = 1;

/// One cached value.
#[derive(Debug, Clone, PartialEq, Eq, BinaryCodec)]
pub struct SnapshotEntry {
    pub sym: String,
    pub value: Vec<u8>,
}

/// Suspended-session state: flags, navigation and cache.
#[derive(Debug, Clone, PartialEq, Eq, Default, BinaryCodec)]
pub struct Snapshot {
    /// Raw flag register bytes.
    pub flags: Vec<u8>,
    /// Navigation stack, bottom first, with the current symbol as the last
    /// element.
    pub stack: Vec<String>,
    /// Cache entries.
    pub cache: Vec<SnapshotEntry>,
}

impl Snapshot {
    /// Serializes with the leading version byte.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![SNAPSHOT_VERSION];
        self.encode(&mut out);
        out
    }

    /// Deserializes, validating version and rejecting trailing bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, EngineError> {
        let (version, rest) = data.split_first().ok_or(EngineError::Snapshot {
            reason: "empty payload",
        })?;
        if *version != SNAPSHOT_VERSION {
            return Err(EngineError::Snapshot {
                reason: "unsupported version",
            });
        }
        Snapshot::from_bytes_inner(rest)
    }

    fn from_bytes_inner(data: &[u8]) -> Result<Self, EngineError> {
        <Snapshot as Decode>::from_bytes(data).map_err(|_| EngineError::Snapshot {
            reason: "malformed payload",
        })
    }
}

/// Stores and retrieves snapshots keyed by session id.
pub trait Persister {
    fn save(&mut self, session_id: &str, snapshot: &Snapshot) -> Result<(), EngineError>;
    fn load(&self, session_id: &str) -> Result<Option<Snapshot>, EngineError>;
}

/// Filesystem persister: one `<session_id>.state` file per session.
pub struct FsPersister {
    dir: PathBuf,
}

impl FsPersister {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.state", session_id))
    }
}

impl Persister for FsPersister {
    fn save(&mut self, session_id: &str, snapshot: &Snapshot) -> Result<(), EngineError> {
        let path = self.path_for(session_id);
        fs::write(&path, snapshot.to_bytes()).map_err(|e| EngineError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    fn load(&self, session_id: &str) -> Result<Option<Snapshot>, EngineError> {
        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path).map_err(|e| EngineError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Snapshot::from_bytes(&data).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Snapshot {
        Snapshot {
            flags: vec![0b0000_0010, 0b0000_0001],
            stack: vec!["root".to_string(), "profile".to_string()],
            cache: vec![
                SnapshotEntry {
                    sym: "fetch_x".to_string(),
                    value: b"hello".to_vec(),
                },
                SnapshotEntry {
                    sym: "name".to_string(),
                    value: vec![],
                },
            ],
        }
    }

    #[test]
    fn round_trip() {
        let snap = sample();
        let bytes = snap.to_bytes();
        assert_eq!(bytes[0], SNAPSHOT_VERSION);
        assert_eq!(Snapshot::from_bytes(&bytes).unwrap(), snap);
    }

    #[test]
    fn empty_snapshot_round_trip() {
        let snap = Snapshot::default();
        assert_eq!(Snapshot::from_bytes(&snap.to_bytes()).unwrap(), snap);
    }

    #[test]
    fn version_mismatch_rejected() {
        let mut bytes = sample().to_bytes();
        bytes[0] = 99;
        assert!(matches!(
            Snapshot::from_bytes(&bytes),
            Err(EngineError::Snapshot {
                reason: "unsupported version",
            })
        ));
    }

    #[test]
    fn empty_payload_rejected() {
        assert!(matches!(
            Snapshot::from_bytes(&[]),
            Err(EngineError::Snapshot {
                reason: "empty payload",
            })
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = sample().to_bytes();
        bytes.push(0x00);
        assert!(matches!(
            Snapshot::from_bytes(&bytes),
            Err(EngineError::Snapshot {
                reason: "malformed payload",
            })
        ));
    }

    #[test]
    fn fs_persister_round_trip() {
        let dir = std::env::temp_dir().join(format!("vise-persist-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let mut persister = FsPersister::new(dir.clone());
        assert!(persister.load("s1").unwrap().is_none());

        let snap = sample();
        persister.save("s1", &snap).unwrap();
        assert_eq!(persister.load("s1").unwrap(), Some(snap));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn truncated_payload_rejected() {
        let bytes = sample().to_bytes();
        assert!(Snapshot::from_bytes(&bytes[..bytes.len() - 3]).is_err());
    }
}
