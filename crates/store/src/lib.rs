//! Durable identity-to-port map for the mux server.
//!
//! One JSON object per file: URL-safe base64 of the raw client identity
//! mapped to the allocated tunnel port. Every mutation rewrites the file
//! through a temp file in the same directory, fsyncs it, and renames it
//! over the old copy, so a killed process observes either the previous or
//! the new map, never a torn one. Concurrent access by multiple server
//! processes is not supported.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("identity store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("identity store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Printable store key for a raw identity.
pub fn ident_key(ident: &[u8]) -> String {
    URL_SAFE.encode(ident)
}

/// File-backed map from identity key to tunnel port.
#[derive(Debug)]
pub struct IdentStore {
    path: PathBuf,
    map: BTreeMap<String, u16>,
}

impl IdentStore {
    /// Open the store at `path`. A missing file is an empty store; the
    /// file is only created on the first insert.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let map = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), entries = map.len(), "identity store opened");
        Ok(Self { path, map })
    }

    pub fn get(&self, key: &str) -> Option<u16> {
        self.map.get(key).copied()
    }

    /// Record `key -> port` and flush to stable storage before returning.
    pub fn insert(&mut self, key: &str, port: u16) -> Result<()> {
        self.map.insert(key.to_owned(), port);
        self.sync()
    }

    /// Ports currently assigned, in ascending key order.
    pub fn ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.map.values().copied()
    }

    /// All `(identity key, port)` pairs, sorted by key.
    pub fn entries(&self) -> impl Iterator<Item = (&str, u16)> {
        self.map.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn sync(&self) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            serde_json::to_writer_pretty(&mut file, &self.map)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        // The rename itself must survive a crash, which requires syncing
        // the containing directory.
        #[cfg(unix)]
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::File::open(dir)?.sync_all()?;
            }
        }
        Ok(())
    }
}
