use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use vigil_types::ChainHead;

use crate::error::StoreResult;
use crate::wal::{decode_frame, encode_frame, SyncMode};

/// The durable counter record: the chain head, stored apart from the
/// entries it counts.
///
/// Held as a single CRC frame and replaced whole by write-then-rename, so
/// a reader sees either the old head or the new one.
pub(crate) struct CounterFile {
    path: PathBuf,
    sync_mode: SyncMode,
}

impl CounterFile {
    pub fn new(path: PathBuf, sync_mode: SyncMode) -> Self {
        Self { path, sync_mode }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no counter record was ever written.
    pub fn load(&self) -> StoreResult<Option<ChainHead>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        decode_frame(&bytes).map(Some)
    }

    pub fn store(&self, head: &ChainHead) -> StoreResult<()> {
        let frame = encode_frame(head)?;
        let staged = self.path.with_extension("tmp");
        {
            let mut file = File::create(&staged)?;
            file.write_all(&frame)?;
            if self.sync_mode == SyncMode::EveryWrite {
                file.sync_data()?;
            }
        }
        fs::rename(&staged, &self.path)?;
        if self.sync_mode == SyncMode::EveryWrite {
            if let Some(dir) = self.path.parent() {
                File::open(dir)?.sync_all()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use vigil_types::EntryHash;

    use super::*;
    use crate::error::StoreError;

    #[test]
    fn missing_file_is_no_head() {
        let dir = tempfile::tempdir().unwrap();
        let counter = CounterFile::new(dir.path().join("ledger.head"), SyncMode::EveryWrite);
        assert_eq!(counter.load().unwrap(), None);
    }

    #[test]
    fn store_replaces_previous_head() {
        let dir = tempfile::tempdir().unwrap();
        let counter = CounterFile::new(dir.path().join("ledger.head"), SyncMode::EveryWrite);
        counter.store(&ChainHead::new(1, EntryHash::from_bytes([1; 32]))).unwrap();
        counter.store(&ChainHead::new(2, EntryHash::from_bytes([2; 32]))).unwrap();
        assert_eq!(
            counter.load().unwrap(),
            Some(ChainHead::new(2, EntryHash::from_bytes([2; 32])))
        );
        assert!(!dir.path().join("ledger.tmp").exists());
    }

    #[test]
    fn damaged_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let counter = CounterFile::new(dir.path().join("ledger.head"), SyncMode::OsDefault);
        counter.store(&ChainHead::new(4, EntryHash::from_bytes([4; 32]))).unwrap();
        let mut bytes = fs::read(counter.path()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(counter.path(), bytes).unwrap();
        assert!(matches!(counter.load(), Err(StoreError::Corrupt { .. })));
    }
}
