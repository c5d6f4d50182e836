use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{StoreError, StoreResult};

/// Flush/sync strategy for appends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` after every append.
    #[default]
    EveryWrite,
    /// Flush to the OS and rely on page-cache writeback.
    OsDefault,
}

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: u64 = 8;

/// Serialize `record` into one length- and CRC-prefixed frame.
pub(crate) fn encode_frame<T: Serialize>(record: &T) -> StoreResult<Vec<u8>> {
    let payload =
        bincode::serialize(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let length = u32::try_from(payload.len()).map_err(|_| StoreError::Serialization(
        format!("record of {} bytes exceeds frame limit", payload.len()),
    ))?;
    let crc = crc32fast::hash(&payload);

    let mut frame = Vec::with_capacity(HEADER_SIZE as usize + payload.len());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&crc.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Length of the intact frame at the start of `bytes`, if there is one.
fn intact_frame_len(bytes: &[u8]) -> Option<usize> {
    let header = bytes.get(..HEADER_SIZE as usize)?;
    let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if length == 0 {
        return None;
    }
    let payload = bytes.get(HEADER_SIZE as usize..HEADER_SIZE as usize + length)?;
    (crc32fast::hash(payload) == crc).then_some(HEADER_SIZE as usize + length)
}

/// Decode a buffer holding exactly one frame.
pub(crate) fn decode_frame<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    match intact_frame_len(bytes) {
        Some(len) if len == bytes.len() => bincode::deserialize(&bytes[HEADER_SIZE as usize..])
            .map_err(|e| StoreError::Serialization(e.to_string())),
        _ => Err(StoreError::Corrupt {
            reason: format!("{} bytes do not hold one intact frame", bytes.len()),
        }),
    }
}

struct LogWriter {
    writer: BufWriter<File>,
    offset: u64,
    /// Set when a failed append could not be rolled back.
    poisoned: bool,
}

impl LogWriter {
    fn write_frame(&mut self, frame: &[u8], sync_mode: SyncMode) -> io::Result<()> {
        self.writer.write_all(frame)?;
        self.writer.flush()?;
        if sync_mode == SyncMode::EveryWrite {
            self.writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Cut the file back to the last committed frame and drop anything
    /// still buffered, so a failed append leaves no trace.
    fn roll_back(&mut self) -> io::Result<()> {
        let file = self.writer.get_ref().try_clone()?;
        file.set_len(self.offset)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        let (_file, _unflushed) = stale.into_parts();
        Ok(())
    }
}

/// Append-only, length- and CRC-framed record log.
///
/// On-disk format, repeated:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized record)]
/// ```
///
/// A frame that fails its CRC is skipped on replay. A frame cut short by a
/// crash ends replay. [`FramedLog::open`] truncates it away only when no
/// intact frame follows it; otherwise the log is refused as corrupt.
pub struct FramedLog<T> {
    path: PathBuf,
    writer: Mutex<LogWriter>,
    sync_mode: SyncMode,
    _record: PhantomData<fn() -> T>,
}

/// Outcome of scanning a log file.
struct Replay<T> {
    records: Vec<T>,
    /// End of the last complete frame.
    valid_len: u64,
    skipped: usize,
}

impl<T: Serialize + DeserializeOwned> FramedLog<T> {
    /// Open (or create) the log at `path` and replay every intact record.
    pub fn open(path: &Path, sync_mode: SyncMode) -> StoreResult<(Self, Vec<T>)> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let file_len = file.metadata()?.len();

        let replay = Self::scan(path)?;
        if replay.valid_len < file_len {
            if let Some(at) = Self::intact_frame_after(path, replay.valid_len)? {
                error!(
                    path = %path.display(),
                    bad_frame = replay.valid_len,
                    intact_frame = at,
                    "unreadable frame followed by intact data"
                );
                return Err(StoreError::Corrupt {
                    reason: format!(
                        "{}: unreadable frame at offset {} precedes an intact frame at offset {}",
                        path.display(),
                        replay.valid_len,
                        at
                    ),
                });
            }
            warn!(
                path = %path.display(),
                valid_len = replay.valid_len,
                file_len,
                "torn tail in log; truncating"
            );
            file.set_len(replay.valid_len)?;
        }
        if replay.skipped > 0 {
            warn!(path = %path.display(), skipped = replay.skipped, "skipped corrupt frames");
        }

        let log = Self {
            path: path.to_path_buf(),
            writer: Mutex::new(LogWriter {
                writer: BufWriter::new(file),
                offset: replay.valid_len,
                poisoned: false,
            }),
            sync_mode,
            _record: PhantomData,
        };
        debug!(path = %path.display(), records = replay.records.len(), "log opened");
        Ok((log, replay.records))
    }

    /// Append one record. Returns the byte offset of its frame.
    ///
    /// On failure the file is cut back to the previous frame boundary. If
    /// that also fails the log refuses further appends.
    pub fn append(&self, record: &T) -> StoreResult<u64> {
        let frame = encode_frame(record)?;

        let mut w = self
            .writer
            .lock()
            .map_err(|_| StoreError::Unavailable("log writer poisoned".into()))?;
        if w.poisoned {
            return Err(StoreError::Unavailable(format!(
                "{}: log is not at a frame boundary after a failed append",
                self.path.display()
            )));
        }
        let frame_offset = w.offset;

        if let Err(e) = w.write_frame(&frame, self.sync_mode) {
            if let Err(rollback) = w.roll_back() {
                error!(path = %self.path.display(), error = %rollback, "log rollback failed");
                w.poisoned = true;
            } else {
                warn!(path = %self.path.display(), offset = frame_offset, error = %e, "append failed; rolled back");
            }
            return Err(e.into());
        }

        w.offset += frame.len() as u64;
        debug!(offset = frame_offset, len = frame.len(), "log append");
        Ok(frame_offset)
    }

    /// Re-read every intact record from disk.
    pub fn replay(&self) -> StoreResult<Vec<T>> {
        Ok(Self::scan(&self.path)?.records)
    }

    /// Current write offset.
    pub fn offset(&self) -> u64 {
        self.writer.lock().map(|w| w.offset).unwrap_or(0)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset of the first intact frame starting after `from`, if any.
    fn intact_frame_after(path: &Path, from: u64) -> StoreResult<Option<u64>> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(from))?;
        let mut tail = Vec::new();
        file.read_to_end(&mut tail)?;
        Ok((1..tail.len())
            .find(|&at| intact_frame_len(&tail[at..]).is_some())
            .map(|at| from + at as u64))
    }

    fn scan(path: &Path) -> StoreResult<Replay<T>> {
        let mut file = BufReader::new(File::open(path)?);
        let file_len = file.get_ref().metadata()?.len();
        let mut records = Vec::new();
        let mut offset: u64 = 0;
        let mut skipped = 0;

        while offset + HEADER_SIZE <= file_len {
            file.seek(SeekFrom::Start(offset))?;

            let mut header = [0u8; HEADER_SIZE as usize];
            match file.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

            let frame_end = offset + HEADER_SIZE + u64::from(length);
            if length == 0 || frame_end > file_len {
                warn!(offset, length, file_len, "incomplete frame; stopping replay");
                break;
            }

            let mut payload = vec![0u8; length as usize];
            match file.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!(offset, "truncated frame; stopping replay");
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            let actual_crc = crc32fast::hash(&payload);
            if actual_crc != expected_crc {
                warn!(offset, expected = expected_crc, actual = actual_crc, "CRC mismatch; skipping frame");
                skipped += 1;
                offset = frame_end;
                continue;
            }

            match bincode::deserialize::<T>(&payload) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(offset, error = %e, "undecodable frame; skipping");
                    skipped += 1;
                }
            }
            offset = frame_end;
        }

        Ok(Replay {
            records,
            valid_len: offset,
            skipped,
        })
    }
}
