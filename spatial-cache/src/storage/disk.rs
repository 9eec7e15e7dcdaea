//! Append-only file storage for index nodes.
//!
//! File layout:
//! - Header: magic (u32 LE) and version (u32 LE)
//! - Frames: body length (u32 LE), CRC32C of the body (u32 LE), then a
//!   bincode-encoded [`LogRecord`]
//!
//! The live view is an in-memory table of frame offsets rebuilt by replaying
//! the log on open. Values are read back from disk one frame at a time.
//!
//! Overwritten and removed frames stay in the file until compaction. The log
//! compacts itself once superseded bytes exceed both the live bytes and the
//! compaction threshold.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::NodeStorage;
use crate::constants::{COMPACTION_MIN_GARBAGE, FRAME_HEADER_SIZE, HEADER_SIZE, MAGIC, VERSION};
use crate::errors::{CacheError, CacheResult};
use crate::node::NodeId;

#[derive(Debug, Serialize, Deserialize)]
enum LogRecord {
    Put { key: NodeId, value: Vec<u8> },
    Remove { key: NodeId },
    Metadata { value: Vec<u8> },
    Clear,
}

/// Location of a frame in the log.
#[derive(Clone, Copy, Debug)]
struct Slot {
    offset: u64,
    len: u32,
}

impl Slot {
    fn frame_len(&self) -> u64 {
        FRAME_HEADER_SIZE + self.len as u64
    }
}

/// Outcome of [`FileStorage::compact`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompactionStats {
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub live_records: usize,
}

/// Persistent node storage in a single append-only log file.
pub struct FileStorage {
    file: RwLock<Option<File>>,
    path: PathBuf,
    slots: HashMap<NodeId, Slot>,
    metadata: Option<Slot>,
    end: u64,
    /// Bytes of the header and of every frame the live view points at.
    live: u64,
    compaction_threshold: u64,
}

impl FileStorage {
    /// Creates a new, empty log, truncating any existing file.
    pub fn create(path: &Path) -> CacheResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&header_bytes())?;

        debug!("Created node store at {}", path.display());
        Ok(Self {
            file: RwLock::new(Some(file)),
            path: path.to_path_buf(),
            slots: HashMap::new(),
            metadata: None,
            end: HEADER_SIZE,
            live: HEADER_SIZE,
            compaction_threshold: COMPACTION_MIN_GARBAGE,
        })
    }

    /// Opens an existing log and replays it.
    ///
    /// A torn or corrupt tail (partial frame, checksum mismatch, undecodable
    /// record) is truncated away; everything before it is kept.
    pub fn open(path: &Path) -> CacheResult<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut storage = Self {
            file: RwLock::new(None),
            path: path.to_path_buf(),
            slots: HashMap::new(),
            metadata: None,
            end: HEADER_SIZE,
            live: HEADER_SIZE,
            compaction_threshold: COMPACTION_MIN_GARBAGE,
        };
        storage.replay(&mut file)?;
        *storage.file.write() = Some(file);

        info!(
            "Opened node store at {} with {} nodes",
            path.display(),
            storage.slots.len()
        );
        Ok(storage)
    }

    /// Opens the log at `path`, creating it when absent.
    pub fn open_or_create(path: &Path) -> CacheResult<Self> {
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sets how many superseded bytes the log may hold before it compacts
    /// itself.
    pub fn with_compaction_threshold(mut self, bytes: u64) -> Self {
        self.compaction_threshold = bytes;
        self
    }

    /// Current length of the log in bytes.
    pub fn file_size(&self) -> u64 {
        self.end
    }

    /// Bytes held by overwritten or removed frames.
    pub fn garbage_bytes(&self) -> u64 {
        self.end - self.live
    }

    /// Rewrites the log keeping only live records.
    pub fn compact(&mut self) -> CacheResult<CompactionStats> {
        let bytes_before = self.end;
        let tmp_path = self.path.with_extension("compact");

        let mut out = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        out.write_all(&header_bytes())?;

        let mut end = HEADER_SIZE;
        let mut metadata = None;
        if let Some(slot) = self.metadata {
            let frame = encode_frame(&LogRecord::Metadata {
                value: self.read_value(slot)?,
            })?;
            out.write_all(&frame)?;
            metadata = Some(Slot {
                offset: end,
                len: (frame.len() as u64 - FRAME_HEADER_SIZE) as u32,
            });
            end += frame.len() as u64;
        }

        let mut slots = HashMap::with_capacity(self.slots.len());
        for (id, slot) in &self.slots {
            let frame = encode_frame(&LogRecord::Put {
                key: id.clone(),
                value: self.read_value(*slot)?,
            })?;
            out.write_all(&frame)?;
            slots.insert(
                id.clone(),
                Slot {
                    offset: end,
                    len: (frame.len() as u64 - FRAME_HEADER_SIZE) as u32,
                },
            );
            end += frame.len() as u64;
        }
        out.sync_all()?;
        drop(out);

        {
            let mut guard = self.file.write();
            *guard = None;
            fs::rename(&tmp_path, &self.path)?;
            *guard = Some(OpenOptions::new().read(true).write(true).open(&self.path)?);
        }

        self.slots = slots;
        self.metadata = metadata;
        self.end = end;
        self.live = end;

        let stats = CompactionStats {
            bytes_before,
            bytes_after: end,
            live_records: self.slots.len(),
        };
        debug!("Compacted node store {}: {:?}", self.path.display(), stats);
        Ok(stats)
    }

    /// Syncs and releases the file handle. Later operations fail with
    /// `Closed`.
    pub fn close(&mut self) -> CacheResult<()> {
        let mut guard = self.file.write();
        if let Some(file) = guard.take() {
            file.sync_all()?;
        }
        Ok(())
    }

    fn compact_if_wasteful(&mut self) -> CacheResult<()> {
        let garbage = self.garbage_bytes();
        if garbage >= self.compaction_threshold && garbage > self.live {
            info!(
                "Compacting {}: {} of {} bytes superseded",
                self.path.display(),
                garbage,
                self.end
            );
            self.compact()?;
        }
        Ok(())
    }

    fn replay(&mut self, file: &mut File) -> CacheResult<()> {
        let file_len = file.metadata()?.len();
        if file_len < HEADER_SIZE {
            return Err(CacheError::Store(format!(
                "{} is too short to be a node store",
                self.path.display()
            )));
        }

        file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&mut *file);
        let mut header = [0u8; HEADER_SIZE as usize];
        reader.read_exact(&mut header)?;
        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if magic != MAGIC {
            return Err(CacheError::Store(format!(
                "invalid magic number {:#x} in {}",
                magic,
                self.path.display()
            )));
        }
        if version != VERSION {
            return Err(CacheError::Store(format!(
                "unsupported node store version {}",
                version
            )));
        }

        let mut pos = HEADER_SIZE;
        while pos < file_len {
            let Some((record, len)) = read_frame(&mut reader, file_len - pos) else {
                break;
            };
            let slot = Slot { offset: pos, len };
            match record {
                LogRecord::Put { key, .. } => {
                    self.slots.insert(key, slot);
                }
                LogRecord::Remove { key } => {
                    self.slots.remove(&key);
                }
                LogRecord::Metadata { .. } => self.metadata = Some(slot),
                LogRecord::Clear => {
                    self.slots.clear();
                    self.metadata = None;
                }
            }
            pos += slot.frame_len();
        }
        drop(reader);

        if pos < file_len {
            warn!(
                "Truncating {} bytes of torn log tail in {}",
                file_len - pos,
                self.path.display()
            );
            file.set_len(pos)?;
        }
        self.end = pos;
        self.live = HEADER_SIZE
            + self.slots.values().map(Slot::frame_len).sum::<u64>()
            + self.metadata.map_or(0, |slot| slot.frame_len());
        Ok(())
    }

    fn append(&mut self, record: &LogRecord) -> CacheResult<Slot> {
        let frame = encode_frame(record)?;
        let mut guard = self.file.write();
        let file = guard.as_mut().ok_or(CacheError::Closed)?;
        file.seek(SeekFrom::Start(self.end))?;
        file.write_all(&frame)?;

        let slot = Slot {
            offset: self.end,
            len: (frame.len() as u64 - FRAME_HEADER_SIZE) as u32,
        };
        self.end += frame.len() as u64;
        Ok(slot)
    }

    fn read_value(&self, slot: Slot) -> CacheResult<Vec<u8>> {
        let mut buffer = vec![0u8; slot.frame_len() as usize];
        {
            let mut guard = self.file.write();
            let file = guard.as_mut().ok_or(CacheError::Closed)?;
            file.seek(SeekFrom::Start(slot.offset))?;
            file.read_exact(&mut buffer)?;
        }

        let (head, body) = buffer.split_at(FRAME_HEADER_SIZE as usize);
        let expected = u32::from_le_bytes([head[4], head[5], head[6], head[7]]);
        let actual = crc32c::crc32c(body);
        if expected != actual {
            return Err(CacheError::Store(format!(
                "checksum mismatch at offset {} (expected: {:x}, got: {:x})",
                slot.offset, expected, actual
            )));
        }

        let (record, _): (LogRecord, usize) =
            bincode::serde::decode_from_slice(body, bincode::config::legacy())
                .map_err(|e| CacheError::Store(e.to_string()))?;
        match record {
            LogRecord::Put { value, .. } | LogRecord::Metadata { value } => Ok(value),
            other => Err(CacheError::Store(format!(
                "offset {} holds {:?}, not a value",
                slot.offset, other
            ))),
        }
    }
}

impl NodeStorage for FileStorage {
    fn put(&mut self, id: &NodeId, bytes: Vec<u8>) -> CacheResult<()> {
        let slot = self.append(&LogRecord::Put {
            key: id.clone(),
            value: bytes,
        })?;
        if let Some(old) = self.slots.insert(id.clone(), slot) {
            self.live -= old.frame_len();
        }
        self.live += slot.frame_len();
        self.compact_if_wasteful()
    }

    fn get(&self, id: &NodeId) -> CacheResult<Option<Vec<u8>>> {
        match self.slots.get(id) {
            Some(slot) => self.read_value(*slot).map(Some),
            None => Ok(None),
        }
    }

    fn remove(&mut self, id: &NodeId) -> CacheResult<bool> {
        if !self.slots.contains_key(id) {
            return Ok(false);
        }
        self.append(&LogRecord::Remove { key: id.clone() })?;
        if let Some(old) = self.slots.remove(id) {
            self.live -= old.frame_len();
        }
        self.compact_if_wasteful()?;
        Ok(true)
    }

    fn contains(&self, id: &NodeId) -> bool {
        self.slots.contains_key(id)
    }

    fn ids(&self) -> Vec<NodeId> {
        self.slots.keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn clear(&mut self) -> CacheResult<()> {
        self.append(&LogRecord::Clear)?;
        self.slots.clear();
        self.metadata = None;
        self.live = HEADER_SIZE;
        self.compact_if_wasteful()
    }

    fn put_metadata(&mut self, bytes: Vec<u8>) -> CacheResult<()> {
        let slot = self.append(&LogRecord::Metadata { value: bytes })?;
        if let Some(old) = self.metadata.replace(slot) {
            self.live -= old.frame_len();
        }
        self.live += slot.frame_len();
        self.compact_if_wasteful()
    }

    fn metadata(&self) -> CacheResult<Option<Vec<u8>>> {
        match self.metadata {
            Some(slot) => self.read_value(slot).map(Some),
            None => Ok(None),
        }
    }

    fn sync(&mut self) -> CacheResult<()> {
        let guard = self.file.read();
        guard.as_ref().ok_or(CacheError::Closed)?.sync_all()?;
        Ok(())
    }
}

impl Drop for FileStorage {
    fn drop(&mut self) {
        if let Some(file) = self.file.get_mut().as_ref() {
            let _ = file.sync_all();
        }
    }
}

fn header_bytes() -> [u8; HEADER_SIZE as usize] {
    let mut header = [0u8; HEADER_SIZE as usize];
    header[..4].copy_from_slice(&MAGIC.to_le_bytes());
    header[4..].copy_from_slice(&VERSION.to_le_bytes());
    header
}

fn encode_frame(record: &LogRecord) -> CacheResult<Vec<u8>> {
    let body = bincode::serde::encode_to_vec(record, bincode::config::legacy())?;
    let len = u32::try_from(body.len()).map_err(|_| {
        CacheError::Store(format!("record of {} bytes is too large", body.len()))
    })?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE as usize + body.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&crc32c::crc32c(&body).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Reads one frame. `None` marks a torn or corrupt frame, where replay stops.
fn read_frame<R: Read>(reader: &mut R, remaining: u64) -> Option<(LogRecord, u32)> {
    let mut head = [0u8; FRAME_HEADER_SIZE as usize];
    reader.read_exact(&mut head).ok()?;
    let len = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
    let checksum = u32::from_le_bytes([head[4], head[5], head[6], head[7]]);
    if FRAME_HEADER_SIZE + len as u64 > remaining {
        return None;
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).ok()?;
    if crc32c::crc32c(&body) != checksum {
        return None;
    }
    let (record, _): (LogRecord, usize) =
        bincode::serde::decode_from_slice(&body, bincode::config::legacy()).ok()?;
    Some((record, len))
}
