//! The write-ahead log file.
//!
//! File layout: an 8 byte header holding the offset of the latest
//! checkpoint record (or -1), followed by records as encoded in
//! [`super::record`]. Records are only ever appended; checkpoints truncate
//! the prefix that no active transaction still needs.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info, warn};
use parking_lot::Mutex;

use super::record::{is_truncated, LogRecord, PageImage};
use crate::catalog::Catalog;
use crate::storage::buffer::BufferPool;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use crate::transaction::TransactionId;

/// Header value meaning "no checkpoint yet".
pub const NO_CHECKPOINT: i64 = -1;
/// Size of the file header.
pub const HEADER_SIZE: u64 = 8;

pub(crate) struct LogState {
    pub(crate) file: File,
    /// Offset at which the next record will be written.
    pub(crate) current_offset: u64,
    /// First record offset of every transaction that has not finished.
    pub(crate) tid_to_first: HashMap<TransactionId, u64>,
    /// Set until either `recover` runs or the first append wipes the log.
    pub(crate) recovery_undecided: bool,
    pub(crate) total_records: u64,
}

/// Append-only write-ahead log shared by the whole engine.
pub struct LogFile {
    path: PathBuf,
    pub(crate) state: Mutex<LogState>,
    pub(crate) catalog: Arc<Catalog>,
    sync_on_force: bool,
}

impl LogFile {
    /// Opens (or creates) the log at `path`. Existing contents are kept
    /// until the first append; call `recover` first to replay them.
    pub fn open(path: &Path, catalog: Arc<Catalog>, sync_on_force: bool) -> StorageResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut len = file.metadata()?.len();
        if len < HEADER_SIZE {
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_i64::<BigEndian>(NO_CHECKPOINT)?;
            len = HEADER_SIZE;
        }

        debug!("Opened log {:?} ({} bytes)", path, len);

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(LogState {
                file,
                current_offset: len,
                tid_to_first: HashMap::new(),
                recovery_undecided: true,
                total_records: 0,
            }),
            catalog,
            sync_on_force,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records appended since the log was opened.
    pub fn total_records(&self) -> u64 {
        self.state.lock().total_records
    }

    /// Offset at which the next record will be written.
    pub fn current_offset(&self) -> u64 {
        self.state.lock().current_offset
    }

    /// Transactions that have logged records but not finished, with the
    /// offset of their first record.
    pub fn active_transactions(&self) -> Vec<(TransactionId, u64)> {
        let state = self.state.lock();
        let mut active: Vec<_> = state.tid_to_first.iter().map(|(&t, &o)| (t, o)).collect();
        active.sort();
        active
    }

    pub fn log_begin(&self, tid: TransactionId) -> StorageResult<()> {
        let mut state = self.state.lock();
        if state.tid_to_first.contains_key(&tid) {
            return Err(StorageError::DuplicateBegin(tid));
        }
        let offset = self.append_locked(&mut state, &LogRecord::Begin(tid))?;
        state.tid_to_first.insert(tid, offset);
        Ok(())
    }

    /// Appends an UPDATE record. Not forced.
    pub fn log_write(
        &self,
        tid: TransactionId,
        before: PageImage,
        after: PageImage,
    ) -> StorageResult<()> {
        let mut state = self.state.lock();
        let offset = self.append_locked(&mut state, &LogRecord::Update { tid, before, after })?;
        state.tid_to_first.entry(tid).or_insert(offset);
        Ok(())
    }

    /// Appends COMMIT and forces the log.
    pub fn log_commit(&self, tid: TransactionId) -> StorageResult<()> {
        let mut state = self.state.lock();
        self.append_locked(&mut state, &LogRecord::Commit(tid))?;
        self.force_locked(&mut state)?;
        state.tid_to_first.remove(&tid);
        Ok(())
    }

    /// Rolls `tid` back in the store, appends ABORT and forces the log.
    /// Returns the pages whose on-disk contents were restored; the caller
    /// must drop any cached copy of them.
    pub fn log_abort(&self, tid: TransactionId) -> StorageResult<Vec<PageId>> {
        let mut state = self.state.lock();
        let restored = if state.tid_to_first.contains_key(&tid) {
            self.rollback_locked(&mut state, tid)?
        } else {
            Vec::new()
        };
        self.append_locked(&mut state, &LogRecord::Abort(tid))?;
        self.force_locked(&mut state)?;
        state.tid_to_first.remove(&tid);
        Ok(restored)
    }

    /// Makes every appended record durable.
    pub fn force(&self) -> StorageResult<()> {
        let mut state = self.state.lock();
        self.force_locked(&mut state)
    }

    /// Restores the pages `tid` logged to their state before `tid` touched
    /// them and drops them from the pool. Does not log anything.
    pub fn rollback(&self, tid: TransactionId, pool: &BufferPool) -> StorageResult<()> {
        let mut pool_state = pool.lock_state();
        let restored = {
            let mut state = self.state.lock();
            if !state.tid_to_first.contains_key(&tid) {
                return Err(StorageError::UnknownTransaction(tid));
            }
            self.rollback_locked(&mut state, tid)?
        };
        for pid in restored {
            pool.discard_locked(&mut pool_state, pid);
        }
        Ok(())
    }

    /// Human readable listing of the whole log.
    pub fn dump(&self) -> StorageResult<Vec<String>> {
        let state = self.state.lock();
        Ok(LogContents::read_from(&state.file)?.lines())
    }

    /// Wipes the log if it still holds contents nobody recovered.
    pub(crate) fn pre_append(&self, state: &mut LogState) -> StorageResult<()> {
        state.total_records += 1;
        if state.recovery_undecided {
            state.recovery_undecided = false;
            info!("Discarding unrecovered log contents in {:?}", self.path);
            state.file.set_len(0)?;
            state.file.seek(SeekFrom::Start(0))?;
            state.file.write_i64::<BigEndian>(NO_CHECKPOINT)?;
            state.current_offset = HEADER_SIZE;
            state.tid_to_first.clear();
        }
        Ok(())
    }

    /// Writes `record` at the end of the log and returns its offset.
    pub(crate) fn append_locked(
        &self,
        state: &mut LogState,
        record: &LogRecord,
    ) -> StorageResult<u64> {
        self.pre_append(state)?;
        let offset = state.current_offset;
        let bytes = record.encode(offset);
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(&bytes)?;
        state.current_offset += bytes.len() as u64;
        Ok(offset)
    }

    pub(crate) fn force_locked(&self, state: &mut LogState) -> StorageResult<()> {
        state.file.flush()?;
        if self.sync_on_force {
            state.file.sync_data()?;
        }
        Ok(())
    }

    pub(crate) fn write_header(state: &mut LogState, checkpoint: i64) -> StorageResult<()> {
        state.file.seek(SeekFrom::Start(0))?;
        state.file.write_i64::<BigEndian>(checkpoint)?;
        Ok(())
    }

    pub(crate) fn read_header(state: &mut LogState) -> StorageResult<i64> {
        state.file.seek(SeekFrom::Start(0))?;
        Ok(state.file.read_i64::<BigEndian>()?)
    }

    /// Reads the record starting at `offset`.
    pub(crate) fn read_record_at(
        state: &mut LogState,
        offset: u64,
    ) -> StorageResult<(LogRecord, u64)> {
        state.file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(&state.file);
        let (record, _) = LogRecord::decode(&mut reader)?;
        let end = reader.stream_position()?;
        Ok((record, end))
    }

    /// For every page `tid` logged, writes back the before-image of the
    /// first UPDATE of that page by `tid`.
    pub(crate) fn rollback_locked(
        &self,
        state: &mut LogState,
        tid: TransactionId,
    ) -> StorageResult<Vec<PageId>> {
        let Some(&first) = state.tid_to_first.get(&tid) else {
            return Ok(Vec::new());
        };

        let mut restored: Vec<PageImage> = Vec::new();
        let mut seen = HashSet::new();
        let end = state.current_offset;

        state.file.seek(SeekFrom::Start(first))?;
        {
            let mut reader = BufReader::new(&state.file);
            let mut pos = first;
            while pos < end {
                let (record, _) = LogRecord::decode(&mut reader)?;
                pos = reader.stream_position()?;
                if let LogRecord::Update {
                    tid: record_tid,
                    before,
                    ..
                } = record
                {
                    if record_tid == tid && seen.insert(before.page_id) {
                        restored.push(before);
                    }
                }
            }
        }

        let mut pids = Vec::with_capacity(restored.len());
        for image in restored {
            self.write_image(&image)?;
            pids.push(image.page_id);
        }
        debug!("Rolled back {} pages of {}", pids.len(), tid);
        Ok(pids)
    }

    /// Writes a logged page image straight to its table file.
    pub(crate) fn write_image(&self, image: &PageImage) -> StorageResult<()> {
        let file = self.catalog.database_file(image.page_id.table_id)?;
        file.write_page_bytes(image.page_id.page_number, &image.data)
    }

    /// Drops every record before the oldest first record referenced by the
    /// latest checkpoint and rewrites the remaining offsets.
    pub(crate) fn truncate_locked(&self, state: &mut LogState) -> StorageResult<()> {
        let checkpoint = Self::read_header(state)?;
        if checkpoint == NO_CHECKPOINT {
            return Ok(());
        }
        let checkpoint = checkpoint as u64;

        let min = match Self::read_record_at(state, checkpoint)? {
            (LogRecord::Checkpoint { active }, _) => active
                .iter()
                .map(|&(_, first)| first)
                .chain(std::iter::once(checkpoint))
                .min()
                .unwrap_or(checkpoint),
            (other, _) => {
                return Err(StorageError::RecoveryCorruption(format!(
                    "checkpoint pointer {} references {}",
                    checkpoint,
                    other.record_type()
                )))
            }
        };
        if min <= HEADER_SIZE {
            return Ok(());
        }

        let relocate = |offset: u64| offset - min + HEADER_SIZE;

        let tmp_path = self.path.with_extension("truncating");
        let mut out = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        out.write_i64::<BigEndian>(relocate(checkpoint) as i64)?;

        let end = state.current_offset;
        state.file.seek(SeekFrom::Start(min))?;
        {
            let mut reader = BufReader::new(&state.file);
            let mut pos = min;
            while pos < end {
                let (record, _) = LogRecord::decode(&mut reader)?;
                let record = match record {
                    LogRecord::Checkpoint { active } => LogRecord::Checkpoint {
                        active: active
                            .into_iter()
                            .map(|(tid, first)| (tid, relocate(first)))
                            .collect(),
                    },
                    other => other,
                };
                out.write_all(&record.encode(relocate(pos)))?;
                pos = reader.stream_position()?;
            }
        }
        out.sync_all()?;

        let old_len = end;
        std::fs::rename(&tmp_path, &self.path)?;
        state.file = out;
        state.current_offset = relocate(end);
        for first in state.tid_to_first.values_mut() {
            *first = relocate(*first);
        }

        info!(
            "Truncated log: dropped {} bytes, {} -> {} bytes",
            min - HEADER_SIZE,
            old_len,
            state.current_offset
        );
        Ok(())
    }
}

/// Snapshot of a log file's contents.
#[derive(Debug, Default)]
pub struct LogContents {
    pub checkpoint: Option<u64>,
    pub records: Vec<(u64, LogRecord)>,
    /// Offset of a trailing partial record, if any.
    pub torn_at: Option<u64>,
}

impl LogContents {
    pub fn read(path: &Path) -> StorageResult<Self> {
        let file = File::open(path)?;
        Self::read_from(&file)
    }

    pub fn read_from(file: &File) -> StorageResult<Self> {
        let len = file.metadata()?.len();
        let mut contents = LogContents::default();
        if len < HEADER_SIZE {
            return Ok(contents);
        }

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(0))?;
        let header = reader.read_i64::<BigEndian>()?;
        if header != NO_CHECKPOINT {
            contents.checkpoint = Some(header as u64);
        }

        let mut pos = HEADER_SIZE;
        while pos < len {
            match LogRecord::decode(&mut reader) {
                Ok((record, _)) => {
                    contents.records.push((pos, record));
                    pos = reader.stream_position()?;
                }
                Err(e) if is_truncated(&e) => {
                    warn!("Log ends with a partial record at offset {}", pos);
                    contents.torn_at = Some(pos);
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(contents)
    }

    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.records.len() + 2);
        match self.checkpoint {
            Some(offset) => lines.push(format!("header: checkpoint at {}", offset)),
            None => lines.push("header: no checkpoint".to_string()),
        }
        for (offset, record) in &self.records {
            lines.push(format!("{:>8}  {}", offset, record));
        }
        if let Some(offset) = self.torn_at {
            lines.push(format!("{:>8}  <partial record>", offset));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{Field, Tuple, TupleDesc, Type};
    use crate::database::{Database, DatabaseConfig};
    use crate::storage::page::PageKind;
    use anyhow::Result;
    use tempfile::tempdir;

    fn image(page: u32, fill: u8) -> PageImage {
        PageImage::new(PageKind::Heap, PageId::new(1, page), vec![fill; 32])
    }

    fn open_log(path: &Path) -> Result<LogFile> {
        Ok(LogFile::open(path, Arc::new(Catalog::new(4096)), false)?)
    }

    #[test]
    fn test_new_log_has_empty_header() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("wal.log");
        let log = open_log(&path)?;

        assert_eq!(log.current_offset(), HEADER_SIZE);
        let contents = LogContents::read(&path)?;
        assert_eq!(contents.checkpoint, None);
        assert!(contents.records.is_empty());
        Ok(())
    }

    #[test]
    fn test_append_offsets_and_dump() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("wal.log");
        let log = open_log(&path)?;
        let tid = TransactionId::new(1);

        log.log_begin(tid)?;
        log.log_write(tid, image(0, 0), image(0, 1))?;
        log.log_commit(tid)?;

        let contents = LogContents::read(&path)?;
        let offsets: Vec<_> = contents.records.iter().map(|(o, _)| *o).collect();
        assert_eq!(offsets[0], 8);
        // BEGIN is 4 + 8 + 8 bytes
        assert_eq!(offsets[1], 28);
        assert_eq!(contents.records[2].1, LogRecord::Commit(tid));
        assert_eq!(log.total_records(), 3);
        assert!(log.active_transactions().is_empty());

        let lines = log.dump()?;
        assert_eq!(lines[0], "header: no checkpoint");
        assert!(lines[1].ends_with("BEGIN Txn1"));
        assert!(lines[3].ends_with("COMMIT Txn1"));
        Ok(())
    }

    #[test]
    fn test_duplicate_begin() -> Result<()> {
        let dir = tempdir()?;
        let log = open_log(&dir.path().join("wal.log"))?;
        let tid = TransactionId::new(4);

        log.log_begin(tid)?;
        assert!(matches!(
            log.log_begin(tid),
            Err(StorageError::DuplicateBegin(t)) if t == tid
        ));
        Ok(())
    }

    #[test]
    fn test_unrecovered_contents_discarded_on_first_append() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("wal.log");
        {
            let log = open_log(&path)?;
            log.log_begin(TransactionId::new(1))?;
            log.log_begin(TransactionId::new(2))?;
        }

        let log = open_log(&path)?;
        // Still there until something is appended
        assert_eq!(LogContents::read(&path)?.records.len(), 2);

        log.log_begin(TransactionId::new(3))?;
        let contents = LogContents::read(&path)?;
        assert_eq!(contents.records.len(), 1);
        assert_eq!(contents.records[0], (8, LogRecord::Begin(TransactionId::new(3))));
        Ok(())
    }

    #[test]
    fn test_partial_record_is_reported() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("wal.log");
        {
            let log = open_log(&path)?;
            log.log_begin(TransactionId::new(1))?;
            log.log_write(TransactionId::new(1), image(0, 0), image(0, 1))?;
        }
        let len = std::fs::metadata(&path)?.len();
        OpenOptions::new().write(true).open(&path)?.set_len(len - 5)?;

        let contents = LogContents::read(&path)?;
        assert_eq!(contents.records.len(), 1);
        assert_eq!(contents.torn_at, Some(28));
        assert!(contents.lines().last().unwrap().contains("partial"));
        Ok(())
    }

    #[test]
    fn test_rollback_restores_disk_and_drops_cached_page() -> Result<()> {
        let dir = tempdir()?;
        let db = Database::open(DatabaseConfig::for_testing(dir.path()))?;
        let table = db.add_table(
            "t",
            &dir.path().join("t.dat"),
            TupleDesc::from_types(vec![Type::Int]),
        )?;
        let file = db.catalog().database_file(table)?;

        let txn = db.begin()?;
        let mut tuple = Tuple::new(db.catalog().tuple_desc(table)?, vec![Field::Int(1)])?;
        let pid = db.pool().insert_tuple(txn.id(), table, &mut tuple)?[0];
        db.pool().flush_all_pages()?;
        assert_eq!(file.read_page(pid)?.iter().count(), 1);

        db.log().rollback(txn.id(), db.pool())?;
        assert_eq!(file.read_page(pid)?.iter().count(), 0);
        assert!(!db.pool().is_cached(pid));

        let unknown = TransactionId::new(999);
        assert!(matches!(
            db.log().rollback(unknown, db.pool()),
            Err(StorageError::UnknownTransaction(t)) if t == unknown
        ));
        txn.abort()?;
        Ok(())
    }
}
