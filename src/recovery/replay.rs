//! Crash recovery: redo committed work, undo everything else.

use std::collections::{HashMap, HashSet};
use std::io::{BufReader, Seek, SeekFrom};

use log::{debug, info, warn};

use crate::storage::buffer::BufferPool;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use crate::storage::wal::record::is_truncated;
use crate::storage::wal::{LogFile, LogRecord, PageImage, HEADER_SIZE, NO_CHECKPOINT};
use crate::transaction::TransactionId;

/// What a recovery pass found and did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    pub records_scanned: usize,
    /// Transactions whose after-images were reapplied.
    pub committed: usize,
    /// Transactions that never finished and were rolled back.
    pub rolled_back: usize,
    pub pages_redone: usize,
    /// Whether the log ended in a partially written record.
    pub torn_tail: bool,
    /// Highest transaction id seen in the log.
    pub max_tid: Option<TransactionId>,
}

impl LogFile {
    /// Brings the table files to a state holding exactly the work of
    /// committed transactions.
    ///
    /// Scans forward from the latest checkpoint (or the start of the log),
    /// buffering each transaction's after-images and writing them once its
    /// COMMIT is seen. Transactions with neither COMMIT nor ABORT are then
    /// rolled back and get an ABORT record. Running it again on a
    /// recovered log changes nothing.
    pub fn recover(&self, pool: &BufferPool) -> StorageResult<RecoveryStats> {
        let mut pool_state = pool.lock_state();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.recovery_undecided = false;
        state.tid_to_first.clear();

        let mut stats = RecoveryStats::default();
        let len = state.file.metadata()?.len();
        let header = Self::read_header(state)?;

        let start = if header == NO_CHECKPOINT {
            HEADER_SIZE
        } else if header >= HEADER_SIZE as i64 && (header as u64) < len {
            header as u64
        } else {
            return Err(StorageError::RecoveryCorruption(format!(
                "checkpoint pointer {} outside log of {} bytes",
                header, len
            )));
        };

        let mut active: HashMap<TransactionId, u64> = HashMap::new();
        if header != NO_CHECKPOINT {
            match Self::read_record_at(state, start) {
                Ok((LogRecord::Checkpoint { active: listed }, _)) => {
                    for (tid, first) in listed {
                        note_tid(&mut stats, tid);
                        active.insert(tid, first);
                    }
                }
                Ok((other, _)) => {
                    return Err(StorageError::RecoveryCorruption(format!(
                        "checkpoint pointer {} references {}",
                        start,
                        other.record_type()
                    )))
                }
                Err(e) if is_truncated(&e) => {
                    return Err(StorageError::RecoveryCorruption(format!(
                        "checkpoint at {} is incomplete",
                        start
                    )))
                }
                Err(e) => return Err(e),
            }
        }
        info!(
            "Recovering {:?} from offset {} ({} transactions open at checkpoint)",
            self.path(),
            start,
            active.len()
        );

        let mut pending: HashMap<TransactionId, Vec<PageImage>> = HashMap::new();
        let mut touched: HashSet<PageId> = HashSet::new();
        let mut end = len;

        state.file.seek(SeekFrom::Start(start))?;
        {
            let mut reader = BufReader::new(&state.file);
            let mut pos = start;
            while pos < len {
                let (record, trailer) = match LogRecord::decode(&mut reader) {
                    Ok(decoded) => decoded,
                    Err(e) if is_truncated(&e) => {
                        warn!("Log ends with a partial record at offset {}", pos);
                        stats.torn_tail = true;
                        end = pos;
                        break;
                    }
                    Err(e) => return Err(e),
                };
                if trailer != pos {
                    return Err(StorageError::RecoveryCorruption(format!(
                        "record at {} claims offset {}",
                        pos, trailer
                    )));
                }
                stats.records_scanned += 1;
                if let Some(tid) = record.tid() {
                    note_tid(&mut stats, tid);
                }

                match record {
                    LogRecord::Begin(tid) => {
                        active.entry(tid).or_insert(pos);
                    }
                    LogRecord::Update { tid, after, .. } => {
                        active.entry(tid).or_insert(pos);
                        pending.entry(tid).or_default().push(after);
                    }
                    LogRecord::Commit(tid) => {
                        let images = pending.remove(&tid).unwrap_or_default();
                        for image in &images {
                            self.write_image(image)?;
                            touched.insert(image.page_id);
                        }
                        debug!("Redid {} pages of {}", images.len(), tid);
                        stats.pages_redone += images.len();
                        stats.committed += 1;
                        active.remove(&tid);
                    }
                    LogRecord::Abort(tid) => {
                        pending.remove(&tid);
                        active.remove(&tid);
                    }
                    LogRecord::Checkpoint { .. } => {}
                }
                pos = reader.stream_position()?;
            }
        }

        if stats.torn_tail {
            state.file.set_len(end)?;
        }
        state.current_offset = end;
        state.tid_to_first = active;

        let mut losers: Vec<_> = state.tid_to_first.keys().copied().collect();
        losers.sort();
        for tid in losers {
            let restored = self.rollback_locked(state, tid)?;
            touched.extend(restored);
            self.append_locked(state, &LogRecord::Abort(tid))?;
            state.tid_to_first.remove(&tid);
            stats.rolled_back += 1;
            info!("Rolled back unfinished {}", tid);
        }
        self.force_locked(state)?;

        for page_id in touched {
            pool.discard_locked(&mut pool_state, page_id);
        }

        info!(
            "Recovery done: {} records, {} committed, {} rolled back",
            stats.records_scanned, stats.committed, stats.rolled_back
        );
        Ok(stats)
    }
}

fn note_tid(stats: &mut RecoveryStats, tid: TransactionId) {
    if stats.max_tid.map_or(true, |max| tid > max) {
        stats.max_tid = Some(tid);
    }
}
