//! Checkpointing.

use log::info;

use crate::storage::buffer::BufferPool;
use crate::storage::error::StorageResult;
use crate::storage::wal::{LogFile, LogRecord};

impl LogFile {
    /// Flushes every dirty page in `pool`, appends a CHECKPOINT record
    /// naming the unfinished transactions and where each one's log history
    /// starts, points the header at it and truncates the log prefix nobody
    /// needs anymore.
    ///
    /// Holds the pool monitor throughout, so no commit can slip a COMMIT
    /// record in ahead of the checkpoint while its pages are still
    /// unwritten. Returns the offset of the checkpoint after truncation.
    pub fn log_checkpoint(&self, pool: &BufferPool) -> StorageResult<u64> {
        let mut pool_state = pool.lock_state();
        pool.flush_all_locked(&mut pool_state)?;

        let mut state = self.state.lock();
        self.force_locked(&mut state)?;

        let mut active: Vec<_> = state
            .tid_to_first
            .iter()
            .map(|(&tid, &first)| (tid, first))
            .collect();
        active.sort();
        let num_active = active.len();

        let offset = self.append_locked(&mut state, &LogRecord::Checkpoint { active })?;
        Self::write_header(&mut state, offset as i64)?;
        self.force_locked(&mut state)?;

        self.truncate_locked(&mut state)?;
        let offset = Self::read_header(&mut state)? as u64;
        info!(
            "Checkpoint at {} with {} active transactions",
            offset, num_active
        );
        Ok(offset)
    }
}
