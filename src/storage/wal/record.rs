//! Log record types and their on-disk encoding.
//!
//! Every record is
//!
//! ```text
//! [i32 type][i64 tid] payload [i64 start offset of this record]
//! ```
//!
//! in big-endian. UPDATE carries two page images, CHECKPOINT carries
//! `i32 count` followed by `count` pairs of `(i64 tid, i64 first offset)`.
//! The checkpoint's tid field is -1.

use std::fmt;
use std::io::Read;

use byteorder::{BigEndian, ReadBytesExt};
use bytes::{BufMut, BytesMut};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{PageId, PageIdKind, PageKind};
use crate::transaction::TransactionId;

/// Upper bound on a serialized page accepted from the log.
const MAX_IMAGE_BYTES: i32 = 1 << 24;

/// Record type tags as written to the log.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogRecordType {
    Abort = 1,
    Commit = 2,
    Update = 3,
    Begin = 4,
    Checkpoint = 5,
}

impl LogRecordType {
    pub fn from_i32(value: i32) -> StorageResult<Self> {
        match value {
            1 => Ok(LogRecordType::Abort),
            2 => Ok(LogRecordType::Commit),
            3 => Ok(LogRecordType::Update),
            4 => Ok(LogRecordType::Begin),
            5 => Ok(LogRecordType::Checkpoint),
            _ => Err(StorageError::RecoveryCorruption(format!(
                "unknown log record type {}",
                value
            ))),
        }
    }
}

impl fmt::Display for LogRecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogRecordType::Abort => "ABORT",
            LogRecordType::Commit => "COMMIT",
            LogRecordType::Update => "UPDATE",
            LogRecordType::Begin => "BEGIN",
            LogRecordType::Checkpoint => "CHECKPOINT",
        };
        write!(f, "{}", name)
    }
}

/// Serialized contents of one page together with what it is and where it
/// lives, enough to write it back without consulting the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub kind: PageKind,
    pub page_id: PageId,
    pub data: Vec<u8>,
}

impl PageImage {
    pub fn new(kind: PageKind, page_id: PageId, data: Vec<u8>) -> Self {
        Self {
            kind,
            page_id,
            data,
        }
    }

    fn id_kind(&self) -> PageIdKind {
        match self.kind {
            PageKind::Heap => PageIdKind::Heap,
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i32(self.kind as i32);
        buf.put_i32(self.id_kind() as i32);
        let ints = self.page_id.serialize();
        buf.put_i32(ints.len() as i32);
        for v in ints {
            buf.put_i32(v);
        }
        buf.put_i32(self.data.len() as i32);
        buf.put_slice(&self.data);
    }

    pub fn decode(reader: &mut impl Read) -> StorageResult<Self> {
        let kind = PageKind::from_i32(reader.read_i32::<BigEndian>()?)?;
        let id_kind = PageIdKind::from_i32(reader.read_i32::<BigEndian>()?)?;

        let n = reader.read_i32::<BigEndian>()?;
        if !(0..=16).contains(&n) {
            return Err(StorageError::RecoveryCorruption(format!(
                "page id with {} integers",
                n
            )));
        }
        let mut ints = Vec::with_capacity(n as usize);
        for _ in 0..n {
            ints.push(reader.read_i32::<BigEndian>()?);
        }
        let page_id = id_kind.build(&ints)?;

        let len = reader.read_i32::<BigEndian>()?;
        if !(0..=MAX_IMAGE_BYTES).contains(&len) {
            return Err(StorageError::RecoveryCorruption(format!(
                "page image of {} bytes",
                len
            )));
        }
        let mut data = vec![0u8; len as usize];
        reader.read_exact(&mut data)?;

        Ok(Self {
            kind,
            page_id,
            data,
        })
    }
}

/// A decoded log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Begin(TransactionId),
    Commit(TransactionId),
    Abort(TransactionId),
    Update {
        tid: TransactionId,
        before: PageImage,
        after: PageImage,
    },
    /// Active transactions with the offset of their first record.
    Checkpoint { active: Vec<(TransactionId, u64)> },
}

impl LogRecord {
    pub fn record_type(&self) -> LogRecordType {
        match self {
            LogRecord::Begin(_) => LogRecordType::Begin,
            LogRecord::Commit(_) => LogRecordType::Commit,
            LogRecord::Abort(_) => LogRecordType::Abort,
            LogRecord::Update { .. } => LogRecordType::Update,
            LogRecord::Checkpoint { .. } => LogRecordType::Checkpoint,
        }
    }

    /// Owning transaction; checkpoints have none.
    pub fn tid(&self) -> Option<TransactionId> {
        match self {
            LogRecord::Begin(tid) | LogRecord::Commit(tid) | LogRecord::Abort(tid) => Some(*tid),
            LogRecord::Update { tid, .. } => Some(*tid),
            LogRecord::Checkpoint { .. } => None,
        }
    }

    /// Encodes the record as it will sit at `offset` in the log.
    pub fn encode(&self, offset: u64) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_i32(self.record_type() as i32);
        buf.put_i64(self.tid().map(|t| t.value() as i64).unwrap_or(-1));

        match self {
            LogRecord::Begin(_) | LogRecord::Commit(_) | LogRecord::Abort(_) => {}
            LogRecord::Update { before, after, .. } => {
                before.encode(&mut buf);
                after.encode(&mut buf);
            }
            LogRecord::Checkpoint { active } => {
                buf.put_i32(active.len() as i32);
                for (tid, first) in active {
                    buf.put_i64(tid.value() as i64);
                    buf.put_i64(*first as i64);
                }
            }
        }

        buf.put_i64(offset as i64);
        buf
    }

    /// Reads one record. Returns the record and the offset stored in its
    /// trailer.
    pub fn decode(reader: &mut impl Read) -> StorageResult<(Self, u64)> {
        let record_type = LogRecordType::from_i32(reader.read_i32::<BigEndian>()?)?;
        let raw_tid = reader.read_i64::<BigEndian>()?;
        let tid = || -> StorageResult<TransactionId> {
            if raw_tid < 0 {
                return Err(StorageError::RecoveryCorruption(format!(
                    "{} record with transaction id {}",
                    record_type, raw_tid
                )));
            }
            Ok(TransactionId::new(raw_tid as u64))
        };

        let record = match record_type {
            LogRecordType::Begin => LogRecord::Begin(tid()?),
            LogRecordType::Commit => LogRecord::Commit(tid()?),
            LogRecordType::Abort => LogRecord::Abort(tid()?),
            LogRecordType::Update => {
                let tid = tid()?;
                let before = PageImage::decode(reader)?;
                let after = PageImage::decode(reader)?;
                LogRecord::Update { tid, before, after }
            }
            LogRecordType::Checkpoint => {
                let count = reader.read_i32::<BigEndian>()?;
                if count < 0 {
                    return Err(StorageError::RecoveryCorruption(format!(
                        "checkpoint with {} entries",
                        count
                    )));
                }
                let mut active = Vec::new();
                for _ in 0..count {
                    let tid = reader.read_i64::<BigEndian>()?;
                    let first = reader.read_i64::<BigEndian>()?;
                    if tid < 0 || first < 0 {
                        return Err(StorageError::RecoveryCorruption(format!(
                            "checkpoint entry ({}, {})",
                            tid, first
                        )));
                    }
                    active.push((TransactionId::new(tid as u64), first as u64));
                }
                LogRecord::Checkpoint { active }
            }
        };

        let trailer = reader.read_i64::<BigEndian>()?;
        if trailer < 0 {
            return Err(StorageError::RecoveryCorruption(format!(
                "negative record offset {}",
                trailer
            )));
        }
        Ok((record, trailer as u64))
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogRecord::Begin(tid) | LogRecord::Commit(tid) | LogRecord::Abort(tid) => {
                write!(f, "{} {}", self.record_type(), tid)
            }
            LogRecord::Update { tid, before, after } => write!(
                f,
                "UPDATE {} {} ({} -> {} bytes)",
                tid,
                after.page_id,
                before.data.len(),
                after.data.len()
            ),
            LogRecord::Checkpoint { active } => {
                write!(f, "CHECKPOINT [")?;
                for (i, (tid, first)) in active.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}@{}", tid, first)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// True when `err` is a short read, i.e. the log ended mid-record.
pub fn is_truncated(err: &StorageError) -> bool {
    matches!(err, StorageError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
}
