//! Fixed-slot heap page.
//!
//! Layout of a page of `page_size` bytes holding tuples of `tuple_bytes`:
//!
//! ```text
//! +-----------------+--------+--------+-----+--------+---------+
//! | header bitmap   | slot 0 | slot 1 | ... | slot n | padding |
//! +-----------------+--------+--------+-----+--------+---------+
//! ```
//!
//! `n = floor(page_size * 8 / (tuple_bytes * 8 + 1))`, the header is
//! `ceil(n / 8)` bytes and slot `i` is occupied when bit `i % 8` (LSB first)
//! of header byte `i / 8` is set. Unused slots and padding are zero.

use std::sync::Arc;

use bytes::BufMut;

use crate::access::tuple::{RecordId, Tuple, TupleDesc};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{PageId, PageKind};
use crate::storage::wal::record::PageImage;
use crate::transaction::TransactionId;

pub struct HeapPage {
    pid: PageId,
    desc: Arc<TupleDesc>,
    page_size: usize,
    header: Vec<u8>,
    tuples: Vec<Option<Tuple>>,
    dirtier: Option<TransactionId>,
    before_image: Vec<u8>,
}

impl HeapPage {
    /// Number of tuple slots on a page.
    pub fn num_slots_for(page_size: usize, tuple_bytes: usize) -> usize {
        (page_size * 8) / (tuple_bytes * 8 + 1)
    }

    /// Size of the occupancy bitmap in bytes.
    pub fn header_size_for(num_slots: usize) -> usize {
        num_slots.div_ceil(8)
    }

    /// Bytes of a page with no occupied slots.
    pub fn empty_page_data(page_size: usize) -> Vec<u8> {
        vec![0u8; page_size]
    }

    /// Parses a page image. The image becomes the page's before-image.
    pub fn new(
        pid: PageId,
        data: &[u8],
        desc: Arc<TupleDesc>,
        page_size: usize,
    ) -> StorageResult<Self> {
        if data.len() != page_size {
            return Err(StorageError::RecoveryCorruption(format!(
                "{} has {} bytes, expected {}",
                pid,
                data.len(),
                page_size
            )));
        }

        let tuple_bytes = desc.byte_size();
        let num_slots = Self::num_slots_for(page_size, tuple_bytes);
        let header_size = Self::header_size_for(num_slots);
        let header = data[..header_size].to_vec();

        let mut tuples = Vec::with_capacity(num_slots);
        for slot in 0..num_slots {
            if header[slot / 8] & (1 << (slot % 8)) == 0 {
                tuples.push(None);
                continue;
            }
            let start = header_size + slot * tuple_bytes;
            let mut buf = &data[start..start + tuple_bytes];
            let mut tuple = Tuple::parse(&desc, &mut buf)?;
            tuple.set_record_id(Some(RecordId::new(pid, slot)));
            tuples.push(Some(tuple));
        }

        Ok(Self {
            pid,
            desc,
            page_size,
            header,
            tuples,
            dirtier: None,
            before_image: data.to_vec(),
        })
    }

    pub fn id(&self) -> PageId {
        self.pid
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn num_slots(&self) -> usize {
        self.tuples.len()
    }

    /// Serializes the page into exactly `page_size` bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let tuple_bytes = self.desc.byte_size();
        let mut buf = Vec::with_capacity(self.page_size);
        buf.put_slice(&self.header);
        for tuple in &self.tuples {
            match tuple {
                Some(t) => t.serialize(&mut buf),
                None => buf.put_bytes(0, tuple_bytes),
            }
        }
        buf.put_bytes(0, self.page_size - buf.len());
        buf
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        slot < self.tuples.len() && self.header[slot / 8] & (1 << (slot % 8)) != 0
    }

    fn mark_slot_used(&mut self, slot: usize, used: bool) {
        if used {
            self.header[slot / 8] |= 1 << (slot % 8);
        } else {
            self.header[slot / 8] &= !(1 << (slot % 8));
        }
    }

    pub fn num_empty_slots(&self) -> usize {
        (0..self.num_slots())
            .filter(|&slot| !self.is_slot_used(slot))
            .count()
    }

    /// Stores `tuple` in the lowest free slot and assigns its record id.
    pub fn insert_tuple(&mut self, tuple: &mut Tuple) -> StorageResult<usize> {
        if **tuple.desc() != *self.desc {
            return Err(StorageError::SchemaMismatch(format!(
                "tuple is ({}), page {} holds ({})",
                tuple.desc(),
                self.pid,
                self.desc
            )));
        }

        let slot = (0..self.num_slots())
            .find(|&slot| !self.is_slot_used(slot))
            .ok_or(StorageError::PageFull(self.pid))?;

        let rid = RecordId::new(self.pid, slot);
        tuple.set_record_id(Some(rid));
        self.mark_slot_used(slot, true);
        self.tuples[slot] = Some(tuple.clone());
        Ok(slot)
    }

    /// Clears the slot named by the tuple's record id.
    pub fn delete_tuple(&mut self, tuple: &Tuple) -> StorageResult<()> {
        let rid = tuple
            .record_id()
            .ok_or_else(|| StorageError::InvalidRecordId("tuple has no record id".into()))?;
        if rid.page_id != self.pid {
            return Err(StorageError::InvalidRecordId(format!(
                "{} is not on {}",
                rid, self.pid
            )));
        }
        if rid.slot >= self.num_slots() {
            return Err(StorageError::InvalidRecordId(format!(
                "{} has only {} slots",
                self.pid,
                self.num_slots()
            )));
        }
        if !self.is_slot_used(rid.slot) {
            return Err(StorageError::SlotEmpty {
                page_id: self.pid,
                slot: rid.slot,
            });
        }

        self.mark_slot_used(rid.slot, false);
        self.tuples[rid.slot] = None;
        Ok(())
    }

    pub fn tuple(&self, slot: usize) -> Option<&Tuple> {
        self.tuples.get(slot).and_then(Option::as_ref)
    }

    /// Occupied tuples in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.tuples.iter().flatten()
    }

    /// Sets or clears the dirty marker.
    pub fn mark_dirty(&mut self, dirtier: Option<TransactionId>) {
        self.dirtier = dirtier;
    }

    /// The transaction that last dirtied this page, if it is dirty.
    pub fn dirtier(&self) -> Option<TransactionId> {
        self.dirtier
    }

    pub fn before_image_data(&self) -> &[u8] {
        &self.before_image
    }

    /// Snapshot of the page as of the last load or clean point.
    pub fn before_image(&self) -> PageImage {
        PageImage::new(PageKind::Heap, self.pid, self.before_image.clone())
    }

    /// Current contents.
    pub fn image(&self) -> PageImage {
        PageImage::new(PageKind::Heap, self.pid, self.to_bytes())
    }

    /// Takes the current contents as the new before-image.
    pub fn set_before_image(&mut self) {
        self.before_image = self.to_bytes();
    }
}

impl std::fmt::Debug for HeapPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapPage")
            .field("pid", &self.pid)
            .field("slots", &self.num_slots())
            .field("empty", &self.num_empty_slots())
            .field("dirtier", &self.dirtier)
            .finish()
    }
}
