//! In-memory table registry.
//!
//! Maps table ids to their heap files and schemas. Table ids are derived
//! from the canonical file path so the same file gets the same id across
//! restarts, which keeps page ids in the log meaningful.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use log::info;

use crate::access::heap::HeapFile;
use crate::access::tuple::TupleDesc;
use crate::storage::error::{StorageError, StorageResult};

pub type TableId = u32;

pub struct Catalog {
    page_size: usize,
    tables: DashMap<TableId, Arc<HeapFile>>,
    names: DashMap<String, TableId>,
}

impl Catalog {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            tables: DashMap::new(),
            names: DashMap::new(),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Opens (creating if missing) the heap file at `path` and registers it
    /// under `name`. Re-registering a name replaces the previous table.
    pub fn add_table(&self, name: &str, path: &Path, desc: TupleDesc) -> StorageResult<TableId> {
        if !path.exists() {
            std::fs::File::create(path)?;
        }
        let canonical = path.canonicalize()?;
        let table_id = table_id_for(&canonical);
        let file = HeapFile::open(&canonical, table_id, Arc::new(desc), self.page_size)?;
        self.add_heap_file(name, Arc::new(file));
        Ok(table_id)
    }

    /// Registers an already opened heap file.
    pub fn add_heap_file(&self, name: &str, file: Arc<HeapFile>) {
        let table_id = file.id();
        if let Some((_, old_id)) = self.names.remove(name) {
            self.tables.remove(&old_id);
        }
        info!("Registered table {} as {} ({})", name, table_id, file.desc());
        self.names.insert(name.to_string(), table_id);
        self.tables.insert(table_id, file);
    }

    pub fn database_file(&self, table_id: TableId) -> StorageResult<Arc<HeapFile>> {
        self.tables
            .get(&table_id)
            .map(|file| Arc::clone(file.value()))
            .ok_or(StorageError::UnknownTable(table_id))
    }

    pub fn tuple_desc(&self, table_id: TableId) -> StorageResult<Arc<TupleDesc>> {
        self.tables
            .get(&table_id)
            .map(|file| Arc::clone(file.desc()))
            .ok_or(StorageError::UnknownTable(table_id))
    }

    pub fn table_id(&self, name: &str) -> Option<TableId> {
        self.names.get(name).map(|id| *id)
    }
}

/// 32-bit FNV-1a of the path bytes.
fn table_id_for(path: &Path) -> TableId {
    const OFFSET: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    path.to_string_lossy()
        .bytes()
        .fold(OFFSET, |hash, b| (hash ^ b as u32).wrapping_mul(PRIME))
}
